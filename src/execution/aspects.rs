//! Aspects: interceptors around component creation and task execution.
//!
//! Aspects come from imported libraries and run in import order. Around
//! each task execution, `pre_execute` may hand back a context; only the
//! aspects that did are called again in `post_execute`, which sees the
//! current failure (if any) and returns the failure that should stand.
//! An aspect can therefore suppress a failure, replace it, or introduce
//! one. Suppressions are reported back to the frame, which logs them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::component::ComponentHandle;
use crate::core::element::BuildElement;
use crate::execution::error::ExecutionError;
use crate::execution::task::Task;

/// Per-execution state an aspect keeps between its hooks.
pub type AspectContext = Box<dyn Any + Send>;

pub trait Aspect: Send + Sync {
    fn name(&self) -> &str;

    /// Called after construction, before the component is configured.
    fn pre_create(
        &self,
        _component: &ComponentHandle,
        _model: &BuildElement,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// Called once the component is configured.
    fn post_create(
        &self,
        _component: &ComponentHandle,
        _model: &BuildElement,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// Called before a task executes. Returning a context makes the aspect
    /// take part in `post_execute` for this execution.
    fn pre_execute(&self, _task: &Task) -> Result<Option<AspectContext>, ExecutionError> {
        Ok(None)
    }

    /// Called after the task executed, with the failure so far.
    fn post_execute(
        &self,
        _context: AspectContext,
        failure: Option<ExecutionError>,
    ) -> Option<ExecutionError> {
        failure
    }
}

/// An aspect that attached a context in `pre_execute`.
pub struct ActiveAspect {
    aspect: Arc<dyn Aspect>,
    context: AspectContext,
}

/// The aspects of a frame, in import order.
///
/// Chains are snapshots: adding an aspect produces a new chain.
#[derive(Clone, Default)]
pub struct AspectChain {
    aspects: Arc<Vec<Arc<dyn Aspect>>>,
}

impl AspectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, aspect: Arc<dyn Aspect>) -> Self {
        let mut aspects = (*self.aspects).clone();
        aspects.push(aspect);
        AspectChain {
            aspects: Arc::new(aspects),
        }
    }

    pub fn len(&self) -> usize {
        self.aspects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Aspect>> {
        self.aspects.iter()
    }

    pub fn pre_create(
        &self,
        component: &ComponentHandle,
        model: &BuildElement,
    ) -> Result<(), ExecutionError> {
        self.aspects
            .iter()
            .try_for_each(|aspect| aspect.pre_create(component, model))
    }

    pub fn post_create(
        &self,
        component: &ComponentHandle,
        model: &BuildElement,
    ) -> Result<(), ExecutionError> {
        self.aspects
            .iter()
            .try_for_each(|aspect| aspect.post_create(component, model))
    }

    /// Run every `pre_execute` hook; keep the aspects that returned a context.
    pub fn pre_execute(&self, task: &Task) -> Result<Vec<ActiveAspect>, ExecutionError> {
        let mut active = Vec::new();
        for aspect in self.aspects.iter() {
            if let Some(context) = aspect.pre_execute(task)? {
                active.push(ActiveAspect {
                    aspect: Arc::clone(aspect),
                    context,
                });
            }
        }
        Ok(active)
    }

    /// Run the `post_execute` hooks of the active aspects in order.
    ///
    /// `on_suppressed` is called whenever an aspect turns a failure into
    /// success, with the aspect name and the failure it dropped.
    pub fn post_execute(
        active: Vec<ActiveAspect>,
        mut failure: Option<ExecutionError>,
        mut on_suppressed: impl FnMut(&str, &str),
    ) -> Option<ExecutionError> {
        for ActiveAspect { aspect, context } in active {
            let before = failure.as_ref().map(|e| e.to_string());
            failure = aspect.post_execute(context, failure);
            if let (Some(message), None) = (before, failure.as_ref()) {
                on_suppressed(aspect.name(), &message);
            }
        }
        failure
    }
}

impl fmt::Debug for AspectChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.aspects.iter().map(|a| a.name().to_string()))
            .finish()
    }
}
