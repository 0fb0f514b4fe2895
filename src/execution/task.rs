//! A configured task-like component ready to execute.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::component::ComponentHandle;
use crate::core::element::BuildElement;
use crate::core::location::Location;
use crate::execution::context::ExecutionContext;
use crate::execution::error::TaskError;
use crate::execution::events::{ElementRef, TaskEntry, TaskId};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A task instance together with the element it was configured from.
///
/// Tasks present the uniform lifecycle to the frame: they were initialized
/// and validated on creation, can be executed, and are destroyed once the
/// frame is done with them.
pub struct Task {
    id: TaskId,
    name: String,
    project: Option<String>,
    handle: ComponentHandle,
    element: BuildElement,
    context: ExecutionContext,
}

impl Task {
    pub(crate) fn new(
        name: impl Into<String>,
        project: Option<String>,
        handle: ComponentHandle,
        element: BuildElement,
        context: ExecutionContext,
    ) -> Self {
        Task {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            project,
            handle,
            element,
            context,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Name the task was created under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &ComponentHandle {
        &self.handle
    }

    pub fn element(&self) -> &BuildElement {
        &self.element
    }

    pub fn location(&self) -> &Location {
        &self.element.location
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn element_ref(&self) -> ElementRef {
        ElementRef::new(&self.name, self.project.as_deref(), self.location())
    }

    pub(crate) fn entry(&self) -> TaskEntry {
        TaskEntry {
            id: self.id,
            name: self.name.clone(),
            handler: self.handle.lock().output_handler(),
        }
    }

    /// Run the component. A panic inside the component becomes a failure.
    pub(crate) fn perform(&self) -> Result<(), TaskError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handle.lock().execute(&self.context)
        }));
        match outcome {
            Ok(result) => result.map_err(|e| e.with_location(self.location())),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(TaskError::new(format!("<{}> panicked: {}", self.name, reason))
                    .with_location(self.location()))
            }
        }
    }

    pub(crate) fn destroy(&self) {
        self.handle.lock().destroy();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("location", self.location())
            .finish()
    }
}
