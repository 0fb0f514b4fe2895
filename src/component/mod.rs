//! Components: task- and type-like units configured from build elements.
//!
//! This module contains:
//! - The [`Component`] lifecycle trait and shared [`ComponentHandle`]s
//! - Attribute value conversion
//! - Component classes (explicit capability tables) and the binder
//! - Component libraries, the loader abstraction and the per-frame registry

pub mod binder;
pub mod class;
pub mod convert;
pub mod library;
pub mod registry;

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::execution::context::ExecutionContext;
use crate::execution::error::TaskError;

pub use binder::{Binder, BindingError, CapabilityBinder};
pub use class::{ClassBuilder, ClassId, ComponentClass};
pub use convert::{AttributeValue, Converter, ConverterSet, TypeKey, ValueType};
pub use library::{
    ComponentDefinition, ComponentLibrary, ComponentLoader, DefinitionKind, ImportError,
    LibraryManager, LoadFailure, StaticLoader,
};
pub use registry::{ComponentRegistry, ImportBinding};

/// Access to `dyn Any` for trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Receiver for text written by threads a task spawned.
pub trait OutputHandler: Send + Sync {
    fn output(&self, line: &str, is_error: bool) -> Result<(), TaskError>;
}

/// Lifecycle of a component instance.
///
/// The engine calls `init` right after construction, configures the
/// instance through its class, then calls `validate`. Task-like
/// components are executed (possibly many times) and finally destroyed.
pub trait Component: AsAny + Send {
    fn init(&mut self, _ctx: &ExecutionContext, _name: &str) -> Result<(), TaskError> {
        Ok(())
    }

    fn validate(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn execute(&mut self, _ctx: &ExecutionContext) -> Result<(), TaskError> {
        Ok(())
    }

    fn destroy(&mut self) {}

    /// Handler for output of threads spawned by this task.
    fn output_handler(&self) -> Option<Arc<dyn OutputHandler>> {
        None
    }
}

/// A shared, lockable component instance together with its class.
#[derive(Clone)]
pub struct ComponentHandle {
    instance: Arc<Mutex<Box<dyn Component>>>,
    class: Arc<ComponentClass>,
}

impl ComponentHandle {
    pub fn new(component: Box<dyn Component>, class: Arc<ComponentClass>) -> Self {
        ComponentHandle {
            instance: Arc::new(Mutex::new(component)),
            class,
        }
    }

    pub fn class(&self) -> &Arc<ComponentClass> {
        &self.class
    }

    /// Lock the instance. A poisoned lock is recovered; the panic that
    /// poisoned it has already been reported as a task failure.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Component>> {
        self.instance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Borrow the instance as its concrete type.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.lock();
        (**guard).as_any().downcast_ref::<T>().map(f)
    }

    /// Borrow the instance through a capability its class declares.
    pub fn with_capability<C: ?Sized + 'static, R>(&self, f: impl FnOnce(&C) -> R) -> Option<R> {
        let guard = self.lock();
        let capability = self.class.project::<C>((**guard).as_any())?;
        Some(f(capability))
    }

    /// Whether the instance can be used where `key` is expected.
    pub fn is_assignable_to(&self, key: TypeKey) -> bool {
        self.class.is_assignable_to(key)
    }

    pub fn ptr_eq(&self, other: &ComponentHandle) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    pub fn describe(&self) -> String {
        format!("<{}>", self.class.name())
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("class", &self.class.name())
            .finish()
    }
}
