//! The services a frame offers to the components it creates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::core::location::Location;
use crate::core::project::Project;
use crate::execution::error::TaskError;
use crate::execution::events::{MessageLevel, TaskEntry};
use crate::execution::frame::Frame;
use crate::execution::task::Task;
use crate::property::{DataValue, Priority, PropertyStore, Value};

/// Handle given to every component instance.
///
/// The context only holds a weak link to its frame; a component that
/// outlives its build gets an error from every frame-backed call.
#[derive(Clone)]
pub struct ExecutionContext {
    frame: Weak<Frame>,
    component: String,
    location: Location,
}

impl ExecutionContext {
    pub(crate) fn new(frame: Weak<Frame>, component: impl Into<String>, location: Location) -> Self {
        ExecutionContext {
            frame,
            component: component.into(),
            location,
        }
    }

    pub fn frame(&self) -> Result<Arc<Frame>, TaskError> {
        self.frame
            .upgrade()
            .ok_or_else(|| TaskError::new("the build this component belongs to has finished"))
    }

    /// Name the component was created under.
    pub fn component_name(&self) -> &str {
        &self.component
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.frame.upgrade()?.get_value(name)
    }

    pub fn property_text(&self, name: &str) -> Option<String> {
        self.property(name).map(|value| value.to_string())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// Write a property at base priority.
    pub fn set_property(
        &self,
        name: &str,
        value: impl Into<Value>,
        mutable: bool,
    ) -> Result<(), TaskError> {
        self.frame()?
            .set_data_value(name, DataValue::new(value, Priority::Base), mutable)
            .map_err(TaskError::from)
    }

    /// Substitute property references in `text`.
    pub fn resolve(&self, text: &str) -> Result<String, TaskError> {
        self.frame()?.resolve(text).map_err(TaskError::from)
    }

    pub fn base_dir(&self) -> Result<PathBuf, TaskError> {
        Ok(self.frame()?.base_dir())
    }

    /// Resolve `path` against the frame's base directory.
    pub fn resolve_path(&self, path: &Path) -> Result<PathBuf, TaskError> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        Ok(self.base_dir()?.join(path))
    }

    /// Log a build message attributed to this component.
    pub fn log(&self, message: impl Into<String>, level: MessageLevel) {
        if let Some(frame) = self.frame.upgrade() {
            frame
                .events()
                .message_logged(Some(&self.component), message, level);
        }
    }

    /// Route a line of output written by the calling thread.
    pub fn thread_output(&self, line: &str, is_error: bool) {
        if let Some(frame) = self.frame.upgrade() {
            frame.events().thread_output(line, is_error);
        }
    }

    /// The task the calling thread works for, to hand to worker threads.
    pub fn current_task(&self) -> Option<TaskEntry> {
        self.frame.upgrade()?.events().current_task()
    }

    /// Run `targets` of `project` in a new child frame.
    pub fn run_build(
        &self,
        project: Arc<Project>,
        properties: PropertyStore,
        targets: &[String],
    ) -> Result<(), TaskError> {
        self.frame()?
            .run_sub_build(project, properties, targets)
            .map_err(TaskError::from)
    }

    /// Run `targets` of the current project in a new child frame.
    pub fn call_target(&self, properties: PropertyStore, targets: &[String]) -> Result<(), TaskError> {
        self.frame()?
            .call_target(properties, targets)
            .map_err(TaskError::from)
    }

    /// Make `project` reachable from this frame as `name:`.
    pub fn create_project_reference(
        &self,
        name: &str,
        project: Arc<Project>,
        properties: PropertyStore,
    ) -> Result<(), TaskError> {
        self.frame()?
            .create_project_reference(name, project, properties)
            .map(|_| ())
            .map_err(TaskError::from)
    }

    pub fn import_library(&self, library: &str) -> Result<(), TaskError> {
        self.frame()?
            .import_library(library)
            .map_err(TaskError::from)
    }

    pub fn import_component(
        &self,
        library: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), TaskError> {
        self.frame()?
            .import_component(library, name, alias)
            .map_err(TaskError::from)
    }

    /// Import a component visible in a referenced frame (`ref:name`).
    pub fn import_frame_component(&self, qualified: &str, alias: Option<&str>) -> Result<(), TaskError> {
        self.frame()?
            .import_frame_component(qualified, alias)
            .map_err(TaskError::from)
    }

    /// Execute a nested task, with aspects and events.
    pub fn execute_task(&self, task: &Task) -> Result<(), TaskError> {
        self.frame()?.execute_task(task).map_err(TaskError::from)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("component", &self.component)
            .field("location", &self.location)
            .finish()
    }
}
