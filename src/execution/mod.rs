//! Build execution.
//!
//! This module contains:
//! - Frames: per-project execution state, properties and target runs
//! - Component creation and configuration from build elements
//! - Tasks, the execution context handed to components, and aspects
//! - Build events and listeners
//! - The execution error taxonomy

pub mod aspects;
pub mod configure;
pub mod context;
pub mod error;
pub mod events;
pub mod frame;
pub mod task;

pub use aspects::{Aspect, AspectChain, AspectContext};
pub use configure::Created;
pub use context::ExecutionContext;
pub use error::{ConfigError, ExecutionError, TaskError};
pub use events::{
    BuildEvent, BuildListener, ElementRef, EventBus, Failure, MessageLevel, RecordingListener,
    TaskEntry, TaskId,
};
pub use frame::{
    Frame, FrameServices, FrameSettings, FrameState, BASEDIR_PROPERTY, FILE_PROPERTY,
    PROJECT_NAME_PROPERTY,
};
pub use task::Task;
