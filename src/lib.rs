//! Keel - execution core of a declarative build orchestrator
//!
//! This crate provides the library behind the `keel` binary: the build
//! model, property storage and resolution, component binding and
//! configuration, target ordering, and frame-based execution with
//! build events and aspects.

pub mod component;
pub mod core;
pub mod execution;
pub mod ops;
pub mod property;
pub mod resolver;
pub mod stdlib;
pub mod util;

pub use component::{Component, ComponentClass, ComponentHandle, ComponentLibrary};
pub use core::{load_project, BuildElement, Location, Project, Target};
pub use execution::{
    BuildEvent, BuildListener, ExecutionContext, ExecutionError, Frame, FrameServices,
    FrameSettings, MessageLevel, TaskError,
};
pub use property::{Priority, PropertyStore, Value};
pub use util::context::GlobalContext;
