//! High-level operations.
//!
//! This module contains the implementation of Keel commands.

pub mod keel_run;
pub mod keel_targets;

pub use keel_run::{initial_properties, load, parse_define, root_frame, run, LoadedProject, RunOptions};
pub use keel_targets::{execution_order, list_targets, TargetInfo};
