//! The in-memory build model.
//!
//! This module contains the read-only structures the engine executes:
//! - Source locations
//! - Build elements (declarative nodes)
//! - Targets and projects
//! - The Keel.toml descriptor loader

pub mod element;
pub mod location;
pub mod manifest;
pub mod project;
pub mod target;

pub use element::BuildElement;
pub use location::Location;
pub use manifest::{load_project, parse_project, DescriptorError, DESCRIPTOR_NAME};
pub use project::{ModelError, Project};
pub use target::{split_qualified, Target, REF_DELIMITER};
