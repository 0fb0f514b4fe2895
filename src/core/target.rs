//! Target definitions.

use serde::{Deserialize, Serialize};

use crate::core::element::BuildElement;
use crate::core::location::Location;

/// Separator between a frame reference path and a local name (`lib:compile`).
pub const REF_DELIMITER: char = ':';

/// A named, orderable unit of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Target name, unique within its project
    pub name: String,

    /// Dependency names in declared order, possibly frame-qualified
    #[serde(default)]
    pub depends: Vec<String>,

    /// Task elements in declared order
    #[serde(default, rename = "task")]
    pub tasks: Vec<BuildElement>,

    /// Property that must be set for the target to run
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    /// Property that must not be set for the target to run
    #[serde(default, rename = "unless")]
    pub unless_condition: Option<String>,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    #[serde(skip)]
    pub location: Location,
}

impl Target {
    /// Create a target with no dependencies and no tasks.
    pub fn new(name: impl Into<String>) -> Self {
        Target {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a dependency.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends.push(name.into());
        self
    }

    /// Append a task element.
    pub fn with_task(mut self, task: BuildElement) -> Self {
        self.tasks.push(task);
        self
    }

    /// Set the `if` guard.
    pub fn only_if(mut self, property: impl Into<String>) -> Self {
        self.if_condition = Some(property.into());
        self
    }

    /// Set the `unless` guard.
    pub fn unless(mut self, property: impl Into<String>) -> Self {
        self.unless_condition = Some(property.into());
        self
    }

    /// Set the declaring location.
    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Dependencies declared without a frame qualifier.
    pub fn local_depends(&self) -> impl Iterator<Item = &str> {
        self.depends
            .iter()
            .map(String::as_str)
            .filter(|d| !d.contains(REF_DELIMITER))
    }
}

/// Split a possibly qualified name into its reference path and local name.
///
/// The path is everything before the last delimiter: `a:b:compile` yields
/// `(Some("a:b"), "compile")`.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rfind(REF_DELIMITER) {
        Some(idx) => (Some(&name[..idx]), &name[idx + 1..]),
        None => (None, name),
    }
}
