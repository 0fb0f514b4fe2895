//! Error taxonomy for build execution.
//!
//! Each layer reports its own error type; [`ExecutionError`] gathers them
//! with the most specific source location known. Outer layers only ever
//! fill in a location that is still missing, so the innermost location
//! survives propagation.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::component::binder::BindingError;
use crate::component::library::ImportError;
use crate::core::location::Location;
use crate::core::project::ModelError;
use crate::property::PropertyError;
use crate::resolver::TargetGraphError;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Malformed configuration: property syntax, unresolved references, base directory.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ConfigError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Property(#[from] PropertyError),

    #[error("base directory {} does not exist", path.display())]
    #[diagnostic(code(keel::config::missing_basedir))]
    MissingBaseDir { path: PathBuf },

    #[error("base directory {} is not a directory", path.display())]
    #[diagnostic(code(keel::config::basedir_not_dir))]
    BaseDirNotDirectory { path: PathBuf },

    #[error("property overrides can only be set for properties in referenced projects, not `{name}`")]
    #[diagnostic(code(keel::config::override_outside_reference))]
    OverrideOutsideReference { name: String },

    #[error("frame is {state} and cannot {operation}")]
    #[diagnostic(code(keel::config::frame_state))]
    FrameState {
        state: &'static str,
        operation: &'static str,
    },
}

/// Failure reported by a component.
///
/// Components build these with [`TaskError::new`]; engine errors raised
/// while a component calls back into its context are carried through
/// unchanged and recovered when the failure leaves the component.
pub struct TaskError {
    message: String,
    location: Option<Location>,
    source: Option<Box<dyn StdError + Send + Sync>>,
    engine: Option<Box<ExecutionError>>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        TaskError {
            message: message.into(),
            location: None,
            source: None,
            engine: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a location if none is set yet.
    pub fn with_location(mut self, location: &Location) -> Self {
        if self.location.is_none() && location.is_known() {
            self.location = Some(location.clone());
        }
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskError")
            .field("message", &self.message)
            .field("location", &self.location)
            .field("source", &self.source)
            .field("engine", &self.engine)
            .finish()
    }
}

impl StdError for TaskError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        if let Some(engine) = &self.engine {
            return engine.source();
        }
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl MietteDiagnostic for TaskError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new("keel::task::failed"))
    }
}

impl From<ExecutionError> for TaskError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::Task(inner) => inner,
            other => TaskError {
                message: other.to_string(),
                location: other.location().cloned(),
                source: None,
                engine: Some(Box::new(other)),
            },
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(error: std::io::Error) -> Self {
        TaskError::new(error.to_string()).with_source(error)
    }
}

/// Any failure raised while configuring or running a build.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ExecutionError {
    #[error("{error}")]
    #[diagnostic(code(keel::config))]
    Config {
        error: ConfigError,
        location: Option<Location>,
    },

    #[error("{error}")]
    #[diagnostic(code(keel::binding))]
    Binding {
        error: BindingError,
        location: Option<Location>,
    },

    #[error("{error}")]
    #[diagnostic(code(keel::import))]
    Import {
        error: ImportError,
        location: Option<Location>,
    },

    #[error("{error}")]
    #[diagnostic(code(keel::target))]
    TargetGraph {
        error: TargetGraphError,
        location: Option<Location>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error("{0}")]
    #[diagnostic(code(keel::task))]
    Task(TaskError),
}

impl ExecutionError {
    /// The most specific location known for this failure.
    pub fn location(&self) -> Option<&Location> {
        match self {
            ExecutionError::Config { location, .. }
            | ExecutionError::Binding { location, .. }
            | ExecutionError::Import { location, .. }
            | ExecutionError::TargetGraph { location, .. } => location.as_ref(),
            ExecutionError::Model(error) => Some(error.location()).filter(|l| l.is_known()),
            ExecutionError::Task(error) => error.location(),
        }
    }

    /// Fill in the location if none is known yet.
    pub fn with_location(mut self, loc: &Location) -> Self {
        if !loc.is_known() {
            return self;
        }
        match &mut self {
            ExecutionError::Config { location, .. }
            | ExecutionError::Binding { location, .. }
            | ExecutionError::Import { location, .. }
            | ExecutionError::TargetGraph { location, .. } => {
                if location.is_none() {
                    *location = Some(loc.clone());
                }
            }
            ExecutionError::Model(_) => {}
            ExecutionError::Task(error) => {
                if error.location.is_none() {
                    error.location = Some(loc.clone());
                }
            }
        }
        self
    }

    /// Short category name used in events and logs.
    pub fn category(&self) -> &'static str {
        match self {
            ExecutionError::Config { .. } => "config",
            ExecutionError::Binding { .. } => "binding",
            ExecutionError::Import { .. } => "import",
            ExecutionError::TargetGraph { .. } => "target",
            ExecutionError::Model(_) => "model",
            ExecutionError::Task(_) => "task",
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(self.to_string());
        if let Some(location) = self.location() {
            diag = diag.with_location(location);
        }
        let mut cause = match self {
            ExecutionError::Config { error, .. } => error.source(),
            ExecutionError::Binding { error, .. } => error.source(),
            ExecutionError::Import { error, .. } => error.source(),
            ExecutionError::TargetGraph { error, .. } => error.source(),
            ExecutionError::Model(error) => error.source(),
            ExecutionError::Task(error) => error.source(),
        };
        while let Some(err) = cause {
            diag = diag.with_cause(err);
            cause = err.source();
        }
        match self {
            ExecutionError::TargetGraph {
                error: TargetGraphError::UnknownTarget { .. },
                ..
            } => diag.with_suggestion(suggestions::TARGET_NOT_FOUND),
            ExecutionError::Import { .. } => diag.with_suggestion(suggestions::IMPORT_FAILED),
            ExecutionError::Config {
                error: ConfigError::Property(PropertyError::Unresolved { .. }),
                ..
            } => diag.with_suggestion(suggestions::UNSET_PROPERTY),
            ExecutionError::Task(_) => diag.with_suggestion(suggestions::TASK_FAILED),
            _ => diag,
        }
    }
}

impl From<TaskError> for ExecutionError {
    fn from(error: TaskError) -> Self {
        match error.engine {
            Some(engine) => {
                let location = error.location;
                let engine = *engine;
                match location {
                    Some(loc) => engine.with_location(&loc),
                    None => engine,
                }
            }
            None => ExecutionError::Task(error),
        }
    }
}

impl From<ConfigError> for ExecutionError {
    fn from(error: ConfigError) -> Self {
        ExecutionError::Config {
            error,
            location: None,
        }
    }
}

impl From<PropertyError> for ExecutionError {
    fn from(error: PropertyError) -> Self {
        ConfigError::from(error).into()
    }
}

impl From<BindingError> for ExecutionError {
    fn from(error: BindingError) -> Self {
        ExecutionError::Binding {
            error,
            location: None,
        }
    }
}

impl From<ImportError> for ExecutionError {
    fn from(error: ImportError) -> Self {
        ExecutionError::Import {
            error,
            location: None,
        }
    }
}

impl From<TargetGraphError> for ExecutionError {
    fn from(error: TargetGraphError) -> Self {
        ExecutionError::TargetGraph {
            error,
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_location_wins() {
        let inner = Location::at("Keel.toml", 10, 3);
        let outer = Location::at("Keel.toml", 2, 1);
        let err = ExecutionError::from(ConfigError::MissingBaseDir {
            path: PathBuf::from("/nope"),
        })
        .with_location(&inner)
        .with_location(&outer);
        assert_eq!(err.location(), Some(&inner));
    }

    #[test]
    fn test_unknown_location_does_not_fill() {
        let err = ExecutionError::from(TaskError::new("boom")).with_location(&Location::unknown());
        assert_eq!(err.location(), None);
    }

    #[test]
    fn test_engine_error_round_trips_through_task_error() {
        let err = ExecutionError::from(TargetGraphError::UnknownTarget {
            name: "nope".to_string(),
        });
        let task_error = TaskError::from(err).with_location(&Location::at("Keel.toml", 4, 1));
        let back = ExecutionError::from(task_error);
        assert!(matches!(
            back,
            ExecutionError::TargetGraph {
                error: TargetGraphError::UnknownTarget { .. },
                location: Some(_)
            }
        ));
    }

    #[test]
    fn test_to_diagnostic() {
        let err = ExecutionError::from(TaskError::new("compilation failed"))
            .with_location(&Location::at("Keel.toml", 7, 1));
        let output = err.to_diagnostic().format(false);
        assert!(output.starts_with("error: compilation failed\n"));
        assert!(output.contains("  --> Keel.toml:7:1\n"));
        assert!(output.contains("help: Run `keel run --verbose`"));
    }
}
