//! Rendering of errors that end a `keel` invocation.
//!
//! A diagnostic carries the failure message, the descriptor location it
//! points at, the chain of causes, and at most one hint for what to try next.

use std::fmt;

use crate::core::location::Location;
use crate::execution::error::ExecutionError;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion when no build descriptor is found.
    pub const NO_DESCRIPTOR: &str =
        "help: Create a `Keel.toml` in this directory or pass `--file <path>`";

    /// Suggestion when a target is not found.
    pub const TARGET_NOT_FOUND: &str = "help: Run `keel targets` to see available targets";

    /// Suggestion when a library or component cannot be imported.
    pub const IMPORT_FAILED: &str =
        "help: Check the library id; libraries starting with `keel.` are imported automatically";

    /// Suggestion when a property reference cannot be resolved.
    pub const UNSET_PROPERTY: &str =
        "help: Define the property with `-D name=value` or set `unset_properties_allowed = true`";

    /// Suggestion when a task fails.
    pub const TASK_FAILED: &str = "help: Run `keel run --verbose` for more details";
}

/// A fatal error as shown to the user.
#[derive(Debug, Clone, Default)]
pub struct Diagnostic {
    pub message: String,
    /// Where in a build descriptor the failure happened
    pub location: Option<Location>,
    /// Underlying errors, outermost first
    pub causes: Vec<String>,
    pub suggestion: Option<&'static str>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            ..Diagnostic::default()
        }
    }

    /// Build the diagnostic for an error returned by a command.
    ///
    /// Build failures are rendered with their location and hint; anything
    /// else is shown with its cause chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        if let Some(execution) = error.downcast_ref::<ExecutionError>() {
            return execution.to_diagnostic();
        }
        error
            .chain()
            .skip(1)
            .fold(Diagnostic::error(error.to_string()), |diag, cause| {
                diag.with_cause(cause)
            })
    }

    /// Point at a descriptor location. Unknown locations are ignored.
    pub fn with_location(mut self, location: &Location) -> Self {
        if location.is_known() {
            self.location = Some(location.clone());
        }
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.causes.push(cause.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &'static str) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let (error, help) = if color {
            ("\x1b[1;31merror\x1b[0m", "\x1b[1;32mhelp\x1b[0m")
        } else {
            ("error", "help")
        };

        let mut output = format!("{}: {}\n", error, self.message);
        if let Some(location) = &self.location {
            output.push_str(&format!("  --> {}\n", location));
        }
        for cause in &self.causes {
            output.push_str(&format!("  = caused by: {}\n", cause));
        }
        if let Some(suggestion) = self.suggestion {
            let text = suggestion.strip_prefix("help: ").unwrap_or(suggestion);
            output.push_str(&format!("{}: {}\n", help, text));
        }
        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TargetGraphError;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("target `dist` does not exist")
            .with_location(&Location::at("Keel.toml", 12, 8))
            .with_cause("no such target")
            .with_suggestion(suggestions::TARGET_NOT_FOUND);

        assert_eq!(
            diag.format(false),
            "error: target `dist` does not exist\n\
             \x20 --> Keel.toml:12:8\n\
             \x20 = caused by: no such target\n\
             help: Run `keel targets` to see available targets\n"
        );
    }

    #[test]
    fn test_unknown_location_is_not_rendered() {
        let output = Diagnostic::error("boom")
            .with_location(&Location::unknown())
            .format(false);
        assert_eq!(output, "error: boom\n");
    }

    #[test]
    fn test_from_error_uses_execution_error_hint() {
        let err = anyhow::Error::from(ExecutionError::from(TargetGraphError::UnknownTarget {
            name: "nope".to_string(),
        }));
        let diag = Diagnostic::from_error(&err);
        assert_eq!(diag.suggestion, Some(suggestions::TARGET_NOT_FOUND));
    }

    #[test]
    fn test_from_error_keeps_cause_chain() {
        let err = anyhow::anyhow!("descriptor is empty").context("loading Keel.toml");
        let diag = Diagnostic::from_error(&err);
        assert_eq!(diag.message, "loading Keel.toml");
        assert_eq!(diag.causes, vec!["descriptor is empty".to_string()]);
        assert_eq!(diag.suggestion, None);
    }
}
