//! Source locations attached to model elements and errors.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A position in a build descriptor.
///
/// Locations are carried by every model element so that failures can point
/// back at the text that caused them. A location without a file is
/// "unknown" and is never preferred over a known one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Descriptor file, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// 1-based line number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based column number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Location {
    /// A location that points nowhere.
    pub fn unknown() -> Self {
        Location::default()
    }

    /// A location naming only a file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Location {
            file: Some(path.into()),
            line: None,
            column: None,
        }
    }

    /// A location naming a file and a line/column pair.
    pub fn at(path: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Location {
            file: Some(path.into()),
            line: Some(line),
            column: Some(column),
        }
    }

    /// Compute the line/column of a byte offset within `source`.
    pub fn from_offset(path: &Path, source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let prefix = &source[..offset];
        let line = prefix.matches('\n').count() as u32 + 1;
        let column = match prefix.rfind('\n') {
            Some(nl) => (offset - nl) as u32,
            None => offset as u32 + 1,
        };
        Location::at(path, line, column)
    }

    /// Whether this location carries any information.
    pub fn is_known(&self) -> bool {
        self.file.is_some() || self.line.is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => {
                write!(f, "{}:{}:{}", file.display(), line, column)
            }
            (Some(file), Some(line), None) => write!(f, "{}:{}", file.display(), line),
            (Some(file), None, _) => write!(f, "{}", file.display()),
            (None, Some(line), _) => write!(f, "line {}", line),
            (None, None, _) => write!(f, "<unknown location>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Location::at("Keel.toml", 3, 7).to_string(), "Keel.toml:3:7");
        assert_eq!(Location::file("Keel.toml").to_string(), "Keel.toml");
        assert_eq!(Location::unknown().to_string(), "<unknown location>");
    }

    #[test]
    fn test_from_offset() {
        let source = "name = \"demo\"\n[[target]]\nname = \"build\"\n";
        let offset = source.find("build").unwrap();
        let loc = Location::from_offset(Path::new("Keel.toml"), source, offset);
        assert_eq!(loc.line, Some(3));
        assert_eq!(loc.column, Some(9));
    }

    #[test]
    fn test_is_known() {
        assert!(!Location::unknown().is_known());
        assert!(Location::file("a").is_known());
    }
}
