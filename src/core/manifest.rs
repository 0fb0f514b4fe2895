//! Keel.toml build descriptor loading.
//!
//! The descriptor is a thin TOML rendition of the project model:
//!
//! ```toml
//! name = "demo"
//! default = "build"
//!
//! [refs]
//! lib = "lib/Keel.toml"
//!
//! [[task]]
//! element = "property"
//! name = "greeting"
//! value = "hello"
//!
//! [[target]]
//! name = "build"
//! depends = ["lib:jar"]
//!
//! [[target.task]]
//! element = "echo"
//! message = "${greeting} from ${keel.project.name}"
//! ```
//!
//! Every task table needs an `element` key; `text` and `nested` are
//! reserved for text content and nested elements, every other key is an
//! attribute. Keys of the form `ns:name` (quoted in TOML) become aspect
//! values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use miette::Diagnostic as MietteDiagnostic;
use serde::Deserialize;
use thiserror::Error;
use toml::{Spanned, Table, Value};

use crate::core::element::BuildElement;
use crate::core::location::Location;
use crate::core::project::{ModelError, Project};
use crate::core::target::Target;

/// Canonical descriptor file name.
pub const DESCRIPTOR_NAME: &str = "Keel.toml";

/// Errors raised while loading a descriptor.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum DescriptorError {
    #[error("failed to read build descriptor {}", path.display())]
    #[diagnostic(code(keel::descriptor::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse build descriptor {}", path.display())]
    #[diagnostic(code(keel::descriptor::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid element at {location}: {message}")]
    #[diagnostic(code(keel::descriptor::element))]
    InvalidElement { message: String, location: Location },

    #[error("{} references itself through `{name}`", path.display())]
    #[diagnostic(code(keel::descriptor::recursive_reference))]
    RecursiveReference { path: PathBuf, name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    default: Option<String>,
    basedir: Option<PathBuf>,
    #[serde(default)]
    refs: BTreeMap<String, PathBuf>,
    #[serde(default)]
    task: Vec<Table>,
    #[serde(default)]
    target: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    name: Spanned<String>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(rename = "if")]
    if_condition: Option<String>,
    unless: Option<String>,
    description: Option<String>,
    #[serde(default)]
    task: Vec<Table>,
}

/// Load a descriptor and every project it references, then validate the model.
pub fn load_project(path: &Path) -> Result<Project, DescriptorError> {
    let mut loading = Vec::new();
    let project = load_inner(path, &mut loading)?;
    project.validate()?;
    Ok(project)
}

/// Parse descriptor content. References are resolved relative to `path`.
pub fn parse_project(content: &str, path: &Path) -> Result<Project, DescriptorError> {
    let mut loading = vec![normalize(path)];
    let project = parse_inner(content, path, &mut loading)?;
    project.validate()?;
    Ok(project)
}

fn load_inner(path: &Path, loading: &mut Vec<PathBuf>) -> Result<Project, DescriptorError> {
    let content = std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    loading.push(normalize(path));
    let project = parse_inner(&content, path, loading);
    loading.pop();
    project
}

fn parse_inner(
    content: &str,
    path: &Path,
    loading: &mut Vec<PathBuf>,
) -> Result<Project, DescriptorError> {
    let raw: RawDescriptor = toml::from_str(content).map_err(|source| DescriptorError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut project = Project {
        name: raw.name,
        default_target: raw.default,
        base: raw.basedir,
        source: Some(path.to_path_buf()),
        location: Location::file(path),
        ..Default::default()
    };

    for table in raw.task {
        project
            .tasks
            .push(convert_element(table, &Location::file(path))?);
    }

    for raw_target in raw.target {
        let location = Location::from_offset(path, content, raw_target.name.span().start);
        let mut target = Target::new(raw_target.name.into_inner()).at(location.clone());
        target.depends = raw_target.depends;
        target.if_condition = raw_target.if_condition;
        target.unless_condition = raw_target.unless;
        target.description = raw_target.description;
        for table in raw_target.task {
            target.tasks.push(convert_element(table, &location)?);
        }
        project.add_target(target)?;
    }

    for (name, relative) in raw.refs {
        let ref_path = dir.join(&relative);
        if loading.contains(&normalize(&ref_path)) {
            return Err(DescriptorError::RecursiveReference {
                path: path.to_path_buf(),
                name,
            });
        }
        tracing::debug!("loading referenced project `{}` from {}", name, ref_path.display());
        let referenced = load_inner(&ref_path, loading)?;
        project.add_reference(name, referenced)?;
    }

    Ok(project)
}

/// Convert one task table into a [`BuildElement`].
pub(crate) fn convert_element(mut table: Table, location: &Location) -> Result<BuildElement, DescriptorError> {
    let invalid = |message: String| DescriptorError::InvalidElement {
        message,
        location: location.clone(),
    };

    let kind = match table.remove("element") {
        Some(Value::String(kind)) => kind,
        Some(other) => {
            return Err(invalid(format!(
                "`element` must be a string, found {}",
                other.type_str()
            )))
        }
        None => return Err(invalid("missing `element` key".to_string())),
    };

    let mut element = BuildElement::new(kind).at(location.clone());

    match table.remove("text") {
        Some(Value::String(text)) => element.text = text,
        Some(other) => {
            return Err(invalid(format!(
                "`text` of `{}` must be a string, found {}",
                element.kind,
                other.type_str()
            )))
        }
        None => {}
    }

    match table.remove("nested") {
        Some(Value::Array(children)) => {
            for child in children {
                match child {
                    Value::Table(child) => element.children.push(convert_element(child, location)?),
                    other => {
                        return Err(invalid(format!(
                            "nested elements of `{}` must be tables, found {}",
                            element.kind,
                            other.type_str()
                        )))
                    }
                }
            }
        }
        Some(other) => {
            return Err(invalid(format!(
                "`nested` of `{}` must be an array of tables, found {}",
                element.kind,
                other.type_str()
            )))
        }
        None => {}
    }

    for (key, value) in table {
        let text = match value {
            Value::String(s) => s,
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Datetime(d) => d.to_string(),
            other => {
                return Err(invalid(format!(
                    "attribute `{}` of `{}` must be a scalar, found {}",
                    key,
                    element.kind,
                    other.type_str()
                )))
            }
        };
        element.set_attribute(key, text);
    }

    Ok(element)
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
