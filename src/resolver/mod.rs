//! Target graph resolution.
//!
//! Turns a requested target into the ordered list of targets to run.
//! Names may be qualified with a project path (`lib:util:compile`); the
//! path selects the referenced project that owns the target, and the
//! dependencies of a target are always resolved relative to its owner.
//!
//! Flattening is a depth-first walk over the declared dependency lists:
//! - dependencies expand in declared order
//! - a target already in the list is skipped, so each target appears once,
//!   at the position of its first required occurrence
//! - the requested target comes last
//!
//! A dependency chain that loops back on itself is reported with the
//! full chain.

use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::location::Location;
use crate::core::project::Project;
use crate::core::target::{split_qualified, REF_DELIMITER};
use crate::execution::error::ExecutionError;

/// Failures while computing or starting the target order.
#[derive(Debug, Clone, Error, MietteDiagnostic, PartialEq, Eq)]
pub enum TargetGraphError {
    #[error("target `{name}` does not exist")]
    #[diagnostic(code(keel::target::unknown))]
    UnknownTarget { name: String },

    #[error("no referenced project at `{path}`")]
    #[diagnostic(code(keel::target::unknown_project))]
    UnknownProject { path: String },

    #[error("circular target dependency: {}", chain.join(" -> "))]
    #[diagnostic(code(keel::target::cycle))]
    Cycle { chain: Vec<String> },

    #[error("target `{target}` in {} is already executing in an enclosing build", base_dir.display())]
    #[diagnostic(
        code(keel::target::recursive),
        help("a referenced project must not call back into a target that is running")
    )]
    RecursiveExecution { target: String, base_dir: PathBuf },

    #[error("no target requested and the project declares no default target")]
    #[diagnostic(code(keel::target::no_default))]
    NoDefaultTarget,
}

/// Qualify `name` with `path` unless the path is empty.
pub fn qualify(path: Option<&str>, name: &str) -> String {
    match path {
        Some(path) => format!("{}{}{}", path, REF_DELIMITER, name),
        None => name.to_string(),
    }
}

/// A tree of projects that qualified target names are looked up in.
pub trait TargetSource {
    /// Declared dependencies and location of target `name` in the project
    /// at `path` (`None` for the root).
    fn dependencies(
        &self,
        path: Option<&str>,
        name: &str,
    ) -> Result<(Vec<String>, Location), TargetGraphError>;
}

impl TargetSource for Project {
    fn dependencies(
        &self,
        path: Option<&str>,
        name: &str,
    ) -> Result<(Vec<String>, Location), TargetGraphError> {
        let owner = match path {
            Some(path) => self
                .project_at(path)
                .ok_or_else(|| TargetGraphError::UnknownProject {
                    path: path.to_string(),
                })?,
            None => self,
        };
        let target = owner
            .target(name)
            .ok_or_else(|| TargetGraphError::UnknownTarget {
                name: qualify(path, name),
            })?;
        Ok((target.depends.clone(), target.location.clone()))
    }
}

/// The targets to run for `target`, dependencies first, `target` last.
pub fn flatten<S: TargetSource + ?Sized>(
    source: &S,
    target: &str,
) -> Result<Vec<String>, ExecutionError> {
    let mut flattened = Vec::new();
    let mut visiting = Vec::new();
    flatten_into(source, target, &mut flattened, &mut visiting)?;
    if !flattened.iter().any(|t| t == target) {
        flattened.push(target.to_string());
    }
    tracing::debug!("execution order for {}: {:?}", target, flattened);
    Ok(flattened)
}

/// Flatten `target`, or the project's default target when none is given.
pub fn flatten_request(
    project: &Project,
    target: Option<&str>,
) -> Result<Vec<String>, ExecutionError> {
    match target.or(project.default_target.as_deref()) {
        Some(target) => flatten(project, target),
        None => Err(TargetGraphError::NoDefaultTarget.into()),
    }
}

fn flatten_into<S: TargetSource + ?Sized>(
    source: &S,
    name: &str,
    flattened: &mut Vec<String>,
    visiting: &mut Vec<String>,
) -> Result<(), ExecutionError> {
    if let Some(start) = visiting.iter().position(|v| v == name) {
        let mut chain = visiting[start..].to_vec();
        chain.push(name.to_string());
        return Err(TargetGraphError::Cycle { chain }.into());
    }

    let (path, local) = split_qualified(name);
    let (depends, location) = source.dependencies(path, local)?;

    visiting.push(name.to_string());
    for dependency in &depends {
        let qualified = qualify(path, dependency);
        if flattened.contains(&qualified) {
            continue;
        }
        flatten_into(source, &qualified, flattened, visiting)
            .map_err(|e| e.with_location(&location))?;
    }
    visiting.pop();

    flattened.push(name.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Target;
    use proptest::prelude::*;

    fn project(targets: &[(&str, &[&str])]) -> Project {
        targets.iter().fold(Project::new("test"), |p, (name, deps)| {
            let target = deps
                .iter()
                .fold(Target::new(*name), |t, dep| t.depends_on(*dep));
            p.with_target(target)
        })
    }

    #[test]
    fn test_diamond_flattens_once() {
        let p = project(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        assert_eq!(flatten(&p, "a").unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_declared_order_is_kept() {
        let p = project(&[
            ("all", &["z", "y", "x"]),
            ("x", &[]),
            ("y", &["x"]),
            ("z", &[]),
        ]);
        assert_eq!(flatten(&p, "all").unwrap(), vec!["z", "x", "y", "all"]);
    }

    #[test]
    fn test_unknown_dependency_carries_referencing_location() {
        let p = Project::new("test").with_target(
            Target::new("a")
                .depends_on("missing")
                .at(Location::at("Keel.toml", 3, 1)),
        );
        let err = flatten(&p, "a").unwrap_err();
        assert!(matches!(
            &err,
            ExecutionError::TargetGraph {
                error: TargetGraphError::UnknownTarget { name },
                ..
            } if name == "missing"
        ));
        assert_eq!(err.location(), Some(&Location::at("Keel.toml", 3, 1)));
    }

    #[test]
    fn test_cycle_reports_chain() {
        let p = project(&[("a", &["b"]), ("b", &["a"])]);
        match flatten(&p, "a").unwrap_err() {
            ExecutionError::TargetGraph {
                error: TargetGraphError::Cycle { chain },
                ..
            } => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_qualified_targets_resolve_in_owner() {
        let sub = project(&[("compile", &["init"]), ("init", &[])]);
        let p = Project::new("root")
            .with_reference("lib", sub)
            .with_target(Target::new("build").depends_on("lib:compile"));
        assert_eq!(
            flatten(&p, "build").unwrap(),
            vec!["lib:init", "lib:compile", "build"]
        );

        let err = flatten(&p, "nope:compile").unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::TargetGraph {
                error: TargetGraphError::UnknownProject { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_default_target() {
        let p = project(&[("a", &[])]);
        assert!(matches!(
            flatten_request(&p, None),
            Err(ExecutionError::TargetGraph {
                error: TargetGraphError::NoDefaultTarget,
                ..
            })
        ));
        let p = p.with_default("a");
        assert_eq!(flatten_request(&p, None).unwrap(), vec!["a"]);
    }

    proptest! {
        #[test]
        fn test_flatten_is_duplicate_free(edges in proptest::collection::vec((0usize..6, 0usize..6), 0..15)) {
            // Only edges from higher to lower indices, so the graph is acyclic.
            let names: Vec<String> = (0..6).map(|i| format!("t{i}")).collect();
            let mut p = Project::new("generated");
            for (i, name) in names.iter().enumerate() {
                let mut target = Target::new(name.as_str());
                for (from, to) in &edges {
                    if *from == i && to < from {
                        target = target.depends_on(names[*to].as_str());
                    }
                }
                p = p.with_target(target);
            }
            let order = flatten(&p, "t5").unwrap();
            let mut seen = std::collections::HashSet::new();
            prop_assert!(order.iter().all(|t| seen.insert(t.clone())));
            prop_assert_eq!(order.last().map(String::as_str), Some("t5"));
        }
    }
}
