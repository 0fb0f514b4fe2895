//! The project model: targets, top-level tasks and referenced projects.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic as MietteDiagnostic;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::core::element::BuildElement;
use crate::core::location::Location;
use crate::core::target::{split_qualified, Target, REF_DELIMITER};

/// Errors found while assembling or validating a project model.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ModelError {
    #[error("a target named `{name}` already exists in this project")]
    #[diagnostic(code(keel::model::duplicate_target))]
    DuplicateTarget { name: String, location: Location },

    #[error("a project has already been referenced as `{name}`")]
    #[diagnostic(code(keel::model::duplicate_reference))]
    DuplicateReference { name: String, location: Location },

    #[error("default target `{name}` does not exist in this project")]
    #[diagnostic(
        code(keel::model::unknown_default),
        help("declare the target or change the project's `default`")
    )]
    UnknownDefault { name: String, location: Location },

    #[error("target `{dependency}` (required by `{target}`) does not exist in this project")]
    #[diagnostic(code(keel::model::unknown_dependency))]
    UnknownDependency {
        target: String,
        dependency: String,
        location: Location,
    },

    #[error("circular dependency between targets: {}", chain.join(" -> "))]
    #[diagnostic(code(keel::model::circular_dependency))]
    CircularDependency { chain: Vec<String>, location: Location },
}

impl ModelError {
    /// Where the offending definition was declared.
    pub fn location(&self) -> &Location {
        match self {
            ModelError::DuplicateTarget { location, .. }
            | ModelError::DuplicateReference { location, .. }
            | ModelError::UnknownDefault { location, .. }
            | ModelError::UnknownDependency { location, .. }
            | ModelError::CircularDependency { location, .. } => location,
        }
    }
}

/// A loaded project.
///
/// Projects are immutable once built and are shared between frames through
/// an `Arc`. Referenced projects become child frames reachable through
/// `name:` qualified references.
#[derive(Debug, Clone, Default)]
pub struct Project {
    /// Project name
    pub name: Option<String>,
    /// Target run when no target is requested
    pub default_target: Option<String>,
    /// Declared base directory, relative to the descriptor's directory
    pub base: Option<PathBuf>,
    /// Tasks run at the start of every build, before any target
    pub tasks: Vec<BuildElement>,
    /// Descriptor this project was loaded from
    pub source: Option<PathBuf>,
    pub location: Location,
    pub(crate) targets: Vec<Target>,
    pub(crate) references: BTreeMap<String, Arc<Project>>,
}

impl Project {
    /// Create an empty project.
    pub fn new(name: impl Into<String>) -> Self {
        Project {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Set the default target.
    pub fn with_default(mut self, target: impl Into<String>) -> Self {
        self.default_target = Some(target.into());
        self
    }

    /// Set the declared base directory.
    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Set the descriptor path.
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append a top-level task.
    pub fn with_task(mut self, task: BuildElement) -> Self {
        self.tasks.push(task);
        self
    }

    /// Append a target without checking for duplicates; `validate` reports them.
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Reference another project, replacing any earlier reference of that name.
    pub fn with_reference(mut self, name: impl Into<String>, project: Project) -> Self {
        self.references.insert(name.into(), Arc::new(project));
        self
    }

    /// Add a target. Target names are unique within a project.
    pub fn add_target(&mut self, target: Target) -> Result<(), ModelError> {
        if self.target(&target.name).is_some() {
            return Err(ModelError::DuplicateTarget {
                name: target.name.clone(),
                location: target.location.clone(),
            });
        }
        self.targets.push(target);
        Ok(())
    }

    /// Reference a project under `name`.
    pub fn add_reference(
        &mut self,
        name: impl Into<String>,
        project: Project,
    ) -> Result<(), ModelError> {
        let name = name.into();
        if self.references.contains_key(&name) {
            return Err(ModelError::DuplicateReference {
                name,
                location: project.location.clone(),
            });
        }
        self.references.insert(name, Arc::new(project));
        Ok(())
    }

    /// Targets in declared order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Look up a local target.
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Referenced projects by name.
    pub fn references(&self) -> &BTreeMap<String, Arc<Project>> {
        &self.references
    }

    /// Look up a directly referenced project.
    pub fn reference(&self, name: &str) -> Option<&Arc<Project>> {
        self.references.get(name)
    }

    /// Follow a `a:b:c` reference path through referenced projects.
    pub fn project_at(&self, path: &str) -> Option<&Project> {
        let mut project = self;
        for segment in path.split(REF_DELIMITER) {
            project = project.references.get(segment)?;
        }
        Some(project)
    }

    /// Look up a possibly qualified target through referenced projects.
    pub fn qualified_target(&self, name: &str) -> Option<&Target> {
        match split_qualified(name) {
            (None, local) => self.target(local),
            (Some(path), local) => self.project_at(path)?.target(local),
        }
    }

    /// Directory containing the descriptor, if known.
    pub fn source_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }

    /// Check the model for dangling dependencies and cycles.
    ///
    /// Referenced projects are validated first. Every local dependency must
    /// name a local target and every qualified dependency must resolve
    /// through the reference tree.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.validate_named(None)
    }

    fn validate_named(&self, global_name: Option<&str>) -> Result<(), ModelError> {
        for (ref_name, project) in &self.references {
            let qualified = qualify(global_name, ref_name);
            project.validate_named(Some(&qualified))?;
        }

        if let Some(default) = &self.default_target {
            if self.target(default).is_none() {
                return Err(ModelError::UnknownDefault {
                    name: qualify(global_name, default),
                    location: self.location.clone(),
                });
            }
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for target in &self.targets {
            if nodes.contains_key(target.name.as_str()) {
                return Err(ModelError::DuplicateTarget {
                    name: qualify(global_name, &target.name),
                    location: target.location.clone(),
                });
            }
            nodes.insert(target.name.as_str(), graph.add_node(target.name.as_str()));
        }

        for target in &self.targets {
            for dependency in &target.depends {
                if self.qualified_target(dependency).is_none() {
                    return Err(ModelError::UnknownDependency {
                        target: qualify(global_name, &target.name),
                        dependency: qualify(global_name, dependency),
                        location: target.location.clone(),
                    });
                }
                if let Some(&to) = nodes.get(dependency.as_str()) {
                    graph.add_edge(nodes[target.name.as_str()], to, ());
                }
            }
        }

        for component in tarjan_scc(&graph) {
            let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
            if component.len() > 1 || self_loop {
                let mut chain: Vec<String> = component
                    .iter()
                    .rev()
                    .map(|&n| qualify(global_name, graph[n]))
                    .collect();
                chain.push(chain[0].clone());
                let location = self
                    .target(graph[component[component.len() - 1]])
                    .map(|t| t.location.clone())
                    .unwrap_or_default();
                return Err(ModelError::CircularDependency { chain, location });
            }
        }

        Ok(())
    }
}

fn qualify(global_name: Option<&str>, name: &str) -> String {
    match global_name {
        Some(prefix) => format!("{}{}{}", prefix, REF_DELIMITER, name),
        None => name.to_string(),
    }
}
