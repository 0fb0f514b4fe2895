//! Implementation of `keel targets`.

use serde::Serialize;

use crate::core::project::Project;
use crate::execution::error::ExecutionError;
use crate::resolver::{flatten_request, qualify};

/// One listed target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetInfo {
    /// Name, qualified with the reference path for referenced projects
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub depends: Vec<String>,
    pub is_default: bool,
}

/// List the targets of `project` and, recursively, of every project it
/// references. Referenced targets are qualified (`lib:jar`).
pub fn list_targets(project: &Project) -> Vec<TargetInfo> {
    let mut targets = Vec::new();
    collect(project, None, &mut targets);
    targets
}

fn collect(project: &Project, path: Option<&str>, out: &mut Vec<TargetInfo>) {
    for target in project.targets() {
        out.push(TargetInfo {
            name: qualify(path, &target.name),
            description: target.description.clone(),
            depends: target.depends.clone(),
            is_default: path.is_none()
                && project.default_target.as_deref() == Some(target.name.as_str()),
        });
    }
    for (name, referenced) in project.references() {
        let nested = qualify(path, name);
        collect(referenced, Some(&nested), out);
    }
}

/// The order in which `target` (or the default target) would run.
pub fn execution_order(
    project: &Project,
    target: Option<&str>,
) -> Result<Vec<String>, ExecutionError> {
    flatten_request(project, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Target;

    fn project() -> Project {
        let lib = Project::new("lib").with_target(Target::new("jar"));
        let mut compile = Target::new("compile");
        compile.description = Some("Compile sources".to_string());
        Project::new("app")
            .with_default("build")
            .with_target(compile)
            .with_target(Target::new("build").depends_on("compile").depends_on("lib:jar"))
            .with_reference("lib", lib)
    }

    #[test]
    fn test_list_targets_qualifies_references() {
        let targets = list_targets(&project());
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["compile", "build", "lib:jar"]);
        assert!(targets[1].is_default);
        assert_eq!(targets[0].description.as_deref(), Some("Compile sources"));
    }

    #[test]
    fn test_execution_order_uses_default() {
        let order = execution_order(&project(), None).unwrap();
        assert_eq!(order, vec!["compile", "lib:jar", "build"]);
    }
}
