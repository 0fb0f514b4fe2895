//! Configuration file support for Keel.
//!
//! Keel reads two configuration file locations:
//! - Global: `~/.keel/config.toml` - User-wide defaults
//! - Project: `.keel/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config.
//!
//! ```toml
//! [execution]
//! unset_properties_allowed = false
//! standard_library_prefix = "keel."
//!
//! [properties]
//! profile = "release"
//!
//! [[frame_tasks]]
//! element = "echo"
//! message = "entering ${keel.project.name}"
//!
//! [[global_tasks]]
//! element = "property"
//! name = "started"
//! value = "yes"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Table;

use crate::core::element::BuildElement;
use crate::core::location::Location;
use crate::core::manifest::{convert_element, DescriptorError};
use crate::execution::frame::FrameSettings;

/// Default prefix of the libraries imported into every frame.
pub const DEFAULT_STANDARD_LIBRARY_PREFIX: &str = "keel.";

/// Keel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Execution settings
    pub execution: ExecutionConfig,

    /// Initial user properties
    pub properties: BTreeMap<String, String>,

    /// Tasks run in every frame before the project's own tasks
    pub frame_tasks: Vec<Table>,

    /// Tasks run once in the root frame before the build
    pub global_tasks: Vec<Table>,

    /// File the configuration was read from
    #[serde(skip)]
    source: Option<PathBuf>,
}

/// Execution-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Leave `${name}` as written when `name` is unset (default: true)
    pub unset_properties_allowed: Option<bool>,

    /// Libraries whose id starts with this prefix are always imported
    pub standard_library_prefix: Option<String>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    ///
    /// Properties are merged by name; task lists are appended so global
    /// tasks run before project tasks.
    pub fn merge(&mut self, other: Config) {
        if other.execution.unset_properties_allowed.is_some() {
            self.execution.unset_properties_allowed = other.execution.unset_properties_allowed;
        }
        if other.execution.standard_library_prefix.is_some() {
            self.execution.standard_library_prefix = other.execution.standard_library_prefix;
        }

        self.properties.extend(other.properties);
        self.frame_tasks.extend(other.frame_tasks);
        self.global_tasks.extend(other.global_tasks);

        if other.source.is_some() {
            self.source = other.source;
        }
    }

    /// Whether references to unset properties are left as written.
    pub fn unset_properties_allowed(&self) -> bool {
        self.execution.unset_properties_allowed.unwrap_or(true)
    }

    /// Prefix of the standard libraries.
    pub fn standard_library_prefix(&self) -> &str {
        self.execution
            .standard_library_prefix
            .as_deref()
            .unwrap_or(DEFAULT_STANDARD_LIBRARY_PREFIX)
    }

    /// Convert into the settings shared by a tree of frames.
    pub fn to_settings(&self) -> Result<FrameSettings, DescriptorError> {
        let location = self
            .source
            .as_deref()
            .map(Location::file)
            .unwrap_or_default();
        Ok(FrameSettings {
            unset_properties_allowed: self.unset_properties_allowed(),
            standard_library_prefix: self.standard_library_prefix().to_string(),
            frame_tasks: convert_all(&self.frame_tasks, &location)?,
            global_tasks: convert_all(&self.global_tasks, &location)?,
        })
    }
}

fn convert_all(tables: &[Table], location: &Location) -> Result<Vec<BuildElement>, DescriptorError> {
    tables
        .iter()
        .map(|table| convert_element(table.clone(), location))
        .collect()
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.keel/config.toml)
/// 2. Global config (~/.keel/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    // Load global config first
    if global_path.exists() {
        let global = Config::load_or_default(global_path);
        config.merge(global);
    }

    // Project config overrides global
    if project_path.exists() {
        let project = Config::load_or_default(project_path);
        config.merge(project);
    }

    config
}

/// Get the global keel config directory (~/.keel).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".keel"))
}

/// Get the global config path (~/.keel/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.keel/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".keel").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.unset_properties_allowed());
        assert_eq!(config.standard_library_prefix(), "keel.");
        assert!(config.properties.is_empty());

        let settings = config.to_settings().unwrap();
        assert!(settings.unset_properties_allowed);
        assert!(settings.frame_tasks.is_empty());
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[execution]
unset_properties_allowed = false

[properties]
profile = "release"

[[frame_tasks]]
element = "echo"
message = "hello"
"keel:failonerror" = "false"
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert!(!config.unset_properties_allowed());
        assert_eq!(config.properties["profile"], "release");

        let settings = config.to_settings().unwrap();
        let echo = &settings.frame_tasks[0];
        assert_eq!(echo.kind, "echo");
        assert_eq!(echo.attribute("message"), Some("hello"));
        assert_eq!(echo.keel_aspect("failonerror"), Some("false"));
        assert_eq!(echo.location.file.as_deref(), Some(config_path.as_path()));
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.execution.standard_library_prefix = Some("acme.".to_string());
        base.properties.insert("a".into(), "global".into());
        base.properties.insert("b".into(), "global".into());

        let mut override_cfg = Config::default();
        override_cfg.execution.unset_properties_allowed = Some(false);
        override_cfg.properties.insert("a".into(), "project".into());

        base.merge(override_cfg);

        assert!(!base.unset_properties_allowed());
        assert_eq!(base.standard_library_prefix(), "acme."); // Not overridden
        assert_eq!(base.properties["a"], "project");
        assert_eq!(base.properties["b"], "global");
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = project_config_path(tmp.path());
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();

        std::fs::write(&global, "[properties]\nwho = \"global\"\n").unwrap();
        std::fs::write(&project, "[properties]\nwho = \"project\"\n").unwrap();

        let config = load_config(&global, &project);
        assert_eq!(config.properties["who"], "project");
    }

    #[test]
    fn test_load_or_default_on_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[execution\nbroken").unwrap();

        let config = Config::load_or_default(&path);
        assert!(config.unset_properties_allowed());
    }

    #[test]
    fn test_task_without_element_is_rejected() {
        let config: Config = toml::from_str("[[global_tasks]]\nname = \"x\"\n").unwrap();
        assert!(matches!(
            config.to_settings(),
            Err(DescriptorError::InvalidElement { .. })
        ));
    }
}
