//! Global context for Keel operations.
//!
//! Provides centralized access to configuration, paths, and environment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::core::manifest::DESCRIPTOR_NAME;
use crate::util::config::{self, Config};
use crate::util::diagnostic::suggestions;

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global Keel data (~/.keel/)
    home: PathBuf,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext with defaults.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        let home = config::global_config_dir().unwrap_or_else(|| PathBuf::from(".keel"));

        Ok(GlobalContext {
            cwd,
            home,
            verbose: false,
            color: true,
        })
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    /// Use a different home directory (tests, sandboxed runs).
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the Keel home directory (~/.keel/).
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the global configuration file path.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Get the project configuration file path for a project rooted at `root`.
    pub fn project_config_path(&self, root: &Path) -> PathBuf {
        config::project_config_path(root)
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Resolve the build descriptor to use.
    ///
    /// An explicit path is taken relative to the working directory; otherwise
    /// `Keel.toml` is searched from the working directory upward.
    pub fn find_descriptor(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            let path = self.cwd.join(path);
            if !path.is_file() {
                bail!("build descriptor not found: {}", path.display());
            }
            return Ok(path);
        }

        let mut current = self.cwd.clone();
        loop {
            let candidate = current.join(DESCRIPTOR_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if !current.pop() {
                bail!(
                    "could not find `{}` in {} or any parent directory\n{}",
                    DESCRIPTOR_NAME,
                    self.cwd.display(),
                    suggestions::NO_DESCRIPTOR
                );
            }
        }
    }

    /// Load the merged global and project configuration for a project root.
    pub fn load_config(&self, project_root: &Path) -> Config {
        config::load_config(&self.config_path(), &self.project_config_path(project_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_paths() {
        let ctx = GlobalContext::new().unwrap();
        assert!(ctx.cwd().is_absolute());
        assert!(ctx.home().to_string_lossy().contains("keel"));
        assert!(ctx.config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_find_descriptor_searches_upward() {
        let tmp = TempDir::new().unwrap();
        let descriptor = tmp.path().join(DESCRIPTOR_NAME);
        std::fs::write(&descriptor, "name = \"test\"\n").unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = GlobalContext::with_cwd(nested).unwrap();
        assert_eq!(ctx.find_descriptor(None).unwrap(), descriptor);
    }

    #[test]
    fn test_find_descriptor_explicit_missing() {
        let tmp = TempDir::new().unwrap();
        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert!(ctx.find_descriptor(Some(Path::new("other.toml"))).is_err());
    }

    #[test]
    fn test_load_config_uses_home() {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("config.toml"), "[properties]\nfrom = \"home\"\n").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf())
            .unwrap()
            .with_home(home);
        let config = ctx.load_config(tmp.path());
        assert_eq!(config.properties["from"], "home");
    }
}
