//! Implementation of `keel run`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::manifest::load_project;
use crate::core::project::Project;
use crate::execution::events::BuildListener;
use crate::execution::frame::{Frame, FrameServices};
use crate::property::{Priority, PropertyStore};
use crate::stdlib;
use crate::util::{Config, GlobalContext};

/// Options for the run command.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Explicit build descriptor (default: search for `Keel.toml`)
    pub descriptor: Option<PathBuf>,

    /// Targets to run in order (empty = default target)
    pub targets: Vec<String>,

    /// `-D name=value` definitions, applied after config properties
    pub properties: Vec<(String, String)>,

    /// Listeners attached to the root frame before the build starts
    pub listeners: Vec<Arc<dyn BuildListener>>,
}

/// A loaded project together with its configuration.
#[derive(Debug)]
pub struct LoadedProject {
    pub descriptor: PathBuf,
    pub project: Project,
    pub config: Config,
}

impl LoadedProject {
    /// Directory holding the descriptor.
    pub fn root(&self) -> &Path {
        self.descriptor.parent().unwrap_or(Path::new("."))
    }
}

/// Find and load the descriptor plus the merged configuration.
pub fn load(gctx: &GlobalContext, descriptor: Option<&Path>) -> Result<LoadedProject> {
    let descriptor = gctx.find_descriptor(descriptor)?;
    tracing::debug!("loading build descriptor {}", descriptor.display());
    let project = load_project(&descriptor)?;
    let root = descriptor.parent().unwrap_or(Path::new("."));
    let config = gctx.load_config(root);
    Ok(LoadedProject {
        descriptor,
        project,
        config,
    })
}

/// Initial user properties: configuration first, then command-line definitions.
pub fn initial_properties(config: &Config, defines: &[(String, String)]) -> PropertyStore {
    let mut store = PropertyStore::new();
    store.extend(config.properties.clone(), Priority::User);
    for (name, value) in defines {
        store.set(name.clone(), value.clone(), Priority::User, true);
    }
    store
}

/// Create and initialize the root frame for a loaded project.
pub fn root_frame(loaded: LoadedProject, defines: &[(String, String)]) -> Result<Arc<Frame>> {
    let settings = loaded
        .config
        .to_settings()
        .context("invalid task in configuration")?;
    let services = FrameServices::new(stdlib::library_manager()?, settings);
    let properties = initial_properties(&loaded.config, defines);

    let frame = Frame::root(Arc::new(loaded.project), services);
    frame.initialize(properties)?;
    Ok(frame)
}

/// Run a build.
///
/// A failed build is returned as an [`ExecutionError`](crate::ExecutionError)
/// inside the `anyhow` error after listeners have seen it.
pub fn run(gctx: &GlobalContext, opts: RunOptions) -> Result<()> {
    let loaded = load(gctx, opts.descriptor.as_deref())?;
    let frame = root_frame(loaded, &opts.properties)?;
    for listener in opts.listeners {
        frame.add_build_listener(listener);
    }

    tracing::info!(
        "running {} in {}",
        if opts.targets.is_empty() {
            "default target".to_string()
        } else {
            opts.targets.join(", ")
        },
        frame.base_dir().display()
    );
    frame.start_build(&opts.targets)?;
    Ok(())
}

/// Parse a `name=value` definition.
pub fn parse_define(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("`{}` is not of the form name=value", text)),
    }
}
