//! Frames: the execution context of one project.
//!
//! A frame owns the property scope, the component registry view and the
//! event bus of one project, plus the child frames of the projects it
//! references. Children are reachable through `name:` qualified names and
//! only hold a weak link back to their parent.
//!
//! Lifecycle:
//! - `Uninitialized`: created, no base directory yet
//! - `Initialized`: base directory and built-in properties set
//! - `Running`: inside [`Frame::run_build`]
//! - `Idle`: a build finished; another may start
//!
//! Sub-builds always run in new child frames; a frame never re-enters
//! `run_build`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::component::binder::CapabilityBinder;
use crate::component::library::{ImportError, LibraryManager};
use crate::component::registry::ComponentRegistry;
use crate::core::element::BuildElement;
use crate::core::location::Location;
use crate::core::project::Project;
use crate::core::target::{split_qualified, Target, REF_DELIMITER};
use crate::execution::aspects::AspectChain;
use crate::execution::configure::Created;
use crate::execution::error::{ConfigError, ExecutionError};
use crate::execution::events::{BuildListener, ElementRef, EventBus, MessageLevel};
use crate::execution::task::Task;
use crate::property::{
    DataValue, Lookup, Priority, PropertyResolver, PropertySource, PropertyStore, Value,
};
use crate::resolver::{self, TargetGraphError, TargetSource};

/// Property holding the frame's base directory.
pub const BASEDIR_PROPERTY: &str = "basedir";
/// Property holding the descriptor path, when known.
pub const FILE_PROPERTY: &str = "keel.file";
/// Property holding the project name, when known.
pub const PROJECT_NAME_PROPERTY: &str = "keel.project.name";

/// Engine settings shared by every frame of a build.
#[derive(Debug, Clone)]
pub struct FrameSettings {
    /// Leave references to unset properties as written instead of failing
    pub unset_properties_allowed: bool,
    /// Libraries whose id starts with this prefix are imported into every frame
    pub standard_library_prefix: String,
    /// Tasks run in every frame before the project's own tasks
    pub frame_tasks: Vec<BuildElement>,
    /// Tasks run once in the root frame before the build
    pub global_tasks: Vec<BuildElement>,
}

impl Default for FrameSettings {
    fn default() -> Self {
        FrameSettings {
            unset_properties_allowed: true,
            standard_library_prefix: "keel.".to_string(),
            frame_tasks: Vec::new(),
            global_tasks: Vec::new(),
        }
    }
}

/// Services shared by a tree of frames.
#[derive(Clone)]
pub struct FrameServices {
    pub libraries: Arc<LibraryManager>,
    pub binder: Arc<CapabilityBinder>,
    pub resolver: Arc<PropertyResolver>,
    pub settings: Arc<FrameSettings>,
}

impl FrameServices {
    pub fn new(libraries: LibraryManager, settings: FrameSettings) -> Self {
        FrameServices {
            libraries: Arc::new(libraries),
            binder: Arc::new(CapabilityBinder::new()),
            resolver: Arc::new(PropertyResolver::new()),
            settings: Arc::new(settings),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Uninitialized,
    Initialized,
    Running,
    Idle,
}

impl FrameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameState::Uninitialized => "uninitialized",
            FrameState::Initialized => "initialized",
            FrameState::Running => "running",
            FrameState::Idle => "idle",
        }
    }
}

pub struct Frame {
    name: Option<String>,
    this: Weak<Frame>,
    parent: Weak<Frame>,
    project: Arc<Project>,
    services: FrameServices,
    pub(crate) registry: ComponentRegistry,
    events: EventBus,
    properties: RwLock<PropertyStore>,
    overrides: Mutex<BTreeMap<String, PropertyStore>>,
    children: RwLock<BTreeMap<String, Arc<Frame>>>,
    current_target: Mutex<Option<String>>,
    base_dir: RwLock<PathBuf>,
    state: Mutex<FrameState>,
    standard_imported: AtomicBool,
}

impl Frame {
    /// Create the root frame of a build.
    pub fn root(project: Arc<Project>, services: FrameServices) -> Arc<Frame> {
        Self::create(None, Weak::new(), project, services, Vec::new())
    }

    fn create(
        name: Option<String>,
        parent: Weak<Frame>,
        project: Arc<Project>,
        services: FrameServices,
        listeners: Vec<Arc<dyn BuildListener>>,
    ) -> Arc<Frame> {
        let events = EventBus::new();
        for listener in listeners {
            events.add_listener(listener);
        }
        Arc::new_cyclic(|this| Frame {
            name,
            this: this.clone(),
            parent,
            registry: ComponentRegistry::new(Arc::clone(&services.libraries)),
            project,
            services,
            events,
            properties: RwLock::new(PropertyStore::new()),
            overrides: Mutex::new(BTreeMap::new()),
            children: RwLock::new(BTreeMap::new()),
            current_target: Mutex::new(None),
            base_dir: RwLock::new(PathBuf::from(".")),
            state: Mutex::new(FrameState::Uninitialized),
            standard_imported: AtomicBool::new(false),
        })
    }

    /// A child frame sharing this frame's services and listeners.
    fn create_child(&self, name: Option<&str>, project: Arc<Project>) -> Arc<Frame> {
        tracing::debug!(
            "creating frame {} for project {}",
            name.unwrap_or("<sub-build>"),
            project.name.as_deref().unwrap_or("<unnamed>")
        );
        Self::create(
            name.map(str::to_string),
            self.this.clone(),
            project,
            self.services.clone(),
            self.events.listeners(),
        )
    }

    /// Name under which the parent references this frame.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn parent(&self) -> Option<Arc<Frame>> {
        self.parent.upgrade()
    }

    pub fn child(&self, name: &str) -> Option<Arc<Frame>> {
        read(&self.children).get(name).cloned()
    }

    pub fn child_names(&self) -> Vec<String> {
        read(&self.children).keys().cloned().collect()
    }

    /// Follow an `a:b` path through the child frames.
    pub fn frame_at(&self, path: &str) -> Option<Arc<Frame>> {
        let mut segments = path.split(REF_DELIMITER);
        let mut frame = self.child(segments.next()?)?;
        for segment in segments {
            frame = frame.child(segment)?;
        }
        Some(frame)
    }

    pub fn services(&self) -> &FrameServices {
        &self.services
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> FrameState {
        *lock(&self.state)
    }

    pub fn base_dir(&self) -> PathBuf {
        read(&self.base_dir).clone()
    }

    pub fn current_target(&self) -> Option<String> {
        lock(&self.current_target).clone()
    }

    pub(crate) fn weak(&self) -> Weak<Frame> {
        self.this.clone()
    }

    fn describe(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.project.name.clone())
            .unwrap_or_else(|| "<root>".to_string())
    }

    pub(crate) fn element_ref(&self, name: &str, location: &Location) -> ElementRef {
        ElementRef::new(name, self.project.name.as_deref(), location)
    }

    /// Log a build message from the engine itself.
    pub fn log(&self, level: MessageLevel, message: impl Into<String>) {
        self.events.message_logged(None, message, level);
    }

    // Listeners

    /// Add a listener to this frame and every frame below it.
    pub fn add_build_listener(&self, listener: Arc<dyn BuildListener>) {
        self.events.add_listener(Arc::clone(&listener));
        for child in read(&self.children).values() {
            child.add_build_listener(Arc::clone(&listener));
        }
    }

    pub fn remove_build_listener(&self, listener: &Arc<dyn BuildListener>) {
        self.events.remove_listener(listener);
        for child in read(&self.children).values() {
            child.remove_build_listener(listener);
        }
    }

    // Properties

    /// Apply `properties`, then on first call set the base directory and
    /// the built-in properties.
    pub fn initialize(&self, properties: PropertyStore) -> Result<(), ExecutionError> {
        for (name, value) in properties.iter() {
            self.set_data_value(name, value.clone(), true)?;
        }

        let mut state = lock(&self.state);
        if *state != FrameState::Uninitialized {
            return Ok(());
        }

        let base_dir = self.determine_base_dir();
        self.set_base_dir(&base_dir)?;
        {
            let mut store = write(&self.properties);
            if let Some(source) = &self.project.source {
                store.set(FILE_PROPERTY, Value::Path(source.clone()), Priority::Base, true);
            }
            if let Some(name) = &self.project.name {
                store.set(PROJECT_NAME_PROPERTY, name.as_str(), Priority::Base, true);
            }
        }
        *state = FrameState::Initialized;
        tracing::debug!("frame {} initialized", self.describe());
        Ok(())
    }

    fn determine_base_dir(&self) -> PathBuf {
        if let Some(value) = self.get_value(BASEDIR_PROPERTY) {
            return PathBuf::from(value.to_string());
        }
        let source_dir = self
            .project
            .source_dir()
            .filter(|dir| !dir.as_os_str().is_empty());
        match (&self.project.base, source_dir) {
            (Some(base), Some(dir)) => dir.join(base),
            (Some(base), None) => base.clone(),
            (None, Some(dir)) => dir.to_path_buf(),
            (None, None) => PathBuf::from("."),
        }
    }

    /// Set the base directory. It must be an existing directory.
    pub fn set_base_dir(&self, dir: &Path) -> Result<(), ExecutionError> {
        let normalized = dir
            .canonicalize()
            .map_err(|_| ConfigError::MissingBaseDir {
                path: dir.to_path_buf(),
            })?;
        if !normalized.is_dir() {
            return Err(ConfigError::BaseDirNotDirectory { path: normalized }.into());
        }

        *write(&self.base_dir) = normalized.clone();
        {
            let mut store = write(&self.properties);
            let priority = store
                .entry(BASEDIR_PROPERTY)
                .map(|entry| entry.priority)
                .unwrap_or_default();
            store.set(BASEDIR_PROPERTY, Value::Path(normalized.clone()), priority, true);
        }
        self.log(
            MessageLevel::Verbose,
            format!("Project base dir set to: {}", normalized.display()),
        );
        Ok(())
    }

    /// Write a possibly qualified property.
    ///
    /// A qualified name whose frame does not exist yet is kept as an
    /// override and applied when that frame is created.
    pub fn set_data_value(
        &self,
        name: &str,
        value: DataValue,
        mutable: bool,
    ) -> Result<(), ExecutionError> {
        match split_qualified(name) {
            (None, local) => {
                write(&self.properties).update(local.to_string(), value, mutable);
                Ok(())
            }
            (Some(path), local) => match self.frame_at(path) {
                Some(frame) => frame.set_data_value(local, value, mutable),
                None => self.set_override(name, value.value),
            },
        }
    }

    /// Record a value for a frame that will be created later as `ref`
    /// (from `ref:name`).
    pub fn set_override(&self, name: &str, value: Value) -> Result<(), ExecutionError> {
        let (frame, rest) = name
            .split_once(REF_DELIMITER)
            .ok_or_else(|| ConfigError::OverrideOutsideReference {
                name: name.to_string(),
            })?;
        lock(&self.overrides)
            .entry(frame.to_string())
            .or_default()
            .set(rest, value, Priority::Override, true);
        Ok(())
    }

    /// Convenience for a base-priority write.
    pub fn set_property(
        &self,
        name: &str,
        value: impl Into<Value>,
        mutable: bool,
    ) -> Result<(), ExecutionError> {
        self.set_data_value(name, DataValue::new(value, Priority::Base), mutable)
    }

    /// Read a possibly qualified property.
    pub fn get_value(&self, name: &str) -> Option<Value> {
        match split_qualified(name) {
            (None, local) => read(&self.properties).get(local).cloned(),
            (Some(path), local) => self.frame_at(path)?.get_value(local),
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get_value(name).is_some()
    }

    /// All values visible from this frame: local ones, those of every
    /// child frame as `child:name`, and pending overrides.
    pub fn all_properties(&self) -> BTreeMap<String, Value> {
        let mut all: BTreeMap<String, Value> = read(&self.properties)
            .iter()
            .map(|(name, entry)| (name.to_string(), entry.value.clone()))
            .collect();
        let children: Vec<(String, Arc<Frame>)> = read(&self.children)
            .iter()
            .map(|(name, frame)| (name.clone(), Arc::clone(frame)))
            .collect();
        for (child_name, child) in children {
            for (name, value) in child.all_properties() {
                all.insert(format!("{}{}{}", child_name, REF_DELIMITER, name), value);
            }
        }
        for (frame, store) in lock(&self.overrides).iter() {
            for (name, entry) in store.iter() {
                all.entry(format!("{}{}{}", frame, REF_DELIMITER, name))
                    .or_insert_with(|| entry.value.clone());
            }
        }
        all
    }

    /// Substitute property references in `text`.
    pub fn resolve(&self, text: &str) -> Result<String, ExecutionError> {
        self.services
            .resolver
            .resolve(self, text, self.services.settings.unset_properties_allowed)
            .map_err(ExecutionError::from)
    }

    // Imports

    pub fn import_library(&self, library: &str) -> Result<(), ExecutionError> {
        Ok(self.registry.import_library(library)?)
    }

    pub fn import_component(
        &self,
        library: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), ExecutionError> {
        Ok(self.registry.import_component(library, name, alias)?)
    }

    /// Import a component visible in a referenced frame (`ref:name`).
    pub fn import_frame_component(
        &self,
        qualified: &str,
        alias: Option<&str>,
    ) -> Result<(), ExecutionError> {
        let (path, local) = split_qualified(qualified);
        let frame = path
            .and_then(|path| self.frame_at(path))
            .ok_or_else(|| ImportError::UnknownFrame {
                name: qualified.to_string(),
            })?;
        let binding = frame.registry.resolve(local)?;
        Ok(self.registry.import_binding(binding, alias.unwrap_or(local))?)
    }

    /// Import the standard libraries once.
    pub fn import_standard_components(&self) -> Result<(), ExecutionError> {
        if self.standard_imported.load(Ordering::Acquire) {
            return Ok(());
        }
        self.registry
            .import_standard_libraries(&self.services.settings.standard_library_prefix)?;
        self.standard_imported.store(true, Ordering::Release);
        Ok(())
    }

    // Frames

    /// Create the frame `name` for `project` and run its global tasks.
    pub fn create_project_reference(
        &self,
        name: &str,
        project: Arc<Project>,
        mut properties: PropertyStore,
    ) -> Result<Arc<Frame>, ExecutionError> {
        let pending = lock(&self.overrides).remove(name);
        if let Some(overrides) = pending {
            properties.merge(&overrides, Priority::Base);
        }
        let child = self.create_child(Some(name), project);
        child.initialize(properties)?;
        write(&self.children).insert(name.to_string(), Arc::clone(&child));

        child.import_standard_components()?;
        child.create_model_references()?;
        child.run_global_tasks()?;
        Ok(child)
    }

    /// Create frames for the project's declared references that do not exist yet.
    fn create_model_references(&self) -> Result<(), ExecutionError> {
        for (name, project) in self.project.references() {
            if self.child(name).is_none() {
                self.create_project_reference(name, Arc::clone(project), PropertyStore::new())?;
            }
        }
        Ok(())
    }

    /// Run `targets` of `project` in a new, unnamed child frame.
    pub fn run_sub_build(
        &self,
        project: Arc<Project>,
        properties: PropertyStore,
        targets: &[String],
    ) -> Result<(), ExecutionError> {
        let child = self.create_child(None, project);
        child.initialize(properties)?;
        child.run_build(targets)
    }

    /// Run `targets` of this frame's project in a new child frame.
    pub fn call_target(&self, properties: PropertyStore, targets: &[String]) -> Result<(), ExecutionError> {
        self.run_sub_build(Arc::clone(&self.project), properties, targets)
    }

    // Execution

    /// Run a whole build: build events around the global tasks and targets.
    pub fn start_build(&self, targets: &[String]) -> Result<(), ExecutionError> {
        let project = self.element_ref(&self.describe(), &self.project.location);
        self.events.build_started(project.clone());
        let result = self.run_configured_global_tasks().and_then(|()| self.run_build(targets));
        if let Err(e) = &result {
            tracing::debug!("build failed: {}", e);
        }
        self.events.build_finished(project, result.as_ref().err());
        result
    }

    fn run_configured_global_tasks(&self) -> Result<(), ExecutionError> {
        if self.services.settings.global_tasks.is_empty() {
            return Ok(());
        }
        self.import_standard_components()?;
        for task in &self.services.settings.global_tasks {
            self.execute_tasks(task)?;
        }
        Ok(())
    }

    /// Run `targets` in order, or the default target when none are given.
    pub fn run_build(&self, targets: &[String]) -> Result<(), ExecutionError> {
        self.transition(
            &[FrameState::Initialized, FrameState::Idle],
            FrameState::Running,
            "run a build",
        )?;
        let result = self.run_targets(targets);
        *lock(&self.state) = FrameState::Idle;
        result
    }

    fn run_targets(&self, targets: &[String]) -> Result<(), ExecutionError> {
        self.import_standard_components()?;
        self.create_model_references()?;
        self.run_global_tasks()?;

        if targets.is_empty() {
            match &self.project.default_target {
                Some(default) => {
                    tracing::debug!("executing default target {}", default);
                    self.execute_target(default)?;
                }
                None => tracing::debug!("no target requested and no default target declared"),
            }
        } else {
            for target in targets {
                self.execute_target(target)?;
            }
        }
        Ok(())
    }

    fn run_global_tasks(&self) -> Result<(), ExecutionError> {
        for task in &self.services.settings.frame_tasks {
            self.execute_tasks(task)?;
        }
        for task in &self.project.tasks {
            self.execute_tasks(task)?;
        }
        Ok(())
    }

    /// Run `name` after everything it depends on.
    pub fn execute_target(&self, name: &str) -> Result<(), ExecutionError> {
        for qualified in resolver::flatten(self, name)? {
            match split_qualified(&qualified) {
                (None, local) => self.execute_target_tasks(local)?,
                (Some(path), local) => {
                    let frame = self
                        .frame_at(path)
                        .ok_or_else(|| TargetGraphError::UnknownProject {
                            path: path.to_string(),
                        })?;
                    frame.execute_target_tasks(local)?;
                }
            }
        }
        Ok(())
    }

    /// Run the tasks of one target, without its dependencies.
    pub fn execute_target_tasks(&self, name: &str) -> Result<(), ExecutionError> {
        self.check_recursion(name)?;
        let target = self
            .project
            .target(name)
            .ok_or_else(|| TargetGraphError::UnknownTarget {
                name: name.to_string(),
            })?;

        let previous = lock(&self.current_target).replace(name.to_string());
        let element = self.element_ref(&target.name, &target.location);
        self.events.target_started(element.clone());
        let result = self
            .run_target(target)
            .map_err(|e| e.with_location(&target.location));
        self.events.target_finished(element, result.as_ref().err());
        *lock(&self.current_target) = previous;
        result
    }

    fn run_target(&self, target: &Target) -> Result<(), ExecutionError> {
        if let Some(condition) = &target.if_condition {
            let property = self.resolve(condition.trim())?;
            if !self.is_set(&property) {
                self.log(
                    MessageLevel::Verbose,
                    format!("Skipped target `{}` because `{}` is not set", target.name, property),
                );
                return Ok(());
            }
        }
        if let Some(condition) = &target.unless_condition {
            let property = self.resolve(condition.trim())?;
            if self.is_set(&property) {
                self.log(
                    MessageLevel::Verbose,
                    format!("Skipped target `{}` because `{}` is set", target.name, property),
                );
                return Ok(());
            }
        }
        for task in &target.tasks {
            self.execute_tasks(task)?;
        }
        Ok(())
    }

    /// Fail if an enclosing frame runs the same target of the same
    /// descriptor in the same base directory.
    fn check_recursion(&self, name: &str) -> Result<(), ExecutionError> {
        let base_dir = self.base_dir();
        let mut ancestor = self.parent();
        while let Some(frame) = ancestor {
            let same_target = lock(&frame.current_target).as_deref() == Some(name);
            if same_target
                && frame.base_dir() == base_dir
                && self.project.source.is_some()
                && frame.project.source == self.project.source
            {
                return Err(TargetGraphError::RecursiveExecution {
                    target: name.to_string(),
                    base_dir,
                }
                .into());
            }
            ancestor = frame.parent();
        }
        Ok(())
    }

    /// Create the component for `model` and execute it if it is a task.
    pub fn execute_tasks(&self, model: &BuildElement) -> Result<(), ExecutionError> {
        let result = match self.create_component(&model.kind, Some(model)) {
            Ok(Created::Task(task)) => {
                let result = self.execute_task(&task);
                task.destroy();
                result
            }
            Ok(Created::Type(_)) => Ok(()),
            Err(e) => Err(e),
        };
        result.map_err(|e| e.with_location(&model.location))
    }

    /// Execute one task between its aspects, bracketed by task events.
    pub fn execute_task(&self, task: &Task) -> Result<(), ExecutionError> {
        let active = self.registry.aspects().pre_execute(task)?;
        let element = task.element_ref();
        self.events.task_started(element.clone(), task.entry());

        let failure = task
            .perform()
            .err()
            .map(|e| ExecutionError::from(e).with_location(task.location()));
        let failure = AspectChain::post_execute(active, failure, |aspect, message| {
            tracing::warn!("aspect {} suppressed failure of {}: {}", aspect, task.name(), message);
            self.events.message_logged(
                Some(task.name()),
                format!(
                    "aspect `{}` suppressed a failure of <{}>: {}",
                    aspect,
                    task.name(),
                    message
                ),
                MessageLevel::Warning,
            );
        });

        self.events.task_finished(element, task.id(), failure.as_ref());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn transition(
        &self,
        from: &[FrameState],
        to: FrameState,
        operation: &'static str,
    ) -> Result<(), ExecutionError> {
        let mut state = lock(&self.state);
        if !from.contains(&*state) {
            return Err(ConfigError::FrameState {
                state: state.as_str(),
                operation,
            }
            .into());
        }
        *state = to;
        Ok(())
    }
}

impl PropertySource for Frame {
    fn lookup(&self, name: &str) -> Lookup {
        match split_qualified(name) {
            (None, local) => match read(&self.properties).get(local) {
                Some(value) => Lookup::Found(value.to_string()),
                None => Lookup::Missing,
            },
            (Some(path), local) => match self.frame_at(path) {
                Some(frame) => frame.lookup(local),
                None => Lookup::NoFrame,
            },
        }
    }
}

impl TargetSource for Frame {
    fn dependencies(
        &self,
        path: Option<&str>,
        name: &str,
    ) -> Result<(Vec<String>, Location), TargetGraphError> {
        match path {
            None => self.project.dependencies(None, name),
            Some(path) => self
                .frame_at(path)
                .ok_or_else(|| TargetGraphError::UnknownProject {
                    path: path.to_string(),
                })?
                .project
                .dependencies(None, name)
                .map_err(|e| match e {
                    TargetGraphError::UnknownTarget { .. } => TargetGraphError::UnknownTarget {
                        name: resolver::qualify(Some(path), name),
                    },
                    other => other,
                }),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("name", &self.describe())
            .field("state", &self.state())
            .field("children", &self.child_names())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::library::StaticLoader;
    use crate::property::PropertyError;
    use tempfile::TempDir;

    fn services() -> FrameServices {
        FrameServices::new(
            LibraryManager::new(Arc::new(StaticLoader::new())),
            FrameSettings::default(),
        )
    }

    fn frame_in(dir: &TempDir, project: Project) -> Arc<Frame> {
        let project = project.with_source(dir.path().join("Keel.toml"));
        let frame = Frame::root(Arc::new(project), services());
        frame.initialize(PropertyStore::new()).unwrap();
        frame
    }

    #[test]
    fn test_initialize_sets_builtin_properties() {
        let dir = TempDir::new().unwrap();
        let frame = frame_in(&dir, Project::new("demo"));

        assert_eq!(frame.state(), FrameState::Initialized);
        assert_eq!(frame.base_dir(), dir.path().canonicalize().unwrap());
        assert_eq!(
            frame.get_value(PROJECT_NAME_PROPERTY).map(|v| v.to_string()),
            Some("demo".to_string())
        );
        assert!(frame.is_set(FILE_PROPERTY));
        assert!(frame.is_set(BASEDIR_PROPERTY));
    }

    #[test]
    fn test_missing_base_dir_is_config_error() {
        let dir = TempDir::new().unwrap();
        let project = Project::new("demo")
            .with_base("does-not-exist")
            .with_source(dir.path().join("Keel.toml"));
        let frame = Frame::root(Arc::new(project), services());
        let err = frame.initialize(PropertyStore::new()).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Config {
                error: ConfigError::MissingBaseDir { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_explicit_basedir_property_wins() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let frame = Frame::root(
            Arc::new(Project::new("demo").with_source(dir.path().join("Keel.toml"))),
            services(),
        );
        let mut initial = PropertyStore::new();
        initial.set(BASEDIR_PROPERTY, sub.display().to_string(), Priority::User, false);
        frame.initialize(initial).unwrap();
        assert_eq!(frame.base_dir(), sub.canonicalize().unwrap());
    }

    #[test]
    fn test_deferred_override_applied_on_reference() {
        let dir = TempDir::new().unwrap();
        let frame = frame_in(&dir, Project::new("root"));
        frame.set_property("lib:mode", "release", false).unwrap();
        assert_eq!(
            frame.all_properties().get("lib:mode").map(|v| v.to_string()),
            Some("release".to_string())
        );

        let lib = Project::new("lib").with_source(dir.path().join("Keel.toml"));
        let mut own = PropertyStore::new();
        own.set("mode", "debug", Priority::Base, true);
        let child = frame
            .create_project_reference("lib", Arc::new(lib), own)
            .unwrap();

        assert_eq!(
            child.get_value("mode").map(|v| v.to_string()),
            Some("release".to_string())
        );
        assert_eq!(
            frame.get_value("lib:mode").map(|v| v.to_string()),
            Some("release".to_string())
        );
        assert_eq!(frame.resolve("${lib:mode}").unwrap(), "release");
    }

    #[test]
    fn test_deferred_basedir_override_moves_reference_base_dir() {
        let dir = TempDir::new().unwrap();
        let elsewhere = dir.path().join("elsewhere");
        std::fs::create_dir(&elsewhere).unwrap();
        let frame = frame_in(&dir, Project::new("root"));
        frame
            .set_property("lib:basedir", elsewhere.display().to_string(), false)
            .unwrap();

        let lib = Project::new("lib").with_source(dir.path().join("Keel.toml"));
        let child = frame
            .create_project_reference("lib", Arc::new(lib), PropertyStore::new())
            .unwrap();

        let expected = elsewhere.canonicalize().unwrap();
        assert_eq!(child.base_dir(), expected);
        assert_eq!(
            child.get_value(BASEDIR_PROPERTY).map(|v| v.to_string()),
            Some(expected.display().to_string())
        );
    }

    #[test]
    fn test_unqualified_override_rejected() {
        let dir = TempDir::new().unwrap();
        let frame = frame_in(&dir, Project::new("root"));
        assert!(matches!(
            frame.set_override("plain", Value::from("x")),
            Err(ExecutionError::Config {
                error: ConfigError::OverrideOutsideReference { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_frame_reference_fails_resolution() {
        let dir = TempDir::new().unwrap();
        let frame = frame_in(&dir, Project::new("root"));
        let err = frame.resolve("${nowhere:value}").unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Config {
                error: ConfigError::Property(PropertyError::UnknownFrame { .. }),
                ..
            }
        ));
        assert_eq!(frame.resolve("${unset}").unwrap(), "${unset}");
    }

    #[test]
    fn test_run_build_requires_initialization() {
        let frame = Frame::root(Arc::new(Project::new("demo")), services());
        let err = frame.run_build(&[]).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Config {
                error: ConfigError::FrameState { state: "uninitialized", .. },
                ..
            }
        ));
    }

    #[test]
    fn test_guards_skip_target_but_fire_events() {
        use crate::execution::events::{BuildEvent, RecordingListener};

        let dir = TempDir::new().unwrap();
        let project = Project::new("demo")
            .with_target(Target::new("guarded").only_if("enabled"))
            .with_target(Target::new("blocked").unless("disabled"));
        let frame = frame_in(&dir, project);
        let recorder = Arc::new(RecordingListener::new());
        frame.add_build_listener(recorder.clone());
        frame.set_property("disabled", "yes", false).unwrap();

        frame
            .run_build(&["guarded".to_string(), "blocked".to_string()])
            .unwrap();

        let started = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, BuildEvent::TargetStarted { .. }))
            .count();
        let finished = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, BuildEvent::TargetFinished { failure: None, .. }))
            .count();
        assert_eq!((started, finished), (2, 2));
        assert_eq!(frame.state(), FrameState::Idle);
    }
}
