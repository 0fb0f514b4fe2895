//! Component libraries and the loader that materializes their contents.
//!
//! A library is a named set of definitions (task-like and type-like
//! components), converters and aspects. Definitions only carry an
//! implementation descriptor; the [`ComponentLoader`] turns a descriptor
//! into a live class, converter or aspect. A library may extend another
//! library, in which case descriptors the loader cannot find under the
//! library's own id are looked up along the extension chain.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::component::class::ComponentClass;
use crate::component::convert::Converter;
use crate::execution::aspects::Aspect;

/// Whether a definition produces tasks or data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Task,
    Type,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::Task => f.write_str("task"),
            DefinitionKind::Type => f.write_str("type"),
        }
    }
}

/// One component declared by a library. Immutable once the library is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDefinition {
    pub library: String,
    pub name: String,
    /// Implementation descriptor handed to the loader
    pub descriptor: String,
    pub kind: DefinitionKind,
}

impl ComponentDefinition {
    pub fn is_task(&self) -> bool {
        self.kind == DefinitionKind::Task
    }
}

/// A library of component definitions.
#[derive(Debug, Clone)]
pub struct ComponentLibrary {
    id: String,
    extends: Option<String>,
    definitions: BTreeMap<String, Arc<ComponentDefinition>>,
    converters: Vec<String>,
    aspects: Vec<String>,
}

impl ComponentLibrary {
    pub fn new(id: impl Into<String>) -> Self {
        ComponentLibrary {
            id: id.into(),
            extends: None,
            definitions: BTreeMap::new(),
            converters: Vec::new(),
            aspects: Vec::new(),
        }
    }

    /// Declare a task-like component.
    pub fn task(self, name: &str, descriptor: &str) -> Self {
        self.define(name, descriptor, DefinitionKind::Task)
    }

    /// Declare a type-like component.
    pub fn type_def(self, name: &str, descriptor: &str) -> Self {
        self.define(name, descriptor, DefinitionKind::Type)
    }

    pub fn converter(mut self, descriptor: &str) -> Self {
        self.converters.push(descriptor.to_string());
        self
    }

    pub fn aspect(mut self, descriptor: &str) -> Self {
        self.aspects.push(descriptor.to_string());
        self
    }

    pub fn extends(mut self, library: &str) -> Self {
        self.extends = Some(library.to_string());
        self
    }

    fn define(mut self, name: &str, descriptor: &str, kind: DefinitionKind) -> Self {
        let definition = ComponentDefinition {
            library: self.id.clone(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
        };
        self.definitions
            .insert(name.to_string(), Arc::new(definition));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn extended(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn definition(&self, name: &str) -> Option<&Arc<ComponentDefinition>> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ComponentDefinition>> {
        self.definitions.values()
    }

    pub fn converters(&self) -> &[String] {
        &self.converters
    }

    pub fn aspects(&self) -> &[String] {
        &self.aspects
    }
}

/// Why the loader could not materialize a descriptor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("no implementation found for `{descriptor}`")]
    Missing { descriptor: String },

    #[error("`{descriptor}` depends on `{dependency}`, which could not be loaded")]
    Dependency {
        descriptor: String,
        dependency: String,
    },

    #[error("`{descriptor}` could not be constructed: {reason}")]
    Construction { descriptor: String, reason: String },
}

/// Materializes library contents.
pub trait ComponentLoader: Send + Sync {
    fn load_class(
        &self,
        library: &str,
        descriptor: &str,
    ) -> Result<Arc<ComponentClass>, LoadFailure>;

    fn load_converter(
        &self,
        library: &str,
        descriptor: &str,
    ) -> Result<Arc<dyn Converter>, LoadFailure>;

    fn load_aspect(&self, library: &str, descriptor: &str) -> Result<Arc<dyn Aspect>, LoadFailure>;
}

type ConverterFactory = Arc<dyn Fn() -> Result<Arc<dyn Converter>, String> + Send + Sync>;
type AspectFactory = Arc<dyn Fn() -> Result<Arc<dyn Aspect>, String> + Send + Sync>;

struct ClassEntry {
    class: Arc<ComponentClass>,
    requires: Vec<String>,
}

/// A compiled-in loader: descriptors registered at startup.
#[derive(Default)]
pub struct StaticLoader {
    classes: HashMap<(String, String), ClassEntry>,
    converters: HashMap<(String, String), ConverterFactory>,
    aspects: HashMap<(String, String), AspectFactory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(self, library: &str, descriptor: &str, class: Arc<ComponentClass>) -> Self {
        self.with_class_requiring(library, descriptor, class, &[])
    }

    /// Register a class that can only be loaded when the listed descriptors
    /// of the same library are loadable too.
    pub fn with_class_requiring(
        mut self,
        library: &str,
        descriptor: &str,
        class: Arc<ComponentClass>,
        requires: &[&str],
    ) -> Self {
        self.classes.insert(
            (library.to_string(), descriptor.to_string()),
            ClassEntry {
                class,
                requires: requires.iter().map(|r| r.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_converter(
        mut self,
        library: &str,
        descriptor: &str,
        factory: impl Fn() -> Result<Arc<dyn Converter>, String> + Send + Sync + 'static,
    ) -> Self {
        self.converters.insert(
            (library.to_string(), descriptor.to_string()),
            Arc::new(factory),
        );
        self
    }

    pub fn with_aspect(
        mut self,
        library: &str,
        descriptor: &str,
        factory: impl Fn() -> Result<Arc<dyn Aspect>, String> + Send + Sync + 'static,
    ) -> Self {
        self.aspects.insert(
            (library.to_string(), descriptor.to_string()),
            Arc::new(factory),
        );
        self
    }

    /// Merge another loader's registrations into this one.
    pub fn merge(mut self, other: StaticLoader) -> Self {
        self.classes.extend(other.classes);
        self.converters.extend(other.converters);
        self.aspects.extend(other.aspects);
        self
    }

    fn key(library: &str, descriptor: &str) -> (String, String) {
        (library.to_string(), descriptor.to_string())
    }
}

impl ComponentLoader for StaticLoader {
    fn load_class(
        &self,
        library: &str,
        descriptor: &str,
    ) -> Result<Arc<ComponentClass>, LoadFailure> {
        let entry = self
            .classes
            .get(&Self::key(library, descriptor))
            .ok_or_else(|| LoadFailure::Missing {
                descriptor: descriptor.to_string(),
            })?;
        for dependency in &entry.requires {
            if !self.classes.contains_key(&Self::key(library, dependency)) {
                return Err(LoadFailure::Dependency {
                    descriptor: descriptor.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(Arc::clone(&entry.class))
    }

    fn load_converter(
        &self,
        library: &str,
        descriptor: &str,
    ) -> Result<Arc<dyn Converter>, LoadFailure> {
        let factory = self
            .converters
            .get(&Self::key(library, descriptor))
            .ok_or_else(|| LoadFailure::Missing {
                descriptor: descriptor.to_string(),
            })?;
        factory().map_err(|reason| LoadFailure::Construction {
            descriptor: descriptor.to_string(),
            reason,
        })
    }

    fn load_aspect(&self, library: &str, descriptor: &str) -> Result<Arc<dyn Aspect>, LoadFailure> {
        let factory = self
            .aspects
            .get(&Self::key(library, descriptor))
            .ok_or_else(|| LoadFailure::Missing {
                descriptor: descriptor.to_string(),
            })?;
        factory().map_err(|reason| LoadFailure::Construction {
            descriptor: descriptor.to_string(),
            reason,
        })
    }
}

/// Failures while registering or importing libraries and components.
#[derive(Debug, Clone, Error, MietteDiagnostic, PartialEq, Eq)]
pub enum ImportError {
    #[error("unknown library `{library}`")]
    #[diagnostic(code(keel::import::unknown_library))]
    UnknownLibrary { library: String },

    #[error("library `{library}` does not define `{name}`")]
    #[diagnostic(code(keel::import::unknown_component))]
    UnknownComponent { library: String, name: String },

    #[error("library `{library}` is already registered")]
    #[diagnostic(code(keel::import::duplicate_library))]
    DuplicateLibrary { library: String },

    #[error("library `{library}` extends unknown library `{extends}`")]
    #[diagnostic(code(keel::import::unknown_extension))]
    UnknownExtension { library: String, extends: String },

    #[error("library extension cycle: {}", chain.join(" -> "))]
    #[diagnostic(code(keel::import::circular_extension))]
    CircularExtension { chain: Vec<String> },

    #[error("`{name}` is not defined; import the library that provides it")]
    #[diagnostic(code(keel::import::undefined_component))]
    UndefinedComponent { name: String },

    #[error("`{name}` is not a {expected} definition")]
    #[diagnostic(code(keel::import::wrong_kind))]
    WrongKind {
        name: String,
        expected: DefinitionKind,
    },

    #[error("failed to load `{name}` from library `{library}`")]
    #[diagnostic(code(keel::import::load))]
    Load {
        name: String,
        library: String,
        #[source]
        failure: LoadFailure,
    },

    #[error("no referenced project named `{name}`")]
    #[diagnostic(code(keel::import::unknown_frame))]
    UnknownFrame { name: String },
}

/// All registered libraries of a build, shared by every frame.
pub struct LibraryManager {
    libraries: BTreeMap<String, Arc<ComponentLibrary>>,
    loader: Arc<dyn ComponentLoader>,
    classes: DashMap<(String, String), Arc<ComponentClass>>,
}

impl LibraryManager {
    pub fn new(loader: Arc<dyn ComponentLoader>) -> Self {
        LibraryManager {
            libraries: BTreeMap::new(),
            loader,
            classes: DashMap::new(),
        }
    }

    /// Register one library. Ids must be unique.
    pub fn register(&mut self, library: ComponentLibrary) -> Result<(), ImportError> {
        if self.libraries.contains_key(library.id()) {
            return Err(ImportError::DuplicateLibrary {
                library: library.id().to_string(),
            });
        }
        tracing::debug!("registered library {}", library.id());
        self.libraries
            .insert(library.id().to_string(), Arc::new(library));
        Ok(())
    }

    /// Register a batch of libraries, then check their extension chains.
    pub fn register_all(
        &mut self,
        libraries: impl IntoIterator<Item = ComponentLibrary>,
    ) -> Result<(), ImportError> {
        for library in libraries {
            self.register(library)?;
        }
        self.check_extensions()
    }

    /// Every `extends` names a registered library and no chain loops.
    pub fn check_extensions(&self) -> Result<(), ImportError> {
        for library in self.libraries.values() {
            let mut chain = vec![library.id().to_string()];
            let mut seen: HashSet<&str> = HashSet::from([library.id()]);
            let mut current = library;
            while let Some(parent) = current.extended() {
                chain.push(parent.to_string());
                if !seen.insert(parent) {
                    return Err(ImportError::CircularExtension { chain });
                }
                current = self.libraries.get(parent).ok_or_else(|| {
                    ImportError::UnknownExtension {
                        library: current.id().to_string(),
                        extends: parent.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }

    pub fn library(&self, id: &str) -> Result<&Arc<ComponentLibrary>, ImportError> {
        self.libraries
            .get(id)
            .ok_or_else(|| ImportError::UnknownLibrary {
                library: id.to_string(),
            })
    }

    pub fn definition(
        &self,
        library: &str,
        name: &str,
    ) -> Result<Arc<ComponentDefinition>, ImportError> {
        self.library(library)?
            .definition(name)
            .cloned()
            .ok_or_else(|| ImportError::UnknownComponent {
                library: library.to_string(),
                name: name.to_string(),
            })
    }

    /// Libraries whose id starts with `prefix`, in id order.
    pub fn standard_libraries(&self, prefix: &str) -> Vec<Arc<ComponentLibrary>> {
        self.libraries
            .values()
            .filter(|library| library.id().starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn libraries(&self) -> impl Iterator<Item = &Arc<ComponentLibrary>> {
        self.libraries.values()
    }

    /// Load the class behind a definition, memoized per descriptor.
    pub fn load_class(
        &self,
        definition: &ComponentDefinition,
    ) -> Result<Arc<ComponentClass>, ImportError> {
        let key = (definition.library.clone(), definition.descriptor.clone());
        if let Some(class) = self.classes.get(&key) {
            return Ok(Arc::clone(&class));
        }
        let class = self
            .along_chain(&definition.library, |library| {
                self.loader.load_class(library, &definition.descriptor)
            })
            .map_err(|failure| ImportError::Load {
                name: definition.name.clone(),
                library: definition.library.clone(),
                failure,
            })?;
        self.classes.insert(key, Arc::clone(&class));
        Ok(class)
    }

    pub fn load_converter(
        &self,
        library: &str,
        descriptor: &str,
    ) -> Result<Arc<dyn Converter>, ImportError> {
        self.along_chain(library, |id| self.loader.load_converter(id, descriptor))
            .map_err(|failure| ImportError::Load {
                name: descriptor.to_string(),
                library: library.to_string(),
                failure,
            })
    }

    pub fn load_aspect(&self, library: &str, descriptor: &str) -> Result<Arc<dyn Aspect>, ImportError> {
        self.along_chain(library, |id| self.loader.load_aspect(id, descriptor))
            .map_err(|failure| ImportError::Load {
                name: descriptor.to_string(),
                library: library.to_string(),
                failure,
            })
    }

    /// Try `load` for `library`, then for each library it extends, while
    /// the descriptor is missing.
    fn along_chain<T>(
        &self,
        library: &str,
        load: impl Fn(&str) -> Result<T, LoadFailure>,
    ) -> Result<T, LoadFailure> {
        let mut current = library.to_string();
        let mut visited = HashSet::new();
        loop {
            match load(&current) {
                Err(LoadFailure::Missing { descriptor }) => {
                    visited.insert(current.clone());
                    let parent = self
                        .libraries
                        .get(&current)
                        .and_then(|l| l.extended())
                        .filter(|parent| !visited.contains(*parent));
                    match parent {
                        Some(parent) => current = parent.to_string(),
                        None => return Err(LoadFailure::Missing { descriptor }),
                    }
                }
                other => return other,
            }
        }
    }
}

impl fmt::Debug for LibraryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryManager")
            .field("libraries", &self.libraries.keys().collect::<Vec<_>>())
            .field("loaded_classes", &self.classes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    #[derive(Default)]
    struct Noop;

    impl Component for Noop {}

    fn noop_class(name: &str) -> Arc<ComponentClass> {
        ComponentClass::component::<Noop>(name).build()
    }

    fn manager(loader: StaticLoader, libraries: Vec<ComponentLibrary>) -> LibraryManager {
        let mut manager = LibraryManager::new(Arc::new(loader));
        manager.register_all(libraries).unwrap();
        manager
    }

    #[test]
    fn test_duplicate_library_rejected() {
        let mut manager = LibraryManager::new(Arc::new(StaticLoader::new()));
        manager.register(ComponentLibrary::new("lib")).unwrap();
        assert_eq!(
            manager.register(ComponentLibrary::new("lib")),
            Err(ImportError::DuplicateLibrary {
                library: "lib".to_string()
            })
        );
    }

    #[test]
    fn test_extension_checks() {
        let mut manager = LibraryManager::new(Arc::new(StaticLoader::new()));
        let err = manager
            .register_all(vec![ComponentLibrary::new("a").extends("missing")])
            .unwrap_err();
        assert!(matches!(err, ImportError::UnknownExtension { .. }));

        let mut manager = LibraryManager::new(Arc::new(StaticLoader::new()));
        let err = manager
            .register_all(vec![
                ComponentLibrary::new("a").extends("b"),
                ComponentLibrary::new("b").extends("a"),
            ])
            .unwrap_err();
        match err {
            ImportError::CircularExtension { chain } => {
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_falls_back_along_extension_chain() {
        let loader = StaticLoader::new().with_class("base", "impl.echo", noop_class("echo"));
        let manager = manager(
            loader,
            vec![
                ComponentLibrary::new("base"),
                ComponentLibrary::new("child")
                    .extends("base")
                    .task("echo", "impl.echo"),
            ],
        );
        let definition = manager.definition("child", "echo").unwrap();
        let class = manager.load_class(&definition).unwrap();
        assert_eq!(class.name(), "echo");

        let again = manager.load_class(&definition).unwrap();
        assert!(Arc::ptr_eq(&class, &again));
    }

    #[test]
    fn test_load_failures_are_classified() {
        let loader = StaticLoader::new().with_class_requiring(
            "lib",
            "impl.needy",
            noop_class("needy"),
            &["impl.helper"],
        );
        let manager = manager(
            loader,
            vec![ComponentLibrary::new("lib")
                .task("needy", "impl.needy")
                .task("ghost", "impl.ghost")],
        );

        let err = manager
            .load_class(&manager.definition("lib", "needy").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::Load {
                failure: LoadFailure::Dependency { .. },
                ..
            }
        ));

        let err = manager
            .load_class(&manager.definition("lib", "ghost").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::Load {
                failure: LoadFailure::Missing { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_standard_libraries_by_prefix() {
        let manager = manager(
            StaticLoader::new(),
            vec![
                ComponentLibrary::new("keel.core"),
                ComponentLibrary::new("keel.extra"),
                ComponentLibrary::new("thirdparty"),
            ],
        );
        let ids: Vec<_> = manager
            .standard_libraries("keel.")
            .iter()
            .map(|l| l.id().to_string())
            .collect();
        assert_eq!(ids, vec!["keel.core", "keel.extra"]);
    }

    #[test]
    fn test_unknown_component() {
        let manager = manager(StaticLoader::new(), vec![ComponentLibrary::new("lib")]);
        assert_eq!(
            manager.definition("lib", "nope"),
            Err(ImportError::UnknownComponent {
                library: "lib".to_string(),
                name: "nope".to_string()
            })
        );
        assert!(matches!(
            manager.definition("other", "nope"),
            Err(ImportError::UnknownLibrary { .. })
        ));
    }
}
