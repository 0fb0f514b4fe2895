//! Per-frame view of imported components.
//!
//! Each frame owns one registry. Importing a library makes all of its
//! definitions visible under their declared names and loads the library's
//! converters and aspects into the frame's snapshots. A later import of
//! the same visible name replaces the earlier binding.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::component::class::ComponentClass;
use crate::component::convert::ConverterSet;
use crate::component::library::{ComponentDefinition, ComponentLibrary, ImportError, LibraryManager};
use crate::execution::aspects::AspectChain;

/// A build-visible name bound to a definition.
#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub name: String,
    pub definition: Arc<ComponentDefinition>,
    pub library: Arc<ComponentLibrary>,
}

#[derive(Default)]
struct RegistryState {
    bindings: HashMap<String, ImportBinding>,
    initialized: HashSet<String>,
    converters: ConverterSet,
    aspects: AspectChain,
}

pub struct ComponentRegistry {
    manager: Arc<LibraryManager>,
    state: RwLock<RegistryState>,
}

impl ComponentRegistry {
    pub fn new(manager: Arc<LibraryManager>) -> Self {
        ComponentRegistry {
            manager,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn manager(&self) -> &Arc<LibraryManager> {
        &self.manager
    }

    /// Make every definition of `library` visible.
    pub fn import_library(&self, library: &str) -> Result<(), ImportError> {
        let library = Arc::clone(self.manager.library(library)?);
        self.initialize(&library)?;

        let mut state = self.write();
        for definition in library.definitions() {
            state.bindings.insert(
                definition.name.clone(),
                ImportBinding {
                    name: definition.name.clone(),
                    definition: Arc::clone(definition),
                    library: Arc::clone(&library),
                },
            );
        }
        tracing::debug!(
            "imported library {} ({} definitions)",
            library.id(),
            library.definitions().count()
        );
        Ok(())
    }

    /// Make one definition visible, optionally under another name.
    pub fn import_component(
        &self,
        library: &str,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), ImportError> {
        let definition = self.manager.definition(library, name)?;
        let library = Arc::clone(self.manager.library(library)?);
        self.initialize(&library)?;

        let visible = alias.unwrap_or(name).to_string();
        tracing::debug!("imported {}:{} as {}", library.id(), name, visible);
        self.write().bindings.insert(
            visible.clone(),
            ImportBinding {
                name: visible,
                definition,
                library,
            },
        );
        Ok(())
    }

    /// Add a binding taken from another registry under `alias`.
    pub fn import_binding(&self, binding: ImportBinding, alias: &str) -> Result<(), ImportError> {
        self.initialize(&binding.library)?;
        self.write().bindings.insert(
            alias.to_string(),
            ImportBinding {
                name: alias.to_string(),
                ..binding
            },
        );
        Ok(())
    }

    /// Import every library whose id starts with `prefix`.
    pub fn import_standard_libraries(&self, prefix: &str) -> Result<(), ImportError> {
        for library in self.manager.standard_libraries(prefix) {
            self.import_library(library.id())?;
        }
        Ok(())
    }

    pub fn binding(&self, name: &str) -> Option<ImportBinding> {
        self.read().bindings.get(name).cloned()
    }

    /// The binding for `name`, or an error naming it.
    pub fn resolve(&self, name: &str) -> Result<ImportBinding, ImportError> {
        self.binding(name)
            .ok_or_else(|| ImportError::UndefinedComponent {
                name: name.to_string(),
            })
    }

    pub fn load_class(&self, binding: &ImportBinding) -> Result<Arc<ComponentClass>, ImportError> {
        self.manager.load_class(&binding.definition)
    }

    /// Visible names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the converters loaded so far.
    pub fn converters(&self) -> ConverterSet {
        self.read().converters.clone()
    }

    /// Snapshot of the aspects loaded so far, in import order.
    pub fn aspects(&self) -> AspectChain {
        self.read().aspects.clone()
    }

    /// Load a library's converters and aspects once per registry.
    fn initialize(&self, library: &ComponentLibrary) -> Result<(), ImportError> {
        if self.read().initialized.contains(library.id()) {
            return Ok(());
        }

        let converters = library
            .converters()
            .iter()
            .map(|descriptor| self.manager.load_converter(library.id(), descriptor))
            .collect::<Result<Vec<_>, _>>()?;
        let aspects = library
            .aspects()
            .iter()
            .map(|descriptor| self.manager.load_aspect(library.id(), descriptor))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.write();
        if !state.initialized.insert(library.id().to_string()) {
            return Ok(());
        }
        for converter in converters {
            state.converters = state.converters.with(converter);
        }
        for aspect in aspects {
            tracing::debug!("aspect {} enabled from {}", aspect.name(), library.id());
            state.aspects = state.aspects.with(aspect);
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::convert::{Converter, TypeKey, ValueType};
    use crate::component::library::StaticLoader;
    use crate::component::Component;
    use crate::property::Value;
    use std::path::Path;

    #[derive(Default)]
    struct Foo;
    impl Component for Foo {}

    #[derive(Default)]
    struct Bar;
    impl Component for Bar {}

    struct Upper;

    impl Converter for Upper {
        fn types(&self) -> Vec<TypeKey> {
            vec![TypeKey::of::<String>()]
        }

        fn convert(&self, text: &str, _target: &ValueType, _base: &Path) -> Result<Value, String> {
            Ok(Value::Text(text.to_uppercase()))
        }
    }

    fn manager() -> Arc<LibraryManager> {
        let loader = StaticLoader::new()
            .with_class("lib", "impl.foo", ComponentClass::component::<Foo>("foo").build())
            .with_class("lib", "impl.bar", ComponentClass::component::<Bar>("bar").build())
            .with_class("other", "impl.foo2", ComponentClass::component::<Bar>("foo2").build())
            .with_converter("lib", "impl.upper", || Ok(Arc::new(Upper) as Arc<dyn Converter>));
        let mut manager = LibraryManager::new(Arc::new(loader));
        manager
            .register_all(vec![
                ComponentLibrary::new("lib")
                    .task("foo", "impl.foo")
                    .type_def("bar", "impl.bar")
                    .converter("impl.upper"),
                ComponentLibrary::new("other").task("foo", "impl.foo2"),
            ])
            .unwrap();
        Arc::new(manager)
    }

    #[test]
    fn test_import_library_binds_all_definitions() {
        let registry = ComponentRegistry::new(manager());
        registry.import_library("lib").unwrap();
        assert_eq!(registry.names(), vec!["bar", "foo"]);
        assert_eq!(registry.converters().len(), 1);
    }

    #[test]
    fn test_alias_import() {
        let registry = ComponentRegistry::new(manager());
        registry.import_component("lib", "foo", Some("baz")).unwrap();

        let binding = registry.resolve("baz").unwrap();
        assert_eq!(binding.definition.name, "foo");
        assert_eq!(registry.load_class(&binding).unwrap().name(), "foo");
        assert_eq!(
            registry.resolve("foo").unwrap_err(),
            ImportError::UndefinedComponent {
                name: "foo".to_string()
            }
        );
    }

    #[test]
    fn test_last_import_wins() {
        let registry = ComponentRegistry::new(manager());
        registry.import_library("lib").unwrap();
        registry.import_library("other").unwrap();
        assert_eq!(registry.resolve("foo").unwrap().library.id(), "other");

        registry.import_component("lib", "foo", None).unwrap();
        assert_eq!(registry.resolve("foo").unwrap().library.id(), "lib");
    }

    #[test]
    fn test_converters_loaded_once() {
        let registry = ComponentRegistry::new(manager());
        let before = registry.converters();
        registry.import_library("lib").unwrap();
        registry.import_component("lib", "bar", Some("again")).unwrap();
        assert!(before.is_empty());
        assert_eq!(registry.converters().len(), 1);
    }

    #[test]
    fn test_unknown_library() {
        let registry = ComponentRegistry::new(manager());
        assert!(matches!(
            registry.import_library("missing"),
            Err(ImportError::UnknownLibrary { .. })
        ));
    }
}
