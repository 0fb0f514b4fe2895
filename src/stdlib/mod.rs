//! The standard `keel.core` library.
//!
//! Every frame imports libraries whose id starts with the standard prefix,
//! so these components are available to every build without an import.

pub mod aspects;
pub mod conditions;
pub mod converters;
pub mod tasks;

use std::sync::Arc;

use crate::component::library::{ComponentLibrary, ImportError, LibraryManager, StaticLoader};

pub use conditions::Condition;

/// Id of the core library.
pub const CORE_LIBRARY: &str = "keel.core";

/// The definitions of `keel.core`.
pub fn core_library() -> ComponentLibrary {
    ComponentLibrary::new(CORE_LIBRARY)
        .task("property", "task:property")
        .task("echo", "task:echo")
        .task("fail", "task:fail")
        .task("import", "task:import")
        .task("ref", "task:ref")
        .task("call", "task:call")
        .task("sequential", "task:sequential")
        .task("parallel", "task:parallel")
        .task("condition", "task:condition")
        .type_def("isset", "type:isset")
        .type_def("equals", "type:equals")
        .converter("converter:boolean")
        .converter("converter:message-level")
        .aspect("aspect:failure-policy")
}

/// Implementations of every `keel.core` descriptor.
pub fn core_loader() -> StaticLoader {
    StaticLoader::new()
        .with_class(CORE_LIBRARY, "task:property", tasks::property_class())
        .with_class(CORE_LIBRARY, "task:echo", tasks::echo_class())
        .with_class(CORE_LIBRARY, "task:fail", tasks::fail_class())
        .with_class(CORE_LIBRARY, "task:import", tasks::import_class())
        .with_class(CORE_LIBRARY, "task:ref", tasks::ref_class())
        .with_class(CORE_LIBRARY, "task:call", tasks::call_class())
        .with_class(CORE_LIBRARY, "task:sequential", tasks::sequential_class())
        .with_class(CORE_LIBRARY, "task:parallel", tasks::parallel_class())
        .with_class(CORE_LIBRARY, "task:condition", tasks::condition_class())
        .with_class(CORE_LIBRARY, "type:isset", conditions::isset_class())
        .with_class(CORE_LIBRARY, "type:equals", conditions::equals_class())
        .with_converter(CORE_LIBRARY, "converter:boolean", || {
            Ok(Arc::new(converters::BooleanConverter))
        })
        .with_converter(CORE_LIBRARY, "converter:message-level", || {
            Ok(Arc::new(converters::MessageLevelConverter))
        })
        .with_aspect(CORE_LIBRARY, "aspect:failure-policy", || {
            Ok(Arc::new(aspects::FailurePolicy))
        })
}

/// A library manager holding `keel.core` plus `extra` libraries served by
/// `loader` (merged with the core loader).
pub fn library_manager_with(
    extra: impl IntoIterator<Item = ComponentLibrary>,
    loader: StaticLoader,
) -> Result<LibraryManager, ImportError> {
    let mut manager = LibraryManager::new(Arc::new(core_loader().merge(loader)));
    manager.register_all(std::iter::once(core_library()).chain(extra))?;
    Ok(manager)
}

/// A library manager holding only `keel.core`.
pub fn library_manager() -> Result<LibraryManager, ImportError> {
    library_manager_with(Vec::new(), StaticLoader::new())
}
