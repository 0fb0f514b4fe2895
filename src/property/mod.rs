//! Property storage and `${...}` resolution.

pub mod resolver;
pub mod store;
pub mod value;

pub use resolver::{Fragment, Lookup, PropertyError, PropertyResolver, PropertySource};
pub use store::{DataValue, Priority, PropertyStore, WriteOutcome};
pub use value::Value;
