//! Values held in property stores and passed to component setters.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::component::ComponentHandle;

/// A data value.
///
/// Build scripts only ever write text; richer variants come from converters
/// and from components that store values programmatically.
#[derive(Clone)]
pub enum Value {
    Text(String),
    Bool(bool),
    Integer(i64),
    Path(PathBuf),
    /// A live type instance (stored under its `keel:id`)
    Component(ComponentHandle),
    /// Any other converted value
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wrap an arbitrary value.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Arc::new(value))
    }

    /// The text of a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The handle of a `Component` value.
    pub fn as_component(&self) -> Option<&ComponentHandle> {
        match self {
            Value::Component(handle) => Some(handle),
            _ => None,
        }
    }

    /// Downcast an `Opaque` value.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(any) => any.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Path(_) => "path",
            Value::Component(_) => "component",
            Value::Opaque(_) => "opaque value",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::Component(handle) => f.write_str(&handle.describe()),
            Value::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Integer(i) => f.debug_tuple("Integer").field(i).finish(),
            Value::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Value::Component(handle) => f.debug_tuple("Component").field(&handle.describe()).finish(),
            Value::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::Path(p)
    }
}

impl From<ComponentHandle> for Value {
    fn from(handle: ComponentHandle) -> Self {
        Value::Component(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::from(42i64).to_string(), "42");
        assert_eq!(Value::opaque(1u8).to_string(), "<opaque>");
    }

    #[test]
    fn test_downcast() {
        let value = Value::opaque(7u32);
        assert_eq!(value.downcast_ref::<u32>(), Some(&7));
        assert_eq!(value.downcast_ref::<u64>(), None);
        assert_eq!(Value::from("x").downcast_ref::<u32>(), None);
    }
}
