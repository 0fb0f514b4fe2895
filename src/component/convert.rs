//! Attribute value types and string conversion.
//!
//! Attribute setters declare the type they accept as a [`ValueType`]. The
//! binder converts the resolved attribute text into a [`Value`] by trying,
//! in order:
//! 1. a converter registered for the exact type
//! 2. the text itself, when the accepted type is `String`
//! 3. the type's own string constructor (`ValueType::parse`)
//! 4. a converter for a supertype that accepts subtypes

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::property::Value;

/// Identity of a Rust type (including `dyn Trait` capabilities).
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Unqualified type name (`Vec<alloc::string::String>` becomes `Vec<String>`).
    pub fn short_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut segment = String::new();
        for ch in self.name.chars() {
            match ch {
                ':' => segment.clear(),
                '<' | '>' | ',' | ' ' | '(' | ')' | '&' | '[' | ']' | ';' => {
                    out.push_str(&segment);
                    segment.clear();
                    out.push(ch);
                }
                _ => segment.push(ch),
            }
        }
        out.push_str(&segment);
        out
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.short_name())
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

/// The type an attribute setter accepts.
#[derive(Debug, Clone)]
pub struct ValueType {
    pub key: TypeKey,
    /// Types this one can stand in for, nearest first
    pub supertypes: Vec<TypeKey>,
    /// String constructor, if the type has one
    pub parse: Option<fn(&str) -> Result<Value, String>>,
}

impl ValueType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        ValueType {
            key: TypeKey::of::<T>(),
            supertypes: Vec::new(),
            parse: None,
        }
    }

    pub fn with_parse(mut self, parse: fn(&str) -> Result<Value, String>) -> Self {
        self.parse = Some(parse);
        self
    }

    pub fn with_supertype<S: ?Sized + 'static>(mut self) -> Self {
        self.supertypes.push(TypeKey::of::<S>());
        self
    }

    pub fn is_string(&self) -> bool {
        self.key == TypeKey::of::<String>()
    }
}

/// A Rust type usable as an attribute value.
pub trait AttributeValue: Sized + Send + 'static {
    fn value_type() -> ValueType;

    /// Extract the typed value from a converted value.
    fn from_value(value: Value) -> Option<Self>;
}

impl AttributeValue for String {
    fn value_type() -> ValueType {
        ValueType::of::<String>()
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

impl AttributeValue for bool {
    fn value_type() -> ValueType {
        ValueType::of::<bool>().with_parse(|s| {
            s.trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|e| e.to_string())
        })
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl AttributeValue for i64 {
    fn value_type() -> ValueType {
        ValueType::of::<i64>().with_parse(|s| {
            s.trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| e.to_string())
        })
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }
}

impl AttributeValue for PathBuf {
    fn value_type() -> ValueType {
        ValueType::of::<PathBuf>().with_parse(|s| Ok(Value::Path(PathBuf::from(s))))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Path(p) => Some(p),
            Value::Text(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }
}

/// Implement [`AttributeValue`] for a type that converters produce as an
/// opaque value. The type needs `Clone`.
#[macro_export]
macro_rules! opaque_attribute_value {
    ($ty:ty) => {
        impl $crate::component::convert::AttributeValue for $ty {
            fn value_type() -> $crate::component::convert::ValueType {
                $crate::component::convert::ValueType::of::<$ty>()
            }

            fn from_value(value: $crate::property::Value) -> Option<Self> {
                value.downcast_ref::<$ty>().cloned()
            }
        }
    };
}

/// Converts attribute text into values of the types it declares.
pub trait Converter: Send + Sync {
    /// Types this converter produces.
    fn types(&self) -> Vec<TypeKey>;

    /// Convert `text` into a value of `target`. Relative paths resolve
    /// against `base_dir`.
    fn convert(&self, text: &str, target: &ValueType, base_dir: &Path) -> Result<Value, String>;

    /// Whether this converter can also produce a subtype of one of its types.
    fn can_convert_subtype(&self, _target: &ValueType) -> bool {
        false
    }
}

/// Converters keyed by the type they produce.
///
/// Sets are frame-scoped snapshots: adding a converter makes a new set.
#[derive(Clone, Default)]
pub struct ConverterSet {
    converters: Arc<HashMap<TypeKey, Arc<dyn Converter>>>,
}

impl ConverterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this set with `converter` registered for all its types.
    pub fn with(&self, converter: Arc<dyn Converter>) -> Self {
        let mut converters = (*self.converters).clone();
        for key in converter.types() {
            converters.insert(key, Arc::clone(&converter));
        }
        ConverterSet {
            converters: Arc::new(converters),
        }
    }

    pub fn get(&self, key: TypeKey) -> Option<&Arc<dyn Converter>> {
        self.converters.get(&key)
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Convert `text` to `target` following the conversion order.
    ///
    /// Returns `None` when no conversion path exists for the type.
    pub fn convert(
        &self,
        text: &str,
        target: &ValueType,
        base_dir: &Path,
    ) -> Option<Result<Value, String>> {
        if let Some(converter) = self.converters.get(&target.key) {
            return Some(converter.convert(text, target, base_dir));
        }
        if target.is_string() {
            return Some(Ok(Value::Text(text.to_string())));
        }
        if let Some(parse) = target.parse {
            return Some(parse(text));
        }
        for supertype in &target.supertypes {
            if let Some(converter) = self.converters.get(supertype) {
                if converter.can_convert_subtype(target) {
                    return Some(converter.convert(text, target, base_dir));
                }
            }
        }
        None
    }
}

impl fmt::Debug for ConverterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.converters.keys()).finish()
    }
}

/// Downcast helper for converters producing opaque values.
pub fn opaque<T: Any + Send + Sync>(value: T) -> Value {
    Value::opaque(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct YesNo;

    impl Converter for YesNo {
        fn types(&self) -> Vec<TypeKey> {
            vec![TypeKey::of::<bool>()]
        }

        fn convert(&self, text: &str, _target: &ValueType, _base: &Path) -> Result<Value, String> {
            match text {
                "yes" => Ok(Value::Bool(true)),
                "no" => Ok(Value::Bool(false)),
                other => Err(format!("`{}` is not yes/no", other)),
            }
        }
    }

    trait Shape {}

    #[derive(Debug, Clone, PartialEq)]
    struct Circle(i64);

    struct ShapeConverter {
        subtypes: bool,
    }

    impl Converter for ShapeConverter {
        fn types(&self) -> Vec<TypeKey> {
            vec![TypeKey::of::<dyn Shape>()]
        }

        fn convert(&self, text: &str, _target: &ValueType, _base: &Path) -> Result<Value, String> {
            let radius = text.parse::<i64>().map_err(|e| e.to_string())?;
            Ok(opaque(Circle(radius)))
        }

        fn can_convert_subtype(&self, _target: &ValueType) -> bool {
            self.subtypes
        }
    }

    #[test]
    fn test_exact_converter_takes_precedence() {
        let set = ConverterSet::new().with(Arc::new(YesNo));
        let base = Path::new(".");
        let value = set.convert("yes", &bool::value_type(), base).unwrap().unwrap();
        assert!(matches!(value, Value::Bool(true)));

        let without = ConverterSet::new();
        assert!(without.convert("yes", &bool::value_type(), base).unwrap().is_err());
        assert!(matches!(
            without.convert("true", &bool::value_type(), base).unwrap(),
            Ok(Value::Bool(true))
        ));
    }

    #[test]
    fn test_string_passthrough() {
        let set = ConverterSet::new();
        let value = set
            .convert("${not resolved here}", &String::value_type(), Path::new("."))
            .unwrap()
            .unwrap();
        assert_eq!(value.as_text(), Some("${not resolved here}"));
    }

    #[test]
    fn test_supertype_converter_requires_opt_in() {
        let circle = ValueType::of::<Circle>().with_supertype::<dyn Shape>();
        let base = Path::new(".");

        let refusing = ConverterSet::new().with(Arc::new(ShapeConverter { subtypes: false }));
        assert!(refusing.convert("3", &circle, base).is_none());

        let accepting = ConverterSet::new().with(Arc::new(ShapeConverter { subtypes: true }));
        let value = accepting.convert("3", &circle, base).unwrap().unwrap();
        assert_eq!(value.downcast_ref::<Circle>(), Some(&Circle(3)));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(TypeKey::of::<String>().short_name(), "String");
        assert_eq!(TypeKey::of::<Vec<String>>().short_name(), "Vec<String>");
    }

    #[test]
    fn test_sets_are_snapshots() {
        let empty = ConverterSet::new();
        let with = empty.with(Arc::new(YesNo));
        assert!(empty.is_empty());
        assert_eq!(with.len(), 1);
    }
}
