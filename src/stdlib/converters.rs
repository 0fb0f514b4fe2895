//! Converters shipped with `keel.core`.

use std::path::Path;

use crate::component::convert::{Converter, TypeKey, ValueType};
use crate::execution::events::MessageLevel;
use crate::property::Value;

crate::opaque_attribute_value!(MessageLevel);

/// Parse the boolean spellings used in build files.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `true`/`yes`/`on` and `false`/`no`/`off`, in any case.
pub struct BooleanConverter;

impl Converter for BooleanConverter {
    fn types(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<bool>()]
    }

    fn convert(&self, text: &str, _target: &ValueType, _base_dir: &Path) -> Result<Value, String> {
        parse_bool(text)
            .map(Value::Bool)
            .ok_or_else(|| format!("`{}` is not a boolean (use true/yes/on or false/no/off)", text))
    }
}

pub struct MessageLevelConverter;

impl Converter for MessageLevelConverter {
    fn types(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<MessageLevel>()]
    }

    fn convert(&self, text: &str, _target: &ValueType, _base_dir: &Path) -> Result<Value, String> {
        text.parse::<MessageLevel>().map(Value::opaque)
    }
}
