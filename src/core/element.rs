//! Declarative build elements.
//!
//! A [`BuildElement`] is one node of the parsed model: an element type name,
//! its literal (not yet property-resolved) attributes, nested elements and
//! text content. Attributes qualified with a namespace prefix (`keel:id`)
//! are kept apart as *aspect values*; they configure the engine and the
//! aspects, never the component itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::location::Location;

/// Namespace used by the engine's own aspect attributes.
pub const KEEL_NAMESPACE: &str = "keel";

/// Aspect attribute naming the id under which a type instance is stored.
pub const ID_ATTRIBUTE: &str = "id";

/// Aspect attribute naming the concrete type of a polymorphic nested element.
pub const TYPE_ATTRIBUTE: &str = "type";

/// Aspect attribute referencing an existing instance by id.
pub const REFID_ATTRIBUTE: &str = "refid";

/// Attribute values grouped by namespace.
pub type AspectValues = BTreeMap<String, BTreeMap<String, String>>;

/// A node of the declarative build model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildElement {
    /// Element type name (`echo`, `property`, ...)
    #[serde(rename = "element")]
    pub kind: String,

    /// Plain attributes, pre-substitution
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Namespaced attributes (`keel:id` is stored as `aspects["keel"]["id"]`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aspects: AspectValues,

    /// Nested elements in declaration order
    #[serde(default, rename = "nested", skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BuildElement>,

    /// Text content
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    /// Where the element was declared
    #[serde(skip)]
    pub location: Location,
}

impl BuildElement {
    /// Create an element with no attributes or content.
    pub fn new(kind: impl Into<String>) -> Self {
        BuildElement {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Add an attribute. A `ns:name` key is stored as an aspect value.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Add a namespaced aspect value.
    pub fn with_aspect(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.aspects
            .entry(namespace.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Append a nested element.
    pub fn with_child(mut self, child: BuildElement) -> Self {
        self.children.push(child);
        self
    }

    /// Set the text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the declaring location.
    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Set an attribute in place, splitting namespaced keys into aspects.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match name.split_once(':') {
            Some((namespace, local)) if !namespace.is_empty() && !local.is_empty() => {
                self.aspects
                    .entry(namespace.to_string())
                    .or_default()
                    .insert(local.to_string(), value.into());
            }
            _ => {
                self.attributes.insert(name, value.into());
            }
        }
    }

    /// Get a plain attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Get an aspect value.
    pub fn aspect(&self, namespace: &str, name: &str) -> Option<&str> {
        self.aspects
            .get(namespace)
            .and_then(|values| values.get(name))
            .map(String::as_str)
    }

    /// Get one of the engine's own `keel:*` values.
    pub fn keel_aspect(&self, name: &str) -> Option<&str> {
        self.aspect(KEEL_NAMESPACE, name)
    }

    /// True if the element carries nothing but its name and aspect values.
    pub fn is_bare(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty() && self.text.trim().is_empty()
    }

    /// Move namespaced keys out of `attributes` into `aspects`.
    ///
    /// Deserialized elements keep every key in `attributes`; this restores
    /// the split recursively.
    pub fn normalize(&mut self) {
        let qualified: Vec<String> = self
            .attributes
            .keys()
            .filter(|k| k.contains(':'))
            .cloned()
            .collect();
        for key in qualified {
            if let Some(value) = self.attributes.remove(&key) {
                self.set_attribute(key, value);
            }
        }
        for child in &mut self.children {
            child.normalize();
        }
    }
}
