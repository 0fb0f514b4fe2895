//! Capability binding: applying attributes, text and nested elements to instances.
//!
//! A [`Binder`] is the resolved view of one [`ComponentClass`]: for every
//! attribute and nested element name exactly one declaration remains.
//! When a name is declared at several levels, the declaration nearest the
//! concrete type wins; between attribute setters at the same level, a
//! setter accepting a richer type wins over one accepting plain `String`.
//!
//! Binders are memoized per class by the [`CapabilityBinder`], which is
//! shared by every frame of a build.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::component::class::{
    AttributeDecl, ClassId, ComponentClass, ContainerFn, ElementDecl, NestedKind, TextDecl,
};
use crate::component::convert::{ConverterSet, TypeKey, ValueType};
use crate::component::{Component, ComponentHandle};
use crate::execution::task::Task;

/// Failures while configuring a component from its element.
#[derive(Debug, Clone, Error, MietteDiagnostic, PartialEq, Eq)]
pub enum BindingError {
    #[error("<{element}> does not support the `{attribute}` attribute")]
    #[diagnostic(code(keel::binding::unsupported_attribute))]
    UnsupportedAttribute { element: String, attribute: String },

    #[error("<{element}> does not support text content")]
    #[diagnostic(code(keel::binding::unsupported_text))]
    UnsupportedText { element: String },

    #[error("<{element}> does not support the <{nested}> nested element")]
    #[diagnostic(code(keel::binding::unsupported_element))]
    UnsupportedElement { element: String, nested: String },

    #[error("cannot convert `{value}` for attribute `{attribute}` of <{element}>: {reason}")]
    #[diagnostic(code(keel::binding::conversion))]
    Conversion {
        element: String,
        attribute: String,
        value: String,
        reason: String,
    },

    #[error("attribute `{attribute}` of <{element}> expects {expected}, which has no conversion from text")]
    #[diagnostic(
        code(keel::binding::no_conversion),
        help("import a library that provides a converter for this type")
    )]
    NoConversion {
        element: String,
        attribute: String,
        expected: String,
    },

    #[error("{source_kind} `{name}` is not compatible with the <{nested}> nested element of <{element}>")]
    #[diagnostic(code(keel::binding::type_mismatch))]
    TypeMismatch {
        element: String,
        nested: String,
        name: String,
        source_kind: &'static str,
    },

    #[error("no element can be created for nested element <{nested}> of <{element}>")]
    #[diagnostic(
        code(keel::binding::abstract_element),
        help("provide a value with keel:refid or name its type with keel:type")
    )]
    AbstractElement { element: String, nested: String },

    #[error("element <{nested}> is defined by reference and may not have attributes, nested elements or content")]
    #[diagnostic(code(keel::binding::reference_with_content))]
    ReferenceWithContent { nested: String },

    #[error("the keel:refid value `{refid}` is not defined")]
    #[diagnostic(code(keel::binding::undefined_reference))]
    UndefinedReference { refid: String },

    #[error("only one of keel:type and keel:refid may be given on <{nested}>")]
    #[diagnostic(code(keel::binding::conflicting_hints))]
    ConflictingHints { nested: String },

    #[error("<{element}> rejected {target}: {reason}")]
    #[diagnostic(code(keel::binding::rejected))]
    Rejected {
        element: String,
        target: String,
        reason: String,
    },
}

/// The resolved capabilities of one class.
pub struct Binder {
    class: Arc<ComponentClass>,
    attributes: HashMap<String, AttributeDecl>,
    elements: HashMap<String, ElementDecl>,
    text: Option<TextDecl>,
    container: Option<ContainerFn>,
}

impl Binder {
    pub fn new(class: &Arc<ComponentClass>) -> Self {
        let mut attributes: HashMap<String, AttributeDecl> = HashMap::new();
        for decl in &class.attributes {
            let replace = match attributes.get(&decl.name) {
                None => true,
                Some(current) if current.depth < decl.depth => false,
                Some(current) if current.depth == decl.depth => {
                    current.value_type.is_string() && !decl.value_type.is_string()
                }
                Some(_) => true,
            };
            if replace {
                attributes.insert(decl.name.clone(), decl.clone());
            }
        }

        let mut elements: HashMap<String, ElementDecl> = HashMap::new();
        for decl in &class.elements {
            let replace = match elements.get(&decl.name) {
                None => true,
                Some(current) => current.depth > decl.depth,
            };
            if replace {
                elements.insert(decl.name.clone(), decl.clone());
            }
        }

        let text = class
            .texts
            .iter()
            .min_by_key(|decl| decl.depth)
            .cloned();

        Binder {
            class: Arc::clone(class),
            attributes,
            elements,
            text,
            container: class.container.as_ref().map(|(_, f)| Arc::clone(f)),
        }
    }

    pub fn class(&self) -> &Arc<ComponentClass> {
        &self.class
    }

    pub fn supports_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_lowercase())
    }

    /// The value type the winning setter for `name` accepts.
    pub fn attribute_type(&self, name: &str) -> Option<&ValueType> {
        self.attributes
            .get(&name.to_lowercase())
            .map(|decl| &decl.value_type)
    }

    /// Convert `text` and apply it to the attribute `name`.
    pub fn set_attribute(
        &self,
        instance: &mut dyn Any,
        name: &str,
        text: &str,
        converters: &ConverterSet,
        base_dir: &Path,
    ) -> Result<(), BindingError> {
        let decl = self.attributes.get(&name.to_lowercase()).ok_or_else(|| {
            BindingError::UnsupportedAttribute {
                element: self.class.name().to_string(),
                attribute: name.to_string(),
            }
        })?;

        let value = match converters.convert(text, &decl.value_type, base_dir) {
            Some(Ok(value)) => value,
            Some(Err(reason)) => {
                return Err(BindingError::Conversion {
                    element: self.class.name().to_string(),
                    attribute: name.to_string(),
                    value: text.to_string(),
                    reason,
                })
            }
            None => {
                return Err(BindingError::NoConversion {
                    element: self.class.name().to_string(),
                    attribute: name.to_string(),
                    expected: decl.value_type.key.to_string(),
                })
            }
        };

        (decl.setter)(instance, value).map_err(|reason| BindingError::Rejected {
            element: self.class.name().to_string(),
            target: format!("attribute `{}`", name),
            reason,
        })
    }

    pub fn supports_text(&self) -> bool {
        self.text.is_some()
    }

    pub fn add_text(&self, instance: &mut dyn Any, text: &str) -> Result<(), BindingError> {
        let decl = self
            .text
            .as_ref()
            .ok_or_else(|| BindingError::UnsupportedText {
                element: self.class.name().to_string(),
            })?;
        (decl.adder)(instance, text.to_string()).map_err(|reason| BindingError::Rejected {
            element: self.class.name().to_string(),
            target: "text".to_string(),
            reason,
        })
    }

    pub fn supports_nested_element(&self, name: &str) -> bool {
        self.elements.contains_key(&name.to_lowercase())
    }

    /// The declaration for nested element `name`.
    pub fn nested(&self, name: &str) -> Result<&ElementDecl, BindingError> {
        self.elements
            .get(&name.to_lowercase())
            .ok_or_else(|| self.unsupported_element(name))
    }

    /// The type expected by an adder-style nested element.
    pub fn nested_type(&self, name: &str) -> Option<TypeKey> {
        match &self.elements.get(&name.to_lowercase())?.kind {
            NestedKind::Adder { expected, .. } => Some(*expected),
            NestedKind::Creator { class, .. } => Some(class.key()),
        }
    }

    /// Hand a configured child to the parent.
    pub fn add_element(
        &self,
        instance: &mut dyn Any,
        name: &str,
        child: ComponentHandle,
    ) -> Result<(), BindingError> {
        match &self.nested(name)?.kind {
            NestedKind::Adder { expected, adder, .. } => {
                if !child.is_assignable_to(*expected) {
                    return Err(BindingError::TypeMismatch {
                        element: self.class.name().to_string(),
                        nested: name.to_string(),
                        name: child.class().name().to_string(),
                        source_kind: "type",
                    });
                }
                adder(instance, child).map_err(|reason| BindingError::Rejected {
                    element: self.class.name().to_string(),
                    target: format!("nested element <{}>", name),
                    reason,
                })
            }
            NestedKind::Creator { .. } => Err(self.unsupported_element(name)),
        }
    }

    /// Have the parent create the child in place.
    ///
    /// Returns the new child and the class it is configured through.
    pub fn create_element<'a>(
        &self,
        instance: &'a mut dyn Any,
        name: &str,
    ) -> Result<(&'a mut dyn Component, Arc<ComponentClass>), BindingError> {
        match &self.nested(name)?.kind {
            NestedKind::Creator { class, create } => {
                let child = create(instance).ok_or_else(|| BindingError::Rejected {
                    element: self.class.name().to_string(),
                    target: format!("nested element <{}>", name),
                    reason: "the parent could not create it".to_string(),
                })?;
                Ok((child, Arc::clone(class)))
            }
            NestedKind::Adder { .. } => Err(self.unsupported_element(name)),
        }
    }

    pub fn is_container(&self) -> bool {
        self.container.is_some()
    }

    /// Hand a nested task to a task container.
    pub fn add_task(&self, instance: &mut dyn Any, task: Task) -> Result<(), BindingError> {
        let name = task.name().to_string();
        let container = self
            .container
            .as_ref()
            .ok_or_else(|| self.unsupported_element(&name))?;
        container(instance, task).map_err(|reason| BindingError::Rejected {
            element: self.class.name().to_string(),
            target: format!("nested task <{}>", name),
            reason,
        })
    }

    fn unsupported_element(&self, name: &str) -> BindingError {
        BindingError::UnsupportedElement {
            element: self.class.name().to_string(),
            nested: name.to_string(),
        }
    }
}

/// Memoizing binder factory.
#[derive(Default)]
pub struct CapabilityBinder {
    cache: DashMap<ClassId, Arc<Binder>>,
}

impl CapabilityBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The binder for `class`, built on first use.
    pub fn bind(&self, class: &Arc<ComponentClass>) -> Arc<Binder> {
        if let Some(binder) = self.cache.get(&class.id()) {
            return Arc::clone(&binder);
        }
        let binder = Arc::new(Binder::new(class));
        Arc::clone(self.cache.entry(class.id()).or_insert(binder).value())
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
