//! Component classes: explicit capability tables.
//!
//! A [`ComponentClass`] describes everything the engine may do to an
//! instance of one Rust type: which attributes it accepts (and as which
//! value type), whether it takes text, which nested elements it supports
//! and how, whether it is a task container, and which capabilities
//! (`dyn Trait` views) it implements.
//!
//! Classes are declared once with a [`ClassBuilder`]:
//!
//! ```ignore
//! let class = ComponentClass::component::<Echo>("echo")
//!     .attribute("message", |echo: &mut Echo, message: String| echo.message = message)
//!     .text(|echo: &mut Echo, text| echo.message.push_str(&text))
//!     .build();
//! ```
//!
//! A class may extend another class whose type it embeds; the inherited
//! declarations sit one level further from the concrete type, which the
//! binder uses to settle conflicts.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::component::convert::{AttributeValue, TypeKey, ValueType};
use crate::component::{Component, ComponentHandle};
use crate::execution::task::Task;
use crate::property::Value;

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a class declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

pub(crate) type SetterFn = Arc<dyn Fn(&mut dyn Any, Value) -> Result<(), String> + Send + Sync>;
pub(crate) type TextFn = Arc<dyn Fn(&mut dyn Any, String) -> Result<(), String> + Send + Sync>;
pub(crate) type AdderFn =
    Arc<dyn Fn(&mut dyn Any, ComponentHandle) -> Result<(), String> + Send + Sync>;
pub(crate) type CreatorFn =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Component> + Send + Sync>;
pub(crate) type ContainerFn = Arc<dyn Fn(&mut dyn Any, Task) -> Result<(), String> + Send + Sync>;
type ConstructorFn = Arc<dyn Fn() -> Result<Box<dyn Component>, String> + Send + Sync>;
type BaseProjection = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;
type Projection<C> = Box<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a C> + Send + Sync>;

fn creator_fn<F>(f: F) -> CreatorFn
where
    F: for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Component> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn base_projection<F>(f: F) -> BaseProjection
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn projection<C: ?Sized + 'static, F>(f: F) -> Projection<C>
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a C> + Send + Sync + 'static,
{
    Box::new(f)
}

/// A settable attribute.
#[derive(Clone)]
pub struct AttributeDecl {
    pub name: String,
    pub value_type: ValueType,
    /// Distance from the concrete type (0 = declared on the type itself)
    pub depth: u32,
    pub(crate) setter: SetterFn,
}

/// Text content support.
#[derive(Clone)]
pub struct TextDecl {
    pub depth: u32,
    pub(crate) adder: TextFn,
}

/// How a nested element is obtained.
#[derive(Clone)]
pub enum NestedKind {
    /// The engine builds the child and hands it over.
    Adder {
        expected: TypeKey,
        /// Class constructed when no type hint or reference is given
        class: Option<Arc<ComponentClass>>,
        adder: AdderFn,
    },
    /// The parent creates the child in place; the engine configures it.
    Creator {
        class: Arc<ComponentClass>,
        create: CreatorFn,
    },
}

/// A supported nested element.
#[derive(Clone)]
pub struct ElementDecl {
    pub name: String,
    pub depth: u32,
    pub kind: NestedKind,
}

/// A declared component type.
pub struct ComponentClass {
    id: ClassId,
    key: TypeKey,
    name: String,
    implements: Vec<TypeKey>,
    projections: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    bases: Vec<(Arc<ComponentClass>, BaseProjection)>,
    pub(crate) attributes: Vec<AttributeDecl>,
    pub(crate) texts: Vec<TextDecl>,
    pub(crate) elements: Vec<ElementDecl>,
    pub(crate) container: Option<(u32, ContainerFn)>,
    constructor: Option<ConstructorFn>,
}

impl ComponentClass {
    /// Start declaring a class for `T`. Without a constructor the class is abstract.
    pub fn builder<T: Any + Send>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder {
            class: ComponentClass {
                id: ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed)),
                key: TypeKey::of::<T>(),
                name: name.into(),
                implements: Vec::new(),
                projections: HashMap::new(),
                bases: Vec::new(),
                attributes: Vec::new(),
                texts: Vec::new(),
                elements: Vec::new(),
                container: None,
                constructor: None,
            },
            _marker: PhantomData,
        }
    }

    /// Start declaring a constructible component class.
    pub fn component<T: Component + Default>(name: impl Into<String>) -> ClassBuilder<T> {
        Self::builder::<T>(name).constructor(|| Ok(T::default()))
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether instances can be constructed directly.
    pub fn is_constructible(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn is_container(&self) -> bool {
        self.container.is_some()
    }

    /// Construct a fresh instance.
    pub fn instantiate(&self) -> Result<Box<dyn Component>, String> {
        match &self.constructor {
            Some(constructor) => constructor(),
            None => Err(format!("<{}> is abstract and cannot be constructed", self.name)),
        }
    }

    /// Whether an instance may be used where `key` is expected.
    pub fn is_assignable_to(&self, key: TypeKey) -> bool {
        self.key == key
            || self.implements.contains(&key)
            || self.bases.iter().any(|(base, _)| base.is_assignable_to(key))
    }

    /// View an instance through capability `C`.
    pub fn project<'a, C: ?Sized + 'static>(&self, instance: &'a dyn Any) -> Option<&'a C> {
        if let Some(projection) = self
            .projections
            .get(&TypeId::of::<C>())
            .and_then(|p| p.downcast_ref::<Projection<C>>())
        {
            return projection(instance);
        }
        self.bases.iter().find_map(|(base, to_base)| {
            let embedded = to_base(instance)?;
            base.project::<C>(embedded)
        })
    }

    /// All declared attributes, including inherited ones.
    pub fn attributes(&self) -> &[AttributeDecl] {
        &self.attributes
    }

    /// All declared nested elements, including inherited ones.
    pub fn elements(&self) -> &[ElementDecl] {
        &self.elements
    }
}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("attributes", &self.attributes.iter().map(|a| &a.name).collect::<Vec<_>>())
            .field("elements", &self.elements.iter().map(|e| &e.name).collect::<Vec<_>>())
            .field("container", &self.container.is_some())
            .finish()
    }
}

/// Declares a [`ComponentClass`] for `T`.
pub struct ClassBuilder<T> {
    class: ComponentClass,
    _marker: PhantomData<fn(T)>,
}

impl<T: Any + Send> ClassBuilder<T> {
    /// Set how instances are constructed.
    pub fn constructor<C: Component>(
        mut self,
        constructor: impl Fn() -> Result<C, String> + Send + Sync + 'static,
    ) -> Self {
        self.class.constructor = Some(Arc::new(move || {
            constructor().map(|c| Box::new(c) as Box<dyn Component>)
        }));
        self
    }

    /// Declare an attribute accepting values of type `A`.
    pub fn attribute<A: AttributeValue>(
        mut self,
        name: &str,
        setter: impl Fn(&mut T, A) + Send + Sync + 'static,
    ) -> Self {
        let value_type = A::value_type();
        let expected = value_type.key;
        self.class.attributes.push(AttributeDecl {
            name: name.to_lowercase(),
            value_type,
            depth: 0,
            setter: Arc::new(move |instance: &mut dyn Any, value: Value| {
                let target = downcast::<T>(instance)?;
                let kind = value.kind();
                let typed = A::from_value(value)
                    .ok_or_else(|| format!("expected {} but the value is a {}", expected, kind))?;
                setter(target, typed);
                Ok(())
            }),
        });
        self
    }

    /// Declare text content support.
    pub fn text(mut self, adder: impl Fn(&mut T, String) + Send + Sync + 'static) -> Self {
        self.class.texts.push(TextDecl {
            depth: 0,
            adder: Arc::new(move |instance: &mut dyn Any, text: String| {
                adder(downcast::<T>(instance)?, text);
                Ok(())
            }),
        });
        self
    }

    /// Declare a nested element of a concrete class, built by the engine.
    pub fn element(
        mut self,
        name: &str,
        class: &Arc<ComponentClass>,
        adder: impl Fn(&mut T, ComponentHandle) + Send + Sync + 'static,
    ) -> Self {
        self.class.elements.push(ElementDecl {
            name: name.to_lowercase(),
            depth: 0,
            kind: NestedKind::Adder {
                expected: class.key(),
                class: Some(Arc::clone(class)),
                adder: Self::adder_fn(adder),
            },
        });
        self
    }

    /// Declare a polymorphic nested element accepting anything assignable to `C`.
    ///
    /// The element must name its concrete type (`keel:type`) or reference an
    /// existing instance (`keel:refid`).
    pub fn abstract_element<C: ?Sized + 'static>(
        mut self,
        name: &str,
        adder: impl Fn(&mut T, ComponentHandle) + Send + Sync + 'static,
    ) -> Self {
        self.class.elements.push(ElementDecl {
            name: name.to_lowercase(),
            depth: 0,
            kind: NestedKind::Adder {
                expected: TypeKey::of::<C>(),
                class: None,
                adder: Self::adder_fn(adder),
            },
        });
        self
    }

    /// Declare a nested element the parent creates itself.
    pub fn creator<C: Component>(
        mut self,
        name: &str,
        class: &Arc<ComponentClass>,
        create: fn(&mut T) -> &mut C,
    ) -> Self {
        self.class.elements.push(ElementDecl {
            name: name.to_lowercase(),
            depth: 0,
            kind: NestedKind::Creator {
                class: Arc::clone(class),
                create: creator_fn(move |instance: &mut dyn Any| {
                    instance
                        .downcast_mut::<T>()
                        .map(|parent| create(parent) as &mut dyn Component)
                }),
            },
        });
        self
    }

    /// Make the class a task container.
    pub fn container(mut self, add_task: impl Fn(&mut T, Task) + Send + Sync + 'static) -> Self {
        self.class.container = Some((
            0,
            Arc::new(move |instance: &mut dyn Any, task: Task| {
                add_task(downcast::<T>(instance)?, task);
                Ok(())
            }),
        ));
        self
    }

    /// Declare that instances can be viewed as `C`.
    pub fn implements<C: ?Sized + 'static>(mut self, view: fn(&T) -> &C) -> Self {
        self.class.implements.push(TypeKey::of::<C>());
        let project: Projection<C> = projection(move |instance: &dyn Any| {
            instance.downcast_ref::<T>().map(view)
        });
        self.class
            .projections
            .insert(TypeId::of::<C>(), Box::new(project));
        self
    }

    /// Inherit every declaration of `base`, whose type `T` embeds.
    pub fn extends<B: Any>(
        mut self,
        base: &Arc<ComponentClass>,
        view: fn(&T) -> &B,
        view_mut: fn(&mut T) -> &mut B,
    ) -> Self {
        for attribute in &base.attributes {
            let inner = Arc::clone(&attribute.setter);
            self.class.attributes.push(AttributeDecl {
                name: attribute.name.clone(),
                value_type: attribute.value_type.clone(),
                depth: attribute.depth + 1,
                setter: Arc::new(move |instance: &mut dyn Any, value: Value| {
                    inner(rebase(instance, view_mut)?, value)
                }),
            });
        }

        for text in &base.texts {
            let inner = Arc::clone(&text.adder);
            self.class.texts.push(TextDecl {
                depth: text.depth + 1,
                adder: Arc::new(move |instance: &mut dyn Any, text: String| {
                    inner(rebase(instance, view_mut)?, text)
                }),
            });
        }

        for element in &base.elements {
            let kind = match &element.kind {
                NestedKind::Adder {
                    expected,
                    class,
                    adder,
                } => {
                    let inner = Arc::clone(adder);
                    NestedKind::Adder {
                        expected: *expected,
                        class: class.clone(),
                        adder: Arc::new(move |instance: &mut dyn Any, child: ComponentHandle| {
                            inner(rebase(instance, view_mut)?, child)
                        }),
                    }
                }
                NestedKind::Creator { class, create } => {
                    let inner = Arc::clone(create);
                    NestedKind::Creator {
                        class: Arc::clone(class),
                        create: creator_fn(move |instance: &mut dyn Any| {
                            let parent = instance.downcast_mut::<T>()?;
                            inner(view_mut(parent) as &mut dyn Any)
                        }),
                    }
                }
            };
            self.class.elements.push(ElementDecl {
                name: element.name.clone(),
                depth: element.depth + 1,
                kind,
            });
        }

        if self.class.container.is_none() {
            if let Some((depth, inner)) = &base.container {
                let inner = Arc::clone(inner);
                self.class.container = Some((
                    depth + 1,
                    Arc::new(move |instance: &mut dyn Any, task: Task| {
                        inner(rebase(instance, view_mut)?, task)
                    }),
                ));
            }
        }

        self.class.bases.push((
            Arc::clone(base),
            base_projection(move |instance: &dyn Any| {
                instance.downcast_ref::<T>().map(|t| view(t) as &dyn Any)
            }),
        ));
        self
    }

    pub fn build(self) -> Arc<ComponentClass> {
        Arc::new(self.class)
    }

    fn adder_fn(adder: impl Fn(&mut T, ComponentHandle) + Send + Sync + 'static) -> AdderFn {
        Arc::new(move |instance: &mut dyn Any, child: ComponentHandle| {
            adder(downcast::<T>(instance)?, child);
            Ok(())
        })
    }
}

fn rebase<T: Any, B: Any>(
    instance: &mut dyn Any,
    view_mut: fn(&mut T) -> &mut B,
) -> Result<&mut dyn Any, String> {
    Ok(view_mut(downcast::<T>(instance)?) as &mut dyn Any)
}

fn downcast<T: Any>(instance: &mut dyn Any) -> Result<&mut T, String> {
    instance
        .downcast_mut::<T>()
        .ok_or_else(|| format!("instance is not a {}", TypeKey::of::<T>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named {
        fn label(&self) -> String;
    }

    #[derive(Default)]
    struct Base {
        label: String,
    }

    impl Component for Base {}

    impl Named for Base {
        fn label(&self) -> String {
            self.label.clone()
        }
    }

    #[derive(Default)]
    struct Derived {
        base: Base,
        count: i64,
    }

    impl Component for Derived {}

    fn base_class() -> Arc<ComponentClass> {
        ComponentClass::component::<Base>("base")
            .attribute("Label", |b: &mut Base, v: String| b.label = v)
            .implements::<dyn Named>(|b| b as &dyn Named)
            .build()
    }

    #[test]
    fn test_names_are_lowercased() {
        let class = base_class();
        assert_eq!(class.attributes()[0].name, "label");
    }

    #[test]
    fn test_extends_inherits_at_greater_depth() {
        let base = base_class();
        let derived = ComponentClass::component::<Derived>("derived")
            .attribute("count", |d: &mut Derived, v: i64| d.count = v)
            .extends::<Base>(&base, |d| &d.base, |d| &mut d.base)
            .build();

        let label = derived.attributes().iter().find(|a| a.name == "label").unwrap();
        assert_eq!(label.depth, 1);

        let mut instance = Derived::default();
        (label.setter)(&mut instance, Value::from("hello")).unwrap();
        assert_eq!(instance.base.label, "hello");
    }

    #[test]
    fn test_capabilities_through_bases() {
        let base = base_class();
        let derived = ComponentClass::component::<Derived>("derived")
            .extends::<Base>(&base, |d| &d.base, |d| &mut d.base)
            .build();

        assert!(derived.is_assignable_to(TypeKey::of::<dyn Named>()));
        assert!(derived.is_assignable_to(TypeKey::of::<Base>()));
        assert!(!base.is_assignable_to(TypeKey::of::<Derived>()));

        let mut instance = Derived::default();
        instance.base.label = "x".to_string();
        let named = derived.project::<dyn Named>(&instance).unwrap();
        assert_eq!(named.label(), "x");
    }

    #[test]
    fn test_abstract_class_cannot_be_instantiated() {
        let class = ComponentClass::builder::<Base>("abstract-base").build();
        assert!(!class.is_constructible());
        assert!(class.instantiate().is_err());
        assert!(base_class().instantiate().is_ok());
    }

    #[test]
    fn test_setter_rejects_wrong_value_kind() {
        let class = ComponentClass::component::<Derived>("derived")
            .attribute("count", |d: &mut Derived, v: i64| d.count = v)
            .build();
        let mut instance = Derived::default();
        let err = (class.attributes()[0].setter)(&mut instance, Value::from("ten")).unwrap_err();
        assert!(err.contains("i64"));
    }
}
