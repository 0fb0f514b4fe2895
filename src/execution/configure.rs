//! Creating components from build elements.
//!
//! A component is created from the import binding of its element name,
//! initialized with its [`ExecutionContext`], configured from the element
//! (attributes, text, nested elements) and validated. Property references
//! in attribute values and text are resolved at configuration time.

use std::any::Any;
use std::sync::Arc;

use crate::component::binder::{Binder, BindingError};
use crate::component::class::NestedKind;
use crate::component::library::{DefinitionKind, ImportError, LoadFailure};
use crate::component::registry::ImportBinding;
use crate::component::{ComponentClass, ComponentHandle};
use crate::core::element::{BuildElement, ID_ATTRIBUTE, REFID_ATTRIBUTE, TYPE_ATTRIBUTE};
use crate::core::location::Location;
use crate::execution::context::ExecutionContext;
use crate::execution::error::ExecutionError;
use crate::execution::events::MessageLevel;
use crate::execution::frame::Frame;
use crate::execution::task::Task;
use crate::property::{DataValue, Priority};

/// What [`Frame::create_component`] produced.
#[derive(Debug)]
pub enum Created {
    Task(Task),
    Type(ComponentHandle),
}

impl Created {
    pub fn into_task(self) -> Option<Task> {
        match self {
            Created::Task(task) => Some(task),
            Created::Type(_) => None,
        }
    }

    pub fn handle(&self) -> &ComponentHandle {
        match self {
            Created::Task(task) => task.handle(),
            Created::Type(handle) => handle,
        }
    }
}

impl Frame {
    /// Create the component bound to `name`, configured from `model`.
    ///
    /// Without a model the instance is only initialized and validated.
    pub fn create_component(
        &self,
        name: &str,
        model: Option<&BuildElement>,
    ) -> Result<Created, ExecutionError> {
        let location = model
            .map(|m| m.location.clone())
            .unwrap_or_else(Location::unknown);
        self.registry
            .resolve(name)
            .map_err(ExecutionError::from)
            .and_then(|binding| match binding.definition.kind {
                DefinitionKind::Task => self
                    .build_task(&binding, model, &location)
                    .map(Created::Task),
                DefinitionKind::Type => self
                    .build_type(&binding, model, &location)
                    .map(Created::Type),
            })
            .map_err(|e| e.with_location(&location))
    }

    /// Create the task `name` from `model`; `name` must be bound to a task.
    pub fn configure_task(&self, name: &str, model: &BuildElement) -> Result<Task, ExecutionError> {
        let binding = self.binding_of_kind(name, DefinitionKind::Task)?;
        self.build_task(&binding, Some(model), &model.location)
    }

    /// Create the type `name` from `model`; `name` must be bound to a type.
    pub fn configure_type(
        &self,
        name: &str,
        model: &BuildElement,
    ) -> Result<ComponentHandle, ExecutionError> {
        let binding = self.binding_of_kind(name, DefinitionKind::Type)?;
        self.build_type(&binding, Some(model), &model.location)
    }

    fn binding_of_kind(
        &self,
        name: &str,
        expected: DefinitionKind,
    ) -> Result<ImportBinding, ExecutionError> {
        let binding = self.registry.resolve(name)?;
        if binding.definition.kind != expected {
            return Err(ImportError::WrongKind {
                name: name.to_string(),
                expected,
            }
            .into());
        }
        Ok(binding)
    }

    fn build_task(
        &self,
        binding: &ImportBinding,
        model: Option<&BuildElement>,
        location: &Location,
    ) -> Result<Task, ExecutionError> {
        let (handle, ctx) = self.build_component(binding, model, location)?;
        let element = model
            .cloned()
            .unwrap_or_else(|| BuildElement::new(&binding.name).at(location.clone()));
        Ok(Task::new(
            &binding.name,
            self.project().name.clone(),
            handle,
            element,
            ctx,
        ))
    }

    fn build_type(
        &self,
        binding: &ImportBinding,
        model: Option<&BuildElement>,
        location: &Location,
    ) -> Result<ComponentHandle, ExecutionError> {
        let (handle, _) = self.build_component(binding, model, location)?;
        if let Some(model) = model {
            self.register_id(model, &handle)?;
        }
        Ok(handle)
    }

    fn build_component(
        &self,
        binding: &ImportBinding,
        model: Option<&BuildElement>,
        location: &Location,
    ) -> Result<(ComponentHandle, ExecutionContext), ExecutionError> {
        let class = self.registry.load_class(binding)?;
        let instance = class.instantiate().map_err(|reason| ImportError::Load {
            name: binding.name.clone(),
            library: binding.library.id().to_string(),
            failure: LoadFailure::Construction {
                descriptor: binding.definition.descriptor.clone(),
                reason,
            },
        })?;
        let handle = ComponentHandle::new(instance, class);
        let ctx = ExecutionContext::new(self.weak(), &binding.name, location.clone());
        handle.lock().init(&ctx, &binding.name)?;

        if let Some(model) = model {
            let aspects = self.registry.aspects();
            aspects.pre_create(&handle, model)?;
            {
                let mut guard = handle.lock();
                self.configure_element((**guard).as_any_mut(), handle.class(), model)?;
            }
            aspects.post_create(&handle, model)?;
        }

        handle.lock().validate()?;
        Ok((handle, ctx))
    }

    /// Store a type instance under its `keel:id`.
    fn register_id(&self, model: &BuildElement, handle: &ComponentHandle) -> Result<(), ExecutionError> {
        if let Some(id) = model.keel_aspect(ID_ATTRIBUTE) {
            let id = self.resolve(id)?;
            tracing::debug!("registering {} as `{}`", handle.describe(), id);
            self.set_data_value(&id, DataValue::new(handle.clone(), Priority::Base), true)?;
        }
        Ok(())
    }

    /// Apply attributes, text and nested elements of `model` to `instance`.
    pub(crate) fn configure_element(
        &self,
        instance: &mut dyn Any,
        class: &Arc<ComponentClass>,
        model: &BuildElement,
    ) -> Result<(), ExecutionError> {
        let binder = self.services().binder.bind(class);
        let converters = self.registry.converters();
        let base_dir = self.base_dir();

        for (attribute, raw) in &model.attributes {
            if !binder.supports_attribute(attribute) {
                return Err(BindingError::UnsupportedAttribute {
                    element: model.kind.clone(),
                    attribute: attribute.clone(),
                }
                .into());
            }
            let value = self.resolve(raw)?;
            binder.set_attribute(instance, attribute, &value, &converters, &base_dir)?;
        }

        let text = model.text.trim();
        if !text.is_empty() {
            if !binder.supports_text() {
                return Err(BindingError::UnsupportedText {
                    element: model.kind.clone(),
                }
                .into());
            }
            let text = self.resolve(text)?;
            binder.add_text(instance, &text)?;
        }

        for child in &model.children {
            self.configure_child(instance, &binder, model, child)
                .map_err(|e| e.with_location(&child.location))?;
        }
        Ok(())
    }

    fn configure_child(
        &self,
        instance: &mut dyn Any,
        binder: &Binder,
        parent: &BuildElement,
        child: &BuildElement,
    ) -> Result<(), ExecutionError> {
        if binder.is_container() && !binder.supports_nested_element(&child.kind) {
            let is_task = self
                .registry
                .binding(&child.kind)
                .is_some_and(|binding| binding.definition.is_task());
            if is_task {
                let task = self.configure_task(&child.kind, child)?;
                binder.add_task(instance, task)?;
                return Ok(());
            }
        }

        let decl = binder
            .nested(&child.kind)
            .map_err(|_| BindingError::UnsupportedElement {
                element: parent.kind.clone(),
                nested: child.kind.clone(),
            })?;
        match &decl.kind {
            NestedKind::Adder { class, .. } => {
                let default_class = class.clone();
                self.add_nested_element(instance, binder, parent, child, default_class)
            }
            NestedKind::Creator { .. } => self.create_nested_element(instance, binder, parent, child),
        }
    }

    /// Build the child (from its type hint, a reference, or the declared
    /// class) and hand it to the parent.
    fn add_nested_element(
        &self,
        instance: &mut dyn Any,
        binder: &Binder,
        parent: &BuildElement,
        child: &BuildElement,
        default_class: Option<Arc<ComponentClass>>,
    ) -> Result<(), ExecutionError> {
        let type_hint = child.keel_aspect(TYPE_ATTRIBUTE);
        let refid = child.keel_aspect(REFID_ATTRIBUTE);

        let handle = match (type_hint, refid) {
            (Some(_), Some(_)) => {
                return Err(BindingError::ConflictingHints {
                    nested: child.kind.clone(),
                }
                .into())
            }
            (Some(type_name), None) => {
                let type_name = self.resolve(type_name)?;
                self.configure_type(&type_name, child)?
            }
            (None, Some(refid)) => self.referenced_instance(binder, parent, child, refid)?,
            (None, None) => {
                let class = default_class
                    .filter(|class| class.is_constructible())
                    .ok_or_else(|| BindingError::AbstractElement {
                        element: parent.kind.clone(),
                        nested: child.kind.clone(),
                    })?;
                let nested = class.instantiate().map_err(|reason| BindingError::Rejected {
                    element: parent.kind.clone(),
                    target: format!("nested element <{}>", child.kind),
                    reason,
                })?;
                let handle = ComponentHandle::new(nested, class);
                let ctx = ExecutionContext::new(self.weak(), &child.kind, child.location.clone());
                {
                    let mut guard = handle.lock();
                    guard.init(&ctx, &child.kind)?;
                    self.configure_element((**guard).as_any_mut(), handle.class(), child)?;
                    guard.validate()?;
                }
                self.register_id(child, &handle)?;
                handle
            }
        };

        binder.add_element(instance, &child.kind, handle)?;
        Ok(())
    }

    fn referenced_instance(
        &self,
        binder: &Binder,
        parent: &BuildElement,
        child: &BuildElement,
        refid: &str,
    ) -> Result<ComponentHandle, ExecutionError> {
        if !child.is_bare() {
            return Err(BindingError::ReferenceWithContent {
                nested: child.kind.clone(),
            }
            .into());
        }
        let refid = self.resolve(refid)?;
        let value = self
            .get_value(&refid)
            .ok_or_else(|| BindingError::UndefinedReference {
                refid: refid.clone(),
            })?;
        let mismatch = || BindingError::TypeMismatch {
            element: parent.kind.clone(),
            nested: child.kind.clone(),
            name: refid.clone(),
            source_kind: "reference",
        };
        let handle = value.as_component().cloned().ok_or_else(mismatch)?;
        if let Some(expected) = binder.nested_type(&child.kind) {
            if !handle.is_assignable_to(expected) {
                return Err(mismatch().into());
            }
        }
        Ok(handle)
    }

    /// Let the parent create the child in place, then configure it.
    fn create_nested_element(
        &self,
        instance: &mut dyn Any,
        binder: &Binder,
        parent: &BuildElement,
        child: &BuildElement,
    ) -> Result<(), ExecutionError> {
        self.log(
            MessageLevel::Verbose,
            format!(
                "<{}> creates nested <{}> itself; create methods are deprecated in favour of adders",
                parent.kind, child.kind
            ),
        );
        let (nested, class) = binder.create_element(instance, &child.kind)?;
        let ctx = ExecutionContext::new(self.weak(), &child.kind, child.location.clone());
        nested.init(&ctx, &child.kind)?;
        self.configure_element(nested.as_any_mut(), &class, child)?;
        nested.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::library::{ComponentLibrary, LibraryManager, StaticLoader};
    use crate::component::Component;
    use crate::core::project::Project;
    use crate::execution::error::TaskError;
    use crate::execution::frame::{FrameServices, FrameSettings};
    use crate::property::PropertyStore;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Shape {
        sides: i64,
    }

    impl Component for Shape {}

    trait Named: Send {
        fn label(&self) -> String;
    }

    #[derive(Default)]
    struct Label {
        text: String,
    }

    impl Component for Label {}

    impl Named for Label {
        fn label(&self) -> String {
            self.text.clone()
        }
    }

    #[derive(Default)]
    struct Note {
        text: String,
    }

    impl Component for Note {
        fn validate(&mut self) -> Result<(), TaskError> {
            if self.text.is_empty() {
                return Err(TaskError::new("a note needs text"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Drawing {
        title: String,
        shapes: Vec<ComponentHandle>,
        labels: Vec<String>,
        note: Note,
        tasks: Vec<Task>,
    }

    impl Component for Drawing {}

    fn frame(dir: &TempDir) -> Arc<Frame> {
        let shape = ComponentClass::component::<Shape>("shape")
            .attribute("sides", |s: &mut Shape, sides: i64| s.sides = sides)
            .build();
        let label = ComponentClass::component::<Label>("label")
            .attribute("text", |l: &mut Label, text: String| l.text = text)
            .implements::<dyn Named>(|l| l as &dyn Named)
            .build();
        let note = ComponentClass::component::<Note>("note")
            .text(|n: &mut Note, text| n.text.push_str(&text))
            .build();
        let drawing = ComponentClass::component::<Drawing>("drawing")
            .attribute("title", |d: &mut Drawing, title: String| d.title = title)
            .element("shape", &shape, |d: &mut Drawing, child| d.shapes.push(child))
            .abstract_element::<dyn Named>("named", |d: &mut Drawing, child| {
                if let Some(label) = child.with_capability::<dyn Named, _>(|n| n.label()) {
                    d.labels.push(label);
                }
            })
            .creator("note", &note, |d: &mut Drawing| &mut d.note)
            .container(|d: &mut Drawing, task| d.tasks.push(task))
            .build();

        let loader = StaticLoader::new()
            .with_class("test", "shape", shape)
            .with_class("test", "label", label)
            .with_class("test", "drawing", Arc::clone(&drawing))
            .with_class("test", "sketch", drawing);
        let mut libraries = LibraryManager::new(Arc::new(loader));
        libraries
            .register(
                ComponentLibrary::new("test")
                    .type_def("shape", "shape")
                    .type_def("label", "label")
                    .type_def("drawing", "drawing")
                    .task("sketch", "sketch"),
            )
            .unwrap();

        let project = Project::new("demo").with_source(dir.path().join("Keel.toml"));
        let frame = Frame::root(
            Arc::new(project),
            FrameServices::new(libraries, FrameSettings::default()),
        );
        frame.initialize(PropertyStore::new()).unwrap();
        frame.import_library("test").unwrap();
        frame
    }

    fn drawing_of(created: &Created) -> (String, usize, Vec<String>, String, usize) {
        created
            .handle()
            .with(|d: &Drawing| {
                (
                    d.title.clone(),
                    d.shapes.len(),
                    d.labels.clone(),
                    d.note.text.clone(),
                    d.tasks.len(),
                )
            })
            .unwrap()
    }

    #[test]
    fn test_configures_attributes_and_nested_elements() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        frame.set_property("who", "world", false).unwrap();

        let model = BuildElement::new("drawing")
            .with_attribute("title", "hello ${who}")
            .with_child(BuildElement::new("shape").with_attribute("sides", "3"))
            .with_child(
                BuildElement::new("named")
                    .with_aspect("keel", "type", "label")
                    .with_attribute("text", "first"),
            )
            .with_child(BuildElement::new("note").with_text("  remember  "));
        let created = frame.create_component("drawing", Some(&model)).unwrap();

        let (title, shapes, labels, note, _) = drawing_of(&created);
        assert_eq!(title, "hello world");
        assert_eq!(shapes, 1);
        assert_eq!(labels, vec!["first".to_string()]);
        assert_eq!(note, "remember");
    }

    #[test]
    fn test_refid_uses_registered_instance() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);

        let label = BuildElement::new("label")
            .with_attribute("text", "shared")
            .with_aspect("keel", "id", "the-label");
        assert!(matches!(
            frame.create_component("label", Some(&label)).unwrap(),
            Created::Type(_)
        ));
        assert!(frame.get_value("the-label").unwrap().as_component().is_some());

        let model = BuildElement::new("drawing")
            .with_child(BuildElement::new("named").with_aspect("keel", "refid", "the-label"));
        let created = frame.create_component("drawing", Some(&model)).unwrap();
        assert_eq!(drawing_of(&created).2, vec!["shared".to_string()]);
    }

    #[test]
    fn test_refid_with_content_rejected() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("drawing").with_child(
            BuildElement::new("named")
                .with_aspect("keel", "refid", "x")
                .with_attribute("text", "inline"),
        );
        let err = frame.create_component("drawing", Some(&model)).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Binding {
                error: BindingError::ReferenceWithContent { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_abstract_element_needs_hint() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("drawing").with_child(BuildElement::new("named"));
        let err = frame.create_component("drawing", Some(&model)).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Binding {
                error: BindingError::AbstractElement { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_type_hint_must_match_expected_type() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("drawing").with_child(
            BuildElement::new("named")
                .with_aspect("keel", "type", "shape")
                .with_attribute("sides", "4"),
        );
        let err = frame.create_component("drawing", Some(&model)).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Binding {
                error: BindingError::TypeMismatch { source_kind: "type", .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_attribute_names_element() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("drawing").with_attribute("colour", "red");
        let err = frame.create_component("drawing", Some(&model)).unwrap_err();
        assert_eq!(
            err.to_string(),
            BindingError::UnsupportedAttribute {
                element: "drawing".to_string(),
                attribute: "colour".to_string(),
            }
            .to_string()
        );
    }

    #[test]
    fn test_creator_child_is_validated() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("drawing").with_child(BuildElement::new("note"));
        let err = frame.create_component("drawing", Some(&model)).unwrap_err();
        assert_eq!(err.to_string(), "a note needs text");
    }

    #[test]
    fn test_container_collects_nested_tasks() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("drawing")
            .with_child(BuildElement::new("sketch"))
            .with_child(BuildElement::new("sketch").with_attribute("title", "inner"));
        let created = frame.create_component("drawing", Some(&model)).unwrap();
        assert_eq!(drawing_of(&created).4, 2);
    }

    #[test]
    fn test_task_definition_creates_task() {
        let dir = TempDir::new().unwrap();
        let frame = frame(&dir);
        let model = BuildElement::new("sketch").with_attribute("title", "t");
        let task = frame
            .create_component("sketch", Some(&model))
            .unwrap()
            .into_task()
            .unwrap();
        assert_eq!(task.name(), "sketch");
        assert!(frame.configure_type("sketch", &model).is_err());
    }
}
