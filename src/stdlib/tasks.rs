//! Tasks shipped with `keel.core`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::component::{Component, ComponentClass, ComponentHandle};
use crate::core::manifest::load_project;
use crate::execution::context::ExecutionContext;
use crate::execution::error::TaskError;
use crate::execution::events::MessageLevel;
use crate::execution::task::Task;
use crate::property::{Priority, PropertyStore};
use crate::stdlib::conditions::Condition;

/// `<property name=".." value=".." mutable=".."/>`
#[derive(Debug, Default)]
pub struct PropertyTask {
    name: Option<String>,
    value: Option<String>,
    mutable: bool,
}

impl Component for PropertyTask {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.name.is_none() {
            return Err(TaskError::new("<property> requires a name"));
        }
        if self.value.is_none() {
            return Err(TaskError::new("<property> requires a value"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        if let (Some(name), Some(value)) = (&self.name, &self.value) {
            ctx.set_property(name, value.as_str(), self.mutable)?;
        }
        Ok(())
    }
}

pub fn property_class() -> Arc<ComponentClass> {
    ComponentClass::component::<PropertyTask>("property")
        .attribute("name", |t: &mut PropertyTask, name: String| t.name = Some(name))
        .attribute("value", |t: &mut PropertyTask, value: String| t.value = Some(value))
        .attribute("mutable", |t: &mut PropertyTask, mutable: bool| t.mutable = mutable)
        .text(|t: &mut PropertyTask, text| t.value = Some(text))
        .build()
}

/// Logs a message.
#[derive(Debug)]
pub struct Echo {
    message: String,
    level: MessageLevel,
}

impl Default for Echo {
    fn default() -> Self {
        Echo {
            message: String::new(),
            level: MessageLevel::Info,
        }
    }
}

impl Component for Echo {
    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        ctx.log(self.message.clone(), self.level);
        Ok(())
    }
}

pub fn echo_class() -> Arc<ComponentClass> {
    ComponentClass::component::<Echo>("echo")
        .attribute("message", |t: &mut Echo, message: String| t.message = message)
        .attribute("level", |t: &mut Echo, level: MessageLevel| t.level = level)
        .text(|t: &mut Echo, text| t.message.push_str(&text))
        .build()
}

/// Fails the build.
#[derive(Debug, Default)]
pub struct Fail {
    message: Option<String>,
}

impl Component for Fail {
    fn execute(&mut self, _ctx: &ExecutionContext) -> Result<(), TaskError> {
        Err(TaskError::new(
            self.message.clone().unwrap_or_else(|| "No message".to_string()),
        ))
    }
}

pub fn fail_class() -> Arc<ComponentClass> {
    ComponentClass::component::<Fail>("fail")
        .attribute("message", |t: &mut Fail, message: String| t.message = Some(message))
        .text(|t: &mut Fail, text| t.message = Some(text))
        .build()
}

/// Imports a library, one of its components, or a component of a
/// referenced project (`ref="lib:name"`).
#[derive(Debug, Default)]
pub struct Import {
    library: Option<String>,
    name: Option<String>,
    alias: Option<String>,
    reference: Option<String>,
}

impl Component for Import {
    fn validate(&mut self) -> Result<(), TaskError> {
        match (&self.library, &self.reference) {
            (None, None) => Err(TaskError::new("<import> requires a library or a ref")),
            (Some(_), Some(_)) => Err(TaskError::new(
                "<import> takes either a library or a ref, not both",
            )),
            (None, Some(_)) if self.name.is_some() => Err(TaskError::new(
                "<import> with a ref names the component in the ref itself",
            )),
            _ => Ok(()),
        }
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let alias = self.alias.as_deref();
        match (&self.library, &self.name, &self.reference) {
            (_, _, Some(reference)) => ctx.import_frame_component(reference, alias),
            (Some(library), Some(name), None) => ctx.import_component(library, name, alias),
            (Some(library), None, None) => {
                if alias.is_some() {
                    ctx.log(
                        "alias is ignored when importing a whole library",
                        MessageLevel::Warning,
                    );
                }
                ctx.import_library(library)
            }
            (None, _, None) => Ok(()),
        }
    }
}

pub fn import_class() -> Arc<ComponentClass> {
    ComponentClass::component::<Import>("import")
        .attribute("library", |t: &mut Import, library: String| t.library = Some(library))
        .attribute("name", |t: &mut Import, name: String| t.name = Some(name))
        .attribute("alias", |t: &mut Import, alias: String| t.alias = Some(alias))
        .attribute("ref", |t: &mut Import, reference: String| t.reference = Some(reference))
        .build()
}

/// A `name`/`value` pair nested in `<ref>` and `<call>`.
#[derive(Debug, Default, Clone)]
pub struct Param {
    name: Option<String>,
    value: String,
}

impl Component for Param {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.name.is_none() {
            return Err(TaskError::new("a parameter requires a name"));
        }
        Ok(())
    }
}

pub fn param_class(name: &str) -> Arc<ComponentClass> {
    ComponentClass::component::<Param>(name)
        .attribute("name", |p: &mut Param, name: String| p.name = Some(name))
        .attribute("value", |p: &mut Param, value: String| p.value = value)
        .build()
}

fn param_store(params: impl IntoIterator<Item = Param>) -> PropertyStore {
    let mut store = PropertyStore::new();
    store.extend(
        params
            .into_iter()
            .filter_map(|p| p.name.map(|name| (name, p.value))),
        Priority::User,
    );
    store
}

/// Loads another descriptor and makes it reachable as `name:`.
#[derive(Debug, Default)]
pub struct Ref {
    name: Option<String>,
    file: Option<PathBuf>,
    properties: Vec<ComponentHandle>,
}

impl Component for Ref {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.name.is_none() || self.file.is_none() {
            return Err(TaskError::new("<ref> requires a name and a file"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let (Some(name), Some(file)) = (&self.name, &self.file) else {
            return Ok(());
        };
        let path = ctx.resolve_path(file)?;
        let project = load_project(&path).map_err(|e| {
            TaskError::new(format!("cannot reference {}: {}", path.display(), e)).with_source(e)
        })?;
        let overrides = param_store(
            self.properties
                .iter()
                .filter_map(|handle| handle.with(|p: &Param| p.clone())),
        );
        ctx.create_project_reference(name, Arc::new(project), overrides)
    }
}

pub fn ref_class() -> Arc<ComponentClass> {
    let property = param_class("property");
    ComponentClass::component::<Ref>("ref")
        .attribute("name", |t: &mut Ref, name: String| t.name = Some(name))
        .attribute("file", |t: &mut Ref, file: PathBuf| t.file = Some(file))
        .element("property", &property, |t: &mut Ref, child| {
            t.properties.push(child)
        })
        .build()
}

/// Runs a target of the current project in a new child frame.
#[derive(Debug, Default)]
pub struct Call {
    target: Option<String>,
    params: Vec<Param>,
}

impl Call {
    fn create_param(&mut self) -> &mut Param {
        let index = self.params.len();
        self.params.push(Param::default());
        &mut self.params[index]
    }
}

impl Component for Call {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.target.is_none() {
            return Err(TaskError::new("<call> requires a target"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let params = param_store(self.params.iter().cloned());
        ctx.call_target(params, std::slice::from_ref(target))
    }
}

pub fn call_class() -> Arc<ComponentClass> {
    let param = param_class("param");
    ComponentClass::component::<Call>("call")
        .attribute("target", |t: &mut Call, target: String| t.target = Some(target))
        .creator("param", &param, Call::create_param)
        .build()
}

/// Runs nested tasks in order.
#[derive(Debug, Default)]
pub struct Sequential {
    tasks: Vec<Task>,
}

impl Component for Sequential {
    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        for task in &self.tasks {
            ctx.execute_task(task)?;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        for task in self.tasks.drain(..) {
            task.destroy();
        }
    }
}

pub fn sequential_class() -> Arc<ComponentClass> {
    ComponentClass::component::<Sequential>("sequential")
        .container(|t: &mut Sequential, task| t.tasks.push(task))
        .build()
}

/// Runs nested tasks on their own threads and waits for all of them.
///
/// Worker threads stay attributed to this task while they run, so output
/// they write before their nested task starts still has an owner.
#[derive(Debug, Default)]
pub struct Parallel {
    tasks: Vec<Task>,
}

impl Component for Parallel {
    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let frame = ctx.frame()?;
        let owner = ctx.current_task();
        let results: Vec<Result<(), TaskError>> = thread::scope(|scope| {
            let workers: Vec<_> = self
                .tasks
                .iter()
                .map(|task| {
                    let frame = Arc::clone(&frame);
                    let owner = owner.clone();
                    scope.spawn(move || {
                        let _attached = owner.map(|entry| frame.events().attach(entry));
                        ctx.execute_task(task)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(TaskError::new("a parallel worker panicked")))
                })
                .collect()
        });

        let mut failures = results.into_iter().filter_map(Result::err);
        match failures.next() {
            Some(first) => {
                for other in failures {
                    ctx.log(format!("parallel task also failed: {}", other), MessageLevel::Error);
                }
                Err(first)
            }
            None => Ok(()),
        }
    }

    fn destroy(&mut self) {
        for task in self.tasks.drain(..) {
            task.destroy();
        }
    }
}

pub fn parallel_class() -> Arc<ComponentClass> {
    ComponentClass::component::<Parallel>("parallel")
        .container(|t: &mut Parallel, task| t.tasks.push(task))
        .build()
}

/// Sets a property when its single nested `check` holds.
#[derive(Debug)]
pub struct ConditionTask {
    property: Option<String>,
    value: String,
    checks: Vec<ComponentHandle>,
}

impl Default for ConditionTask {
    fn default() -> Self {
        ConditionTask {
            property: None,
            value: "true".to_string(),
            checks: Vec::new(),
        }
    }
}

impl Component for ConditionTask {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.property.is_none() {
            return Err(TaskError::new("<condition> requires a property"));
        }
        if self.checks.len() != 1 {
            return Err(TaskError::new(format!(
                "<condition> takes exactly one check, found {}",
                self.checks.len()
            )));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        let (Some(property), Some(check)) = (&self.property, self.checks.first()) else {
            return Ok(());
        };
        let holds = check
            .with_capability::<dyn Condition, _>(|condition| condition.eval(ctx))
            .ok_or_else(|| TaskError::new(format!("{} is not a condition", check.describe())))??;
        if holds {
            ctx.set_property(property, self.value.as_str(), false)?;
        }
        Ok(())
    }
}

pub fn condition_class() -> Arc<ComponentClass> {
    ComponentClass::component::<ConditionTask>("condition")
        .attribute("property", |t: &mut ConditionTask, property: String| {
            t.property = Some(property)
        })
        .attribute("value", |t: &mut ConditionTask, value: String| t.value = value)
        .abstract_element::<dyn Condition>("check", |t: &mut ConditionTask, check| {
            t.checks.push(check)
        })
        .build()
}
