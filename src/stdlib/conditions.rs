//! Condition types: `isset` and `equals`.

use std::sync::Arc;

use crate::component::{Component, ComponentClass};
use crate::execution::context::ExecutionContext;
use crate::execution::error::TaskError;

/// A type that can be evaluated to true or false.
pub trait Condition: Send {
    fn eval(&self, ctx: &ExecutionContext) -> Result<bool, TaskError>;
}

/// True when a property is set.
#[derive(Debug, Default)]
pub struct IsSet {
    property: Option<String>,
}

impl Component for IsSet {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.property.is_none() {
            return Err(TaskError::new("<isset> requires a property attribute"));
        }
        Ok(())
    }
}

impl Condition for IsSet {
    fn eval(&self, ctx: &ExecutionContext) -> Result<bool, TaskError> {
        Ok(self
            .property
            .as_deref()
            .is_some_and(|property| ctx.is_set(property)))
    }
}

pub fn isset_class() -> Arc<ComponentClass> {
    ComponentClass::component::<IsSet>("isset")
        .attribute("property", |c: &mut IsSet, property: String| {
            c.property = Some(property)
        })
        .implements::<dyn Condition>(|c| c as &dyn Condition)
        .build()
}

/// True when two strings are equal.
#[derive(Debug)]
pub struct Equals {
    arg1: Option<String>,
    arg2: Option<String>,
    case_sensitive: bool,
}

impl Default for Equals {
    fn default() -> Self {
        Equals {
            arg1: None,
            arg2: None,
            case_sensitive: true,
        }
    }
}

impl Component for Equals {
    fn validate(&mut self) -> Result<(), TaskError> {
        if self.arg1.is_none() || self.arg2.is_none() {
            return Err(TaskError::new("<equals> requires both arg1 and arg2"));
        }
        Ok(())
    }
}

impl Condition for Equals {
    fn eval(&self, _ctx: &ExecutionContext) -> Result<bool, TaskError> {
        let (Some(arg1), Some(arg2)) = (&self.arg1, &self.arg2) else {
            return Ok(false);
        };
        if self.case_sensitive {
            Ok(arg1 == arg2)
        } else {
            Ok(arg1.to_lowercase() == arg2.to_lowercase())
        }
    }
}

pub fn equals_class() -> Arc<ComponentClass> {
    ComponentClass::component::<Equals>("equals")
        .attribute("arg1", |c: &mut Equals, arg: String| c.arg1 = Some(arg))
        .attribute("arg2", |c: &mut Equals, arg: String| c.arg2 = Some(arg))
        .attribute("casesensitive", |c: &mut Equals, sensitive: bool| {
            c.case_sensitive = sensitive
        })
        .implements::<dyn Condition>(|c| c as &dyn Condition)
        .build()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::core::element::BuildElement;
    use crate::core::project::Project;
    use crate::execution::error::ExecutionError;
    use crate::stdlib::testing;

    fn condition(check: BuildElement) -> BuildElement {
        BuildElement::new("condition")
            .with_attribute("property", "result")
            .with_child(check)
    }

    #[test]
    fn test_isset_and_equals() {
        let dir = TempDir::new().unwrap();
        let (frame, _) = testing::frame(&dir, Project::new("demo"));
        frame.set_property("present", "1", false).unwrap();

        let isset = BuildElement::new("check")
            .with_aspect("keel", "type", "isset")
            .with_attribute("property", "present");
        frame.execute_tasks(&condition(isset)).unwrap();
        assert_eq!(frame.get_value("result").unwrap().to_string(), "true");

        let equals = BuildElement::new("check")
            .with_aspect("keel", "type", "equals")
            .with_attribute("arg1", "ABC")
            .with_attribute("arg2", "abc")
            .with_attribute("casesensitive", "no");
        let (frame, _) = testing::frame(&dir, Project::new("demo"));
        frame.execute_tasks(&condition(equals)).unwrap();
        assert!(frame.is_set("result"));
    }

    #[test]
    fn test_false_condition_leaves_property_unset() {
        let dir = TempDir::new().unwrap();
        let (frame, _) = testing::frame(&dir, Project::new("demo"));
        let equals = BuildElement::new("check")
            .with_aspect("keel", "type", "equals")
            .with_attribute("arg1", "ABC")
            .with_attribute("arg2", "abc");
        frame.execute_tasks(&condition(equals)).unwrap();
        assert!(!frame.is_set("result"));
    }

    #[test]
    fn test_condition_by_reference() {
        let dir = TempDir::new().unwrap();
        let (frame, _) = testing::frame(&dir, Project::new("demo"));
        frame.set_property("x", "set", false).unwrap();
        frame
            .execute_tasks(
                &BuildElement::new("isset")
                    .with_attribute("property", "x")
                    .with_aspect("keel", "id", "has-x"),
            )
            .unwrap();

        let check = BuildElement::new("check").with_aspect("keel", "refid", "has-x");
        frame.execute_tasks(&condition(check)).unwrap();
        assert!(frame.is_set("result"));
    }

    #[test]
    fn test_isset_requires_property() {
        let dir = TempDir::new().unwrap();
        let (frame, _) = testing::frame(&dir, Project::new("demo"));
        let err = frame
            .execute_tasks(&BuildElement::new("isset"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Task(_)));
    }
}
