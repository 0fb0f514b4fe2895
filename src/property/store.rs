//! Per-frame property storage with priority-based overwrite rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::property::value::Value;

/// Priority of a property write.
///
/// A write replaces an existing entry only if it has a strictly higher
/// priority, or the same priority and the write is marked mutable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Values set by the build itself
    #[default]
    Base,
    /// Values supplied by the user (`-D`, config files)
    User,
    /// Values forced onto a frame by its parent
    Override,
}

/// A stored value with its priority.
#[derive(Debug, Clone)]
pub struct DataValue {
    pub value: Value,
    pub priority: Priority,
}

impl DataValue {
    pub fn new(value: impl Into<Value>, priority: Priority) -> Self {
        DataValue {
            value: value.into(),
            priority,
        }
    }
}

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// An existing entry outranked the write
    Ignored,
}

/// A mapping of property name to prioritised value.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    entries: BTreeMap<String, DataValue>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, subject to the priority rule.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
        priority: Priority,
        mutable: bool,
    ) -> WriteOutcome {
        self.update(name.into(), DataValue::new(value, priority), mutable)
    }

    /// Store a prioritised value, subject to the priority rule.
    pub fn update(&mut self, name: String, value: DataValue, mutable: bool) -> WriteOutcome {
        if let Some(current) = self.entries.get(&name) {
            if current.priority > value.priority
                || (current.priority == value.priority && !mutable)
            {
                return WriteOutcome::Ignored;
            }
        }
        self.entries.insert(name, value);
        WriteOutcome::Stored
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|entry| &entry.value)
    }

    pub fn entry(&self, name: &str) -> Option<&DataValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge entries of at least `threshold` priority, never overwriting at equal priority.
    pub fn merge(&mut self, other: &PropertyStore, threshold: Priority) {
        for (name, value) in &other.entries {
            if value.priority >= threshold {
                self.update(name.clone(), value.clone(), false);
            }
        }
    }

    /// Store every pair at the given priority.
    pub fn extend<I, K, V>(&mut self, values: I, priority: Priority)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in values {
            self.set(name, value, priority, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Base),
            Just(Priority::User),
            Just(Priority::Override)
        ]
    }

    #[test]
    fn test_higher_priority_replaces() {
        let mut store = PropertyStore::new();
        store.set("a", "base", Priority::Base, false);
        assert_eq!(store.set("a", "user", Priority::User, false), WriteOutcome::Stored);
        assert_eq!(store.get("a").and_then(Value::as_text), Some("user"));
    }

    #[test]
    fn test_equal_priority_requires_mutable() {
        let mut store = PropertyStore::new();
        store.set("a", "first", Priority::Base, false);
        assert_eq!(store.set("a", "second", Priority::Base, false), WriteOutcome::Ignored);
        assert_eq!(store.get("a").and_then(Value::as_text), Some("first"));

        assert_eq!(store.set("a", "third", Priority::Base, true), WriteOutcome::Stored);
        assert_eq!(store.get("a").and_then(Value::as_text), Some("third"));
    }

    #[test]
    fn test_lower_priority_ignored_even_if_mutable() {
        let mut store = PropertyStore::new();
        store.set("a", "forced", Priority::Override, false);
        assert_eq!(store.set("a", "mine", Priority::Base, true), WriteOutcome::Ignored);
    }

    #[test]
    fn test_merge_threshold() {
        let mut other = PropertyStore::new();
        other.set("low", "x", Priority::Base, false);
        other.set("high", "y", Priority::User, false);

        let mut store = PropertyStore::new();
        store.merge(&other, Priority::User);
        assert!(!store.contains("low"));
        assert!(store.contains("high"));
    }

    proptest! {
        #[test]
        fn test_priority_is_order_independent(
            p1 in priority(),
            p2 in priority(),
            mutable in any::<bool>(),
        ) {
            prop_assume!(p1 != p2);
            let expected = if p1 > p2 { "one" } else { "two" };

            let mut forward = PropertyStore::new();
            forward.set("p", "one", p1, mutable);
            forward.set("p", "two", p2, mutable);

            let mut backward = PropertyStore::new();
            backward.set("p", "two", p2, mutable);
            backward.set("p", "one", p1, mutable);

            prop_assert_eq!(forward.get("p").and_then(Value::as_text), Some(expected));
            prop_assert_eq!(backward.get("p").and_then(Value::as_text), Some(expected));
        }
    }
}
