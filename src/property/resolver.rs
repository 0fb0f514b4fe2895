//! `${name}` property reference substitution.
//!
//! Strings are tokenized once and the fragments cached, so attribute values
//! that are resolved on every task execution are only scanned the first
//! time. The cache is bounded and starts over once full. Substituted text is
//! never re-scanned.
//!
//! Escaping:
//! - a trailing `$` is literal
//! - `$` followed by anything other than `{` is literal (`$$` stays `$$`)
//! - `${` without a closing `}` is a syntax error

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

/// A parsed piece of a property string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Literal text (range in the original string)
    Literal(Range<usize>),
    /// `${name}` reference
    Property(String),
}

/// Result of looking up one referenced name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(String),
    /// The frame exists but does not hold the property
    Missing,
    /// The frame-qualifier prefix does not lead to a frame
    NoFrame,
}

/// Anything property references can be resolved against.
pub trait PropertySource {
    fn lookup(&self, name: &str) -> Lookup;
}

impl<S: std::hash::BuildHasher> PropertySource for HashMap<String, String, S> {
    fn lookup(&self, name: &str) -> Lookup {
        match self.get(name) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::Missing,
        }
    }
}

/// Property resolution failures.
#[derive(Debug, Clone, Error, MietteDiagnostic, PartialEq, Eq)]
pub enum PropertyError {
    #[error("unterminated property reference in `{text}` at offset {offset}")]
    #[diagnostic(
        code(keel::config::property_syntax),
        help("close the reference with `}}`")
    )]
    Syntax { text: String, offset: usize },

    #[error("property `{name}` has not been set")]
    #[diagnostic(code(keel::config::unresolved_property))]
    Unresolved { name: String },

    #[error("property `{name}` refers to a project that is not referenced")]
    #[diagnostic(code(keel::config::unknown_frame))]
    UnknownFrame { name: String },
}

/// Default number of strings kept by the tokenization cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Tokenizing, caching property resolver.
pub struct PropertyResolver {
    cache: DashMap<String, Arc<Vec<Fragment>>>,
    capacity: usize,
}

impl Default for PropertyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyResolver {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Resolver whose cache holds at most `capacity` strings.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: DashMap::new(),
            capacity,
        }
    }

    /// Parse `text` into fragments (cached).
    pub fn tokenize(&self, text: &str) -> Result<Arc<Vec<Fragment>>, PropertyError> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(Arc::clone(&cached));
        }

        let mut fragments = Vec::new();
        let mut literal_start = 0;
        let mut pos = 0;
        let bytes = text.as_bytes();

        while let Some(found) = text[pos..].find('$') {
            let dollar = pos + found;
            match bytes.get(dollar + 1) {
                Some(b'{') => {
                    let name_start = dollar + 2;
                    let close = text[name_start..]
                        .find('}')
                        .map(|i| name_start + i)
                        .ok_or_else(|| PropertyError::Syntax {
                            text: text.to_string(),
                            offset: dollar,
                        })?;
                    if dollar > literal_start {
                        fragments.push(Fragment::Literal(literal_start..dollar));
                    }
                    fragments.push(Fragment::Property(text[name_start..close].to_string()));
                    pos = close + 1;
                    literal_start = pos;
                }
                // `$x` and trailing `$` are part of the literal
                _ => pos = dollar + 1,
            }
        }

        if literal_start < text.len() {
            fragments.push(Fragment::Literal(literal_start..text.len()));
        }

        let fragments = Arc::new(fragments);
        if self.capacity > 0 {
            if self.cache.len() >= self.capacity {
                tracing::debug!("property cache full ({} strings), clearing", self.capacity);
                self.cache.clear();
            }
            self.cache.insert(text.to_string(), Arc::clone(&fragments));
        }
        Ok(fragments)
    }

    /// Names referenced by `text`, in order.
    pub fn references(&self, text: &str) -> Result<Vec<String>, PropertyError> {
        Ok(self
            .tokenize(text)?
            .iter()
            .filter_map(|f| match f {
                Fragment::Property(name) => Some(name.clone()),
                Fragment::Literal(_) => None,
            })
            .collect())
    }

    /// Substitute every reference in `text` from `source`.
    ///
    /// With `allow_unset`, references to missing properties are left as
    /// written; otherwise they fail. An unreachable frame always fails.
    pub fn resolve(
        &self,
        source: &dyn PropertySource,
        text: &str,
        allow_unset: bool,
    ) -> Result<String, PropertyError> {
        let fragments = self.tokenize(text)?;
        let mut result = String::with_capacity(text.len());

        for fragment in fragments.iter() {
            match fragment {
                Fragment::Literal(range) => result.push_str(&text[range.clone()]),
                Fragment::Property(name) => match source.lookup(name) {
                    Lookup::Found(value) => result.push_str(&value),
                    Lookup::Missing if allow_unset => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    }
                    Lookup::Missing => {
                        return Err(PropertyError::Unresolved { name: name.clone() })
                    }
                    Lookup::NoFrame => {
                        return Err(PropertyError::UnknownFrame { name: name.clone() })
                    }
                },
            }
        }

        Ok(result)
    }

    /// Substitute from an explicit map, leaving unknown references literal.
    pub fn resolve_with(
        &self,
        text: &str,
        values: &HashMap<String, String>,
    ) -> Result<String, PropertyError> {
        self.resolve(values, text, true)
    }

    /// Number of cached strings.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
