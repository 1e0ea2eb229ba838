//! Nested document to flat `a/b/c -> value` mapping.

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::error::{Error, Result};

/// Path segment that marks an entry as environment-independent.
pub const DEFAULT_SEGMENT: &str = "default";

/// Where a flattened document is headed. Decides how paths are addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// The coordination store. The first path segment is an environment
    /// selector and is dropped (`default`) or moved to the end.
    Store,

    /// The secrets store. Paths are used as they are.
    Secrets,
}

impl Target {
    /// Rewrites a flattened path into this target's addressing convention.
    #[must_use]
    pub fn address(self, path: &str) -> String {
        match self {
            Self::Secrets => path.to_string(),
            Self::Store => match path.split_once('/') {
                Some((DEFAULT_SEGMENT, rest)) => rest.to_string(),
                Some((selector, rest)) => format!("{rest}/{selector}"),
                None => path.to_string(),
            },
        }
    }
}

/// A flattened document tagged with its target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyValueDocument {
    entries: BTreeMap<String, String>,
}

impl KeyValueDocument {
    /// Parses YAML text and flattens it for `target`.
    ///
    /// An empty document yields no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not YAML, the root is not a mapping,
    /// or a key is not a scalar.
    pub fn from_yaml(target: Target, contents: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(contents)?;
        Self::from_value(target, &value)
    }

    /// Flattens an already-parsed document for `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not a mapping or a key is not a scalar.
    pub fn from_value(target: Target, value: &Value) -> Result<Self> {
        let entries = flatten(value)?
            .into_iter()
            .map(|(path, v)| (target.address(&path), v))
            .collect();

        Ok(Self { entries })
    }

    /// Flat entries in key order.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flattens a nested document into slash-joined paths.
///
/// Mappings and sequences both nest; sequence elements use their index as
/// the segment. Scalars become strings and null becomes the empty string.
/// Empty mappings and sequences produce no entries. `null` at the root is
/// treated as an empty document.
///
/// # Errors
///
/// Returns `NotAMapping` if the root is neither a mapping nor null, and
/// `UnsupportedKey` if a mapping key is a mapping or sequence.
pub fn flatten(value: &Value) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();

    match value {
        Value::Null => {}
        Value::Mapping(_) => descend(value, "", &mut out)?,
        Value::Tagged(tagged) => return flatten(&tagged.value),
        _ => return Err(Error::NotAMapping),
    }

    Ok(out)
}

fn descend(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) -> Result<()> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let segment = scalar(key).ok_or_else(|| Error::UnsupportedKey(prefix.to_string()))?;
                descend(child, &join(prefix, &segment), out)?;
            }
        }
        Value::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                descend(child, &join(prefix, &index.to_string()), out)?;
            }
        }
        Value::Tagged(tagged) => descend(&tagged.value, prefix, out)?,
        leaf => {
            out.insert(prefix.to_string(), scalar(leaf).unwrap_or_default());
        }
    }

    Ok(())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar(&tagged.value),
        Value::Mapping(_) | Value::Sequence(_) => None,
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}/{segment}")
    }
}
