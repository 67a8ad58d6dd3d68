//! Composite keys.
//!
//! A key names an item through an ordered list of identity parts
//! (`timestamp=…`, `sender=…`) and describes how it can be found through an
//! unordered set of indexed attributes (`category=…`, `status=…`). The
//! identity parts encode to the primary identifier `name=value~name=value`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Attribute value matching any stored value for its name.
pub const WILDCARD: &str = "*";

/// Separates `name=value` pairs inside an identifier.
pub const PART_SEPARATOR: char = '~';

/// Separates a name from its value.
pub const ASSIGN: char = '=';

/// One `(name, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyPart {
    pub name: String,
    pub value: String,
}

impl KeyPart {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn wildcard(name: impl Into<String>) -> Self {
        Self::new(name, WILDCARD)
    }

    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidArgument("empty attribute name".to_string()));
        }
        for field in [&self.name, &self.value] {
            if field.contains(PART_SEPARATOR) || field.contains(ASSIGN) {
                return Err(Error::InvalidArgument(format!(
                    "'{field}' contains a reserved character ('{PART_SEPARATOR}' or '{ASSIGN}')"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for KeyPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{ASSIGN}{}", self.name, self.value)
    }
}

/// A direct reference to one item, an attribute query, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Primary identifier, when the caller already knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Ordered identity parts. Order matters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<KeyPart>,

    /// Lookup-only attributes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexed: Vec<KeyPart>,
}

impl Key {
    /// A key built from identity parts.
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self {
            name: None,
            parts,
            indexed: Vec::new(),
        }
    }

    /// A key referring to an already-known identifier.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// An attribute-only query.
    pub fn query(predicates: Vec<KeyPart>) -> Self {
        Self {
            name: None,
            parts: Vec::new(),
            indexed: predicates,
        }
    }

    pub fn part(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(KeyPart::new(name, value));
        self
    }

    pub fn index(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.indexed.push(KeyPart::new(name, value));
        self
    }

    /// True when the key only describes attributes.
    pub fn is_query(&self) -> bool {
        self.name.is_none() && self.parts.is_empty()
    }

    /// The primary identifier this key denotes, if any.
    pub fn identifier(&self) -> Result<Option<String>> {
        match (&self.name, self.parts.is_empty()) {
            (Some(name), true) => {
                reconstruct(name)?;
                Ok(Some(name.clone()))
            }
            (Some(name), false) => {
                let computed = compute_identifier(&self.parts)?;
                if &computed != name {
                    return Err(Error::InvalidArgument(format!(
                        "key name '{name}' does not match its parts '{computed}'"
                    )));
                }
                Ok(Some(computed))
            }
            (None, false) => compute_identifier(&self.parts).map(Some),
            (None, true) => Ok(None),
        }
    }

    /// Identity parts, recovered from the name when none were given.
    pub fn identity_parts(&self) -> Result<Vec<KeyPart>> {
        match (&self.name, self.parts.is_empty()) {
            (Some(name), true) => reconstruct(name),
            _ => Ok(self.parts.clone()),
        }
    }

    /// Exact predicates to search by. Never includes synthetic wildcards.
    pub fn predicates(&self) -> Result<BTreeSet<KeyPart>> {
        expand_attributes(&self.identity_parts()?, &self.indexed, false)
    }

    /// Everything that goes into the index when this key is stored.
    pub fn stored_attributes(&self) -> Result<BTreeSet<KeyPart>> {
        expand_attributes(&self.identity_parts()?, &self.indexed, true)
    }
}

/// Encode identity parts into a primary identifier.
pub fn compute_identifier(parts: &[KeyPart]) -> Result<String> {
    if parts.is_empty() {
        return Err(Error::InvalidArgument(
            "identifier needs at least one identity part".to_string(),
        ));
    }
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        part.validate()?;
        if i > 0 {
            out.push(PART_SEPARATOR);
        }
        out.push_str(&part.to_string());
    }
    Ok(out)
}

/// Decode a primary identifier back into its identity parts.
pub fn reconstruct(identifier: &str) -> Result<Vec<KeyPart>> {
    if identifier.is_empty() {
        return Err(Error::InvalidArgument("empty identifier".to_string()));
    }
    identifier
        .split(PART_SEPARATOR)
        .map(|pair| {
            let (name, value) = pair.split_once(ASSIGN).ok_or_else(|| {
                Error::InvalidArgument(format!("malformed identifier segment '{pair}'"))
            })?;
            let part = KeyPart::new(name, value);
            part.validate()?;
            Ok(part)
        })
        .collect()
}

/// Union of identity parts and indexed attributes as a set of exact pairs.
///
/// With `include_wildcard` (storage) every attribute name also gets a
/// `name=*` pair, and a literal `*` value is refused since it would be
/// indistinguishable from the wildcard entry. Without it (querying) the
/// caller's own `*` values pass through and match those entries.
pub fn expand_attributes(
    parts: &[KeyPart],
    indexed: &[KeyPart],
    include_wildcard: bool,
) -> Result<BTreeSet<KeyPart>> {
    let mut out = BTreeSet::new();
    for part in parts.iter().chain(indexed) {
        part.validate()?;
        if include_wildcard {
            if part.is_wildcard() {
                return Err(Error::InvalidArgument(format!(
                    "stored attribute '{}' may not use the wildcard value",
                    part.name
                )));
            }
            out.insert(KeyPart::wildcard(part.name.clone()));
        }
        out.insert(part.clone());
    }
    Ok(out)
}
