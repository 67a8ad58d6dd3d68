//! Secondary index: attribute name → value → sorted identifiers.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::key::KeyPart;

/// Inverted index over item attributes.
///
/// Sets are kept sorted so multi-predicate queries intersect with a single
/// linear merge per predicate.
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` under every attribute. Re-adding is harmless.
    pub fn add<'a>(&mut self, id: &str, attributes: impl IntoIterator<Item = &'a KeyPart>) {
        for attr in attributes {
            self.entries
                .entry(attr.name.clone())
                .or_default()
                .entry(attr.value.clone())
                .or_default()
                .insert(id.to_string());
        }
    }

    /// Drop `id` from every attribute, pruning sets and value maps that
    /// become empty.
    pub fn remove<'a>(&mut self, id: &str, attributes: impl IntoIterator<Item = &'a KeyPart>) {
        for attr in attributes {
            let Some(values) = self.entries.get_mut(&attr.name) else {
                continue;
            };
            if let Some(ids) = values.get_mut(&attr.value) {
                ids.remove(id);
                if ids.is_empty() {
                    values.remove(&attr.value);
                }
            }
            if values.is_empty() {
                self.entries.remove(&attr.name);
            }
        }
    }

    /// Identifiers carrying every predicate, in ascending order.
    pub fn query<'a>(
        &self,
        predicates: impl IntoIterator<Item = &'a KeyPart>,
    ) -> Result<Vec<String>> {
        let mut sets = Vec::new();
        for pred in predicates {
            match self
                .entries
                .get(&pred.name)
                .and_then(|values| values.get(&pred.value))
            {
                Some(ids) => sets.push(ids),
                // An unknown pair matches nothing, but keep validating the
                // rest so an empty predicate list is still caught below.
                None => sets.push(empty_set()),
            }
        }
        if sets.is_empty() {
            return Err(Error::InvalidArgument(
                "query needs at least one predicate".to_string(),
            ));
        }

        // Smallest set first keeps every intermediate result small.
        sets.sort_by_key(|ids| ids.len());
        let mut result: Vec<&String> = sets[0].iter().collect();
        for ids in sets[1..].iter().copied() {
            if result.is_empty() {
                break;
            }
            result = intersect_sorted(&result, ids);
        }
        Ok(result.into_iter().cloned().collect())
    }

    /// Whether `id` is recorded under `attr`.
    pub fn contains(&self, id: &str, attr: &KeyPart) -> bool {
        self.entries
            .get(&attr.name)
            .and_then(|values| values.get(&attr.value))
            .is_some_and(|ids| ids.contains(id))
    }

    /// Number of distinct attribute names.
    pub fn names(&self) -> usize {
        self.entries.len()
    }

    /// Total `(name, value, id)` entries.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|values| values.values())
            .map(BTreeSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn empty_set() -> &'static BTreeSet<String> {
    static EMPTY: BTreeSet<String> = BTreeSet::new();
    &EMPTY
}

/// Sorted-merge intersection of two ascending sequences.
fn intersect_sorted<'a>(left: &[&'a String], right: &'a BTreeSet<String>) -> Vec<&'a String> {
    let mut out = Vec::with_capacity(left.len().min(right.len()));
    let mut l = left.iter().peekable();
    let mut r = right.iter().peekable();
    while let (Some(a), Some(b)) = (l.peek(), r.peek()) {
        match (**a).cmp(*b) {
            std::cmp::Ordering::Less => {
                l.next();
            }
            std::cmp::Ordering::Greater => {
                r.next();
            }
            std::cmp::Ordering::Equal => {
                out.push(*b);
                l.next();
                r.next();
            }
        }
    }
    out
}
