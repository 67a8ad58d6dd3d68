//! In-memory storage engine.
//!
//! One reader/writer lock covers the item table and the index together, so
//! no reader ever sees an item without its index entries or the reverse.
//! Every write runs its whole check-then-change sequence under the
//! exclusive lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, error};

use super::{Created, Fingerprint, Mutation, Store, StoreStats, StoredObject};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::key::{Key, KeyPart, reconstruct};
use crate::telemetry::metrics;

struct Item {
    payload: Vec<u8>,
    fingerprint: Fingerprint,
    attributes: BTreeSet<KeyPart>,
}

#[derive(Default)]
struct Table {
    items: HashMap<String, Item>,
    index: Index,
}

impl Table {
    /// Resolve a key to at most one stored identifier.
    ///
    /// Exact identifier first; otherwise an attribute query that must match
    /// exactly one item.
    fn resolve_one(&self, key: &Key) -> Result<Option<String>> {
        if let Some(id) = key.identifier()? {
            if self.items.contains_key(&id) {
                return Ok(Some(id));
            }
        }
        let hits = self.index.query(&key.predicates()?)?;
        match hits.as_slice() {
            [only] => Ok(Some(only.clone())),
            _ => Ok(None),
        }
    }

    fn snapshot(&self, id: &str) -> Result<StoredObject> {
        let item = self.items.get(id).ok_or_else(|| {
            error!(id, "index entry points at a missing item");
            Error::Internal(format!("index references missing item '{id}'"))
        })?;
        Ok(StoredObject {
            key: Key {
                name: Some(id.to_string()),
                parts: reconstruct(id)?,
                indexed: Vec::new(),
            },
            payload: item.payload.clone(),
            fingerprint: item.fingerprint.clone(),
        })
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.items.remove(id) {
            Some(item) => {
                self.index.remove(id, &item.attributes);
                true
            }
            None => false,
        }
    }
}

/// Volatile item store with a secondary index.
#[derive(Default)]
pub struct StorageEngine {
    table: RwLock<Table>,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Table>> {
        self.table
            .read()
            .map_err(|_| Error::Internal("poisoned lock: storage read".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Table>> {
        self.table
            .write()
            .map_err(|_| Error::Internal("poisoned lock: storage write".to_string()))
    }

    /// Insert a new item under the identifier derived from `key`.
    pub fn create(&self, key: &Key, payload: Vec<u8>) -> Result<Created> {
        let started = Instant::now();
        let result = self.create_inner(key, payload);
        record("create", &result, started);
        result
    }

    fn create_inner(&self, key: &Key, payload: Vec<u8>) -> Result<Created> {
        let id = key.identifier()?.ok_or_else(|| {
            Error::InvalidArgument("create needs identity parts or a name".to_string())
        })?;
        let attributes = key.stored_attributes()?;
        let fingerprint = Fingerprint::of(&payload);

        let mut table = self.write()?;
        if table.items.contains_key(&id) {
            return Err(Error::AlreadyExists(id));
        }
        table.index.add(&id, &attributes);
        table.items.insert(
            id.clone(),
            Item {
                payload,
                fingerprint: fingerprint.clone(),
                attributes,
            },
        );
        drop(table);

        debug!(id = %id, fingerprint = %fingerprint, "object created");
        Ok(Created {
            name: id,
            fingerprint,
        })
    }

    /// Look items up by key. Results are ordered by identifier and cut to
    /// `limit` when given.
    pub fn get(&self, keys: &[Key], limit: Option<usize>) -> Result<Vec<StoredObject>> {
        let started = Instant::now();
        let result = self.get_inner(keys, limit);
        record("get", &result, started);
        result
    }

    fn get_inner(&self, keys: &[Key], limit: Option<usize>) -> Result<Vec<StoredObject>> {
        let table = self.read()?;
        let mut found: BTreeMap<String, StoredObject> = BTreeMap::new();

        for key in keys {
            if let Some(id) = key.identifier()? {
                if table.items.contains_key(&id) {
                    let object = table.snapshot(&id)?;
                    found.insert(id, object);
                    continue;
                }
            }
            for id in table.index.query(&key.predicates()?)? {
                if !found.contains_key(&id) {
                    let object = table.snapshot(&id)?;
                    found.insert(id, object);
                }
            }
        }

        let limit = limit.unwrap_or(usize::MAX);
        Ok(found.into_values().take(limit).collect())
    }

    /// Remove whatever each key resolves to. Returns how many items went.
    pub fn delete(&self, keys: &[Key]) -> Result<usize> {
        let started = Instant::now();
        let result = self.delete_inner(keys);
        record("delete", &result, started);
        result
    }

    fn delete_inner(&self, keys: &[Key]) -> Result<usize> {
        let mut table = self.write()?;
        // Resolve everything before removing anything, so a bad key
        // leaves the store untouched.
        let mut targets = BTreeSet::new();
        for key in keys {
            if let Some(id) = table.resolve_one(key)? {
                targets.insert(id);
            }
        }
        let removed = targets.iter().filter(|id| table.remove(id)).count();
        drop(table);

        if removed > 0 {
            debug!(removed, "objects deleted");
        }
        Ok(removed)
    }

    /// Replace the payload and index attributes if the caller saw the
    /// latest version.
    ///
    /// The identifier never changes: `new_key` may restate the same
    /// identity or omit it, and only its indexed attributes are applied.
    pub fn mutate(
        &self,
        old_key: &Key,
        new_key: &Key,
        expected: &Fingerprint,
        payload: Vec<u8>,
    ) -> Result<Mutation> {
        let started = Instant::now();
        let result = self.mutate_inner(old_key, new_key, expected, payload);
        record("mutate", &result, started);
        result
    }

    fn mutate_inner(
        &self,
        old_key: &Key,
        new_key: &Key,
        expected: &Fingerprint,
        payload: Vec<u8>,
    ) -> Result<Mutation> {
        let mut table = self.write()?;
        let Some(id) = table.resolve_one(old_key)? else {
            return Ok(Mutation::Missing);
        };

        let current = match table.items.get(&id) {
            Some(item) => item.fingerprint.clone(),
            None => return Err(Error::Internal(format!("resolved missing item '{id}'"))),
        };
        if &current != expected {
            debug!(id = %id, expected = %expected, current = %current, "stale fingerprint");
            return Ok(Mutation::Stale { current });
        }

        if let Some(new_id) = new_key.identifier()? {
            if new_id != id {
                return Err(Error::InvalidArgument(format!(
                    "mutate cannot move '{id}' to '{new_id}'"
                )));
            }
        }
        let parts = reconstruct(&id)?;
        let attributes = crate::key::expand_attributes(&parts, &new_key.indexed, true)?;
        let fingerprint = Fingerprint::of(&payload);

        let Table { items, index } = &mut *table;
        let item = items
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("resolved missing item '{id}'")))?;
        index.remove(&id, &item.attributes);
        index.add(&id, &attributes);
        item.payload = payload;
        item.fingerprint = fingerprint.clone();
        item.attributes = attributes;
        drop(table);

        debug!(id = %id, fingerprint = %fingerprint, "object mutated");
        Ok(Mutation::Applied { fingerprint })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let table = self.read()?;
        Ok(StoreStats {
            items: table.items.len(),
            attribute_names: table.index.names(),
            index_entries: table.index.len(),
        })
    }

    /// Verify that the item table and the index agree in both directions.
    pub fn check_consistency(&self) -> Result<()> {
        let table = self.read()?;
        let mut expected_entries = 0;
        for (id, item) in &table.items {
            for attr in &item.attributes {
                if !table.index.contains(id, attr) {
                    return Err(Error::Internal(format!("'{id}' missing from index at {attr}")));
                }
            }
            expected_entries += item.attributes.len();
        }
        if table.index.len() != expected_entries {
            return Err(Error::Internal(format!(
                "index holds {} entries, items account for {expected_entries}",
                table.index.len()
            )));
        }
        Ok(())
    }
}

fn record<T>(operation: &'static str, result: &Result<T>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::store_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", outcome),
        ],
    );
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", format!("store.{operation}"))],
    );
}

impl Store for StorageEngine {
    async fn create_object(&self, key: Key, payload: Vec<u8>) -> Result<Created> {
        self.create(&key, payload)
    }

    async fn get_objects(&self, keys: Vec<Key>, limit: Option<usize>) -> Result<Vec<StoredObject>> {
        self.get(&keys, limit)
    }

    async fn delete_objects(&self, keys: Vec<Key>) -> Result<()> {
        self.delete(&keys).map(|_| ())
    }

    async fn mutate_object(
        &self,
        old_key: Key,
        new_key: Key,
        expected: Fingerprint,
        payload: Vec<u8>,
    ) -> Result<Mutation> {
        self.mutate(&old_key, &new_key, &expected, payload)
    }
}
