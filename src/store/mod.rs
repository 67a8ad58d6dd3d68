//! Storage: the in-memory engine and the interface the coordinator uses.
//!
//! [`Store`] is the seam between the claim protocol and wherever items live.
//! [`StorageEngine`] implements it in-process; `rpc::client::StorageClient`
//! implements it against a remote storage service.

mod engine;

pub use engine::StorageEngine;

use std::future::Future;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::key::Key;

/// Digest of an item's payload. Changes whenever the payload changes.
///
/// Always 64 lowercase hex characters; deserializing anything else fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(payload: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(payload)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        let well_formed = s.len() == 64
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(Error::InvalidArgument(format!(
                "fingerprint must be 64 lowercase hex characters, got {:?}",
                s.chars().take(70).collect::<String>()
            )));
        }
        Ok(Self(s))
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 12 hex chars
        let short: String = self.0.chars().take(12).collect();
        f.write_str(&short)
    }
}

/// Copy of a stored item handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Named key with the identity parts reconstructed.
    pub key: Key,
    #[serde(with = "crate::rpc::wire::base64_bytes")]
    pub payload: Vec<u8>,
    pub fingerprint: Fingerprint,
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub name: String,
    pub fingerprint: Fingerprint,
}

/// Outcome of a conditional update. Losing a race is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Payload replaced; carries the new fingerprint.
    Applied { fingerprint: Fingerprint },
    /// The expected fingerprint was stale; carries the current one.
    Stale { current: Fingerprint },
    /// Nothing stored under the key.
    Missing,
}

impl Mutation {
    pub fn is_applied(&self) -> bool {
        matches!(self, Mutation::Applied { .. })
    }
}

/// Point-in-time size of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub items: usize,
    pub attribute_names: usize,
    pub index_entries: usize,
}

/// Item storage primitives the claim protocol is built from.
pub trait Store: Send + Sync + 'static {
    /// Insert a new item. Fails with `AlreadyExists` if the identifier is taken.
    fn create_object(
        &self,
        key: Key,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Created>> + Send;

    /// Exact lookups and attribute queries, unioned and deduplicated.
    fn get_objects(
        &self,
        keys: Vec<Key>,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<StoredObject>>> + Send;

    /// Remove items. Missing keys are ignored.
    fn delete_objects(&self, keys: Vec<Key>) -> impl Future<Output = Result<()>> + Send;

    /// Compare-and-swap on the payload fingerprint.
    fn mutate_object(
        &self,
        old_key: Key,
        new_key: Key,
        expected: Fingerprint,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Mutation>> + Send;
}
