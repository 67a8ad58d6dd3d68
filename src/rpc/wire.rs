//! JSON request and response bodies shared by the servers and clients.

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::model::{Category, CustomerMessage, Status};
use crate::store::{Fingerprint, Mutation, StoredObject};

/// Byte payloads travel as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub key: Key,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub keys: Vec<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub objects: Vec<StoredObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateRequest {
    pub old_key: Key,
    pub new_key: Key,
    pub fingerprint: Fingerprint,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// `success` with the new fingerprint, or failure with the current one.
/// A failure without a fingerprint means nothing was stored under the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl From<Mutation> for MutateResponse {
    fn from(mutation: Mutation) -> Self {
        match mutation {
            Mutation::Applied { fingerprint } => Self {
                success: true,
                fingerprint: Some(fingerprint),
            },
            Mutation::Stale { current } => Self {
                success: false,
                fingerprint: Some(current),
            },
            Mutation::Missing => Self {
                success: false,
                fingerprint: None,
            },
        }
    }
}

impl From<MutateResponse> for Mutation {
    fn from(response: MutateResponse) -> Self {
        match (response.success, response.fingerprint) {
            (true, Some(fingerprint)) => Mutation::Applied { fingerprint },
            (false, Some(current)) => Mutation::Stale { current },
            _ => Mutation::Missing,
        }
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub category: Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub name: String,
    pub status: Status,
}

/// Zero or one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: Option<CustomerMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub messages: Vec<CustomerMessage>,
}

// ---------------------------------------------------------------------------
// Categorising
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub category: Category,
}
