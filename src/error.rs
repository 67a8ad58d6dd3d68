//! Error types for intake-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An item with this identifier is already stored.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed key, empty query, or otherwise unusable input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The item changed between read and write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A dependent service failed or timed out.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Claim rounds exhausted under contention.
    #[error("busy: {0}")]
    Busy(String),

    /// The item table and index disagree. Indicates a bug.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Conflict(_) => "conflict",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Upstream(_) | Error::Http(_) => "upstream",
            Error::Busy(_) => "busy",
            Error::Internal(_) => "internal",
            Error::Config(_) => "config",
            Error::Json(_) | Error::Io(_) | Error::Other(_) => "other",
        }
    }

    /// Rebuild an error from its wire form.
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "already_exists" => Error::AlreadyExists(message),
            "invalid_argument" => Error::InvalidArgument(message),
            "conflict" => Error::Conflict(message),
            "invalid_transition" => {
                let (from, to) = message
                    .split_once(" -> ")
                    .map(|(f, t)| (f.to_string(), t.to_string()))
                    .unwrap_or_else(|| (message.clone(), String::new()));
                Error::InvalidTransition { from, to }
            }
            "upstream" => Error::Upstream(message),
            "busy" => Error::Busy(message),
            "internal" => Error::Internal(message),
            "config" => Error::Config(message),
            _ => Error::Other(message),
        }
    }

    /// Message without the kind prefix, so a round trip through
    /// [`Error::from_kind`] does not stack prefixes.
    pub fn detail(&self) -> String {
        match self {
            Error::AlreadyExists(m)
            | Error::InvalidArgument(m)
            | Error::Conflict(m)
            | Error::Upstream(m)
            | Error::Busy(m)
            | Error::Internal(m)
            | Error::Config(m)
            | Error::Other(m) => m.clone(),
            Error::InvalidTransition { from, to } => format!("{from} -> {to}"),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
