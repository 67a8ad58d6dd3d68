//! Core data model.
//!
//! A customer message is a piece of incoming text that needs handling. It has
//! identity (creation time + sender), a category assigned by classification,
//! and a lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::{Key, KeyPart, WILDCARD};

/// Attribute names used in message keys.
pub mod attr {
    pub const TIMESTAMP: &str = "timestamp";
    pub const SENDER: &str = "sender";
    pub const CATEGORY: &str = "category";
    pub const STATUS: &str = "status";
}

// ---------------------------------------------------------------------------
// Customer Message
// ---------------------------------------------------------------------------

/// A stored customer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerMessage {
    /// Primary identifier, derived from `created_at` and the sender name.
    pub name: String,
    pub sender: Sender,
    pub body: String,
    pub category: Category,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl CustomerMessage {
    /// The storage key for this message in its current state.
    pub fn key(&self) -> Key {
        identity_key(self.created_at, &self.sender.name)
            .index(attr::CATEGORY, self.category.as_str())
            .index(attr::STATUS, self.status.as_str())
    }

    /// Copy of this message with a different status.
    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

fn identity_key(created_at: DateTime<Utc>, sender: &str) -> Key {
    Key::default()
        .part(attr::TIMESTAMP, created_at.timestamp_millis().to_string())
        .part(attr::SENDER, sender)
}

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// What kind of message this is, as decided by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Question,
    Complaint,
    Feedback,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Question, Category::Complaint, Category::Feedback];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Question => "QUESTION",
            Category::Complaint => "COMPLAINT",
            Category::Feedback => "FEEDBACK",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "QUESTION" => Ok(Category::Question),
            "COMPLAINT" => Ok(Category::Complaint),
            "FEEDBACK" => Ok(Category::Feedback),
            _ => Err(Error::InvalidArgument(format!("unknown category: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Waiting for a worker.
    ToDo,
    /// Claimed by a worker.
    InProcess,
    /// Handled.
    Done,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::ToDo => "TO_DO",
            Status::InProcess => "IN_PROCESS",
            Status::Done => "DONE",
        }
    }

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (ToDo, InProcess)
                | (InProcess, Done)
                | (InProcess, ToDo) // released by the worker
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "TO_DO" | "TODO" => Ok(Status::ToDo),
            "IN_PROCESS" => Ok(Status::InProcess),
            "DONE" => Ok(Status::Done),
            _ => Err(Error::InvalidArgument(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Attribute query over messages. `None` matches any value.
pub fn message_query(category: Option<Category>, status: Option<Status>) -> Key {
    Key::query(vec![
        KeyPart::new(attr::CATEGORY, category.map_or(WILDCARD, Category::as_str)),
        KeyPart::new(attr::STATUS, status.map_or(WILDCARD, Status::as_str)),
    ])
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a message to submit. Category and status are assigned on
/// submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender: Sender,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: Sender {
                name: sender.into(),
                email: None,
            },
            body: body.into(),
            created_at: None,
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.sender.email = Some(email.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Fix the creation time and check that the identity encodes cleanly
    /// and can be indexed.
    pub(crate) fn prepare(self) -> Result<Prepared> {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let identity = identity_key(created_at, &self.sender.name);
        identity.stored_attributes()?;
        let name = identity
            .identifier()?
            .ok_or_else(|| Error::InvalidArgument("message has no identity".to_string()))?;
        Ok(Prepared {
            name,
            sender: self.sender,
            body: self.body,
            created_at,
        })
    }
}

/// A validated submission waiting for its category.
pub(crate) struct Prepared {
    name: String,
    sender: Sender,
    body: String,
    created_at: DateTime<Utc>,
}

impl Prepared {
    pub(crate) fn body(&self) -> &str {
        &self.body
    }

    pub(crate) fn into_message(self, category: Category) -> CustomerMessage {
        CustomerMessage {
            name: self.name,
            sender: self.sender,
            body: self.body,
            category,
            status: Status::ToDo,
            created_at: self.created_at,
        }
    }
}
