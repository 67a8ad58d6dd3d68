//! # intake-rs
//!
//! Customer-message intake: an in-memory key/value store with composite
//! keys and a secondary index, plus a claim protocol that lets many
//! workers pull messages by category without handing one message to two
//! of them.
//!
//! Messages are classified on submission (LLM sentiment via rig-core),
//! stored with status to-do, and claimed through an optimistic
//! compare-and-swap on the payload fingerprint. Everything is reachable
//! in-process or over HTTP (axum servers, reqwest clients), with
//! OpenTelemetry observability.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod key;
pub mod model;
pub mod rpc;
pub mod store;
pub mod telemetry;
