//! Metric instrument factories for intake-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"intake-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for intake-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("intake-rs")
}

/// Counter: storage engine operations.
/// Labels: `operation` ("create" | "get" | "delete" | "mutate"), `result`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("intake.store.operations")
        .with_description("Number of storage engine operations")
        .build()
}

/// Counter: customer messages submitted.
/// Labels: `category`, `result` ("ok" | "duplicate" | "error").
pub fn messages_submitted() -> Counter<u64> {
    meter()
        .u64_counter("intake.messages.submitted")
        .with_description("Number of customer messages submitted")
        .build()
}

/// Counter: claim calls by outcome.
/// Labels: `category`, `result` ("claimed" | "empty" | "busy" | "error").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("intake.claims")
        .with_description("Number of claim attempts by outcome")
        .build()
}

/// Counter: candidates lost to a concurrent claimer.
/// Labels: `category`.
pub fn claim_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("intake.claims.conflicts")
        .with_description("Claim candidates lost to concurrent claimers")
        .build()
}

/// Counter: classification attempts.
/// Labels: `result` ("ok" | "error" | "timeout").
pub fn classification_attempts() -> Counter<u64> {
    meter()
        .u64_counter("intake.classification.attempts")
        .with_description("Number of classification attempts")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("intake.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
