//! Span helpers for claims and classification.

use tracing::Span;

use crate::model::Category;

/// Start a span around one `claim_next` call.
///
/// `claim.name` and `claim.rounds` are filled in once the outcome is known.
pub fn start_claim_span(category: Category) -> Span {
    tracing::info_span!(
        "message.claim",
        "claim.category" = %category,
        "claim.name" = tracing::field::Empty,
        "claim.rounds" = tracing::field::Empty,
    )
}

/// Record the claimed message and how many pages it took.
pub fn record_claim(span: &Span, name: &str, rounds: u32) {
    span.record("claim.name", name);
    span.record("claim.rounds", rounds);
}

/// Emit a status transition event inside `span`.
pub fn record_status_transition(span: &Span, name: &str, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!("message.name" = name, from, to, "status_transition");
    });
}

/// Start a span for a classification call, using GenAI semantic-convention
/// field names.
pub fn start_classify_span(model: &str, provider: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
        "classify.score" = tracing::field::Empty,
    )
}
