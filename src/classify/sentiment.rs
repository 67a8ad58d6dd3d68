//! Sentiment-based classification through an LLM (rig-core, Anthropic).
//!
//! The model is asked for a single sentiment score in `[-1, 1]`, which is
//! then bucketed by [`category_for_score`](super::category_for_score).

use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use super::{Classifier, category_for_score};
use crate::error::{Error, Result};
use crate::model::Category;
use crate::telemetry::spans::start_classify_span;

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

const PREAMBLE: &str = "You score the sentiment of customer messages. \
Reply with a single number between -1.0 (very negative) and 1.0 (very positive) \
and nothing else.";

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(api_key: &SecretString) -> Result<rig::providers::anthropic::Client> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
        .map_err(|e| Error::Config(format!("cannot build Anthropic client: {e}")))
}

/// Classifier backed by an LLM sentiment score.
pub struct SentimentClassifier {
    client: rig::providers::anthropic::Client,
    model: String,
}

impl SentimentClassifier {
    pub fn new(api_key: &SecretString, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: anthropic_client(api_key)?,
            model: model.into(),
        })
    }

    /// Ask the model for a sentiment score.
    pub async fn score(&self, text: &str) -> Result<f64> {
        let span = start_classify_span(&self.model, "anthropic");
        let agent = self
            .client
            .agent(&self.model)
            .preamble(PREAMBLE)
            .max_tokens(16)
            .build();

        let reply = async { agent.prompt(text.to_string()).await }
            .instrument(span.clone())
            .await
            .map_err(|e| Error::Upstream(format!("sentiment request failed: {e}")))?;

        let score = parse_score(&reply)?;
        span.record("classify.score", score);
        Ok(score)
    }
}

impl Classifier for SentimentClassifier {
    async fn classify(&self, text: &str) -> Result<Category> {
        Ok(category_for_score(self.score(text).await?))
    }
}

/// Pull the first number in `[-1, 1]` out of a model reply.
pub fn parse_score(reply: &str) -> Result<f64> {
    reply
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| {
            token
                .trim_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
                .trim_end_matches('.')
        })
        .filter_map(|token| token.parse::<f64>().ok())
        .find(|score| (-1.0..=1.0).contains(score))
        .ok_or_else(|| Error::Upstream(format!("no sentiment score in reply: {reply:?}")))
}
