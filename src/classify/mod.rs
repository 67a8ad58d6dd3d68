//! Classification gateway: message text → category.
//!
//! The coordinator only needs [`Classifier`]. Calls are wrapped by
//! [`classify_with_retry`], which bounds every attempt with a timeout and
//! gives up after a fixed number of attempts.

pub mod sentiment;

use std::future::Future;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::Category;
use crate::telemetry::metrics;

pub use sentiment::SentimentClassifier;

/// Scores below this are complaints.
pub const QUESTION_THRESHOLD: f64 = 0.0;
/// Scores at or above this are feedback; in between are questions.
pub const FEEDBACK_THRESHOLD: f64 = 0.6;

/// Map a sentiment score in `[-1, 1]` to a category.
pub fn category_for_score(score: f64) -> Category {
    if score < QUESTION_THRESHOLD {
        Category::Complaint
    } else if score < FEEDBACK_THRESHOLD {
        Category::Question
    } else {
        Category::Feedback
    }
}

/// Anything that can put a category on a piece of text.
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, text: &str) -> impl Future<Output = Result<Category>> + Send;
}

/// How hard to try before giving up on classification.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Classify `text`, retrying failed or timed-out attempts.
///
/// A timed-out attempt is abandoned and counts against the budget.
pub async fn classify_with_retry<C: Classifier>(
    classifier: &C,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Category> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=policy.attempts {
        match tokio::time::timeout(policy.timeout, classifier.classify(text)).await {
            Ok(Ok(category)) => {
                metrics::classification_attempts().add(1, &[KeyValue::new("result", "ok")]);
                debug!(attempt, %category, "classified");
                return Ok(category);
            }
            Ok(Err(e)) => {
                metrics::classification_attempts().add(1, &[KeyValue::new("result", "error")]);
                warn!(attempt, error = %e, "classification attempt failed");
                last_error = e.to_string();
            }
            Err(_) => {
                metrics::classification_attempts().add(1, &[KeyValue::new("result", "timeout")]);
                warn!(attempt, timeout = ?policy.timeout, "classification attempt timed out");
                last_error = format!("timed out after {:?}", policy.timeout);
            }
        }
    }

    Err(Error::Upstream(format!(
        "classification failed after {} attempts: {last_error}",
        policy.attempts
    )))
}
