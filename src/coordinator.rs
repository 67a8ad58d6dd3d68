//! Claim coordinator: submission and claiming of customer messages.
//!
//! Built on [`Store`] alone. A claim is a conditional status update from
//! to-do to in-process, keyed on the fingerprint read just before; when two
//! workers race for the same message, exactly one mutate applies and the
//! other moves on to the next candidate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info, warn};

use crate::classify::{Classifier, RetryPolicy, classify_with_retry};
use crate::config::{CATEGORISING_SERVICE, STORAGE_SERVICE, ServiceMap};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::model::{Category, CustomerMessage, NewMessage, Status, message_query};
use crate::rpc::client::{RemoteClassifier, StorageClient};
use crate::store::{Created, Fingerprint, Mutation, Store, StoredObject};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_claim, record_status_transition, start_claim_span};

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Candidates fetched per claim round.
    pub page_size: usize,
    /// Classification attempts and per-attempt timeout.
    pub retry: RetryPolicy,
    /// Give up with `Error::Busy` after this many full pages were lost.
    /// `None` keeps re-querying until a page comes back empty.
    pub max_rounds: Option<u32>,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            retry: RetryPolicy::default(),
            max_rounds: None,
        }
    }
}

pub struct ClaimCoordinator<S, C> {
    store: Arc<S>,
    classifier: C,
    config: ClaimConfig,
}

impl ClaimCoordinator<StorageClient, RemoteClassifier> {
    /// Coordinator talking to remote storage and categorising services.
    pub fn connect(services: &ServiceMap, config: ClaimConfig) -> Result<Self> {
        let store = StorageClient::new(services.address(STORAGE_SERVICE)?)?;
        let classifier =
            RemoteClassifier::new(services.address(CATEGORISING_SERVICE)?, config.retry.timeout)?;
        Ok(Self::new(Arc::new(store), classifier, config))
    }
}

impl<S: Store, C: Classifier> ClaimCoordinator<S, C> {
    pub fn new(store: Arc<S>, classifier: C, config: ClaimConfig) -> Self {
        Self {
            store,
            classifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    /// Classify and store a new message with status to-do.
    ///
    /// Nothing is written unless classification succeeds.
    pub async fn submit(&self, new: NewMessage) -> Result<CustomerMessage> {
        let prepared = new.prepare()?;

        let category =
            match classify_with_retry(&self.classifier, prepared.body(), &self.config.retry).await
            {
                Ok(category) => category,
                Err(e) => {
                    metrics::messages_submitted().add(
                        1,
                        &[
                            KeyValue::new("category", "unknown"),
                            KeyValue::new("result", "error"),
                        ],
                    );
                    warn!(error = %e, "message not stored, classification failed");
                    return Err(e);
                }
            };

        let message = prepared.into_message(category);
        let payload = serde_json::to_vec(&message)?;

        let result = self.create(&message.name, message.key(), payload).await;
        let label = match &result {
            Ok(_) => "ok",
            Err(Error::AlreadyExists(_)) => "duplicate",
            Err(_) => "error",
        };
        metrics::messages_submitted().add(
            1,
            &[
                KeyValue::new("category", category.as_str()),
                KeyValue::new("result", label),
            ],
        );

        let created = result?;
        info!(name = %created.name, %category, fingerprint = %created.fingerprint, "message stored");
        Ok(message)
    }

    /// Create once. After a transport failure the write may still have
    /// landed, so look the name up and accept it if it holds our payload.
    async fn create(&self, name: &str, key: Key, payload: Vec<u8>) -> Result<Created> {
        let fingerprint = Fingerprint::of(&payload);
        match self.store.create_object(key, payload).await {
            Err(e @ (Error::Upstream(_) | Error::Http(_))) => {
                warn!(name, error = %e, "create failed in transit, checking whether it landed");
                match self.store.get_objects(vec![Key::named(name)], Some(1)).await {
                    Ok(found) if found.iter().any(|o| o.fingerprint == fingerprint) => {
                        Ok(Created {
                            name: name.to_string(),
                            fingerprint,
                        })
                    }
                    _ => Err(e),
                }
            }
            other => other,
        }
    }

    /// Claim the oldest-ordered available message in `category`.
    ///
    /// Returns `None` once a query finds no to-do message. A round in which
    /// every candidate was taken by someone else triggers a fresh query.
    pub async fn claim_next(&self, category: Category) -> Result<Option<CustomerMessage>> {
        let span = start_claim_span(category);
        let started = Instant::now();

        let result = self
            .claim_loop(category, &span)
            .instrument(span.clone())
            .await;

        let outcome = match &result {
            Ok(Some(_)) => "claimed",
            Ok(None) => "empty",
            Err(Error::Busy(_)) => "busy",
            Err(_) => "error",
        };
        metrics::claims().add(
            1,
            &[
                KeyValue::new("category", category.as_str()),
                KeyValue::new("result", outcome),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "claim_next")],
        );
        result
    }

    async fn claim_loop(
        &self,
        category: Category,
        span: &tracing::Span,
    ) -> Result<Option<CustomerMessage>> {
        let query = message_query(Some(category), Some(Status::ToDo));
        let mut rounds: u32 = 0;
        let mut undecodable: HashSet<String> = HashSet::new();

        loop {
            if self.config.max_rounds.is_some_and(|max| rounds >= max) {
                warn!(rounds, "giving up on claim under contention");
                return Err(Error::Busy(format!(
                    "no {category} message claimed after {rounds} rounds"
                )));
            }
            rounds += 1;

            // Undecodable items stay in the index; widen the page past them.
            let page: Vec<StoredObject> = self
                .store
                .get_objects(
                    vec![query.clone()],
                    Some(self.config.page_size + undecodable.len()),
                )
                .await?
                .into_iter()
                .filter(|o| !undecodable.contains(o.key.name.as_deref().unwrap_or_default()))
                .collect();
            if page.is_empty() {
                debug!(rounds, "no message available");
                return Ok(None);
            }

            for object in page {
                let current = match decode(&object) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "skipping claim candidate");
                        undecodable.insert(object.key.name.clone().unwrap_or_default());
                        continue;
                    }
                };
                let claimed = current.with_status(Status::InProcess);
                match self
                    .swap(&current, &claimed, object.fingerprint.clone())
                    .await?
                {
                    Mutation::Applied { fingerprint } => {
                        record_claim(span, &claimed.name, rounds);
                        record_status_transition(
                            span,
                            &claimed.name,
                            current.status.as_str(),
                            claimed.status.as_str(),
                        );
                        info!(name = %claimed.name, %fingerprint, rounds, "message claimed");
                        return Ok(Some(claimed));
                    }
                    Mutation::Stale { .. } | Mutation::Missing => {
                        metrics::claim_conflicts()
                            .add(1, &[KeyValue::new("category", category.as_str())]);
                        debug!(name = %current.name, "candidate taken by another claimer");
                    }
                }
            }
        }
    }

    /// Replace `current` with `next`, conditional on `expected`.
    async fn swap(
        &self,
        current: &CustomerMessage,
        next: &CustomerMessage,
        expected: Fingerprint,
    ) -> Result<Mutation> {
        let payload = serde_json::to_vec(next)?;
        self.store
            .mutate_object(current.key(), next.key(), expected, payload)
            .await
    }

    async fn fetch(&self, name: &str) -> Result<Option<(CustomerMessage, Fingerprint)>> {
        let mut found = self
            .store
            .get_objects(vec![Key::named(name)], Some(1))
            .await?;
        match found.pop() {
            Some(object) => Ok(Some((decode(&object)?, object.fingerprint))),
            None => Ok(None),
        }
    }

    pub async fn get_message(&self, name: &str) -> Result<Option<CustomerMessage>> {
        Ok(self.fetch(name).await?.map(|(message, _)| message))
    }

    /// Remove a message. Unknown names are ignored.
    pub async fn delete_message(&self, name: &str) -> Result<()> {
        self.store.delete_objects(vec![Key::named(name)]).await?;
        info!(name, "message deleted");
        Ok(())
    }

    /// Move a message along its lifecycle.
    ///
    /// Returns `None` if no such message is stored. A concurrent change
    /// between the read and the write surfaces as `Error::Conflict`.
    pub async fn update_status(
        &self,
        name: &str,
        status: Status,
    ) -> Result<Option<CustomerMessage>> {
        let Some((current, fingerprint)) = self.fetch(name).await? else {
            return Ok(None);
        };
        if !current.status.can_transition_to(status) {
            return Err(Error::InvalidTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        let next = current.with_status(status);
        match self.swap(&current, &next, fingerprint).await? {
            Mutation::Applied { .. } => {
                let span = tracing::Span::current();
                record_status_transition(&span, name, current.status.as_str(), status.as_str());
                Ok(Some(next))
            }
            Mutation::Stale { .. } => Err(Error::Conflict(format!(
                "{name} changed while updating its status"
            ))),
            Mutation::Missing => Ok(None),
        }
    }

    /// Messages matching the filters. `None` matches any value.
    pub async fn list_messages(
        &self,
        category: Option<Category>,
        status: Option<Status>,
        limit: Option<usize>,
    ) -> Result<Vec<CustomerMessage>> {
        self.store
            .get_objects(vec![message_query(category, status)], limit)
            .await?
            .iter()
            .map(decode)
            .collect()
    }
}

fn decode(object: &StoredObject) -> Result<CustomerMessage> {
    serde_json::from_slice(&object.payload).map_err(|e| {
        Error::Internal(format!(
            "undecodable message payload under {:?}: {e}",
            object.key.name
        ))
    })
}
