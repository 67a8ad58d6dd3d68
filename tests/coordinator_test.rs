//! Submission and claiming against the in-process storage engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use intake_rs::classify::{Classifier, RetryPolicy};
use intake_rs::coordinator::{ClaimConfig, ClaimCoordinator};
use intake_rs::error::{Error, Result};
use intake_rs::key::Key;
use intake_rs::model::{Category, NewMessage, Status, message_query};
use intake_rs::store::{Created, Fingerprint, Mutation, StorageEngine, Store, StoredObject};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Complaints mention "broken", questions end with '?', the rest is feedback.
struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Category> {
        Ok(if text.contains("broken") {
            Category::Complaint
        } else if text.trim_end().ends_with('?') {
            Category::Question
        } else {
            Category::Feedback
        })
    }
}

/// Fails the first `failures` calls, then answers `Question`.
#[derive(Default)]
struct FlakyClassifier {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyClassifier {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for FlakyClassifier {
    async fn classify(&self, _text: &str) -> Result<Category> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(Error::Upstream("sentiment backend unavailable".to_string()))
        } else {
            Ok(Category::Question)
        }
    }
}

/// Never answers within any sensible timeout.
struct StalledClassifier {
    calls: AtomicUsize,
}

impl Classifier for StalledClassifier {
    async fn classify(&self, _text: &str) -> Result<Category> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Category::Feedback)
    }
}

/// Hands out outdated fingerprints, as if every read raced a writer.
struct StaleReads(StorageEngine);

impl Store for StaleReads {
    async fn create_object(&self, key: Key, payload: Vec<u8>) -> Result<Created> {
        self.0.create(&key, payload)
    }

    async fn get_objects(&self, keys: Vec<Key>, limit: Option<usize>) -> Result<Vec<StoredObject>> {
        let mut objects = self.0.get(&keys, limit)?;
        for object in &mut objects {
            object.fingerprint = Fingerprint::of(b"outdated");
        }
        Ok(objects)
    }

    async fn delete_objects(&self, keys: Vec<Key>) -> Result<()> {
        self.0.delete(&keys).map(|_| ())
    }

    async fn mutate_object(
        &self,
        old_key: Key,
        new_key: Key,
        expected: Fingerprint,
        payload: Vec<u8>,
    ) -> Result<Mutation> {
        self.0.mutate(&old_key, &new_key, &expected, payload)
    }
}

/// Storage whose first `failures` creates report an upstream error, after
/// committing the write when `commit` is set.
struct LostAcks {
    engine: StorageEngine,
    commit: bool,
    failures: AtomicUsize,
    creates: AtomicUsize,
}

impl LostAcks {
    fn new(commit: bool) -> Self {
        Self {
            engine: StorageEngine::new(),
            commit,
            failures: AtomicUsize::new(1),
            creates: AtomicUsize::new(0),
        }
    }
}

impl Store for LostAcks {
    async fn create_object(&self, key: Key, payload: Vec<u8>) -> Result<Created> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !failing {
            return self.engine.create(&key, payload);
        }
        if self.commit {
            self.engine.create(&key, payload)?;
        }
        Err(Error::Upstream("connection reset".to_string()))
    }

    async fn get_objects(&self, keys: Vec<Key>, limit: Option<usize>) -> Result<Vec<StoredObject>> {
        self.engine.get(&keys, limit)
    }

    async fn delete_objects(&self, keys: Vec<Key>) -> Result<()> {
        self.engine.delete(&keys).map(|_| ())
    }

    async fn mutate_object(
        &self,
        old_key: Key,
        new_key: Key,
        expected: Fingerprint,
        payload: Vec<u8>,
    ) -> Result<Mutation> {
        self.engine.mutate(&old_key, &new_key, &expected, payload)
    }
}

fn fast_retry() -> ClaimConfig {
    ClaimConfig {
        retry: RetryPolicy {
            attempts: 3,
            timeout: Duration::from_millis(50),
        },
        ..ClaimConfig::default()
    }
}

fn coordinator<C: Classifier>(classifier: C) -> ClaimCoordinator<StorageEngine, C> {
    ClaimCoordinator::new(Arc::new(StorageEngine::new()), classifier, fast_retry())
}

fn message(sender: &str, body: &str) -> NewMessage {
    NewMessage::new(sender, body).created_at(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_stores_classified_message_as_todo() {
    let coord = coordinator(KeywordClassifier);
    let stored = coord
        .submit(message("ann", "my kettle arrived broken").email("ann@example.com"))
        .await
        .unwrap();

    assert_eq!(stored.category, Category::Complaint);
    assert_eq!(stored.status, Status::ToDo);
    assert_eq!(stored.name, "timestamp=1714555800000~sender=ann");

    let fetched = coord.get_message(&stored.name).await.unwrap();
    assert_eq!(fetched, Some(stored));
}

#[tokio::test]
async fn failed_classification_stores_nothing() {
    let coord = coordinator(FlakyClassifier::failing(usize::MAX));
    let err = coord.submit(message("ann", "hello")).await.unwrap_err();

    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(coord.classifier().calls(), 3);
    assert_eq!(coord.store().stats().unwrap().items, 0);
}

#[tokio::test]
async fn timed_out_classification_counts_as_failure() {
    let coord = coordinator(StalledClassifier {
        calls: AtomicUsize::new(0),
    });
    let err = coord.submit(message("ann", "hello")).await.unwrap_err();

    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(coord.store().stats().unwrap().items, 0);
}

#[tokio::test]
async fn transient_classification_failures_are_retried() {
    let coord = coordinator(FlakyClassifier::failing(2));
    let stored = coord.submit(message("ann", "hello")).await.unwrap();

    assert_eq!(stored.category, Category::Question);
    assert_eq!(coord.classifier().calls(), 3);
    assert_eq!(coord.store().stats().unwrap().items, 1);
}

#[tokio::test]
async fn duplicate_submission_is_rejected() {
    let coord = coordinator(KeywordClassifier);
    coord.submit(message("ann", "first")).await.unwrap();

    let err = coord.submit(message("ann", "second")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(coord.store().stats().unwrap().items, 1);
}

#[tokio::test]
async fn unencodable_sender_is_rejected_before_classification() {
    let coord = coordinator(FlakyClassifier::failing(0));
    let err = coord
        .submit(message("ann~bob", "hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(coord.classifier().calls(), 0);
}

#[tokio::test]
async fn wildcard_sender_is_rejected_before_classification() {
    let coord = coordinator(FlakyClassifier::failing(0));
    let err = coord.submit(message("*", "hello")).await.unwrap_err();

    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(coord.classifier().calls(), 0);
    assert_eq!(coord.store().stats().unwrap().items, 0);
}

#[tokio::test]
async fn create_that_landed_before_a_transport_error_counts_as_stored() {
    let store = Arc::new(LostAcks::new(true));
    let coord = ClaimCoordinator::new(Arc::clone(&store), KeywordClassifier, fast_retry());

    let stored = coord.submit(message("ann", "broken hinge")).await.unwrap();
    assert_eq!(stored.category, Category::Complaint);
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(store.engine.stats().unwrap().items, 1);

    let fetched = coord.get_message(&stored.name).await.unwrap();
    assert_eq!(fetched, Some(stored));
}

#[tokio::test]
async fn create_lost_in_transit_is_reported_not_retried() {
    let store = Arc::new(LostAcks::new(false));
    let coord = ClaimCoordinator::new(Arc::clone(&store), KeywordClassifier, fast_retry());

    let err = coord.submit(message("ann", "broken hinge")).await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(store.engine.stats().unwrap().items, 0);
}

#[tokio::test]
async fn transport_error_over_someone_elses_message_stays_an_error() {
    let store = Arc::new(LostAcks::new(false));
    store.failures.store(0, Ordering::SeqCst);
    let coord = ClaimCoordinator::new(Arc::clone(&store), KeywordClassifier, fast_retry());
    coord.submit(message("ann", "first")).await.unwrap();

    store.failures.store(1, Ordering::SeqCst);
    let err = coord.submit(message("ann", "second")).await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    let kept = coord
        .get_message("timestamp=1714555800000~sender=ann")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kept.body, "first");
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_on_empty_category_returns_none() {
    let coord = coordinator(KeywordClassifier);
    coord.submit(message("ann", "thanks, great")).await.unwrap();

    assert_eq!(coord.claim_next(Category::Complaint).await.unwrap(), None);
}

#[tokio::test]
async fn undecodable_candidates_are_skipped() {
    let config = ClaimConfig {
        page_size: 2,
        ..fast_retry()
    };
    let coord = ClaimCoordinator::new(Arc::new(StorageEngine::new()), KeywordClassifier, config);
    for i in 0..3 {
        let key = message_query(Some(Category::Question), Some(Status::ToDo))
            .part("a", format!("junk{i}"));
        coord.store().create(&key, b"not a message".to_vec()).unwrap();
    }
    coord.submit(message("ann", "any news?")).await.unwrap();

    let claimed = coord.claim_next(Category::Question).await.unwrap().unwrap();
    assert_eq!(claimed.sender.name, "ann");
    assert_eq!(coord.claim_next(Category::Question).await.unwrap(), None);
    assert_eq!(coord.store().stats().unwrap().items, 4);
}

#[tokio::test]
async fn each_message_is_claimed_once() {
    let coord = coordinator(KeywordClassifier);
    for sender in ["ann", "bob", "cat"] {
        coord
            .submit(message(sender, "where is my order?"))
            .await
            .unwrap();
    }
    coord.submit(message("dan", "broken lid")).await.unwrap();

    let mut seen = HashSet::new();
    while let Some(claimed) = coord.claim_next(Category::Question).await.unwrap() {
        assert_eq!(claimed.category, Category::Question);
        assert_eq!(claimed.status, Status::InProcess);
        assert!(seen.insert(claimed.name.clone()));

        let stored = coord.get_message(&claimed.name).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::InProcess);
    }
    assert_eq!(seen.len(), 3);

    let complaints = coord
        .list_messages(Some(Category::Complaint), Some(Status::ToDo), None)
        .await
        .unwrap();
    assert_eq!(complaints.len(), 1);
    coord.store().check_consistency().unwrap();
}

async fn race(workers: usize, messages: usize) -> Vec<String> {
    let coord = Arc::new(coordinator(KeywordClassifier));
    for i in 0..messages {
        coord
            .submit(message(&format!("sender{i:03}"), "is this in stock?"))
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.claim_next(Category::Question).await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap().unwrap() {
            winners.push(claimed.name);
        }
    }
    coord.store().check_consistency().unwrap();
    winners
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_get_distinct_messages() {
    let winners = race(8, 25).await;
    assert_eq!(winners.len(), 8);
    assert_eq!(winners.iter().collect::<HashSet<_>>().len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surplus_workers_find_nothing_left() {
    let winners = race(24, 5).await;
    assert_eq!(winners.len(), 5);
    assert_eq!(winners.iter().collect::<HashSet<_>>().len(), 5);
}

#[tokio::test]
async fn contended_claim_gives_up_after_max_rounds() {
    let store = Arc::new(StaleReads(StorageEngine::new()));
    let config = ClaimConfig {
        max_rounds: Some(3),
        ..fast_retry()
    };
    let coord = ClaimCoordinator::new(store, KeywordClassifier, config);
    coord.submit(message("ann", "broken again")).await.unwrap();

    let err = coord.claim_next(Category::Complaint).await.unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_follows_allowed_transitions() {
    let coord = coordinator(KeywordClassifier);
    let stored = coord.submit(message("ann", "broken")).await.unwrap();

    let err = coord
        .update_status(&stored.name, Status::Done)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let claimed = coord.claim_next(Category::Complaint).await.unwrap().unwrap();
    let released = coord
        .update_status(&claimed.name, Status::ToDo)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.status, Status::ToDo);

    let again = coord.claim_next(Category::Complaint).await.unwrap().unwrap();
    assert_eq!(again.name, stored.name);
    let done = coord
        .update_status(&again.name, Status::Done)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, Status::Done);
    assert_eq!(coord.claim_next(Category::Complaint).await.unwrap(), None);
}

#[tokio::test]
async fn status_update_of_unknown_message_is_none() {
    let coord = coordinator(KeywordClassifier);
    let updated = coord
        .update_status("timestamp=1~sender=nobody", Status::InProcess)
        .await
        .unwrap();
    assert_eq!(updated, None);
}

#[tokio::test]
async fn status_update_against_concurrent_change_conflicts() {
    let store = Arc::new(StaleReads(StorageEngine::new()));
    let coord = ClaimCoordinator::new(store, KeywordClassifier, fast_retry());
    let stored = coord.submit(message("ann", "broken")).await.unwrap();

    let err = coord
        .update_status(&stored.name, Status::InProcess)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn list_filters_by_category_and_status() {
    let coord = coordinator(KeywordClassifier);
    coord.submit(message("ann", "broken")).await.unwrap();
    coord.submit(message("bob", "why?")).await.unwrap();
    coord.submit(message("cat", "lovely")).await.unwrap();
    coord.claim_next(Category::Question).await.unwrap();

    assert_eq!(coord.list_messages(None, None, None).await.unwrap().len(), 3);
    assert_eq!(coord.list_messages(None, None, Some(2)).await.unwrap().len(), 2);
    assert_eq!(
        coord
            .list_messages(None, Some(Status::ToDo), None)
            .await
            .unwrap()
            .len(),
        2
    );
    let questions = coord
        .list_messages(Some(Category::Question), None, None)
        .await
        .unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].status, Status::InProcess);
}

#[tokio::test]
async fn delete_message_is_idempotent() {
    let coord = coordinator(KeywordClassifier);
    let stored = coord.submit(message("ann", "broken")).await.unwrap();

    coord.delete_message(&stored.name).await.unwrap();
    coord.delete_message(&stored.name).await.unwrap();

    assert_eq!(coord.get_message(&stored.name).await.unwrap(), None);
    assert_eq!(coord.claim_next(Category::Complaint).await.unwrap(), None);
    coord.store().check_consistency().unwrap();
}
