//! End-to-end tests over real HTTP listeners on 127.0.0.1.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use intake_rs::classify::{Classifier, RetryPolicy};
use intake_rs::config::{CATEGORISING_SERVICE, STORAGE_SERVICE, ServiceMap};
use intake_rs::coordinator::{ClaimConfig, ClaimCoordinator};
use intake_rs::error::{Error, Result};
use intake_rs::key::{Key, KeyPart};
use intake_rs::model::{Category, NewMessage, Status};
use intake_rs::rpc::client::{MessagingClient, RemoteClassifier, StorageClient};
use intake_rs::rpc::wire::{ErrorBody, SearchRequest};
use intake_rs::rpc::{self, categorising, messaging, storage};
use intake_rs::store::{Mutation, StorageEngine, Store};
use tokio::net::TcpListener;

struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Category> {
        Ok(if text.contains("broken") {
            Category::Complaint
        } else if text.ends_with('?') {
            Category::Question
        } else {
            Category::Feedback
        })
    }
}

struct DownClassifier;

impl Classifier for DownClassifier {
    async fn classify(&self, _text: &str) -> Result<Category> {
        Err(Error::Upstream("model overloaded".to_string()))
    }
}

/// Serve `router` on an ephemeral port and return its base URL.
async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(rpc::serve(listener, router));
    format!("http://{addr}")
}

async fn storage_service() -> (String, Arc<StorageEngine>) {
    let engine = Arc::new(StorageEngine::new());
    let url = spawn(storage::router(Arc::clone(&engine)).merge(rpc::health_routes("storage"))).await;
    (url, engine)
}

async fn messaging_service<C: Classifier>(classifier: C) -> (MessagingClient, Arc<StorageEngine>) {
    let (storage_url, engine) = storage_service().await;
    let categorising_url = spawn(categorising::router(Arc::new(classifier))).await;

    let services = ServiceMap::empty()
        .with(STORAGE_SERVICE, storage_url)
        .with(CATEGORISING_SERVICE, categorising_url);
    let config = ClaimConfig {
        retry: RetryPolicy {
            attempts: 3,
            timeout: Duration::from_secs(2),
        },
        ..ClaimConfig::default()
    };
    let coordinator = Arc::new(ClaimCoordinator::connect(&services, config).unwrap());
    let url = spawn(messaging::router(coordinator)).await;
    (MessagingClient::new(&url).unwrap(), engine)
}

fn shape(id: &str, color: &str) -> Key {
    Key::default().part("id", id).index("color", color)
}

// ---------------------------------------------------------------------------
// Storage service
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn storage_client_round_trips_operations() {
    let (url, engine) = storage_service().await;
    let client = StorageClient::new(&url).unwrap();

    assert_eq!(client.health().await.unwrap().status, "healthy");

    let payload = vec![0u8, 159, 146, 150, 255];
    let created = client
        .create_object(shape("1", "red"), payload.clone())
        .await
        .unwrap();
    assert_eq!(created.name, "id=1");

    let found = client
        .get_objects(vec![Key::query(vec![KeyPart::new("color", "red")])], None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].payload, payload);
    assert_eq!(found[0].fingerprint, created.fingerprint);

    let applied = client
        .mutate_object(
            Key::named("id=1"),
            shape("1", "blue"),
            created.fingerprint.clone(),
            b"v2".to_vec(),
        )
        .await
        .unwrap();
    assert!(applied.is_applied());

    let stale = client
        .mutate_object(
            Key::named("id=1"),
            shape("1", "green"),
            created.fingerprint,
            b"v3".to_vec(),
        )
        .await
        .unwrap();
    assert!(matches!(stale, Mutation::Stale { .. }));

    let missing = client
        .mutate_object(
            Key::named("id=2"),
            shape("2", "green"),
            intake_rs::store::Fingerprint::of(b""),
            b"v3".to_vec(),
        )
        .await
        .unwrap();
    assert_eq!(missing, Mutation::Missing);

    assert_eq!(client.stats().await.unwrap().items, 1);
    client.delete_objects(vec![Key::named("id=1")]).await.unwrap();
    assert_eq!(engine.stats().unwrap().items, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn storage_errors_keep_their_kind() {
    let (url, _engine) = storage_service().await;
    let client = StorageClient::new(&url).unwrap();

    client.create_object(shape("1", "red"), vec![1]).await.unwrap();
    let err = client
        .create_object(shape("1", "red"), vec![2])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(ref name) if name == "id=1"));

    let err = client
        .get_objects(vec![Key::default()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_create_is_a_409_with_kind() {
    let (url, _engine) = storage_service().await;
    let http = reqwest::Client::new();
    let body = serde_json::json!({
        "key": { "parts": [{ "name": "id", "value": "1" }] },
        "payload": "aGVsbG8=",
    });

    let first = http
        .post(format!("{url}/v1/objects/create"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(first.status().is_success());

    let second = http
        .post(format!("{url}/v1/objects/create"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);
    let error: ErrorBody = second.json().await.unwrap();
    assert_eq!(error.kind, "already_exists");
    assert_eq!(error.message, "id=1");
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_fingerprint_is_rejected_and_store_keeps_serving() {
    let (url, engine) = storage_service().await;
    let client = StorageClient::new(&url).unwrap();
    let created = client.create_object(shape("1", "red"), vec![1]).await.unwrap();

    let http = reqwest::Client::new();
    for fingerprint in ["aéééééééé", "ABCDEF", "A".repeat(64).as_str()] {
        let body = serde_json::json!({
            "old_key": { "name": "id=1" },
            "new_key": { "parts": [{ "name": "id", "value": "1" }] },
            "fingerprint": fingerprint,
            "payload": "aGVsbG8=",
        });
        let response = http
            .post(format!("{url}/v1/objects/mutate"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error(), "{fingerprint}: {}", response.status());
    }

    let found = client.get_objects(vec![Key::named("id=1")], None).await.unwrap();
    assert_eq!(found[0].fingerprint, created.fingerprint);
    client.create_object(shape("2", "red"), vec![2]).await.unwrap();
    assert_eq!(engine.stats().unwrap().items, 2);
}

// ---------------------------------------------------------------------------
// Categorising service
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn remote_classifier_calls_categorising_service() {
    let url = spawn(categorising::router(Arc::new(KeywordClassifier))).await;
    let classifier = RemoteClassifier::new(&url, Duration::from_secs(2)).unwrap();

    assert_eq!(
        classifier.classify("the handle is broken").await.unwrap(),
        Category::Complaint
    );
    assert_eq!(
        classifier.classify("do you ship abroad?").await.unwrap(),
        Category::Question
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn classifier_failure_surfaces_as_upstream() {
    let url = spawn(categorising::router(Arc::new(DownClassifier))).await;
    let classifier = RemoteClassifier::new(&url, Duration::from_secs(2)).unwrap();

    let err = classifier.classify("hello").await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
}

// ---------------------------------------------------------------------------
// Messaging service
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn message_lifecycle_over_three_services() {
    let (client, engine) = messaging_service(KeywordClassifier).await;

    let stored = client
        .submit(&NewMessage::new("ann", "lid arrived broken").email("ann@example.com"))
        .await
        .unwrap();
    assert_eq!(stored.category, Category::Complaint);
    assert_eq!(stored.status, Status::ToDo);
    client
        .submit(&NewMessage::new("bob", "do you ship abroad?"))
        .await
        .unwrap();

    assert_eq!(client.claim_next(Category::Feedback).await.unwrap(), None);
    let claimed = client
        .claim_next(Category::Complaint)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.name, stored.name);
    assert_eq!(claimed.status, Status::InProcess);

    let shown = client.get_message(&stored.name).await.unwrap().unwrap();
    assert_eq!(shown.status, Status::InProcess);

    let err = client
        .update_status(&stored.name, Status::InProcess)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { ref from, ref to } if from == "IN_PROCESS" && to == "IN_PROCESS"));

    let done = client
        .update_status(&stored.name, Status::Done)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, Status::Done);

    let todo = client
        .list_messages(&SearchRequest {
            status: Some(Status::ToDo),
            ..SearchRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(todo.len(), 1);
    assert_eq!(todo[0].category, Category::Question);

    client.delete_message(&stored.name).await.unwrap();
    assert_eq!(client.get_message(&stored.name).await.unwrap(), None);
    assert_eq!(engine.stats().unwrap().items, 1);
    engine.check_consistency().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn submission_fails_cleanly_when_classifier_is_down() {
    let (client, engine) = messaging_service(DownClassifier).await;

    let err = client
        .submit(&NewMessage::new("ann", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(engine.stats().unwrap().items, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_submission_over_http_is_already_exists() {
    let (client, _engine) = messaging_service(KeywordClassifier).await;
    let at = chrono::Utc::now();

    client
        .submit(&NewMessage::new("ann", "hi").created_at(at))
        .await
        .unwrap();
    let err = client
        .submit(&NewMessage::new("ann", "hi again").created_at(at))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}
