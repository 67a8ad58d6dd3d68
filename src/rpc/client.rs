//! reqwest clients for the storage, categorising and messaging services.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::HealthResponse;
use super::wire::{
    ClaimRequest, ClassifyRequest, ClassifyResponse, CreateRequest, DeleteRequest,
    DeleteResponse, ErrorBody, GetRequest, GetResponse, MessageResponse, MutateRequest,
    MutateResponse, NameRequest, SearchRequest, SearchResponse, StatusRequest,
};
use crate::classify::Classifier;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::model::{Category, CustomerMessage, NewMessage, Status};
use crate::store::{Created, Fingerprint, Mutation, Store, StoreStats, StoredObject};

/// Upper bound on storage and messaging calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(url).json(body).send().await?;
        parse_response(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(url).send().await?;
        parse_response(response).await
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let text = response.text().await?;
    Err(match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Error::from_kind(&body.kind, body.message),
        Err(_) => unstructured(status, text),
    })
}

/// Errors without an `ErrorBody`, e.g. rejected JSON or a proxy page.
fn unstructured(status: StatusCode, text: String) -> Error {
    if status.is_client_error() {
        Error::InvalidArgument(format!("{status}: {text}"))
    } else {
        Error::Upstream(format!("{status}: {text}"))
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// [`Store`] backed by a remote storage service.
#[derive(Debug, Clone)]
pub struct StorageClient {
    http: HttpClient,
}

impl StorageClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(base_url, REQUEST_TIMEOUT)?,
        })
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.http.get_json("/v1/stats").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.http.get_json("/health").await
    }
}

impl Store for StorageClient {
    async fn create_object(&self, key: Key, payload: Vec<u8>) -> Result<Created> {
        self.http
            .post_json("/v1/objects/create", &CreateRequest { key, payload })
            .await
    }

    async fn get_objects(&self, keys: Vec<Key>, limit: Option<usize>) -> Result<Vec<StoredObject>> {
        let response: GetResponse = self
            .http
            .post_json("/v1/objects/get", &GetRequest { keys, limit })
            .await?;
        Ok(response.objects)
    }

    async fn delete_objects(&self, keys: Vec<Key>) -> Result<()> {
        let _: DeleteResponse = self
            .http
            .post_json("/v1/objects/delete", &DeleteRequest { keys })
            .await?;
        Ok(())
    }

    async fn mutate_object(
        &self,
        old_key: Key,
        new_key: Key,
        expected: Fingerprint,
        payload: Vec<u8>,
    ) -> Result<Mutation> {
        let request = MutateRequest {
            old_key,
            new_key,
            fingerprint: expected,
            payload,
        };
        let response: MutateResponse = self.http.post_json("/v1/objects/mutate", &request).await?;
        Ok(response.into())
    }
}

// ---------------------------------------------------------------------------
// Categorising
// ---------------------------------------------------------------------------

/// [`Classifier`] backed by a remote categorising service.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    http: HttpClient,
}

impl RemoteClassifier {
    /// `timeout` bounds a single request.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(base_url, timeout)?,
        })
    }
}

impl Classifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Result<Category> {
        let request = ClassifyRequest {
            text: text.to_string(),
        };
        let response: ClassifyResponse = self.http.post_json("/v1/category", &request).await?;
        Ok(response.category)
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// Client for the messaging service, used by the CLI.
#[derive(Debug, Clone)]
pub struct MessagingClient {
    http: HttpClient,
}

impl MessagingClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(base_url, REQUEST_TIMEOUT)?,
        })
    }

    pub async fn submit(&self, message: &NewMessage) -> Result<CustomerMessage> {
        self.http.post_json("/v1/messages", message).await
    }

    pub async fn claim_next(&self, category: Category) -> Result<Option<CustomerMessage>> {
        let response: MessageResponse = self
            .http
            .post_json("/v1/messages/claim", &ClaimRequest { category })
            .await?;
        Ok(response.message)
    }

    pub async fn get_message(&self, name: &str) -> Result<Option<CustomerMessage>> {
        let response: MessageResponse = self
            .http
            .post_json("/v1/messages/get", &NameRequest { name: name.to_string() })
            .await?;
        Ok(response.message)
    }

    pub async fn delete_message(&self, name: &str) -> Result<()> {
        let _: MessageResponse = self
            .http
            .post_json("/v1/messages/delete", &NameRequest { name: name.to_string() })
            .await?;
        Ok(())
    }

    pub async fn update_status(&self, name: &str, status: Status) -> Result<Option<CustomerMessage>> {
        let request = StatusRequest {
            name: name.to_string(),
            status,
        };
        let response: MessageResponse = self.http.post_json("/v1/messages/status", &request).await?;
        Ok(response.message)
    }

    pub async fn list_messages(&self, filter: &SearchRequest) -> Result<Vec<CustomerMessage>> {
        let response: SearchResponse = self.http.post_json("/v1/messages/search", filter).await?;
        Ok(response.messages)
    }
}
