//! Storage service routes over a shared [`StorageEngine`].

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::debug;

use super::wire::{
    CreateRequest, DeleteRequest, DeleteResponse, GetRequest, GetResponse, MutateRequest,
    MutateResponse,
};
use crate::error::Result;
use crate::store::{Created, StorageEngine, StoreStats};

pub fn router(engine: Arc<StorageEngine>) -> Router {
    Router::new()
        .route("/v1/objects/create", post(create))
        .route("/v1/objects/get", post(get_objects))
        .route("/v1/objects/delete", post(delete))
        .route("/v1/objects/mutate", post(mutate))
        .route("/v1/stats", get(stats))
        .with_state(engine)
}

async fn create(
    State(engine): State<Arc<StorageEngine>>,
    Json(req): Json<CreateRequest>,
) -> Result<Json<Created>> {
    Ok(Json(engine.create(&req.key, req.payload)?))
}

async fn get_objects(
    State(engine): State<Arc<StorageEngine>>,
    Json(req): Json<GetRequest>,
) -> Result<Json<GetResponse>> {
    let objects = engine.get(&req.keys, req.limit)?;
    debug!(keys = req.keys.len(), found = objects.len(), "get");
    Ok(Json(GetResponse { objects }))
}

async fn delete(
    State(engine): State<Arc<StorageEngine>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>> {
    let removed = engine.delete(&req.keys)?;
    Ok(Json(DeleteResponse { removed }))
}

async fn mutate(
    State(engine): State<Arc<StorageEngine>>,
    Json(req): Json<MutateRequest>,
) -> Result<Json<MutateResponse>> {
    let outcome = engine.mutate(&req.old_key, &req.new_key, &req.fingerprint, req.payload)?;
    Ok(Json(outcome.into()))
}

async fn stats(State(engine): State<Arc<StorageEngine>>) -> Result<Json<StoreStats>> {
    Ok(Json(engine.stats()?))
}
