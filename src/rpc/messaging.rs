//! Messaging service routes over a [`ClaimCoordinator`].

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use super::wire::{
    ClaimRequest, MessageResponse, NameRequest, SearchRequest, SearchResponse, StatusRequest,
};
use crate::classify::Classifier;
use crate::coordinator::ClaimCoordinator;
use crate::error::Result;
use crate::model::{CustomerMessage, NewMessage};
use crate::store::Store;

type Shared<S, C> = State<Arc<ClaimCoordinator<S, C>>>;

pub fn router<S: Store, C: Classifier>(coordinator: Arc<ClaimCoordinator<S, C>>) -> Router {
    Router::new()
        .route("/v1/messages", post(submit::<S, C>))
        .route("/v1/messages/claim", post(claim::<S, C>))
        .route("/v1/messages/get", post(get_message::<S, C>))
        .route("/v1/messages/delete", post(delete_message::<S, C>))
        .route("/v1/messages/status", post(update_status::<S, C>))
        .route("/v1/messages/search", post(search::<S, C>))
        .with_state(coordinator)
}

async fn submit<S: Store, C: Classifier>(
    State(coordinator): Shared<S, C>,
    Json(req): Json<NewMessage>,
) -> Result<Json<CustomerMessage>> {
    Ok(Json(coordinator.submit(req).await?))
}

async fn claim<S: Store, C: Classifier>(
    State(coordinator): Shared<S, C>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<MessageResponse>> {
    let message = coordinator.claim_next(req.category).await?;
    Ok(Json(MessageResponse { message }))
}

async fn get_message<S: Store, C: Classifier>(
    State(coordinator): Shared<S, C>,
    Json(req): Json<NameRequest>,
) -> Result<Json<MessageResponse>> {
    let message = coordinator.get_message(&req.name).await?;
    Ok(Json(MessageResponse { message }))
}

async fn delete_message<S: Store, C: Classifier>(
    State(coordinator): Shared<S, C>,
    Json(req): Json<NameRequest>,
) -> Result<Json<MessageResponse>> {
    coordinator.delete_message(&req.name).await?;
    Ok(Json(MessageResponse { message: None }))
}

async fn update_status<S: Store, C: Classifier>(
    State(coordinator): Shared<S, C>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<MessageResponse>> {
    let message = coordinator.update_status(&req.name, req.status).await?;
    Ok(Json(MessageResponse { message }))
}

async fn search<S: Store, C: Classifier>(
    State(coordinator): Shared<S, C>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let messages = coordinator
        .list_messages(req.category, req.status, req.limit)
        .await?;
    Ok(Json(SearchResponse { messages }))
}
