//! Categorising service: text in, category out.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use super::wire::{ClassifyRequest, ClassifyResponse};
use crate::classify::Classifier;
use crate::error::Result;

pub fn router<C: Classifier>(classifier: Arc<C>) -> Router {
    Router::new()
        .route("/v1/category", post(categorise::<C>))
        .with_state(classifier)
}

async fn categorise<C: Classifier>(
    State(classifier): State<Arc<C>>,
    Json(req): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>> {
    let category = classifier.classify(&req.text).await?;
    Ok(Json(ClassifyResponse { category }))
}
