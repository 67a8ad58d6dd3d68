//! HTTP transport for the three services.
//!
//! Each service is an axum [`Router`]; [`client`] holds the matching
//! reqwest clients. Errors cross the wire as [`wire::ErrorBody`] and are
//! rebuilt into the same [`Error`] variant on the other side.

pub mod categorising;
pub mod client;
pub mod messaging;
pub mod storage;
pub mod wire;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Error, Result};
use wire::ErrorBody;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::AlreadyExists(_) | Error::Conflict(_) | Error::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            Error::InvalidArgument(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        }
        let body = ErrorBody {
            kind: self.kind().to_string(),
            message: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Liveness route. Merge once per listener.
pub fn health_routes(service: &'static str) -> Router {
    Router::new().route(
        "/health",
        get(move || async move {
            Json(HealthResponse {
                status: "healthy".to_string(),
                service: service.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }),
    )
}

/// Serve `router` on `listener` until ctrl-c.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
