//! Provisioning hook service
//!
//! A small HTTP surface the auth provider's sign-up/sign-in hooks (or the
//! marketplace's server handlers) call to make sure a worker profile exists.

mod handlers;

use crate::connection::HookConfig;
use crate::core::IdentityError;
use crate::reconcile::Reconciler;
use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use handlers::SECRET_HEADER;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(reconciler: Reconciler, config: &HookConfig) -> Self {
        Self {
            reconciler,
            secret: config.secret.as_deref().map(Arc::from),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::healthcheck))
        .route("/api/v1/profiles/reconcile", post(handlers::reconcile))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_manual_setup: Option<bool>,
}

#[derive(Debug)]
pub enum WebError {
    Input(String),
    Unauthorized,
    /// Reconciliation ended in `Failed`
    Store {
        code: &'static str,
        message: String,
        requires_manual_setup: bool,
    },
}

impl From<IdentityError> for WebError {
    fn from(err: IdentityError) -> Self {
        WebError::Input(err.to_string())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            WebError::Input(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: msg,
                    code: "input_error".to_string(),
                    requires_manual_setup: None,
                },
            ),
            WebError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "missing or invalid hook secret".to_string(),
                    code: "unauthorized".to_string(),
                    requires_manual_setup: None,
                },
            ),
            // Manual-setup failures will not clear on retry; the rest might
            WebError::Store {
                code,
                message,
                requires_manual_setup,
            } => (
                if requires_manual_setup {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::BAD_GATEWAY
                },
                ErrorResponse {
                    error: message,
                    code: code.to_string(),
                    requires_manual_setup: Some(requires_manual_setup),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
