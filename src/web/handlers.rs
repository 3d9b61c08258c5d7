use super::{AppState, Result, WebError};
use crate::core::Identity;
use crate::reconcile::Outcome;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;

pub const SECRET_HEADER: &str = "x-hook-secret";

pub(super) async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(super) async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Identity>, JsonRejection>,
) -> Result<Json<Outcome>> {
    if let Some(expected) = state.secret.as_deref() {
        let provided = headers
            .get(SECRET_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        if !secret_matches(provided, expected) {
            return Err(WebError::Unauthorized);
        }
    }

    let Json(identity) = payload.map_err(|rejection| WebError::Input(rejection.body_text()))?;

    match state.reconciler.reconcile(&identity).await {
        Outcome::Failed {
            error,
            requires_manual_setup,
        } => Err(WebError::Store {
            code: error.code(),
            message: error.to_string(),
            requires_manual_setup,
        }),
        outcome => Ok(Json(outcome)),
    }
}

/// Constant-time in the secret's content; only its length can leak.
fn secret_matches(provided: &[u8], expected: &str) -> bool {
    provided.ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::secret_matches;

    #[test]
    fn test_secret_matches_exact_bytes_only() {
        assert!(secret_matches(b"s3cret", "s3cret"));
        assert!(!secret_matches(b"s3creT", "s3cret"));
        assert!(!secret_matches(b"s3cret-and-more", "s3cret"));
        assert!(!secret_matches(b"", "s3cret"));
    }
}
