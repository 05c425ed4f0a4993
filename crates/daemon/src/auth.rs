//! Bearer-token auth for the cloud-proxying endpoints.
//!
//! The token is hashed once at startup; requests are compared in
//! constant time. Local-only endpoints stay anonymous.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

fn bearer_matches(state: &AppState, header: Option<&str>) -> bool {
    let Some(expected) = &state.api_token_hash else {
        return true; // dev mode
    };
    let Some(header) = header else {
        return false;
    };
    let Some(token) = header.strip_prefix("Bearer ") else {
        return false;
    };
    hash_token(token).ct_eq(expected).into()
}

/// Middleware for routes that proxy to the cloud backend.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !bearer_matches(&state, header) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"error": "invalid or missing bearer token"})),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinct() {
        assert_eq!(hash_token("secret"), hash_token("secret"));
        assert_ne!(hash_token("secret"), hash_token("Secret"));
        assert_eq!(hash_token("secret").len(), 32);
    }
}
