//! Settings and integrations routes over the persisted stores.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn get_settings(State(state): State<AppState>) -> Response {
    let settings = state.settings.settings();
    // Credentials are never returned raw from the general endpoint.
    Json(json!({
        "credentials": state.settings.masked_credentials(),
        "overrides": settings.extra,
    }))
    .into_response()
}

pub async fn put_settings(State(state): State<AppState>, Json(patch): Json<Value>) -> Response {
    match state.settings.update_settings(patch) {
        Ok(_) => Json(json!({ "status": "saved" })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn credentials(State(state): State<AppState>) -> Response {
    Json(json!({ "credentials": state.settings.masked_credentials() })).into_response()
}

pub async fn list_integrations(State(state): State<AppState>) -> Response {
    Json(serde_json::to_value(state.settings.integrations()).unwrap_or(Value::Null))
        .into_response()
}

pub async fn install_integration(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let Some(id) = body.get("id").and_then(|v| v.as_str()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "id field is required" })),
        )
            .into_response();
    };
    let api_key = body
        .get("api_key")
        .and_then(|v| v.as_str())
        .map(String::from);
    match state.settings.install_integration(id, api_key) {
        Ok(()) => Json(json!({ "status": "installed", "id": id })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn remove_integration(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.settings.remove_integration(&id) {
        Ok(true) => Json(json!({ "status": "removed", "id": id })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("integration '{id}' not installed") })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
