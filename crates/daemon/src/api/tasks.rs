//! Quick-task routes: the HTTP face of the execution engine.
//!
//! Handlers are thin: validate, touch the task registry, and hand the
//! real work to the orchestrator session. The SSE writer is the only
//! place with logic of its own — heartbeats, terminal-close, and the
//! idle abort.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use ami_domain::error::Error;
use ami_domain::event::{EventAction, TaskEvent};
use ami_engine::{OrchestratorSession, TaskStatus};
use ami_tools::path::resolve_in_workspace;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn error_response(e: &Error) -> Response {
    let status = match e.kind() {
        "PATH_TRAVERSAL" => StatusCode::FORBIDDEN,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "INVALID_INPUT" => StatusCode::BAD_REQUEST,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

fn not_found(task_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("task '{task_id}' not found") })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /quick-task/execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub task: String,
}

pub async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> Response {
    if body.task.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "task field is required" })),
        )
            .into_response();
    }

    let task = match state.registry.create(&body.task) {
        Ok(task) => task,
        Err(e) => return error_response(&e),
    };

    match state.providers.default_provider() {
        Ok(provider) => {
            let session = OrchestratorSession::new(
                task.clone(),
                provider,
                state.memory.clone(),
                state.browser.clone(),
                state.config.agent.clone(),
                Duration::from_secs(state.config.tasks.session_idle_secs),
            );
            tokio::spawn(session.run());
        }
        Err(e) => {
            // No LLM backend: the task exists but fails immediately
            // with a terminal event naming the missing config.
            task.set_error(&e.to_string());
            task.set_status(TaskStatus::Failed);
            task.emitter().emit(TaskEvent::new(
                &task.task_id,
                EventAction::Error {
                    error_kind: Some(e.kind().into()),
                    message: e.to_string(),
                },
            ));
        }
    }

    Json(json!({ "task_id": task.task_id, "status": "started" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /quick-task/stream/{task_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stream(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };

    let emitter = task.emitter();
    let heartbeat = Duration::from_secs(state.config.tasks.heartbeat_secs);
    let idle_abort = Duration::from_secs(state.config.tasks.stream_idle_secs);

    let stream = async_stream::stream! {
        let mut idle = Duration::ZERO;
        loop {
            match emitter.get_event(heartbeat).await {
                Some(event) => {
                    idle = Duration::ZERO;
                    let last = event.closes_stream();
                    yield Ok::<String, std::convert::Infallible>(event.to_sse_frame());
                    if last {
                        break;
                    }
                }
                None => {
                    if emitter.is_closed() {
                        break;
                    }
                    idle += heartbeat;
                    if idle >= idle_abort {
                        let synthetic = TaskEvent::new(
                            task_id.clone(),
                            EventAction::End {
                                status: "failed".into(),
                                message: Some("idle timeout".into()),
                            },
                        );
                        yield Ok(synthetic.to_sse_frame());
                        break;
                    }
                    yield Ok(":hb\n\n".to_owned());
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /quick-task/message/{task_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn message(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };

    match body.get("type").and_then(|v| v.as_str()) {
        Some("human_response") => {
            let Some(response) = body.get("response").and_then(|v| v.as_str()) else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "response field is required" })),
                )
                    .into_response();
            };
            match task.provide_human_response(response) {
                Ok(()) => Json(json!({ "status": "delivered" })).into_response(),
                Err(e) => error_response(&e),
            }
        }
        Some("user_message") => {
            let Some(message) = body.get("message").and_then(|v| v.as_str()) else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "message field is required" })),
                )
                    .into_response();
            };
            match task.put_user_message(message) {
                Ok(()) => Json(json!({ "status": "queued" })).into_response(),
                Err(e) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": e.to_string() })),
                )
                    .into_response(),
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "type must be 'human_response' or 'user_message'" })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle: cancel / pause / resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };
    task.mark_cancelled("cancelled by user");
    Json(json!({ "status": "cancelled" })).into_response()
}

pub async fn pause(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };
    if task.status() != TaskStatus::Running {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "task is not running" })),
        )
            .into_response();
    }
    task.pause();
    task.set_status(TaskStatus::Waiting);
    Json(json!({ "status": "paused" })).into_response()
}

pub async fn resume(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };
    if task.status() != TaskStatus::Waiting {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "task is not waiting" })),
        )
            .into_response();
    }
    task.resume();
    task.set_status(TaskStatus::Running);
    Json(json!({ "status": "resumed" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Projections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list(State(state): State<AppState>) -> Response {
    let tasks: Vec<Value> = state.registry.list().iter().map(|t| t.to_json(false)).collect();
    let stats = state.registry.stats();
    Json(json!({
        "tasks": tasks,
        "total": state.registry.len(),
        "running": stats.get("running").copied().unwrap_or(0),
        "completed": stats.get("completed").copied().unwrap_or(0),
        "failed": stats.get("failed").copied().unwrap_or(0),
    }))
    .into_response()
}

pub async fn status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.registry.get(&task_id) {
        Some(task) => Json(task.to_json(false)).into_response(),
        None => not_found(&task_id),
    }
}

pub async fn result(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.registry.get(&task_id) {
        Some(task) => Json(json!({
            "task_id": task.task_id,
            "status": task.status(),
            "result": task.result(),
        }))
        .into_response(),
        None => not_found(&task_id),
    }
}

pub async fn detail(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.registry.get(&task_id) {
        Some(task) => Json(task.to_json(true)).into_response(),
        None => not_found(&task_id),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn workspace_list(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };
    match ami_tools::file_ops::list_dir(&task.workspace).await {
        Ok(entries) => {
            let files: Vec<Value> = entries
                .into_iter()
                .map(|(name, size, is_dir)| json!({ "name": name, "size": size, "is_dir": is_dir }))
                .collect();
            Json(json!({ "task_id": task_id, "files": files })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn workspace_read(
    State(state): State<AppState>,
    Path((task_id, path)): Path<(String, String)>,
) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };
    let resolved = match resolve_in_workspace(&task.workspace, &path) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match tokio::fs::read(&resolved).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error_response(&Error::NotFound(path))
        }
        Err(e) => error_response(&Error::Io(e)),
    }
}

pub async fn workspace_delete(
    State(state): State<AppState>,
    Path((task_id, path)): Path<(String, String)>,
) -> Response {
    let Some(task) = state.registry.get(&task_id) else {
        return not_found(&task_id);
    };
    let resolved = match resolve_in_workspace(&task.workspace, &path) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match tokio::fs::remove_file(&resolved).await {
        Ok(()) => Json(json!({ "status": "deleted" })).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error_response(&Error::NotFound(path))
        }
        Err(e) => error_response(&Error::Io(e)),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
