//! HTTP surface: versioned JSON routes under `/api/v1`.
//!
//! The quick-task routes are the only surface touching the execution
//! engine; settings/integrations proxy the persisted stores and sit
//! behind the bearer check when a token is configured.

pub mod settings;
pub mod tasks;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::auth;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let quick_task = Router::new()
        .route("/quick-task/execute", post(tasks::execute))
        .route("/quick-task/stream/:task_id", get(tasks::stream))
        .route("/quick-task/message/:task_id", post(tasks::message))
        .route("/quick-task/cancel/:task_id", post(tasks::cancel))
        .route("/quick-task/pause/:task_id", post(tasks::pause))
        .route("/quick-task/resume/:task_id", post(tasks::resume))
        .route("/quick-task/tasks", get(tasks::list))
        .route("/quick-task/status/:task_id", get(tasks::status))
        .route("/quick-task/result/:task_id", get(tasks::result))
        .route("/quick-task/:task_id/detail", get(tasks::detail))
        .route("/quick-task/workspace/:task_id", get(tasks::workspace_list))
        .route(
            "/quick-task/workspace/:task_id/file/*path",
            get(tasks::workspace_read).delete(tasks::workspace_delete),
        );

    let cloud = Router::new()
        .route(
            "/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
        .route("/settings/credentials", get(settings::credentials))
        .route(
            "/integrations",
            get(settings::list_integrations).post(settings::install_integration),
        )
        .route("/integrations/:id", delete(settings::remove_integration))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .nest("/api/v1", quick_task.merge(cloud))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
