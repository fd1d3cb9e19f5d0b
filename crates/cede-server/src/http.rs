use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use cede_history::{HistoryRepository, MAX_HISTORY_ITEMS};
use cede_types::AnalysisHistoryRecord;

use crate::AppState;

#[derive(Debug, Deserialize, Default)]
struct HistoryQuery {
    limit: Option<usize>,
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/analysis-history",
            get(list_history).post(persist_history),
        )
        .route("/api/task-status/{task_id}", get(task_status))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("history API listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<Value>) {
    let limit = query.limit.unwrap_or(MAX_HISTORY_ITEMS);
    match state.history.list(limit).await {
        Ok(history) => (
            StatusCode::OK,
            Json(json!({ "success": true, "history": history })),
        ),
        Err(err) => {
            tracing::error!("failed to load analysis history: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Unable to load analysis history." })),
            )
        }
    }
}

async fn persist_history(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let has_task_id = payload
        .get("taskId")
        .and_then(Value::as_str)
        .map(str::trim)
        .is_some_and(|id| !id.is_empty());
    if !has_task_id {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "taskId is required." })),
        );
    }
    let record: AnalysisHistoryRecord = match serde_json::from_value(payload) {
        Ok(record) => record,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": format!("invalid history record: {err}") })),
            )
        }
    };
    match state.history.upsert(record).await {
        Ok(stored) => (
            StatusCode::OK,
            Json(json!({ "success": true, "record": stored })),
        ),
        Err(err) => {
            tracing::error!("failed to persist analysis history: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Unable to persist analysis history." })),
            )
        }
    }
}

/// Pass-through proxy so UI consumers poll one origin for status.
async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.engine.task_status(&task_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            tracing::error!("error fetching task status for {task_id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch task status" })),
            )
                .into_response()
        }
    }
}
