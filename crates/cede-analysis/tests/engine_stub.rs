//! Wire-level tests for the engine client, driven against a local stub
//! engine bound to an ephemeral port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use cede_analysis::{
    analyze_file, AnalysisError, EngineClient, EngineConfig, PollOptions,
};
use cede_types::TaskState;

async fn serve_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client_for(base_url: &str) -> EngineClient {
    EngineClient::new(EngineConfig::new(base_url))
}

fn fast_options() -> PollOptions {
    PollOptions {
        max_attempts: 10,
        interval: Duration::from_millis(10),
    }
}

async fn submission_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("submission.msg");
    tokio::fs::write(&path, b"raw submission bytes").await.unwrap();
    path
}

#[tokio::test]
async fn submit_returns_engine_task_id() {
    let app = Router::new().route(
        "/submit-analysis",
        post(|| async { Json(json!({"task_id": "abc123"})) }),
    );
    let base = serve_stub(app).await;

    let task_id = client_for(&base)
        .submit("submission.msg", b"bytes".to_vec())
        .await
        .unwrap();
    assert_eq!(task_id, "abc123");
}

#[tokio::test]
async fn non_2xx_surfaces_engine_detail() {
    let app = Router::new().route(
        "/submit-analysis",
        post(|| async {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": "Unsupported file type", "error_code": "bad_ext"})),
            )
        }),
    );
    let base = serve_stub(app).await;

    let err = client_for(&base)
        .submit("submission.exe", b"bytes".to_vec())
        .await
        .unwrap_err();
    match err {
        AnalysisError::Server { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "Unsupported file type");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn unparsable_error_body_falls_back_to_http_status() {
    let app = Router::new().route(
        "/task-status/{task_id}",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "engine exploded") }),
    );
    let base = serve_stub(app).await;

    let err = client_for(&base).task_status("t-1").await.unwrap_err();
    match err {
        AnalysisError::Server { status, message } => {
            assert_eq!(status, 500);
            assert!(message.starts_with("HTTP 500"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn task_status_maps_wire_fields() {
    let app = Router::new().route(
        "/task-status/{task_id}",
        get(|Path(task_id): Path<String>| async move {
            Json(json!({
                "task_id": task_id,
                "status": "PROCESSING",
                "progress": 40,
                "current_status": "Analyzing documents"
            }))
        }),
    );
    let base = serve_stub(app).await;

    let status = client_for(&base).task_status("t-7").await.unwrap();
    assert_eq!(status.task_id, "t-7");
    assert_eq!(status.status, TaskState::Processing);
    assert_eq!(status.progress, Some(40));
    assert_eq!(status.current_status.as_deref(), Some("Analyzing documents"));
}

#[tokio::test]
async fn health_probe_reports_engine_liveness() {
    let app = Router::new().route("/health", get(|| async { Json(json!({"status": "healthy"})) }));
    let base = serve_stub(app).await;

    assert!(client_for(&base).health().await);
    assert!(!client_for("http://127.0.0.1:9").health().await);
}

#[tokio::test]
async fn analyze_resolves_result_and_reports_completion() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/submit-analysis",
            post(|| async { Json(json!({"task_id": "stub-ok"})) }),
        )
        .route(
            "/task-status/{task_id}",
            get(move |Path(task_id): Path<String>| {
                let calls = calls.clone();
                async move {
                    let body = match calls.fetch_add(1, Ordering::SeqCst) + 1 {
                        1 => json!({"task_id": task_id, "status": "PENDING", "progress": 10}),
                        2 => json!({
                            "task_id": task_id,
                            "status": "PROCESSING",
                            "progress": 40,
                            "current_status": "Analyzing documents"
                        }),
                        _ => json!({
                            "task_id": task_id,
                            "status": "SUCCESS",
                            "progress": 100,
                            "result": {"confidence_score": 0.9}
                        }),
                    };
                    Json(body)
                }
            }),
        );
    let base = serve_stub(app).await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = submission_file(&dir).await;
    let mut updates = Vec::new();
    let outcome = analyze_file(&client_for(&base), &path, fast_options(), |update| {
        updates.push((update.stage.clone(), update.progress));
    })
    .await
    .unwrap();

    assert_eq!(outcome.task_id, "stub-ok");
    assert_eq!(outcome.result, json!({"confidence_score": 0.9}));
    assert_eq!(outcome.progress_history.len(), 3);
    assert_eq!(outcome.progress_history[2].status, TaskState::Success);

    assert_eq!(updates.first().unwrap(), &("Submitting file...".to_string(), 0));
    assert!(updates.contains(&("Analyzing documents".to_string(), 40)));
    assert_eq!(updates.last().unwrap(), &("Complete!".to_string(), 100));
}

#[tokio::test]
async fn analyze_surfaces_failed_analysis_message() {
    let app = Router::new()
        .route(
            "/submit-analysis",
            post(|| async { Json(json!({"task_id": "stub-fail"})) }),
        )
        .route(
            "/task-status/{task_id}",
            get(|Path(task_id): Path<String>| async move {
                Json(json!({
                    "task_id": task_id,
                    "status": "FAILED",
                    "error": "Unsupported document type"
                }))
            }),
        );
    let base = serve_stub(app).await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = submission_file(&dir).await;
    let err = analyze_file(&client_for(&base), &path, fast_options(), |_| {})
        .await
        .unwrap_err();

    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::Failed { task_id, message }) => {
            assert_eq!(task_id, "stub-fail");
            assert_eq!(message, "Unsupported document type");
        }
        other => panic!("expected failed analysis, got {other:?}"),
    }
}

#[tokio::test]
async fn analyze_falls_back_to_task_result_endpoint() {
    let app = Router::new()
        .route(
            "/submit-analysis",
            post(|| async { Json(json!({"task_id": "stub-late"})) }),
        )
        .route(
            "/task-status/{task_id}",
            get(|Path(task_id): Path<String>| async move {
                Json(json!({"task_id": task_id, "status": "SUCCESS", "progress": 100}))
            }),
        )
        .route(
            "/task-result/{task_id}",
            get(|Path(task_id): Path<String>| async move {
                Json(json!({"task_id": task_id, "late": true}))
            }),
        );
    let base = serve_stub(app).await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = submission_file(&dir).await;
    let mut updates = Vec::new();
    let outcome = analyze_file(&client_for(&base), &path, fast_options(), |update| {
        updates.push((update.stage.clone(), update.progress));
    })
    .await
    .unwrap();

    assert_eq!(outcome.result, json!({"task_id": "stub-late", "late": true}));
    assert!(updates.contains(&("Retrieving results...".to_string(), 90)));
}
