//! HTTP queue client tests against a local stand-in for the queue service.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use task_worker::error::QueueError;
use task_worker::queue::{ArtifactRequest, HttpQueue};
use task_worker::{Credentials, Queue, TaskRef};

#[derive(Default)]
struct Seen {
    auth: Vec<String>,
    bodies: Vec<Value>,
}

type Shared = Arc<Mutex<Seen>>;

fn record(seen: &Shared, headers: &HeaderMap, body: Value) {
    let mut seen = seen.lock().unwrap();
    seen.auth.push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    );
    seen.bodies.push(body);
}

async fn reclaim(
    State(seen): State<Shared>,
    Path((task_id, run_id)): Path<(String, u32)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    record(&seen, &headers, body);
    if task_id == "gone" {
        return (StatusCode::CONFLICT, "run was reclaimed").into_response();
    }
    if task_id == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    Json(json!({
        "credentials": {"clientId": "c", "accessToken": format!("renewed-{}", run_id)},
        "takenUntil": "2026-10-18T12:20:00Z",
    }))
    .into_response()
}

async fn artifact(
    State(seen): State<Shared>,
    Path((_task_id, _run_id, name)): Path<(String, u32, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let content_type = body["contentType"].clone();
    record(&seen, &headers, body);
    Json(json!({
        "putUrl": format!("https://storage.local/{}", name),
        "contentType": content_type,
    }))
}

async fn resolve(
    State(seen): State<Shared>,
    Path((task_id, _run_id)): Path<(String, u32)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    record(&seen, &headers, body);
    if task_id == "gone" {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    }
}

async fn start_queue() -> (HttpQueue, Shared) {
    let seen = Shared::default();
    let app = Router::new()
        .route("/api/task/:task_id/runs/:run_id/reclaim", post(reclaim))
        .route("/api/task/:task_id/runs/:run_id/artifacts/:name", post(artifact))
        .route("/api/task/:task_id/runs/:run_id/completed", post(resolve))
        .route("/api/task/:task_id/runs/:run_id/failed", post(resolve))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let queue = HttpQueue::new(reqwest::Client::new(), format!("http://{}/api/", addr));
    (queue, seen)
}

fn creds() -> Credentials {
    Credentials::new("c", "t0")
}

#[tokio::test]
async fn test_reclaim_returns_new_lease() {
    let (queue, seen) = start_queue().await;

    let lease = queue.reclaim_task(&TaskRef::new("T1", 2), &creds()).await.unwrap();

    assert_eq!(lease.credentials.access_token, "renewed-2");
    assert!(lease.taken_until.is_some());
    assert_eq!(seen.lock().unwrap().auth, vec!["Bearer t0"]);
}

#[tokio::test]
async fn test_conflict_status_maps_to_conflict() {
    let (queue, _) = start_queue().await;

    let err = queue
        .reclaim_task(&TaskRef::new("gone", 0), &creds())
        .await
        .unwrap_err();

    assert_eq!(err, QueueError::Conflict("run was reclaimed".to_string()));
}

#[tokio::test]
async fn test_other_status_is_rejection() {
    let (queue, _) = start_queue().await;

    let err = queue
        .reclaim_task(&TaskRef::new("broken", 0), &creds())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        QueueError::Rejected {
            status: 500,
            message: "boom".to_string()
        }
    );
}

#[tokio::test]
async fn test_create_artifact_sends_camel_case_request() {
    let (queue, seen) = start_queue().await;
    let request = ArtifactRequest {
        storage_type: "s3".to_string(),
        expires: Utc::now(),
        content_type: "text/plain".to_string(),
    };

    let target = queue
        .create_artifact(&TaskRef::new("T1", 0), &creds(), "live.log", &request)
        .await
        .unwrap();

    assert_eq!(target.put_url, "https://storage.local/live.log");
    assert_eq!(target.content_type, "text/plain");
    let body = seen.lock().unwrap().bodies[0].clone();
    assert_eq!(body["storageType"], "s3");
    assert!(body["expires"].is_string());
}

#[tokio::test]
async fn test_artifact_names_with_url_delimiters_arrive_intact() {
    let (queue, _) = start_queue().await;
    let request = ArtifactRequest {
        storage_type: "s3".to_string(),
        expires: Utc::now(),
        content_type: "text/plain".to_string(),
    };

    for name in ["report#1.txt", "a?b.txt", "100%.txt", "dir/c.txt"] {
        let target = queue
            .create_artifact(&TaskRef::new("T1", 0), &creds(), name, &request)
            .await
            .unwrap();
        assert_eq!(target.put_url, format!("https://storage.local/{}", name));
    }
}

#[tokio::test]
async fn test_reports_accept_empty_body() {
    let (queue, seen) = start_queue().await;
    let task = TaskRef::new("T1", 0);

    queue.report_completed(&task, &creds()).await.unwrap();
    queue.report_failed(&task, &creds()).await.unwrap();

    assert_eq!(seen.lock().unwrap().auth.len(), 2);
}

#[tokio::test]
async fn test_report_conflict() {
    let (queue, _) = start_queue().await;

    let err = queue
        .report_completed(&TaskRef::new("gone", 0), &creds())
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_unreachable_queue_is_transport_error() {
    let queue = HttpQueue::new(reqwest::Client::new(), "http://127.0.0.1:1");

    let err = queue
        .reclaim_task(&TaskRef::new("T1", 0), &creds())
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Transport(_)));
}
