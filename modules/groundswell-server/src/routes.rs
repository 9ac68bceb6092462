use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use groundswell_common::RawPost;
use groundswell_pipeline::Pipeline;
use groundswell_store::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub pipeline: Arc<Pipeline>,
    pub environment: String,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/process-post", post(process_post))
        .route("/api/process-post-sync", post(process_post_sync))
        .route("/api/queue/status", get(queue_status))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: String) -> impl IntoResponse {
    (status, Json(ErrorBody { error, message }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.environment,
    }))
}

#[derive(Deserialize)]
struct ProcessRequest {
    post: RawPost,
}

/// Missing id/title/body means the post can never be processed; reject at
/// the door.
fn validate(post: &RawPost) -> Result<(), String> {
    if post.id.is_empty() {
        return Err("post.id is required".to_string());
    }
    if post.title.is_empty() {
        return Err("post.title is required".to_string());
    }
    if post.body.is_empty() {
        return Err("post.body is required".to_string());
    }
    Ok(())
}

async fn process_post(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> impl IntoResponse {
    if let Err(message) = validate(&request.post) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_post", message).into_response();
    }

    let post_id = request.post.id.clone();
    match state.queue.enqueue(&request.post).await {
        Ok(_) => Json(serde_json::json!({ "success": true, "postId": post_id })).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "enqueue_failed",
            e.to_string(),
        )
        .into_response(),
    }
}

async fn process_post_sync(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> impl IntoResponse {
    if let Err(message) = validate(&request.post) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_post", message).into_response();
    }

    let post_id = request.post.id.clone();
    match state.pipeline.process(request.post).await {
        Ok(outcome) => Json(serde_json::json!({
            "success": true,
            "postId": post_id,
            "outcome": format!("{outcome:?}"),
        }))
        .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "pipeline_failed",
            e.to_string(),
        )
        .into_response(),
    }
}

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "queue_unavailable",
            e.to_string(),
        )
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, title: &str, body: &str) -> RawPost {
        RawPost {
            id: id.to_string(),
            source: "reddit".into(),
            title: title.to_string(),
            body: body.to_string(),
            author: "a".into(),
            score: 0,
            url: String::new(),
            sub_source: "s".into(),
            created_at: 0,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn validation_requires_id_title_and_body() {
        assert!(validate(&post("", "t", "b")).is_err());
        assert!(validate(&post("t3_a", "", "b")).is_err());
        assert!(validate(&post("t3_a", "t", "")).is_err());
        assert!(validate(&post("t3_a", "t", "b")).is_ok());
    }
}
