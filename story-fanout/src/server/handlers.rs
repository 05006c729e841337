// HTTP request handlers
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use story_fanout_shared::{JobId, UserId};
use tracing::{error, info, warn};

use crate::errors::FanoutError;
use crate::server::state::AppState;

/// Followers seeded by `/add-followers` when no body is sent.
const DEFAULT_SEED_COUNT: u64 = 10_000;

/// Largest `count` accepted by `/add-followers`.
const MAX_SEED_COUNT: u64 = 1_000_000;

/// Largest `story_count` accepted by `/post-stories`.
const MAX_STORY_COUNT: u64 = 10_000;

type JsonResponse = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
pub struct AddFollowersParams {
    pub user_id: Option<String>,
    pub count: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddFollowersBody {
    pub follower_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct PostStoriesParams {
    pub user_id: Option<String>,
    pub story_count: Option<String>,
}

fn reply(status: StatusCode, message: impl Into<String>) -> JsonResponse {
    let status_label = if status.is_success() { "success" } else { "error" };
    (
        status,
        Json(json!({
            "status": status_label,
            "message": message.into(),
        })),
    )
}

fn error_response(err: &FanoutError) -> JsonResponse {
    let status = match err {
        FanoutError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FanoutError::JobNotFound(_) => StatusCode::NOT_FOUND,
        FanoutError::ShuttingDown
        | FanoutError::StoreUnavailable(_)
        | FanoutError::RetriesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        FanoutError::Cancelled(_) => StatusCode::CONFLICT,
        FanoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    reply(status, err.to_string())
}

fn required_user_id(user_id: Option<String>) -> Result<String, JsonResponse> {
    match user_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(reply(StatusCode::BAD_REQUEST, "Missing user_id")),
    }
}

/// Parse a positive count no larger than `max`.
fn positive_count(raw: &str, name: &str, max: u64) -> Result<u64, JsonResponse> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 && n <= max => Ok(n),
        _ => Err(reply(
            StatusCode::BAD_REQUEST,
            format!("{name} must be a positive integer no larger than {max}"),
        )),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, JsonResponse> {
    raw.parse::<JobId>()
        .map_err(|_| reply(StatusCode::BAD_REQUEST, format!("Invalid job id: {raw}")))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": "Story fan-out is running",
            "active_jobs": state.service.active_jobs(),
            "metrics": state.service.metrics(),
        })),
    )
}

/// Add followers to a user.
///
/// Takes the ids from a `{"follower_ids": [..]}` body. Without a body, seeds
/// followers `"1"..=count`.
pub async fn add_followers(
    State(state): State<AppState>,
    Query(params): Query<AddFollowersParams>,
    body: Bytes,
) -> impl IntoResponse {
    let user_id = match required_user_id(params.user_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let follower_ids: Vec<UserId> = if body.iter().all(u8::is_ascii_whitespace) {
        let count = match params.count.as_deref() {
            Some(raw) => match positive_count(raw, "count", MAX_SEED_COUNT) {
                Ok(n) => n,
                Err(response) => return response,
            },
            None => DEFAULT_SEED_COUNT,
        };
        (1..=count).map(|i| i.to_string()).collect()
    } else {
        match serde_json::from_slice::<AddFollowersBody>(&body) {
            Ok(parsed) => parsed.follower_ids,
            Err(e) => {
                warn!(error = %e, "Malformed add-followers body");
                return reply(StatusCode::BAD_REQUEST, format!("Invalid body: {e}"));
            }
        }
    };

    match state.service.add_followers(&user_id, &follower_ids).await {
        Ok(added) => {
            info!(user_id = %user_id, added, requested = follower_ids.len(), "Followers added");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "message": format!("Added {} followers to user {}", added, user_id),
                    "added": added,
                })),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// Publish `story_count` stories for a user, in order.
pub async fn post_stories(
    State(state): State<AppState>,
    Query(params): Query<PostStoriesParams>,
) -> impl IntoResponse {
    let user_id = match required_user_id(params.user_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let story_count = match params.story_count.as_deref() {
        Some(raw) => match positive_count(raw, "story_count", MAX_STORY_COUNT) {
            Ok(n) => n,
            Err(response) => return response,
        },
        None => return reply(StatusCode::BAD_REQUEST, "Missing story_count"),
    };

    let mut receipts = Vec::new();
    for i in 1..=story_count {
        let content = format!("Story {} content", i);
        match state.service.publish_story(&user_id, &content).await {
            Ok(receipt) => receipts.push(receipt),
            Err(e) => {
                let (status, Json(mut body)) = error_response(&e);
                body["published"] = json!(receipts);
                return (status, Json(body));
            }
        }
    }

    info!(user_id = %user_id, story_count, "Stories published");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "success",
            "message": format!("Published {} stories for user {}", receipts.len(), user_id),
            "jobs": receipts,
        })),
    )
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.service.job_status(job_id).await {
        Ok(job) => (StatusCode::OK, Json(json!({ "status": "success", "job": job }))),
        Err(e) => error_response(&e),
    }
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.service.resume_job(job_id).await {
        Ok(_) => reply(StatusCode::ACCEPTED, format!("Job {} resumed", job_id)),
        Err(e) => error_response(&e),
    }
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.service.cancel_job(job_id).await {
        Ok(()) => reply(StatusCode::ACCEPTED, format!("Cancellation of job {} requested", job_id)),
        Err(e) => error_response(&e),
    }
}

pub async fn follower_count(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.service.follower_count(&user_id).await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "user_id": user_id, "count": count })),
        ),
        Err(e) => error_response(&e),
    }
}
