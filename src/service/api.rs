//! JSON API used by the chat interface
//!
//! Thin axum adapter over [`RatingEngine`]. Domain rejections come back as
//! 4xx with `{error, message}`; a transient store failure is a 503 the client
//! may retry.

use super::rate_limit::RaterRateLimiter;
use crate::engine::RatingEngine;
use crate::error::RoundError;
use crate::types::{Profile, Score};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<RatingEngine>,
    pub limiter: Arc<RaterRateLimiter>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterProfileRequest {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub photo: Option<String>,
}

/// `score: null` records a skip
#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rater_id: String,
    pub target_id: String,
    pub score: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub profile_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextProfileResponse {
    pub profile: Option<Profile>,
}

/// Error body for every non-2xx answer
#[derive(Debug)]
pub enum ApiError {
    Round(RoundError),
    BadRequest(String),
}

impl From<RoundError> for ApiError {
    fn from(error: RoundError) -> Self {
        ApiError::Round(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_request", "message": message })),
            )
                .into_response(),
            ApiError::Round(error) => {
                let status = status_for(&error);
                if error.is_rejection() {
                    debug!("Request rejected: {}", error);
                } else {
                    error!("Request failed: {}", error);
                }
                (
                    status,
                    Json(json!({ "error": error.code(), "message": error.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

fn status_for(error: &RoundError) -> StatusCode {
    match error {
        RoundError::ProfileNotFound { .. } | RoundError::RoundNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        RoundError::InvalidScore { .. } | RoundError::SelfRating => StatusCode::BAD_REQUEST,
        RoundError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RoundError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        RoundError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RoundError::DuplicateVote { .. }
        | RoundError::NoActiveRound
        | RoundError::CooldownActive { .. }
        | RoundError::RoundAlreadyClosed { .. }
        | RoundError::AlreadyEnrolled { .. }
        | RoundError::EntriesFrozen { .. }
        | RoundError::InvalidPhase { .. } => StatusCode::CONFLICT,
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/profiles", post(register_profile))
        .route("/profiles/{id}", get(get_profile))
        .route("/profiles/{id}/next", get(next_profile))
        .route("/ratings", post(record_rating))
        .route("/rounds/join", post(join_round))
        .route("/rounds/current", get(current_round))
        .route("/rounds/last/winners", get(last_winners))
        .with_state(state)
}

impl ApiState {
    fn limit(&self, rater_id: &str) -> Result<(), ApiError> {
        self.limiter.check(rater_id).map_err(|e| {
            self.engine.metrics().record_rate_limited();
            ApiError::from(e)
        })
    }
}

async fn register_profile(
    State(state): State<ApiState>,
    Json(request): Json<RegisterProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.id.trim().is_empty() || request.display_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "id and display_name must not be empty".to_string(),
        ));
    }
    let profile = state
        .engine
        .register_profile(&request.id, &request.display_name, request.photo)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_profile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    Ok(Json(state.engine.profile(&id).await?))
}

async fn next_profile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<NextProfileResponse>, ApiError> {
    state.limit(&id)?;
    let profile = state.engine.next_profile(&id).await?;
    Ok(Json(NextProfileResponse { profile }))
}

async fn record_rating(
    State(state): State<ApiState>,
    Json(request): Json<RatingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.limit(&request.rater_id)?;
    let score = match request.score {
        Some(value) => Score::rated(value)?,
        None => Score::Skip,
    };
    let receipt = state
        .engine
        .record_rating(&request.rater_id, &request.target_id, score)
        .await?;
    Ok(Json(receipt))
}

async fn join_round(
    State(state): State<ApiState>,
    Json(request): Json<JoinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.engine.join_global_round(&request.profile_id).await?;
    Ok(Json(receipt))
}

async fn current_round(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.current_round_status().await?))
}

async fn last_winners(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.winners_of_last_round().await?))
}
