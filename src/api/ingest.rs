//! Authenticated ingest endpoints
//!
//! Called by the trusted activity pipeline that already knows the external
//! id. The id travels in the request body only, is anonymized on arrival and
//! never appears in a response or a log line.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiResult, ApiState};
use crate::credentials::{Certificate, PhysicalReward, PhysicalRewardVerification};
use crate::engine::{ActionCompleted, ActionReport, EngineEvent};
use crate::evidence::{EvidenceSubmission, ExtractionResult};
use crate::reputation::{GrantOutcome, LeaderboardEntry, Profile, Statistics};

const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Body naming the acting member
#[derive(Deserialize)]
pub struct OwnerRequest {
    pub external_id: String,
}

#[derive(Deserialize)]
pub struct SubmitEvidenceRequest {
    pub external_id: String,
    /// Reading from the upstream extractor; absent when it produced nothing
    #[serde(default)]
    pub extraction: Option<ExtractionResult>,
}

#[derive(Deserialize)]
pub struct ChooseTierRequest {
    pub external_id: String,
    pub tier: String,
}

#[derive(Deserialize)]
pub struct GrantRequest {
    pub external_id: String,
    pub achievement_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct GrantResponse {
    pub outcome: GrantOutcome,
    pub events: Vec<EngineEvent>,
}

#[derive(Serialize)]
pub struct OwnerCredentials {
    pub certificates: Vec<Certificate>,
    pub physical_reward: Option<PhysicalReward>,
}

/// POST /actions
pub async fn record_action(
    State(state): State<ApiState>,
    Json(action): Json<ActionCompleted>,
) -> ApiResult<ActionReport> {
    Ok(Json(state.engine.record_action(action).await?))
}

/// POST /evidence
pub async fn submit_evidence(
    State(state): State<ApiState>,
    Json(req): Json<SubmitEvidenceRequest>,
) -> ApiResult<EvidenceSubmission> {
    let reading = req.extraction.ok_or("extractor produced no reading");
    let submission = state
        .engine
        .submit_evidence(req.external_id, async move { reading })
        .await?;
    Ok(Json(submission))
}

/// POST /evidence/{id}/confirm
pub async fn confirm_evidence(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<ActionReport> {
    Ok(Json(state.engine.confirm_evidence(req.external_id, id).await?))
}

/// POST /evidence/{id}/reject
pub async fn reject_evidence(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<EvidenceSubmission> {
    Ok(Json(state.engine.reject_evidence(req.external_id, id)?))
}

/// POST /evidence/{id}/choose
pub async fn choose_evidence(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChooseTierRequest>,
) -> ApiResult<ActionReport> {
    Ok(Json(
        state
            .engine
            .choose_evidence(req.external_id, id, &req.tier)
            .await?,
    ))
}

/// POST /achievements/grant
pub async fn grant_achievement(
    State(state): State<ApiState>,
    Json(req): Json<GrantRequest>,
) -> ApiResult<GrantResponse> {
    let (outcome, events) = state
        .engine
        .grant_manual_achievement(req.external_id, &req.achievement_id)
        .await?;
    Ok(Json(GrantResponse { outcome, events }))
}

/// POST /profile
pub async fn profile(
    State(state): State<ApiState>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<Option<Profile>> {
    Ok(Json(state.engine.profile(req.external_id).await?))
}

/// POST /credentials
pub async fn owner_credentials(
    State(state): State<ApiState>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<OwnerCredentials> {
    let certificates = state.engine.certificates_for(req.external_id.clone()).await?;
    let physical_reward = state.engine.physical_reward_for(req.external_id).await?;
    Ok(Json(OwnerCredentials {
        certificates,
        physical_reward,
    }))
}

/// POST /activity/purge
pub async fn purge_activity(
    State(state): State<ApiState>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<bool> {
    Ok(Json(state.engine.purge_activity(req.external_id).await?))
}

/// POST /physical/{serial}/claim
pub async fn claim_physical(
    State(state): State<ApiState>,
    Path(serial): Path<String>,
) -> ApiResult<PhysicalRewardVerification> {
    Ok(Json(state.engine.claim_physical_reward(&serial).await?))
}

/// GET /leaderboard?limit=N
pub async fn leaderboard(
    State(state): State<ApiState>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .min(MAX_LEADERBOARD_LIMIT);
    Ok(Json(state.engine.leaderboard(limit).await?))
}

/// GET /statistics
pub async fn statistics(State(state): State<ApiState>) -> ApiResult<Statistics> {
    Ok(Json(state.engine.statistics().await?))
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/actions", post(record_action))
        .route("/evidence", post(submit_evidence))
        .route("/evidence/{id}/confirm", post(confirm_evidence))
        .route("/evidence/{id}/reject", post(reject_evidence))
        .route("/evidence/{id}/choose", post(choose_evidence))
        .route("/achievements/grant", post(grant_achievement))
        .route("/profile", post(profile))
        .route("/credentials", post(owner_credentials))
        .route("/activity/purge", post(purge_activity))
        .route("/physical/{serial}/claim", post(claim_physical))
        .route("/leaderboard", get(leaderboard))
        .route("/statistics", get(statistics))
        .with_state(state)
}
