//! Public verification endpoints
//!
//! Endpoints:
//!   GET /verify/certificate/{serial} -> rank, points, issue time if intact
//!   GET /verify/physical/{serial}    -> tier, hologram, anonymous id, claim status
//!   GET /health                      -> liveness
//!
//! Unknown, malformed and tampered serials all answer `{"valid": false}` with
//! status 200. None of these responses carries a handle.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::api::{ApiResult, ApiState};
use crate::credentials::{CertificateVerification, PhysicalRewardVerification};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "honor-ledger",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /verify/certificate/{serial}
pub async fn verify_certificate(
    State(state): State<ApiState>,
    Path(serial): Path<String>,
) -> ApiResult<CertificateVerification> {
    Ok(Json(state.engine.verify_certificate(&serial).await?))
}

/// GET /verify/physical/{serial}
pub async fn verify_physical(
    State(state): State<ApiState>,
    Path(serial): Path<String>,
) -> ApiResult<PhysicalRewardVerification> {
    Ok(Json(state.engine.verify_physical_reward(&serial).await?))
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/verify/certificate/{serial}", get(verify_certificate))
        .route("/verify/physical/{serial}", get(verify_physical))
        .with_state(state)
}
