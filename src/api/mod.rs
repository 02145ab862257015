//! HTTP API for the Honor Ledger
//!
//! Two route groups share one [`Engine`]:
//! - public verification (`/verify/...`, `/health`), rate limited, no key
//! - ingest (`/actions`, `/evidence/...`, `/leaderboard`, `/statistics`,
//!   owner views), behind the `x-api-key` check
//!
//! Every response carries the security headers. Engine errors map to status
//! codes by [`ErrorKind`]; fatal ones are logged at `error` level as the
//! operational alert.

pub mod ingest;
pub mod middleware;
pub mod verify;

pub use middleware::{
    auth_middleware, body_size_middleware, rate_limit_middleware, security_headers_middleware,
    RateLimiter, SecurityMiddlewareConfig, SecurityState,
};

use axum::{
    http::{HeaderValue, StatusCode},
    middleware::from_fn,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::Engine;
use crate::error::{EngineError, ErrorKind};

/// Shared state for all handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
}

/// Engine error rendered as a JSON body and status code
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Rejected => match &self.0 {
                EngineError::UnknownSubmission(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                EngineError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            },
            ErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0.kind() {
            ErrorKind::Fatal => {
                error!(error = %self.0, "Fatal engine error");
                "internal error".to_string()
            }
            _ => self.0.to_string(),
        };
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let EngineError::CooldownActive { retry_after_secs, .. } = &self.0 {
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from(*retry_after_secs));
        }
        response
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the full router. Ingest routes require a key; both groups are rate
/// limited and size checked.
pub fn create_router(engine: Arc<Engine>, security: SecurityState) -> Router {
    let state = ApiState { engine };

    let ingest = ingest::create_router(state.clone()).route_layer(from_fn_with_state(
        security.clone(),
        auth_middleware,
    ));

    Router::new()
        .merge(verify::create_router(state))
        .merge(ingest)
        .layer(from_fn_with_state(security.clone(), body_size_middleware))
        .layer(from_fn_with_state(security, rate_limit_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::UnknownSubmission("x".into()), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidTransition {
                    from: "resolved",
                    action: "confirm",
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::UnknownTier("9000+".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (EngineError::InvalidCategory(String::new()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                EngineError::CooldownActive {
                    category: "media_shared".into(),
                    retry_after_secs: 30,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                EngineError::CorruptRecord("tier".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (EngineError::Conflict { attempts: 8 }, StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::Store("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                EngineError::SerialSpaceExhausted { attempts: 5 },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
