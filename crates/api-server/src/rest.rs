//! REST API handlers for campaign control and operational endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::error::{CampaignError, ErrorKind};
use campaign_core::types::{
    CampaignId, CampaignKey, CampaignRecord, CampaignStatus, StartRequest,
};
use campaign_dispatch::{Orchestrator, RunnerState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Header set by the upstream gateway for authenticated users.
pub const OWNER_HEADER: &str = "x-owner-id";
/// Header carrying an anonymous caller's session token.
pub const SESSION_HEADER: &str = "x-session-token";

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, node_id: impl Into<String>) -> Self {
        Self {
            orchestrator,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartCampaignBody {
    #[serde(flatten)]
    pub request: StartRequest,
    /// Replace a campaign already running for the caller instead of failing.
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartCampaignResponse {
    pub campaign_id: CampaignId,
    /// Present when the server minted a session for an anonymous caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopCampaignResponse {
    pub stopped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignListResponse {
    pub running: Option<RunnerState>,
    pub campaigns: Vec<CampaignRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub running_campaigns: usize,
}

/// Error returned by every campaign handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn missing_identity() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorResponse {
                error: "missing_identity".to_string(),
                message: format!("Send an {} or {} header", OWNER_HEADER, SESSION_HEADER),
            },
        }
    }

    fn invalid_id(raw: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: "invalid_campaign_id".to_string(),
                message: format!("'{}' is not a campaign id", raw),
            },
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Config | ErrorKind::Transport => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        let kind = err.kind();
        let message = if kind == ErrorKind::Internal {
            error!(error = %err, "Campaign request failed");
            metrics::counter!("api.errors").increment(1);
            "Internal processing error".to_string()
        } else {
            err.to_string()
        };
        Self {
            status: status_for(kind),
            body: ErrorResponse {
                error: err.code().to_string(),
                message,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Resolve the caller's campaign key. The owner header wins over a session token.
pub fn caller_key(headers: &HeaderMap) -> Option<CampaignKey> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header(OWNER_HEADER)
        .map(CampaignKey::Owner)
        .or_else(|| header(SESSION_HEADER).map(CampaignKey::Session))
}

fn require_caller(headers: &HeaderMap) -> Result<CampaignKey, ApiError> {
    caller_key(headers).ok_or_else(ApiError::missing_identity)
}

/// POST /v1/campaigns: start (or restart) the caller's campaign.
pub async fn start_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<StartCampaignBody>, JsonRejection>,
) -> Result<(StatusCode, Json<StartCampaignResponse>), ApiError> {
    let Json(body) = payload.map_err(|rejection| {
        metrics::counter!("api.start_rejected", "reason" => "invalid_payload").increment(1);
        ApiError::from(CampaignError::InvalidPayload(rejection.body_text()))
    })?;

    let (key, minted) = match caller_key(&headers) {
        Some(key) => (key, false),
        None => (CampaignKey::new_session(), true),
    };

    let result = if body.restart {
        state.orchestrator.restart(key.clone(), body.request).await
    } else {
        state.orchestrator.start(key.clone(), body.request).await
    };

    let campaign_id = result.map_err(|e| {
        warn!(key = %key, error = %e, "Campaign start rejected");
        metrics::counter!("api.start_rejected", "reason" => e.code()).increment(1);
        ApiError::from(e)
    })?;

    let session_token = match (&key, minted) {
        (CampaignKey::Session(token), true) => Some(token.clone()),
        _ => None,
    };

    info!(campaign_id = %campaign_id, key = %key, "Campaign accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(StartCampaignResponse {
            campaign_id,
            session_token,
        }),
    ))
}

/// POST /v1/campaigns/stop: stop the caller's running campaign.
pub async fn stop_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StopCampaignResponse>, ApiError> {
    let key = require_caller(&headers)?;
    state.orchestrator.stop(&key)?;
    Ok(Json(StopCampaignResponse { stopped: true }))
}

/// GET /v1/campaigns: the caller's campaigns, newest first.
pub async fn list_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CampaignListResponse>, ApiError> {
    let key = require_caller(&headers)?;
    let campaigns = state.orchestrator.campaigns(&key).await?;
    Ok(Json(CampaignListResponse {
        running: state.orchestrator.phase(&key),
        campaigns,
    }))
}

/// GET /v1/campaigns/:id/status: progress of one of the caller's campaigns.
pub async fn campaign_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CampaignStatus>, ApiError> {
    let key = require_caller(&headers)?;
    let id: CampaignId = id.parse().map_err(|_| ApiError::invalid_id(&id))?;
    let status = state.orchestrator.status(&key, id).await?;
    Ok(Json(status))
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_campaigns: state.orchestrator.running(),
    })
}

/// GET /ready: Readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
