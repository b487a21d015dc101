use crate::types::CampaignKey;
use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Delay must be a non-negative whole number of seconds, got {0:?}")]
    InvalidDelay(String),

    #[error("A campaign is already running for {0}")]
    AlreadyRunning(CampaignKey),

    #[error("Transport initialization failed: {0}")]
    TransportInitFailed(String),

    #[error("Campaign not found")]
    NotFound,

    #[error("Not authorized to access this campaign")]
    NotAuthorized,

    #[error("Campaign store error: {0}")]
    Store(String),

    #[error("Malformed request body: {0}")]
    InvalidPayload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers that map errors onto a wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any runner starts.
    Config,
    /// Transport construction or authentication.
    Transport,
    /// The key already has a live runner.
    Conflict,
    NotFound,
    Unauthorized,
    Internal,
}

impl CampaignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CampaignError::MissingField(_)
            | CampaignError::InvalidDelay(_)
            | CampaignError::InvalidPayload(_) => ErrorKind::Config,
            CampaignError::TransportInitFailed(_) => ErrorKind::Transport,
            CampaignError::AlreadyRunning(_) => ErrorKind::Conflict,
            CampaignError::NotFound => ErrorKind::NotFound,
            CampaignError::NotAuthorized => ErrorKind::Unauthorized,
            CampaignError::Store(_) | CampaignError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable snake_case code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::MissingField(_) => "missing_field",
            CampaignError::InvalidDelay(_) => "invalid_delay",
            CampaignError::AlreadyRunning(_) => "already_running",
            CampaignError::TransportInitFailed(_) => "transport_init_failed",
            CampaignError::NotFound => "not_found",
            CampaignError::NotAuthorized => "not_authorized",
            CampaignError::Store(_) => "store_error",
            CampaignError::InvalidPayload(_) => "invalid_payload",
            CampaignError::Internal(_) => "internal_error",
        }
    }
}
