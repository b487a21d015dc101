//! Transport contracts shared by every messaging backend.

use async_trait::async_trait;
use campaign_core::types::{RecipientKind, TransportCredentials};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Timed out")]
    Timeout,

    /// Login is waiting on an out-of-band step (e.g. scanning a login code).
    #[error("Login requires a manual step")]
    RequiresManualStep,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Recipient unreachable: {0}")]
    RecipientUnreachable(String),

    #[error("Transport is closed")]
    Closed,

    #[error("Transport error: {0}")]
    Unknown(String),
}

/// A stateful session against a messaging surface. One instance per campaign;
/// calls are never made concurrently on the same instance.
#[async_trait]
pub trait MessageTransport: Send {
    /// Log in. Callers bound this with their own timeout.
    async fn authenticate(&mut self) -> Result<(), TransportError>;

    /// Wait for an out-of-band login step to complete after `authenticate`
    /// returned `RequiresManualStep`.
    async fn await_manual_step(&mut self) -> Result<(), TransportError> {
        Err(TransportError::AuthFailed(
            "transport does not support manual login".to_string(),
        ))
    }

    async fn send(
        &mut self,
        recipient: &str,
        kind: RecipientKind,
        text: &str,
    ) -> Result<(), TransportError>;

    /// Release session resources. Idempotent.
    async fn close(&mut self);
}

/// Builds transports from caller-supplied credentials.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Cheap synchronous check run before a campaign is accepted.
    fn validate(&self, credentials: &TransportCredentials) -> Result<(), TransportError>;

    async fn connect(
        &self,
        credentials: &TransportCredentials,
    ) -> Result<Box<dyn MessageTransport>, TransportError>;

    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;
}
