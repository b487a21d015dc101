//! Campaign runner. Drives one campaign from login through the repeating
//! send loop until its cancellation token fires.
//!
//! Every suspension point (connect, login, manual login wait, send, delay) is
//! raced against the token, so a stop is observed without waiting out a long
//! delay or a stuck network call.

use crate::store::CampaignStore;
use campaign_channels::{MessageTransport, TransportError, TransportFactory};
use campaign_core::config::DispatchConfig;
use campaign_core::event_bus::{make_event, EventSink};
use campaign_core::types::{CampaignConfig, CampaignEvent, CampaignId, CampaignKey, EventType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Initializing,
    Authenticating,
    Sending,
    Waiting,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Cancelled,
    ConnectFailed,
    AuthFailed,
    /// The runner task panicked; recorded by the registry.
    Panicked,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::ConnectFailed => "connect_failed",
            TerminationReason::AuthFailed => "auth_failed",
            TerminationReason::Panicked => "panicked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub campaign_id: CampaignId,
    pub sent: u64,
    pub failed: u64,
    pub reason: TerminationReason,
}

/// Bounds applied to the blocking phases of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub auth_timeout: Duration,
    pub manual_auth_timeout: Duration,
    pub send_timeout: Duration,
}

impl From<&DispatchConfig> for RunnerSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            auth_timeout: config.auth_timeout(),
            manual_auth_timeout: config.manual_auth_timeout(),
            send_timeout: config.send_timeout(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

/// Holds one unit of the `dispatch.active_campaigns` gauge. Released on drop,
/// including when the runner task unwinds.
struct ActiveGauge(metrics::Gauge);

impl ActiveGauge {
    fn acquire() -> Self {
        let gauge = metrics::gauge!("dispatch.active_campaigns");
        gauge.increment(1.0);
        Self(gauge)
    }
}

impl Drop for ActiveGauge {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

pub struct CampaignRunner {
    campaign_id: CampaignId,
    key: CampaignKey,
    config: CampaignConfig,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn CampaignStore>,
    events: Arc<dyn EventSink>,
    settings: RunnerSettings,
    state: watch::Sender<RunnerState>,
}

impl CampaignRunner {
    pub fn new(
        campaign_id: CampaignId,
        key: CampaignKey,
        config: CampaignConfig,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn CampaignStore>,
        events: Arc<dyn EventSink>,
        settings: RunnerSettings,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Initializing);
        Self {
            campaign_id,
            key,
            config,
            factory,
            store,
            events,
            settings,
            state,
        }
    }

    pub fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    /// Receiver that tracks the runner's phase.
    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Run the campaign to completion. Never returns an error: failures before
    /// the send loop end the run, failures inside it are logged and skipped.
    pub async fn run(self, cancel: CancellationToken) -> RunSummary {
        info!(
            campaign_id = %self.campaign_id,
            key = %self.key,
            transport = self.factory.name(),
            recipients = self.config.recipients.len(),
            delay_secs = self.config.delay.as_secs(),
            "Campaign runner started"
        );
        let _active = ActiveGauge::acquire();

        let (reason, sent, failed) = match self.prepare(&cancel).await {
            Ok(mut transport) => {
                self.emit(EventType::TransportReady, |_| {});
                let (sent, failed) = self.send_loop(transport.as_mut(), &cancel).await;
                transport.close().await;
                (TerminationReason::Cancelled, sent, failed)
            }
            Err(reason) => (reason, 0, 0),
        };

        self.finish(reason, sent, failed).await
    }

    /// Connect and log in. On failure the transport is already closed.
    async fn prepare(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn MessageTransport>, TerminationReason> {
        self.set_state(RunnerState::Initializing);
        let connected = tokio::select! {
            _ = cancel.cancelled() => return Err(TerminationReason::Cancelled),
            result = self.factory.connect(&self.config.credentials) => result,
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                error!(campaign_id = %self.campaign_id, error = %e, "Failed to initialize transport");
                self.emit(EventType::CampaignFailed, |event| {
                    event.detail = Some(e.to_string())
                });
                return Err(TerminationReason::ConnectFailed);
            }
        };

        self.set_state(RunnerState::Authenticating);
        match self.authenticate(transport.as_mut(), cancel).await {
            Ok(()) => Ok(transport),
            Err(reason) => {
                transport.close().await;
                Err(reason)
            }
        }
    }

    async fn authenticate(
        &self,
        transport: &mut dyn MessageTransport,
        cancel: &CancellationToken,
    ) -> Result<(), TerminationReason> {
        let first = tokio::select! {
            _ = cancel.cancelled() => return Err(TerminationReason::Cancelled),
            result = timeout(self.settings.auth_timeout, transport.authenticate()) => {
                result.unwrap_or(Err(TransportError::Timeout))
            }
        };

        let outcome = match first {
            Err(TransportError::RequiresManualStep) => {
                info!(
                    campaign_id = %self.campaign_id,
                    wait_secs = self.settings.manual_auth_timeout.as_secs(),
                    "Login requires a manual step, waiting for it to complete"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TerminationReason::Cancelled),
                    result = timeout(self.settings.manual_auth_timeout, transport.await_manual_step()) => {
                        result.unwrap_or(Err(TransportError::Timeout))
                    }
                }
            }
            other => other,
        };

        outcome.map_err(|e| {
            error!(campaign_id = %self.campaign_id, error = %e, "Transport authentication failed");
            self.emit(EventType::CampaignFailed, |event| {
                event.detail = Some(e.to_string())
            });
            TerminationReason::AuthFailed
        })
    }

    /// Round-robin over the recipients until cancelled. Returns (sent, failed).
    async fn send_loop(
        &self,
        transport: &mut dyn MessageTransport,
        cancel: &CancellationToken,
    ) -> (u64, u64) {
        let mut sent: u64 = 0;
        let mut failed: u64 = 0;
        let kind = self.config.recipient_kind;
        let text = self.config.message.as_str();

        for recipient in self.config.recipients.iter().cycle() {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(RunnerState::Sending);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                result = timeout(self.settings.send_timeout, transport.send(recipient, kind, text)) => {
                    result.unwrap_or(Err(TransportError::Timeout))
                }
            };

            match outcome {
                Ok(()) => {
                    sent += 1;
                    self.report_sent(sent, recipient).await;
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        campaign_id = %self.campaign_id,
                        recipient = %recipient,
                        error = %e,
                        "Send failed, moving to next recipient"
                    );
                    metrics::counter!("dispatch.send_failures").increment(1);
                    self.emit(EventType::MessageFailed, |event| {
                        event.recipient = Some(recipient.clone());
                        event.detail = Some(e.to_string());
                    });
                }
            }

            self.set_state(RunnerState::Waiting);
            if self.config.delay.is_zero() {
                // Keep a zero-delay loop from monopolizing its worker thread.
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.delay) => {}
                }
            }
        }

        (sent, failed)
    }

    async fn report_sent(&self, count: u64, recipient: &str) {
        debug!(campaign_id = %self.campaign_id, recipient = %recipient, sent = count, "Message sent");
        metrics::counter!("dispatch.messages_sent").increment(1);

        // The count is absolute, so a later successful write covers a lost one.
        if let Err(e) = self.store.increment_sent(self.campaign_id, count).await {
            warn!(campaign_id = %self.campaign_id, error = %e, "Failed to record sent count");
        }

        self.emit(EventType::MessageSent, |event| {
            event.recipient = Some(recipient.to_string());
            event.sent_count = Some(count);
        });
    }

    async fn finish(self, reason: TerminationReason, sent: u64, failed: u64) -> RunSummary {
        if let Err(e) = self.store.set_active(self.campaign_id, false).await {
            error!(campaign_id = %self.campaign_id, error = %e, "Failed to mark campaign inactive");
        }
        self.set_state(RunnerState::Terminated);

        metrics::counter!("dispatch.campaigns_terminated", "reason" => reason.as_str()).increment(1);

        if reason == TerminationReason::Cancelled {
            self.emit(EventType::CampaignStopped, |event| event.sent_count = Some(sent));
        }

        info!(
            campaign_id = %self.campaign_id,
            key = %self.key,
            reason = reason.as_str(),
            sent = sent,
            failed = failed,
            "Campaign runner terminated"
        );

        RunSummary {
            campaign_id: self.campaign_id,
            sent,
            failed,
            reason,
        }
    }

    fn set_state(&self, state: RunnerState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event_type: EventType, fill: impl FnOnce(&mut CampaignEvent)) {
        let mut event = make_event(event_type, self.campaign_id, &self.key);
        fill(&mut event);
        self.events.emit(event);
    }
}
