//! Campaign lifecycle event bus.
//!
//! The dispatch engine accepts an `Arc<dyn EventSink>` and emits one event per
//! lifecycle transition and per send attempt.

use crate::types::{CampaignEvent, CampaignId, CampaignKey, EventType};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Receiver of campaign lifecycle events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CampaignEvent);
}

/// No-op sink for callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: CampaignEvent) {}
}

/// Writes every event to the tracing subscriber at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CampaignEvent) {
        tracing::debug!(
            event_type = ?event.event_type,
            campaign_id = %event.campaign_id,
            key = %event.key,
            recipient = event.recipient.as_deref(),
            sent_count = event.sent_count,
            detail = event.detail.as_deref(),
            "Campaign event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<CampaignEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CampaignEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: CampaignEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Convenience builder for a `CampaignEvent` with no optional fields set.
pub fn make_event(event_type: EventType, campaign_id: CampaignId, key: &CampaignKey) -> CampaignEvent {
    CampaignEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        key: key.clone(),
        recipient: None,
        sent_count: None,
        detail: None,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
