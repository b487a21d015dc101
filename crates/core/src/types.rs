use crate::error::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a run slot. At most one live runner exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CampaignKey {
    /// An authenticated user.
    Owner(String),
    /// An anonymous caller holding a single-use opaque token.
    Session(String),
}

impl CampaignKey {
    pub fn owner(id: impl Into<String>) -> Self {
        CampaignKey::Owner(id.into())
    }

    pub fn session(token: impl Into<String>) -> Self {
        CampaignKey::Session(token.into())
    }

    /// Mint a fresh anonymous session key.
    pub fn new_session() -> Self {
        CampaignKey::Session(Uuid::new_v4().simple().to_string())
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            CampaignKey::Owner(id) => Some(id),
            CampaignKey::Session(_) => None,
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, CampaignKey::Session(_))
    }
}

impl fmt::Display for CampaignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignKey::Owner(id) => write!(f, "owner:{}", id),
            // Only a prefix of the token goes to logs.
            CampaignKey::Session(token) => {
                let end = token
                    .char_indices()
                    .nth(8)
                    .map(|(i, _)| i)
                    .unwrap_or(token.len());
                write!(f, "session:{}", &token[..end])
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub Uuid);

impl CampaignId {
    pub fn new() -> Self {
        CampaignId(Uuid::new_v4())
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for CampaignId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(CampaignId)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    #[default]
    Individual,
    Group,
}

/// Opaque credential blob handed through to the transport factory.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportCredentials(pub serde_json::Value);

impl TransportCredentials {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// String field lookup on an object blob.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }
}

// Credentials carry secrets; never print their contents.
impl fmt::Debug for TransportCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self
            .0
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        f.debug_struct("TransportCredentials")
            .field("fields", &fields)
            .finish()
    }
}

/// Raw start input, as received from a form or JSON body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    /// Comma-separated addressees.
    #[serde(default)]
    pub recipients: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Seconds between sends. Accepts a JSON string or number.
    #[serde(default, deserialize_with = "de_delay")]
    pub delay: Option<String>,
    #[serde(default)]
    pub recipient_kind: Option<RecipientKind>,
    #[serde(default)]
    pub credentials: Option<TransportCredentials>,
}

fn de_delay<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Validated, immutable configuration of one campaign.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub recipients: Vec<String>,
    pub message: String,
    pub delay: Duration,
    pub recipient_kind: RecipientKind,
    pub credentials: TransportCredentials,
}

impl CampaignConfig {
    /// Validate raw input. `default_delay` applies when no delay was given.
    pub fn from_request(request: StartRequest, default_delay: Duration) -> CampaignResult<Self> {
        let recipients = parse_recipients(request.recipients.as_deref().unwrap_or_default());
        if recipients.is_empty() {
            return Err(CampaignError::MissingField("recipients"));
        }

        let message = match request.message {
            Some(m) if !m.trim().is_empty() => m,
            _ => return Err(CampaignError::MissingField("message")),
        };

        let delay = match request.delay.as_deref().map(str::trim) {
            None | Some("") => default_delay,
            Some(raw) => parse_delay(raw)?,
        };

        let credentials = match request.credentials {
            Some(c) if !c.as_value().is_null() => c,
            _ => return Err(CampaignError::MissingField("credentials")),
        };

        Ok(Self {
            recipients,
            message,
            delay,
            recipient_kind: request.recipient_kind.unwrap_or_default(),
            credentials,
        })
    }
}

/// Split a comma-separated list, keeping order and duplicates.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_delay(raw: &str) -> CampaignResult<Duration> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| CampaignError::InvalidDelay(raw.to_string()))
}

/// Persistent bookkeeping for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: CampaignId,
    pub key: CampaignKey,
    pub recipients: Vec<String>,
    pub recipient_kind: RecipientKind,
    pub delay_secs: u64,
    pub active: bool,
    pub sent_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecord {
    pub fn status(&self) -> CampaignStatus {
        CampaignStatus {
            campaign_id: self.id,
            active: self.active,
            sent_count: self.sent_count,
            updated_at: self.updated_at,
        }
    }
}

/// Externally visible progress of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStatus {
    pub campaign_id: CampaignId,
    pub active: bool,
    pub sent_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle event emitted by the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: CampaignId,
    pub key: CampaignKey,
    pub recipient: Option<String>,
    pub sent_count: Option<u64>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignStarted,
    TransportReady,
    MessageSent,
    MessageFailed,
    CampaignStopped,
    CampaignFailed,
}
