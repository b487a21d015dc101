//! Deterministic in-process transport. Sends are recorded into a shared
//! [`SendLog`]; outcomes are scripted up front. Backs dry runs and tests.

use crate::transport::{MessageTransport, TransportError, TransportFactory};
use async_trait::async_trait;
use campaign_core::types::{RecipientKind, TransportCredentials};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// How `authenticate` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScript {
    Succeed,
    Fail,
    /// Ask for a manual step; the manual wait then succeeds or fails.
    ManualStep { completes: bool },
    /// Never return.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    pub recipient: String,
    pub text: String,
    pub delivered: bool,
}

/// Records retained by a [`SendLog`] unless configured otherwise.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

#[derive(Debug)]
struct LogInner {
    capacity: usize,
    recent: VecDeque<SendRecord>,
    attempts: usize,
    delivered: HashMap<String, usize>,
    connects: usize,
    auth_attempts: usize,
    closes: usize,
}

impl LogInner {
    fn push(&mut self, record: SendRecord) {
        self.attempts += 1;
        if record.delivered {
            *self.delivered.entry(record.recipient.clone()).or_default() += 1;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        if self.capacity > 0 {
            self.recent.push_back(record);
        }
    }
}

/// Shared record of what scripted transports did. Keeps the newest sends up
/// to its capacity; the counters cover every send.
#[derive(Debug, Clone)]
pub struct SendLog {
    inner: Arc<Mutex<LogInner>>,
}

impl Default for SendLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl SendLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                capacity,
                recent: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                attempts: 0,
                delivered: HashMap::new(),
                connects: 0,
                auth_attempts: 0,
                closes: 0,
            })),
        }
    }

    /// Retained sends, oldest first.
    pub fn records(&self) -> Vec<SendRecord> {
        self.inner.lock().recent.iter().cloned().collect()
    }

    /// Recipients of the retained sends, in order.
    pub fn recipients(&self) -> Vec<String> {
        self.inner
            .lock()
            .recent
            .iter()
            .map(|r| r.recipient.clone())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    pub fn delivered(&self) -> usize {
        self.inner.lock().delivered.values().sum()
    }

    pub fn delivered_to(&self, recipient: &str) -> usize {
        self.inner
            .lock()
            .delivered
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn auth_attempts(&self) -> usize {
        self.inner.lock().auth_attempts
    }

    pub fn closes(&self) -> usize {
        self.inner.lock().closes
    }
}

/// Factory for scripted transports.
#[derive(Debug, Clone)]
pub struct ScriptedTransportFactory {
    auth: AuthScript,
    connect_fails: bool,
    rejects_credentials: bool,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    latency: Duration,
    log: SendLog,
}

impl Default for ScriptedTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransportFactory {
    /// Transport that authenticates and delivers everything instantly.
    pub fn new() -> Self {
        Self {
            auth: AuthScript::Succeed,
            connect_fails: false,
            rejects_credentials: false,
            failing: HashSet::new(),
            hanging: HashSet::new(),
            latency: Duration::ZERO,
            log: SendLog::default(),
        }
    }

    pub fn with_auth(mut self, auth: AuthScript) -> Self {
        self.auth = auth;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    pub fn rejecting_credentials(mut self) -> Self {
        self.rejects_credentials = true;
        self
    }

    /// Every send to `recipient` fails with `RecipientUnreachable`.
    pub fn failing_for(mut self, recipient: impl Into<String>) -> Self {
        self.failing.insert(recipient.into());
        self
    }

    /// Sends to `recipient` never return.
    pub fn hanging_for(mut self, recipient: impl Into<String>) -> Self {
        self.hanging.insert(recipient.into());
        self
    }

    /// Retain at most `capacity` send records. Counters are unaffected.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = SendLog::with_capacity(capacity);
        self
    }

    /// Simulated network time per send.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn log(&self) -> SendLog {
        self.log.clone()
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransportFactory {
    fn validate(&self, _credentials: &TransportCredentials) -> Result<(), TransportError> {
        if self.rejects_credentials {
            return Err(TransportError::InvalidCredentials(
                "scripted rejection".to_string(),
            ));
        }
        Ok(())
    }

    async fn connect(
        &self,
        _credentials: &TransportCredentials,
    ) -> Result<Box<dyn MessageTransport>, TransportError> {
        self.log.inner.lock().connects += 1;
        if self.connect_fails {
            return Err(TransportError::InvalidCredentials(
                "scripted connect failure".to_string(),
            ));
        }
        Ok(Box::new(ScriptedTransport {
            auth: self.auth,
            failing: self.failing.clone(),
            hanging: self.hanging.clone(),
            latency: self.latency,
            log: self.log.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedTransport {
    auth: AuthScript,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    latency: Duration,
    log: SendLog,
    closed: bool,
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn authenticate(&mut self) -> Result<(), TransportError> {
        self.log.inner.lock().auth_attempts += 1;
        match self.auth {
            AuthScript::Succeed => Ok(()),
            AuthScript::Fail => Err(TransportError::AuthFailed("scripted".to_string())),
            AuthScript::ManualStep { .. } => Err(TransportError::RequiresManualStep),
            AuthScript::Hang => std::future::pending().await,
        }
    }

    async fn await_manual_step(&mut self) -> Result<(), TransportError> {
        match self.auth {
            AuthScript::ManualStep { completes: true } => Ok(()),
            AuthScript::ManualStep { completes: false } => std::future::pending().await,
            _ => Err(TransportError::AuthFailed("no manual step pending".to_string())),
        }
    }

    async fn send(
        &mut self,
        recipient: &str,
        _kind: RecipientKind,
        text: &str,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.hanging.contains(recipient) {
            return std::future::pending().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let delivered = !self.failing.contains(recipient);
        self.log.inner.lock().push(SendRecord {
            recipient: recipient.to_string(),
            text: text.to_string(),
            delivered,
        });

        if delivered {
            Ok(())
        } else {
            Err(TransportError::RecipientUnreachable(recipient.to_string()))
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.inner.lock().closes += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn creds() -> TransportCredentials {
        TransportCredentials::new(serde_json::json!({"token": "t"}))
    }

    #[tokio::test]
    async fn test_records_sends_and_failures() {
        let factory = ScriptedTransportFactory::new().failing_for("B");
        let log = factory.log();
        let mut transport = factory.connect(&creds()).await.unwrap();

        transport.authenticate().await.unwrap();
        transport.send("A", RecipientKind::Individual, "hi").await.unwrap();
        let err = transport
            .send("B", RecipientKind::Individual, "hi")
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::RecipientUnreachable("B".into()));

        assert_eq!(log.recipients(), vec!["A", "B"]);
        assert_eq!(log.delivered(), 1);
        assert_eq!(log.delivered_to("A"), 1);
        assert_eq!(log.connects(), 1);
        assert_eq!(log.auth_attempts(), 1);
    }

    #[tokio::test]
    async fn test_log_keeps_newest_records_and_full_counts() {
        let factory = ScriptedTransportFactory::new()
            .failing_for("C")
            .with_log_capacity(2);
        let log = factory.log();
        let mut transport = factory.connect(&creds()).await.unwrap();

        for (recipient, text) in [("A", "one"), ("B", "two"), ("A", "three"), ("C", "four")] {
            let _ = transport.send(recipient, RecipientKind::Individual, text).await;
        }

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "three");
        assert_eq!(records[1].recipient, "C");
        assert!(!records[1].delivered);

        assert_eq!(log.attempts(), 4);
        assert_eq!(log.delivered(), 3);
        assert_eq!(log.delivered_to("A"), 2);
        assert_eq!(log.delivered_to("C"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_recipient_never_returns() {
        let factory = ScriptedTransportFactory::new().hanging_for("A");
        let log = factory.log();
        let mut transport = factory.connect(&creds()).await.unwrap();

        let stuck = tokio::time::timeout(
            Duration::from_secs(3600),
            transport.send("A", RecipientKind::Individual, "hi"),
        )
        .await;
        assert!(stuck.is_err());
        transport.send("B", RecipientKind::Individual, "hi").await.unwrap();
        assert_eq!(log.recipients(), vec!["B"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = ScriptedTransportFactory::new();
        let log = factory.log();
        let mut transport = factory.connect(&creds()).await.unwrap();

        transport.close().await;
        transport.close().await;
        assert_eq!(log.closes(), 1);
        assert_eq!(
            transport.send("A", RecipientKind::Individual, "hi").await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_manual_step_script() {
        let factory =
            ScriptedTransportFactory::new().with_auth(AuthScript::ManualStep { completes: true });
        let mut transport = factory.connect(&creds()).await.unwrap();
        assert_eq!(
            transport.authenticate().await,
            Err(TransportError::RequiresManualStep)
        );
        assert_eq!(transport.await_manual_step().await, Ok(()));
    }

    #[test]
    fn test_credential_rejection() {
        let factory = ScriptedTransportFactory::new().rejecting_credentials();
        assert!(factory.validate(&creds()).is_err());
        assert!(ScriptedTransportFactory::new().validate(&creds()).is_ok());
    }
}
