//! Orchestrator: the entry point callers use to start, stop and inspect
//! campaigns. Validates input, then delegates to the registry and store.

use crate::registry::CampaignRegistry;
use crate::runner::{RunnerSettings, RunnerState};
use crate::store::CampaignStore;
use campaign_channels::TransportFactory;
use campaign_core::config::DispatchConfig;
use campaign_core::error::{CampaignError, CampaignResult};
use campaign_core::event_bus::EventSink;
use campaign_core::types::{
    CampaignConfig, CampaignId, CampaignKey, CampaignRecord, CampaignStatus, StartRequest,
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Orchestrator {
    registry: CampaignRegistry,
    store: Arc<dyn CampaignStore>,
    factory: Arc<dyn TransportFactory>,
    config: DispatchConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        factory: Arc<dyn TransportFactory>,
        events: Arc<dyn EventSink>,
        config: DispatchConfig,
    ) -> Self {
        info!(
            transport = factory.name(),
            default_delay_secs = config.default_delay_secs,
            "Campaign orchestrator initialized"
        );
        let registry = CampaignRegistry::new(
            store.clone(),
            factory.clone(),
            events,
            RunnerSettings::from(&config),
        );
        Self {
            registry,
            store,
            factory,
            config,
        }
    }

    pub fn registry(&self) -> &CampaignRegistry {
        &self.registry
    }

    /// Start a campaign for `key`. Returns once the record exists and the
    /// runner is registered; the transport logs in afterwards.
    pub async fn start(&self, key: CampaignKey, request: StartRequest) -> CampaignResult<CampaignId> {
        let config = self.prepare(&key, request)?;
        self.registry.try_start(key, config).await
    }

    /// Stop whatever is running for `key`, wait briefly for it to wind down,
    /// then start the new campaign.
    pub async fn restart(
        &self,
        key: CampaignKey,
        request: StartRequest,
    ) -> CampaignResult<CampaignId> {
        let config = self.prepare(&key, request)?;
        if self
            .registry
            .stop_and_wait(&key, self.config.stop_join_timeout())
            .await
        {
            info!(key = %key, "Replacing running campaign");
        }
        self.registry.try_start(key, config).await
    }

    fn prepare(&self, key: &CampaignKey, request: StartRequest) -> CampaignResult<CampaignConfig> {
        let config = CampaignConfig::from_request(request, self.config.default_delay())?;
        self.factory.validate(&config.credentials).map_err(|e| {
            warn!(key = %key, error = %e, "Rejected campaign credentials");
            CampaignError::TransportInitFailed(e.to_string())
        })?;
        Ok(config)
    }

    pub fn stop(&self, key: &CampaignKey) -> CampaignResult<()> {
        if self.registry.stop(key) {
            Ok(())
        } else {
            Err(CampaignError::NotFound)
        }
    }

    pub fn stop_matching(&self, predicate: impl Fn(&CampaignKey) -> bool) -> usize {
        self.registry.stop_all(predicate)
    }

    /// Stop every campaign owned by `owner`.
    pub fn stop_owner(&self, owner: &str) -> usize {
        self.stop_matching(|key| key.owner_id() == Some(owner))
    }

    /// Stop all campaigns and give them `stop_join_timeout` to finish.
    pub async fn shutdown(&self) -> usize {
        let stopped = self.registry.drain(self.config.stop_join_timeout()).await;
        info!(stopped = stopped, "Campaign orchestrator shut down");
        stopped
    }

    pub async fn status(&self, caller: &CampaignKey, id: CampaignId) -> CampaignResult<CampaignStatus> {
        let record = self.store.get(id).await?.ok_or(CampaignError::NotFound)?;
        if &record.key != caller {
            return Err(CampaignError::NotAuthorized);
        }
        Ok(record.status())
    }

    pub async fn campaigns(&self, caller: &CampaignKey) -> CampaignResult<Vec<CampaignRecord>> {
        self.store.list_for_key(caller).await
    }

    pub fn phase(&self, key: &CampaignKey) -> Option<RunnerState> {
        self.registry.phase(key)
    }

    pub fn running(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryCampaignStore;
    use campaign_channels::ScriptedTransportFactory;
    use campaign_core::event_bus::noop_sink;
    use campaign_core::error::ErrorKind;
    use serde_json::json;
    use std::time::Duration;

    fn orchestrator(factory: ScriptedTransportFactory) -> Orchestrator {
        Orchestrator::new(
            Arc::new(InMemoryCampaignStore::new()),
            Arc::new(factory),
            noop_sink(),
            DispatchConfig::default(),
        )
    }

    fn request(recipients: &str) -> StartRequest {
        serde_json::from_value(json!({
            "recipients": recipients,
            "message": "hello",
            "delay": "5",
            "credentials": {"token": "t"}
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_requests_start_nothing() {
        let orch = orchestrator(ScriptedTransportFactory::new());
        let key = CampaignKey::owner("alice");

        let err = orch.start(key.clone(), request(" , ")).await.unwrap_err();
        assert!(matches!(err, CampaignError::MissingField("recipients")));

        let mut bad_delay = request("A");
        bad_delay.delay = Some("soon".into());
        let err = orch.start(key.clone(), bad_delay).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        assert_eq!(orch.running(), 0);
        assert!(orch.campaigns(&key).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials() {
        let orch = orchestrator(ScriptedTransportFactory::new().rejecting_credentials());
        let err = orch
            .start(CampaignKey::owner("alice"), request("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::TransportInitFailed(_)));
        assert_eq!(orch.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_key_is_not_found() {
        let orch = orchestrator(ScriptedTransportFactory::new());
        assert!(matches!(
            orch.stop(&CampaignKey::owner("nobody")),
            Err(CampaignError::NotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_checks_ownership() {
        let orch = orchestrator(ScriptedTransportFactory::new());
        let alice = CampaignKey::owner("alice");
        let id = orch.start(alice.clone(), request("A")).await.unwrap();

        let status = orch.status(&alice, id).await.unwrap();
        assert!(status.active);
        assert_eq!(status.campaign_id, id);

        assert!(matches!(
            orch.status(&CampaignKey::owner("mallory"), id).await,
            Err(CampaignError::NotAuthorized)
        ));
        assert!(matches!(
            orch.status(&alice, CampaignId::new()).await,
            Err(CampaignError::NotFound)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_campaign() {
        let orch = orchestrator(ScriptedTransportFactory::new());
        let key = CampaignKey::owner("alice");
        let first = orch.start(key.clone(), request("A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = orch.restart(key.clone(), request("B")).await.unwrap();

        assert_ne!(first, second);
        assert!(!orch.status(&key, first).await.unwrap().active);
        assert!(orch.status(&key, second).await.unwrap().active);
        assert_eq!(orch.registry().campaign_id(&key), Some(second));
        assert_eq!(orch.campaigns(&key).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_owner_leaves_sessions() {
        let orch = orchestrator(ScriptedTransportFactory::new());
        orch.start(CampaignKey::owner("alice"), request("A")).await.unwrap();
        orch.start(CampaignKey::session("tok"), request("A")).await.unwrap();

        assert_eq!(orch.stop_owner("alice"), 1);
        assert_eq!(orch.running(), 1);
        assert_eq!(orch.shutdown().await, 1);
        assert_eq!(orch.running(), 0);
    }
}
