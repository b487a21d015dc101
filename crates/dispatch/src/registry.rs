//! Registry of live campaign runners, at most one per [`CampaignKey`].

use crate::runner::{CampaignRunner, RunSummary, RunnerSettings, RunnerState, TerminationReason};
use crate::store::{CampaignStore, NewCampaign};
use campaign_channels::TransportFactory;
use campaign_core::error::{CampaignError, CampaignResult};
use campaign_core::event_bus::{make_event, EventSink};
use campaign_core::types::{CampaignConfig, CampaignId, CampaignKey, EventType};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Registry entry for one key. Created as a reservation and filled in once
/// the campaign record exists and the runner task is spawned.
pub struct RunningCampaign {
    slot: Uuid,
    cancel: CancellationToken,
    handle: Option<JoinHandle<RunSummary>>,
    campaign_id: Option<CampaignId>,
    state: Option<watch::Receiver<RunnerState>>,
    started_at: DateTime<Utc>,
}

impl RunningCampaign {
    fn reserved(slot: Uuid, cancel: CancellationToken) -> Self {
        Self {
            slot,
            cancel,
            handle: None,
            campaign_id: None,
            state: None,
            started_at: Utc::now(),
        }
    }

    /// `None` while the record is still being created.
    pub fn campaign_id(&self) -> Option<CampaignId> {
        self.campaign_id
    }

    pub fn phase(&self) -> RunnerState {
        self.state
            .as_ref()
            .map(|state| *state.borrow())
            .unwrap_or(RunnerState::Initializing)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// A reservation counts as live; a spawned runner is live until its task ends.
    fn is_live(&self) -> bool {
        match &self.handle {
            Some(handle) => !handle.is_finished(),
            None => true,
        }
    }
}

/// Concurrent map of running campaigns. Cloning shares the same map.
#[derive(Clone)]
pub struct CampaignRegistry {
    campaigns: Arc<DashMap<CampaignKey, RunningCampaign>>,
    store: Arc<dyn CampaignStore>,
    factory: Arc<dyn TransportFactory>,
    events: Arc<dyn EventSink>,
    settings: RunnerSettings,
}

impl CampaignRegistry {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        factory: Arc<dyn TransportFactory>,
        events: Arc<dyn EventSink>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            campaigns: Arc::new(DashMap::new()),
            store,
            factory,
            events,
            settings,
        }
    }

    /// Reserve `key`, create its record and spawn the runner. Returns as soon
    /// as the runner is registered; login happens in the background.
    ///
    /// The sequence runs on its own task, so dropping this future leaves the
    /// start to complete rather than stranding a reservation.
    pub async fn try_start(
        &self,
        key: CampaignKey,
        config: CampaignConfig,
    ) -> CampaignResult<CampaignId> {
        let registry = self.clone();
        tokio::spawn(async move { registry.register(key, config).await })
            .await
            .map_err(|e| {
                error!(error = %e, "Campaign start task failed");
                CampaignError::Internal(format!("campaign start task failed: {}", e))
            })?
    }

    async fn register(&self, key: CampaignKey, config: CampaignConfig) -> CampaignResult<CampaignId> {
        let slot = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.reserve(&key, slot, cancel.clone())?;

        let record = match self.store.create(NewCampaign::from_config(&key, &config)).await {
            Ok(record) => record,
            Err(e) => {
                self.campaigns.remove_if(&key, |_, entry| entry.slot == slot);
                error!(key = %key, error = %e, "Failed to create campaign record");
                return Err(e);
            }
        };
        let campaign_id = record.id;

        let runner = CampaignRunner::new(
            campaign_id,
            key.clone(),
            config,
            self.factory.clone(),
            self.store.clone(),
            self.events.clone(),
            self.settings,
        );
        let state = runner.subscribe();
        let handle = self.spawn_runner(key.clone(), slot, runner, cancel);

        // A stop may have removed the reservation meanwhile; the runner then
        // sees a cancelled token and finishes on its own.
        let registered = match self.campaigns.get_mut(&key) {
            Some(mut entry) if entry.slot == slot => {
                entry.handle = Some(handle);
                entry.campaign_id = Some(campaign_id);
                entry.state = Some(state);
                true
            }
            _ => false,
        };
        if !registered {
            info!(campaign_id = %campaign_id, key = %key, "Campaign stopped before registration");
        }

        metrics::counter!("dispatch.campaigns_started").increment(1);
        self.events
            .emit(make_event(EventType::CampaignStarted, campaign_id, &key));
        info!(campaign_id = %campaign_id, key = %key, "Campaign started");

        Ok(campaign_id)
    }

    fn reserve(
        &self,
        key: &CampaignKey,
        slot: Uuid,
        cancel: CancellationToken,
    ) -> CampaignResult<()> {
        match self.campaigns.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live() {
                    return Err(CampaignError::AlreadyRunning(key.clone()));
                }
                // Runner finished but has not removed itself yet.
                entry.insert(RunningCampaign::reserved(slot, cancel));
            }
            Entry::Vacant(entry) => {
                entry.insert(RunningCampaign::reserved(slot, cancel));
            }
        }
        Ok(())
    }

    fn spawn_runner(
        &self,
        key: CampaignKey,
        slot: Uuid,
        runner: CampaignRunner,
        cancel: CancellationToken,
    ) -> JoinHandle<RunSummary> {
        let campaigns = self.campaigns.clone();
        let store = self.store.clone();
        let campaign_id = runner.campaign_id();

        tokio::spawn(async move {
            let summary = match tokio::spawn(runner.run(cancel)).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(campaign_id = %campaign_id, error = %e, "Campaign runner panicked");
                    if let Err(e) = store.set_active(campaign_id, false).await {
                        warn!(campaign_id = %campaign_id, error = %e, "Failed to mark campaign inactive");
                    }
                    RunSummary {
                        campaign_id,
                        sent: 0,
                        failed: 0,
                        reason: TerminationReason::Panicked,
                    }
                }
            };
            campaigns.remove_if(&key, |_, entry| entry.slot == slot);
            summary
        })
    }

    /// Cancel the runner for `key`. Does not wait for it to finish.
    pub fn stop(&self, key: &CampaignKey) -> bool {
        match self.campaigns.remove(key) {
            Some((_, campaign)) => {
                campaign.cancel.cancel();
                info!(
                    key = %key,
                    campaign_id = ?campaign.campaign_id,
                    "Campaign stop requested"
                );
                true
            }
            None => false,
        }
    }

    /// Stop every campaign whose key matches `predicate`.
    pub fn stop_all(&self, predicate: impl Fn(&CampaignKey) -> bool) -> usize {
        let keys: Vec<CampaignKey> = self
            .campaigns
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter().filter(|key| self.stop(key)).count()
    }

    /// Stop the runner for `key` and wait up to `wait` for its task to end.
    pub async fn stop_and_wait(&self, key: &CampaignKey, wait: Duration) -> bool {
        let Some((_, campaign)) = self.campaigns.remove(key) else {
            return false;
        };
        campaign.cancel.cancel();

        if let Some(handle) = campaign.handle {
            match tokio::time::timeout(wait, handle).await {
                Ok(Ok(summary)) => info!(
                    key = %key,
                    campaign_id = %summary.campaign_id,
                    sent = summary.sent,
                    "Campaign stopped and joined"
                ),
                Ok(Err(e)) => error!(key = %key, error = %e, "Campaign task failed"),
                Err(_) => warn!(
                    key = %key,
                    wait_ms = wait.as_millis() as u64,
                    "Campaign runner did not finish in time, continuing"
                ),
            }
        }
        true
    }

    /// Stop every runner and wait up to `wait` in total for them to finish.
    /// Returns the number of runners stopped.
    pub async fn drain(&self, wait: Duration) -> usize {
        let keys: Vec<CampaignKey> = self.campaigns.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some((_, campaign)) = self.campaigns.remove(key) {
                campaign.cancel.cancel();
                handles.extend(campaign.handle);
            }
        }

        let stopped = handles.len();
        let deadline = tokio::time::Instant::now() + wait;
        for handle in handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("Shutdown deadline reached with campaign runners still running");
                break;
            }
        }
        stopped
    }

    /// Run `f` against the entry for `key` while holding its shard lock.
    pub fn inspect<R>(&self, key: &CampaignKey, f: impl FnOnce(&RunningCampaign) -> R) -> Option<R> {
        self.campaigns.get(key).map(|entry| f(entry.value()))
    }

    pub fn phase(&self, key: &CampaignKey) -> Option<RunnerState> {
        self.inspect(key, RunningCampaign::phase)
    }

    pub fn campaign_id(&self, key: &CampaignKey) -> Option<CampaignId> {
        self.inspect(key, RunningCampaign::campaign_id).flatten()
    }

    pub fn is_running(&self, key: &CampaignKey) -> bool {
        self.campaigns.contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<CampaignKey> {
        self.campaigns.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}
