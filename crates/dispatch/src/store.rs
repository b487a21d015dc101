//! Campaign record persistence.
//!
//! `InMemoryCampaignStore` is backed by DashMap; swap in a database-backed
//! implementation of [`CampaignStore`] for durable deployments.

use async_trait::async_trait;
use campaign_core::error::{CampaignError, CampaignResult};
use campaign_core::types::{CampaignConfig, CampaignId, CampaignKey, CampaignRecord, RecipientKind};
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

/// Fields needed to create a campaign record.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub key: CampaignKey,
    pub recipients: Vec<String>,
    pub recipient_kind: RecipientKind,
    pub delay_secs: u64,
}

impl NewCampaign {
    pub fn from_config(key: &CampaignKey, config: &CampaignConfig) -> Self {
        Self {
            key: key.clone(),
            recipients: config.recipients.clone(),
            recipient_kind: config.recipient_kind,
            delay_secs: config.delay.as_secs(),
        }
    }
}

/// Source of truth for campaign progress. Every update is scoped to a single
/// record and must be atomic for that record.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Create an active record with a zero sent count.
    async fn create(&self, campaign: NewCampaign) -> CampaignResult<CampaignRecord>;

    async fn set_active(&self, id: CampaignId, active: bool) -> CampaignResult<()>;

    /// Record the runner's running total. The stored count never decreases.
    async fn increment_sent(&self, id: CampaignId, new_count: u64) -> CampaignResult<()>;

    async fn get(&self, id: CampaignId) -> CampaignResult<Option<CampaignRecord>>;

    /// All campaigns started under `key`, newest first.
    async fn list_for_key(&self, key: &CampaignKey) -> CampaignResult<Vec<CampaignRecord>>;
}

/// Thread-safe in-memory campaign store.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    campaigns: DashMap<CampaignId, CampaignRecord>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        info!("Campaign store initialized (in-memory)");
        Self {
            campaigns: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn create(&self, campaign: NewCampaign) -> CampaignResult<CampaignRecord> {
        let now = Utc::now();
        let record = CampaignRecord {
            id: CampaignId::new(),
            key: campaign.key,
            recipients: campaign.recipients,
            recipient_kind: campaign.recipient_kind,
            delay_secs: campaign.delay_secs,
            active: true,
            sent_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.campaigns.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_active(&self, id: CampaignId, active: bool) -> CampaignResult<()> {
        let mut entry = self.campaigns.get_mut(&id).ok_or(CampaignError::NotFound)?;
        let record = entry.value_mut();
        if record.active != active {
            record.active = active;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_sent(&self, id: CampaignId, new_count: u64) -> CampaignResult<()> {
        let mut entry = self.campaigns.get_mut(&id).ok_or(CampaignError::NotFound)?;
        let record = entry.value_mut();
        if new_count > record.sent_count {
            record.sent_count = new_count;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, id: CampaignId) -> CampaignResult<Option<CampaignRecord>> {
        Ok(self.campaigns.get(&id).map(|r| r.value().clone()))
    }

    async fn list_for_key(&self, key: &CampaignKey) -> CampaignResult<Vec<CampaignRecord>> {
        let mut campaigns: Vec<CampaignRecord> = self
            .campaigns
            .iter()
            .filter(|r| &r.value().key == key)
            .map(|r| r.value().clone())
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn new_campaign(owner: &str) -> NewCampaign {
        NewCampaign {
            key: CampaignKey::owner(owner),
            recipients: vec!["+1555".into()],
            recipient_kind: RecipientKind::Individual,
            delay_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_create_starts_active_with_zero_sent() {
        let store = InMemoryCampaignStore::new();
        let record = store.create(new_campaign("alice")).await.unwrap();

        assert!(record.active);
        assert_eq!(record.sent_count, 0);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(store.len(), 1);

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.delay_secs, 5);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = InMemoryCampaignStore::new();
        let a = store.create(new_campaign("alice")).await.unwrap();
        let b = store.create(new_campaign("alice")).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_sent_count_never_decreases() {
        let store = InMemoryCampaignStore::new();
        let id = store.create(new_campaign("alice")).await.unwrap().id;

        store.increment_sent(id, 3).await.unwrap();
        store.increment_sent(id, 2).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().sent_count, 3);

        store.increment_sent(id, 4).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().sent_count, 4);
    }

    #[tokio::test]
    async fn test_set_active_and_missing_ids() {
        let store = InMemoryCampaignStore::new();
        let id = store.create(new_campaign("alice")).await.unwrap().id;

        store.set_active(id, false).await.unwrap();
        assert!(!store.get(id).await.unwrap().unwrap().active);

        let missing = CampaignId::new();
        assert!(store.get(missing).await.unwrap().is_none());
        assert!(matches!(
            store.set_active(missing, false).await,
            Err(CampaignError::NotFound)
        ));
        assert!(matches!(
            store.increment_sent(missing, 1).await,
            Err(CampaignError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_for_key_filters_by_key() {
        let store = InMemoryCampaignStore::new();
        store.create(new_campaign("alice")).await.unwrap();
        store.create(new_campaign("alice")).await.unwrap();
        store.create(new_campaign("bob")).await.unwrap();

        let alice = store.list_for_key(&CampaignKey::owner("alice")).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice[0].created_at >= alice[1].created_at);
        assert!(store
            .list_for_key(&CampaignKey::session("nobody"))
            .await
            .unwrap()
            .is_empty());
    }
}
