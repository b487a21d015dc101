#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult, ErrorKind};
pub use types::{
    CampaignConfig, CampaignId, CampaignKey, CampaignRecord, CampaignStatus, RecipientKind,
    StartRequest,
};
