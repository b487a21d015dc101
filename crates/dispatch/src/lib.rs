//! Campaign orchestration engine: one cancellable runner task per campaign,
//! a registry enforcing one live runner per key, and the orchestrator facade
//! the HTTP layer calls.

#![warn(clippy::unwrap_used)]

pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod store;

pub use orchestrator::Orchestrator;
pub use registry::{CampaignRegistry, RunningCampaign};
pub use runner::{CampaignRunner, RunSummary, RunnerSettings, RunnerState, TerminationReason};
pub use store::{CampaignStore, InMemoryCampaignStore, NewCampaign};
