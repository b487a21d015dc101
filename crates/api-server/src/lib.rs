//! HTTP surface for the campaign orchestrator.

#![warn(clippy::unwrap_used)]

pub mod rest;
pub mod server;

pub use rest::AppState;
pub use server::{build_router, ApiServer};
