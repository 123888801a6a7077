//! # Shared Module for the Fleet Provisioning Agent
//!
//! This crate provides the types, errors, configuration, and topic
//! handling used by the device agent.
//!
//! ## Provisioning flow
//!
//! A device ships with a shared *claim* identity that may only talk to the
//! fleet-provisioning service. The agent uses it to request a *permanent*
//! per-device identity over MQTT:
//!
//! 1. Publish `{}` to the create-keys-and-certificate channel; the accepted
//!    response carries a certificate, a private key, and an ownership token.
//! 2. Publish the ownership token plus classification parameters to the
//!    register-thing channel; the accepted response names the new thing.
//! 3. Persist the permanent credentials and a configuration record; later
//!    processes use them for telemetry.

pub mod config;
pub mod constants;
pub mod error;
pub mod topic;
pub mod types;

// Re-exports for convenience
pub use config::*;
pub use constants::*;
pub use error::*;
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
