//! # Fleet Provisioning Device Agent
//!
//! This crate provides device-side functionality for certificate-based
//! fleet provisioning:
//! - Claim-authenticated MQTT session over mutual TLS
//! - Create-keys-and-certificate and register-thing exchanges
//! - Write-once response correlation with bounded waits
//! - Permanent credential bundle persistence
//! - Periodic telemetry publishing with the permanent identity
//!
//! ## Flow
//!
//! A factory device carries only shared claim credentials. The agent
//! connects with them, trades the claim for a device-unique certificate
//! and a registered thing name, and persists the result as a bundle.
//! From then on the device connects with its own identity and publishes
//! sensor readings.

pub mod correlation;
pub mod machine;
pub mod persistence;
pub mod provisioning;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use correlation::ResponseSlot;
pub use machine::MachineId;
pub use persistence::CredentialWriter;
pub use provisioning::{DeviceParameters, FleetProvisioner, ProvisioningState};
pub use telemetry::{ReadingSource, SimulatedSensor, TelemetryPublisher};
pub use transport::{ConnectOptions, Connection, MessageHandler, MqttConnection, TlsIdentity};
