//! # Constants for the Fleet Provisioning Agent
//!
//! This module contains all constants used throughout the system:
//! protocol operation names, bounded-wait policy, transport defaults,
//! and the file layout of the permanent credential bundle.

// =============================================================================
// PROVISIONING OPERATIONS
// =============================================================================

/// Operation name for the create-keys-and-certificate exchange.
///
/// Used to label correlation waits, timeouts, and service rejections.
pub const OP_CREATE_KEYS_AND_CERTIFICATE: &str = "CreateKeysAndCertificate";

/// Operation name for the register-thing exchange
pub const OP_REGISTER_THING: &str = "RegisterThing";

// =============================================================================
// BOUNDED WAIT POLICY
// =============================================================================

/// Number of times a pending response is polled before giving up
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;

/// Spacing between response polls (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

// =============================================================================
// TRANSPORT DEFAULTS
// =============================================================================

/// Default MQTT-over-TLS port for AWS IoT endpoints
pub const DEFAULT_MQTT_PORT: u16 = 8883;

/// MQTT keep-alive interval (seconds)
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 6;

/// Timeout for the initial broker connection acknowledgment (seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Timeout for subscription and publish acknowledgments (seconds)
pub const ACK_TIMEOUT_SECS: u64 = 10;

/// Delay before the event loop retries after a connection interruption (seconds)
pub const RECONNECT_DELAY_SECS: u64 = 1;

// =============================================================================
// DEVICE IDENTIFICATION
// =============================================================================

/// Fixed OS location of the stable per-device identifier
pub const DEFAULT_MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Prefix prepended to the machine id to form the telemetry client id
pub const TELEMETRY_CLIENT_PREFIX: &str = "iot_";

// =============================================================================
// REGISTRATION PARAMETERS
// These keys are defined by the provisioning template and are case-sensitive
// =============================================================================

/// Registration parameter carrying the stable device serial
pub const PARAM_SERIAL_NUMBER: &str = "SerialNumber";

/// Registration parameter carrying the project classification
pub const PARAM_PROJECT_NAME: &str = "ProjectName";

/// Registration parameter carrying the device function classification
pub const PARAM_FUNCTION_TYPE: &str = "FunctionType";

/// Registration parameter carrying the device location classification
pub const PARAM_LOCATION: &str = "Location";

// =============================================================================
// CREDENTIAL BUNDLE LAYOUT
// =============================================================================

/// Subdirectory of the secure storage path holding the permanent bundle
pub const PERMANENT_CERT_DIR: &str = "permanent_cert";

/// File name of the configuration record written last into the bundle.
///
/// Its presence marks a complete bundle; an interrupted write never
/// leaves one behind.
pub const PERMANENT_CONFIG_FILE: &str = "perm_config.toml";

/// Default claim-side configuration file
pub const DEFAULT_CLAIM_CONFIG_FILE: &str = "config.toml";

// =============================================================================
// TELEMETRY
// =============================================================================

/// Default interval between telemetry readings (seconds)
pub const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 5;

/// Timestamp format used in telemetry messages
pub const TELEMETRY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Build the permanent certificate file name for a device serial
pub fn permanent_cert_file(serial: &str) -> String {
    format!("{serial}-certificate.pem.crt")
}

/// Build the permanent private-key file name for a device serial
pub fn permanent_key_file(serial: &str) -> String {
    format!("{serial}-private.pem.key")
}

/// Build the telemetry client id for a device serial
pub fn telemetry_client_id(serial: &str) -> String {
    format!("{TELEMETRY_CLIENT_PREFIX}{serial}")
}
