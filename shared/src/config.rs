//! # Configuration for the Fleet Provisioning Agent
//!
//! This module handles configuration loading and validation. Two TOML
//! files exist in a device's lifetime: the claim-side file consumed
//! before provisioning, and the permanent record written afterwards and
//! read by the telemetry publisher.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ProvisionError, ProvisionResult};
use crate::topic;

// =============================================================================
// OVERWRITE POLICY
// =============================================================================

/// What to do when a permanent credential bundle already exists
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Refuse to touch the existing bundle (default)
    #[default]
    Fail,
    /// Replace the existing bundle
    Overwrite,
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverwritePolicy::Fail => write!(f, "fail"),
            OverwritePolicy::Overwrite => write!(f, "overwrite"),
        }
    }
}

// =============================================================================
// CLAIM-SIDE CONFIGURATION
// =============================================================================

/// Claim-side configuration, loaded before provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// The `[settings]` table
    pub settings: ProvisionSettings,
}

/// The `[settings]` table of the claim-side configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSettings {
    /// Directory holding the claim credentials and, later, the bundle
    pub secure_cert_path: PathBuf,

    /// Trust-root certificate file name inside `secure_cert_path`
    pub root_cert: String,

    /// Claim certificate file name inside `secure_cert_path`
    pub claim_cert: String,

    /// Claim private-key file name inside `secure_cert_path`
    pub secure_key: String,

    /// Broker endpoint hostname
    pub iot_endpoint: String,

    /// Telemetry topic template with connection placeholders
    pub iot_topic: String,

    /// Provisioning template instantiated by the register-thing step
    pub provisioning_template_name: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Where to read the stable machine identifier from
    #[serde(default = "default_machine_id_path")]
    pub machine_id_path: PathBuf,

    /// Policy applied when a permanent bundle already exists
    #[serde(default)]
    pub on_existing_bundle: OverwritePolicy,
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_machine_id_path() -> PathBuf {
    PathBuf::from(DEFAULT_MACHINE_ID_PATH)
}

impl ProvisionConfig {
    /// Load and validate the claim-side configuration file
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ProvisionError::ConfigurationError(format!(
                "failed to read '{}': {e}",
                path.display()
            ))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            ProvisionError::ConfigurationError(format!(
                "failed to parse '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ProvisionResult<()> {
        let settings = &self.settings;
        let required = [
            ("iot_endpoint", settings.iot_endpoint.as_str()),
            ("iot_topic", settings.iot_topic.as_str()),
            (
                "provisioning_template_name",
                settings.provisioning_template_name.as_str(),
            ),
            ("root_cert", settings.root_cert.as_str()),
            ("claim_cert", settings.claim_cert.as_str()),
            ("secure_key", settings.secure_key.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ProvisionError::ConfigurationError(format!(
                    "settings.{field} must not be empty"
                )));
            }
        }
        if settings.port == 0 {
            return Err(ProvisionError::ConfigurationError(
                "settings.port must not be 0".into(),
            ));
        }
        Ok(())
    }
}

impl ProvisionSettings {
    /// Full path of the trust-root certificate
    pub fn root_cert_path(&self) -> PathBuf {
        self.secure_cert_path.join(&self.root_cert)
    }

    /// Full path of the claim certificate
    pub fn claim_cert_path(&self) -> PathBuf {
        self.secure_cert_path.join(&self.claim_cert)
    }

    /// Full path of the claim private key
    pub fn claim_key_path(&self) -> PathBuf {
        self.secure_cert_path.join(&self.secure_key)
    }

    /// Directory that will hold the permanent credential bundle
    pub fn permanent_dir(&self) -> PathBuf {
        self.secure_cert_path.join(PERMANENT_CERT_DIR)
    }
}

// =============================================================================
// PERMANENT CONFIGURATION
// =============================================================================

/// Permanent record written after provisioning, read by telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanentConfig {
    /// The `[settings]` table
    pub settings: PermanentSettings,

    /// The `[device]` table
    pub device: DeviceRecord,
}

/// The `[settings]` table of the permanent record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanentSettings {
    /// Directory holding the permanent bundle
    pub secure_cert_path: PathBuf,

    /// Full path of the trust-root certificate copy
    pub root_cert: PathBuf,

    /// Full path of the permanent device certificate
    pub device_cert: PathBuf,

    /// Full path of the permanent private key
    pub device_key: PathBuf,

    /// Broker endpoint hostname
    pub iot_endpoint: String,

    /// Telemetry topic template with connection placeholders
    pub iot_topic: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// The `[device]` table: registration outcome and classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable machine identifier used as the registration serial
    pub serial_number: String,

    /// Thing name assigned by the registration service
    pub thing_name: String,

    /// Project classification
    pub project_name: String,

    /// Function classification
    pub function_type: String,

    /// Location classification
    pub location: String,
}

impl PermanentConfig {
    /// Load and validate a permanent record
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ProvisionError::ConfigurationError(format!(
                "failed to read '{}': {e}",
                path.display()
            ))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            ProvisionError::ConfigurationError(format!(
                "failed to parse '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the record
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.settings.iot_endpoint.trim().is_empty() {
            return Err(ProvisionError::ConfigurationError(
                "settings.iot_endpoint must not be empty".into(),
            ));
        }
        if self.device.thing_name.trim().is_empty() {
            return Err(ProvisionError::ConfigurationError(
                "device.thing_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Serialize the record for writing into the bundle
    pub fn to_toml_string(&self) -> ProvisionResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ProvisionError::SerializationError(e.to_string()))
    }

    /// Resolve the telemetry topic template for this device
    pub fn telemetry_topic(&self) -> String {
        topic::resolve_topic(
            &self.settings.iot_topic,
            &self.device.thing_name,
            &self.device.attribute_pairs(),
        )
    }
}

impl DeviceRecord {
    /// Classification attributes in topic-placeholder form
    pub fn attribute_pairs(&self) -> [(&str, &str); 3] {
        [
            (PARAM_PROJECT_NAME, self.project_name.as_str()),
            (PARAM_FUNCTION_TYPE, self.function_type.as_str()),
            (PARAM_LOCATION, self.location.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAIM_TOML: &str = r#"
        [settings]
        secure_cert_path = "/var/lib/device/certs"
        root_cert = "AmazonRootCA1.pem"
        claim_cert = "claim-certificate.pem.crt"
        secure_key = "claim-private.pem.key"
        iot_endpoint = "abc123-ats.iot.us-east-1.amazonaws.com"
        iot_topic = "devices/${iot:Connection.Thing.ThingName}/data"
        provisioning_template_name = "GreenhouseTemplate"
    "#;

    #[test]
    fn test_claim_config_defaults() {
        let config: ProvisionConfig = toml::from_str(CLAIM_TOML).unwrap();
        config.validate().unwrap();

        assert_eq!(config.settings.port, 8883);
        assert_eq!(config.settings.keep_alive_secs, 6);
        assert_eq!(
            config.settings.machine_id_path,
            PathBuf::from("/etc/machine-id")
        );
        assert_eq!(config.settings.on_existing_bundle, OverwritePolicy::Fail);
    }

    #[test]
    fn test_claim_config_paths() {
        let config: ProvisionConfig = toml::from_str(CLAIM_TOML).unwrap();
        assert_eq!(
            config.settings.claim_cert_path(),
            PathBuf::from("/var/lib/device/certs/claim-certificate.pem.crt")
        );
        assert_eq!(
            config.settings.permanent_dir(),
            PathBuf::from("/var/lib/device/certs/permanent_cert")
        );
    }

    #[test]
    fn test_overwrite_policy_parses() {
        let toml_str = CLAIM_TOML.replace(
            "provisioning_template_name = \"GreenhouseTemplate\"",
            "provisioning_template_name = \"GreenhouseTemplate\"\non_existing_bundle = \"overwrite\"",
        );
        let config: ProvisionConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            config.settings.on_existing_bundle,
            OverwritePolicy::Overwrite
        );
    }

    #[test]
    fn test_validate_rejects_empty_endpoint() {
        let toml_str = CLAIM_TOML.replace(
            "iot_endpoint = \"abc123-ats.iot.us-east-1.amazonaws.com\"",
            "iot_endpoint = \"\"",
        );
        let config: ProvisionConfig = toml::from_str(&toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("iot_endpoint"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ProvisionConfig::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    fn sample_permanent_config() -> PermanentConfig {
        PermanentConfig {
            settings: PermanentSettings {
                secure_cert_path: "/var/lib/device/certs/permanent_cert".into(),
                root_cert: "/var/lib/device/certs/permanent_cert/AmazonRootCA1.pem".into(),
                device_cert:
                    "/var/lib/device/certs/permanent_cert/ab12cd34-certificate.pem.crt".into(),
                device_key: "/var/lib/device/certs/permanent_cert/ab12cd34-private.pem.key"
                    .into(),
                iot_endpoint: "abc123-ats.iot.us-east-1.amazonaws.com".into(),
                iot_topic:
                    "devices/${iot:Connection.Thing.ThingName}/${iot:Connection.Thing.Attributes[ProjectName]}/data"
                        .into(),
                port: 8883,
                keep_alive_secs: 6,
            },
            device: DeviceRecord {
                serial_number: "ab12cd34".into(),
                thing_name: "iot_ab12cd34".into(),
                project_name: "Greenhouse".into(),
                function_type: "TempSensor".into(),
                location: "Rooftop".into(),
            },
        }
    }

    #[test]
    fn test_permanent_config_round_trip() {
        let config = sample_permanent_config();
        let serialized = config.to_toml_string().unwrap();
        let parsed: PermanentConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(parsed.device.thing_name, "iot_ab12cd34");
        assert_eq!(parsed.settings.device_cert, config.settings.device_cert);
        assert_eq!(parsed.settings.port, 8883);
    }

    #[test]
    fn test_permanent_config_telemetry_topic() {
        let config = sample_permanent_config();
        assert_eq!(
            config.telemetry_topic(),
            "devices/iot_ab12cd34/Greenhouse/data"
        );
    }
}
