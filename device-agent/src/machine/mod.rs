//! # Stable Device Identifier
//!
//! Reads the machine identity from `/etc/machine-id` (path overridable
//! through configuration). The identifier serves as the MQTT client id
//! during provisioning, as the `SerialNumber` registration parameter,
//! and as the stem of the telemetry client id.

use std::fmt;
use std::path::Path;

use tracing::debug;

use shared::error::{ProvisionError, ProvisionResult};

/// Stable per-device identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineId(String);

impl MachineId {
    /// Read the identifier from the given path.
    ///
    /// Only the first line counts; surrounding whitespace is trimmed and
    /// empty content is rejected.
    pub async fn load(path: &Path) -> ProvisionResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProvisionError::ConfigurationError(format!(
                "failed to read machine id from '{}': {e}",
                path.display()
            ))
        })?;

        let id = raw.lines().next().unwrap_or("").trim();
        if id.is_empty() {
            return Err(ProvisionError::ConfigurationError(format!(
                "machine id file '{}' is empty",
                path.display()
            )));
        }

        debug!(machine_id = %id, "Loaded machine id");
        Ok(Self(id.to_string()))
    }

    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_trims_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("machine-id");
        tokio::fs::write(&path, "ab12cd34ef56\n").await.unwrap();

        let id = MachineId::load(&path).await.unwrap();
        assert_eq!(id.as_str(), "ab12cd34ef56");
    }

    #[tokio::test]
    async fn test_load_takes_first_line_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("machine-id");
        tokio::fs::write(&path, "ab12cd34ef56\ngarbage\n")
            .await
            .unwrap();

        let id = MachineId::load(&path).await.unwrap();
        assert_eq!(id.as_str(), "ab12cd34ef56");
    }

    #[tokio::test]
    async fn test_load_rejects_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("machine-id");
        tokio::fs::write(&path, "\n").await.unwrap();

        let err = MachineId::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = MachineId::load(&dir.path().join("absent")).await.unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
