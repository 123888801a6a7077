//! # Credential Persistence
//!
//! Writes the permanent credential bundle after both provisioning steps
//! succeed: certificate, private key (owner-only permissions), a copy of
//! the trust-root certificate, and the permanent configuration record.
//!
//! The configuration record is written last and doubles as the bundle
//! marker: an interrupted run never leaves a bundle that looks complete.

use tracing::{debug, info, warn};

use shared::config::{
    DeviceRecord, OverwritePolicy, PermanentConfig, PermanentSettings, ProvisionSettings,
};
use shared::constants::{permanent_cert_file, permanent_key_file, PERMANENT_CONFIG_FILE};
use shared::error::{ProvisionError, ProvisionResult};
use shared::types::DeviceIdentity;

/// Writes the durable credential bundle derived from a completed
/// provisioning run.
pub struct CredentialWriter {
    settings: ProvisionSettings,
}

impl CredentialWriter {
    /// Create a writer for the claim-side settings the bundle derives from
    pub fn new(settings: ProvisionSettings) -> Self {
        Self { settings }
    }

    /// Write the bundle under `<secure_cert_path>/permanent_cert/`.
    ///
    /// Honors the configured overwrite policy when a complete bundle is
    /// already present. Returns the permanent record that was written.
    pub async fn persist(
        &self,
        identity: &DeviceIdentity,
        device: DeviceRecord,
    ) -> ProvisionResult<PermanentConfig> {
        let bundle_dir = self.settings.permanent_dir();
        let record_path = bundle_dir.join(PERMANENT_CONFIG_FILE);

        if record_path.exists() {
            match self.settings.on_existing_bundle {
                OverwritePolicy::Fail => {
                    return Err(ProvisionError::PersistenceError(format!(
                        "permanent credential bundle already exists at '{}' \
                         (set on_existing_bundle = \"overwrite\" to replace it)",
                        bundle_dir.display()
                    )));
                }
                OverwritePolicy::Overwrite => {
                    warn!(path = %bundle_dir.display(), "Replacing existing credential bundle");
                }
            }
        }

        tokio::fs::create_dir_all(&bundle_dir).await.map_err(|e| {
            ProvisionError::PersistenceError(format!(
                "failed to create '{}': {e}",
                bundle_dir.display()
            ))
        })?;

        let cert_path = bundle_dir.join(permanent_cert_file(&device.serial_number));
        tokio::fs::write(&cert_path, &identity.certificate_pem)
            .await
            .map_err(|e| {
                ProvisionError::PersistenceError(format!(
                    "failed to write '{}': {e}",
                    cert_path.display()
                ))
            })?;
        debug!(path = %cert_path.display(), "Certificate stored");

        let key_path = bundle_dir.join(permanent_key_file(&device.serial_number));
        tokio::fs::write(&key_path, &identity.private_key_pem)
            .await
            .map_err(|e| {
                ProvisionError::PersistenceError(format!(
                    "failed to write '{}': {e}",
                    key_path.display()
                ))
            })?;
        // Set file permissions to owner-only read/write (Unix)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&key_path, perms).map_err(|e| {
                ProvisionError::PersistenceError(format!(
                    "failed to restrict '{}': {e}",
                    key_path.display()
                ))
            })?;
        }
        debug!(path = %key_path.display(), "Private key stored");

        let root_source = self.settings.root_cert_path();
        let root_path = bundle_dir.join(&self.settings.root_cert);
        tokio::fs::copy(&root_source, &root_path)
            .await
            .map_err(|e| {
                ProvisionError::PersistenceError(format!(
                    "failed to copy '{}' to '{}': {e}",
                    root_source.display(),
                    root_path.display()
                ))
            })?;
        debug!(path = %root_path.display(), "Trust root copied");

        let permanent = PermanentConfig {
            settings: PermanentSettings {
                secure_cert_path: bundle_dir.clone(),
                root_cert: root_path,
                device_cert: cert_path,
                device_key: key_path,
                iot_endpoint: self.settings.iot_endpoint.clone(),
                iot_topic: self.settings.iot_topic.clone(),
                port: self.settings.port,
                keep_alive_secs: self.settings.keep_alive_secs,
            },
            device,
        };

        // The record goes in last; its presence marks the bundle complete.
        let record = permanent.to_toml_string()?;
        tokio::fs::write(&record_path, record).await.map_err(|e| {
            ProvisionError::PersistenceError(format!(
                "failed to write '{}': {e}",
                record_path.display()
            ))
        })?;

        info!(
            path = %record_path.display(),
            thing_name = %permanent.device.thing_name,
            "Credential bundle persisted"
        );
        Ok(permanent)
    }
}
