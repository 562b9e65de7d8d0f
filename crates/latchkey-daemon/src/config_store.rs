//! Master configuration storage
//!
//! Holds the provider credentials and master password hash, sealed under the
//! master passphrase. The decrypted copy is cached in memory after an
//! explicit unlock; while locked, every read fails closed.

use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

use latchkey_core::{crypto, ExportEnvelope, MasterConfig, SealedBlob};

use crate::error::{DaemonError, Result};

pub struct MasterConfigStore {
    /// Path of the sealed configuration
    path: PathBuf,

    /// Present only while unlocked
    inner: RwLock<Option<MasterState>>,
}

struct MasterState {
    passphrase: Zeroizing<String>,
    config: MasterConfig,
}

impl MasterConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: RwLock::new(None),
        }
    }

    /// Whether a sealed configuration exists on disk (first-run probe)
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Decrypt the configuration and keep it cached
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        if !self.path.exists() {
            return Err(DaemonError::Config(
                "master configuration not initialized".to_string(),
            ));
        }

        let data = std::fs::read_to_string(&self.path)?;
        let plaintext = crypto::open(&data, passphrase)?;
        let config: MasterConfig = serde_json::from_slice(&plaintext)?;

        let mut inner = self.inner.write().await;
        *inner = Some(MasterState {
            passphrase: Zeroizing::new(passphrase.to_string()),
            config,
        });
        info!("Master configuration unlocked ({:?})", self.path);
        Ok(())
    }

    /// Drop the cached configuration and passphrase
    pub async fn lock(&self) {
        let mut inner = self.inner.write().await;
        if inner.take().is_some() {
            info!("Master configuration locked");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Cached configuration, or an error while locked
    pub async fn get(&self) -> Result<MasterConfig> {
        let inner = self.inner.read().await;
        let state = inner.as_ref().ok_or_else(Self::locked)?;
        Ok(state.config.clone())
    }

    /// Validate, seal, and persist a configuration, leaving the store
    /// unlocked under `passphrase`.
    ///
    /// Replacing an existing configuration requires the store to be
    /// unlocked first; a locked daemon never lets its credentials be
    /// swapped out from under it.
    pub async fn save(&self, config: MasterConfig, passphrase: &str) -> Result<()> {
        config.validate()?;

        let mut inner = self.inner.write().await;
        if self.path.exists() && inner.is_none() {
            return Err(Self::locked());
        }

        let plaintext = serde_json::to_vec(&config)?;
        let sealed = crypto::seal(&plaintext, passphrase)?;
        Self::write_sealed(&self.path, &sealed)?;

        *inner = Some(MasterState {
            passphrase: Zeroizing::new(passphrase.to_string()),
            config,
        });
        info!("Master configuration saved");
        Ok(())
    }

    /// Check a candidate master password against the cached hash
    pub async fn verify_master_password(&self, candidate: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        let state = inner.as_ref().ok_or_else(Self::locked)?;
        Ok(state.config.verify_master_password(candidate))
    }

    /// Wrap the sealed blob in a portable export envelope.
    ///
    /// The blob leaves sealed, so exporting needs no passphrase; the file
    /// only has to exist.
    pub async fn export(&self) -> Result<String> {
        if !self.path.exists() {
            return Err(DaemonError::Config(
                "master configuration not initialized".to_string(),
            ));
        }
        let sealed = std::fs::read_to_string(&self.path)?;
        let envelope = ExportEnvelope::new(sealed.trim().to_string());
        Ok(envelope.encode()?)
    }

    /// Install a previously exported configuration.
    ///
    /// The store ends up locked: the imported blob answers only to the
    /// passphrase it was sealed under.
    pub async fn import(&self, envelope_data: &str) -> Result<()> {
        let envelope = ExportEnvelope::decode(envelope_data)?;

        // Shape-check the carried blob before anything touches the disk
        SealedBlob::decode(&envelope.config)?;

        let mut inner = self.inner.write().await;
        Self::write_sealed(&self.path, &envelope.config)?;
        *inner = None;
        info!(
            "Imported master configuration (exported {})",
            envelope.export_date
        );
        Ok(())
    }

    fn locked() -> DaemonError {
        DaemonError::Config("master configuration is locked".to_string())
    }

    /// Replace the sealed file atomically
    fn write_sealed(path: &PathBuf, sealed: &str) -> Result<()> {
        let temp_path = path.with_extension("enc.tmp");
        std::fs::write(&temp_path, sealed)?;
        std::fs::rename(&temp_path, path)?;

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        debug!("Wrote sealed configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::CoreError;
    use tempfile::TempDir;

    fn config() -> MasterConfig {
        MasterConfig::new(
            "https://otp.example.com".to_string(),
            "api-key".to_string(),
            "master-pw",
        )
    }

    #[tokio::test]
    async fn save_unlock_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("master.enc");

        let store = MasterConfigStore::new(path.clone());
        assert!(!store.exists());
        store.save(config(), "master-pw").await.unwrap();
        assert!(store.exists());
        assert!(store.is_unlocked().await);

        let reopened = MasterConfigStore::new(path);
        reopened.unlock("master-pw").await.unwrap();
        let loaded = reopened.get().await.unwrap();
        assert_eq!(loaded.api_endpoint, "https://otp.example.com");
        assert!(reopened.verify_master_password("master-pw").await.unwrap());
        assert!(!reopened.verify_master_password("nope").await.unwrap());
    }

    #[tokio::test]
    async fn unlock_with_wrong_passphrase_fails_closed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("master.enc");

        let store = MasterConfigStore::new(path.clone());
        store.save(config(), "master-pw").await.unwrap();

        let reopened = MasterConfigStore::new(path);
        assert!(matches!(
            reopened.unlock("wrong").await,
            Err(DaemonError::Core(CoreError::DecryptionFailed))
        ));
        assert!(reopened.get().await.is_err());
    }

    #[tokio::test]
    async fn replacing_requires_unlock() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("master.enc");

        let store = MasterConfigStore::new(path.clone());
        store.save(config(), "master-pw").await.unwrap();

        let locked = MasterConfigStore::new(path);
        assert!(matches!(
            locked.save(config(), "other-pw").await,
            Err(DaemonError::Config(_))
        ));

        locked.unlock("master-pw").await.unwrap();
        locked.save(config(), "new-pw").await.unwrap();
        let reopened = MasterConfigStore::new(locked.path.clone());
        reopened.unlock("new-pw").await.unwrap();
    }

    #[tokio::test]
    async fn save_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let store = MasterConfigStore::new(temp_dir.path().join("master.enc"));

        let mut bad = config();
        bad.api_endpoint = "not a url".to_string();
        assert!(store.save(bad, "pw").await.is_err());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn export_import_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let source = MasterConfigStore::new(temp_dir.path().join("master.enc"));
        source.save(config(), "master-pw").await.unwrap();
        let exported = source.export().await.unwrap();

        let target = MasterConfigStore::new(temp_dir.path().join("imported.enc"));
        target.import(&exported).await.unwrap();
        assert!(target.exists());
        assert!(!target.is_unlocked().await);

        // The imported blob still answers to the original passphrase
        target.unlock("master-pw").await.unwrap();
        assert_eq!(target.get().await.unwrap().api_key, "api-key");
    }

    #[tokio::test]
    async fn import_rejects_malformed_envelopes() {
        let temp_dir = TempDir::new().unwrap();
        let store = MasterConfigStore::new(temp_dir.path().join("master.enc"));

        assert!(store.import("garbage!!").await.is_err());

        // A well-formed envelope around a malformed blob is refused too
        let envelope = ExportEnvelope::new("not-a-sealed-blob".to_string());
        let encoded = envelope.encode().unwrap();
        assert!(store.import(&encoded).await.is_err());
        assert!(!store.exists());
    }
}
