//! Encrypted per-user policy storage
//!
//! The whole policy table is one sealed blob on disk. Every mutation
//! re-encrypts the full table and replaces the file atomically. A blob that
//! fails to authenticate or parse refuses to load; there is no empty-table
//! fallback.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

use latchkey_core::{crypto, UserId, UserPolicy};

use crate::error::{DaemonError, Result};

/// Storage for per-user OTP policies
pub struct PolicyStore {
    /// Path of the sealed table
    path: PathBuf,

    /// Present only while unlocked
    inner: RwLock<Option<StoreState>>,
}

struct StoreState {
    /// Needed to re-seal the table on every mutation
    passphrase: Zeroizing<String>,
    policies: HashMap<UserId, UserPolicy>,
}

impl PolicyStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: RwLock::new(None),
        }
    }

    /// Decrypt the table and keep it cached. A missing file is a fresh,
    /// empty table; a file that fails to open keeps the store locked.
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        let policies = if self.path.exists() {
            let data = std::fs::read_to_string(&self.path)?;
            let plaintext = crypto::open(&data, passphrase)?;
            serde_json::from_slice(&plaintext)?
        } else {
            HashMap::new()
        };

        let mut inner = self.inner.write().await;
        *inner = Some(StoreState {
            passphrase: Zeroizing::new(passphrase.to_string()),
            policies,
        });
        info!("Policy store unlocked ({:?})", self.path);
        Ok(())
    }

    /// Drop the cached table and passphrase
    pub async fn lock(&self) {
        let mut inner = self.inner.write().await;
        if inner.take().is_some() {
            info!("Policy store locked");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Re-seal the table on disk under a new passphrase
    pub async fn reseal(&self, passphrase: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner.as_mut().ok_or_else(Self::locked)?;
        state.passphrase = Zeroizing::new(passphrase.to_string());
        Self::save_to_disk(&self.path, state)?;
        info!("Policy store re-sealed");
        Ok(())
    }

    pub async fn get(&self, user_id: &UserId) -> Result<Option<UserPolicy>> {
        let inner = self.inner.read().await;
        let state = inner.as_ref().ok_or_else(Self::locked)?;
        Ok(state.policies.get(user_id).cloned())
    }

    pub async fn all(&self) -> Result<Vec<UserPolicy>> {
        let inner = self.inner.read().await;
        let state = inner.as_ref().ok_or_else(Self::locked)?;
        let mut policies: Vec<UserPolicy> = state.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.user_id.0.cmp(&b.user_id.0));
        Ok(policies)
    }

    /// Insert or replace a policy and persist the table.
    ///
    /// `last_otp_verified_at` is never taken from the caller: an edit keeps
    /// the stored value while the delivery identity is unchanged, and a new
    /// or re-identified policy starts unverified.
    pub async fn put(&self, mut policy: UserPolicy) -> Result<UserPolicy> {
        policy.normalize();
        policy.validate()?;

        let mut inner = self.inner.write().await;
        let state = inner.as_mut().ok_or_else(Self::locked)?;

        match state.policies.get(&policy.user_id) {
            Some(existing) if existing.delivery_id == policy.delivery_id => {
                policy.last_otp_verified_at = existing.last_otp_verified_at;
            }
            _ => policy.last_otp_verified_at = None,
        }
        policy.updated_at = Utc::now();

        state
            .policies
            .insert(policy.user_id.clone(), policy.clone());
        Self::save_to_disk(&self.path, state)?;
        debug!("Stored policy for user {}", policy.user_id);
        Ok(policy)
    }

    /// Record a successful verification for the user
    pub async fn mark_verified(&self, user_id: &UserId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner.as_mut().ok_or_else(Self::locked)?;

        let policy = state
            .policies
            .get_mut(user_id)
            .ok_or_else(|| DaemonError::PolicyNotFound(user_id.to_string()))?;
        policy.mark_verified(Utc::now());

        Self::save_to_disk(&self.path, state)?;
        Ok(())
    }

    /// Remove a policy. Returns false when none existed.
    pub async fn remove(&self, user_id: &UserId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let state = inner.as_mut().ok_or_else(Self::locked)?;

        let removed = state.policies.remove(user_id).is_some();
        if removed {
            Self::save_to_disk(&self.path, state)?;
            info!("Removed policy for user {}", user_id);
        }
        Ok(removed)
    }

    fn locked() -> DaemonError {
        DaemonError::Config("policy store is locked".to_string())
    }

    /// Seal the table and replace the file atomically
    fn save_to_disk(path: &PathBuf, state: &StoreState) -> Result<()> {
        let plaintext = serde_json::to_vec(&state.policies)?;
        let sealed = crypto::seal(&plaintext, &state.passphrase)?;

        let temp_path = path.with_extension("enc.tmp");
        std::fs::write(&temp_path, &sealed)?;
        std::fs::rename(&temp_path, path)?;

        // Set restrictive permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::CoreError;
    use tempfile::TempDir;

    fn policy(user_id: &str) -> UserPolicy {
        UserPolicy::new(
            UserId::new(user_id),
            vec!["+15550100".to_string()],
            60,
        )
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("policies.enc");

        let store = PolicyStore::new(path.clone());
        store.unlock("pw").await.unwrap();
        store.put(policy("1000")).await.unwrap();

        let reopened = PolicyStore::new(path);
        reopened.unlock("pw").await.unwrap();
        let loaded = reopened.get(&UserId::new("1000")).await.unwrap().unwrap();
        assert_eq!(loaded.mobile_numbers, vec!["+15550100"]);
        assert!(loaded.enabled);
    }

    #[tokio::test]
    async fn wrong_passphrase_fails_closed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("policies.enc");

        let store = PolicyStore::new(path.clone());
        store.unlock("pw").await.unwrap();
        store.put(policy("1000")).await.unwrap();

        let reopened = PolicyStore::new(path);
        let result = reopened.unlock("wrong").await;
        assert!(matches!(
            result,
            Err(DaemonError::Core(CoreError::DecryptionFailed))
        ));
        assert!(!reopened.is_unlocked().await);
        assert!(reopened.get(&UserId::new("1000")).await.is_err());
    }

    #[tokio::test]
    async fn corrupt_file_refuses_to_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("policies.enc");
        std::fs::write(&path, "definitely not a sealed blob").unwrap();

        let store = PolicyStore::new(path);
        assert!(store.unlock("pw").await.is_err());
        assert!(!store.is_unlocked().await);
    }

    #[tokio::test]
    async fn put_ignores_caller_supplied_verification_time() {
        let temp_dir = TempDir::new().unwrap();
        let store = PolicyStore::new(temp_dir.path().join("policies.enc"));
        store.unlock("pw").await.unwrap();

        let mut forged = policy("1000");
        forged.last_otp_verified_at = Some(Utc::now());
        let stored = store.put(forged).await.unwrap();
        assert!(stored.last_otp_verified_at.is_none());
    }

    #[tokio::test]
    async fn edit_keeps_verification_until_delivery_changes() {
        let temp_dir = TempDir::new().unwrap();
        let store = PolicyStore::new(temp_dir.path().join("policies.enc"));
        store.unlock("pw").await.unwrap();

        let stored = store.put(policy("1000")).await.unwrap();
        store.mark_verified(&UserId::new("1000")).await.unwrap();

        // Edit with the same delivery identity keeps the window
        let mut edited = stored.clone();
        edited.skip_duration_minutes = 30;
        let stored = store.put(edited).await.unwrap();
        assert!(stored.last_otp_verified_at.is_some());
        assert_eq!(stored.skip_duration_minutes, 30);

        // A fresh delivery identity starts unverified
        let replacement = policy("1000");
        let stored = store.put(replacement).await.unwrap();
        assert!(stored.last_otp_verified_at.is_none());
    }

    #[tokio::test]
    async fn reseal_changes_the_on_disk_passphrase() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("policies.enc");

        let store = PolicyStore::new(path.clone());
        store.unlock("old-pw").await.unwrap();
        store.put(policy("1000")).await.unwrap();
        store.reseal("new-pw").await.unwrap();

        let reopened = PolicyStore::new(path);
        assert!(reopened.unlock("old-pw").await.is_err());
        reopened.unlock("new-pw").await.unwrap();
        assert!(reopened
            .get(&UserId::new("1000"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn put_rejects_invalid_policies() {
        let temp_dir = TempDir::new().unwrap();
        let store = PolicyStore::new(temp_dir.path().join("policies.enc"));
        store.unlock("pw").await.unwrap();

        let mut bad = policy("1000");
        bad.mobile_numbers = vec!["   ".to_string()];
        assert!(store.put(bad).await.is_err());
        assert!(store.get(&UserId::new("1000")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = PolicyStore::new(temp_dir.path().join("policies.enc"));
        store.unlock("pw").await.unwrap();

        store.put(policy("1001")).await.unwrap();
        store.put(policy("1000")).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user_id.as_str(), "1000");

        assert!(store.remove(&UserId::new("1000")).await.unwrap());
        assert!(!store.remove(&UserId::new("1000")).await.unwrap());
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
