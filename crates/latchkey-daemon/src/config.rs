//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the encrypted stores
    pub data_dir: PathBuf,

    /// Unix socket path for IPC
    pub ipc_socket_path: PathBuf,

    /// Optional 0600 file the store passphrase is read from at startup.
    /// Without it the daemon stays locked until an unlock request arrives.
    pub passphrase_file: Option<PathBuf>,

    /// Seconds between session scans
    pub scan_interval_secs: u64,

    /// Seconds between expired-challenge sweeps
    pub sweep_interval_secs: u64,

    /// Minutes before an unanswered challenge expires
    pub otp_expiry_minutes: u32,

    /// Failed verifications before a challenge is invalidated
    pub max_verify_attempts: u32,

    /// Skip window applied to policies created without one (minutes)
    pub default_skip_minutes: u32,

    /// Timeout for OS session commands (seconds)
    pub session_command_timeout_secs: u64,

    /// Timeout for provider send/verify calls (seconds)
    pub provider_timeout_secs: u64,

    /// Timeout for provider health checks (seconds)
    pub health_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            ipc_socket_path: Self::default_ipc_path(),
            passphrase_file: None,
            scan_interval_secs: 3,
            sweep_interval_secs: 60,
            otp_expiry_minutes: 10,
            max_verify_attempts: 3,
            default_skip_minutes: 60,
            session_command_timeout_secs: 5,
            provider_timeout_secs: 10,
            health_timeout_secs: 5,
        }
    }
}

impl DaemonConfig {
    /// Platform-appropriate default IPC path
    fn default_ipc_path() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, fallback to /tmp
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("latchkey.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/latchkey.sock"))
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("latchkey")
    }

    /// Path of the sealed policy table
    pub fn policy_store_path(&self) -> PathBuf {
        self.data_dir.join("policies.enc")
    }

    /// Path of the sealed master configuration
    pub fn master_config_path(&self) -> PathBuf {
        self.data_dir.join("master.enc")
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> crate::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;

        // The stores hold sealed secrets; keep the directory owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.data_dir)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(&self.data_dir, perms)?;
        }

        if let Some(parent) = self.ipc_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(())
    }
}
