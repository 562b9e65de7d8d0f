//! Client for communicating with the Latchkey daemon

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use latchkey_core::{OtpRef, Session, SystemUser, UserId, UserPolicy};
use latchkey_daemon::ipc::{IpcClient, IpcRequest, IpcResponse, WatchStream};
use latchkey_daemon::GatekeeperStatus;

/// Client for the Latchkey daemon
pub struct LatchkeyClient {
    inner: IpcClient,
}

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Daemon error: {0}")]
    DaemonError(String),
}

impl ClientError {
    fn from_daemon_error(e: latchkey_daemon::error::DaemonError) -> Self {
        match &e {
            latchkey_daemon::error::DaemonError::Ipc(msg) if msg.contains("not running") => {
                ClientError::DaemonNotRunning
            }
            _ => ClientError::DaemonError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl LatchkeyClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        let socket_path = std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("latchkey.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/latchkey.sock"));

        Self {
            inner: IpcClient::new(socket_path),
        }
    }

    /// Create a new client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            inner: IpcClient::new(socket_path),
        }
    }

    async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        self.inner
            .request(request)
            .await
            .map_err(ClientError::from_daemon_error)
    }

    /// Check if the daemon is running
    pub async fn ping(&self) -> Result<String> {
        match self.request(&IpcRequest::Ping).await? {
            IpcResponse::Pong { version } => Ok(version),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Get the daemon and gatekeeper status
    pub async fn status(&self) -> Result<GatekeeperStatus> {
        match self.request(&IpcRequest::GetStatus).await? {
            IpcResponse::Status { status } => Ok(status),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// List local accounts eligible for a policy
    pub async fn system_users(&self) -> Result<Vec<SystemUser>> {
        match self.request(&IpcRequest::GetSystemUsers).await? {
            IpcResponse::SystemUsers { users } => Ok(users),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Insert or replace a user policy
    pub async fn save_policy(&self, policy: UserPolicy) -> Result<UserPolicy> {
        match self.request(&IpcRequest::SaveUserPolicy { policy }).await? {
            IpcResponse::Policy { policy } => Ok(policy),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Fetch one user policy
    pub async fn get_policy(&self, user_id: &UserId) -> Result<UserPolicy> {
        let request = IpcRequest::GetUserPolicy {
            user_id: user_id.clone(),
        };
        match self.request(&request).await? {
            IpcResponse::Policy { policy } => Ok(policy),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// List all user policies
    pub async fn list_policies(&self) -> Result<Vec<UserPolicy>> {
        match self.request(&IpcRequest::ListUserPolicies).await? {
            IpcResponse::Policies { policies } => Ok(policies),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Delete a user policy
    pub async fn remove_policy(&self, user_id: &UserId) -> Result<()> {
        let request = IpcRequest::RemoveUserPolicy {
            user_id: user_id.clone(),
        };
        match self.request(&request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Store provider credentials and the master password
    pub async fn save_master_config(
        &self,
        api_endpoint: &str,
        api_key: &str,
        master_password: &str,
    ) -> Result<()> {
        let request = IpcRequest::SaveMasterConfig {
            api_endpoint: api_endpoint.to_string(),
            api_key: api_key.to_string(),
            master_password: master_password.to_string(),
        };
        match self.request(&request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Unlock both stores with the master password
    pub async fn unlock(&self, master_password: &str) -> Result<()> {
        let request = IpcRequest::UnlockMasterConfig {
            master_password: master_password.to_string(),
        };
        match self.request(&request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Check connectivity to the OTP provider
    pub async fn test_provider(&self) -> Result<()> {
        match self.request(&IpcRequest::TestProvider).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Export the sealed master configuration
    pub async fn export_config(&self) -> Result<String> {
        match self.request(&IpcRequest::ExportConfig).await? {
            IpcResponse::ConfigExport { envelope } => Ok(envelope),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Replace the master configuration from an exported envelope
    pub async fn import_config(&self, envelope: &str) -> Result<()> {
        let request = IpcRequest::ImportConfig {
            envelope: envelope.to_string(),
        };
        match self.request(&request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Issue a fresh OTP challenge for a user
    pub async fn request_otp(&self, user_id: &UserId) -> Result<(OtpRef, DateTime<Utc>)> {
        let request = IpcRequest::RequestOtp {
            user_id: user_id.clone(),
        };
        match self.request(&request).await? {
            IpcResponse::OtpRequested {
                otp_ref,
                expires_at,
            } => Ok((otp_ref, expires_at)),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Verify a submitted OTP code
    pub async fn verify_otp(&self, user_id: &UserId, code: &str) -> Result<()> {
        let request = IpcRequest::VerifyOtp {
            user_id: user_id.clone(),
            code: code.to_string(),
        };
        match self.request(&request).await? {
            IpcResponse::Ok => Ok(()),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// List currently tracked sessions
    pub async fn sessions(&self) -> Result<Vec<Session>> {
        match self.request(&IpcRequest::ListSessions).await? {
            IpcResponse::Sessions { sessions } => Ok(sessions),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Open a long-lived notification stream
    pub async fn watch(&self) -> Result<WatchStream> {
        self.inner
            .watch()
            .await
            .map_err(ClientError::from_daemon_error)
    }
}

impl Default for LatchkeyClient {
    fn default() -> Self {
        Self::new()
    }
}
