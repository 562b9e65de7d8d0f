//! IPC message types shared by the daemon and the console client

use chrono::{DateTime, Utc};
use latchkey_core::{OtpRef, Session, SystemUser, UserId, UserPolicy};
use serde::{Deserialize, Serialize};

use crate::gatekeeper::{GateNotification, GatekeeperStatus};

/// Requests the console can send to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Check if daemon is alive
    Ping,
    /// Get daemon and gatekeeper status
    GetStatus,
    /// List local accounts eligible for a policy
    GetSystemUsers,
    /// Insert or replace a user policy
    SaveUserPolicy { policy: UserPolicy },
    /// Fetch one user policy
    GetUserPolicy { user_id: UserId },
    /// List all user policies
    ListUserPolicies,
    /// Delete a user policy
    RemoveUserPolicy { user_id: UserId },
    /// Store provider credentials and the master password.
    /// The master password also seals both encrypted stores.
    SaveMasterConfig {
        api_endpoint: String,
        api_key: String,
        master_password: String,
    },
    /// Unlock both encrypted stores with the master password
    UnlockMasterConfig { master_password: String },
    /// Check connectivity to the OTP provider
    TestProvider,
    /// Export the sealed master configuration as a portable envelope
    ExportConfig,
    /// Replace the master configuration from an exported envelope
    ImportConfig { envelope: String },
    /// Issue a fresh OTP challenge for a user
    RequestOtp { user_id: UserId },
    /// Verify a submitted OTP code
    VerifyOtp { user_id: UserId, code: String },
    /// List currently tracked sessions
    ListSessions,
    /// Switch this connection into a notification stream
    Watch,
}

impl IpcRequest {
    /// Operation name safe for logging. Never includes payload fields,
    /// some of which carry passwords and codes.
    pub fn name(&self) -> &'static str {
        match self {
            IpcRequest::Ping => "Ping",
            IpcRequest::GetStatus => "GetStatus",
            IpcRequest::GetSystemUsers => "GetSystemUsers",
            IpcRequest::SaveUserPolicy { .. } => "SaveUserPolicy",
            IpcRequest::GetUserPolicy { .. } => "GetUserPolicy",
            IpcRequest::ListUserPolicies => "ListUserPolicies",
            IpcRequest::RemoveUserPolicy { .. } => "RemoveUserPolicy",
            IpcRequest::SaveMasterConfig { .. } => "SaveMasterConfig",
            IpcRequest::UnlockMasterConfig { .. } => "UnlockMasterConfig",
            IpcRequest::TestProvider => "TestProvider",
            IpcRequest::ExportConfig => "ExportConfig",
            IpcRequest::ImportConfig { .. } => "ImportConfig",
            IpcRequest::RequestOtp { .. } => "RequestOtp",
            IpcRequest::VerifyOtp { .. } => "VerifyOtp",
            IpcRequest::ListSessions => "ListSessions",
            IpcRequest::Watch => "Watch",
        }
    }
}

/// Responses the daemon sends back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Operation completed
    Ok,
    /// Ping response with daemon version
    Pong { version: String },
    /// Operation failed
    Error { message: String },
    /// Daemon and gatekeeper status
    Status { status: GatekeeperStatus },
    /// Local accounts
    SystemUsers { users: Vec<SystemUser> },
    /// A single user policy
    Policy { policy: UserPolicy },
    /// All user policies
    Policies { policies: Vec<UserPolicy> },
    /// An OTP challenge was issued
    OtpRequested {
        otp_ref: OtpRef,
        expires_at: DateTime<Utc>,
    },
    /// Currently tracked sessions
    Sessions { sessions: Vec<Session> },
    /// Sealed master configuration envelope
    ConfigExport { envelope: String },
    /// A gate event, sent on Watch connections only
    Notification { event: GateNotification },
}
