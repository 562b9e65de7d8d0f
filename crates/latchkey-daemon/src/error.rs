//! Error types for the Latchkey daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] latchkey_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Master configuration missing, locked, or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// No policy exists for the user
    #[error("No policy for user {0}")]
    PolicyNotFound(String),

    /// The user's policy is disabled
    #[error("Policy for user {0} is disabled")]
    PolicyDisabled(String),

    /// OTP provider failure (network, HTTP, or provider-reported)
    #[error("Provider error: {0}")]
    Provider(String),

    /// No outstanding challenge for the user
    #[error("No pending challenge for user {0}")]
    NoChallenge(String),

    /// The outstanding challenge has expired
    #[error("Challenge for user {0} has expired")]
    ChallengeExpired(String),

    /// The provider rejected the submitted code
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// The challenge was invalidated after too many failed codes
    #[error("Too many failed attempts; request a new code")]
    AttemptsExhausted,

    /// Session enumeration failed; the session set is unknown, not empty
    #[error("Session enumeration failed: {0}")]
    SessionEnumeration(String),

    /// A lock, unlock, or logoff command failed
    #[error("Session action failed: {0}")]
    SessionAction(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Service lifecycle: start() on a running service
    #[error("Service is already running")]
    AlreadyRunning,

    /// Service lifecycle: stop() on a stopped service
    #[error("Service is not running")]
    NotRunning,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for DaemonError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DaemonError::Timeout
        } else {
            DaemonError::Provider(e.to_string())
        }
    }
}
