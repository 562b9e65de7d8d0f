//! Latchkey Core - Shared types, policy model, and sealed-blob cryptography
//!
//! This crate provides the foundational types for the Latchkey login
//! gatekeeper: session and user identifiers, the per-user OTP policy model,
//! the master configuration, and the passphrase-sealed blob format used for
//! everything Latchkey persists.

pub mod crypto;
pub mod error;
pub mod master;
pub mod policy;
pub mod types;

pub use crypto::{hash_password, open, seal, verify_password, PasswordHash, SealedBlob};
pub use error::{CoreError, Result};
pub use master::{ExportEnvelope, MasterConfig, EXPORT_VERSION};
pub use policy::{UserPolicy, DEFAULT_SKIP_MINUTES};
pub use types::{LoginDecision, OtpRef, Session, SessionId, SessionState, SystemUser, UserId};
