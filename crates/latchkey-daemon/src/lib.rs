//! Latchkey Daemon - host-resident login gatekeeper
//!
//! This crate provides:
//! - Interactive session monitoring through a pluggable session provider
//! - Per-session OTP gating with pending-login bookkeeping
//! - Encrypted per-user policy and master configuration stores
//! - OTP challenge lifecycle against an external delivery provider
//! - IPC server for console communication

pub mod config;
pub mod config_store;
pub mod error;
pub mod gatekeeper;
pub mod ipc;
pub mod login_gate;
pub mod otp_lifecycle;
pub mod otp_provider;
pub mod policy_store;
pub mod session_monitor;
pub mod session_provider;

pub use config::DaemonConfig;
pub use config_store::MasterConfigStore;
pub use error::{DaemonError, Result};
pub use gatekeeper::{GateNotification, GatekeeperService, GatekeeperStatus};
pub use ipc::{IpcClient, IpcRequest, IpcResponse, IpcServer, WatchStream};
pub use login_gate::{LoginGate, PendingLogin};
pub use otp_lifecycle::{OtpLifecycle, PendingChallenge};
#[cfg(any(test, feature = "test-support"))]
pub use otp_provider::FakeOtpTransport;
pub use otp_provider::{OtpProviderClient, OtpTransport};
pub use policy_store::PolicyStore;
pub use session_monitor::{SessionEvent, SessionMonitor};
#[cfg(any(test, feature = "test-support"))]
pub use session_provider::FakeSessionProvider;
pub use session_provider::{LoginctlProvider, SessionProvider, SessionRecord};
