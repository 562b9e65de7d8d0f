//! Latchkey CLI - administrative console for the login gatekeeper
//!
//! Talks to the daemon over its local socket to manage policies,
//! provider credentials, and live session gating.

pub mod client;
pub mod commands;

pub use client::LatchkeyClient;
pub use commands::*;
