//! IPC layer for daemon-console communication
//!
//! Requests and responses travel as JSON lines over a local socket.
//! A Watch request turns its connection into a one-way notification
//! stream.

mod client;
mod connection;
mod server;
mod types;

#[cfg(unix)]
mod unix;

pub use client::{IpcClient, WatchStream};
pub use server::IpcServer;
pub use types::{IpcRequest, IpcResponse};
