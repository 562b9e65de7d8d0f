//! Transport abstraction for IPC connections

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Server-side transport that accepts console connections
#[async_trait]
pub trait IpcTransport: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Bind the listening endpoint
    async fn bind(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Accept the next incoming connection
    async fn accept(&self) -> Result<Self::Stream>;

    /// Remove the endpoint after shutdown
    fn cleanup(&self, path: &Path);
}

/// Client-side transport that connects to the daemon
#[async_trait]
pub trait IpcClientTransport {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(path: &Path) -> Result<Self::Stream>;
}

#[cfg(unix)]
pub type PlatformTransport = super::unix::UnixIpcTransport;

#[cfg(unix)]
pub type PlatformClient = super::unix::UnixIpcClient;
