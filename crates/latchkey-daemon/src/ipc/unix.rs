//! Unix domain socket transport

use std::path::Path;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use super::connection::{IpcClientTransport, IpcTransport};
use crate::error::{DaemonError, Result};

pub struct UnixIpcTransport {
    listener: UnixListener,
}

#[async_trait]
impl IpcTransport for UnixIpcTransport {
    type Stream = UnixStream;

    async fn bind(path: &Path) -> Result<Self> {
        // Remove a stale socket left by a previous run
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| DaemonError::Ipc(format!("Failed to remove stale socket: {}", e)))?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| DaemonError::Ipc(format!("Failed to bind socket: {}", e)))?;

        // Only root talks to the gatekeeper
        let mut perms = std::fs::metadata(path)?.permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;

        debug!("Listening on {}", path.display());
        Ok(Self { listener })
    }

    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| DaemonError::Ipc(format!("Failed to accept connection: {}", e)))?;
        Ok(stream)
    }

    fn cleanup(&self, path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

pub struct UnixIpcClient;

#[async_trait]
impl IpcClientTransport for UnixIpcClient {
    type Stream = UnixStream;

    async fn connect(path: &Path) -> Result<Self::Stream> {
        UnixStream::connect(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                DaemonError::Ipc("Daemon is not running".to_string())
            }
            _ => DaemonError::Ipc(format!("Failed to connect: {}", e)),
        })
    }
}
