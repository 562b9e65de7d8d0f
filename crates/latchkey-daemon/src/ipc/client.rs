//! IPC client implementation

use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use crate::error::{DaemonError, Result};
use crate::gatekeeper::GateNotification;

use super::connection::{IpcClientTransport, PlatformClient};
use super::types::{IpcRequest, IpcResponse};

type ClientStream = <PlatformClient as IpcClientTransport>::Stream;

/// IPC client for console use
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a request and get a response
    pub async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let stream = PlatformClient::connect(&self.socket_path).await?;

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        // Send request
        let json = serde_json::to_string(request)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        // Read response
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let response: IpcResponse = serde_json::from_str(&line)?;
        Ok(response)
    }

    /// Check if daemon is running
    pub async fn ping(&self) -> bool {
        matches!(
            self.request(&IpcRequest::Ping).await,
            Ok(IpcResponse::Pong { .. })
        )
    }

    /// Open a long-lived notification stream
    pub async fn watch(&self) -> Result<WatchStream> {
        let stream = PlatformClient::connect(&self.socket_path).await?;

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let json = serde_json::to_string(&IpcRequest::Watch)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut line = String::new();
        reader.read_line(&mut line).await?;
        match serde_json::from_str::<IpcResponse>(&line)? {
            IpcResponse::Ok => Ok(WatchStream {
                reader,
                _writer: writer,
            }),
            IpcResponse::Error { message } => Err(DaemonError::Ipc(message)),
            _ => Err(DaemonError::Ipc(
                "Unexpected watch acknowledgement".to_string(),
            )),
        }
    }
}

/// Open Watch connection. Dropping it disconnects and ends the stream
/// on the daemon side.
pub struct WatchStream {
    reader: BufReader<ReadHalf<ClientStream>>,
    // Held so the daemon sees the connection as open
    _writer: WriteHalf<ClientStream>,
}

impl WatchStream {
    /// Wait for the next gate notification
    pub async fn next_event(&mut self) -> Result<GateNotification> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(DaemonError::Ipc("Watch stream closed".to_string()));
            }

            match serde_json::from_str::<IpcResponse>(&line)? {
                IpcResponse::Notification { event } => return Ok(event),
                IpcResponse::Error { message } => return Err(DaemonError::Ipc(message)),
                // Anything else on a watch connection is skipped
                _ => continue,
            }
        }
    }
}
