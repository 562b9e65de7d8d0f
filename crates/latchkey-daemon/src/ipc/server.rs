//! IPC server implementation

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use latchkey_core::MasterConfig;

use crate::error::{DaemonError, Result};
use crate::gatekeeper::{GateNotification, GatekeeperService};

use super::connection::{IpcTransport, PlatformTransport};
use super::types::{IpcRequest, IpcResponse};

/// IPC server
pub struct IpcServer {
    /// Socket path
    socket_path: PathBuf,

    /// Gatekeeper backing every request
    service: Arc<GatekeeperService>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf, service: Arc<GatekeeperService>) -> Self {
        Self {
            socket_path,
            service,
        }
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        let transport = PlatformTransport::bind(&self.socket_path).await?;

        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match transport.accept().await {
                Ok(stream) => {
                    let service = Arc::clone(&self.service);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single IPC connection
async fn handle_connection<S>(stream: S, service: Arc<GatekeeperService>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let response = IpcResponse::Error {
                    message: format!("Invalid request: {}", e),
                };
                send_response(&mut writer, &response).await?;
                line.clear();
                continue;
            }
        };

        // Payloads can carry passwords and codes; log the operation only
        debug!("Received IPC request: {}", request.name());

        if matches!(request, IpcRequest::Watch) {
            // Subscribe before the acknowledgement so an event raced
            // with the ack cannot be lost
            let events = service.subscribe();
            send_response(&mut writer, &IpcResponse::Ok).await?;
            return stream_notifications(reader, writer, events).await;
        }

        let response = handle_request(request, Arc::clone(&service)).await;

        send_response(&mut writer, &response).await?;
        line.clear();
    }

    Ok(())
}

/// Forward gate notifications until the client hangs up
async fn stream_notifications<R, W>(
    mut reader: BufReader<R>,
    mut writer: W,
    mut events: broadcast::Receiver<GateNotification>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    send_response(&mut writer, &IpcResponse::Notification { event }).await?;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Watch subscriber lagged; {} notification(s) dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            read = reader.read_line(&mut line) => match read {
                // EOF or a read error both mean the client is gone
                Ok(0) | Err(_) => break,
                Ok(_) => line.clear(),
            },
        }
    }

    Ok(())
}

/// Handle a single request
async fn handle_request(request: IpcRequest, service: Arc<GatekeeperService>) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },

        IpcRequest::GetStatus => IpcResponse::Status {
            status: service.status().await,
        },

        IpcRequest::GetSystemUsers => match service.provider().list_users().await {
            Ok(users) => IpcResponse::SystemUsers { users },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to list system users: {}", e),
            },
        },

        IpcRequest::SaveUserPolicy { policy } => match service.policies().put(policy).await {
            Ok(policy) => IpcResponse::Policy { policy },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to save policy: {}", e),
            },
        },

        IpcRequest::GetUserPolicy { user_id } => match service.policies().get(&user_id).await {
            Ok(Some(policy)) => IpcResponse::Policy { policy },
            Ok(None) => IpcResponse::Error {
                message: format!("No policy for user {}", user_id),
            },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to load policy: {}", e),
            },
        },

        IpcRequest::ListUserPolicies => match service.policies().all().await {
            Ok(policies) => IpcResponse::Policies { policies },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to list policies: {}", e),
            },
        },

        IpcRequest::RemoveUserPolicy { user_id } => {
            match service.policies().remove(&user_id).await {
                Ok(true) => IpcResponse::Ok,
                Ok(false) => IpcResponse::Error {
                    message: format!("No policy for user {}", user_id),
                },
                Err(e) => IpcResponse::Error {
                    message: format!("Failed to remove policy: {}", e),
                },
            }
        }

        IpcRequest::SaveMasterConfig {
            api_endpoint,
            api_key,
            master_password,
        } => match save_master_config(&service, api_endpoint, api_key, &master_password).await {
            Ok(()) => {
                try_arm(&service).await;
                IpcResponse::Ok
            }
            Err(e) => IpcResponse::Error {
                message: format!("Failed to save master configuration: {}", e),
            },
        },

        IpcRequest::UnlockMasterConfig { master_password } => {
            match unlock_stores(&service, &master_password).await {
                Ok(()) => {
                    try_arm(&service).await;
                    IpcResponse::Ok
                }
                Err(e) => IpcResponse::Error {
                    message: format!("Unlock failed: {}", e),
                },
            }
        }

        IpcRequest::TestProvider => match service.lifecycle().check_provider().await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::Error {
                message: format!("Provider check failed: {}", e),
            },
        },

        IpcRequest::ExportConfig => match service.master().export().await {
            Ok(envelope) => IpcResponse::ConfigExport { envelope },
            Err(e) => IpcResponse::Error {
                message: format!("Export failed: {}", e),
            },
        },

        IpcRequest::ImportConfig { envelope } => match service.master().import(&envelope).await {
            Ok(()) => {
                // The imported blob is sealed under its own master password.
                // Both stores stand locked and gating stands down until the
                // next unlock.
                service.policies().lock().await;
                if service.is_running().await {
                    if let Err(e) = service.stop().await {
                        warn!("Gatekeeper did not stop cleanly after import: {}", e);
                    }
                }
                IpcResponse::Ok
            }
            Err(e) => IpcResponse::Error {
                message: format!("Import failed: {}", e),
            },
        },

        IpcRequest::RequestOtp { user_id } => match service.request_otp(&user_id).await {
            Ok(otp_ref) => match service.lifecycle().pending_challenge(&user_id).await {
                Some(challenge) if challenge.otp_ref == otp_ref => IpcResponse::OtpRequested {
                    otp_ref,
                    expires_at: challenge.expires_at,
                },
                _ => IpcResponse::Error {
                    message: "Challenge was superseded".to_string(),
                },
            },
            Err(e) => IpcResponse::Error {
                message: format!("Failed to request OTP: {}", e),
            },
        },

        IpcRequest::VerifyOtp { user_id, code } => {
            match service.verify_otp(&user_id, &code).await {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            }
        }

        IpcRequest::ListSessions => IpcResponse::Sessions {
            sessions: service.monitor().sessions().await,
        },

        // Diverted in handle_connection; only reachable through a bug
        IpcRequest::Watch => IpcResponse::Error {
            message: "Watch must be the only request on its connection".to_string(),
        },
    }
}

/// Persist new credentials and key both stores to the master password
async fn save_master_config(
    service: &Arc<GatekeeperService>,
    api_endpoint: String,
    api_key: String,
    master_password: &str,
) -> Result<()> {
    let config = MasterConfig::new(api_endpoint, api_key, master_password);
    service.master().save(config, master_password).await?;

    // The policy table is sealed under the same password
    if service.policies().is_unlocked().await {
        service.policies().reseal(master_password).await?;
    } else {
        service.policies().unlock(master_password).await?;
    }
    Ok(())
}

/// Unlock both stores with the master password
async fn unlock_stores(service: &Arc<GatekeeperService>, master_password: &str) -> Result<()> {
    service.master().unlock(master_password).await?;
    service.policies().unlock(master_password).await?;
    Ok(())
}

/// Arm the gatekeeper unless it is already running
async fn try_arm(service: &Arc<GatekeeperService>) {
    match service.start().await {
        Ok(()) => info!("Gatekeeper armed"),
        Err(DaemonError::AlreadyRunning) => {}
        Err(e) => warn!("Gatekeeper not armed: {}", e),
    }
}

/// Send a response over the socket
async fn send_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
