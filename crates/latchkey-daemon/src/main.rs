//! Latchkey daemon - main entry point
//!
//! Arms the session gatekeeper and serves the console IPC socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

use latchkey_daemon::otp_provider::OtpProviderClient;
use latchkey_daemon::session_provider::LoginctlProvider;
use latchkey_daemon::{DaemonConfig, GatekeeperService, IpcServer, MasterConfigStore, PolicyStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latchkey_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Latchkey daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = std::env::var("LATCHKEY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("/etc"))
                .join("latchkey")
                .join("daemon.json")
        });

    let config = if config_path.exists() {
        DaemonConfig::load(&config_path)?
    } else {
        let config = DaemonConfig::default();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(&config_path)?;
        info!("Created default config at {:?}", config_path);
        config
    };

    // Ensure directories exist
    config.ensure_directories()?;

    // Initialize components
    let provider = Arc::new(LoginctlProvider::new(Duration::from_secs(
        config.session_command_timeout_secs,
    )));
    let policies = Arc::new(PolicyStore::new(config.policy_store_path()));
    let master = Arc::new(MasterConfigStore::new(config.master_config_path()));
    let transport = Arc::new(OtpProviderClient::new(Arc::clone(&master), &config));

    let service = Arc::new(GatekeeperService::new(
        config.clone(),
        provider,
        Arc::clone(&policies),
        Arc::clone(&master),
        transport,
    ));

    // With a passphrase file the gatekeeper arms unattended; otherwise it
    // waits for an unlock over IPC
    if let Some(path) = &config.passphrase_file {
        match read_passphrase(path) {
            Ok(passphrase) => unlock_and_arm(&service, &passphrase).await,
            Err(e) => warn!("Could not read passphrase file {:?}: {}", path, e),
        }
    }

    // Start IPC server
    let ipc_server = IpcServer::new(config.ipc_socket_path.clone(), Arc::clone(&service));
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    info!("Daemon started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = ipc_handle => {
            error!("IPC server exited unexpectedly");
        }
    }

    if service.is_running().await {
        if let Err(e) = service.stop().await {
            warn!("Gatekeeper did not stop cleanly: {}", e);
        }
    }
    let _ = std::fs::remove_file(&config.ipc_socket_path);

    info!("Daemon shutting down");

    Ok(())
}

/// Unlock both stores and arm the gatekeeper. Failures are logged, not
/// fatal; the daemon still serves IPC so the console can finish setup.
async fn unlock_and_arm(service: &Arc<GatekeeperService>, passphrase: &str) {
    if let Err(e) = service.master().unlock(passphrase).await {
        warn!("Master configuration not unlocked: {}", e);
        return;
    }
    if let Err(e) = service.policies().unlock(passphrase).await {
        warn!("Policy store not unlocked: {}", e);
        return;
    }
    match service.start().await {
        Ok(()) => info!("Gatekeeper armed"),
        Err(e) => warn!("Gatekeeper not armed: {}", e),
    }
}

/// Read the store passphrase from an owner-only file
fn read_passphrase(path: &Path) -> std::io::Result<Zeroizing<String>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "passphrase file must not be group or world readable",
            ));
        }
    }

    let raw = Zeroizing::new(std::fs::read_to_string(path)?);
    Ok(Zeroizing::new(raw.trim().to_string()))
}
