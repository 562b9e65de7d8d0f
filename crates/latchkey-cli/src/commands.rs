//! CLI command implementations

use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use latchkey_core::{Session, UserId, UserPolicy};
use latchkey_daemon::GateNotification;

use crate::client::{ClientError, LatchkeyClient};

/// Latchkey console - OTP gating for local login sessions
#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "Administrative console for the Latchkey login gatekeeper")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the daemon socket
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show daemon and gatekeeper status
    Status,

    /// List local accounts that can be gated
    Users,

    /// Manage per-user OTP policies
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Manage provider credentials and the master password
    #[command(subcommand)]
    Master(MasterCommands),

    /// Check connectivity to the OTP provider
    TestProvider,

    /// Issue an OTP challenge for a user
    RequestOtp {
        /// User id the challenge is for
        #[arg(long)]
        user: String,
    },

    /// Verify a submitted OTP code
    VerifyOtp {
        /// User id the code belongs to
        #[arg(long)]
        user: String,

        /// The code received on the configured mobile number
        #[arg(long)]
        code: String,
    },

    /// List sessions the daemon is tracking
    Sessions,

    /// Stream gate notifications until interrupted
    Watch,
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Create or update a policy
    Set {
        /// User id the policy applies to
        #[arg(long)]
        user: String,

        /// Mobile number in international format; repeat for several
        #[arg(long = "mobile")]
        mobile_numbers: Vec<String>,

        /// Minutes a verification suppresses further challenges
        #[arg(long)]
        skip_minutes: Option<u32>,

        /// Enable a previously disabled policy
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Keep the policy but stop gating the user
        #[arg(long)]
        disable: bool,
    },

    /// Show a policy
    Get {
        #[arg(long)]
        user: String,
    },

    /// List all policies
    List,

    /// Remove a policy
    Remove {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
pub enum MasterCommands {
    /// Save provider credentials sealed under the master password
    Set {
        /// OTP provider base URL
        #[arg(long)]
        endpoint: String,

        /// Provider API key
        #[arg(long)]
        api_key: String,

        /// Master password; also keys the encrypted stores
        #[arg(long)]
        master_password: String,
    },

    /// Unlock the stores after a daemon restart
    Unlock {
        #[arg(long)]
        master_password: String,
    },

    /// Export the sealed configuration to a file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a previously exported configuration
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = match cli.socket {
        Some(path) => LatchkeyClient::with_socket_path(path),
        None => LatchkeyClient::new(),
    };

    match cli.command {
        Commands::Status => match client.ping().await {
            Ok(version) => {
                println!("Latchkey daemon v{} is running", version);
                let status = client.status().await?;
                println!("  Gatekeeper armed:   {}", yes_no(status.armed));
                println!(
                    "  Master config:      {}",
                    if !status.master_config_present {
                        "not initialized"
                    } else if status.master_config_unlocked {
                        "unlocked"
                    } else {
                        "locked"
                    }
                );
                println!(
                    "  Policy store:       {}",
                    if status.policy_store_unlocked {
                        "unlocked"
                    } else {
                        "locked"
                    }
                );
                println!("  Sessions tracked:   {}", status.session_count);
                println!("  Held logins:        {}", status.pending_login_count);
                println!("  Open challenges:    {}", status.pending_challenge_count);
            }
            Err(ClientError::DaemonNotRunning) => {
                println!("Latchkey daemon is not running");
                println!("Start it with: latchkeyd");
                return Err(ClientError::DaemonNotRunning);
            }
            Err(e) => return Err(e),
        },

        Commands::Users => {
            let users = client.system_users().await?;
            if users.is_empty() {
                println!("No eligible accounts found");
            }
            for user in users {
                println!(
                    "{:>8}  {}{}",
                    user.user_id,
                    user.username,
                    if user.disabled { "  (disabled)" } else { "" }
                );
            }
        }

        Commands::Policy(cmd) => handle_policy_command(&client, cmd).await?,

        Commands::Master(cmd) => handle_master_command(&client, cmd).await?,

        Commands::TestProvider => {
            client.test_provider().await?;
            println!("OTP provider is reachable");
        }

        Commands::RequestOtp { user } => {
            let (otp_ref, expires_at) = client.request_otp(&UserId::new(user)).await?;
            println!("OTP dispatched (ref {})", otp_ref);
            println!("Expires at {}", local_time(&expires_at));
        }

        Commands::VerifyOtp { user, code } => {
            client.verify_otp(&UserId::new(user), &code).await?;
            println!("Code accepted; login released");
        }

        Commands::Sessions => {
            let sessions = client.sessions().await?;
            if sessions.is_empty() {
                println!("No sessions tracked");
            }
            for session in sessions {
                print_session(&session);
            }
        }

        Commands::Watch => {
            let mut stream = client.watch().await?;
            println!("Watching gate notifications (Ctrl-C to stop)");
            loop {
                tokio::select! {
                    event = stream.next_event() => match event {
                        Ok(event) => print_notification(&event),
                        Err(e) => {
                            println!("Stream ended: {}", e);
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}

async fn handle_policy_command(
    client: &LatchkeyClient,
    cmd: PolicyCommands,
) -> Result<(), ClientError> {
    match cmd {
        PolicyCommands::Set {
            user,
            mobile_numbers,
            skip_minutes,
            enable,
            disable,
        } => {
            let user_id = UserId::new(user);
            let policy = match client.get_policy(&user_id).await {
                Ok(mut existing) => {
                    if !mobile_numbers.is_empty() {
                        existing.mobile_numbers = mobile_numbers;
                    }
                    if let Some(minutes) = skip_minutes {
                        existing.skip_duration_minutes = minutes;
                    }
                    if enable {
                        existing.enabled = true;
                    } else if disable {
                        existing.enabled = false;
                    }
                    existing
                }
                Err(ClientError::RequestFailed(msg)) if msg.starts_with("No policy") => {
                    let mut policy =
                        UserPolicy::new(user_id, mobile_numbers, skip_minutes.unwrap_or(60));
                    policy.enabled = !disable;
                    policy
                }
                Err(e) => return Err(e),
            };

            let stored = client.save_policy(policy).await?;
            println!("Policy saved for user {}", stored.user_id);
            print_policy(&stored);
        }

        PolicyCommands::Get { user } => {
            let policy = client.get_policy(&UserId::new(user)).await?;
            print_policy(&policy);
        }

        PolicyCommands::List => {
            let policies = client.list_policies().await?;
            if policies.is_empty() {
                println!("No policies configured");
            }
            for policy in policies {
                println!(
                    "{:>8}  {}  skip {}m  {}",
                    policy.user_id,
                    if policy.enabled { "enabled " } else { "disabled" },
                    policy.skip_duration_minutes,
                    policy.mobile_numbers.join(", ")
                );
            }
        }

        PolicyCommands::Remove { user } => {
            client.remove_policy(&UserId::new(user)).await?;
            println!("Policy removed");
        }
    }

    Ok(())
}

async fn handle_master_command(
    client: &LatchkeyClient,
    cmd: MasterCommands,
) -> Result<(), ClientError> {
    match cmd {
        MasterCommands::Set {
            endpoint,
            api_key,
            master_password,
        } => {
            client
                .save_master_config(&endpoint, &api_key, &master_password)
                .await?;
            println!("Master configuration saved");
        }

        MasterCommands::Unlock { master_password } => {
            client.unlock(&master_password).await?;
            println!("Stores unlocked");
        }

        MasterCommands::Export { output } => {
            let envelope = client.export_config().await?;
            std::fs::write(&output, format!("{}\n", envelope))?;
            println!("Configuration exported to {}", output.display());
        }

        MasterCommands::Import { input } => {
            let envelope = std::fs::read_to_string(&input)?;
            client.import_config(envelope.trim()).await?;
            println!("Configuration imported; unlock to resume gating");
        }
    }

    Ok(())
}

fn print_policy(policy: &UserPolicy) {
    println!("  User:          {}", policy.user_id);
    println!("  Enabled:       {}", yes_no(policy.enabled));
    println!("  Mobile:        {}", policy.mobile_numbers.join(", "));
    println!("  Skip window:   {} minutes", policy.skip_duration_minutes);
    println!(
        "  Last verified: {}",
        policy
            .last_otp_verified_at
            .as_ref()
            .map(local_time)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Updated:       {}", local_time(&policy.updated_at));
}

fn print_session(session: &Session) {
    println!(
        "{}  user {} ({})  {}  auth {}",
        session.session_id,
        session.user_id,
        session.username,
        session.state,
        yes_no(session.authenticated)
    );
}

fn print_notification(event: &GateNotification) {
    let stamp = Local::now().format("%H:%M:%S");
    match event {
        GateNotification::ChallengeRequired { user_id, username } => {
            println!("[{}] challenge required for user {} ({})", stamp, user_id, username);
        }
        GateNotification::LoginAllowed { user_id } => {
            println!("[{}] login allowed for user {}", stamp, user_id);
        }
        GateNotification::LoginDenied { user_id } => {
            println!("[{}] login denied for user {}", stamp, user_id);
        }
        GateNotification::SessionEnded {
            session_id,
            user_id,
        } => {
            println!("[{}] session {} ended (user {})", stamp, session_id, user_id);
        }
    }
}

fn local_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
