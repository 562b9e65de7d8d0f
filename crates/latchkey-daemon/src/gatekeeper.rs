//! Gatekeeper orchestration
//!
//! Wires the session monitor, login gate, and OTP lifecycle together and
//! runs the periodic tasks: the session scan, the challenge sweep, and the
//! event pump that gates freshly observed sessions. Consoles subscribe to a
//! notification stream for challenge and decision events.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use latchkey_core::{LoginDecision, OtpRef, SessionId, UserId};

use crate::config::DaemonConfig;
use crate::config_store::MasterConfigStore;
use crate::error::{DaemonError, Result};
use crate::login_gate::LoginGate;
use crate::otp_lifecycle::OtpLifecycle;
use crate::otp_provider::OtpTransport;
use crate::policy_store::PolicyStore;
use crate::session_monitor::{SessionEvent, SessionMonitor};
use crate::session_provider::SessionProvider;

/// Event published to watching consoles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GateNotification {
    /// A session is held and its user must answer a challenge
    ChallengeRequired { user_id: UserId, username: String },
    /// A verification succeeded and the held session was released
    LoginAllowed { user_id: UserId },
    /// A held session was denied and terminated
    LoginDenied { user_id: UserId },
    /// An observed session went away
    SessionEnded {
        session_id: SessionId,
        user_id: UserId,
    },
}

/// Daemon state summary for the console
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperStatus {
    /// Whether the periodic tasks are running
    pub armed: bool,
    pub master_config_present: bool,
    pub master_config_unlocked: bool,
    pub policy_store_unlocked: bool,
    pub session_count: usize,
    pub pending_login_count: usize,
    pub pending_challenge_count: usize,
}

struct RunningTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct GatekeeperService {
    config: DaemonConfig,
    provider: Arc<dyn SessionProvider>,
    monitor: Arc<SessionMonitor>,
    gate: Arc<LoginGate>,
    lifecycle: Arc<OtpLifecycle>,
    policies: Arc<PolicyStore>,
    master: Arc<MasterConfigStore>,
    notify_tx: broadcast::Sender<GateNotification>,
    running: RwLock<Option<RunningTasks>>,
}

impl GatekeeperService {
    pub fn new(
        config: DaemonConfig,
        provider: Arc<dyn SessionProvider>,
        policies: Arc<PolicyStore>,
        master: Arc<MasterConfigStore>,
        transport: Arc<dyn OtpTransport>,
    ) -> Self {
        let monitor = Arc::new(SessionMonitor::new(provider.clone()));
        let gate = Arc::new(LoginGate::new(
            policies.clone(),
            monitor.clone(),
            provider.clone(),
        ));
        let lifecycle = Arc::new(OtpLifecycle::new(policies.clone(), transport, &config));
        let (notify_tx, _) = broadcast::channel(64);

        Self {
            config,
            provider,
            monitor,
            gate,
            lifecycle,
            policies,
            master,
            notify_tx,
            running: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    pub fn gate(&self) -> &Arc<LoginGate> {
        &self.gate
    }

    pub fn lifecycle(&self) -> &Arc<OtpLifecycle> {
        &self.lifecycle
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn master(&self) -> &Arc<MasterConfigStore> {
        &self.master
    }

    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    /// Subscribe to gate notifications
    pub fn subscribe(&self) -> broadcast::Receiver<GateNotification> {
        self.notify_tx.subscribe()
    }

    /// Gate a login attempt and announce a challenge when one is required
    pub async fn handle_login_attempt(
        &self,
        user_id: &UserId,
        username: &str,
    ) -> Result<LoginDecision> {
        let decision = self.gate.handle_login_attempt(user_id, username).await?;
        if decision.requires_otp {
            let _ = self.notify_tx.send(GateNotification::ChallengeRequired {
                user_id: user_id.clone(),
                username: username.to_string(),
            });
        }
        Ok(decision)
    }

    /// Send a fresh code for the user's outstanding login
    pub async fn request_otp(&self, user_id: &UserId) -> Result<OtpRef> {
        self.lifecycle.request_challenge(user_id).await
    }

    /// Check a submitted code. Success releases the held session; running
    /// out of attempts terminates it.
    pub async fn verify_otp(&self, user_id: &UserId, code: &str) -> Result<()> {
        match self.lifecycle.verify_challenge(user_id, code).await {
            Ok(()) => {
                self.gate.allow(user_id).await;
                let _ = self.notify_tx.send(GateNotification::LoginAllowed {
                    user_id: user_id.clone(),
                });
                Ok(())
            }
            Err(DaemonError::AttemptsExhausted) => {
                self.gate.deny(user_id).await;
                let _ = self.notify_tx.send(GateNotification::LoginDenied {
                    user_id: user_id.clone(),
                });
                Err(DaemonError::AttemptsExhausted)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self) -> GatekeeperStatus {
        GatekeeperStatus {
            armed: self.is_running().await,
            master_config_present: self.master.exists(),
            master_config_unlocked: self.master.is_unlocked().await,
            policy_store_unlocked: self.policies.is_unlocked().await,
            session_count: self.monitor.sessions().await.len(),
            pending_login_count: self.gate.pending_count().await,
            pending_challenge_count: self.lifecycle.pending_count().await,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.read().await.is_some()
    }

    /// Arm the gatekeeper: spawn the scan loop, the sweep loop, and the
    /// event pump.
    ///
    /// Refuses to arm before setup has produced a master configuration, and
    /// while either store is still locked. An unarmed host keeps its normal
    /// login behavior rather than denying everyone.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut running = self.running.write().await;
        if running.is_some() {
            return Err(DaemonError::AlreadyRunning);
        }
        if !self.master.exists() {
            return Err(DaemonError::Config(
                "master configuration not initialized; complete setup first".to_string(),
            ));
        }
        if !self.master.is_unlocked().await || !self.policies.is_unlocked().await {
            return Err(DaemonError::Config(
                "stores are locked; unlock before arming".to_string(),
            ));
        }

        info!(
            "Arming gatekeeper (scan every {}s, sweep every {}s)",
            self.config.scan_interval_secs, self.config.sweep_interval_secs
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // The pump's receiver must exist before the first scan tick, or the
        // events of that tick would be lost.
        let events = self.monitor.subscribe();
        let handles = vec![
            tokio::spawn(Self::scan_loop(self.clone(), shutdown_rx.clone())),
            tokio::spawn(Self::sweep_loop(self.clone(), shutdown_rx.clone())),
            tokio::spawn(Self::event_pump(self.clone(), events, shutdown_rx)),
        ];
        *running = Some(RunningTasks {
            shutdown_tx,
            handles,
        });
        Ok(())
    }

    /// Disarm the gatekeeper; in-flight ticks finish before this returns
    pub async fn stop(&self) -> Result<()> {
        let tasks = match self.running.write().await.take() {
            Some(tasks) => tasks,
            None => return Err(DaemonError::NotRunning),
        };

        info!("Disarming gatekeeper");
        let _ = tasks.shutdown_tx.send(true);
        for handle in tasks.handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn scan_loop(service: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(service.config.scan_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = service.monitor.scan().await {
                        warn!("Session scan failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Scan loop stopping");
                    break;
                }
            }
        }
    }

    async fn sweep_loop(service: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(service.config.sweep_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    service.lifecycle.sweep_expired().await;
                }
                _ = shutdown.changed() => {
                    debug!("Sweep loop stopping");
                    break;
                }
            }
        }
    }

    /// Feed monitor events into the gate
    async fn event_pump(
        service: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(SessionEvent::Started { session }) => {
                        if let Err(e) = service
                            .handle_login_attempt(&session.user_id, &session.username)
                            .await
                        {
                            warn!("Failed to gate session {}: {}", session.session_id, e);
                        }
                    }
                    Ok(SessionEvent::Ended { session }) => {
                        service.gate.handle_session_ended(&session.session_id).await;
                        let _ = service.notify_tx.send(GateNotification::SessionEnded {
                            session_id: session.session_id,
                            user_id: session.user_id,
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event pump lagged; {} event(s) dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    debug!("Event pump stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp_provider::FakeOtpTransport;
    use crate::session_provider::FakeSessionProvider;
    use latchkey_core::{MasterConfig, UserPolicy};
    use tempfile::TempDir;

    struct Fixture {
        service: Arc<GatekeeperService>,
        provider: Arc<FakeSessionProvider>,
        _temp_dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(FakeSessionProvider::new());
        let policies = Arc::new(PolicyStore::new(temp_dir.path().join("policies.enc")));
        policies.unlock("store-pw").await.unwrap();
        let master = Arc::new(MasterConfigStore::new(temp_dir.path().join("master.enc")));
        master
            .save(
                MasterConfig::new(
                    "https://otp.example.com".to_string(),
                    "api-key".to_string(),
                    "master-pw",
                ),
                "master-pw",
            )
            .await
            .unwrap();

        let service = Arc::new(GatekeeperService::new(
            DaemonConfig::default(),
            provider.clone(),
            policies,
            master,
            Arc::new(FakeOtpTransport::new("123456")),
        ));
        Fixture {
            service,
            provider,
            _temp_dir: temp_dir,
        }
    }

    async fn hold_session(f: &Fixture) -> UserId {
        let user = UserId::new("1000");
        f.provider.add_session("s1", "1000", "alice");
        f.service.monitor().scan().await.unwrap();
        f.service
            .policies()
            .put(UserPolicy::new(
                user.clone(),
                vec!["+15551234567".to_string()],
                60,
            ))
            .await
            .unwrap();
        let decision = f.service.handle_login_attempt(&user, "alice").await.unwrap();
        assert!(decision.requires_otp);
        user
    }

    #[tokio::test]
    async fn refuses_to_arm_without_master_config() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(FakeSessionProvider::new());
        let policies = Arc::new(PolicyStore::new(temp_dir.path().join("policies.enc")));
        let master = Arc::new(MasterConfigStore::new(temp_dir.path().join("master.enc")));
        let service = Arc::new(GatekeeperService::new(
            DaemonConfig::default(),
            provider,
            policies,
            master,
            Arc::new(FakeOtpTransport::new("123456")),
        ));

        assert!(matches!(
            service.start().await,
            Err(DaemonError::Config(_))
        ));
        assert!(!service.is_running().await);
    }

    #[tokio::test]
    async fn refuses_to_arm_while_stores_are_locked() {
        let f = fixture().await;
        f.service.master().lock().await;

        assert!(matches!(
            f.service.start().await,
            Err(DaemonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn arm_and_disarm() {
        let f = fixture().await;

        f.service.start().await.unwrap();
        assert!(f.service.is_running().await);
        assert!(matches!(
            f.service.start().await,
            Err(DaemonError::AlreadyRunning)
        ));

        f.service.stop().await.unwrap();
        assert!(!f.service.is_running().await);
        assert!(matches!(
            f.service.stop().await,
            Err(DaemonError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn verified_code_releases_the_held_session() {
        let f = fixture().await;
        let mut notifications = f.service.subscribe();
        let user = hold_session(&f).await;

        f.service.request_otp(&user).await.unwrap();
        f.service.verify_otp(&user, "123456").await.unwrap();

        assert_eq!(f.provider.unlocked(), vec![SessionId::new("s1")]);
        let session = f.service.monitor().session(&SessionId::new("s1")).await.unwrap();
        assert!(session.authenticated);

        assert!(matches!(
            notifications.recv().await,
            Ok(GateNotification::ChallengeRequired { .. })
        ));
        assert!(matches!(
            notifications.recv().await,
            Ok(GateNotification::LoginAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn exhausted_attempts_deny_and_terminate() {
        let f = fixture().await;
        let user = hold_session(&f).await;
        f.service.request_otp(&user).await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                f.service.verify_otp(&user, "000000").await,
                Err(DaemonError::VerificationFailed(_))
            ));
        }
        assert!(matches!(
            f.service.verify_otp(&user, "000000").await,
            Err(DaemonError::AttemptsExhausted)
        ));

        assert_eq!(f.provider.logged_off(), vec![SessionId::new("s1")]);
        assert_eq!(f.service.gate().pending_count().await, 0);
    }

    #[tokio::test]
    async fn event_pump_gates_started_sessions() {
        let f = fixture().await;
        f.service
            .policies()
            .put(UserPolicy::new(
                UserId::new("1000"),
                vec!["+15551234567".to_string()],
                60,
            ))
            .await
            .unwrap();

        f.service.start().await.unwrap();
        f.provider.add_session("s1", "1000", "alice");
        f.service.monitor().scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.provider.locked(), vec![SessionId::new("s1")]);
        assert!(f
            .service
            .gate()
            .pending_login(&UserId::new("1000"))
            .await
            .is_some());

        f.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn status_reflects_component_state() {
        let f = fixture().await;
        let status = f.service.status().await;
        assert!(!status.armed);
        assert!(status.master_config_present);
        assert!(status.master_config_unlocked);
        assert!(status.policy_store_unlocked);
        assert_eq!(status.session_count, 0);

        let user = hold_session(&f).await;
        f.service.request_otp(&user).await.unwrap();
        let status = f.service.status().await;
        assert_eq!(status.session_count, 1);
        assert_eq!(status.pending_login_count, 1);
        assert_eq!(status.pending_challenge_count, 1);
    }
}
