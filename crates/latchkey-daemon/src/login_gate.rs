//! Login gating
//!
//! Decides what happens when a session shows up: allowed straight through on
//! a valid skip window, held behind an OTP challenge, or denied outright. A
//! held session is tracked as a [`PendingLogin`] until verification releases
//! it or a denial removes it. Lock, unlock, and logoff are best effort; their
//! failure never changes the decision.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use latchkey_core::{LoginDecision, SessionId, UserId};

use crate::error::Result;
use crate::policy_store::PolicyStore;
use crate::session_monitor::SessionMonitor;
use crate::session_provider::SessionProvider;

/// A session held locked while its user answers an OTP challenge
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub username: String,
    pub locked_at: DateTime<Utc>,
}

pub struct LoginGate {
    policies: Arc<PolicyStore>,
    monitor: Arc<SessionMonitor>,
    provider: Arc<dyn SessionProvider>,

    /// One held login per user; a newer session for the same user replaces
    /// the older entry
    pending: RwLock<HashMap<UserId, PendingLogin>>,
}

impl LoginGate {
    pub fn new(
        policies: Arc<PolicyStore>,
        monitor: Arc<SessionMonitor>,
        provider: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            policies,
            monitor,
            provider,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether a user's fresh session may proceed.
    ///
    /// No policy or a disabled one denies the login. An unexpired skip
    /// window authenticates the session on the spot. Otherwise the session
    /// is registered as pending and locked while the challenge runs.
    pub async fn handle_login_attempt(
        &self,
        user_id: &UserId,
        username: &str,
    ) -> Result<LoginDecision> {
        let policy = match self.policies.get(user_id).await? {
            None => {
                info!("Login denied for {}: no policy", username);
                return Ok(LoginDecision::deny());
            }
            Some(policy) if !policy.enabled => {
                info!("Login denied for {}: policy disabled", username);
                return Ok(LoginDecision::deny());
            }
            Some(policy) => policy,
        };

        let sessions = self.monitor.sessions_for_user(user_id).await;
        let session = sessions
            .iter()
            .find(|s| !s.authenticated)
            .or_else(|| sessions.first());

        if !policy.otp_required(Utc::now()) {
            if let Some(session) = session {
                self.monitor.mark_authenticated(&session.session_id).await;
            }
            info!("Skip window valid for {}; login allowed", username);
            return Ok(LoginDecision::allow());
        }

        match session {
            Some(session) => {
                // The registry entry goes in before the lock attempt so a
                // failed lock still leaves the login held.
                let held = PendingLogin {
                    user_id: user_id.clone(),
                    session_id: session.session_id.clone(),
                    username: username.to_string(),
                    locked_at: Utc::now(),
                };
                self.pending.write().await.insert(user_id.clone(), held);

                if let Err(e) = self.provider.lock_session(&session.session_id).await {
                    warn!("Failed to lock session {}: {}", session.session_id, e);
                }
                info!(
                    "Holding session {} for {} pending OTP",
                    session.session_id, username
                );
            }
            None => {
                debug!("OTP required for {} but no session is observed", username);
            }
        }
        Ok(LoginDecision::challenge())
    }

    /// Release a held login after a successful verification
    pub async fn allow(&self, user_id: &UserId) {
        let held = self.pending.write().await.remove(user_id);
        match held {
            Some(held) => {
                if let Err(e) = self.provider.unlock_session(&held.session_id).await {
                    warn!("Failed to unlock session {}: {}", held.session_id, e);
                }
                self.monitor.mark_authenticated(&held.session_id).await;
                info!("Login allowed for {} (session {})", held.username, held.session_id);
            }
            None => {
                // Verified without a held session: authenticate whatever the
                // user has open so the next scan does not re-challenge it
                for session in self.monitor.sessions_for_user(user_id).await {
                    self.monitor.mark_authenticated(&session.session_id).await;
                }
            }
        }
    }

    /// Terminate a held login after a denial
    pub async fn deny(&self, user_id: &UserId) {
        let held = self.pending.write().await.remove(user_id);
        if let Some(held) = held {
            if let Err(e) = self.provider.logoff_session(&held.session_id).await {
                warn!("Failed to log off session {}: {}", held.session_id, e);
            }
            info!("Login denied for {} (session {})", held.username, held.session_id);
        }
    }

    /// Forget a held login whose session went away on its own
    pub async fn handle_session_ended(&self, session_id: &SessionId) {
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, held| held.session_id != *session_id);
        if pending.len() < before {
            debug!("Dropped pending login for ended session {}", session_id);
        }
    }

    pub async fn pending_login(&self, user_id: &UserId) -> Option<PendingLogin> {
        self.pending.read().await.get(user_id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}
