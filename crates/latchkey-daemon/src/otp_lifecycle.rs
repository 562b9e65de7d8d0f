//! OTP challenge lifecycle
//!
//! Owns the table of outstanding challenges: at most one per user, superseded
//! by a newer request, expired by the sweep task, closed out by verification.
//! Failed codes are counted here so the cap applies no matter which surface
//! submitted the code.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use latchkey_core::{OtpRef, UserId};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::otp_provider::OtpTransport;
use crate::policy_store::PolicyStore;

/// An OTP that has been sent and not yet verified, expired, or superseded
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub user_id: UserId,
    pub otp_ref: OtpRef,
    /// Delivery identity the code was requested under; survives policy edits
    pub delivery_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub mobile_numbers: Vec<String>,
    pub attempts: u32,
}

impl PendingChallenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

pub struct OtpLifecycle {
    policies: Arc<PolicyStore>,
    transport: Arc<dyn OtpTransport>,
    pending: RwLock<HashMap<UserId, PendingChallenge>>,
    expiry_minutes: u32,
    max_attempts: u32,
}

impl OtpLifecycle {
    pub fn new(
        policies: Arc<PolicyStore>,
        transport: Arc<dyn OtpTransport>,
        config: &DaemonConfig,
    ) -> Self {
        Self {
            policies,
            transport,
            pending: RwLock::new(HashMap::new()),
            expiry_minutes: config.otp_expiry_minutes,
            max_attempts: config.max_verify_attempts,
        }
    }

    /// Send a code to the user's delivery numbers and record the challenge.
    ///
    /// Any prior challenge for the user is superseded; codes delivered for it
    /// stop verifying. The provider call runs with no lock held.
    pub async fn request_challenge(&self, user_id: &UserId) -> Result<OtpRef> {
        let policy = self
            .policies
            .get(user_id)
            .await?
            .ok_or_else(|| DaemonError::PolicyNotFound(user_id.to_string()))?;
        if !policy.enabled {
            return Err(DaemonError::PolicyDisabled(user_id.to_string()));
        }

        let otp_ref = self
            .transport
            .send_otp(&policy.delivery_id.to_string(), &policy.mobile_numbers)
            .await?;

        let now = Utc::now();
        let challenge = PendingChallenge {
            user_id: user_id.clone(),
            otp_ref: otp_ref.clone(),
            delivery_id: policy.delivery_id,
            issued_at: now,
            expires_at: now + Duration::minutes(i64::from(self.expiry_minutes)),
            mobile_numbers: policy.mobile_numbers,
            attempts: 0,
        };

        let mut pending = self.pending.write().await;
        if pending.insert(user_id.clone(), challenge).is_some() {
            info!("Superseded outstanding challenge for user {}", user_id);
        } else {
            info!("Issued challenge for user {}", user_id);
        }
        Ok(otp_ref)
    }

    /// Check a submitted code against the user's outstanding challenge.
    ///
    /// Success removes the challenge and records the verification on the
    /// user's policy. A provider rejection counts one attempt; at
    /// `max_verify_attempts` the challenge is withdrawn. Transport errors
    /// leave the challenge untouched.
    pub async fn verify_challenge(&self, user_id: &UserId, code: &str) -> Result<()> {
        let challenge = {
            let mut pending = self.pending.write().await;
            let challenge = pending
                .get(user_id)
                .cloned()
                .ok_or_else(|| DaemonError::NoChallenge(user_id.to_string()))?;
            if challenge.is_expired(Utc::now()) {
                pending.remove(user_id);
                return Err(DaemonError::ChallengeExpired(user_id.to_string()));
            }
            challenge
        };

        let outcome = self
            .transport
            .verify_otp(&challenge.delivery_id.to_string(), &challenge.otp_ref, code)
            .await;

        let mut pending = self.pending.write().await;
        // A newer request may have superseded this challenge while the
        // provider call was in flight; its outcome applies to a reference
        // that no longer exists.
        let still_current = pending
            .get(user_id)
            .map(|current| current.otp_ref == challenge.otp_ref)
            .unwrap_or(false);

        match outcome {
            Ok(()) => {
                if !still_current {
                    return Err(DaemonError::NoChallenge(user_id.to_string()));
                }
                pending.remove(user_id);
                drop(pending);
                self.policies.mark_verified(user_id).await?;
                info!("Challenge verified for user {}", user_id);
                Ok(())
            }
            Err(DaemonError::VerificationFailed(message)) => {
                if still_current {
                    if let Some(current) = pending.get_mut(user_id) {
                        current.attempts += 1;
                        if current.attempts >= self.max_attempts {
                            pending.remove(user_id);
                            warn!(
                                "Withdrew challenge for user {} after {} failed attempts",
                                user_id, self.max_attempts
                            );
                            return Err(DaemonError::AttemptsExhausted);
                        }
                        debug!(
                            "Failed attempt {}/{} for user {}",
                            current.attempts, self.max_attempts, user_id
                        );
                    }
                }
                Err(DaemonError::VerificationFailed(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop challenges past their expiry; returns how many were removed
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, challenge| !challenge.is_expired(now));
        let removed = before - pending.len();
        if removed > 0 {
            debug!("Swept {} expired challenge(s)", removed);
        }
        removed
    }

    /// Provider liveness probe for the console's connection test
    pub async fn check_provider(&self) -> Result<()> {
        self.transport.check_health().await
    }

    pub async fn pending_challenge(&self, user_id: &UserId) -> Option<PendingChallenge> {
        self.pending.read().await.get(user_id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}
