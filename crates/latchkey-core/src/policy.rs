//! Per-user OTP policy
//!
//! A [`UserPolicy`] describes whether and how one local account is gated:
//! the delivery identity handed to the OTP provider, the mobile numbers to
//! deliver to, and the skip window during which a past verification is still
//! honored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::types::UserId;

/// Skip window applied when none is configured
pub const DEFAULT_SKIP_MINUTES: u32 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPolicy {
    pub user_id: UserId,
    /// Identity handed to the OTP provider for delivery routing
    pub delivery_id: Uuid,
    /// Delivery targets in preference order
    pub mobile_numbers: Vec<String>,
    /// Minutes a successful verification remains valid
    pub skip_duration_minutes: u32,
    pub enabled: bool,
    /// Set only through [`UserPolicy::mark_verified`]
    pub last_otp_verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserPolicy {
    pub fn new(user_id: UserId, mobile_numbers: Vec<String>, skip_duration_minutes: u32) -> Self {
        Self {
            user_id,
            delivery_id: Uuid::new_v4(),
            mobile_numbers,
            skip_duration_minutes,
            enabled: true,
            last_otp_verified_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Trim delivery numbers and drop empties. Idempotent.
    pub fn normalize(&mut self) {
        self.mobile_numbers = self
            .mobile_numbers
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        if self.skip_duration_minutes == 0 {
            return Err(CoreError::Validation(
                "skip duration must be at least one minute".to_string(),
            ));
        }
        if self.enabled && self.mobile_numbers.is_empty() {
            return Err(CoreError::Validation(
                "an enabled policy needs at least one mobile number".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a fresh OTP is required at `now`.
    ///
    /// Required when no verification has ever been recorded, or when the
    /// skip window has elapsed. The boundary is inclusive: exactly
    /// `skip_duration_minutes` since the last verification already requires
    /// a new challenge.
    pub fn otp_required(&self, now: DateTime<Utc>) -> bool {
        match self.last_otp_verified_at {
            None => true,
            Some(last) => {
                now.signed_duration_since(last)
                    >= Duration::minutes(i64::from(self.skip_duration_minutes))
            }
        }
    }

    /// Instant at which the current skip window lapses
    pub fn skip_expires_at(&self) -> Option<DateTime<Utc>> {
        self.last_otp_verified_at
            .map(|last| last + Duration::minutes(i64::from(self.skip_duration_minutes)))
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.last_otp_verified_at = Some(now);
        self.updated_at = now;
    }
}
