//! Core identifiers and session types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable security identifier of a local account (uid on Linux)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS-scoped session identifier
///
/// Session identifiers are reused by the OS across logons, so a SessionId is
/// only meaningful while the session it names is observed alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque provider-issued reference for an outstanding OTP challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OtpRef(pub String);

impl OtpRef {
    pub fn new(r: impl Into<String>) -> Self {
        Self(r.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OtpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state reported by the OS for an interactive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Connected,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// An observed interactive session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub state: SessionState,
    /// First time this session was observed
    pub start_time: DateTime<Utc>,
    /// Most recent time this session was observed
    pub last_seen: DateTime<Utc>,
    /// Whether the session has passed the OTP gate
    pub authenticated: bool,
    pub auth_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        username: impl Into<String>,
        state: SessionState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            username: username.into(),
            state,
            start_time: now,
            last_seen: now,
            authenticated: false,
            auth_time: None,
        }
    }

    /// Record a fresh observation, preserving authentication state
    pub fn observed(&mut self, state: SessionState, now: DateTime<Utc>) {
        self.state = state;
        self.last_seen = now;
    }

    pub fn mark_authenticated(&mut self, now: DateTime<Utc>) {
        self.authenticated = true;
        self.auth_time = Some(now);
    }
}

/// A local interactive account as presented to the configuration console
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemUser {
    pub user_id: UserId,
    pub username: String,
    pub disabled: bool,
}

/// Outcome of gating one login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginDecision {
    pub allowed: bool,
    pub requires_otp: bool,
}

impl LoginDecision {
    /// Session may proceed without a challenge
    pub fn allow() -> Self {
        Self {
            allowed: true,
            requires_otp: false,
        }
    }

    /// Session is held until an OTP is verified
    pub fn challenge() -> Self {
        Self {
            allowed: false,
            requires_otp: true,
        }
    }

    /// Session is denied outright (no policy, or policy disabled)
    pub fn deny() -> Self {
        Self {
            allowed: false,
            requires_otp: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_preserves_authentication() {
        let now = Utc::now();
        let mut session = Session::new(
            SessionId::new("2"),
            UserId::new("1000"),
            "alice",
            SessionState::Active,
            now,
        );
        session.mark_authenticated(now);

        let later = now + chrono::Duration::seconds(30);
        session.observed(SessionState::Disconnected, later);

        assert!(session.authenticated);
        assert_eq!(session.auth_time, Some(now));
        assert_eq!(session.state, SessionState::Disconnected);
        assert_eq!(session.last_seen, later);
        assert_eq!(session.start_time, now);
    }

    #[test]
    fn decision_constructors() {
        assert!(LoginDecision::allow().allowed);
        assert!(!LoginDecision::allow().requires_otp);
        assert!(!LoginDecision::challenge().allowed);
        assert!(LoginDecision::challenge().requires_otp);
        assert!(!LoginDecision::deny().allowed);
        assert!(!LoginDecision::deny().requires_otp);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = UserId::new("1000");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1000\"");
        let back: UserId = serde_json::from_str("\"1000\"").unwrap();
        assert_eq!(back, id);
    }
}
