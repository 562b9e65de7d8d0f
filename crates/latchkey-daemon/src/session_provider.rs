//! Host session access
//!
//! The daemon never touches the OS session machinery directly; enumeration,
//! lock, unlock, logoff, and account listing all go through the
//! [`SessionProvider`] trait. Production uses [`LoginctlProvider`]; tests run
//! against the scripted in-memory [`FakeSessionProvider`].

use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use latchkey_core::{SessionId, SessionState, SystemUser, UserId};

use crate::error::{DaemonError, Result};

/// Lowest uid treated as a human account
const UID_MIN: u32 = 1000;

/// Highest uid treated as a human account
const UID_MAX: u32 = 59999;

/// Raw session row as reported by the OS
///
/// The monitor owns session lifecycle bookkeeping; a record is just one
/// observation.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub state: SessionState,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Enumerate interactive sessions. A failure means the session set is
    /// unknown, never that it is empty.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Lock the screen of a session
    async fn lock_session(&self, session_id: &SessionId) -> Result<()>;

    /// Unlock the screen of a session
    async fn unlock_session(&self, session_id: &SessionId) -> Result<()>;

    /// Terminate a session (forced logoff)
    async fn logoff_session(&self, session_id: &SessionId) -> Result<()>;

    /// List local interactive accounts
    async fn list_users(&self) -> Result<Vec<SystemUser>>;
}

/// systemd-logind backed provider
///
/// Shells out to `loginctl` for session control and `getent` for account
/// listing, each call bounded by the configured command timeout.
pub struct LoginctlProvider {
    command_timeout: Duration,
}

impl LoginctlProvider {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        debug!("Running {} {:?}", program, args);
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(program).args(args).output(),
        )
        .await
        .map_err(|_| DaemonError::Timeout)??;
        Ok(output)
    }

    /// Run a command, mapping any failure into `make_err`
    async fn run_checked(
        &self,
        program: &str,
        args: &[&str],
        make_err: fn(String) -> DaemonError,
    ) -> Result<String> {
        let output = self
            .run(program, args)
            .await
            .map_err(|e| make_err(format!("{} {}: {}", program, args.join(" "), e)))?;
        if !output.status.success() {
            return Err(make_err(format!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn show_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let stdout = self
            .run_checked(
                "loginctl",
                &[
                    "show-session",
                    session_id,
                    "--property=User",
                    "--property=Name",
                    "--property=State",
                    "--property=Class",
                    "--value",
                ],
                DaemonError::SessionEnumeration,
            )
            .await?;

        let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
        if lines.len() < 4 {
            return Err(DaemonError::SessionEnumeration(format!(
                "unexpected show-session output for {}: {:?}",
                session_id, stdout
            )));
        }

        // Only gate real user sessions, not greeters or service managers
        if lines[3] != "user" {
            return Ok(None);
        }

        let state = match lines[2] {
            "active" => SessionState::Active,
            "online" => SessionState::Connected,
            _ => SessionState::Disconnected,
        };

        Ok(Some(SessionRecord {
            session_id: SessionId::new(session_id),
            user_id: UserId::new(lines[0]),
            username: lines[1].to_string(),
            state,
        }))
    }
}

#[async_trait]
impl SessionProvider for LoginctlProvider {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let stdout = self
            .run_checked(
                "loginctl",
                &["list-sessions", "--no-legend"],
                DaemonError::SessionEnumeration,
            )
            .await?;

        let mut records = Vec::new();
        for line in stdout.lines() {
            let session_id = match line.split_whitespace().next() {
                Some(id) => id,
                None => continue,
            };
            // A session vanishing mid-scan makes the whole view unreliable;
            // callers treat the set as unknown rather than partially seen
            if let Some(record) = self.show_session(session_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn lock_session(&self, session_id: &SessionId) -> Result<()> {
        self.run_checked(
            "loginctl",
            &["lock-session", session_id.as_str()],
            DaemonError::SessionAction,
        )
        .await?;
        Ok(())
    }

    async fn unlock_session(&self, session_id: &SessionId) -> Result<()> {
        self.run_checked(
            "loginctl",
            &["unlock-session", session_id.as_str()],
            DaemonError::SessionAction,
        )
        .await?;
        Ok(())
    }

    async fn logoff_session(&self, session_id: &SessionId) -> Result<()> {
        self.run_checked(
            "loginctl",
            &["terminate-session", session_id.as_str()],
            DaemonError::SessionAction,
        )
        .await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<SystemUser>> {
        let stdout = self
            .run_checked("getent", &["passwd"], DaemonError::SessionEnumeration)
            .await?;

        let mut users = Vec::new();
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                continue;
            }
            let uid: u32 = match fields[2].parse() {
                Ok(uid) => uid,
                Err(_) => continue,
            };
            if !(UID_MIN..=UID_MAX).contains(&uid) {
                continue;
            }
            let shell = fields[6].trim();
            let disabled = shell.ends_with("nologin") || shell.ends_with("false");
            users.push(SystemUser {
                user_id: UserId::new(uid.to_string()),
                username: fields[0].to_string(),
                disabled,
            });
        }
        Ok(users)
    }
}

/// Scripted in-memory session source for tests
#[cfg(any(test, feature = "test-support"))]
pub struct FakeSessionProvider {
    state: std::sync::Mutex<FakeState>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
struct FakeState {
    sessions: Vec<SessionRecord>,
    users: Vec<SystemUser>,
    fail_enumeration: bool,
    fail_lock: bool,
    locked: Vec<SessionId>,
    unlocked: Vec<SessionId>,
    logged_off: Vec<SessionId>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeSessionProvider {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(FakeState::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().expect("fake provider lock poisoned");
        f(&mut state)
    }

    pub fn add_session(&self, session_id: &str, user_id: &str, username: &str) {
        self.with_state(|s| {
            s.sessions.push(SessionRecord {
                session_id: SessionId::new(session_id),
                user_id: UserId::new(user_id),
                username: username.to_string(),
                state: SessionState::Active,
            })
        });
    }

    pub fn remove_session(&self, session_id: &str) {
        self.with_state(|s| s.sessions.retain(|r| r.session_id.as_str() != session_id));
    }

    pub fn set_users(&self, users: Vec<SystemUser>) {
        self.with_state(|s| s.users = users);
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.with_state(|s| s.fail_enumeration = fail);
    }

    pub fn set_fail_lock(&self, fail: bool) {
        self.with_state(|s| s.fail_lock = fail);
    }

    pub fn locked(&self) -> Vec<SessionId> {
        self.with_state(|s| s.locked.clone())
    }

    pub fn unlocked(&self) -> Vec<SessionId> {
        self.with_state(|s| s.unlocked.clone())
    }

    pub fn logged_off(&self) -> Vec<SessionId> {
        self.with_state(|s| s.logged_off.clone())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeSessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl SessionProvider for FakeSessionProvider {
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.with_state(|s| {
            if s.fail_enumeration {
                Err(DaemonError::SessionEnumeration(
                    "scripted enumeration failure".to_string(),
                ))
            } else {
                Ok(s.sessions.clone())
            }
        })
    }

    async fn lock_session(&self, session_id: &SessionId) -> Result<()> {
        self.with_state(|s| {
            if s.fail_lock {
                Err(DaemonError::SessionAction(
                    "scripted lock failure".to_string(),
                ))
            } else {
                s.locked.push(session_id.clone());
                Ok(())
            }
        })
    }

    async fn unlock_session(&self, session_id: &SessionId) -> Result<()> {
        self.with_state(|s| {
            s.unlocked.push(session_id.clone());
            Ok(())
        })
    }

    async fn logoff_session(&self, session_id: &SessionId) -> Result<()> {
        self.with_state(|s| {
            s.sessions.retain(|r| &r.session_id != session_id);
            s.logged_off.push(session_id.clone());
            Ok(())
        })
    }

    async fn list_users(&self) -> Result<Vec<SystemUser>> {
        self.with_state(|s| Ok(s.users.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_provider_scripts_enumeration_failure() {
        let provider = FakeSessionProvider::new();
        provider.add_session("2", "1000", "alice");
        assert_eq!(provider.list_sessions().await.unwrap().len(), 1);

        provider.set_fail_enumeration(true);
        assert!(matches!(
            provider.list_sessions().await,
            Err(DaemonError::SessionEnumeration(_))
        ));
    }

    #[tokio::test]
    async fn fake_provider_logoff_removes_session() {
        let provider = FakeSessionProvider::new();
        provider.add_session("2", "1000", "alice");
        provider
            .logoff_session(&SessionId::new("2"))
            .await
            .unwrap();
        assert!(provider.list_sessions().await.unwrap().is_empty());
        assert_eq!(provider.logged_off(), vec![SessionId::new("2")]);
    }
}
