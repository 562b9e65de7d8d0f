//! Interactive session monitoring
//!
//! Periodically enumerates sessions through the [`SessionProvider`] and
//! diffs the result against the previous snapshot. Consumers subscribe to a
//! broadcast channel for started/ended/updated events.
//!
//! A failed enumeration leaves the snapshot untouched: the session set is
//! unknown, never empty, and no teardown events are synthesized from it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use latchkey_core::{Session, SessionId, UserId};

use crate::error::Result;
use crate::session_provider::SessionProvider;

/// Event emitted when the observed session set changes
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session appeared since the previous scan
    Started { session: Session },
    /// A session disappeared since the previous scan
    Ended { session: Session },
    /// A known session was observed again
    Updated { session: Session },
    /// A session passed the OTP gate
    AuthChanged { session: Session },
}

/// Watches the host's interactive sessions
pub struct SessionMonitor {
    provider: Arc<dyn SessionProvider>,

    /// Sessions observed by the most recent successful scan
    snapshot: Arc<RwLock<HashMap<SessionId, Session>>>,

    /// Event broadcast channel
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionMonitor {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            provider,
            snapshot: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// All sessions in the current snapshot
    pub async fn sessions(&self) -> Vec<Session> {
        self.snapshot.read().await.values().cloned().collect()
    }

    pub async fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.snapshot.read().await.get(session_id).cloned()
    }

    pub async fn sessions_for_user(&self, user_id: &UserId) -> Vec<Session> {
        self.snapshot
            .read()
            .await
            .values()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn unauthenticated_sessions(&self) -> Vec<Session> {
        self.snapshot
            .read()
            .await
            .values()
            .filter(|s| !s.authenticated)
            .cloned()
            .collect()
    }

    /// Record that a session passed the gate. Returns false when the session
    /// is no longer observed.
    pub async fn mark_authenticated(&self, session_id: &SessionId) -> bool {
        let updated = {
            let mut snapshot = self.snapshot.write().await;
            match snapshot.get_mut(session_id) {
                Some(session) => {
                    session.mark_authenticated(Utc::now());
                    Some(session.clone())
                }
                None => None,
            }
        };

        match updated {
            Some(session) => {
                let _ = self.event_tx.send(SessionEvent::AuthChanged { session });
                true
            }
            None => false,
        }
    }

    /// Enumerate sessions and reconcile the snapshot.
    ///
    /// On enumeration failure the snapshot stays as it was and the error is
    /// returned; no `Ended` events are synthesized.
    pub async fn scan(&self) -> Result<()> {
        let records = match self.provider.list_sessions().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Session enumeration failed, keeping previous snapshot: {}", e);
                return Err(e);
            }
        };

        let now = Utc::now();
        let mut events = Vec::new();

        {
            let mut snapshot = self.snapshot.write().await;
            let mut seen: HashSet<SessionId> = HashSet::with_capacity(records.len());

            for record in records {
                seen.insert(record.session_id.clone());
                match snapshot.get_mut(&record.session_id) {
                    Some(session) => {
                        session.observed(record.state, now);
                        events.push(SessionEvent::Updated {
                            session: session.clone(),
                        });
                    }
                    None => {
                        let session = Session::new(
                            record.session_id.clone(),
                            record.user_id,
                            record.username,
                            record.state,
                            now,
                        );
                        info!(
                            "Session {} started for {} ({})",
                            session.session_id, session.username, session.user_id
                        );
                        snapshot.insert(record.session_id, session.clone());
                        events.push(SessionEvent::Started { session });
                    }
                }
            }

            let ended: Vec<SessionId> = snapshot
                .keys()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .collect();
            for id in ended {
                if let Some(session) = snapshot.remove(&id) {
                    info!(
                        "Session {} ended for {} ({})",
                        session.session_id, session.username, session.user_id
                    );
                    events.push(SessionEvent::Ended { session });
                }
            }
        }

        debug!("Scan produced {} events", events.len());
        for event in events {
            let _ = self.event_tx.send(event);
        }

        Ok(())
    }
}
