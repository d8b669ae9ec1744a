//! Conversation sessions and the registry of live sessions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::turn::{Role, Turn};

/// Default idle timeout after which a session ends (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// Every write under these locks is a single push or assignment, so a guard
// recovered from a poisoned lock still sees consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The ordered turn history of one user's conversation.
///
/// Cloning a `Session` yields another handle to the same history. Turns can
/// only be appended; there is no edit, delete, or truncate.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    turns: RwLock<Vec<Turn>>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
    /// Held for the duration of one user→assistant round trip.
    round_trip: Mutex<()>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                turns: RwLock::new(Vec::new()),
                created_at: now,
                last_activity: RwLock::new(now),
                round_trip: Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Append a turn to the end of the history.
    pub fn append(&self, turn: Turn) {
        write(&self.inner.turns).push(turn);
        self.touch();
    }

    pub fn add_user_turn(&self, content: impl Into<String>) {
        self.append(Turn::user(content));
    }

    pub fn add_assistant_turn(&self, content: impl Into<String>) {
        self.append(Turn::assistant(content));
    }

    /// Snapshot of every turn in chronological order.
    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        read(&self.inner.turns).clone()
    }

    #[must_use]
    pub fn last_turn(&self) -> Option<Turn> {
        read(&self.inner.turns).last().cloned()
    }

    /// Number of turns with the given role.
    #[must_use]
    pub fn count_role(&self, role: Role) -> usize {
        read(&self.inner.turns)
            .iter()
            .filter(|turn| turn.role() == role)
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner.turns).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *read(&self.inner.last_activity)
    }

    /// Wait until no other round trip is in flight on this session.
    ///
    /// The returned guard keeps concurrent submissions from interleaving
    /// their user and assistant turns.
    pub async fn begin_round_trip(&self) -> MutexGuard<'_, ()> {
        self.inner.round_trip.lock().await
    }

    /// Check whether the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        let idle = Utc::now() - self.last_activity();
        // A negative duration means clock skew; treat as fresh.
        idle.to_std().is_ok_and(|idle| idle > timeout)
    }

    fn touch(&self) {
        *write(&self.inner.last_activity) = Utc::now();
    }
}

/// Registry of live sessions, keyed by session id.
///
/// Session start and end are explicit: [`SessionStore::start`] creates an
/// empty session and [`SessionStore::end`] drops it with its history.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new, empty session.
    #[must_use]
    pub fn start(&self) -> Session {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone());
        write(&self.sessions).insert(id, session.clone());
        tracing::debug!(session_id = %session.id(), "Session started");
        session
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        read(&self.sessions).get(id).cloned()
    }

    /// End a session, discarding its history.
    pub fn end(&self, id: &str) -> Option<Session> {
        let removed = write(&self.sessions).remove(id);
        if let Some(session) = &removed {
            tracing::debug!(
                session_id = %id,
                turn_count = session.len(),
                "Session ended"
            );
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        read(&self.sessions).keys().cloned().collect()
    }

    /// End every session idle longer than `timeout`.
    ///
    /// Returns the number of sessions ended.
    pub fn sweep_expired(&self, timeout: Duration) -> usize {
        let mut guard = write(&self.sessions);
        let before = guard.len();
        guard.retain(|_, session| !session.is_expired(timeout));
        before - guard.len()
    }

    /// Periodically end idle sessions on the current tokio runtime.
    pub fn spawn_sweeper(&self, every: Duration, timeout: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ended = store.sweep_expired(timeout);
                if ended > 0 {
                    tracing::info!(
                        name: "session.sweep",
                        ended,
                        remaining = store.len(),
                        "Ended idle sessions"
                    );
                }
            }
        })
    }
}
