//! Push-connection sessions for the SSE and streamable transports.
//!
//! A [`Session`] binds one open push connection to a bounded queue of
//! outbound messages. The [`SessionRegistry`] owns every live session of one
//! transport instance behind a single reader/writer lock; callers only ever
//! see `create`, `get`, `remove`, `remove_expired` and `close_all`.
//!
//! Sessions are closed at most once: closing cancels the session's `done`
//! token, which is idempotent, and the registry entry is removed under the
//! same write lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use crate::error::EnqueueError;

/// Tunables shared by the session-based transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Capacity of each session's outbound queue.
    pub queue_capacity: usize,
    /// Interval between keepalive comments on idle push connections.
    pub keepalive: Duration,
    /// Sessions idle longer than this are reaped.
    pub idle_timeout: Duration,
    /// How often the reaper runs.
    pub reap_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            keepalive: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            reap_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Server-side state for one push connection.
#[derive(Debug)]
pub struct Session {
    id: String,
    sender: mpsc::Sender<Vec<u8>>,
    done: CancellationToken,
    last_active: Mutex<Instant>,
}

impl Session {
    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Marks the session as active now.
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// When the session was last active.
    #[must_use]
    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Returns `true` once the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves when the session is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    fn close(&self) {
        self.done.cancel();
    }

    /// Enqueues a message, waiting for room in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Closed`] if the session closes first.
    pub async fn send(&self, message: Vec<u8>) -> Result<(), EnqueueError> {
        tokio::select! {
            () = self.done.cancelled() => Err(EnqueueError::Closed),
            sent = self.sender.send(message) => sent.map_err(|_| EnqueueError::Closed),
        }
    }

    /// Enqueues a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the queue is at capacity and
    /// [`EnqueueError::Closed`] when the session is gone.
    pub fn try_send(&self, message: Vec<u8>) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Guarded map from session id to session.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    queue_capacity: usize,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions get queues of `queue_capacity`.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Creates and registers a new session.
    ///
    /// Returns the session and the receiving end of its queue, which belongs
    /// to the push connection that will deliver the messages.
    pub fn create(&self) -> (Arc<Session>, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            sender,
            done: CancellationToken::new(),
            last_active: Mutex::new(Instant::now()),
        });

        self.sessions
            .write()
            .insert(session.id.clone(), Arc::clone(&session));
        debug!(session_id = %session.id, "Session created");

        (session, receiver)
    }

    /// Looks up a live session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Closes and removes a session. Returns `false` if it was already gone.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        removed.map_or(false, |session| {
            session.close();
            debug!(session_id = %id, "Session closed");
            true
        })
    }

    /// Closes and removes every session idle for longer than `idle_timeout`.
    ///
    /// Returns the ids of the removed sessions.
    pub fn remove_expired(&self, now: Instant, idle_timeout: Duration) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_active()) > idle_timeout)
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.close();
            }
        }
        expired
    }

    /// Closes and removes every session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        drained.len()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Removes a session from its registry when dropped.
///
/// Held by the push stream so the session goes away however the stream ends:
/// client disconnect, explicit close or shutdown.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl SessionGuard {
    /// Ties the session `id` to the lifetime of the guard.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, id: String) -> Self {
        Self { registry, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
