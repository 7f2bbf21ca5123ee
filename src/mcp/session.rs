//! Registry of live SSE sessions.
//!
//! The SSE transport registers a session when a client opens the event
//! stream and removes it when the stream ends. The POST-message channel
//! looks sessions up by id and pushes requests into their inbound queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::transport::JsonRpcRequest;

/// Interval between keepalive `ping` events.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long a POST waits for room in a full session queue.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of each session's inbound queue.
pub const INBOUND_QUEUE_CAPACITY: usize = 10;

/// Fixed timings and sizes for SSE sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub keepalive_interval: Duration,
    pub enqueue_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: KEEPALIVE_INTERVAL,
            enqueue_timeout: ENQUEUE_TIMEOUT,
            queue_capacity: INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// One open event stream.
#[derive(Debug)]
pub struct Session {
    id: String,
    inbound: mpsc::Sender<JsonRpcRequest>,
    done: CancellationToken,
    initialized: AtomicBool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token that ends the session's stream loop when cancelled.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Asks the session's stream loop to stop.
    pub fn close(&self) {
        self.done.cancel();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }
}

/// Why a request could not be handed to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// No session is registered under the id.
    NotFound,
    /// The session's queue stayed full for the whole enqueue timeout.
    Busy,
}

/// Concurrency-safe map from session id to open session.
///
/// Registration and removal take the write lock; lookups take only the
/// read lock, so deliveries to different sessions never wait on each other.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Creates a session under a fresh id and returns it with the receiving
    /// end of its inbound queue.
    ///
    /// The session's done token is a child of the registry's shutdown token,
    /// so [`SessionRegistry::shutdown`] ends every stream.
    pub fn register(&self) -> (Arc<Session>, mpsc::Receiver<JsonRpcRequest>) {
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        let session = Arc::new(Session {
            id: format!("session_{}", Uuid::new_v4().simple()),
            inbound: tx,
            done: self.shutdown.child_token(),
            initialized: AtomicBool::new(false),
        });

        match self.sessions.write() {
            Ok(mut sessions) => {
                sessions.insert(session.id.clone(), Arc::clone(&session));
            }
            Err(poisoned) => {
                warn!("session registry lock poisoned, recovering");
                poisoned
                    .into_inner()
                    .insert(session.id.clone(), Arc::clone(&session));
            }
        }
        debug!(session_id = %session.id, "session registered");

        (session, rx)
    }

    /// Removes a session. Dropping the registry's handle closes the inbound
    /// queue once the stream loop lets go of its receiver.
    pub fn deregister(&self, id: &str) -> Option<Arc<Session>> {
        let removed = match self.sessions.write() {
            Ok(mut sessions) => sessions.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        };
        if removed.is_some() {
            debug!(session_id = %id, "session deregistered");
        }
        removed
    }

    /// Looks up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        match self.sessions.read() {
            Ok(sessions) => sessions.get(id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(id).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a request into a session's inbound queue, waiting up to the
    /// enqueue timeout for room.
    pub async fn deliver(
        &self,
        id: &str,
        request: JsonRpcRequest,
    ) -> std::result::Result<(), DeliveryError> {
        let session = self.get(id).ok_or(DeliveryError::NotFound)?;

        match tokio::time::timeout(self.settings.enqueue_timeout, session.inbound.send(request))
            .await
        {
            Ok(Ok(())) => Ok(()),
            // The stream loop ended between lookup and send.
            Ok(Err(_)) => Err(DeliveryError::NotFound),
            Err(_) => {
                warn!(session_id = %id, "session queue full, request rejected");
                Err(DeliveryError::Busy)
            }
        }
    }

    /// Ends every open session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
