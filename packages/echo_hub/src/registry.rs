//! Connection registry
//!
//! The live set of clients a broadcast reaches. Every mutation and every
//! snapshot goes through one lock, so a snapshot is always a consistent view
//! and never observes a half-applied register or unregister.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hub_protocol::{Encoding, HubMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{HubError, SendFailure};
use crate::sink::MessageSink;

/// Opaque, unique identifier of a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One client as the hub sees it: identity, encoding, lifecycle state and
/// the sink outbound messages go through.
pub struct ClientConnection {
    id: ConnectionId,
    encoding: Encoding,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
    closing: CancellationToken,
    shutdown: CancellationToken,
    sink: Arc<dyn MessageSink>,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("encoding", &self.encoding)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientConnection {
    /// `shutdown` is the hub-wide token. Cancelling it aborts sends in flight
    /// to this connection without moving it out of Active.
    pub fn new(
        id: ConnectionId,
        encoding: Encoding,
        sink: Arc<dyn MessageSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            encoding,
            connected_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closing: CancellationToken::new(),
            shutdown,
            sink,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Connecting -> Active. Returns false from any other state.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to Closing and wake everything waiting on [`Self::closing`].
    ///
    /// Returns true only for the call that performed the transition.
    pub fn begin_close(&self) -> bool {
        let transitioned = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                match ConnectionState::from_u8(s) {
                    ConnectionState::Connecting | ConnectionState::Active => {
                        Some(ConnectionState::Closing as u8)
                    }
                    ConnectionState::Closing | ConnectionState::Closed => None,
                }
            })
            .is_ok();
        self.closing.cancel();
        transitioned
    }

    /// Terminal state. Idempotent.
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.closing.cancel();
    }

    /// Resolves once the connection has started closing.
    pub async fn closing(&self) {
        self.closing.cancelled().await
    }

    pub fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Send through the sink, bounded by `timeout`.
    ///
    /// Only Active connections accept messages. A send still in flight when
    /// the connection starts closing or the hub shuts down is abandoned.
    pub async fn send(&self, message: HubMessage, timeout: Duration) -> Result<(), SendFailure> {
        if !self.is_active() {
            return Err(SendFailure::NotActive);
        }
        tokio::select! {
            _ = self.closing.cancelled() => Err(SendFailure::Aborted),
            _ = self.shutdown.cancelled() => Err(SendFailure::Aborted),
            result = tokio::time::timeout(timeout, self.sink.send(message)) => {
                result.unwrap_or(Err(SendFailure::Timeout(timeout)))
            }
        }
    }
}

/// Summary row for the connections listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub encoding: Encoding,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
}

impl From<&ClientConnection> for ConnectionInfo {
    fn from(conn: &ClientConnection) -> Self {
        Self {
            id: conn.id.clone(),
            encoding: conn.encoding,
            state: conn.state(),
            connected_at: conn.connected_at,
        }
    }
}

/// Thread-safe set of Active connections keyed by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an Active connection. Fails if the id is taken or the connection
    /// has not completed its handshake.
    pub async fn register(&self, conn: Arc<ClientConnection>) -> Result<ConnectionId, HubError> {
        if !conn.is_active() {
            return Err(HubError::NotActive(conn.id.clone()));
        }
        let mut connections = self.connections.write().await;
        match connections.entry(conn.id.clone()) {
            Entry::Occupied(_) => Err(HubError::DuplicateId(conn.id.clone())),
            Entry::Vacant(slot) => {
                let id = conn.id.clone();
                slot.insert(conn);
                debug!(conn_id = %id, total = connections.len(), "Registered connection");
                Ok(id)
            }
        }
    }

    /// Remove a connection. Unknown ids are a no-op.
    pub async fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(id);
        if removed.is_some() {
            debug!(conn_id = %id, total = connections.len(), "Unregistered connection");
        }
        removed
    }

    /// Point-in-time copy of every registered connection.
    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Remove and return everything, for shutdown.
    pub async fn drain(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .write()
            .await
            .drain()
            .map(|(_, conn)| conn)
            .collect()
    }
}
