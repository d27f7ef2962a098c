//! Error types surfaced by the hub.

use std::net::SocketAddr;
use std::time::Duration;

use hub_protocol::ProtocolError;

use crate::registry::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The client sent an upgrade or handshake the hub cannot accept.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection id '{0}' is already registered")]
    DuplicateId(ConnectionId),

    #[error("connection '{0}' is not active")]
    NotActive(ConnectionId),

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HubError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Handshake(_) => "handshake_failed",
            Self::DuplicateId(_) => "duplicate_id",
            Self::NotActive(_) => "not_active",
            Self::Bind { .. } => "bind_failed",
            Self::Protocol(e) => e.error_code(),
        }
    }
}

/// Why a single outbound send did not reach its connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("outbound channel closed")]
    Closed,

    #[error("connection is not active")]
    NotActive,

    #[error("connection is closing")]
    Aborted,

    #[error("outbound queue is full")]
    Full,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode message: {0}")]
    Encode(String),
}
