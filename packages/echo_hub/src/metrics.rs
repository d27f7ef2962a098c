//! Server metrics for observability
//!
//! Atomic counters updated by the connection lifecycle and the broadcast
//! handler, exposed as a serializable snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently registered connections
    pub active_connections: AtomicU64,
    /// Total connections that completed the handshake since server start
    pub total_connections: AtomicU64,
    /// Upgrades or handshakes that were rejected
    pub handshake_failures: AtomicU64,

    // Message metrics
    /// Hub messages decoded from clients
    pub messages_received: AtomicU64,
    /// Broadcasts fanned out
    pub broadcasts: AtomicU64,
    /// Per-recipient deliveries that succeeded
    pub messages_delivered: AtomicU64,

    // Error metrics
    /// Per-recipient sends that failed or timed out
    pub send_failures: AtomicU64,
    /// Frames that could not be decoded
    pub protocol_errors: AtomicU64,
    /// Invocations answered with an error completion
    pub invocation_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_completed(&self, delivered: usize, failed: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.messages_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.send_failures.fetch_add(failed as u64, Ordering::Relaxed);
    }

    // Error tracking
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invocation_error(&self) {
        self.invocation_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                broadcasts: self.broadcasts.load(Ordering::Relaxed),
                delivered: self.messages_delivered.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                send_failures: self.send_failures.load(Ordering::Relaxed),
                protocol: self.protocol_errors.load(Ordering::Relaxed),
                invocation: self.invocation_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub handshake_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub broadcasts: u64,
    pub delivered: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub send_failures: u64,
    pub protocol: u64,
    pub invocation: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub encoding: String,
    pub connections: u64,
    pub uptime_secs: u64,
}
