//! Fan-out of one inbound message to every registered connection.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hub_protocol::HubMessage;
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::metrics::ServerMetrics;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients that failed and were unregistered.
    pub failed: Vec<ConnectionId>,
}

pub struct BroadcastHandler {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
    send_timeout: Duration,
    include_sender: bool,
}

impl BroadcastHandler {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<ServerMetrics>,
        config: &HubConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            send_timeout: config.send_timeout,
            include_sender: config.include_sender,
        }
    }

    /// Send `message` to every connection in a registry snapshot.
    ///
    /// Sends run concurrently. A recipient whose send fails or times out is
    /// unregistered and told to close; the others are unaffected.
    pub async fn on_message(&self, sender: &ConnectionId, message: HubMessage) -> BroadcastReport {
        let recipients: Vec<_> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|conn| self.include_sender || conn.id() != sender)
            .collect();

        if recipients.is_empty() {
            debug!(sender = %sender, "Broadcast with no recipients");
            return BroadcastReport::default();
        }

        let sends = recipients.iter().map(|conn| {
            let message = message.clone();
            async move { (conn, conn.send(message, self.send_timeout).await) }
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (conn, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(conn_id = %conn.id(), error = %e, "Dropping recipient after failed send");
                    conn.begin_close();
                    self.registry.unregister(conn.id()).await;
                    report.failed.push(conn.id().clone());
                }
            }
        }

        self.metrics
            .broadcast_completed(report.delivered, report.failed.len());
        debug!(
            sender = %sender,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendFailure;
    use crate::registry::ConnectionState;
    use crate::test_helpers::{
        FailingSink, StalledSink, active_connection, connection_with_sink, test_hub_config,
    };
    use hub_protocol::Invocation;

    fn received(text: &str) -> HubMessage {
        Invocation::new("ReceivedMessage", vec![text.into()]).into()
    }

    fn handler(registry: &Arc<ConnectionRegistry>, config: &HubConfig) -> BroadcastHandler {
        BroadcastHandler::new(registry.clone(), Arc::new(ServerMetrics::new()), config)
    }

    #[tokio::test]
    async fn test_reaches_everyone_including_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, a_sink) = active_connection("a");
        let (b, b_sink) = active_connection("b");
        let (c, c_sink) = active_connection("c");
        for conn in [a, b, c] {
            registry.register(conn).await.unwrap();
        }

        let report = handler(&registry, &test_hub_config())
            .on_message(&"a".into(), received("hi"))
            .await;

        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());
        for sink in [a_sink, b_sink, c_sink] {
            assert_eq!(sink.messages(), vec![received("hi")]);
        }
    }

    #[tokio::test]
    async fn test_exclude_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, a_sink) = active_connection("a");
        let (b, b_sink) = active_connection("b");
        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();

        let config = HubConfig {
            include_sender: false,
            ..test_hub_config()
        };
        let report = handler(&registry, &config)
            .on_message(&"a".into(), received("x"))
            .await;

        assert_eq!(report.delivered, 1);
        assert!(a_sink.messages().is_empty());
        assert_eq!(b_sink.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_recipient_is_isolated_and_removed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, a_sink) = active_connection("a");
        let b = connection_with_sink("b", Arc::new(FailingSink(SendFailure::Closed)));
        registry.register(a).await.unwrap();
        registry.register(b.clone()).await.unwrap();

        let report = handler(&registry, &test_hub_config())
            .on_message(&"a".into(), received("hello"))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![ConnectionId::from("b")]);
        assert_eq!(a_sink.messages(), vec![received("hello")]);
        assert!(registry.get(&"b".into()).await.is_none());
        assert_eq!(b.state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_stalled_recipient_times_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, a_sink) = active_connection("a");
        let slow = connection_with_sink("slow", Arc::new(StalledSink));
        registry.register(a).await.unwrap();
        registry.register(slow).await.unwrap();

        let report = handler(&registry, &test_hub_config())
            .on_message(&"a".into(), received("tick"))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![ConnectionId::from("slow")]);
        assert_eq!(a_sink.messages().len(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_registry_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let report = handler(&registry, &test_hub_config())
            .on_message(&"ghost".into(), received("anyone?"))
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_closing_recipient_is_skipped_and_removed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _) = active_connection("a");
        let (b, b_sink) = active_connection("b");
        registry.register(a).await.unwrap();
        registry.register(b.clone()).await.unwrap();
        b.begin_close();

        let report = handler(&registry, &test_hub_config())
            .on_message(&"a".into(), received("late"))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![ConnectionId::from("b")]);
        assert!(b_sink.messages().is_empty());
    }
}
