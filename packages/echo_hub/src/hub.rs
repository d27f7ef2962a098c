//! The hub: shared state every connection task works against, plus dispatch
//! of inbound invocations onto hub methods.

use std::future::Future;
use std::sync::Arc;

use hub_protocol::{Argument, Completion, Invocation};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastHandler, BroadcastReport};
use crate::config::HubConfig;
use crate::metrics::ServerMetrics;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Hub method clients invoke.
pub const ECHO_METHOD: &str = "EchoMessage";
/// Client method every connection receives the echo on.
pub const RECEIVED_EVENT: &str = "ReceivedMessage";

pub struct Hub {
    pub config: Arc<HubConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<ServerMetrics>,
    broadcaster: BroadcastHandler,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Hub {
    pub fn new(config: Arc<HubConfig>, metrics: Arc<ServerMetrics>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastHandler::new(registry.clone(), metrics.clone(), &config);
        Self {
            config,
            registry,
            metrics,
            broadcaster,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Cancelled once the server starts shutting down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wrap a connection task so [`Hub::shutdown`] waits for it.
    pub fn track<F: Future>(&self, task: F) -> TrackedFuture<F> {
        self.tracker.track_future(task)
    }

    /// Tell every connection to close. Returns immediately.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Hub shutting down");
        }
        self.shutdown.cancel();
    }

    /// Close every connection and wait for the registry to empty.
    ///
    /// Connection tasks get twice the drain timeout to finish on their own;
    /// whatever is still registered after that is removed here.
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        self.tracker.close();

        let grace = self.config.drain_timeout * 2;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                pending = self.tracker.len(),
                "Connection tasks did not finish before the drain timeout"
            );
        }

        let leftover = self.registry.drain().await;
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Force-closing connections still registered");
        }
        for conn in leftover {
            conn.mark_closed();
        }
    }

    /// Run one inbound invocation.
    ///
    /// Returns the completion to send back to the caller, if the invocation
    /// asked for one.
    pub async fn invoke(&self, caller: &ConnectionId, invocation: Invocation) -> Option<Completion> {
        let Invocation {
            invocation_id,
            target,
            arguments,
        } = invocation;

        let outcome = if target.eq_ignore_ascii_case(ECHO_METHOD) {
            self.echo_message(caller, arguments).await.map(|report| {
                debug!(
                    conn_id = %caller,
                    delivered = report.delivered,
                    failed = report.failed.len(),
                    "Echoed message"
                );
            })
        } else {
            Err(format!("Unknown hub method '{target}'"))
        };

        match (invocation_id, outcome) {
            (Some(id), Ok(())) => Some(Completion::void(id)),
            (Some(id), Err(error)) => {
                self.metrics.invocation_error();
                warn!(conn_id = %caller, method = %target, %error, "Invocation failed");
                Some(Completion::error(id, error))
            }
            (None, Ok(())) => None,
            (None, Err(error)) => {
                self.metrics.invocation_error();
                warn!(conn_id = %caller, method = %target, %error, "Non-blocking invocation failed");
                None
            }
        }
    }

    /// `EchoMessage(message)`: broadcast `ReceivedMessage(message)`.
    async fn echo_message(
        &self,
        caller: &ConnectionId,
        mut arguments: Vec<Argument>,
    ) -> Result<BroadcastReport, String> {
        if arguments.len() != 1 {
            return Err(format!(
                "Invocation provides {} argument(s) but target expects 1.",
                arguments.len()
            ));
        }
        let payload = arguments.remove(0);
        if !matches!(payload, Argument::Text(_) | Argument::Binary(_)) {
            return Err(format!(
                "Error binding arguments: expected a string, got {}.",
                payload.type_name()
            ));
        }

        let event = Invocation::new(RECEIVED_EVENT, vec![payload]);
        Ok(self.broadcaster.on_message(caller, event.into()).await)
    }
}
