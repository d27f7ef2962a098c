use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use hub_protocol::{Encoding, HubMessage};
use tokio_util::sync::CancellationToken;

use crate::AppState;
use crate::config::HubConfig;
use crate::error::SendFailure;
use crate::hub::Hub;
use crate::metrics::ServerMetrics;
use crate::registry::ClientConnection;
use crate::sink::MessageSink;

/// Hub config with short timeouts so failing paths resolve quickly in tests.
pub fn test_hub_config() -> HubConfig {
    HubConfig {
        send_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_millis(500),
        drain_timeout: Duration::from_millis(500),
        ..HubConfig::default()
    }
}

pub fn test_hub(config: HubConfig) -> Arc<Hub> {
    Arc::new(Hub::new(Arc::new(config), Arc::new(ServerMetrics::new())))
}

/// Build an `AppState` around a fresh hub.
pub fn test_app_state() -> AppState {
    test_app_state_with(test_hub_config())
}

pub fn test_app_state_with(config: HubConfig) -> AppState {
    AppState {
        hub: test_hub(config),
    }
}

/// An Active connection backed by a [`RecordingSink`].
pub fn active_connection(id: &str) -> (Arc<ClientConnection>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let conn = connection_with_sink(id, sink.clone());
    (conn, sink)
}

pub fn connection_with_sink(id: &str, sink: Arc<dyn MessageSink>) -> Arc<ClientConnection> {
    let conn = Arc::new(ClientConnection::new(
        id.into(),
        Encoding::Json,
        sink,
        CancellationToken::new(),
    ));
    assert!(conn.activate());
    conn
}

/// Keeps every message it is given.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<HubMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<HubMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: HubMessage) -> BoxFuture<'_, Result<(), SendFailure>> {
        self.messages.lock().unwrap().push(message);
        futures::future::ready(Ok(())).boxed()
    }
}

/// Fails every send with the given error.
pub struct FailingSink(pub SendFailure);

impl MessageSink for FailingSink {
    fn send(&self, _message: HubMessage) -> BoxFuture<'_, Result<(), SendFailure>> {
        futures::future::ready(Err(self.0.clone())).boxed()
    }
}

/// Never completes a send, like a client that stopped reading.
pub struct StalledSink;

impl MessageSink for StalledSink {
    fn send(&self, _message: HubMessage) -> BoxFuture<'_, Result<(), SendFailure>> {
        futures::future::pending().boxed()
    }
}
