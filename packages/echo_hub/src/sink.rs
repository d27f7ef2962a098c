//! Outbound capability a registered connection exposes to the hub.

use futures::future::BoxFuture;
use hub_protocol::HubMessage;

use crate::error::SendFailure;

/// Delivers hub messages to one client.
///
/// Implementations own the wire encoding; callers hand over protocol-level
/// messages and never see bytes.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: HubMessage) -> BoxFuture<'_, Result<(), SendFailure>>;
}
