//! Per-connection outbound queue feeding the socket writer.

use axum::extract::ws::Message;
use futures::FutureExt;
use futures::future::BoxFuture;
use hub_protocol::{Encoding, HubMessage, TransferFormat};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendFailure;
use crate::sink::MessageSink;

/// Wrap already-encoded bytes in the frame kind the encoding travels in.
pub fn frame(format: TransferFormat, bytes: Vec<u8>) -> Result<Message, SendFailure> {
    match format {
        TransferFormat::Text => String::from_utf8(bytes)
            .map(|text| Message::Text(text.into()))
            .map_err(|e| SendFailure::Encode(e.to_string())),
        TransferFormat::Binary => Ok(Message::Binary(bytes.into())),
    }
}

pub fn encode_frame(encoding: Encoding, message: &HubMessage) -> Result<Message, SendFailure> {
    let bytes = encoding
        .write_message(message)
        .map_err(|e| SendFailure::Encode(e.to_string()))?;
    frame(encoding.transfer_format(), bytes)
}

/// Encodes hub messages for one client and queues them for its writer task.
pub struct WsSink {
    encoding: Encoding,
    outbound: mpsc::Sender<Message>,
}

impl WsSink {
    pub fn channel(encoding: Encoding, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(capacity);
        (Self { encoding, outbound }, rx)
    }

    /// Queue without waiting for room.
    pub fn try_enqueue(&self, message: &HubMessage) -> Result<(), SendFailure> {
        let frame = encode_frame(self.encoding, message)?;
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }
}

impl MessageSink for WsSink {
    fn send(&self, message: HubMessage) -> BoxFuture<'_, Result<(), SendFailure>> {
        async move {
            let frame = encode_frame(self.encoding, &message)?;
            self.outbound
                .send(frame)
                .await
                .map_err(|_| SendFailure::Closed)
        }
        .boxed()
    }
}
