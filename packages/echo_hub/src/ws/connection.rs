//! Connection lifecycle
//!
//! One task per upgraded socket walks the connection through
//! Connecting → Active → Closing → Closed. A separate writer task owns the
//! sending half of the socket and is fed by the connection's [`WsSink`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{sink::SinkExt, stream::StreamExt};
use hub_protocol::{Close, Encoding, HubMessage, MessageBuffer, ProtocolError, handshake};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::{WsSink, frame};
use crate::error::HubError;
use crate::hub::Hub;
use crate::registry::{ClientConnection, ConnectionId};

/// What the reader loop does after handling a frame.
enum Flow {
    Continue,
    /// Stop reading. A message, if any, is queued to the client before the
    /// socket closes.
    Close(Option<Close>),
}

/// Drive one WebSocket from upgrade to unregistration.
pub async fn handle_connection(socket: WebSocket, hub: Arc<Hub>, requested_id: Option<ConnectionId>) {
    let encoding = hub.config.encoding;
    let id = requested_id.unwrap_or_else(ConnectionId::generate);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Connecting: wait for the handshake request.
    let handshake = tokio::select! {
        _ = hub.shutdown_token().cancelled() => {
            Err(HubError::Handshake("Server is shutting down.".into()))
        }
        result = tokio::time::timeout(
            hub.config.handshake_timeout,
            read_handshake(&mut ws_receiver, encoding, hub.config.max_message_bytes),
        ) => result.unwrap_or_else(|_| Err(HubError::Handshake("Handshake was canceled.".into()))),
    };
    let leftover = match handshake {
        Ok(rest) => rest,
        Err(e) => return reject(ws_sender, &hub, &id, e).await,
    };

    let (sink, outbound) = WsSink::channel(encoding, hub.config.send_channel_capacity);
    let sink = Arc::new(sink);
    let conn = Arc::new(ClientConnection::new(
        id.clone(),
        encoding,
        sink.clone(),
        hub.shutdown_token().clone(),
    ));
    conn.activate();
    if let Err(e) = hub.registry.register(conn.clone()).await {
        conn.mark_closed();
        return reject(ws_sender, &hub, &id, e).await;
    }

    // Nothing reaches the writer before the handshake response is out.
    let accepted = match frame(encoding.transfer_format(), handshake::write_response(None)) {
        Ok(response) => ws_sender.send(response).await.is_ok(),
        Err(_) => false,
    };
    if !accepted {
        warn!(conn_id = %id, "Failed to send handshake response");
        conn.mark_closed();
        hub.registry.unregister(&id).await;
        hub.metrics.handshake_failed();
        return;
    }

    hub.metrics.connection_opened();
    info!(conn_id = %id, %encoding, "Client connected");

    let writer = tokio::spawn(write_loop(ws_sender, outbound, conn.closing_token()));
    let writer_abort = writer.abort_handle();

    // Active: read until something closes the connection. Messages may span
    // frames, so everything goes through one buffer, handshake leftovers first.
    let mut inbound = MessageBuffer::new(encoding, hub.config.max_message_bytes);
    let mut flow = if leftover.is_empty() {
        Flow::Continue
    } else {
        process_frame(&hub, &conn, &mut inbound, &leftover).await
    };
    while let Flow::Continue = flow {
        flow = tokio::select! {
            _ = hub.shutdown_token().cancelled() => Flow::Close(Some(Close {
                error: None,
                allow_reconnect: true,
            })),
            _ = conn.closing() => {
                debug!(conn_id = %id, "Connection closed by the hub");
                Flow::Close(None)
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    process_frame(&hub, &conn, &mut inbound, text.as_bytes()).await
                }
                Some(Ok(Message::Binary(data))) => {
                    process_frame(&hub, &conn, &mut inbound, &data).await
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id = %id, "Client closed connection");
                    Flow::Close(None)
                }
                Some(Ok(_)) => Flow::Continue,
                Some(Err(e)) => {
                    warn!(conn_id = %id, error = %e, "WebSocket error");
                    Flow::Close(None)
                }
            },
        };
    }

    // Closing: the final message must be queued before the writer starts draining.
    if let Flow::Close(Some(close)) = flow {
        if let Err(e) = sink.try_enqueue(&HubMessage::Close(close)) {
            debug!(conn_id = %id, error = %e, "Could not queue close message");
        }
    }
    conn.begin_close();
    match tokio::time::timeout(hub.config.drain_timeout, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(conn_id = %id, error = %e, "Writer task failed"),
        Err(_) => {
            warn!(conn_id = %id, "Writer did not drain before the timeout");
            writer_abort.abort();
        }
    }

    // Closed
    conn.mark_closed();
    hub.registry.unregister(&id).await;
    hub.metrics.connection_closed();
    info!(conn_id = %id, "Client disconnected");
}

/// Accumulate frames until a full handshake request arrives and check it
/// names the configured protocol. Returns any bytes that followed it.
async fn read_handshake(
    receiver: &mut SplitStream<WebSocket>,
    expected: Encoding,
    max_bytes: usize,
) -> Result<Vec<u8>, HubError> {
    let mut buf = Vec::new();
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => buf.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(Message::Close(_))) | None => {
                return Err(HubError::Handshake(
                    "Connection closed before the handshake completed.".into(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(HubError::Handshake(format!("Transport error: {e}"))),
        }

        if buf.len() > max_bytes {
            return Err(HubError::Handshake(
                "Handshake request exceeds the maximum message size.".into(),
            ));
        }

        let (request, rest) = match handshake::parse_request(&buf) {
            Ok(parsed) => parsed,
            Err(ProtocolError::Incomplete) => continue,
            Err(e) => {
                return Err(HubError::Handshake(format!(
                    "Handshake request is malformed: {e}"
                )));
            }
        };

        return match request.encoding() {
            Ok(encoding) if encoding == expected => Ok(rest.to_vec()),
            Err(ProtocolError::UnsupportedVersion { protocol, version }) => {
                Err(HubError::Handshake(format!(
                    "The server does not support version {version} of the '{protocol}' protocol."
                )))
            }
            _ => Err(HubError::Handshake(format!(
                "The protocol '{}' is not supported.",
                request.protocol
            ))),
        };
    }
}

/// Answer a failed handshake with an error response and close the socket.
async fn reject(
    mut ws_sender: SplitSink<WebSocket, Message>,
    hub: &Hub,
    id: &ConnectionId,
    error: HubError,
) {
    hub.metrics.handshake_failed();
    warn!(conn_id = %id, code = error.error_code(), error = %error, "Rejecting connection");

    let reason = match &error {
        HubError::Handshake(reason) => reason.clone(),
        other => other.to_string(),
    };
    let response = handshake::write_response(Some(&reason));
    if let Ok(response) = frame(hub.config.encoding.transfer_format(), response) {
        let _ = ws_sender.send(response).await;
    }
    let _ = ws_sender.close().await;
}

/// Feed one inbound frame to the buffer and dispatch the messages it
/// completed, in order.
async fn process_frame(
    hub: &Hub,
    conn: &ClientConnection,
    inbound: &mut MessageBuffer,
    data: &[u8],
) -> Flow {
    let messages = match inbound.push(data) {
        Ok(messages) => messages,
        Err(e) => {
            hub.metrics.protocol_error();
            let error = HubError::from(e);
            warn!(conn_id = %conn.id(), code = error.error_code(), error = %error, "Malformed frame");
            return Flow::Close(Some(Close {
                error: Some(format!("Connection closed with an error. {error}")),
                allow_reconnect: false,
            }));
        }
    };

    for message in messages {
        hub.metrics.message_received();
        match message {
            HubMessage::Invocation(invocation) => {
                let Some(completion) = hub.invoke(conn.id(), invocation).await else {
                    continue;
                };
                if let Err(e) = conn.send(completion.into(), hub.config.send_timeout).await {
                    warn!(conn_id = %conn.id(), error = %e, "Failed to send completion");
                    return Flow::Close(None);
                }
            }
            HubMessage::Ping => {}
            HubMessage::Close(close) => {
                debug!(conn_id = %conn.id(), error = ?close.error, "Client sent close message");
                return Flow::Close(None);
            }
            other => {
                debug!(conn_id = %conn.id(), message_type = other.type_code(), "Ignoring message");
            }
        }
    }
    Flow::Continue
}

/// Forward queued frames to the socket. When the connection starts closing,
/// flush what is already queued, then close the socket.
async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    closing: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = closing.cancelled() => break,
        };
        let Some(frame) = frame else { break };
        if ws_sender.send(frame).await.is_err() {
            // Wakes the reader so the connection closes.
            closing.cancel();
            return;
        }
    }

    outbound.close();
    while let Some(frame) = outbound.recv().await {
        if ws_sender.send(frame).await.is_err() {
            return;
        }
    }
    let _ = ws_sender.close().await;
}
