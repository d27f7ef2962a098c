//! WebSocket side of the hub: handshake, per-connection state machine and
//! the outbound writer.

mod connection;
mod sink;

pub use connection::handle_connection;
