//! Hub wire protocol: handshake, message model, and the JSON and MessagePack codecs.

pub mod buffer;
pub mod encoding;
pub mod error;
pub mod handshake;
pub mod json;
pub mod message;
pub mod messagepack;
pub mod protocol;

pub use buffer::MessageBuffer;
pub use error::ProtocolError;
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use message::{
    Argument, Close, Completion, CompletionOutcome, HubMessage, Invocation, MessageType,
    RECORD_SEPARATOR,
};
pub use protocol::{Encoding, TransferFormat};
