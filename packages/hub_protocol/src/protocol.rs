//! Wire encoding selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::message::HubMessage;
use crate::{json, messagepack};

/// Every supported hub protocol is at version 1.
pub const PROTOCOL_VERSION: u32 = 1;

/// WebSocket frame kind a protocol needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferFormat {
    Text,
    Binary,
}

/// Hub message serialization, chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    MessagePack,
}

impl Encoding {
    /// Name used in the handshake `protocol` field.
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "messagepack",
        }
    }

    pub fn version(self) -> u32 {
        PROTOCOL_VERSION
    }

    pub fn transfer_format(self) -> TransferFormat {
        match self {
            Self::Json => TransferFormat::Text,
            Self::MessagePack => TransferFormat::Binary,
        }
    }

    pub fn write_message(self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Json => json::write_message(message),
            Self::MessagePack => messagepack::write_message(message),
        }
    }

    /// How many leading bytes of `input` form whole messages.
    pub fn complete_len(self, input: &[u8]) -> Result<usize, ProtocolError> {
        match self {
            Self::Json => Ok(json::complete_len(input)),
            Self::MessagePack => messagepack::complete_len(input),
        }
    }

    pub fn parse_messages(self, input: &[u8]) -> Result<Vec<HubMessage>, ProtocolError> {
        match self {
            Self::Json => json::parse_messages(input),
            Self::MessagePack => messagepack::parse_messages(input),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "messagepack" | "msgpack" => Ok(Self::MessagePack),
            _ => Err(ProtocolError::UnsupportedProtocol(s.to_string())),
        }
    }
}
