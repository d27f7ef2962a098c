//! Handshake exchanged before any hub message.
//!
//! The client opens with `{"protocol":"json","version":1}` followed by the record
//! separator. The server answers `{}` on success or `{"error":"..."}` on failure.
//! The handshake is always JSON, whichever encoding it selects.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::RECORD_SEPARATOR;
use crate::protocol::Encoding;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            protocol: encoding.name().to_string(),
            version: encoding.version(),
        }
    }

    /// Resolve the requested protocol, rejecting unknown names and versions.
    pub fn encoding(&self) -> Result<Encoding, ProtocolError> {
        let encoding: Encoding = self.protocol.parse()?;
        if self.version != encoding.version() {
            return Err(ProtocolError::UnsupportedVersion {
                protocol: self.protocol.clone(),
                version: self.version,
            });
        }
        Ok(encoding)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Split the handshake off the front of a frame.
///
/// Returns the request and whatever followed the separator (hub messages the
/// client sent in the same frame).
pub fn parse_request(input: &[u8]) -> Result<(HandshakeRequest, &[u8]), ProtocolError> {
    let (body, rest) = split_record(input)?;
    Ok((serde_json::from_slice(body)?, rest))
}

pub fn write_request(request: &HandshakeRequest) -> Result<Vec<u8>, ProtocolError> {
    let mut out = serde_json::to_vec(request)?;
    out.push(RECORD_SEPARATOR);
    Ok(out)
}

pub fn parse_response(input: &[u8]) -> Result<(HandshakeResponse, &[u8]), ProtocolError> {
    let (body, rest) = split_record(input)?;
    Ok((serde_json::from_slice(body)?, rest))
}

/// `{}` on success, `{"error":"..."}` otherwise.
pub fn write_response(error: Option<&str>) -> Vec<u8> {
    let mut out = match error {
        Some(e) => serde_json::json!({ "error": e }).to_string().into_bytes(),
        None => b"{}".to_vec(),
    };
    out.push(RECORD_SEPARATOR);
    out
}

fn split_record(input: &[u8]) -> Result<(&[u8], &[u8]), ProtocolError> {
    let pos = input
        .iter()
        .position(|b| *b == RECORD_SEPARATOR)
        .ok_or(ProtocolError::Incomplete)?;
    Ok((&input[..pos], &input[pos + 1..]))
}
