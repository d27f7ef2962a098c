//! Protocol error type and stable error codes.

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("incomplete message")]
    Incomplete,

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("messagepack decode: {0}")]
    MessagePackDecode(#[from] rmp_serde::decode::Error),

    #[error("messagepack encode: {0}")]
    MessagePackEncode(#[from] rmp_serde::encode::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),

    #[error("unsupported version {version} for protocol '{protocol}'")]
    UnsupportedVersion { protocol: String, version: u32 },
}

impl ProtocolError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Json(_) => "json",
            Self::MessagePackDecode(_) => "messagepack_decode",
            Self::MessagePackEncode(_) => "messagepack_encode",
            Self::InvalidMessage(_) => "invalid_message",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::UnsupportedProtocol(_) => "unsupported_protocol",
            Self::UnsupportedVersion { .. } => "unsupported_version",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(ProtocolError::Incomplete.error_code(), "incomplete");
        assert_eq!(
            ProtocolError::UnsupportedProtocol("xml".into()).error_code(),
            "unsupported_protocol"
        );
        assert_eq!(
            ProtocolError::MessageTooLarge { size: 10, max: 5 }.error_code(),
            "message_too_large"
        );
    }

    #[test]
    fn display_includes_details() {
        let err = ProtocolError::UnsupportedVersion {
            protocol: "json".into(),
            version: 2,
        };
        assert_eq!(err.to_string(), "unsupported version 2 for protocol 'json'");
    }
}
