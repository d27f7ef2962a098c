//! Hub message model shared by both encodings.

/// Terminates every JSON hub message and the handshake.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Numeric message type carried as the first field of every hub message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Invocation),
            2 => Some(Self::StreamItem),
            3 => Some(Self::Completion),
            4 => Some(Self::StreamInvocation),
            5 => Some(Self::CancelInvocation),
            6 => Some(Self::Ping),
            7 => Some(Self::Close),
            _ => None,
        }
    }
}

/// A single invocation argument or completion result.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
    Array(Vec<Argument>),
    Map(Vec<(String, Argument)>),
}

impl Argument {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
            Self::Binary(_) => "binary",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Argument {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Argument {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Call of a hub method (client → server) or a client method (server → client).
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Present when the caller expects a `Completion`.
    pub invocation_id: Option<String>,
    pub target: String,
    pub arguments: Vec<Argument>,
}

impl Invocation {
    /// Non-blocking invocation (no completion expected).
    pub fn new(target: impl Into<String>, arguments: Vec<Argument>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Void,
    Result(Argument),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub invocation_id: String,
    pub outcome: CompletionOutcome,
}

impl Completion {
    pub fn void(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            outcome: CompletionOutcome::Void,
        }
    }

    pub fn error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            outcome: CompletionOutcome::Error(error.into()),
        }
    }
}

/// Sent by either side before it closes the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Close {
    pub error: Option<String>,
    pub allow_reconnect: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    Completion(Completion),
    Ping,
    Close(Close),
    /// Stream messages and future types: decoded so they can be skipped.
    Unsupported(u8),
}

impl HubMessage {
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Invocation(_) => MessageType::Invocation as u8,
            Self::Completion(_) => MessageType::Completion as u8,
            Self::Ping => MessageType::Ping as u8,
            Self::Close(_) => MessageType::Close as u8,
            Self::Unsupported(code) => *code,
        }
    }
}

impl From<Invocation> for HubMessage {
    fn from(invocation: Invocation) -> Self {
        Self::Invocation(invocation)
    }
}

impl From<Completion> for HubMessage {
    fn from(completion: Completion) -> Self {
        Self::Completion(completion)
    }
}

impl From<Close> for HubMessage {
    fn from(close: Close) -> Self {
        Self::Close(close)
    }
}
