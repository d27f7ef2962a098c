//! JSON hub protocol.
//!
//! Each message is a JSON object followed by [`RECORD_SEPARATOR`]. A frame may
//! carry several messages. Binary arguments travel as base64 strings.

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::encoding::base64_encode;
use crate::error::ProtocolError;
use crate::message::{
    Argument, Close, Completion, CompletionOutcome, HubMessage, Invocation, MessageType,
    RECORD_SEPARATOR,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationFrame<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    target: &'a str,
    arguments: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionFrame<'a> {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseFrame<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    allow_reconnect: bool,
}

#[derive(Serialize)]
struct PingFrame {
    #[serde(rename = "type")]
    kind: u8,
}

/// Serialize one message, record separator included.
pub fn write_message(message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut out = match message {
        HubMessage::Invocation(inv) => serde_json::to_vec(&InvocationFrame {
            kind: MessageType::Invocation as u8,
            invocation_id: inv.invocation_id.as_deref(),
            target: &inv.target,
            arguments: inv.arguments.iter().map(to_json).collect(),
        })?,
        HubMessage::Completion(c) => {
            let (error, result) = match &c.outcome {
                CompletionOutcome::Void => (None, None),
                CompletionOutcome::Result(arg) => (None, Some(to_json(arg))),
                CompletionOutcome::Error(e) => (Some(e.as_str()), None),
            };
            serde_json::to_vec(&CompletionFrame {
                kind: MessageType::Completion as u8,
                invocation_id: &c.invocation_id,
                error,
                result,
            })?
        }
        HubMessage::Ping => serde_json::to_vec(&PingFrame {
            kind: MessageType::Ping as u8,
        })?,
        HubMessage::Close(close) => serde_json::to_vec(&CloseFrame {
            kind: MessageType::Close as u8,
            error: close.error.as_deref(),
            allow_reconnect: close.allow_reconnect,
        })?,
        HubMessage::Unsupported(code) => {
            return Err(ProtocolError::invalid(format!(
                "cannot write message of type {code}"
            )));
        }
    };
    out.push(RECORD_SEPARATOR);
    Ok(out)
}

/// Length of the longest prefix of `input` made of whole records.
pub fn complete_len(input: &[u8]) -> usize {
    input
        .iter()
        .rposition(|b| *b == RECORD_SEPARATOR)
        .map_or(0, |pos| pos + 1)
}

/// Parse every complete message in `input`.
///
/// The input must end with a record separator; trailing partial data is an
/// `Incomplete` error rather than being silently dropped.
pub fn parse_messages(input: &[u8]) -> Result<Vec<HubMessage>, ProtocolError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if input.last() != Some(&RECORD_SEPARATOR) {
        return Err(ProtocolError::Incomplete);
    }
    input[..input.len() - 1]
        .split(|b| *b == RECORD_SEPARATOR)
        .map(parse_message)
        .collect()
}

fn parse_message(bytes: &[u8]) -> Result<HubMessage, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(obj) = value else {
        return Err(ProtocolError::invalid("message was not an object"));
    };

    let code = obj
        .get("type")
        .ok_or_else(|| ProtocolError::invalid("field 'type' not found"))?
        .as_u64()
        .ok_or_else(|| ProtocolError::invalid("expected 'type' to be an integer"))?;

    match MessageType::from_code(code) {
        Some(MessageType::Invocation) => parse_invocation(&obj).map(HubMessage::Invocation),
        Some(MessageType::Completion) => parse_completion(&obj).map(HubMessage::Completion),
        Some(MessageType::Ping) => Ok(HubMessage::Ping),
        Some(MessageType::Close) => parse_close(&obj).map(HubMessage::Close),
        _ => Ok(HubMessage::Unsupported(u8::try_from(code).unwrap_or(u8::MAX))),
    }
}

fn parse_invocation(obj: &Map<String, Value>) -> Result<Invocation, ProtocolError> {
    let target = match obj.get("target") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(ProtocolError::invalid("expected 'target' to be a string")),
        None => {
            return Err(ProtocolError::invalid(
                "field 'target' not found for 'invocation' message",
            ));
        }
    };
    let arguments = match obj.get("arguments") {
        Some(Value::Array(args)) => args.iter().map(from_json).collect(),
        Some(_) => return Err(ProtocolError::invalid("expected 'arguments' to be an array")),
        None => {
            return Err(ProtocolError::invalid(
                "field 'arguments' not found for 'invocation' message",
            ));
        }
    };
    Ok(Invocation {
        invocation_id: optional_string(obj, "invocationId")?,
        target,
        arguments,
    })
}

fn parse_completion(obj: &Map<String, Value>) -> Result<Completion, ProtocolError> {
    let invocation_id = optional_string(obj, "invocationId")?.ok_or_else(|| {
        ProtocolError::invalid("field 'invocationId' not found for 'completion' message")
    })?;
    let outcome = if let Some(error) = optional_string(obj, "error")? {
        CompletionOutcome::Error(error)
    } else if let Some(result) = obj.get("result") {
        CompletionOutcome::Result(from_json(result))
    } else {
        CompletionOutcome::Void
    };
    Ok(Completion {
        invocation_id,
        outcome,
    })
}

fn parse_close(obj: &Map<String, Value>) -> Result<Close, ProtocolError> {
    let allow_reconnect = match obj.get("allowReconnect") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(ProtocolError::invalid(
                "expected 'allowReconnect' to be a boolean",
            ));
        }
    };
    Ok(Close {
        error: optional_string(obj, "error")?,
        allow_reconnect,
    })
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, ProtocolError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProtocolError::invalid(format!(
            "expected '{key}' to be a string"
        ))),
    }
}

fn to_json(arg: &Argument) -> Value {
    match arg {
        Argument::Null => Value::Null,
        Argument::Bool(b) => Value::Bool(*b),
        Argument::Int(i) => Value::Number((*i).into()),
        Argument::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Argument::Text(s) => Value::String(s.clone()),
        Argument::Binary(bytes) => Value::String(base64_encode(bytes)),
        Argument::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        Argument::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

fn from_json(value: &Value) -> Argument {
    match value {
        Value::Null => Argument::Null,
        Value::Bool(b) => Argument::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Argument::Int(i),
            None => Argument::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Argument::Text(s.clone()),
        Value::Array(items) => Argument::Array(items.iter().map(from_json).collect()),
        Value::Object(obj) => Argument::Map(
            obj.iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect(),
        ),
    }
}
