//! MessagePack hub protocol.
//!
//! Each message is a varint length prefix followed by a MessagePack array:
//!
//! - Invocation: `[1, headers, invocationId | nil, target, arguments, streamIds]`
//! - Completion: `[3, headers, invocationId, resultKind, result?]`
//!   where resultKind is 1 (error), 2 (void) or 3 (result)
//! - Ping: `[6]`
//! - Close: `[7, error | nil, allowReconnect]`

use rmpv::Value;

use crate::encoding::{read_length_prefix, write_length_prefix};
use crate::error::ProtocolError;
use crate::message::{
    Argument, Close, Completion, CompletionOutcome, HubMessage, Invocation, MessageType,
};

const RESULT_KIND_ERROR: u8 = 1;
const RESULT_KIND_VOID: u8 = 2;
const RESULT_KIND_VALUE: u8 = 3;

/// Serialize one message, length prefix included.
pub fn write_message(message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
    let array = match message {
        HubMessage::Invocation(inv) => vec![
            Value::from(MessageType::Invocation as u8),
            Value::Map(Vec::new()),
            inv.invocation_id
                .as_deref()
                .map_or(Value::Nil, Value::from),
            Value::from(inv.target.as_str()),
            Value::Array(inv.arguments.iter().map(to_value).collect()),
            Value::Array(Vec::new()),
        ],
        HubMessage::Completion(c) => {
            let mut fields = vec![
                Value::from(MessageType::Completion as u8),
                Value::Map(Vec::new()),
                Value::from(c.invocation_id.as_str()),
            ];
            match &c.outcome {
                CompletionOutcome::Error(e) => {
                    fields.push(Value::from(RESULT_KIND_ERROR));
                    fields.push(Value::from(e.as_str()));
                }
                CompletionOutcome::Void => fields.push(Value::from(RESULT_KIND_VOID)),
                CompletionOutcome::Result(arg) => {
                    fields.push(Value::from(RESULT_KIND_VALUE));
                    fields.push(to_value(arg));
                }
            }
            fields
        }
        HubMessage::Ping => vec![Value::from(MessageType::Ping as u8)],
        HubMessage::Close(close) => vec![
            Value::from(MessageType::Close as u8),
            close.error.as_deref().map_or(Value::Nil, Value::from),
            Value::from(close.allow_reconnect),
        ],
        HubMessage::Unsupported(code) => {
            return Err(ProtocolError::invalid(format!(
                "cannot write message of type {code}"
            )));
        }
    };

    let body = rmp_serde::to_vec(&Value::Array(array))?;
    let mut out = Vec::with_capacity(body.len() + 5);
    write_length_prefix(body.len(), &mut out)?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Length of the longest prefix of `input` made of whole length-prefixed
/// messages. A malformed prefix is an error; a truncated one just ends the scan.
pub fn complete_len(input: &[u8]) -> Result<usize, ProtocolError> {
    let mut consumed = 0;
    loop {
        let remaining = &input[consumed..];
        let (len, prefix_len) = match read_length_prefix(remaining) {
            Ok(parsed) => parsed,
            Err(ProtocolError::Incomplete) => return Ok(consumed),
            Err(e) => return Err(e),
        };
        match prefix_len.checked_add(len) {
            Some(end) if end <= remaining.len() => consumed += end,
            _ => return Ok(consumed),
        }
    }
}

/// Parse every length-prefixed message in `input`.
pub fn parse_messages(input: &[u8]) -> Result<Vec<HubMessage>, ProtocolError> {
    let mut messages = Vec::new();
    let mut remaining = input;
    while !remaining.is_empty() {
        let (len, prefix_len) = read_length_prefix(remaining)?;
        let end = prefix_len
            .checked_add(len)
            .ok_or(ProtocolError::Incomplete)?;
        if remaining.len() < end {
            return Err(ProtocolError::Incomplete);
        }
        let value: Value = rmp_serde::from_slice(&remaining[prefix_len..end])?;
        messages.push(parse_message(value)?);
        remaining = &remaining[end..];
    }
    Ok(messages)
}

fn parse_message(value: Value) -> Result<HubMessage, ProtocolError> {
    let Value::Array(fields) = value else {
        return Err(ProtocolError::invalid("message was not an array"));
    };
    let code = fields
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::invalid("reading 'type' as integer failed"))?;

    match MessageType::from_code(code) {
        Some(MessageType::Invocation) => parse_invocation(fields).map(HubMessage::Invocation),
        Some(MessageType::Completion) => parse_completion(fields).map(HubMessage::Completion),
        Some(MessageType::Ping) => Ok(HubMessage::Ping),
        Some(MessageType::Close) => parse_close(fields).map(HubMessage::Close),
        _ => Ok(HubMessage::Unsupported(u8::try_from(code).unwrap_or(u8::MAX))),
    }
}

fn parse_invocation(fields: Vec<Value>) -> Result<Invocation, ProtocolError> {
    if fields.len() < 5 {
        return Err(ProtocolError::invalid(
            "invocation message has too few properties",
        ));
    }
    let mut fields = fields.into_iter().skip(2);
    let invocation_id = optional_string(fields.next(), "invocationId")?;
    let target = optional_string(fields.next(), "target")?
        .ok_or_else(|| ProtocolError::invalid("reading 'target' as string failed"))?;
    let arguments = match fields.next() {
        Some(Value::Array(args)) => args
            .into_iter()
            .map(from_value)
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(ProtocolError::invalid("reading 'arguments' as array failed")),
    };
    Ok(Invocation {
        invocation_id,
        target,
        arguments,
    })
}

fn parse_completion(fields: Vec<Value>) -> Result<Completion, ProtocolError> {
    if fields.len() < 4 {
        return Err(ProtocolError::invalid(
            "completion message has too few properties",
        ));
    }
    let mut fields = fields.into_iter().skip(2);
    let invocation_id = optional_string(fields.next(), "invocationId")?
        .ok_or_else(|| ProtocolError::invalid("reading 'invocationId' as string failed"))?;
    let kind = fields
        .next()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ProtocolError::invalid("reading 'result_kind' as integer failed"))?;

    let outcome = match u8::try_from(kind) {
        Ok(RESULT_KIND_VOID) => CompletionOutcome::Void,
        Ok(RESULT_KIND_ERROR) => match fields.next() {
            Some(Value::String(s)) => CompletionOutcome::Error(
                s.into_str()
                    .ok_or_else(|| ProtocolError::invalid("'error' is not valid utf-8"))?,
            ),
            Some(_) => return Err(ProtocolError::invalid("reading 'error' as string failed")),
            None => {
                return Err(ProtocolError::invalid(
                    "completion message has too few properties",
                ));
            }
        },
        Ok(RESULT_KIND_VALUE) => match fields.next() {
            Some(v) => CompletionOutcome::Result(from_value(v)?),
            None => {
                return Err(ProtocolError::invalid(
                    "completion message has too few properties",
                ));
            }
        },
        _ => {
            return Err(ProtocolError::invalid(format!(
                "unknown completion result kind {kind}"
            )));
        }
    };
    Ok(Completion {
        invocation_id,
        outcome,
    })
}

fn parse_close(fields: Vec<Value>) -> Result<Close, ProtocolError> {
    let mut fields = fields.into_iter().skip(1);
    let error = optional_string(fields.next(), "error")?;
    let allow_reconnect = match fields.next() {
        None | Some(Value::Nil) => false,
        Some(Value::Boolean(b)) => b,
        Some(_) => {
            return Err(ProtocolError::invalid(
                "reading 'allowReconnect' as boolean failed",
            ));
        }
    };
    Ok(Close {
        error,
        allow_reconnect,
    })
}

fn optional_string(value: Option<Value>, field: &str) -> Result<Option<String>, ProtocolError> {
    match value {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::String(s)) => s
            .into_str()
            .map(Some)
            .ok_or_else(|| ProtocolError::invalid(format!("'{field}' is not valid utf-8"))),
        Some(_) => Err(ProtocolError::invalid(format!(
            "reading '{field}' as string failed"
        ))),
    }
}

fn to_value(arg: &Argument) -> Value {
    match arg {
        Argument::Null => Value::Nil,
        Argument::Bool(b) => Value::from(*b),
        Argument::Int(i) => Value::from(*i),
        Argument::Float(f) => Value::from(*f),
        Argument::Text(s) => Value::from(s.as_str()),
        Argument::Binary(bytes) => Value::Binary(bytes.clone()),
        Argument::Array(items) => Value::Array(items.iter().map(to_value).collect()),
        Argument::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), to_value(v)))
                .collect(),
        ),
    }
}

fn from_value(value: Value) -> Result<Argument, ProtocolError> {
    Ok(match value {
        Value::Nil => Argument::Null,
        Value::Boolean(b) => Argument::Bool(b),
        Value::Integer(i) => match i.as_i64() {
            Some(v) => Argument::Int(v),
            None => Argument::Float(i.as_f64().unwrap_or(f64::NAN)),
        },
        Value::F32(f) => Argument::Float(f64::from(f)),
        Value::F64(f) => Argument::Float(f),
        Value::String(s) => Argument::Text(
            s.into_str()
                .ok_or_else(|| ProtocolError::invalid("string argument is not valid utf-8"))?,
        ),
        Value::Binary(bytes) => Argument::Binary(bytes),
        Value::Array(items) => Argument::Array(
            items
                .into_iter()
                .map(from_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => Argument::Map(
            entries
                .into_iter()
                .map(|(k, v)| match k {
                    Value::String(key) => key
                        .into_str()
                        .ok_or_else(|| ProtocolError::invalid("map key is not valid utf-8"))
                        .and_then(|key| Ok((key, from_value(v)?))),
                    _ => Err(ProtocolError::invalid("map keys must be strings")),
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Ext(tag, _) => {
            return Err(ProtocolError::invalid(format!(
                "extension type {tag} is not supported"
            )));
        }
    })
}
