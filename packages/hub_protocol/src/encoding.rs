//! Shared encoding helpers: standard base64 and the varint length prefix.

use crate::error::ProtocolError;

/// Largest payload a length prefix may announce (2 GiB - 1).
pub const MAX_PREFIXED_LENGTH: usize = i32::MAX as usize;

/// A varint prefix never needs more than 5 bytes for `MAX_PREFIXED_LENGTH`.
const MAX_PREFIX_BYTES: usize = 5;

/// Standard base64 with padding, the form binary arguments take in JSON.
pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    data_encoding::BASE64.encode(bytes)
}

/// Append `len` as a varint: 7 bits per byte, least significant group first,
/// high bit set on every byte except the last.
pub fn write_length_prefix(len: usize, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if len > MAX_PREFIXED_LENGTH {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_PREFIXED_LENGTH,
        });
    }
    let mut remaining = len;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if remaining == 0 {
            return Ok(());
        }
    }
}

/// Read a varint length prefix from the front of `input`.
///
/// Returns `(payload_len, prefix_len)`. `Incomplete` means more bytes are needed.
pub fn read_length_prefix(input: &[u8]) -> Result<(usize, usize), ProtocolError> {
    let mut len: usize = 0;
    for (i, &byte) in input.iter().take(MAX_PREFIX_BYTES).enumerate() {
        len |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            if len > MAX_PREFIXED_LENGTH {
                return Err(ProtocolError::MessageTooLarge {
                    size: len,
                    max: MAX_PREFIXED_LENGTH,
                });
            }
            return Ok((len, i + 1));
        }
    }
    if input.len() >= MAX_PREFIX_BYTES {
        return Err(ProtocolError::invalid("length prefix exceeds 5 bytes"));
    }
    Err(ProtocolError::Incomplete)
}
