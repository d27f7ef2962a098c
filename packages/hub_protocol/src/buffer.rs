//! Reassembly of hub messages that span transport frames.
//!
//! A WebSocket frame may end mid-message. [`MessageBuffer`] keeps the unfinished
//! tail and hands out messages only once they are whole.

use crate::error::ProtocolError;
use crate::message::HubMessage;
use crate::protocol::Encoding;

#[derive(Debug)]
pub struct MessageBuffer {
    encoding: Encoding,
    max_pending: usize,
    pending: Vec<u8>,
}

impl MessageBuffer {
    /// `max_pending` caps the bytes of a message still waiting for its end.
    pub fn new(encoding: Encoding, max_pending: usize) -> Self {
        Self {
            encoding,
            max_pending,
            pending: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append `frame` and return every message it completed, in order.
    pub fn push(&mut self, frame: &[u8]) -> Result<Vec<HubMessage>, ProtocolError> {
        self.pending.extend_from_slice(frame);
        let complete = self.encoding.complete_len(&self.pending)?;
        let messages = self.encoding.parse_messages(&self.pending[..complete])?;
        self.pending.drain(..complete);

        if self.pending.len() > self.max_pending {
            return Err(ProtocolError::MessageTooLarge {
                size: self.pending.len(),
                max: self.max_pending,
            });
        }
        Ok(messages)
    }
}
