use bytes::{Buf, BufMut};

use super::{Message, MessageType};
use crate::error::{ProviderError, Result};

const MAGIC: &[u8; 2] = b"##";

/// `"##"`, u16 message type, u32 payload length (both big-endian).
pub const HEADER_LEN: usize = 8;

impl Message {
    /// Size of the framed message, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        let payload_len = u32::try_from(self.payload_len()).map_err(|_| {
            ProviderError::Protocol(format!("{:?} payload too large", self.message_type()))
        })?;
        buf.put_slice(MAGIC);
        buf.put_u16(self.message_type() as u16);
        buf.put_u32(payload_len);
        self.encode_payload(buf)?;
        Ok(())
    }

    /// Decode one framed message. Bytes after the payload (report padding) are left in `buf`.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ProviderError::Protocol(format!(
                "frame too short: {} bytes",
                buf.len()
            )));
        }
        if &buf[..2] != MAGIC {
            return Err(ProviderError::Protocol("missing frame magic".to_string()));
        }
        buf.advance(2);

        let kind = buf.get_u16();
        let len = buf.get_u32() as usize;
        let kind = MessageType::from_u16(kind)
            .ok_or_else(|| ProviderError::Protocol(format!("unknown message type {}", kind)))?;

        if buf.len() < len {
            return Err(ProviderError::Protocol(format!(
                "truncated {:?}: expected {} payload bytes, got {}",
                kind,
                len,
                buf.len()
            )));
        }

        let data: &[u8] = *buf;
        let (payload, rest) = data.split_at(len);
        let msg = Message::decode_payload(kind, payload)?;
        *buf = rest;
        Ok(msg)
    }
}
