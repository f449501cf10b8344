use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::DataMessage;

/// Header: magic (2) + length (4) + group (1) + id (1).
pub const HEADER_SIZE: usize = 8;

/// Magic bytes `"IB"`.
pub const MAGIC: [u8; 2] = [0x49, 0x42];

/// Default payload limit: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Append the wire form of `message` to `dst`.
///
/// ```text
/// ┌────────────┬────────────┬───────┬──────┬──────────────┐
/// │ Magic (2B) │ Length     │ Group │ Id   │ Payload      │
/// │ "IB"       │ (4B LE)    │ (1B)  │ (1B) │ (Length B)   │
/// └────────────┴────────────┴───────┴──────┴──────────────┘
/// ```
pub fn encode_message(message: &DataMessage, dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(message.size()).map_err(|_| FrameError::PayloadTooLarge {
        size: message.size(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(message.wire_size());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_u8(message.group);
    dst.put_u8(message.id);
    dst.put_slice(&message.payload);
    Ok(())
}

/// Decode one message from the front of `src`.
///
/// Returns `Ok(None)` until a complete message is buffered; consumed bytes are
/// removed from `src` only on success.
pub fn decode_message(src: &mut BytesMut, max_payload: usize) -> Result<Option<DataMessage>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    let group = src[6];
    let id = src[7];
    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(DataMessage { group, id, payload }))
}

/// Limits and timeouts shared by [`MessageReader`](crate::MessageReader) and
/// [`MessageWriter`](crate::MessageWriter).
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted payload. Default: 16 MiB.
    pub max_payload_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
