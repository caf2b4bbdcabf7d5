use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Frame header: key (4) + version (1) + flags (1) + length (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum session payload size.
pub const MAX_PAYLOAD: usize = 65_000;

/// A session frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Routing key.
    pub key: u32,
    /// Protocol version on HELLO, zero otherwise.
    pub version: u8,
    /// Application-defined flags.
    pub flags: u8,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with a zero version byte.
    pub fn new(key: u32, flags: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            key,
            version: 0,
            flags,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬─────────┬────────┬──────────┬──────────────────┐
/// │ Key       │ Version │ Flags  │ Length   │ Payload          │
/// │ (4B LE)   │ (1B)    │ (1B)   │ (2B LE)  │ (Length bytes)   │
/// └───────────┴─────────┴────────┴──────────┴──────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(frame.wire_size());
    dst.put_u32_le(frame.key);
    dst.put_u8(frame.version);
    dst.put_u8(frame.flags);
    dst.put_u16_le(frame.payload.len() as u16);
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let payload_len = u16::from_le_bytes([src[6], src[7]]) as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let key = src.get_u32_le();
    let version = src.get_u8();
    let flags = src.get_u8();
    src.advance(2);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        key,
        version,
        flags,
        payload,
    }))
}

/// `tokio_util` codec for session frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCodec;

impl Decoder for SessionCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match decode_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for SessionCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&frame, dst)
    }
}
