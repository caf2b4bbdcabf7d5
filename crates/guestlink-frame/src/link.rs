//! Framing for the reconnecting channel.
//!
//! Each frame starts with one big-endian word packing an 8-bit type and a
//! 24-bit body length:
//!
//! ```text
//! ┌──────────┬───────────────────┬──────────────────┐
//! │ Type(1B) │ Length (3B, BE)   │ Body (DATA only) │
//! └──────────┴───────────────────┴──────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Link header size.
pub const LINK_HEADER_SIZE: usize = 4;

/// Largest body a single link frame can carry.
pub const MAX_LINK_PAYLOAD: usize = 0x00FF_FFFF;

const TYPE_PING: u8 = 0;
const TYPE_PONG: u8 = 1;
const TYPE_DATA: u8 = 3;

/// A reconnecting-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// Keep-alive probe.
    Ping,
    /// Keep-alive answer.
    Pong,
    /// A chunk of stream data.
    Data(Bytes),
}

impl LinkFrame {
    fn type_byte(&self) -> u8 {
        match self {
            Self::Ping => TYPE_PING,
            Self::Pong => TYPE_PONG,
            Self::Data(_) => TYPE_DATA,
        }
    }
}

/// `tokio_util` codec for [`LinkFrame`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkCodec;

impl Decoder for LinkCodec {
    type Item = LinkFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LinkFrame>> {
        if src.len() < LINK_HEADER_SIZE {
            return Ok(None);
        }

        let word = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let frame_type = (word >> 24) as u8;
        let len = (word & 0x00FF_FFFF) as usize;

        match frame_type {
            TYPE_PING | TYPE_PONG => {
                // Control frames have no body; skip one if a peer sent it anyway.
                if src.len() < LINK_HEADER_SIZE + len {
                    src.reserve(LINK_HEADER_SIZE + len - src.len());
                    return Ok(None);
                }
                src.advance(LINK_HEADER_SIZE + len);
                Ok(Some(if frame_type == TYPE_PING {
                    LinkFrame::Ping
                } else {
                    LinkFrame::Pong
                }))
            }
            TYPE_DATA => {
                if src.len() < LINK_HEADER_SIZE + len {
                    src.reserve(LINK_HEADER_SIZE + len - src.len());
                    return Ok(None);
                }
                src.advance(LINK_HEADER_SIZE);
                Ok(Some(LinkFrame::Data(src.split_to(len).freeze())))
            }
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LinkFrame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<LinkFrame> for LinkCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: LinkFrame, dst: &mut BytesMut) -> Result<()> {
        let body: &[u8] = match &frame {
            LinkFrame::Data(body) => body.as_ref(),
            LinkFrame::Ping | LinkFrame::Pong => &[],
        };
        if body.len() > MAX_LINK_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: MAX_LINK_PAYLOAD,
            });
        }

        dst.reserve(LINK_HEADER_SIZE + body.len());
        dst.put_u32((u32::from(frame.type_byte()) << 24) | body.len() as u32);
        dst.put_slice(body);
        Ok(())
    }
}
