//! Stdio stream-type headers, as spoken by HTTP attach/exec endpoints.
//!
//! ```text
//! ┌───────────────┬──────────────┬────────────────┬──────────────────┐
//! │ Stream (1B)   │ 0x00 ×3      │ Length (4B BE) │ Data             │
//! │ 0/1/2         │              │                │ (Length bytes)   │
//! └───────────────┴──────────────┴────────────────┴──────────────────┘
//! ```
//!
//! A TTY has no separate stdout/stderr, so TTY streams skip the header and
//! pass bytes through untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::address::Substream;
use crate::error::{FrameError, Result};

/// Stdio header size.
pub const STDIO_HEADER_SIZE: usize = 8;

/// Largest chunk accepted by the decoder: 16 MiB.
pub const MAX_STDIO_CHUNK: usize = 16 * 1024 * 1024;

/// Stream type carried in a stdio header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StdStream {
    /// Parse a header stream-type byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(FrameError::InvalidStreamType(other)),
        }
    }

    /// The stdio stream a data substream maps onto, if any.
    pub fn from_substream(substream: Substream) -> Option<Self> {
        match substream {
            Substream::Stdin => Some(Self::Stdin),
            Substream::Stdout => Some(Self::Stdout),
            Substream::Stderr => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// Encode a stdio header.
pub fn encode_header(stream: StdStream, len: u32) -> [u8; STDIO_HEADER_SIZE] {
    let len = len.to_be_bytes();
    [stream as u8, 0, 0, 0, len[0], len[1], len[2], len[3]]
}

/// Decode a stdio header into its stream type and chunk length.
pub fn decode_header(header: &[u8; STDIO_HEADER_SIZE]) -> Result<(StdStream, u32)> {
    let stream = StdStream::from_byte(header[0])?;
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Ok((stream, len))
}

/// One chunk of a multiplexed stdio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioChunk {
    pub stream: StdStream,
    pub data: Bytes,
}

/// `tokio_util` codec for stdio chunks.
///
/// In TTY mode every available byte is one `Stdout` chunk on decode, and
/// encoding writes data without a header.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioCodec {
    tty: bool,
}

impl StdioCodec {
    /// Codec for multiplexed (non-TTY) streams.
    pub fn multiplexed() -> Self {
        Self { tty: false }
    }

    /// Raw passthrough codec for TTY streams.
    pub fn tty() -> Self {
        Self { tty: true }
    }
}

impl Decoder for StdioCodec {
    type Item = StdioChunk;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StdioChunk>> {
        if self.tty {
            if src.is_empty() {
                return Ok(None);
            }
            let data = src.split().freeze();
            return Ok(Some(StdioChunk {
                stream: StdStream::Stdout,
                data,
            }));
        }

        if src.len() < STDIO_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; STDIO_HEADER_SIZE];
        header.copy_from_slice(&src[..STDIO_HEADER_SIZE]);
        let (stream, len) = decode_header(&header)?;
        let len = len as usize;
        if len > MAX_STDIO_CHUNK {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: MAX_STDIO_CHUNK,
            });
        }

        if src.len() < STDIO_HEADER_SIZE + len {
            src.reserve(STDIO_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(STDIO_HEADER_SIZE);
        Ok(Some(StdioChunk {
            stream,
            data: src.split_to(len).freeze(),
        }))
    }
}

impl Encoder<StdioChunk> for StdioCodec {
    type Error = FrameError;

    fn encode(&mut self, chunk: StdioChunk, dst: &mut BytesMut) -> Result<()> {
        if self.tty {
            dst.put_slice(&chunk.data);
            return Ok(());
        }

        let len = u32::try_from(chunk.data.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: chunk.data.len(),
            max: u32::MAX as usize,
        })?;
        dst.reserve(STDIO_HEADER_SIZE + chunk.data.len());
        dst.put_slice(&encode_header(chunk.stream, len));
        dst.put_slice(&chunk.data);
        Ok(())
    }
}
