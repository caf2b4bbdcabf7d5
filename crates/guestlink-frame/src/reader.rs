use std::io::{self, ErrorKind, Read};

use crate::stdio::{decode_header, StdStream, STDIO_HEADER_SIZE};

/// Strips stdio headers from a multiplexed stream.
///
/// Each `read` returns bytes from at most one chunk; the next header is read
/// only once the current chunk is exhausted. In TTY mode bytes pass through.
pub struct StdioReader<T> {
    inner: T,
    tty: bool,
    remaining: usize,
    stream: Option<StdStream>,
}

impl<T: Read> StdioReader<T> {
    /// Reader for a multiplexed (non-TTY) stream.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            tty: false,
            remaining: 0,
            stream: None,
        }
    }

    /// Passthrough reader for a TTY stream.
    pub fn raw(inner: T) -> Self {
        Self {
            tty: true,
            ..Self::new(inner)
        }
    }

    /// Stream type of the chunk currently being read.
    pub fn stream(&self) -> Option<StdStream> {
        self.stream
    }

    /// Bytes left in the current chunk.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Read the next header. `Ok(false)` on clean EOF at a chunk boundary.
    fn next_header(&mut self) -> io::Result<bool> {
        let mut header = [0u8; STDIO_HEADER_SIZE];
        let mut filled = 0usize;
        while filled < STDIO_HEADER_SIZE {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "stream closed inside a stdio header",
                    ))
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        let (stream, len) = decode_header(&header)?;
        self.stream = Some(stream);
        self.remaining = len as usize;
        Ok(true)
    }
}

impl<T: Read> Read for StdioReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.tty || buf.is_empty() {
            return self.inner.read(buf);
        }

        // Empty chunks carry no data; skip them without reporting EOF.
        while self.remaining == 0 {
            if !self.next_header()? {
                return Ok(0);
            }
        }

        let limit = self.remaining.min(buf.len());
        let read = loop {
            match self.inner.read(&mut buf[..limit]) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };
        if read == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "stream closed inside a stdio chunk",
            ));
        }
        self.remaining -= read;
        Ok(read)
    }
}
