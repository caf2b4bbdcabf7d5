//! Consumer sinks.
//!
//! A [`Sink`] records what a consumer can do (write, and optionally flush
//! and close) once, at registration, so the demultiplexer never probes the
//! underlying writer per message.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use guestlink_frame::{StdStream, StdioChunk, StdioCodec};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;

enum Target {
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    Channel(Option<mpsc::UnboundedSender<Bytes>>),
}

/// Where a consumer's bytes go.
pub struct Sink {
    target: Target,
    framing: Option<StdioCodec>,
    flush: bool,
    close: bool,
}

impl Sink {
    /// Sink over any async writer. Write-only until capabilities are added.
    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            target: Target::Writer(Box::new(writer)),
            framing: None,
            flush: false,
            close: false,
        }
    }

    /// Unbounded in-memory sink. Closing it ends the receiver's stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            target: Target::Channel(Some(tx)),
            framing: None,
            flush: false,
            close: true,
        };
        (sink, rx)
    }

    /// Flush after every write.
    pub fn with_flush(mut self) -> Self {
        self.flush = true;
        self
    }

    /// Shut the writer down when the stream closes.
    pub fn with_close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Prefix every write with a stdio header naming the chunk's stream, or
    /// pass bytes through unchanged when `tty` is set.
    pub fn with_stdio_framing(mut self, tty: bool) -> Self {
        self.framing = Some(if tty {
            StdioCodec::tty()
        } else {
            StdioCodec::multiplexed()
        });
        self
    }

    /// Whether this sink flushes after each write.
    pub fn flushes(&self) -> bool {
        self.flush
    }

    /// Whether this sink has a close capability.
    pub fn closes(&self) -> bool {
        self.close
    }

    /// Deliver one payload read from `stream`.
    ///
    /// `stream` only matters to a framed sink; raw sinks get `data` as is.
    pub async fn write(&mut self, stream: StdStream, data: &[u8]) -> io::Result<()> {
        let data = match &mut self.framing {
            Some(codec) => {
                let mut buf = BytesMut::with_capacity(data.len() + 8);
                codec.encode(
                    StdioChunk {
                        stream,
                        data: Bytes::copy_from_slice(data),
                    },
                    &mut buf,
                )?;
                buf.freeze()
            }
            None => Bytes::copy_from_slice(data),
        };

        match &mut self.target {
            Target::Writer(writer) => {
                writer.write_all(&data).await?;
                if self.flush {
                    writer.flush().await?;
                }
                Ok(())
            }
            Target::Channel(tx) => match tx {
                Some(tx) => tx
                    .send(data)
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "consumer went away")),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed")),
            },
        }
    }

    /// Close the sink if it has a close capability.
    pub async fn close(&mut self) -> io::Result<()> {
        if !self.close {
            return Ok(());
        }
        match &mut self.target {
            Target::Writer(writer) => writer.shutdown().await,
            Target::Channel(tx) => {
                tx.take();
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            Target::Writer(_) => "writer",
            Target::Channel(_) => "channel",
        };
        f.debug_struct("Sink")
            .field("target", &target)
            .field("framed", &self.framing.is_some())
            .field("flush", &self.flush)
            .field("close", &self.close)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_and_closes() {
        let (mut sink, mut rx) = Sink::channel();
        sink.write(StdStream::Stdout, b"one").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().as_ref(), b"one");
        assert!(rx.recv().await.is_none());
        assert!(sink.write(StdStream::Stdout, b"two").await.is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_fails_writes() {
        let (mut sink, rx) = Sink::channel();
        drop(rx);
        let err = sink.write(StdStream::Stdout, b"lost").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn stdio_framing_prefixes_header() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut sink = Sink::writer(client)
            .with_flush()
            .with_close()
            .with_stdio_framing(false);

        sink.write(StdStream::Stdout, b"out").await.unwrap();
        sink.write(StdStream::Stderr, b"err").await.unwrap();
        sink.close().await.unwrap();

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(
            wire,
            [
                1, 0, 0, 0, 0, 0, 0, 3, b'o', b'u', b't', //
                2, 0, 0, 0, 0, 0, 0, 3, b'e', b'r', b'r',
            ]
        );
    }

    #[tokio::test]
    async fn writer_without_close_capability_stays_open() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut sink = Sink::writer(client).with_stdio_framing(true);
        assert!(!sink.closes());

        sink.write(StdStream::Stdout, b"raw").await.unwrap();
        sink.close().await.unwrap();
        sink.write(StdStream::Stderr, b"!").await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raw!");
    }
}
