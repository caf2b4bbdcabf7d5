//! A raw duplex stream that survives connection loss.
//!
//! The channel dials one of several upgrade URLs, frames traffic with
//! [`LinkCodec`], and on failure discards the connection and dials again.
//! Delivery is at-most-once: frames in flight across a reconnect are lost.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures_core::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use guestlink_frame::{LinkCodec, LinkFrame, MAX_LINK_PAYLOAD};
use guestlink_transport::{
    BoxedConnection, Connection, Endpoint, TransportError, UpgradeRequest, DEFAULT_PROTOCOL,
};
use rand::prelude::IndexedRandom;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::io::{CopyToBytes, SinkWriter, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SessionError};

const CONTROL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Reconnecting channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Candidate upgrade URLs. Empty for an accepted (server-side) channel.
    pub urls: Vec<String>,
    /// `Upgrade:` protocol token.
    pub protocol: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Bound on one dial + upgrade attempt.
    pub dial_timeout: Duration,
    /// Pause between failed attempts.
    pub retry_backoff: Duration,
    /// Bound on one whole bootstrap.
    pub bootstrap_deadline: Duration,
    /// PING period on the current connection.
    pub keepalive_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            headers: Vec::new(),
            dial_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(250),
            bootstrap_deadline: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
        }
    }
}

impl ChannelConfig {
    /// Default configuration dialing `urls`.
    pub fn with_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

type LinkReader = FramedRead<ReadHalf<BoxedConnection>, LinkCodec>;
type LinkWriter = FramedWrite<WriteHalf<BoxedConnection>, LinkCodec>;

/// One underlying connection. Never reused once discarded.
struct Link {
    id: u64,
    reader: Mutex<LinkReader>,
    writer: Mutex<LinkWriter>,
    dead: CancellationToken,
}

impl Link {
    fn new(id: u64, stream: BoxedConnection) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id,
            reader: Mutex::new(FramedRead::new(read_half, LinkCodec)),
            writer: Mutex::new(FramedWrite::new(write_half, LinkCodec)),
            dead: CancellationToken::new(),
        }
    }

    async fn try_send(&self, frame: LinkFrame) {
        let Ok(mut writer) = self.writer.try_lock() else {
            trace!(link = self.id, "writer busy, skipping control frame");
            return;
        };
        match tokio::time::timeout(CONTROL_SEND_TIMEOUT, writer.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(link = self.id, error = %err, "control frame send failed"),
            Err(_) => debug!(link = self.id, "control frame send timed out"),
        }
    }
}

struct Inner {
    endpoints: Vec<Endpoint>,
    request: UpgradeRequest,
    config: ChannelConfig,
    current: StdMutex<Option<Arc<Link>>>,
    connecting: Mutex<()>,
    pending: Mutex<Bytes>,
    read_deadline: StdMutex<Option<Instant>>,
    next_link: AtomicU64,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `fut`, giving up at `deadline` if one is set.
async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl Inner {
    fn accept_mode(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn current(&self) -> Option<Arc<Link>> {
        lock(&self.current).clone()
    }

    fn install(&self, stream: BoxedConnection) -> Arc<Link> {
        let link = Arc::new(Link::new(
            self.next_link.fetch_add(1, Ordering::Relaxed),
            stream,
        ));
        *lock(&self.current) = Some(Arc::clone(&link));
        link
    }

    /// Drop `link` if it is still current and wake anyone waiting on it.
    fn discard(&self, link: &Link) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|c| c.id == link.id) {
            *current = None;
        }
        drop(current);
        link.dead.cancel();
    }

    /// The current link, bootstrapping a new one if there is none.
    async fn link(&self, limit: Option<Instant>) -> Result<Arc<Link>> {
        if let Some(link) = self.current() {
            return Ok(link);
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closing.into());
        }
        if self.accept_mode() {
            return Err(SessionError::Closed);
        }

        let _connecting = self.connecting.lock().await;
        if let Some(link) = self.current() {
            return Ok(link);
        }
        let stream = self.bootstrap(limit).await?;
        Ok(self.install(stream))
    }

    async fn bootstrap(&self, limit: Option<Instant>) -> Result<BoxedConnection> {
        let mut deadline = Instant::now() + self.config.bootstrap_deadline;
        if let Some(limit) = limit {
            deadline = deadline.min(limit);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let endpoint = {
                let mut rng = rand::rng();
                self.endpoints
                    .choose(&mut rng)
                    .ok_or(TransportError::Closing)?
            };

            let dial = guestlink_transport::dial(endpoint, &self.request, self.config.dial_timeout);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Closing.into()),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(TransportError::DeadlineExceeded.into())
                }
                outcome = dial => outcome,
            };

            match outcome {
                Ok(stream) => {
                    info!(target = %endpoint.target(), attempt, "link established");
                    return Ok(Box::new(stream));
                }
                Err(err) => debug!(target = %endpoint.target(), attempt, error = %err, "dial failed"),
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Closing.into()),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(TransportError::DeadlineExceeded.into())
                }
                _ = tokio::time::sleep(self.config.retry_backoff) => {}
            }
        }
    }

    /// Next non-empty DATA body, or `None` on end of stream in accept mode.
    async fn next_data(&self) -> Result<Option<Bytes>> {
        loop {
            let deadline = *lock(&self.read_deadline);
            let link = self.link(deadline).await?;

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Closing.into()),
                _ = link.dead.cancelled() => continue,
                next = until(deadline, async { link.reader.lock().await.next().await }) => next,
            };

            match next {
                None => return Err(SessionError::DeadlineExceeded),
                Some(Some(Ok(LinkFrame::Data(data)))) => {
                    if !data.is_empty() {
                        return Ok(Some(data));
                    }
                }
                Some(Some(Ok(LinkFrame::Ping))) => link.try_send(LinkFrame::Pong).await,
                Some(Some(Ok(LinkFrame::Pong))) => {}
                Some(None) => {
                    self.discard(&link);
                    if self.accept_mode() {
                        return Ok(None);
                    }
                    debug!(link = link.id, "link hit end of stream, reconnecting");
                }
                Some(Some(Err(err))) => {
                    self.discard(&link);
                    if self.accept_mode() {
                        return Err(err.into());
                    }
                    warn!(link = link.id, error = %err, "link read failed, reconnecting");
                }
            }
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let link = self.link(None).await?;
        let mut writer = link.writer.lock().await;
        for chunk in data.chunks(MAX_LINK_PAYLOAD) {
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SessionError::from(TransportError::Closing)),
                sent = writer.send(LinkFrame::Data(Bytes::copy_from_slice(chunk))) => {
                    sent.map_err(SessionError::from)
                }
            };
            if let Err(err) = sent {
                drop(writer);
                self.discard(&link);
                if !self.accept_mode() {
                    debug!(link = link.id, error = %err, "link write failed, dropping link");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let link = lock(&self.current).take();
        if let Some(link) = link {
            link.dead.cancel();
            if let Ok(mut writer) = link.writer.try_lock() {
                let _ = tokio::time::timeout(CONTROL_SEND_TIMEOUT, writer.get_mut().shutdown()).await;
            }
        }
    }
}

/// A duplex byte stream over a sequence of upgraded connections.
pub struct ReconnectingChannel {
    inner: Arc<Inner>,
}

impl ReconnectingChannel {
    fn build(config: ChannelConfig) -> Result<Self> {
        let endpoints = config
            .urls
            .iter()
            .map(|url| Endpoint::parse(url))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let request = UpgradeRequest {
            protocol: config.protocol.clone(),
            headers: config.headers.clone(),
        };

        let inner = Arc::new(Inner {
            endpoints,
            request,
            current: StdMutex::new(None),
            connecting: Mutex::new(()),
            pending: Mutex::new(Bytes::new()),
            read_deadline: StdMutex::new(None),
            next_link: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            config,
        });
        tokio::spawn(keepalive(Arc::clone(&inner)));
        Ok(Self { inner })
    }

    /// Dial one of `config.urls`, retrying until the bootstrap deadline.
    pub async fn dial(config: ChannelConfig) -> Result<Self> {
        if config.urls.is_empty() {
            return Err(TransportError::InvalidUrl("no urls configured".to_string()).into());
        }
        let channel = Self::build(config)?;
        channel.inner.link(None).await?;
        Ok(channel)
    }

    /// Wrap an accepted connection. The channel never redials; errors are
    /// returned as they happen.
    pub fn from_stream(stream: impl Connection, mut config: ChannelConfig) -> Result<Self> {
        config.urls.clear();
        let channel = Self::build(config)?;
        channel.inner.install(Box::new(stream));
        Ok(channel)
    }

    /// Read into `buf`. `Ok(0)` only at the end of an accepted stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut pending = self.inner.pending.lock().await;
        if pending.is_empty() {
            match self.inner.next_data().await? {
                Some(data) => *pending = data,
                None => return Ok(0),
            }
        }
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        pending.advance(n);
        Ok(n)
    }

    /// Read the next chunk as sent by the peer, or `None` at end of stream.
    pub async fn read_chunk(&self) -> Result<Option<Bytes>> {
        let mut pending = self.inner.pending.lock().await;
        if !pending.is_empty() {
            return Ok(Some(std::mem::take(&mut *pending)));
        }
        self.inner.next_data().await
    }

    /// Write all of `buf`, reconnecting first if there is no connection.
    ///
    /// A failure drops the connection and is returned immediately; the next
    /// write dials again.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf).await?;
        Ok(buf.len())
    }

    /// Set or clear an absolute deadline for reads, including reconnects.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *lock(&self.inner.read_deadline) = deadline;
    }

    /// True while a connection is established.
    pub fn is_connected(&self) -> bool {
        self.inner.current().is_some()
    }

    /// Stop reconnecting, cancel background work and drop the connection.
    pub async fn close(&self) {
        self.inner.shutdown().await;
    }

    /// Adapt the channel to `AsyncRead + AsyncWrite`.
    pub fn into_io(self) -> ChannelIo {
        ChannelIo::new(Arc::new(self))
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for ReconnectingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingChannel")
            .field("endpoints", &self.inner.endpoints)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn keepalive(inner: Arc<Inner>) {
    let interval = inner.config.keepalive_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Some(link) = inner.current() {
            link.try_send(LinkFrame::Ping).await;
        }
    }
}

type ChannelSink = Pin<Box<dyn futures_util::Sink<Bytes, Error = io::Error> + Send>>;

/// [`ReconnectingChannel`] as an `AsyncRead + AsyncWrite` value.
///
/// Lets a [`Session`](crate::Session) run over a reconnecting channel.
pub struct ChannelIo {
    reader: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
    writer: SinkWriter<CopyToBytes<ChannelSink>>,
}

impl ChannelIo {
    fn new(channel: Arc<ReconnectingChannel>) -> Self {
        let chunks = futures_util::stream::unfold(Arc::clone(&channel), |channel| async move {
            match channel.read_chunk().await {
                Ok(Some(data)) => Some((Ok(data), channel)),
                Ok(None) => None,
                Err(err) => Some((Err(io::Error::from(err)), channel)),
            }
        });
        let sink: ChannelSink = Box::pin(futures_util::sink::unfold(
            channel,
            |channel, data: Bytes| async move {
                channel.write(&data).await.map_err(io::Error::from)?;
                Ok::<_, io::Error>(channel)
            },
        ));

        Self {
            reader: StreamReader::new(chunks.boxed()),
            writer: SinkWriter::new(CopyToBytes::new(sink)),
        }
    }
}

impl AsyncRead for ChannelIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChannelIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use guestlink_transport::UpgradeListener;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn fast_config(urls: Vec<String>) -> ChannelConfig {
        ChannelConfig {
            urls,
            dial_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(10),
            bootstrap_deadline: Duration::from_secs(5),
            keepalive_interval: Duration::from_millis(100),
            ..ChannelConfig::default()
        }
    }

    async fn listener() -> (UpgradeListener, String) {
        let listener = UpgradeListener::bind_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("http://{addr}/link"))
    }

    #[tokio::test]
    async fn echoes_through_accepted_channel() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, head) = listener.accept().await.unwrap();
            assert_eq!(head.path, "/link");
            let channel = ReconnectingChannel::from_stream(stream, fast_config(Vec::new())).unwrap();
            let mut buf = [0u8; 64];
            loop {
                let n = channel.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                channel.write(&buf[..n]).await.unwrap();
            }
        });

        let client = ReconnectingChannel::dial(fast_config(vec![url])).await.unwrap();
        assert!(client.is_connected());
        client.write(b"ping?").await.unwrap();
        let mut buf = [0u8; 5];
        let mut read = 0;
        while read < buf.len() {
            read += client.read(&mut buf[read..]).await.unwrap();
        }
        assert_eq!(&buf, b"ping?");

        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn read_reconnects_after_link_loss() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            // First connection: take one chunk, then hang up.
            let (stream, _) = listener.accept().await.unwrap();
            let first = ReconnectingChannel::from_stream(stream, fast_config(Vec::new())).unwrap();
            let chunk = first.read_chunk().await.unwrap().unwrap();
            assert_eq!(chunk.as_ref(), b"first");
            first.close().await;
            drop(first);

            let (stream, _) = listener.accept().await.unwrap();
            let second = ReconnectingChannel::from_stream(stream, fast_config(Vec::new())).unwrap();
            second.write(b"second").await.unwrap();
            // Hold the connection until the client is done.
            let _ = second.read_chunk().await;
        });

        let client = ReconnectingChannel::dial(fast_config(vec![url])).await.unwrap();
        client.write(b"first").await.unwrap();
        let chunk = client.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.as_ref(), b"second");

        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_drops_link_and_next_write_redials() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            // First connection is hung up on right after the upgrade.
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);

            let (stream, _) = listener.accept().await.unwrap();
            let second = ReconnectingChannel::from_stream(stream, fast_config(Vec::new())).unwrap();
            second.read_chunk().await.unwrap().unwrap()
        });

        let config = ChannelConfig {
            keepalive_interval: Duration::from_secs(60),
            ..fast_config(vec![url])
        };
        let client = ReconnectingChannel::dial(config).await.unwrap();

        // The first writes may still land in socket buffers; keep going
        // until the reset surfaces.
        let mut failure = None;
        for _ in 0..100 {
            if let Err(err) = client.write(b"into the void").await {
                failure = Some(err);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let failure = failure.expect("write to a hung-up link should fail");
        assert!(!matches!(failure, SessionError::Closed), "{failure:?}");
        assert!(!client.is_connected());

        client.write(b"again").await.unwrap();
        assert!(client.is_connected());
        let received = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.as_ref(), b"again");
        client.close().await;
    }

    #[tokio::test]
    async fn bootstrap_gives_up_at_deadline() {
        // Grab a free port, then close it so every dial is refused.
        let url = {
            let (listener, url) = listener().await;
            drop(listener);
            url
        };
        let config = ChannelConfig {
            bootstrap_deadline: Duration::from_millis(100),
            ..fast_config(vec![url])
        };

        let started = Instant::now();
        let err = ReconnectingChannel::dial(config).await.unwrap_err();
        assert!(err.is_deadline(), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn close_cancels_reconnect() {
        let url = {
            let (listener, url) = listener().await;
            drop(listener);
            url
        };
        let channel = Arc::new(ReconnectingChannel::build(fast_config(vec![url])).unwrap());
        let reader = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.read_chunk().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.close().await;

        let err = reader.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Closing)));
    }

    #[tokio::test]
    async fn accept_mode_returns_errors_as_is() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let channel = ReconnectingChannel::from_stream(local, ChannelConfig::default()).unwrap();

        remote.write_all(&[2, 0, 0, 0]).await.unwrap();
        let err = channel.read_chunk().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Frame(guestlink_frame::FrameError::UnknownFrameType(2))
        ));
        assert!(!channel.is_connected());
        assert!(matches!(
            channel.write(b"x").await.unwrap_err(),
            SessionError::Closed
        ));
    }

    #[tokio::test]
    async fn answers_ping_and_skips_empty_data() {
        let (local, remote) = tokio::io::duplex(1024);
        let channel = ReconnectingChannel::from_stream(local, ChannelConfig::default()).unwrap();
        let (remote_read, remote_write) = tokio::io::split(remote);
        let mut frames_in = FramedRead::new(remote_read, LinkCodec);
        let mut frames_out = FramedWrite::new(remote_write, LinkCodec);

        frames_out.send(LinkFrame::Ping).await.unwrap();
        frames_out.send(LinkFrame::Data(Bytes::new())).await.unwrap();
        frames_out
            .send(LinkFrame::Data(Bytes::from_static(b"payload")))
            .await
            .unwrap();

        let chunk = channel.read_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.as_ref(), b"payload");
        assert_eq!(frames_in.next().await.unwrap().unwrap(), LinkFrame::Pong);
    }

    #[tokio::test]
    async fn read_deadline_bounds_waiting() {
        let (local, _remote) = tokio::io::duplex(1024);
        let channel = ReconnectingChannel::from_stream(local, ChannelConfig::default()).unwrap();
        let started = Instant::now();
        channel.set_read_deadline(Some(started + Duration::from_millis(30)));

        let err = channel.read(&mut [0u8; 8]).await.unwrap_err();
        assert!(err.is_deadline());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn io_adapter_carries_bytes_both_ways() {
        let (local, remote) = tokio::io::duplex(1024);
        let channel = ReconnectingChannel::from_stream(local, ChannelConfig::default()).unwrap();
        let mut io = channel.into_io();
        let mut peer = ReconnectingChannel::from_stream(remote, ChannelConfig::default())
            .unwrap()
            .into_io();

        io.write_all(b"over the adapter").await.unwrap();
        io.flush().await.unwrap();
        let mut buf = [0u8; 16];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"over the adapter");
    }
}
