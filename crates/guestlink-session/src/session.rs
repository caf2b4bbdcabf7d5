use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use guestlink_frame::channel::{CLOSE, HELLO, PING, PONG};
use guestlink_frame::{classify, Frame, KeyClass, SessionCodec, APPLICATION_KEY_START, MAX_PAYLOAD};
use guestlink_transport::{BoxedConnection, Connection};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, SessionError};
use crate::handshake::exchange_hello;

/// Missed keep-alive ticks tolerated before the peer is declared gone.
const MAX_MISSED_PINGS: u32 = 2;

/// Bound on best-effort control sends and the shutdown path.
const CONTROL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Session behavior configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identity announced in HELLO.
    pub identity: String,
    /// Keep-alive tick. Reads wait at most twice this long per frame.
    pub keepalive_interval: Duration,
    /// Bound on the HELLO exchange.
    pub handshake_timeout: Duration,
    /// Bound on one application write, including waiting for the writer.
    /// A write that overruns it closes the session.
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            keepalive_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Default configuration announcing `identity`.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }
}

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing key, at least 255.
    pub key: u32,
    /// Application-defined flags.
    pub flags: u8,
    /// Message payload.
    pub value: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(key: u32, flags: u8, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            flags,
            value: value.into(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally with `close()`.
    Graceful,
    /// Closed locally with an error, or by a fatal local failure.
    Error(String),
    /// The peer sent CLOSE (`EOF` when it carried no text) or hung up.
    Remote(String),
    /// The peer stopped answering keep-alive probes.
    PingTimeout,
}

impl CloseReason {
    fn to_error(&self) -> SessionError {
        match self {
            CloseReason::Graceful => SessionError::Closed,
            CloseReason::Error(text) => SessionError::Failed(text.clone()),
            CloseReason::Remote(text) => SessionError::RemoteClosed(text.clone()),
            CloseReason::PingTimeout => SessionError::PingTimeout,
        }
    }

    /// CLOSE payload to send, or `None` when the peer already left.
    fn close_payload(&self) -> Option<Bytes> {
        match self {
            CloseReason::Graceful => Some(Bytes::new()),
            CloseReason::Error(text) => {
                let bytes = text.as_bytes();
                Some(Bytes::copy_from_slice(&bytes[..bytes.len().min(MAX_PAYLOAD)]))
            }
            CloseReason::PingTimeout => Some(Bytes::from_static(b"ping timeout")),
            CloseReason::Remote(_) => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Graceful => f.write_str("closed"),
            CloseReason::Error(text) => write!(f, "error: {text}"),
            CloseReason::Remote(text) => write!(f, "remote: {text}"),
            CloseReason::PingTimeout => f.write_str("ping timeout"),
        }
    }
}

type SessionReader = FramedRead<ReadHalf<BoxedConnection>, SessionCodec>;
type SessionWriter = FramedWrite<WriteHalf<BoxedConnection>, SessionCodec>;

/// State shared with the keep-alive task.
struct Shared {
    writer: Mutex<SessionWriter>,
    missed: AtomicU32,
    closed: AtomicBool,
    reason: StdMutex<Option<CloseReason>>,
    cancel: CancellationToken,
}

impl Shared {
    fn close_error(&self) -> SessionError {
        match self.reason.lock() {
            Ok(reason) => reason
                .as_ref()
                .map(CloseReason::to_error)
                .unwrap_or(SessionError::Closed),
            Err(_) => SessionError::Closed,
        }
    }

    /// Send a control frame unless the writer is busy.
    async fn try_send_control(&self, frame: Frame) -> bool {
        let Ok(mut writer) = self.writer.try_lock() else {
            trace!(key = frame.key, "writer busy, skipping control frame");
            return false;
        };
        match tokio::time::timeout(CONTROL_SEND_TIMEOUT, writer.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(error = %err, "control frame send failed");
                false
            }
            Err(_) => {
                debug!("control frame send timed out");
                false
            }
        }
    }

    /// Close once. Later calls are no-ops and return `false`.
    async fn shutdown(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(%reason, "closing session");
        if let Ok(mut slot) = self.reason.lock() {
            *slot = Some(reason.clone());
        }
        self.cancel.cancel();

        let teardown = async {
            let mut writer = self.writer.lock().await;
            if let Some(payload) = reason.close_payload() {
                if let Err(err) = writer.send(Frame::new(CLOSE, 0, payload)).await {
                    trace!(error = %err, "CLOSE not delivered");
                }
            }
            let _ = writer.get_mut().shutdown().await;
        };
        if tokio::time::timeout(CONTROL_SEND_TIMEOUT, teardown)
            .await
            .is_err()
        {
            debug!("session teardown timed out");
        }
        true
    }
}

/// A framed, keep-alive-checked session over one connection.
///
/// `read` is single-reader (callers are serialized); `write` may be called
/// from many tasks and concurrently with `read`.
pub struct Session {
    shared: Arc<Shared>,
    reader: Mutex<SessionReader>,
    read_deadline: StdMutex<Option<Instant>>,
    peer_identity: String,
    keepalive_interval: Duration,
    write_timeout: Duration,
}

impl Session {
    /// Run the HELLO exchange over `stream` and start the keep-alive task.
    ///
    /// The session is never returned if the exchange fails.
    pub async fn connect(stream: impl Connection, config: SessionConfig) -> Result<Self> {
        let stream: BoxedConnection = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, SessionCodec);
        let mut writer = FramedWrite::new(write_half, SessionCodec);

        let peer_identity = exchange_hello(
            &mut reader,
            &mut writer,
            &config.identity,
            config.handshake_timeout,
        )
        .await?;
        debug!(peer = %peer_identity, "session established");

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            missed: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            reason: StdMutex::new(None),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(keepalive(Arc::clone(&shared), config.keepalive_interval));

        Ok(Self {
            shared,
            reader: Mutex::new(reader),
            read_deadline: StdMutex::new(None),
            peer_identity,
            keepalive_interval: config.keepalive_interval,
            write_timeout: config.write_timeout,
        })
    }

    /// Align on a beacon boundary first, then run [`Session::connect`].
    pub async fn connect_synced(
        mut stream: impl Connection,
        sync_timeout: Duration,
        config: SessionConfig,
    ) -> Result<Self> {
        guestlink_transport::sync(&mut stream, sync_timeout).await?;
        Self::connect(stream, config).await
    }

    /// Identity the peer announced in HELLO.
    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    /// Set or clear an absolute deadline for `read`.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        if let Ok(mut slot) = self.read_deadline.lock() {
            *slot = deadline;
        }
    }

    fn next_deadline(&self) -> Instant {
        let rolling = Instant::now() + self.keepalive_interval * 2;
        match self.read_deadline.lock().ok().and_then(|slot| *slot) {
            Some(deadline) => deadline.min(rolling),
            None => rolling,
        }
    }

    /// Read the next application message.
    ///
    /// Control and reserved frames are handled internally. A deadline error
    /// leaves the session usable.
    pub async fn read(&self) -> Result<Message> {
        let mut reader = self.reader.lock().await;
        loop {
            if self.is_closed() {
                return Err(self.shared.close_error());
            }

            let deadline = self.next_deadline();
            let next = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Err(self.shared.close_error()),
                next = tokio::time::timeout_at(deadline, reader.next()) => next,
            };

            let frame = match next {
                Err(_) => return Err(SessionError::DeadlineExceeded),
                Ok(None) => {
                    self.shared
                        .shutdown(CloseReason::Remote("EOF".to_string()))
                        .await;
                    return Err(SessionError::RemoteClosed("EOF".to_string()));
                }
                Ok(Some(Err(err))) => {
                    self.shared
                        .shutdown(CloseReason::Error(err.to_string()))
                        .await;
                    return Err(err.into());
                }
                Ok(Some(Ok(frame))) => frame,
            };
            self.shared.missed.store(0, Ordering::Release);

            match classify(frame.key) {
                KeyClass::Application => {
                    return Ok(Message {
                        key: frame.key,
                        flags: frame.flags,
                        value: frame.payload,
                    })
                }
                KeyClass::Control(PING) => {
                    self.shared.try_send_control(Frame::new(PONG, 0, Bytes::new())).await;
                }
                KeyClass::Control(CLOSE) => {
                    let text = if frame.payload.is_empty() {
                        "EOF".to_string()
                    } else {
                        String::from_utf8_lossy(&frame.payload).into_owned()
                    };
                    debug!(reason = %text, "peer closed session");
                    self.shared
                        .shutdown(CloseReason::Remote(text.clone()))
                        .await;
                    return Err(SessionError::RemoteClosed(text));
                }
                KeyClass::Control(PONG) | KeyClass::Control(HELLO) => {}
                KeyClass::Reserved => trace!(key = frame.key, "ignoring reserved frame"),
                KeyClass::Control(key) | KeyClass::UnknownControl(key) => {
                    let err = SessionError::Protocol(format!("unknown control key {key}"));
                    self.shared
                        .shutdown(CloseReason::Error(err.to_string()))
                        .await;
                    return Err(err);
                }
            }
        }
    }

    /// Send an application message.
    ///
    /// Reserved keys and oversize payloads are rejected without I/O. A
    /// transport failure, or a peer that stops draining for longer than the
    /// configured write timeout, closes the session.
    pub async fn write(&self, message: &Message) -> Result<()> {
        if message.key < APPLICATION_KEY_START {
            return Err(SessionError::ReservedKey(message.key));
        }
        if message.value.len() > MAX_PAYLOAD {
            return Err(SessionError::PayloadTooLarge {
                size: message.value.len(),
                max: MAX_PAYLOAD,
            });
        }
        if self.is_closed() {
            return Err(self.shared.close_error());
        }

        let frame = Frame::new(message.key, message.flags, message.value.clone());
        let send = async {
            let mut writer = self.shared.writer.lock().await;
            writer.send(frame).await
        };
        let result = match tokio::time::timeout(self.write_timeout, send).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    key = message.key,
                    timeout = ?self.write_timeout,
                    "application write stalled"
                );
                self.shared
                    .shutdown(CloseReason::Error("write timed out".to_string()))
                    .await;
                return Err(SessionError::Timeout(self.write_timeout));
            }
        };
        if let Err(err) = result {
            self.shared
                .shutdown(CloseReason::Error(err.to_string()))
                .await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Close gracefully, telling the peer with an empty CLOSE.
    pub async fn close(&self) {
        self.shared.shutdown(CloseReason::Graceful).await;
    }

    /// Close and send the error text to the peer.
    pub async fn close_with_error(&self, error: impl fmt::Display) {
        self.shared
            .shutdown(CloseReason::Error(error.to_string()))
            .await;
    }

    /// True once the session has been closed for any reason.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Why the session ended, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer_identity", &self.peer_identity)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn keepalive(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let missed = shared.missed.fetch_add(1, Ordering::AcqRel);
        if missed > MAX_MISSED_PINGS {
            warn!(missed, "peer stopped answering keep-alives");
            shared.shutdown(CloseReason::PingTimeout).await;
            return;
        }
        shared.try_send_control(Frame::new(PING, 0, Bytes::new())).await;
    }
}
