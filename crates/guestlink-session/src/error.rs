use std::time::Duration;

/// Errors that can occur in session, channel and demultiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] guestlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] guestlink_frame::FrameError),

    /// The HELLO exchange failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The read deadline elapsed. The session stays usable.
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// The peer stopped answering keep-alive probes.
    #[error("ping timeout")]
    PingTimeout,

    /// The peer closed the session; carries `EOF` or the peer's error text.
    #[error("remote closed: {0}")]
    RemoteClosed(String),

    /// The session was closed locally.
    #[error("session closed")]
    Closed,

    /// The session was torn down by an earlier failure.
    #[error("session failed: {0}")]
    Failed(String),

    /// Callers may not send on keys below 255.
    #[error("key {0} is reserved")]
    ReservedKey(u32),

    /// The message does not fit in one frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An exec bookkeeping request was invalid.
    #[error("exec error: {0}")]
    Exec(String),
}

impl SessionError {
    /// True for deadline errors that leave the session or channel usable.
    pub fn is_deadline(&self) -> bool {
        matches!(
            self,
            SessionError::DeadlineExceeded
                | SessionError::Transport(guestlink_transport::TransportError::DeadlineExceeded)
        )
    }
}

impl From<SessionError> for std::io::Error {
    fn from(err: SessionError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            SessionError::Timeout(_)
            | SessionError::DeadlineExceeded
            | SessionError::PingTimeout => ErrorKind::TimedOut,
            SessionError::RemoteClosed(_) => ErrorKind::UnexpectedEof,
            SessionError::Closed | SessionError::Failed(_) => ErrorKind::NotConnected,
            SessionError::ReservedKey(_)
            | SessionError::PayloadTooLarge { .. }
            | SessionError::Exec(_) => ErrorKind::InvalidInput,
            SessionError::HandshakeFailed(_)
            | SessionError::Protocol(_)
            | SessionError::Json(_) => ErrorKind::InvalidData,
            SessionError::Transport(_) | SessionError::Frame(_) => ErrorKind::Other,
        };

        match err {
            SessionError::Transport(inner) => inner.into(),
            SessionError::Frame(inner) => inner.into(),
            other => std::io::Error::new(kind, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn io_conversion_keeps_meaningful_kinds() {
        let cases = [
            (SessionError::DeadlineExceeded, ErrorKind::TimedOut),
            (SessionError::PingTimeout, ErrorKind::TimedOut),
            (SessionError::RemoteClosed("EOF".into()), ErrorKind::UnexpectedEof),
            (SessionError::Closed, ErrorKind::NotConnected),
            (SessionError::ReservedKey(4), ErrorKind::InvalidInput),
            (
                SessionError::Transport(guestlink_transport::TransportError::Closing),
                ErrorKind::NotConnected,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(std::io::Error::from(err).kind(), kind);
        }
    }

    #[test]
    fn deadline_errors_are_recognised() {
        assert!(SessionError::DeadlineExceeded.is_deadline());
        assert!(
            SessionError::Transport(guestlink_transport::TransportError::DeadlineExceeded)
                .is_deadline()
        );
        assert!(!SessionError::PingTimeout.is_deadline());
    }
}
