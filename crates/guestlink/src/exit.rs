use std::fmt;
use std::io;

use guestlink_frame::FrameError;
use guestlink_session::SessionError;
use guestlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::BrokenPipe => FAILURE,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidUrl(_) => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::SyncTimeout(_) | TransportError::DeadlineExceeded => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Timeout(_) | SessionError::DeadlineExceeded | SessionError::PingTimeout => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        SessionError::ReservedKey(_) | SessionError::Exec(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SessionError::PayloadTooLarge { .. }
        | SessionError::Json(_)
        | SessionError::Protocol(_)
        | SessionError::HandshakeFailed(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        SessionError::RemoteClosed(_) | SessionError::Closed | SessionError::Failed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn deadlines_map_to_timeout() {
        let err = session_error("read", SessionError::DeadlineExceeded);
        assert_eq!(err.code, TIMEOUT);
        let err = session_error(
            "dial",
            SessionError::Transport(TransportError::SyncTimeout(Duration::from_secs(1))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn bad_url_is_a_usage_error() {
        let err = session_error(
            "dial",
            TransportError::InvalidUrl("ftp://x".to_string()).into(),
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("dial: "));
    }

    #[test]
    fn refused_connection_is_a_failure() {
        let err = transport_error(
            "dial",
            TransportError::Connect {
                target: "127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, FAILURE);
    }
}
