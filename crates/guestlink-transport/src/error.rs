use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while establishing or aligning a raw link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the listening address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint URL could not be understood.
    #[error("invalid endpoint url '{0}'")]
    InvalidUrl(String),

    /// The HTTP upgrade exchange was rejected or malformed.
    #[error("upgrade failed: {0}")]
    Upgrade(String),

    /// The HTTP connection failed underneath the upgrade exchange.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// The beacon alignment did not complete in time.
    #[error("sync handshake timed out after {0:?}")]
    SyncTimeout(Duration),

    /// An overall deadline elapsed before a connection was established.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The owner is shutting down.
    #[error("transport closing")]
    Closing,
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            TransportError::SyncTimeout(_) | TransportError::DeadlineExceeded => ErrorKind::TimedOut,
            TransportError::Closing => ErrorKind::NotConnected,
            TransportError::InvalidUrl(_) => ErrorKind::InvalidInput,
            TransportError::Upgrade(_) => ErrorKind::ConnectionRefused,
            TransportError::Io(_)
            | TransportError::Http(_)
            | TransportError::Accept(_)
            | TransportError::Bind { .. }
            | TransportError::Connect { .. } => ErrorKind::Other,
        };

        match err {
            TransportError::Io(io) | TransportError::Accept(io) => io,
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => source,
            other => std::io::Error::new(kind, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
