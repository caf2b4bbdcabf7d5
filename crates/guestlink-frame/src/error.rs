/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the maximum size for its frame format.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// A link frame carried a type byte outside PING/PONG/DATA.
    #[error("unknown link frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// A stdio header carried a stream type outside stdin/stdout/stderr.
    #[error("invalid stdio stream type {0}")]
    InvalidStreamType(u8),

    /// An entity index outside `0..=254`.
    #[error("entity index {0} out of range (max 254)")]
    InvalidIndex(u32),

    /// A key that does not name an application address.
    #[error("key {0:#x} is not an application address")]
    InvalidKey(u32),
}

impl From<FrameError> for std::io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => io,
            FrameError::ConnectionClosed => std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed (incomplete frame)",
            ),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
