//! Sessions, reconnecting channels and entity demultiplexing.
//!
//! A [`Session`] exchanges keyed messages with one peer over any
//! [`Connection`](guestlink_transport::Connection), answering pings and
//! closing itself when the peer goes quiet. A [`Demultiplexer`] sits on top
//! of a session and routes container and exec substreams to consumers.
//! [`ReconnectingChannel`] is the byte-stream counterpart: it redials a pool
//! of upgrade endpoints whenever the current link drops.

pub mod demux;
pub mod error;
pub mod exec;
pub mod handshake;
pub mod reconnect;
pub mod session;
pub mod sink;

pub use demux::{ConsumerId, DemuxConfig, Demultiplexer};
pub use error::{Result, SessionError};
pub use exec::{ExecSpec, ExecStatus, ExecTarget, ExitStatus, SignalRequest, WindowSize};
pub use handshake::{exchange_hello, hello_frame};
pub use reconnect::{ChannelConfig, ChannelIo, ReconnectingChannel};
pub use session::{CloseReason, Message, Session, SessionConfig};
pub use sink::Sink;
