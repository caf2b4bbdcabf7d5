//! Keyed sessions and reconnecting channels between a host and its guests.
//!
//! guestlink multiplexes container and exec stdio, exit codes and control
//! requests over a single byte stream, keeps that stream alive with pings,
//! and redials it when the underlying connection drops.
//!
//! # Crate Structure
//!
//! - [`transport`]: beacon alignment, HTTP-upgrade dialing and listening
//! - [`frame`]: session and link codecs, entity addressing, stdio framing
//! - [`session`]: sessions, reconnecting channels and the demultiplexer
//!   (behind the `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use guestlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use guestlink_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use guestlink_session::*;
}
