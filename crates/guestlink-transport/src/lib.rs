//! Raw link setup for guestlink.
//!
//! This is the lowest layer. It turns "some bytes flowing both ways" into a
//! stream the framed protocols can run on:
//! - [`sync`] aligns two peers on an 8-byte boundary over a noisy stream
//!   such as a serial console shared with kernel boot output
//! - [`upgrade`] dials or accepts an HTTP/1.1 upgrade tunnel
//! - [`UpgradeListener`] accepts upgrade tunnels over TCP or Unix sockets

pub mod error;
pub mod listener;
pub mod sync;
pub mod traits;
pub mod upgrade;

pub use error::{Result, TransportError};
pub use listener::UpgradeListener;
pub use sync::{sync, DEFAULT_SYNC_TIMEOUT};
pub use traits::{BoxedConnection, Connection, LinkStream};
pub use upgrade::{dial, Endpoint, RequestHead, UpgradeRequest, DEFAULT_PROTOCOL};
