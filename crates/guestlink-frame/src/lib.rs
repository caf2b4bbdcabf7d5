//! Wire formats for guestlink.
//!
//! Three framings live here:
//! - [`codec`]: the session frame (4-byte LE key, version, flags, 2-byte LE
//!   length, payload) with the reserved control keys in [`channel`]
//! - [`link`]: the reconnecting channel's PING/PONG/DATA frames
//! - [`stdio`]: stdout/stderr stream-type headers for attach endpoints
//!
//! [`address`] maps `(entity, index, substream)` onto session keys.

pub mod address;
pub mod channel;
pub mod codec;
pub mod error;
pub mod link;
pub mod reader;
pub mod stdio;
pub mod writer;

pub use address::{key_for, Address, EntityKind, Substream, MAX_INDEX};
pub use channel::{classify, key_name, KeyClass, APPLICATION_KEY_START, PROTOCOL_VERSION};
pub use codec::{decode_frame, encode_frame, Frame, SessionCodec, HEADER_SIZE, MAX_PAYLOAD};
pub use error::{FrameError, Result};
pub use link::{LinkCodec, LinkFrame, MAX_LINK_PAYLOAD};
pub use reader::StdioReader;
pub use stdio::{StdStream, StdioChunk, StdioCodec};
pub use writer::StdioWriter;
