//! Reserved session keys.
//!
//! Keys below 10 are control keys with fixed meaning; any key below 10 not
//! listed here is a protocol violation. Keys 10-254 are reserved for future
//! control use and ignored on receipt. Keys 255 and above carry application
//! messages.

/// Session greeting, carries the protocol version and an identity string.
pub const HELLO: u32 = 1;

/// Keep-alive probe.
pub const PING: u32 = 2;

/// Keep-alive answer.
pub const PONG: u32 = 3;

/// Session shutdown, optionally carrying an error text.
pub const CLOSE: u32 = 4;

/// Leftover sync beacon; recognized and discarded.
pub const SYNC: u32 = 26;

/// First key of the ignored reserved range.
pub const RESERVED_KEY_START: u32 = 10;

/// First application key.
pub const APPLICATION_KEY_START: u32 = 255;

/// Session protocol version carried in the HELLO frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// How a receiver must treat a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// One of the fixed control keys.
    Control(u32),
    /// A key below 10 with no assigned meaning.
    UnknownControl(u32),
    /// Reserved for future use; drop silently.
    Reserved,
    /// Application message.
    Application,
}

/// Classify a received key.
pub fn classify(key: u32) -> KeyClass {
    match key {
        HELLO | PING | PONG | CLOSE => KeyClass::Control(key),
        0..RESERVED_KEY_START => KeyClass::UnknownControl(key),
        RESERVED_KEY_START..APPLICATION_KEY_START => KeyClass::Reserved,
        _ => KeyClass::Application,
    }
}

/// Returns a human-readable name for a key.
pub fn key_name(key: u32) -> &'static str {
    match key {
        HELLO => "HELLO",
        PING => "PING",
        PONG => "PONG",
        CLOSE => "CLOSE",
        SYNC => "SYNC",
        0..RESERVED_KEY_START => "UNKNOWN",
        RESERVED_KEY_START..APPLICATION_KEY_START => "RESERVED",
        _ => "APPLICATION",
    }
}

/// Returns true if callers may not send on `key`.
pub fn is_reserved(key: u32) -> bool {
    key < APPLICATION_KEY_START
}
