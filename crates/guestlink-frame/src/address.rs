//! Entity addressing over the session key space.
//!
//! Every container and exec instance owns a block of `STRIDE` consecutive
//! keys, one per substream:
//!
//! ```text
//! key = BLOCK_BASE(kind) + index * STRIDE + offset(substream)
//!
//! CONTAINER  0x1000 ..= 0x1FEF
//! EXEC       0x2000 ..= 0x2FEF
//! ```
//!
//! Both blocks sit well above the reserved range and cannot overlap for any
//! index in `0..=254`. The numbering is private to the two endpoints.

use std::fmt;

use crate::channel::APPLICATION_KEY_START;
use crate::error::{FrameError, Result};

/// First key of the container block.
pub const CONTAINER_BASE: u32 = 0x1000;

/// First key of the exec block.
pub const EXEC_BASE: u32 = 0x2000;

/// Keys reserved per entity.
pub const STRIDE: u32 = 0x10;

/// Highest valid entity index.
pub const MAX_INDEX: u8 = 254;

/// Number of addressable entities per kind.
pub const ENTITY_SLOTS: usize = MAX_INDEX as usize + 1;

/// What an entity index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Container,
    Exec,
}

impl EntityKind {
    /// All kinds, in block order.
    pub const ALL: [EntityKind; 2] = [EntityKind::Container, EntityKind::Exec];

    fn base(self) -> u32 {
        match self {
            Self::Container => CONTAINER_BASE,
            Self::Exec => EXEC_BASE,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Exec => "exec",
        }
    }
}

/// A logical channel within one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substream {
    Status,
    Stdin,
    Stdout,
    Stderr,
    Exit,
    CloseStdout,
    CloseStderr,
    Winch,
    ExecStart,
    Signal,
}

impl Substream {
    /// All substreams, in offset order.
    pub const ALL: [Substream; 10] = [
        Substream::Status,
        Substream::Stdin,
        Substream::Stdout,
        Substream::Stderr,
        Substream::Exit,
        Substream::CloseStdout,
        Substream::CloseStderr,
        Substream::Winch,
        Substream::ExecStart,
        Substream::Signal,
    ];

    /// Offset of this substream within an entity block.
    pub fn offset(self) -> u32 {
        match self {
            Self::Status => 0,
            Self::Stdin => 1,
            Self::Stdout => 2,
            Self::Stderr => 3,
            Self::Exit => 4,
            Self::CloseStdout => 5,
            Self::CloseStderr => 6,
            Self::Winch => 7,
            Self::ExecStart => 8,
            Self::Signal => 9,
        }
    }

    fn from_offset(offset: u32) -> Option<Self> {
        Self::ALL.get(offset as usize).copied()
    }

    /// Uppercase wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "STATUS",
            Self::Stdin => "STDIN",
            Self::Stdout => "STDOUT",
            Self::Stderr => "STDERR",
            Self::Exit => "EXIT",
            Self::CloseStdout => "CLOSE_STDOUT",
            Self::CloseStderr => "CLOSE_STDERR",
            Self::Winch => "WINCH",
            Self::ExecStart => "EXEC_START",
            Self::Signal => "SIGNAL",
        }
    }
}

/// A fully qualified `(kind, index, substream)` address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: EntityKind,
    pub index: u8,
    pub substream: Substream,
}

impl Address {
    /// Build an address, rejecting index 255.
    pub fn new(kind: EntityKind, index: u8, substream: Substream) -> Result<Self> {
        if index > MAX_INDEX {
            return Err(FrameError::InvalidIndex(u32::from(index)));
        }
        Ok(Self {
            kind,
            index,
            substream,
        })
    }

    /// The session key for this address.
    pub fn key(&self) -> u32 {
        self.kind.base() + u32::from(self.index) * STRIDE + self.substream.offset()
    }

    /// Recover the address a key was computed from.
    pub fn from_key(key: u32) -> Result<Self> {
        if key < APPLICATION_KEY_START {
            return Err(FrameError::InvalidKey(key));
        }

        let kind = EntityKind::ALL
            .into_iter()
            .find(|kind| {
                let base = kind.base();
                key >= base && key < base + ENTITY_SLOTS as u32 * STRIDE
            })
            .ok_or(FrameError::InvalidKey(key))?;

        let relative = key - kind.base();
        let substream =
            Substream::from_offset(relative % STRIDE).ok_or(FrameError::InvalidKey(key))?;

        Ok(Self {
            kind,
            index: (relative / STRIDE) as u8,
            substream,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}].{}",
            self.kind.name(),
            self.index,
            self.substream.name()
        )
    }
}

/// Key for `(kind, index, substream)`.
///
/// `index` is taken as `u32` so callers holding wider integers get a
/// range error instead of a silent truncation.
pub fn key_for(kind: EntityKind, index: u32, substream: Substream) -> Result<u32> {
    let index = u8::try_from(index)
        .ok()
        .filter(|index| *index <= MAX_INDEX)
        .ok_or(FrameError::InvalidIndex(index))?;
    Ok(Address::new(kind, index, substream)?.key())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn keys_partition_the_application_space() {
        let mut seen = HashSet::new();
        for kind in EntityKind::ALL {
            for index in 0..=MAX_INDEX {
                for substream in Substream::ALL {
                    let key = Address::new(kind, index, substream).unwrap().key();
                    assert!(key >= APPLICATION_KEY_START, "{key:#x} collides with reserved keys");
                    assert!(seen.insert(key), "{key:#x} assigned twice");
                }
            }
        }
        assert_eq!(seen.len(), 2 * ENTITY_SLOTS * Substream::ALL.len());
    }

    #[test]
    fn from_key_inverts_key() {
        for kind in EntityKind::ALL {
            for index in [0, 1, 127, MAX_INDEX] {
                for substream in Substream::ALL {
                    let address = Address::new(kind, index, substream).unwrap();
                    assert_eq!(Address::from_key(address.key()).unwrap(), address);
                }
            }
        }
    }

    #[test]
    fn rejects_index_255() {
        assert!(matches!(
            Address::new(EntityKind::Exec, 255, Substream::Stdout),
            Err(FrameError::InvalidIndex(255))
        ));
        assert!(matches!(
            key_for(EntityKind::Container, 255, Substream::Stdin),
            Err(FrameError::InvalidIndex(255))
        ));
        assert!(matches!(
            key_for(EntityKind::Container, 4096, Substream::Stdin),
            Err(FrameError::InvalidIndex(4096))
        ));
    }

    #[test]
    fn rejects_non_address_keys() {
        for key in [0, 4, 26, 254, 255, CONTAINER_BASE - 1, 0x1FF0, EXEC_BASE + 0xFF0] {
            assert!(
                matches!(Address::from_key(key), Err(FrameError::InvalidKey(_))),
                "{key:#x} should not decode"
            );
        }
        // Offset 10..15 inside a block is unassigned.
        assert!(Address::from_key(CONTAINER_BASE + 10).is_err());
    }

    #[test]
    fn display_names_address() {
        let address = Address::new(EntityKind::Exec, 3, Substream::CloseStderr).unwrap();
        assert_eq!(address.to_string(), "exec[3].CLOSE_STDERR");
        assert_eq!(address.key(), 0x2036);
    }
}
