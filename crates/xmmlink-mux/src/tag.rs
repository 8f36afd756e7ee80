//! Well-known tag identifiers.
//!
//! Identifiers are stored in wire order, so `ADBH` is the bytes `41 44 42 48`.

use std::fmt;

/// A 4-byte tag identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagId(pub [u8; 4]);

impl TagId {
    /// Datagram block header: carries raw packets.
    pub const ADBH: TagId = TagId(*b"ADBH");
    /// Datagram table header: trailer listing packet bounds.
    pub const ADTH: TagId = TagId(*b"ADTH");
    /// Command block header.
    pub const ACBH: TagId = TagId(*b"ACBH");
    /// Command header: opens the data channel.
    pub const CMDH: TagId = TagId(*b"CMDH");

    /// Build an identifier from its wire bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Wire bytes of this identifier.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            for &b in &self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.0))
        }
    }
}

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({self})")
    }
}
