//! Resolved addresses in the target's virtual address space.

use std::fmt;

/// Addresses below this value sit in the reserved OS range and are never
/// valid read/write targets.
pub const WRITABLE_FLOOR: u64 = 0x10000;

/// An address in the target process, resolved to a pointer-width integer.
///
/// Zero is the sentinel for "unresolved". Arithmetic is explicit via
/// [`Address::plus`]; there are no implicit numeric coercions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u64);

impl Address {
    /// The "unresolved/invalid" sentinel.
    pub const NULL: Address = Address(0);

    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Whether the address may be passed to read/write operations.
    pub const fn is_valid(self) -> bool {
        self.0 >= WRITABLE_FLOOR
    }

    /// Apply a signed byte offset, returning a new address.
    pub const fn plus(self, offset: i64) -> Self {
        Address(self.0.wrapping_add(offset as u64))
    }

    /// Absolute distance to another address in bytes.
    pub const fn distance_to(self, other: Address) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
