//! Target-process abstraction.
//!
//! [`TargetMemory`] is the seam between the core subsystems and the OS: the
//! resolver, accessor, patch engine and freeze scheduler all borrow it
//! read-only. The Windows backend lives in [`process`]; tests use the mock
//! in `mock`.

mod dump;
#[cfg(target_os = "windows")]
pub mod process;

#[cfg(test)]
pub mod mock;

pub use dump::dump_memory;
#[cfg(target_os = "windows")]
pub use process::{ModuleInfo, ProcessTarget};

#[cfg(test)]
pub use mock::{MockTarget, MockTargetBuilder};

use strum::{Display, EnumString, IntoStaticStr};

use crate::address::Address;
use crate::error::Result;

/// Pointer width of the target process, determined once when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum Bitness {
    #[strum(serialize = "32")]
    Bits32,
    #[strum(serialize = "64")]
    Bits64,
}

impl Bitness {
    /// Pointer size in bytes.
    pub const fn pointer_size(self) -> usize {
        match self {
            Bitness::Bits32 => 4,
            Bitness::Bits64 => 8,
        }
    }
}

/// Memory page protection, carried opaquely between relax and restore.
///
/// The numeric values are the Windows `PAGE_*` constants; other backends may
/// map their own flags into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection(pub u32);

impl Protection {
    pub const READONLY: Protection = Protection(0x02);
    pub const READWRITE: Protection = Protection(0x04);
    pub const EXECUTE_READ: Protection = Protection(0x20);
    pub const EXECUTE_READWRITE: Protection = Protection(0x40);
}

/// One contiguous range of the target's address space, as reported by the
/// OS memory-query facility. Produced transiently during region walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: Address,
    pub size: u64,
    pub free: bool,
}

/// Platform address-space limits and allocation granularity.
#[derive(Debug, Clone, Copy)]
pub struct AddressSpace {
    pub min_address: u64,
    pub max_address: u64,
    pub allocation_granularity: u64,
}

impl Default for AddressSpace {
    fn default() -> Self {
        // Typical Win64 user-mode limits.
        AddressSpace {
            min_address: 0x10000,
            max_address: 0x7FFF_FFFE_FFFF,
            allocation_granularity: 0x10000,
        }
    }
}

/// Capabilities the core borrows from an opened target process.
pub trait TargetMemory {
    fn bitness(&self) -> Bitness;

    /// Base address of the target's main module.
    fn main_module_base(&self) -> Address;

    /// Base address of a loaded module by case-insensitive exact name match.
    fn module_base(&self, name: &str) -> Option<Address>;

    /// Fill `buf` from target memory at `address`.
    fn read_raw(&self, address: Address, buf: &mut [u8]) -> Result<()>;

    /// Copy `bytes` into target memory at `address`.
    fn write_raw(&self, address: Address, bytes: &[u8]) -> Result<()>;

    /// Change protection of `[address, address + len)`, returning the previous
    /// protection so the caller can restore it.
    fn change_protection(
        &self,
        address: Address,
        len: usize,
        protection: Protection,
    ) -> Result<Protection>;

    /// Allocate `size` bytes of committed read-write-execute memory.
    ///
    /// `preferred` is a hint; [`Address::NULL`] lets the OS pick.
    fn allocate(&self, preferred: Address, size: usize) -> Result<Address>;

    /// The region containing `address`, or `None` past the end of the
    /// addressable range.
    fn query_region(&self, address: Address) -> Option<Region>;

    fn layout(&self) -> AddressSpace;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_sizes() {
        assert_eq!(Bitness::Bits32.pointer_size(), 4);
        assert_eq!(Bitness::Bits64.pointer_size(), 8);
    }

    #[test]
    fn bitness_parses_from_str() {
        use std::str::FromStr;
        assert_eq!(Bitness::from_str("64").unwrap(), Bitness::Bits64);
        assert_eq!(Bitness::Bits32.to_string(), "32");
    }
}
