//! Scripted in-memory target for tests.
//!
//! Reads are strict (unmapped bytes fail, like a dead process page), writes
//! are recorded in a log so tests can assert on freeze/patch traffic.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::target::{AddressSpace, Bitness, Protection, Region, TargetMemory};

pub struct MockTargetBuilder {
    bitness: Bitness,
    main_module_base: Address,
    modules: Vec<(String, Address)>,
    memory: BTreeMap<u64, u8>,
    regions: Vec<Region>,
    space: AddressSpace,
    fail_protection: bool,
    fail_allocation: bool,
}

impl MockTargetBuilder {
    pub fn new() -> Self {
        MockTargetBuilder {
            bitness: Bitness::Bits64,
            main_module_base: Address::new(0x1_4000_0000),
            modules: Vec::new(),
            memory: BTreeMap::new(),
            regions: Vec::new(),
            space: AddressSpace::default(),
            fail_protection: false,
            fail_allocation: false,
        }
    }

    pub fn bitness(mut self, bitness: Bitness) -> Self {
        self.bitness = bitness;
        self
    }

    pub fn main_module_base(mut self, base: u64) -> Self {
        self.main_module_base = Address::new(base);
        self
    }

    pub fn module(mut self, name: &str, base: u64) -> Self {
        self.modules.push((name.to_string(), Address::new(base)));
        self
    }

    pub fn bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(address + i as u64, *b);
        }
        self
    }

    pub fn pointer(self, address: u64, value: u64) -> Self {
        self.bytes(address, &value.to_le_bytes())
    }

    pub fn region(mut self, base: u64, size: u64, free: bool) -> Self {
        self.regions.push(Region {
            base: Address::new(base),
            size,
            free,
        });
        self
    }

    pub fn address_space(mut self, space: AddressSpace) -> Self {
        self.space = space;
        self
    }

    pub fn fail_protection(mut self) -> Self {
        self.fail_protection = true;
        self
    }

    pub fn fail_allocation(mut self) -> Self {
        self.fail_allocation = true;
        self
    }

    pub fn build(mut self) -> MockTarget {
        self.regions.sort_by_key(|r| r.base);
        MockTarget {
            bitness: self.bitness,
            main_module_base: self.main_module_base,
            modules: self.modules,
            memory: Mutex::new(self.memory),
            regions: self.regions,
            space: self.space,
            fail_protection: self.fail_protection,
            fail_allocation: self.fail_allocation,
            write_log: Mutex::new(Vec::new()),
            protection_log: Mutex::new(Vec::new()),
            allocations: Mutex::new(Vec::new()),
            next_alloc: Mutex::new(0x5000_0000),
        }
    }
}

impl Default for MockTargetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MockTarget {
    bitness: Bitness,
    main_module_base: Address,
    modules: Vec<(String, Address)>,
    memory: Mutex<BTreeMap<u64, u8>>,
    regions: Vec<Region>,
    space: AddressSpace,
    fail_protection: bool,
    fail_allocation: bool,
    write_log: Mutex<Vec<(u64, Vec<u8>)>>,
    protection_log: Mutex<Vec<(u64, Protection)>>,
    allocations: Mutex<Vec<(u64, usize)>>,
    next_alloc: Mutex<u64>,
}

impl MockTarget {
    pub fn builder() -> MockTargetBuilder {
        MockTargetBuilder::new()
    }

    /// Every write issued against this target, in order.
    pub fn write_log(&self) -> Vec<(u64, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn clear_write_log(&self) {
        self.write_log.lock().unwrap().clear();
    }

    pub fn protection_log(&self) -> Vec<(u64, Protection)> {
        self.protection_log.lock().unwrap().clone()
    }

    pub fn allocations(&self) -> Vec<(u64, usize)> {
        self.allocations.lock().unwrap().clone()
    }

    pub fn bytes_at(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let memory = self.memory.lock().unwrap();
        (0..len as u64)
            .map(|i| memory.get(&(address + i)).copied())
            .collect()
    }
}

impl TargetMemory for MockTarget {
    fn bitness(&self) -> Bitness {
        self.bitness
    }

    fn main_module_base(&self) -> Address {
        self.main_module_base
    }

    fn module_base(&self, name: &str) -> Option<Address> {
        self.modules
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, base)| *base)
    }

    fn read_raw(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        let memory = self.memory.lock().unwrap();
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = *memory
                .get(&(address.get() + i as u64))
                .ok_or(Error::MemoryReadFailed {
                    address: address.get(),
                    message: "unmapped".into(),
                })?;
        }
        Ok(())
    }

    fn write_raw(&self, address: Address, bytes: &[u8]) -> Result<()> {
        let mut memory = self.memory.lock().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            memory.insert(address.get() + i as u64, *b);
        }
        self.write_log
            .lock()
            .unwrap()
            .push((address.get(), bytes.to_vec()));
        Ok(())
    }

    fn change_protection(
        &self,
        address: Address,
        _len: usize,
        protection: Protection,
    ) -> Result<Protection> {
        if self.fail_protection {
            return Err(Error::ProtectionChangeFailed {
                address: address.get(),
                message: "scripted failure".into(),
            });
        }
        self.protection_log
            .lock()
            .unwrap()
            .push((address.get(), protection));
        Ok(Protection::EXECUTE_READ)
    }

    fn allocate(&self, preferred: Address, size: usize) -> Result<Address> {
        if self.fail_allocation {
            return Err(Error::AllocationFailed {
                preferred: preferred.get(),
                size,
            });
        }
        let granted = if preferred.is_null() {
            let mut next = self.next_alloc.lock().unwrap();
            let addr = *next;
            *next += ((size as u64).div_ceil(self.space.allocation_granularity) + 1)
                * self.space.allocation_granularity;
            addr
        } else {
            preferred.get()
        };
        self.allocations.lock().unwrap().push((granted, size));
        Ok(Address::new(granted))
    }

    fn query_region(&self, address: Address) -> Option<Region> {
        self.regions
            .iter()
            .find(|r| address.get() >= r.base.get() && address.get() < r.base.get() + r.size)
            .copied()
    }

    fn layout(&self) -> AddressSpace {
        self.space
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_reads_and_logged_writes() {
        let target = MockTarget::builder().bytes(0x20000, &[1, 2, 3, 4]).build();

        let mut buf = [0u8; 4];
        target.read_raw(Address::new(0x20000), &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        // One byte past the seeded range fails.
        let mut long = [0u8; 5];
        assert!(target.read_raw(Address::new(0x20000), &mut long).is_err());

        target.write_raw(Address::new(0x30000), &[9]).unwrap();
        assert_eq!(target.write_log(), vec![(0x30000, vec![9])]);
        assert_eq!(target.bytes_at(0x30000, 1), Some(vec![9]));
    }

    #[test]
    fn module_lookup_is_case_insensitive() {
        let target = MockTarget::builder().module("Game.exe", 0x40_0000).build();
        assert_eq!(target.module_base("game.EXE"), Some(Address::new(0x40_0000)));
        assert_eq!(target.module_base("other.dll"), None);
    }
}
