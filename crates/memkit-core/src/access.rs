//! Protected typed reads and writes.
//!
//! Writes relax page protection to read-write-execute, perform the raw
//! write, then restore whatever protection was captured. Reads are plain
//! fixed-size copies.

use tracing::warn;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::target::{Protection, TargetMemory};
use crate::value::{Value, ValueKind};

/// Read a typed value from target memory.
pub fn read_value<T: TargetMemory>(target: &T, address: Address, kind: &ValueKind) -> Result<Value> {
    if !address.is_valid() {
        return Err(Error::InvalidAddress(address.get()));
    }
    let mut buf = vec![0u8; kind.byte_len()];
    target.read_raw(address, &mut buf)?;
    Ok(kind.decode(&buf))
}

/// Write a typed value to target memory.
///
/// With `protect` set, protection is relaxed to RWX around the write and the
/// captured previous protection restored afterwards. A failed relax is logged
/// and the raw write still attempted (emulated targets have no protection
/// API); the restore only happens when the relax captured something.
pub fn write_value<T: TargetMemory>(
    target: &T,
    address: Address,
    value: &Value,
    protect: bool,
) -> Result<()> {
    if !address.is_valid() {
        return Err(Error::InvalidAddress(address.get()));
    }

    let bytes = value.to_bytes();

    let mut previous = None;
    if protect {
        match target.change_protection(address, bytes.len(), Protection::EXECUTE_READWRITE) {
            Ok(old) => previous = Some(old),
            Err(e) => warn!(address = %address, "failed to relax protection: {e}"),
        }
    }

    let result = target.write_raw(address, &bytes);

    if let Some(old) = previous {
        if let Err(e) = target.change_protection(address, bytes.len(), old) {
            warn!(address = %address, "failed to restore protection: {e}");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MockTarget;

    #[test]
    fn rejects_low_addresses() {
        let target = MockTarget::builder().build();
        let err = write_value(&target, Address::new(0xFFFF), &Value::Int32(1), true).unwrap_err();
        assert!(err.is_invalid_address());
        let err = read_value(&target, Address::NULL, &ValueKind::Int32).unwrap_err();
        assert!(err.is_invalid_address());
        // Nothing reached the target.
        assert!(target.write_log().is_empty());
        assert!(target.protection_log().is_empty());
    }

    #[test]
    fn write_read_round_trip() {
        let target = MockTarget::builder().build();
        let addr = Address::new(0x20000);
        write_value(&target, addr, &Value::Int32(0x1234), true).unwrap();
        assert_eq!(
            read_value(&target, addr, &ValueKind::Int32).unwrap(),
            Value::Int32(0x1234)
        );
    }

    #[test]
    fn protection_is_relaxed_and_restored() {
        let target = MockTarget::builder().build();
        let addr = Address::new(0x20000);
        write_value(&target, addr, &Value::Byte(1), true).unwrap();

        let log = target.protection_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], (0x20000, Protection::EXECUTE_READWRITE));
        // The mock reports EXECUTE_READ as the prior protection.
        assert_eq!(log[1], (0x20000, Protection::EXECUTE_READ));
    }

    #[test]
    fn protect_opt_out_skips_protection() {
        let target = MockTarget::builder().build();
        write_value(&target, Address::new(0x20000), &Value::Byte(1), false).unwrap();
        assert!(target.protection_log().is_empty());
        assert_eq!(target.write_log().len(), 1);
    }

    #[test]
    fn failed_relax_still_writes() {
        let target = MockTarget::builder().fail_protection().build();
        write_value(&target, Address::new(0x20000), &Value::Byte(1), true).unwrap();
        assert_eq!(target.write_log().len(), 1);
    }

    #[test]
    fn float_round_trip() {
        let target = MockTarget::builder().build();
        let addr = Address::new(0x20000);
        write_value(&target, addr, &Value::Float(3.5), false).unwrap();
        assert_eq!(
            read_value(&target, addr, &ValueKind::Float).unwrap(),
            Value::Float(3.5)
        );
    }
}
