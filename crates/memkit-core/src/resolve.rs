//! Pointer-path expression resolver.
//!
//! An expression names a base address plus a chain of dereference-and-offset
//! steps, e.g. `base+1240C,10-8,B0+C-8+4`. Levels are comma-separated; the
//! first level resolves a base (main-module keyword, loaded module name, or
//! hex literal) plus offsets, and each further level dereferences the current
//! address as a pointer-sized value before applying its own offsets.
//!
//! Resolution never fails loudly: any parse error, unknown module or dead
//! read yields [`Address::NULL`] and the caller compares against it.

use tracing::warn;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::target::{Bitness, TargetMemory};

/// Resolve an expression to a live address in the target.
///
/// Returns [`Address::NULL`] on any parse or read failure. The final address
/// is returned without a trailing dereference.
pub fn resolve<T: TargetMemory>(target: &T, expr: &str) -> Address {
    let expr: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if expr.is_empty() {
        return Address::NULL;
    }

    let mut levels = expr.split(',');

    let Some(base_level) = levels.next() else {
        return Address::NULL;
    };
    let Some(terms) = tokenize(base_level) else {
        return Address::NULL;
    };
    let Some((first, offsets)) = terms.split_first() else {
        return Address::NULL;
    };
    if first.negated {
        return Address::NULL;
    }

    let mut address = base_address(target, &first.text);
    if address.is_null() {
        return Address::NULL;
    }
    match offset_sum(offsets) {
        Some(sum) => address = address.plus(sum),
        None => return Address::NULL,
    }

    for level in levels {
        address = match read_pointer(target, address) {
            Ok(next) => next,
            Err(_) => return Address::NULL,
        };
        let Some(sum) = tokenize(level).as_deref().and_then(offset_sum) else {
            return Address::NULL;
        };
        address = address.plus(sum);
    }

    address
}

/// Dereference `address` as a pointer-sized little-endian value.
pub fn read_pointer<T: TargetMemory>(target: &T, address: Address) -> Result<Address> {
    if !address.is_valid() {
        return Err(Error::InvalidAddress(address.get()));
    }
    match target.bitness() {
        Bitness::Bits32 => {
            let mut buf = [0u8; 4];
            target.read_raw(address, &mut buf)?;
            Ok(Address::new(u64::from(u32::from_le_bytes(buf))))
        }
        Bitness::Bits64 => {
            let mut buf = [0u8; 8];
            target.read_raw(address, &mut buf)?;
            Ok(Address::new(u64::from_le_bytes(buf)))
        }
    }
}

struct Term {
    negated: bool,
    text: String,
}

/// Split one level into signed terms. Each `-` applies to exactly the
/// following term, so `B0+c-8+4` yields +B0, +c, -8, +4. `None` on empty or
/// dangling-separator input.
fn tokenize(level: &str) -> Option<Vec<Term>> {
    let mut terms = Vec::new();
    let mut text = String::new();
    let mut negated = false;

    for c in level.chars() {
        match c {
            '+' | '-' => {
                if text.is_empty() {
                    // Sign prefix ("-8" or the "+-4" spelling).
                    if c == '-' {
                        negated = !negated;
                    }
                } else {
                    terms.push(Term { negated, text });
                    text = String::new();
                    negated = c == '-';
                }
            }
            _ => text.push(c),
        }
    }

    if text.is_empty() {
        return None;
    }
    terms.push(Term { negated, text });
    Some(terms)
}

fn offset_sum(terms: &[Term]) -> Option<i64> {
    let mut sum = 0i64;
    for term in terms {
        let value = parse_hex(&term.text)? as i64;
        sum = if term.negated {
            sum.wrapping_sub(value)
        } else {
            sum.wrapping_add(value)
        };
    }
    Some(sum)
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Resolve the base term of the first level: keyword, loaded module, or hex
/// literal, in that order. A loaded module shadows a same-spelled literal.
fn base_address<T: TargetMemory>(target: &T, token: &str) -> Address {
    if token.eq_ignore_ascii_case("base") || token.eq_ignore_ascii_case("main") {
        return target.main_module_base();
    }
    if let Some(base) = target.module_base(token) {
        return base;
    }
    match parse_hex(token) {
        Some(value) => Address::new(value),
        None => {
            warn!("module {token:?} was not found in the target's module list");
            Address::NULL
        }
    }
}
