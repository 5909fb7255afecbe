//! Detour splicing and code-cave allocation.
//!
//! A detour overwrites an instruction at the source address with a jump into
//! a freshly allocated cave holding caller-supplied code plus a return jump
//! into the original flow. Three jump-site encodings are supported; the near
//! relative jump needs a cave within ±2 GiB of the source, which is what the
//! free-region search is for.

use strum::{Display, EnumString, IntoStaticStr};
use tracing::{debug, warn};

use crate::access;
use crate::address::Address;
use crate::error::{Error, Result};
use crate::target::{Bitness, TargetMemory};
use crate::value::Value;

const NOP: u8 = 0x90;

/// Jump-site encoding used to enter the cave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DetourKind {
    /// `E9 rel32` — 5 bytes, cave must be within ±2 GiB of the source.
    Jump,
    /// `FF 25 00000000` + inline absolute address — 14 bytes, no range limit.
    JumpFar,
    /// `FF 15` call through an inline absolute address — 16 bytes; the cave
    /// ends in `ret` so execution falls back into the following code.
    Call,
}

impl DetourKind {
    /// Minimum number of source bytes the jump site occupies.
    pub const fn min_replace_len(self) -> usize {
        match self {
            DetourKind::Jump => 5,
            DetourKind::JumpFar => 14,
            DetourKind::Call => 16,
        }
    }
}

/// Caller parameters for [`create_detour`].
#[derive(Debug, Clone)]
pub struct DetourSpec<'a> {
    /// Code to place at the start of the cave.
    pub new_bytes: &'a [u8],
    /// Number of source bytes to replace; must cover whole instructions and
    /// be at least the kind's minimum.
    pub replace_count: usize,
    pub kind: DetourKind,
    /// Scratch data co-located after the cave code.
    pub trailing: Option<Trailing<'a>>,
    /// Size of the allocated cave region.
    pub cave_size: usize,
    /// When false the cave is written but the source is left unpatched.
    pub patch_site: bool,
}

/// Data written at `cave + cave_code_len + offset`.
#[derive(Debug, Clone, Copy)]
pub struct Trailing<'a> {
    pub bytes: &'a [u8],
    pub offset: usize,
}

impl<'a> DetourSpec<'a> {
    pub fn new(new_bytes: &'a [u8], replace_count: usize, kind: DetourKind) -> Self {
        DetourSpec {
            new_bytes,
            replace_count,
            kind,
            trailing: None,
            cave_size: 0x1000,
            patch_site: true,
        }
    }
}

/// Descriptor of a spliced detour. Immutable once created; restoring the
/// original source bytes is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct DetourPatch {
    pub source: Address,
    pub cave: Address,
    /// Bytes placed (or to be placed) at the source.
    pub jump_site: Vec<u8>,
    /// Bytes written into the cave.
    pub cave_code: Vec<u8>,
}

/// Generate the jump-site bytes for a detour from `source` to `target`
/// without touching any process — the dry-run variant.
///
/// Returns `None` when `replace_count` is below the kind's minimum;
/// otherwise exactly `replace_count` bytes, NOP-padded past the encoding.
pub fn jump_site_bytes(
    source: Address,
    target: Address,
    kind: DetourKind,
    replace_count: usize,
) -> Option<Vec<u8>> {
    if replace_count < kind.min_replace_len() {
        return None;
    }
    Some(encode_site(source, target, kind, replace_count))
}

fn encode_site(source: Address, target: Address, kind: DetourKind, replace_count: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; replace_count];
    match kind {
        DetourKind::Jump => {
            bytes[0] = 0xE9;
            let disp = target.get().wrapping_sub(source.get()).wrapping_sub(5) as u32;
            bytes[1..5].copy_from_slice(&disp.to_le_bytes());
        }
        DetourKind::JumpFar => {
            bytes[0] = 0xFF;
            bytes[1] = 0x25;
            // 32-bit zero displacement, then the inline absolute address.
            bytes[6..14].copy_from_slice(&target.get().to_le_bytes());
        }
        DetourKind::Call => {
            bytes[0] = 0xFF;
            bytes[1] = 0x15;
            bytes[2] = 0x02;
            bytes[6] = 0xEB;
            bytes[7] = 0x08;
            bytes[8..16].copy_from_slice(&target.get().to_le_bytes());
        }
    }
    for b in &mut bytes[kind.min_replace_len()..] {
        *b = NOP;
    }
    bytes
}

/// Cave contents: the caller's code followed by the return into the original
/// flow right after the replaced region (a plain `ret` for call-style caves).
fn cave_code(source: Address, cave: Address, spec: &DetourSpec<'_>) -> Vec<u8> {
    let resume = source.plus(spec.replace_count as i64);
    let mut code = spec.new_bytes.to_vec();
    match spec.kind {
        DetourKind::Jump => {
            let from = cave.plus(code.len() as i64);
            let disp = resume.get().wrapping_sub(from.get()).wrapping_sub(5) as u32;
            code.push(0xE9);
            code.extend_from_slice(&disp.to_le_bytes());
        }
        DetourKind::JumpFar => {
            code.extend_from_slice(&[0xFF, 0x25, 0, 0, 0, 0]);
            code.extend_from_slice(&resume.get().to_le_bytes());
        }
        DetourKind::Call => code.push(0xC3),
    }
    code
}

/// Splice a detour at `source`.
///
/// Allocates a cave (near the source for [`DetourKind::Jump`], wherever the
/// OS picks otherwise), writes the cave code and optional trailing data, and
/// patches the source through the protected write path unless
/// `spec.patch_site` is false. Nothing is written when allocation fails.
pub fn create_detour<T: TargetMemory>(
    target: &T,
    source: Address,
    spec: &DetourSpec<'_>,
) -> Result<DetourPatch> {
    let minimum = spec.kind.min_replace_len();
    if spec.replace_count < minimum {
        return Err(Error::ReplaceCountTooSmall {
            kind: spec.kind.into(),
            minimum,
            actual: spec.replace_count,
        });
    }
    if !source.is_valid() {
        return Err(Error::InvalidAddress(source.get()));
    }

    let cave = allocate_cave(target, source, spec)?;
    debug!(source = %source, cave = %cave, kind = %spec.kind, "allocated code cave");

    let cave_code = cave_code(source, cave, spec);
    let jump_site = encode_site(source, cave, spec.kind, spec.replace_count);

    target.write_raw(cave, &cave_code)?;
    if let Some(trailing) = spec.trailing {
        let at = cave.plus((cave_code.len() + trailing.offset) as i64);
        target.write_raw(at, trailing.bytes)?;
    }
    if spec.patch_site {
        access::write_value(target, source, &Value::Bytes(jump_site.clone()), true)?;
    }

    Ok(DetourPatch {
        source,
        cave,
        jump_site,
        cave_code,
    })
}

fn allocate_cave<T: TargetMemory>(
    target: &T,
    source: Address,
    spec: &DetourSpec<'_>,
) -> Result<Address> {
    // The near jump's 32-bit displacement limits reach, so hunt for a free
    // block close to the source, stepping the preferred address when the OS
    // rejects the hint. The absolute kinds take whatever the OS gives.
    if spec.kind == DetourKind::Jump {
        let mut preferred = source;
        for _ in 0..10 {
            let hint = find_free_region(target, preferred, spec.cave_size);
            match target.allocate(hint, spec.cave_size) {
                Ok(cave) if !cave.is_null() => return Ok(cave),
                _ => preferred = preferred.plus(0x10000),
            }
        }
        warn!(source = %source, "no cave found near source, letting the OS pick");
    }

    match target.allocate(Address::NULL, spec.cave_size) {
        Ok(cave) if !cave.is_null() => Ok(cave),
        _ => Err(Error::AllocationFailed {
            preferred: source.get(),
            size: spec.cave_size,
        }),
    }
}

/// Search window half-width around the preferred address (±2 GiB minus
/// headroom, matching the near jump's reach).
const SEARCH_SPAN: u64 = 0x7000_0000;

/// Find a free block of `size` bytes closest to `preferred`, aligned to the
/// allocation granularity.
///
/// Returns [`Address::NULL`] when no region in the search window fits; the
/// caller then lets the OS pick an address.
pub fn find_free_region<T: TargetMemory>(target: &T, preferred: Address, size: usize) -> Address {
    let space = target.layout();
    let granularity = space.allocation_granularity;
    let preferred = preferred.get();

    let mut low = preferred.wrapping_sub(SEARCH_SPAN);
    let mut high = preferred.wrapping_add(SEARCH_SPAN);
    if target.bitness() == Bitness::Bits64 {
        if low < space.min_address || low > space.max_address {
            low = space.min_address;
        }
        if high < space.min_address || high > space.max_address {
            high = space.max_address;
        }
    } else {
        low = space.min_address;
        high = space.max_address;
    }

    let mut best = Address::NULL;
    let mut cursor = low;

    while let Some(region) = target.query_region(Address::new(cursor)) {
        if region.base.get() > high {
            return best;
        }

        if region.free {
            // Align the usable start up to the granularity.
            let misalign = region.base.get() % granularity;
            let adjust = if misalign > 0 { granularity - misalign } else { 0 };
            let start = region.base.get() + adjust;
            let usable = region.size.saturating_sub(adjust);

            if usable >= size as u64 {
                let mut candidate = start;
                if candidate < preferred {
                    // Push toward the preferred address: end of the region,
                    // capped at preferred, aligned back down.
                    candidate = start + (usable - size as u64);
                    if candidate > preferred {
                        candidate = preferred;
                    }
                    candidate -= candidate % granularity;
                }
                let candidate = Address::new(candidate);
                if best.is_null()
                    || candidate.distance_to(Address::new(preferred))
                        < best.distance_to(Address::new(preferred))
                {
                    best = candidate;
                }
            }
        }

        // Advance by the granularity-rounded region size; bail if the walk
        // would stall or leave the window.
        let mut span = region.size;
        if span % granularity > 0 {
            span += granularity - span % granularity;
        }
        let next = region.base.get().wrapping_add(span);
        if next >= high || next <= cursor {
            return best;
        }
        cursor = next;
    }

    best
}
