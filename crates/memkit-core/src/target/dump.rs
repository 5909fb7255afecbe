//! Full address-space dump.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::address::Address;
use crate::error::Result;
use crate::target::TargetMemory;

/// Walk the target's regions from the bottom of the address space and append
/// every readable committed region to `path`. Unreadable regions are skipped,
/// not fatal. Returns the number of bytes written.
pub fn dump_memory<T: TargetMemory>(target: &T, path: &Path) -> Result<u64> {
    let space = target.layout();
    let mut writer = BufWriter::new(File::create(path)?);
    let mut cursor = space.min_address;
    let mut written = 0u64;

    while let Some(region) = target.query_region(Address::new(cursor)) {
        if !region.free {
            let mut buf = vec![0u8; region.size as usize];
            match target.read_raw(region.base, &mut buf) {
                Ok(()) => {
                    writer.write_all(&buf)?;
                    written += region.size;
                }
                Err(e) => debug!(base = %region.base, "skipping unreadable region: {e}"),
            }
        }

        let next = region.base.get().wrapping_add(region.size);
        if next <= cursor || next >= space.max_address {
            break;
        }
        cursor = next;
    }

    info!(bytes = written, path = %path.display(), "dumped target memory");
    Ok(written)
}
