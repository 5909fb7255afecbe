//! Detour-calc command implementation.
//!
//! Dry run of the jump-site encoder: prints the bytes a detour would place
//! at the source without opening any process.

use anyhow::{Result, bail};
use memkit_core::{Address, DetourKind, jump_site_bytes};

pub fn run(source: u64, target: u64, kind: DetourKind, replace_count: usize) -> Result<()> {
    let Some(bytes) = jump_site_bytes(
        Address::new(source),
        Address::new(target),
        kind,
        replace_count,
    ) else {
        bail!(
            "{kind} needs at least {} bytes to replace, got {replace_count}",
            kind.min_replace_len()
        );
    };

    let rendered: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    println!("{}", rendered.join(" "));
    Ok(())
}
