//! Dump command implementation.

use std::path::Path;

use anyhow::Result;
use memkit_core::{Session, TargetMemory, dump_memory};

pub fn run<T: TargetMemory + Send + Sync + 'static>(
    session: &Session<T>,
    out: &Path,
) -> Result<()> {
    let written = dump_memory(session.target(), out)?;
    println!("wrote {written} bytes to {}", out.display());
    Ok(())
}
