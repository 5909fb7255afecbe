//! Read command implementation.

use anyhow::Result;
use memkit_core::{Session, TargetMemory, ValueKind};

use crate::commands::format_value;

pub fn run<T: TargetMemory + Send + Sync + 'static>(
    session: &Session<T>,
    expr: &str,
    kind: &ValueKind,
) -> Result<()> {
    let value = session.read(expr, kind)?;
    println!("{}", format_value(&value));
    Ok(())
}
