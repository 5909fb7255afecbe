//! Write command implementation.

use anyhow::Result;
use memkit_core::{Session, TargetMemory, Value};
use tracing::info;

pub fn run<T: TargetMemory + Send + Sync + 'static>(
    session: &Session<T>,
    expr: &str,
    value: &Value,
    protect: bool,
) -> Result<()> {
    let address = session.resolve(expr);
    session.write_at(address, value, protect)?;
    info!("wrote {} bytes to {address}", value.byte_len());
    Ok(())
}
