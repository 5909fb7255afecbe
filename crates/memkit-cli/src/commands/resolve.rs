//! Resolve command implementation.

use anyhow::{Result, bail};
use memkit_core::{Session, TargetMemory};

pub fn run<T: TargetMemory + Send + Sync + 'static>(session: &Session<T>, expr: &str) -> Result<()> {
    let address = session.resolve(expr);
    if address.is_null() {
        bail!("expression {expr:?} did not resolve");
    }
    println!("{address}");
    Ok(())
}
