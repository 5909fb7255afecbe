//! Freeze command implementation.
//!
//! Freezes the value and keeps rewriting it until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use memkit_core::{CancelToken, Session, TargetMemory, Value};
use tracing::info;

pub fn run<T: TargetMemory + Send + Sync + 'static>(
    session: &Session<T>,
    expr: &str,
    value: Value,
    interval: Duration,
) -> Result<()> {
    session.freeze(expr, value, interval)?;
    info!("frozen {expr:?}, press Ctrl-C to stop");

    let token = Arc::new(CancelToken::new());
    let handler = Arc::clone(&token);
    ctrlc::set_handler(move || handler.cancel())?;
    while !token.wait(Duration::from_secs(1)) {}

    session.shutdown();
    info!("unfrozen");
    Ok(())
}
