// SIGINT/SIGTERM handling for the service loop

use crate::error::RecorderResult;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Register SIGINT and SIGTERM to raise the returned flag.
///
/// The handler only stores `true`; the service checks the flag once per tick
/// and tears down outside signal context.
pub fn install_shutdown_flag() -> RecorderResult<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    log::debug!("Shutdown handlers registered for SIGINT and SIGTERM");
    Ok(flag)
}
