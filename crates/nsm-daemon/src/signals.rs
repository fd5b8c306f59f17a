//! Minimal signal handling (§9 "Signal handling & process exit", §10.6): a
//! handler that does nothing but flip an atomic flag. All actual shutdown
//! logic lives in the main loop, which polls the flag — never in the signal
//! handler itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DaemonError;

/// Installs handlers for `SIGTERM` and `SIGINT` that set `flag` to `true`.
/// Returns the same flag for convenience so callers can poll it from the
/// accept loop.
pub fn install(flag: &Arc<AtomicBool>) -> Result<(), DaemonError> {
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(flag))
        .map_err(DaemonError::SignalHandler)?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(flag))
        .map_err(DaemonError::SignalHandler)?;
    Ok(())
}

#[must_use]
pub fn shutdown_requested_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

pub fn is_shutdown_requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_unset() {
        let flag = shutdown_requested_flag();
        assert!(!is_shutdown_requested(&flag));
    }

    #[test]
    fn install_succeeds() {
        let flag = shutdown_requested_flag();
        install(&flag).expect("signal handler installation should succeed");
    }
}
