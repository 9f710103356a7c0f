//! SIGINT/SIGTERM handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hps_common::error::{HpsError, HpsResult};

/// Sets `shutdown` on the first signal; a second signal exits immediately.
pub(super) fn install_signal_handler(shutdown: Arc<AtomicBool>) -> HpsResult<()> {
    ctrlc::set_handler(move || {
        if shutdown.swap(true, Ordering::SeqCst) {
            tracing::warn!("second shutdown signal, exiting immediately");
            std::process::exit(1);
        }
        tracing::info!("shutdown signal received, stopping reactor");
    })
    .map_err(|error| HpsError::Io(format!("install signal handler failed: {error}")))
}
