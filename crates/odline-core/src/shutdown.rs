//! Graceful shutdown on SIGINT/SIGTERM

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

static FLAG: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// Process-wide flag, set once a termination signal arrives
pub fn shutdown_flag() -> &'static Arc<AtomicBool> {
    &FLAG
}

pub fn is_shutdown_requested() -> bool {
    FLAG.load(Ordering::Relaxed)
}

/// Route SIGINT and SIGTERM to the shutdown flag.
///
/// Workers finish the page in flight and stop before the next one.
pub fn install_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(shutdown_flag()))?;
    }
    Ok(())
}
