//! Cooperative cancellation driven by process signals.
//!
//! SIGINT or SIGTERM flips a process-wide flag. Nothing is interrupted
//! forcibly: workers finish their current task, queued tasks are drained
//! unprocessed, and the run surfaces partial reports with a nonzero exit
//! status.

use anyhow::Result;
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};

static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Installs the SIGINT/SIGTERM handler. Call once, early.
pub fn install_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        warn!("termination signal received, letting tasks in flight finish");
        CANCELLED.store(true, Ordering::SeqCst);
    })?;
    Ok(())
}

/// The process-wide cancellation flag. The scheduler polls it between
/// tasks.
pub fn flag() -> &'static AtomicBool {
    &CANCELLED
}

pub fn is_cancelled() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}
