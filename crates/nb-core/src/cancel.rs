//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a shared flag polled by the batch engine between
//! files. The CLI wires it to SIGINT; the job queue owns one and sets it from
//! `cancel_all`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared, clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the token can guard the next job.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

static INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    // Only async-signal-safe work here: one atomic store.
    if let Some(flag) = INTERRUPT_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Route SIGINT to `token`.
///
/// Only the first installed token receives interrupts; later calls return
/// `false`. On non-unix targets this is a no-op returning `false`.
pub fn install_interrupt_handler(token: &CancellationToken) -> bool {
    if INTERRUPT_FLAG.set(Arc::clone(&token.flag)).is_err() {
        return false;
    }
    install_platform_handler()
}

#[cfg(unix)]
fn install_platform_handler() -> bool {
    let handler = on_interrupt as extern "C" fn(libc::c_int);
    let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        tracing::warn!("Failed to install SIGINT handler");
        return false;
    }
    tracing::debug!("SIGINT handler installed");
    true
}

#[cfg(not(unix))]
fn install_platform_handler() -> bool {
    false
}
