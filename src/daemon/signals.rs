//! Signal handling: SIGTERM/SIGINT graceful shutdown and SIGUSR1 "run the
//! next round now".
//!
//! Uses `signal-hook` flag registration; the orchestrator polls the flags while
//! it waits between rounds instead of blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Granularity of interruptible sleeps.
pub const POLL_SLICE: Duration = Duration::from_secs(1);

/// Why an interruptible wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    RoundRequested,
    Shutdown,
}

/// Signal state shared between the OS handlers and the round loop.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    round_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks. Registration failures
    /// are logged, not fatal.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// A handler that only reacts to programmatic requests.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            round_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate round was requested.
    pub fn take_round_request(&self) -> bool {
        self.round_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_round(&self) {
        self.round_flag.store(true, Ordering::Relaxed);
    }

    /// Sleep up to `total` in [`POLL_SLICE`] steps, returning early on a signal.
    pub fn wait(&self, total: Duration) -> WaitOutcome {
        let deadline = Instant::now() + total;
        loop {
            if self.should_shutdown() {
                return WaitOutcome::Shutdown;
            }
            if self.take_round_request() {
                return WaitOutcome::RoundRequested;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitOutcome::Elapsed;
            }
            thread::sleep(remaining.min(POLL_SLICE));
        }
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            tracing::warn!(error = %e, "failed to register SIGTERM");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            tracing::warn!(error = %e, "failed to register SIGINT");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.round_flag)) {
                tracing::warn!(error = %e, "failed to register SIGUSR1");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
