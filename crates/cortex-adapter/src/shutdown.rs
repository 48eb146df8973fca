//! Graceful-shutdown flag.
//!
//! SIGTERM and SIGINT set an atomic flag from a signal-safe handler; the
//! session loop polls it at window boundaries so pending I/O completes
//! before exit. The harness side never needs signals; it closes the
//! transport instead.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Shared shutdown-requested flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// A flag not connected to any signal (tests, in-process launchers).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag wired to SIGTERM and SIGINT.
    pub fn install() -> std::io::Result<Self> {
        let flag = Self::new();
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag.0))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag.0))?;
        Ok(flag)
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Request shutdown (what the signal handler does).
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let flag = ShutdownFlag::new();
        assert!(!flag.requested());
        flag.request();
        assert!(flag.requested());
        assert!(flag.clone().requested());
    }
}
