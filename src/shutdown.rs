//! Cooperative shutdown
//!
//! A single process-wide flag, flipped once by signal delivery and polled
//! by the accept loop, the discovery loop, and every connection handler on
//! their deadline ticks. The flag is passed explicitly to each loop at
//! construction time; there is no hidden global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle onto the process-wide running/stopped flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    stopped: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until shutdown has been requested.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Relaxed)
    }

    /// Request shutdown. Idempotent; repeated calls are harmless.
    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Flip the flag on SIGINT/SIGTERM.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            log::info!("received shutdown signal, closing connections");
            flag.trigger();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_running() {
        assert!(ShutdownFlag::new().is_running());
    }

    #[test]
    fn test_trigger_is_visible_to_clones() {
        let flag = ShutdownFlag::new();
        let observer = flag.clone();

        flag.trigger();
        assert!(!observer.is_running());

        // Repeated triggers are harmless.
        flag.trigger();
        assert!(!observer.is_running());
    }
}
