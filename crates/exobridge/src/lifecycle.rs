//! # Lifecycle Guard
//!
//! Tracks whether a service instance is open. The only transition is
//! `Open -> Closed`; it never reverses.
//!
//! ## Invariants
//! - **Visibility**: The flag is written with `Release` and read with `Acquire`,
//!   so once any thread observes `closed`, every later check on any thread does too.
//! - **Single Transition**: Exactly one `close()` call reports the transition.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct LifecycleGuard {
    closed: Arc<AtomicBool>,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Moves the guard to `Closed`. Returns `true` only for the call that
    /// performed the transition.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Fails with `ServiceClosed` once the guard is closed.
    pub fn check(&self, service: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ServiceClosed(service.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_transitions_once() {
        let guard = LifecycleGuard::new();
        assert!(guard.check("svc").is_ok());
        assert!(guard.close());
        assert!(!guard.close());
        assert!(matches!(guard.check("svc"), Err(Error::ServiceClosed(ref s)) if s == "svc"));
    }

    #[test]
    fn test_clones_share_state_across_threads() {
        let guard = LifecycleGuard::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = guard.clone();
                std::thread::spawn(move || g.close())
            })
            .collect();

        let transitions = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(transitions, 1);
        assert!(guard.is_closed());
    }
}
