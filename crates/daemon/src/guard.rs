//! Reentrancy guards for pipeline passes.
//!
//! A pass that finds its guard held by a still-running previous pass is
//! skipped rather than queued.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-permit, non-blocking guard around one kind of pass.
#[derive(Debug, Clone)]
pub struct PassGuard {
    name: &'static str,
    semaphore: Arc<Semaphore>,
}

impl PassGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Try to start a pass without waiting.
    ///
    /// Returns None if a pass is already running. The pass ends when the
    /// returned permit is dropped.
    pub fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// True while a pass holds the guard.
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_entry_is_refused() {
        let guard = PassGuard::new("scan");
        assert!(!guard.is_busy());

        let permit = guard.try_enter().expect("first entry succeeds");
        assert!(guard.is_busy());
        assert!(guard.try_enter().is_none());

        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let guard = PassGuard::new("actions");
        let other = guard.clone();

        let _permit = guard.try_enter().unwrap();
        assert!(other.is_busy());
        assert!(other.try_enter().is_none());
        assert_eq!(other.name(), "actions");
    }

    #[test]
    fn test_guards_are_independent() {
        let scan = PassGuard::new("scan");
        let actions = PassGuard::new("actions");

        let _permit = scan.try_enter().unwrap();
        assert!(actions.try_enter().is_some());
    }
}
