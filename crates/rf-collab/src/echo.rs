//! Echo suppression
//!
//! While a remote message is being applied, every store mutation it causes
//! would look like a local edit to the emit paths. The guard is engaged for
//! the whole apply; emit paths check it and stay silent. The scope restores
//! the previous state on drop, so early returns, errors and unwinding panics
//! all leave the guard released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared echo-suppression flag
#[derive(Debug, Clone, Default)]
pub struct EchoGuard {
    engaged: Arc<AtomicBool>,
}

impl EchoGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Engage until the returned scope is dropped
    #[must_use = "the guard is released as soon as the scope is dropped"]
    pub fn engage(&self) -> EchoScope {
        let previous = self.engaged.swap(true, Ordering::AcqRel);
        EchoScope {
            engaged: Arc::clone(&self.engaged),
            previous,
        }
    }
}

/// RAII scope of an engaged [`EchoGuard`]
#[derive(Debug)]
pub struct EchoScope {
    engaged: Arc<AtomicBool>,
    previous: bool,
}

impl Drop for EchoScope {
    fn drop(&mut self) {
        self.engaged.store(self.previous, Ordering::Release);
    }
}
