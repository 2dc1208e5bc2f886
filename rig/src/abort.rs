//! Run-wide abort signal.
//!
//! One flag is shared by every worker of a playbook run. Suspension points
//! (lock wait, driver wait, results grace wait, inter-test idle) observe it
//! and unwind with best-effort cleanup instead of blocking to completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Poll interval used by abort-aware waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cloneable handle to a run-wide abort flag.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning early when the flag
    /// is raised. Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.is_raised() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(POLL_INTERVAL));
        }
        !self.is_raised()
    }
}
