//! Environment locking.
//!
//! Exclusive environments admit one session at a time across every module
//! of a run; environments marked for parallel usage are never contended.
//! Acquisition blocks up to a configured deadline and is abort-aware.
//! Release is guaranteed by an RAII lease, so a panicking or failing
//! session can never wedge the environment for the rest of the run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::abort::{AbortFlag, POLL_INTERVAL};
use crate::error::Failure;

/// Serializes access to exclusive environments by id.
#[derive(Debug)]
pub struct EnvironmentLocker {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    timeout: Duration,
}

/// Outcome of an acquisition attempt that did not fail.
#[derive(Debug)]
pub enum Acquire {
    Granted(EnvLease),
    Aborted,
}

/// Held lock on an environment. Dropping the lease releases the lock.
#[derive(Debug)]
pub struct EnvLease {
    locker: Arc<EnvironmentLocker>,
    env_id: String,
    exclusive: bool,
    released: AtomicBool,
    /// Time spent waiting before the grant.
    pub wait: Duration,
}

impl EnvironmentLocker {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        })
    }

    /// Acquire `env_id`. Non-exclusive environments are granted
    /// immediately; exclusive ones wait for the current holder up to the
    /// lock timeout, checking the abort flag along the way.
    pub fn acquire(
        self: &Arc<Self>,
        env_id: &str,
        exclusive: bool,
        abort: &AbortFlag,
    ) -> Result<Acquire, Failure> {
        let start = Instant::now();
        if exclusive {
            let deadline = start + self.timeout;
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            while held.contains(env_id) {
                if abort.is_raised() {
                    return Ok(Acquire::Aborted);
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(Failure::LockTimeout {
                        env: env_id.to_string(),
                        waited_secs: self.timeout.as_secs(),
                    });
                }
                let wait_for = deadline.saturating_duration_since(now).min(POLL_INTERVAL);
                let (guard, _) = self
                    .released
                    .wait_timeout(held, wait_for)
                    .unwrap_or_else(|e| e.into_inner());
                held = guard;
            }
            held.insert(env_id.to_string());
        }

        let wait = start.elapsed();
        debug!(env = env_id, exclusive, wait_ms = wait.as_millis() as u64, "environment acquired");
        Ok(Acquire::Granted(EnvLease {
            locker: Arc::clone(self),
            env_id: env_id.to_string(),
            exclusive,
            released: AtomicBool::new(false),
            wait,
        }))
    }

    fn release(&self, env_id: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(env_id);
        drop(held);
        self.released.notify_all();
        debug!(env = env_id, "environment released");
    }
}

impl EnvLease {
    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    /// Release the lock early. Safe to call more than once; the Drop impl
    /// becomes a no-op afterwards.
    pub fn release(&self) {
        if self.exclusive && !self.released.swap(true, Ordering::SeqCst) {
            self.locker.release(&self.env_id);
        }
    }
}

impl Drop for EnvLease {
    fn drop(&mut self) {
        self.release();
    }
}
