//! Time source used by the throttler and the in-memory storage.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Supplies the current instant.
///
/// The throttler never calls `SystemTime::now()` directly; it asks its clock,
/// so tests can pin time to a known value.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Clock backed by the system wall clock. Queries the OS on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same instant, so a test can keep one handle and hand
/// another to the throttler or storage under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: SystemTime) {
        *self.lock() = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SystemTime> {
        // A poisoned lock still holds a valid instant.
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.lock()
    }
}
