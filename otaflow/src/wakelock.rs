//! Keep-awake resource held while downloads are active.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Host facility that keeps the device from sleeping.
///
/// The controller acquires it when the first download starts and releases
/// it when the last one stops. Implementations need not be re-entrant:
/// `acquire` and `release` are always called in strict alternation.
pub trait WakeLock: Send + Sync {
    /// Start keeping the device awake.
    fn acquire(&self);

    /// Allow the device to sleep again.
    fn release(&self);
}

/// Wake lock for hosts without such a facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) {}

    fn release(&self) {}
}

/// Scoped hold on a [`WakeLock`]; released on drop.
pub struct AwakeGuard {
    lock: Arc<dyn WakeLock>,
}

impl AwakeGuard {
    /// Acquire the lock for the lifetime of the guard.
    pub fn acquire(lock: Arc<dyn WakeLock>) -> Self {
        debug!("Acquiring wake lock");
        lock.acquire();
        Self { lock }
    }
}

impl Drop for AwakeGuard {
    fn drop(&mut self) {
        debug!("Releasing wake lock");
        self.lock.release();
    }
}

impl fmt::Debug for AwakeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwakeGuard").finish_non_exhaustive()
    }
}
