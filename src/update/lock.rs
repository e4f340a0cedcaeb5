// ABOUTME: Scan lock: at most one update session per provider at a time.
// ABOUTME: Try-acquire for triggers that should not queue, blocking acquire for those that should.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use super::error::CoordinatorError;
use super::session::Trigger;

/// Information about who holds the scan lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockHolder {
    /// Hostname of the machine running the session.
    pub host: String,
    pub pid: u32,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
}

impl LockHolder {
    fn new(trigger: Trigger) -> Self {
        Self {
            host: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            trigger,
            started_at: Utc::now(),
        }
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} trigger on {} (pid {}) since {}",
            self.trigger,
            self.host,
            self.pid,
            self.started_at.format("%H:%M:%S")
        )
    }
}

/// Created once per provider and handed to its coordinator. Clones share
/// the same lock.
#[derive(Debug, Clone, Default)]
pub struct ScanLock {
    gate: Arc<tokio::sync::Mutex<()>>,
    holder: Arc<Mutex<Option<LockHolder>>>,
}

impl ScanLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock now or fail with `LockBusy`.
    pub fn try_acquire(&self, trigger: Trigger) -> Result<ScanGuard, CoordinatorError> {
        match self.gate.clone().try_lock_owned() {
            Ok(permit) => Ok(self.guard(permit, trigger)),
            Err(_) => Err(CoordinatorError::LockBusy {
                holder: self.holder(),
            }),
        }
    }

    /// Wait for the lock. Waiters are served in arrival order.
    pub async fn acquire(&self, trigger: Trigger) -> ScanGuard {
        let permit = self.gate.clone().lock_owned().await;
        self.guard(permit, trigger)
    }

    pub fn holder(&self) -> Option<LockHolder> {
        self.holder.lock().clone()
    }

    pub fn is_held(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    fn guard(&self, permit: OwnedMutexGuard<()>, trigger: Trigger) -> ScanGuard {
        *self.holder.lock() = Some(LockHolder::new(trigger));
        ScanGuard {
            holder: self.holder.clone(),
            _permit: permit,
        }
    }
}

/// Releases the scan lock on drop, including on panic and early return.
#[derive(Debug)]
pub struct ScanGuard {
    holder: Arc<Mutex<Option<LockHolder>>>,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.holder.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_try_acquire_is_busy() {
        let lock = ScanLock::new();
        let guard = lock.try_acquire(Trigger::Api).unwrap();
        let err = lock.try_acquire(Trigger::Schedule).unwrap_err();
        match err {
            CoordinatorError::LockBusy { holder } => {
                assert_eq!(holder.unwrap().trigger, Trigger::Api);
            }
            other => panic!("unexpected {other:?}"),
        }
        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.holder().is_none());
        assert!(lock.try_acquire(Trigger::Schedule).is_ok());
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_release() {
        let lock = ScanLock::new();
        let guard = lock.try_acquire(Trigger::Manual).unwrap();
        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire(Trigger::Signal).await;
                lock.holder().map(|h| h.trigger)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        assert_eq!(waiter.await.unwrap(), Some(Trigger::Signal));
    }

    #[test]
    fn guard_releases_on_panic() {
        let lock = ScanLock::new();
        let cloned = lock.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.try_acquire(Trigger::Api).unwrap();
            panic!("session blew up");
        }));
        assert!(result.is_err());
        assert!(lock.try_acquire(Trigger::Api).is_ok());
    }
}
