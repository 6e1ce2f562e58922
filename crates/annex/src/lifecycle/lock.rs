// Operation Lock - The single mutual-exclusion region
//
// create, update, delete, build and reconcile all hold this for their whole
// duration. Waiting is bounded; giving up yields `LockContention`, which
// callers should retry with backoff.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::MutexGuard;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} waited {waited:?} for the plugin lock held by {holder}")]
pub struct LockContention {
    pub operation: &'static str,
    pub holder: &'static str,
    pub waited: Duration,
}

pub struct OperationLock {
    region: tokio::sync::Mutex<()>,
    holder: Mutex<Option<&'static str>>,
    wait: Duration,
}

/// Held for the duration of one operation; releases on drop
pub struct OperationGuard<'a> {
    _region: MutexGuard<'a, ()>,
    holder: &'a Mutex<Option<&'static str>>,
    operation: &'static str,
}

impl OperationLock {
    pub fn new(wait: Duration) -> Self {
        Self {
            region: tokio::sync::Mutex::new(()),
            holder: Mutex::new(None),
            wait,
        }
    }

    pub async fn acquire(
        &self,
        operation: &'static str,
    ) -> Result<OperationGuard<'_>, LockContention> {
        let region = match tokio::time::timeout(self.wait, self.region.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                let holder = (*self.holder.lock()).unwrap_or("unknown");
                tracing::warn!("{} gave up waiting for the lock held by {}", operation, holder);
                return Err(LockContention {
                    operation,
                    holder,
                    waited: self.wait,
                });
            }
        };

        *self.holder.lock() = Some(operation);
        tracing::debug!("Lock acquired by {}", operation);
        Ok(OperationGuard {
            _region: region,
            holder: &self.holder,
            operation,
        })
    }

    /// Operation currently holding the lock, if any
    pub fn holder(&self) -> Option<&'static str> {
        *self.holder.lock()
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        *self.holder.lock() = None;
        tracing::debug!("Lock released by {}", self.operation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_contention_times_out() {
        let lock = OperationLock::new(Duration::from_millis(50));
        let guard = lock.acquire("build").await.unwrap();
        assert_eq!(lock.holder(), Some("build"));

        let err = lock.acquire("create").await.err().unwrap();
        assert_eq!(err.operation, "create");
        assert_eq!(err.holder, "build");

        drop(guard);
        assert_eq!(lock.holder(), None);
        assert!(lock.acquire("create").await.is_ok());
    }

    #[tokio::test]
    async fn test_waiters_proceed_after_release() {
        let lock = Arc::new(OperationLock::new(Duration::from_secs(5)));
        let guard = lock.acquire("create").await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire("delete").await.unwrap();
                lock.holder()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(waiter.await.unwrap(), Some("delete"));
    }

    #[tokio::test]
    async fn test_released_on_error_path() {
        async fn failing(lock: &OperationLock) -> Result<(), &'static str> {
            let _guard = lock.acquire("build").await.map_err(|_| "contended")?;
            Err("resolver exited with 1")
        }

        let lock = OperationLock::new(Duration::from_millis(50));
        assert!(failing(&lock).await.is_err());
        assert!(lock.acquire("build").await.is_ok());
    }
}
