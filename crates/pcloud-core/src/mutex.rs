//! Async mutex guarding a push or pull cycle

use tokio::sync::{Mutex, MutexGuard};

/// Lock without data, used to keep one cycle in flight at a time
#[derive(Debug, Default)]
pub struct AsyncMutex {
    inner: Mutex<()>,
}

/// Held for the duration of a cycle; dropping it releases the mutex
pub type AsyncMutexGuard<'a> = MutexGuard<'a, ()>;

impl AsyncMutex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the mutex and hold it until the guard is dropped
    pub async fn lock(&self) -> AsyncMutexGuard<'_> {
        self.inner.lock().await
    }

    /// Resolve once the mutex is free, without holding it
    pub async fn wait(&self) {
        drop(self.inner.lock().await);
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_resolves_after_release() {
        let mutex = Arc::new(AsyncMutex::new());
        let guard = mutex.lock().await;
        assert!(mutex.is_locked());

        let waiter = {
            let mutex = Arc::clone(&mutex);
            tokio::spawn(async move { mutex.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!mutex.is_locked());
    }
}
