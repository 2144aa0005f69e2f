//! Bounded-concurrency permit gate.
//!
//! Every module factory call and every module build acquires exactly one
//! permit and releases it on every exit path; the RAII [`Permit`] guard
//! makes the release unconditional. Waiters are woken in FIFO order; a
//! released permit is handed directly to the front waiter instead of
//! going back into the pool, so late arrivals cannot overtake.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Default number of concurrent factory/build permits.
pub const DEFAULT_PARALLELISM: usize = 100;

#[derive(Debug)]
struct State {
    permits: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
}

/// Counting permit gate with a configurable capacity.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    permits: capacity,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Acquire one permit, suspending until one is available.
    pub async fn acquire(&self) -> Permit {
        let waiter = {
            let mut state = self.inner.state.lock();
            if state.permits > 0 {
                state.permits -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            // The sender hands the permit over directly; an error can
            // only mean the semaphore was torn down mid-wait.
            let _ = rx.await;
        }
        Permit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of permits currently available.
    pub fn available(&self) -> usize {
        self.inner.state.lock().permits
    }

    fn release(inner: &Inner) {
        let mut state = inner.state.lock();
        // Skip waiters whose tasks were dropped while queued.
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.permits += 1;
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}

/// RAII guard for one acquired permit.
#[derive(Debug)]
pub struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        Semaphore::release(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_up_to_capacity() {
        let semaphore = Semaphore::new(2);
        let first = semaphore.acquire().await;
        let second = semaphore.acquire().await;
        assert_eq!(semaphore.available(), 0);
        drop(first);
        assert_eq!(semaphore.available(), 1);
        drop(second);
        assert_eq!(semaphore.available(), 2);
    }

    #[tokio::test]
    async fn test_waiters_are_woken_fifo() {
        let semaphore = Semaphore::new(1);
        let held = semaphore.acquire().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let semaphore = semaphore.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let permit = semaphore.acquire().await;
                order.lock().push(i);
                drop(permit);
            }));
            // Give the task a chance to enqueue before the next one.
            tokio::task::yield_now().await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_release_skips_cancelled_waiters() {
        let semaphore = Semaphore::new(1);
        let held = semaphore.acquire().await;

        let blocked = {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
            })
        };
        tokio::task::yield_now().await;
        blocked.abort();
        let _ = blocked.await;

        drop(held);
        // The cancelled waiter must not swallow the permit.
        let _reacquired = semaphore.acquire().await;
    }
}
