//! Bounded-concurrency worker pool with order-stable results.
//!
//! Acquisition stages run their I/O-bound tasks through this pool. Results
//! come back in submission order regardless of completion order, so citation
//! ids are assigned deterministically independent of network timing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, anyhow};
use crossbeam_channel::unbounded;
use tracing::debug;

/// Default bound on in-flight tasks.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Shared flag requesting best-effort cancellation of queued work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Tasks already running finish; queued tasks are
    /// resolved as errors without executing.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bounded executor for per-item fallible tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
    cancel: CancelToken,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self::with_cancel(max_workers, CancelToken::new())
    }

    pub fn with_cancel(max_workers: usize, cancel: CancelToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `worker` over `items` with at most `max_workers` in flight.
    ///
    /// The returned vector has one slot per input item, in submission order.
    /// A failing item occupies its slot as an `Err` and never aborts the rest
    /// of the batch; the calling stage decides batch pass/fail policy.
    pub fn submit<T, R, F>(&self, items: Vec<T>, worker: F) -> Vec<Result<R>>
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }
        let workers = self.max_workers.min(total);
        debug!(total, workers, "dispatching pool batch");

        let (task_tx, task_rx) = unbounded();
        for task in items.into_iter().enumerate() {
            // The receiver is still open; an unbounded channel cannot refuse.
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let (result_tx, result_rx) = unbounded::<(usize, Result<R>)>();
        let worker = &worker;
        let cancel = &self.cancel;
        thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok((index, item)) = task_rx.recv() {
                        let result = if cancel.is_cancelled() {
                            Err(anyhow!("task {index} cancelled"))
                        } else {
                            worker(&item)
                        };
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<Result<R>>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        for (index, result) in result_rx {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| Err(anyhow!("task {index} was dropped by the pool")))
            })
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn empty_batch_returns_empty() {
        let pool = WorkerPool::new(3);
        let results = pool.submit(Vec::<u32>::new(), |item| Ok(*item));
        assert!(results.is_empty());
    }

    /// Ten items with max_workers = 5 where item 3 fails: ten results in
    /// submission order, exactly one failure marker at index 3.
    #[test]
    fn one_failure_does_not_abort_the_batch() {
        let pool = WorkerPool::new(5);
        let items: Vec<usize> = (0..10).collect();
        let results = pool.submit(items, |item| {
            if *item == 3 {
                Err(anyhow!("item {item} refused"))
            } else {
                Ok(*item * 10)
            }
        });

        assert_eq!(results.len(), 10);
        let failures: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_err())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failures, vec![3]);
        for (index, result) in results.iter().enumerate() {
            if index != 3 {
                assert_eq!(*result.as_ref().expect("success"), index * 10);
            }
        }
    }

    /// Results stay in submission order even when later items finish first.
    #[test]
    fn results_keep_submission_order_under_reversed_completion() {
        let pool = WorkerPool::new(4);
        let items: Vec<u64> = (0..8).collect();
        let results = pool.submit(items, |item| {
            thread::sleep(Duration::from_millis(40u64.saturating_sub(*item * 5)));
            Ok(*item)
        });

        let values: Vec<u64> = results.into_iter().map(|r| r.expect("success")).collect();
        assert_eq!(values, (0..8).collect::<Vec<u64>>());
    }

    /// The pool never runs more than max_workers tasks at once.
    #[test]
    fn respects_worker_bound() {
        let pool = WorkerPool::new(2);
        let in_flight = AtomicUsize::new(0);
        let high_water = AtomicUsize::new(0);

        let items: Vec<usize> = (0..12).collect();
        let results = pool.submit(items, |_| {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(current, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(high_water.load(Ordering::SeqCst) <= 2);
    }

    /// Cancellation resolves queued items to errors without executing them.
    #[test]
    fn cancelled_pool_skips_queued_items() {
        let token = CancelToken::new();
        let pool = WorkerPool::with_cancel(3, token.clone());
        token.cancel();

        let executed = AtomicUsize::new(0);
        let results = pool.submit((0..6).collect::<Vec<usize>>(), |_| {
            executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.max_workers(), 1);
        let results = pool.submit(vec![1, 2, 3], |item| Ok(*item));
        assert_eq!(results.len(), 3);
    }
}
