//! Bounded offload executor for blocking classifier calls.
//!
//! A fixed pool of dedicated OS threads drains a FIFO job queue. With the
//! default single worker, at most one job runs at any instant no matter how
//! many requests are waiting on it.
//!
//! # Timeouts
//!
//! [`PendingJob::wait`] bounds how long the *caller* waits. It never cancels
//! the job: a job whose waiter has given up keeps running on its worker, and
//! its result is dropped when it finishes. Rust threads cannot be killed, and
//! the classifier offers no cancellation hook.
//!
//! # Usage
//!
//! ```rust,ignore
//! use moodscan::executor::{ExecutorConfig, OffloadExecutor};
//! use std::time::Duration;
//!
//! let executor = OffloadExecutor::new(ExecutorConfig::default())?;
//! let pending = executor.submit(|| expensive_call())?;
//! let value = pending.wait(Duration::from_secs(60)).await?;
//! ```

use crate::observability::{RequestContext, current_request_id, enter_request_context};
use crate::{Error, Result};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error as ThisError;
use tokio::sync::oneshot;

/// Default worker count. The classifier holds a loaded model and is not
/// assumed to be thread-safe.
pub const DEFAULT_WORKERS: usize = 1;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for the offload executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads (minimum 1).
    pub workers: usize,
    /// Name prefix for worker threads.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            thread_name: "moodscan-offload".to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Why a caller did not get a job's value.
#[derive(Debug, ThisError)]
pub enum OffloadError {
    /// The executor no longer accepts work.
    #[error("offload executor is shut down")]
    ShutDown,

    /// The caller stopped waiting. The job may still be running.
    #[error("job did not finish within {}ms", .waited.as_millis())]
    TimedOut {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The job panicked on its worker.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was dropped without producing a value.
    #[error("job was abandoned before completion")]
    Abandoned,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    running: AtomicUsize,
}

/// Fixed-size worker pool with a FIFO queue.
pub struct OffloadExecutor {
    config: ExecutorConfig,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl OffloadExecutor {
    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(&receiver))
                .map_err(|e| Error::OperationFailed {
                    operation: "offload_spawn_worker".to_string(),
                    cause: e.to_string(),
                })?;
            handles.push(handle);
        }

        tracing::debug!(workers, "Offload executor started");

        Ok(Self {
            config: ExecutorConfig { workers, ..config },
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            counters,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.config.workers
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently executing.
    #[must_use]
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// Enqueues a job behind any already submitted.
    ///
    /// The current request id and tracing span are carried onto the worker
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::ShutDown`] if the executor has been shut down.
    pub fn submit<T, F>(&self, job: F) -> std::result::Result<PendingJob<T>, OffloadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let counters = Arc::clone(&self.counters);
        let parent_span = tracing::Span::current();
        let request_id = current_request_id();

        let wrapped: Job = Box::new(move || {
            let _request_guard = request_id
                .map(RequestContext::from_id)
                .map(enter_request_context);
            let _parent = parent_span.enter();
            let span = tracing::info_span!("offload.job");
            let _guard = span.enter();

            counters.queued.fetch_sub(1, Ordering::SeqCst);
            counters.running.fetch_add(1, Ordering::SeqCst);
            record_queue_depth(&counters);

            let outcome = catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "Offloaded job panicked");
                metrics::counter!("offload_jobs_panicked_total").increment(1);
                message
            });

            counters.running.fetch_sub(1, Ordering::SeqCst);

            // Waiter gone means it timed out; the value is discarded.
            if tx.send(outcome).is_err() {
                metrics::counter!("offload_jobs_abandoned_total").increment(1);
                tracing::debug!("Offloaded job finished with no waiter, result discarded");
            }
        });

        let Ok(guard) = self.sender.lock() else {
            return Err(OffloadError::ShutDown);
        };
        let Some(sender) = guard.as_ref() else {
            return Err(OffloadError::ShutDown);
        };

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(wrapped).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(OffloadError::ShutDown);
        }
        drop(guard);

        metrics::counter!("offload_jobs_submitted_total").increment(1);
        record_queue_depth(&self.counters);

        Ok(PendingJob {
            receiver: rx,
            submitted_at: Instant::now(),
        })
    }

    /// Stops accepting jobs, lets the workers drain the queue, and joins them.
    ///
    /// Blocks until every queued job has finished.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let handles = self
            .workers
            .lock()
            .map(|mut workers| std::mem::take(&mut *workers))
            .unwrap_or_default();

        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("Offload worker exited abnormally");
            }
        }
        tracing::debug!("Offload executor shut down");
    }
}

impl Drop for OffloadExecutor {
    fn drop(&mut self) {
        // Closing the queue lets idle workers exit; busy ones finish first.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

/// Handle to a submitted job's eventual value.
#[derive(Debug)]
pub struct PendingJob<T> {
    receiver: oneshot::Receiver<std::result::Result<T, String>>,
    submitted_at: Instant,
}

impl<T> PendingJob<T> {
    /// Waits at most `timeout` for the job's value.
    ///
    /// The timeout covers queueing time as well as execution time. On timeout
    /// the job is left to run to completion in the background.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::TimedOut`], [`OffloadError::Panicked`], or
    /// [`OffloadError::Abandoned`].
    pub async fn wait(self, timeout: Duration) -> std::result::Result<T, OffloadError> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(Ok(value))) => {
                metrics::histogram!("offload_wait_seconds")
                    .record(self.submitted_at.elapsed().as_secs_f64());
                Ok(value)
            },
            Ok(Ok(Err(message))) => Err(OffloadError::Panicked(message)),
            Ok(Err(_)) => Err(OffloadError::Abandoned),
            Err(_) => {
                metrics::counter!("offload_wait_timeouts_total").increment(1);
                tracing::debug!(
                    waited_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Stopped waiting for offloaded job, it will complete in background"
                );
                Err(OffloadError::TimedOut { waited: timeout })
            },
        }
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        // Hold the lock only while dequeuing so other workers can pick up jobs.
        let next = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => return,
        };
        match next {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_queue_depth(counters: &Counters) {
    metrics::gauge!("offload_queue_depth").set(counters.queued.load(Ordering::SeqCst) as f64);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn single_worker() -> OffloadExecutor {
        OffloadExecutor::new(ExecutorConfig::default()).unwrap()
    }

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.thread_name, "moodscan-offload");
    }

    #[test]
    fn test_zero_workers_clamped_to_one() {
        let executor = OffloadExecutor::new(ExecutorConfig::new().with_workers(0)).unwrap();
        assert_eq!(executor.workers(), 1);
    }

    #[tokio::test]
    async fn test_submit_returns_value() {
        let executor = single_worker();
        let pending = executor.submit(|| 21 * 2).unwrap();
        assert_eq!(pending.wait(Duration::from_secs(5)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_single_worker_never_overlaps() {
        let executor = single_worker();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let pending: Vec<_> = (0..5)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                executor
                    .submit(move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        for job in pending {
            job.wait(Duration::from_secs(5)).await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let executor = single_worker();
        let order = Arc::new(Mutex::new(Vec::new()));

        let pending: Vec<_> = (0..6)
            .map(|i| {
                let order = Arc::clone(&order);
                executor
                    .submit(move || order.lock().unwrap().push(i))
                    .unwrap()
            })
            .collect();
        for job in pending {
            job.wait(Duration::from_secs(5)).await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_timeout_stops_waiting_not_working() {
        let executor = single_worker();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let pending = executor
            .submit(move || {
                std::thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        let started = Instant::now();
        let result = pending.wait(Duration::from_millis(30)).await;
        assert!(matches!(result, Err(OffloadError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_millis(180));
        assert!(!finished.load(Ordering::SeqCst));

        // The abandoned job still drains; a follow-up job runs after it.
        let follow_up = executor.submit(|| "next").unwrap();
        assert_eq!(follow_up.wait(Duration::from_secs(5)).await.unwrap(), "next");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_job_is_contained() {
        let executor = single_worker();

        let pending = executor.submit(|| -> u8 { panic!("model exploded") }).unwrap();
        match pending.wait(Duration::from_secs(5)).await {
            Err(OffloadError::Panicked(message)) => assert!(message.contains("model exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }

        let pending = executor.submit(|| 7).unwrap();
        assert_eq!(pending.wait(Duration::from_secs(5)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_counters_track_queue() {
        let executor = single_worker();
        let gate = Arc::new(AtomicBool::new(false));

        let blocker = {
            let gate = Arc::clone(&gate);
            executor
                .submit(move || {
                    while !gate.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                })
                .unwrap()
        };
        let queued = executor.submit(|| ()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while executor.running() != 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executor.running(), 1);
        assert_eq!(executor.queued(), 1);

        gate.store(true, Ordering::SeqCst);
        blocker.wait(Duration::from_secs(5)).await.unwrap();
        queued.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(executor.queued(), 0);
    }

    #[test]
    fn test_shutdown_drains_then_rejects() {
        let executor = single_worker();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            executor
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        executor.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(matches!(executor.submit(|| ()), Err(OffloadError::ShutDown)));
    }
}
