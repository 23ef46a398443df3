//! Bounded worker pool for user callbacks
//!
//! Dispatchers hand matched callbacks to this pool from the hook thread.
//! Submission never blocks: when the queue is full the job is refused and
//! the caller decides what to report. Every job runs isolated, so an error
//! or panic in one callback is logged and discarded without touching the
//! worker, the dispatcher or other callbacks.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::WorkerError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool with a bounded job queue
pub struct WorkerPool {
    sender: Sender<Job>,
    threads: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `threads` workers sharing a queue of `capacity` pending jobs
    pub fn new(threads: usize, capacity: usize) -> Result<Self, WorkerError> {
        let threads = threads.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<Job>(capacity);

        for worker_id in 0..threads {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("callback-worker-{worker_id}"))
                .spawn(move || {
                    debug!(worker_id, "callback worker started");
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    debug!(worker_id, "callback worker stopped");
                })
                .map_err(|e| WorkerError::Spawn(e.to_string()))?;
        }

        debug!(threads, capacity, "worker pool initialized");

        Ok(Self {
            sender: tx,
            threads,
            capacity,
        })
    }

    /// Queue a callback without blocking
    ///
    /// `label` names the callback in failure logs.
    pub fn submit<F>(&self, label: String, job: F) -> Result<(), WorkerError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let isolated: Job = Box::new(move || run_isolated(&label, job));
        match self.sender.try_send(isolated) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WorkerError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::Disconnected),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.sender.len()
    }
}

// Dropping the sender closes the queue; workers drain it and exit on their own
impl Drop for WorkerPool {
    fn drop(&mut self) {
        debug!(threads = self.threads, "worker pool shutting down");
    }
}

fn run_isolated<F>(label: &str, job: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(callback = label, error = %e, "callback failed"),
        Err(payload) => warn!(
            callback = label,
            panic = panic_message(payload.as_ref()),
            "callback panicked"
        ),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_runs_jobs() {
        let pool = WorkerPool::new(2, 8).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.submit(format!("job-{i}"), move || {
                tx.send(i)?;
                Ok(())
            })
            .unwrap();
        }

        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_failures_are_contained() {
        let pool = WorkerPool::new(1, 8).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.submit("fails".into(), || anyhow::bail!("boom")).unwrap();
        pool.submit("panics".into(), || panic!("kaboom")).unwrap();
        pool.submit("after".into(), move || {
            tx.send(())?;
            Ok(())
        })
        .unwrap();

        // The single worker survived both failures
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_full_queue_refuses_without_blocking() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        pool.submit("blocker".into(), move || {
            started_tx.send(())?;
            release_rx.recv()?;
            Ok(())
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        pool.submit("queued".into(), || Ok(())).unwrap();
        assert_eq!(pool.queued(), 1);
        assert_eq!(
            pool.submit("refused".into(), || Ok(())),
            Err(WorkerError::QueueFull)
        );

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
