// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Job queue
//!
//! Jobs are pushed onto an unbounded channel and executed on a pool of tokio
//! tasks, at most `worker_threads` at a time. A job that fails is logged and
//! recorded in the failure list along with its structured-text projection;
//! the queue does not retry it. Jobs that want to continue put a successor
//! back on the queue themselves.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::jobs::{Job, JobError};
use crate::metrics;

/// Accepts jobs for later execution.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Enqueue one job. No ordering or delay guarantees.
    async fn put(&self, job: Box<dyn Job>) -> Result<(), JobError>;
}

/// A job that returned an error or panicked.
#[derive(Debug, Clone, Serialize)]
pub struct FailedJob {
    pub name: String,
    /// Structured-text projection, when the job could still produce one
    pub payload: Option<Value>,
    pub error: String,
}

/// In-process job queue with a bounded worker pool.
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Box<dyn Job>>,
    rx: Mutex<mpsc::UnboundedReceiver<Box<dyn Job>>>,
    pending: AtomicUsize,
    workers: Arc<Semaphore>,
    failures: Mutex<Vec<FailedJob>>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("pending", &self.pending())
            .field("available_workers", &self.workers.available_permits())
            .finish_non_exhaustive()
    }
}

type JobResult = Result<(), FailedJob>;

impl JobQueue {
    pub fn new(worker_threads: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
            workers: Arc::new(Semaphore::new(worker_threads.max(1))),
            failures: Mutex::new(Vec::new()),
        })
    }

    /// Number of jobs waiting to be picked up.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Jobs that failed so far, oldest first.
    pub async fn failed_jobs(&self) -> Vec<FailedJob> {
        self.failures.lock().await.clone()
    }

    /// Execute jobs until the queue is empty and nothing is in flight,
    /// including successors queued by the jobs themselves.
    ///
    /// Returns the number of jobs executed.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut tasks: JoinSet<JobResult> = JoinSet::new();
        let mut executed = 0;

        loop {
            match rx.try_recv() {
                Ok(job) => self.spawn(&mut tasks, job),
                Err(TryRecvError::Empty) => match tasks.join_next().await {
                    Some(result) => {
                        self.record(result).await;
                        executed += 1;
                    }
                    None => break,
                },
                Err(TryRecvError::Disconnected) => break,
            }
        }

        debug!(executed, "Job queue drained");
        executed
    }

    /// Execute jobs until `shutdown` turns true, then wait for the jobs
    /// already started. Jobs still queued stay queued.
    ///
    /// Returns the number of jobs executed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut rx = self.rx.lock().await;
        let mut tasks: JoinSet<JobResult> = JoinSet::new();
        let mut executed = 0;

        info!("Job queue running");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    self.record(result).await;
                    executed += 1;
                }
                job = rx.recv() => match job {
                    Some(job) => self.spawn(&mut tasks, job),
                    None => break,
                },
            }
        }

        info!(in_flight = tasks.len(), "Job queue stopping");
        while let Some(result) = tasks.join_next().await {
            self.record(result).await;
            executed += 1;
        }

        info!(executed, pending = self.pending(), "Job queue stopped");
        executed
    }

    fn spawn(&self, tasks: &mut JoinSet<JobResult>, job: Box<dyn Job>) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        let workers = Arc::clone(&self.workers);
        tasks.spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|e| FailedJob {
                    name: job.name().to_string(),
                    payload: job.to_json().ok(),
                    error: e.to_string(),
                })?;
            execute(job).await
        });
    }

    async fn record(&self, result: Result<JobResult, JoinError>) {
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(failed)) => Some(failed),
            Err(e) => {
                error!(error = %e, "Job task panicked");
                Some(FailedJob {
                    name: "unknown".to_string(),
                    payload: None,
                    error: format!("job panicked: {}", e),
                })
            }
        };

        metrics::record_job_executed(failure.is_some());
        if let Some(failed) = failure {
            self.failures.lock().await.push(failed);
        }
    }
}

async fn execute(job: Box<dyn Job>) -> JobResult {
    let name = job.name();
    // Captured before `apply` consumes the job.
    let payload = job.to_json().ok();

    debug!(job = name, "Executing job");

    job.apply().await.map_err(|e| {
        error!(job = name, payload = ?payload, error = %e, "Job failed");
        FailedJob {
            name: name.to_string(),
            payload,
            error: e.to_string(),
        }
    })
}

#[async_trait]
impl JobScheduler for JobQueue {
    async fn put(&self, job: Box<dyn Job>) -> Result<(), JobError> {
        // Counted before sending so a worker never sees the job first.
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            JobError::QueueClosed
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    use shard_migration_types::PayloadError;

    use crate::nameserver::NameServerError;

    /// Job that counts its executions and optionally spawns children.
    #[derive(Debug)]
    struct CountingJob {
        runs: Arc<AtomicUsize>,
        children: usize,
        fail: bool,
        queue: Arc<JobQueue>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "Counting"
        }

        fn to_json(&self) -> Result<Value, PayloadError> {
            Ok(serde_json::json!({ "Counting": { "children": self.children } }))
        }

        async fn apply(self: Box<Self>) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(JobError::NameServer(NameServerError::Unavailable(
                    "boom".to_string(),
                )));
            }
            if self.children > 0 {
                let child = CountingJob {
                    runs: Arc::clone(&self.runs),
                    children: self.children - 1,
                    fail: false,
                    queue: Arc::clone(&self.queue),
                };
                self.queue.put(Box::new(child)).await?;
            }
            Ok(())
        }
    }

    fn counting(queue: &Arc<JobQueue>, runs: &Arc<AtomicUsize>, children: usize) -> CountingJob {
        CountingJob {
            runs: Arc::clone(runs),
            children,
            fail: false,
            queue: Arc::clone(queue),
        }
    }

    #[tokio::test]
    async fn test_drain_runs_successors() {
        let queue = JobQueue::new(4);
        let runs = Arc::new(AtomicUsize::new(0));

        queue.put(Box::new(counting(&queue, &runs, 3))).await.unwrap();
        queue.put(Box::new(counting(&queue, &runs, 0))).await.unwrap();

        let executed = queue.drain().await;
        assert_eq!(executed, 5);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending(), 0);
        assert!(queue.failed_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let queue = JobQueue::new(1);
        assert_eq!(queue.drain().await, 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_recorded() {
        let queue = JobQueue::new(2);
        let runs = Arc::new(AtomicUsize::new(0));
        let mut job = counting(&queue, &runs, 2);
        job.fail = true;

        queue.put(Box::new(job)).await.unwrap();
        assert_eq!(queue.drain().await, 1);

        let failures = queue.failed_jobs().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "Counting");
        assert!(failures[0].error.contains("boom"));
        assert_eq!(
            failures[0].payload,
            Some(serde_json::json!({ "Counting": { "children": 2 } }))
        );
    }

    /// Job whose body panics.
    #[derive(Debug)]
    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        fn name(&self) -> &'static str {
            "Panicking"
        }

        fn to_json(&self) -> Result<Value, PayloadError> {
            Ok(serde_json::json!({ "Panicking": {} }))
        }

        async fn apply(self: Box<Self>) -> Result<(), JobError> {
            panic!("cursor invariant broken");
        }
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded() {
        let queue = JobQueue::new(2);
        let runs = Arc::new(AtomicUsize::new(0));

        queue.put(Box::new(PanickingJob)).await.unwrap();
        queue.put(Box::new(counting(&queue, &runs, 1))).await.unwrap();

        // The panic stays inside its task; the other chain still runs.
        assert_eq!(queue.drain().await, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let failures = queue.failed_jobs().await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("panicked"));
        assert_eq!(failures[0].payload, None);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let queue = JobQueue::new(2);
        let runs = Arc::new(AtomicUsize::new(0));
        queue.put(Box::new(counting(&queue, &runs, 1))).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.run(shutdown_rx).await }
        });

        // Wait for both the job and its successor.
        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        let executed = runner.await.unwrap();
        assert_eq!(executed, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
