//! Bounded worker pool for fanning out authorization checks.
//!
//! A fixed set of long-lived tokio tasks pull work from a bounded queue.
//! `submit` waits for queue space, so a burst of checks applies backpressure
//! to the caller instead of growing memory. Tasks must not submit to the pool
//! they run on; with a full queue that deadlocks.

use crate::error::PoolError;
use futures::FutureExt;
use futures::future::BoxFuture;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolConfig {
    /// Number of worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue slots; `submit` waits when all are taken. Defaults to `workers`.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// How long `stop` lets queued and running tasks finish, in seconds.
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
}

fn default_workers() -> usize {
    150
}

fn default_drain_timeout_seconds() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: None,
            drain_timeout_seconds: default_drain_timeout_seconds(),
        }
    }
}

impl PoolConfig {
    /// Creates a config with `workers` workers and default queue and drain.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers)
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

/// Handle to the output of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Waits for the task to finish and returns its output.
    pub async fn join(self) -> Result<T, Report<PoolError>> {
        self.rx.await.map_err(|_| PoolError::TaskAborted.into())
    }
}

/// A fixed-size pool of workers draining a bounded queue.
pub struct WorkerPool {
    config: PoolConfig,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    /// Starts the workers.
    ///
    /// Must be called within a tokio runtime. Zero workers or a zero-length
    /// queue are rejected.
    pub fn new(config: PoolConfig) -> Result<Self, Report<PoolError>> {
        if config.workers == 0 {
            return Err(PoolError::InvalidConfig {
                details: "worker count must be at least 1".to_string(),
            }
            .into());
        }
        if config.queue_capacity() == 0 {
            return Err(PoolError::InvalidConfig {
                details: "queue capacity must be at least 1".to_string(),
            }
            .into());
        }

        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity());
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = JoinSet::new();
        for _ in 0..config.workers {
            let receiver = Arc::clone(&receiver);
            workers.spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else { break };
                    // A panicking task drops its result sender; the worker keeps going.
                    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                        warn!("worker pool task panicked");
                    }
                }
            });
        }

        debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity(),
            "worker pool started"
        );

        Ok(Self {
            config,
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(Some(workers)),
        })
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Queues a task, waiting while the queue is full.
    pub async fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, Report<PoolError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.read().await.clone().ok_or(PoolError::Stopped)?;

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The caller may have dropped its handle.
            let _ = tx.send(task.await);
        });

        sender.send(job).await.map_err(|_| PoolError::Stopped)?;
        Ok(TaskHandle { rx })
    }

    /// Submits every task and waits for all of them; outputs keep input order.
    pub async fn run_all<I, F, T>(&self, tasks: I) -> Result<Vec<T>, Report<PoolError>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(self.submit(task).await?);
        }

        let mut outputs = Vec::with_capacity(handles.len());
        for handle in handles {
            outputs.push(handle.join().await?);
        }
        Ok(outputs)
    }

    /// Stops accepting tasks, drains the queue and waits for the workers.
    ///
    /// Workers still running after the drain timeout are aborted and
    /// `DrainTimedOut` is returned. Calling `stop` again is a no-op.
    pub async fn stop(&self) -> Result<(), Report<PoolError>> {
        self.sender.write().await.take();

        let Some(mut workers) = self.workers.lock().await.take() else {
            return Ok(());
        };

        let drained = tokio::time::timeout(self.config.drain_timeout(), async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            let remaining_workers = workers.len();
            warn!(remaining_workers, "worker pool drain timed out, aborting");
            workers.shutdown().await;
            return Err(PoolError::DrainTimedOut { remaining_workers }.into());
        }

        debug!("worker pool stopped");
        Ok(())
    }
}
