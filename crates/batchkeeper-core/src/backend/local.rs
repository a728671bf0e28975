// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process worker pool backend.
//!
//! Jobs go through a bounded queue (so `put_job` waits when workers fall
//! behind) and are executed by a fixed number of tokio tasks running a
//! [`JobHandler`]. Every job is tracked from the moment it is accepted until
//! its handler returns, and [`current_job`](ProgressSource::current_job)
//! reports the lowest such id. With several workers finishing out of order
//! that is still a position every earlier job has passed.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{ExecutionBackend, JobHandler, ProgressSource};
use crate::error::{Error, Result};
use crate::types::{Job, Payload};

/// Configuration for a [`LocalBackend`].
#[derive(Debug, Clone)]
pub struct LocalBackendConfig {
    /// Number of worker tasks (minimum 1).
    pub workers: usize,
    /// Capacity of the job queue (minimum 1).
    pub queue_capacity: usize,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

/// Job outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBackendStats {
    /// Jobs whose handler returned `Ok`.
    pub completed: u64,
    /// Jobs whose handler returned an error or panicked.
    pub failed: u64,
}

struct Shared<T> {
    /// Accepted but unfinished jobs, keyed by id.
    outstanding: Mutex<BTreeMap<u64, T>>,
    live_workers: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct Running<T> {
    sender: mpsc::Sender<Job<T>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Decrements the live worker count however the worker task ends.
struct WorkerGuard<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for WorkerGuard<T> {
    fn drop(&mut self) {
        self.shared.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process execution backend.
pub struct LocalBackend<T: Payload> {
    handler: Arc<dyn JobHandler<T>>,
    config: LocalBackendConfig,
    shared: Arc<Shared<T>>,
    running: Mutex<Option<Running<T>>>,
    stopped: AtomicBool,
}

impl<T: Payload> LocalBackend<T> {
    /// Create a backend that runs `handler` for every job.
    pub fn new(handler: Arc<dyn JobHandler<T>>, config: LocalBackendConfig) -> Self {
        Self {
            handler,
            config,
            shared: Arc::new(Shared {
                outstanding: Mutex::new(BTreeMap::new()),
                live_workers: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Create a backend with the default configuration.
    pub fn with_handler(handler: impl JobHandler<T> + 'static) -> Self {
        Self::new(Arc::new(handler), LocalBackendConfig::default())
    }

    /// Current job outcome counters.
    pub fn stats(&self) -> LocalBackendStats {
        LocalBackendStats {
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }
}

async fn worker_loop<T: Payload>(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job<T>>>>,
    handler: Arc<dyn JobHandler<T>>,
    shared: Arc<Shared<T>>,
    cancel: CancellationToken,
) {
    let _guard = WorkerGuard {
        shared: shared.clone(),
    };
    debug!(worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,

            job = async { receiver.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };

        let outcome = AssertUnwindSafe(handler.handle(&job)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {
                shared.completed.fetch_add(1, Ordering::SeqCst);
                debug!(worker_id, job_id = job.id, "Job completed");
            }
            Ok(Err(e)) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id, job_id = job.id, error = %e, "Job failed");
            }
            Err(_) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker_id, job_id = job.id, "Job handler panicked");
            }
        }
        shared.outstanding.lock().await.remove(&job.id);
    }

    debug!(worker_id, "Worker stopped");
}

#[async_trait]
impl<T: Payload> ProgressSource<T> for LocalBackend<T> {
    async fn is_alive(&self) -> bool {
        self.shared.live_workers.load(Ordering::SeqCst) > 0
    }

    async fn current_job(&self) -> Result<Job<T>> {
        self.shared
            .outstanding
            .lock()
            .await
            .first_key_value()
            .map(|(id, payload)| Job::new(*id, payload.clone()))
            .ok_or(Error::NoCurrentJob)
    }
}

#[async_trait]
impl<T: Payload> ExecutionBackend<T> for LocalBackend<T> {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::Backend("local backend already started".to_string()));
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Backend("local backend has been shut down".to_string()));
        }

        let workers = self.config.workers.max(1);
        let queue_capacity = self.config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();

        self.shared.live_workers.store(workers, Ordering::SeqCst);
        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    self.handler.clone(),
                    self.shared.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        *running = Some(Running {
            sender,
            workers: handles,
            cancel,
        });

        info!(workers, queue_capacity, "Local backend started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        self.stopped.store(true, Ordering::SeqCst);

        let Running {
            sender,
            workers,
            cancel,
        } = running;
        drop(sender);
        cancel.cancel();

        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task failed");
            }
        }

        let discarded = {
            let mut outstanding = self.shared.outstanding.lock().await;
            let n = outstanding.len();
            outstanding.clear();
            n
        };
        if discarded > 0 {
            warn!(discarded, "Discarded unfinished jobs at shutdown");
        }

        let stats = self.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            "Local backend stopped"
        );
        Ok(())
    }

    async fn put_job(&self, job: Job<T>) -> Result<()> {
        let sender = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|r| r.sender.clone())
            .ok_or_else(|| Error::Backend("local backend is not accepting jobs".to_string()))?;

        let id = job.id;
        self.shared
            .outstanding
            .lock()
            .await
            .insert(id, job.payload.clone());

        if sender.send(job).await.is_err() {
            self.shared.outstanding.lock().await.remove(&id);
            return Err(Error::Backend("local backend queue is closed".to_string()));
        }
        Ok(())
    }

    async fn has_work(&self) -> bool {
        !self.shared.outstanding.lock().await.is_empty()
    }
}
