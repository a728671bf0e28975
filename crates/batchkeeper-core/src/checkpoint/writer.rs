// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background checkpoint writer.
//!
//! The writer mirrors the backend's current job into the checkpoint file for
//! as long as the backend reports itself alive. It is never told that a job
//! finished; it samples whatever the backend is on, so the recorded id is a
//! lower bound on real progress.
//!
//! The checkpoint file is opened once when the task starts and closed when the
//! task ends, whether it stops normally or with an error.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::CheckpointStore;
use crate::backend::ProgressSource;
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::types::{Checkpoint, Payload};

/// Sleep for `interval`, or just yield to the scheduler when it is zero.
pub(crate) async fn pause(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

/// What the writer did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Number of checkpoint writes performed.
    pub writes: u64,
    /// Last id written.
    pub last_job_id: Option<u64>,
}

/// Background task that records the backend's current job.
pub struct CheckpointWriter<T: Payload, S: ProgressSource<T> + ?Sized> {
    source: Arc<S>,
    store: CheckpointStore,
    progress: Arc<dyn ProgressReporter>,
    poll_interval: Duration,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S> CheckpointWriter<T, S>
where
    T: Payload,
    S: ProgressSource<T> + ?Sized + 'static,
{
    /// Create a writer polling `source` every `poll_interval`.
    pub fn new(
        source: Arc<S>,
        store: CheckpointStore,
        progress: Arc<dyn ProgressReporter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            progress,
            poll_interval,
            _payload: PhantomData,
        }
    }

    /// Run the writer on its own task.
    pub fn spawn(self) -> WriterHandle {
        WriterHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    /// Run the writer loop until the source stops being alive.
    ///
    /// Returns the first write error or sampling failure. Only
    /// [`Error::NoCurrentJob`] is waited out.
    pub async fn run(self) -> Result<WriterReport> {
        let mut file = self.store.open_for_writer().await?;
        let mut report = WriterReport::default();

        info!(
            path = %self.store.path().display(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Checkpoint writer started"
        );

        while self.source.is_alive().await {
            pause(self.poll_interval).await;

            let job = match self.source.current_job().await {
                Ok(job) => job,
                Err(Error::NoCurrentJob) => continue,
                Err(e) => {
                    error!(error = %e, "Failed to sample current job");
                    return Err(e);
                }
            };

            if report.last_job_id == Some(job.id) {
                continue;
            }

            let job_id = job.id;
            self.progress.update(job_id);

            if let Err(e) = self
                .store
                .write_in_place(&mut file, &Checkpoint::at(job))
                .await
            {
                error!(job_id, error = %e, "Failed to write checkpoint");
                return Err(e);
            }

            debug!(job_id, "Checkpoint written");
            report.last_job_id = Some(job_id);
            report.writes += 1;
        }

        info!(
            writes = report.writes,
            last_job_id = ?report.last_job_id,
            "Checkpoint writer stopped"
        );
        Ok(report)
    }
}

/// Handle to a spawned [`CheckpointWriter`].
///
/// Dropping the handle aborts the task, which closes the checkpoint file.
pub struct WriterHandle {
    handle: JoinHandle<Result<WriterReport>>,
}

impl WriterHandle {
    /// True once the writer task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the writer to stop.
    ///
    /// Returns `Ok(None)` if it did not stop in time; the task is then
    /// aborted. A write error from the task is returned as-is.
    pub async fn join(mut self, timeout: Duration) -> Result<Option<WriterReport>> {
        let joined = tokio::time::timeout(timeout, &mut self.handle).await;
        match joined {
            Ok(Ok(result)) => result.map(Some),
            Ok(Err(e)) => Err(Error::WriterTask(e.to_string())),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Checkpoint writer did not stop in time, abandoning it"
                );
                self.handle.abort();
                Ok(None)
            }
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
