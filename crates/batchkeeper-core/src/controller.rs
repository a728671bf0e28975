// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch controller.
//!
//! The controller ties one producer to one execution backend and keeps a
//! checkpoint file so an interrupted batch can continue where it left off.
//!
//! ```text
//! Initializing -> Resuming -> Producing -> Draining -> Finalizing -> Done
//! ```
//!
//! While producing and draining, a [`CheckpointWriter`] runs on its own task
//! and mirrors whatever job the backend is on into the checkpoint file. When
//! the backend has finished, the controller stops it, waits a bounded time for
//! the writer, and records the last job it dispatched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::backend::ExecutionBackend;
use crate::checkpoint::writer::pause;
use crate::checkpoint::{CheckpointStore, CheckpointWriter, WriterHandle, WriterReport};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::producer::{ProducerRegistry, ProducerTarget, ResolvedProducer};
use crate::progress::{NoProgress, ProgressReporter, TracingProgress};
use crate::types::{Checkpoint, Job, Payload, Phase, RunSummary};

/// Builder for creating a [`Controller`].
pub struct ControllerBuilder<T: Payload> {
    backend: Option<Arc<dyn ExecutionBackend<T>>>,
    target: Option<ProducerTarget<T>>,
    state_file: Option<PathBuf>,
    progress: Option<Arc<dyn ProgressReporter>>,
    registry: ProducerRegistry<T>,
    config: ControllerConfig,
}

impl<T: Payload> Default for ControllerBuilder<T> {
    fn default() -> Self {
        Self {
            backend: None,
            target: None,
            state_file: None,
            progress: None,
            registry: ProducerRegistry::new(),
            config: ControllerConfig::default(),
        }
    }
}

impl<T: Payload> ControllerBuilder<T> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution backend (required).
    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend<T>>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the producer to run (required).
    ///
    /// Accepts a [`ProducerTarget`] or a `component:name` locator string.
    pub fn target(mut self, target: impl Into<ProducerTarget<T>>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set an explicit checkpoint path.
    ///
    /// Takes precedence over `ControllerConfig::state_file` and the path
    /// derived from the producer's component.
    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Set the progress reporter.
    ///
    /// Defaults to [`TracingProgress`], or [`NoProgress`] when progress is
    /// disabled in the config.
    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the registry locator targets are resolved against.
    pub fn registry(mut self, registry: ProducerRegistry<T>) -> Self {
        self.registry = registry;
        self
    }

    /// Set the controller configuration.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the producer and checkpoint path.
    ///
    /// Fails before anything is started if a component is missing or the
    /// target cannot be resolved.
    pub fn build(self) -> Result<Controller<T>> {
        let backend = self.backend.ok_or(Error::MissingComponent("backend"))?;
        let target = self.target.ok_or(Error::MissingComponent("target"))?;
        let producer = self.registry.resolve(target)?;

        let state_file = self
            .state_file
            .or_else(|| self.config.state_file.clone())
            .unwrap_or_else(|| producer.default_state_file(&self.config.state_dir));

        let progress: Arc<dyn ProgressReporter> = match self.progress {
            Some(progress) => progress,
            None if self.config.progress => {
                Arc::new(TracingProgress::new(self.config.progress_interval))
            }
            None => Arc::new(NoProgress),
        };

        info!(
            producer = %producer.label(),
            backend = backend.backend_type(),
            state_file = %state_file.display(),
            "Controller initialized"
        );

        let (phase, _) = watch::channel(Phase::Initializing);

        Ok(Controller {
            backend,
            producer,
            store: CheckpointStore::new(state_file),
            progress,
            config: self.config,
            phase,
        })
    }
}

/// Runs one producer against one backend with checkpointed resume.
pub struct Controller<T: Payload> {
    backend: Arc<dyn ExecutionBackend<T>>,
    producer: ResolvedProducer<T>,
    store: CheckpointStore,
    progress: Arc<dyn ProgressReporter>,
    config: ControllerConfig,
    phase: watch::Sender<Phase>,
}

impl<T: Payload> Controller<T> {
    /// Create a new builder.
    pub fn builder() -> ControllerBuilder<T> {
        ControllerBuilder::new()
    }

    /// Path of the checkpoint file.
    pub fn state_file(&self) -> &Path {
        self.store.path()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// The checkpoint as currently persisted.
    pub async fn status(&self) -> Checkpoint<T> {
        self.store.read().await
    }

    /// Delete the checkpoint so the next run starts from scratch.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        info!(path = %self.store.path().display(), "Checkpoint cleared");
        Ok(())
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
        info!(%phase, "Controller phase changed");
    }

    /// Run the batch to completion.
    ///
    /// Resumes after the persisted checkpoint, dispatches every job the
    /// producer yields, waits for the backend to drain, and records the last
    /// dispatched job as the new checkpoint.
    #[instrument(
        skip(self),
        fields(producer = %self.producer.label(), backend = self.backend.backend_type())
    )]
    pub async fn run(&self) -> Result<RunSummary> {
        self.set_phase(Phase::Resuming);
        let checkpoint: Checkpoint<T> = self.store.read().await;
        let resumed_from = checkpoint.job_id;
        let resume = checkpoint.resume_state();

        if resume.is_resume() {
            info!(
                last_job_id = ?resumed_from,
                start_id = resume.start_id,
                "Resuming from checkpoint"
            );
        } else {
            info!("No checkpoint found, starting from the beginning");
        }

        self.backend.start().await?;
        self.progress.start();
        self.set_phase(Phase::Producing);

        let mut writer = Some(
            CheckpointWriter::new(
                self.backend.clone(),
                self.store.clone(),
                self.progress.clone(),
                self.config.poll_interval,
            )
            .spawn(),
        );
        let mut early_report = None;

        let mut jobs = self.producer.producer.produce(resume.seed);
        let mut next_id = resume.start_id;
        let mut first_job_id = None;
        let mut last_job: Option<Job<T>> = None;
        let mut dispatched = 0u64;

        while let Some(payload) = jobs.next().await {
            self.check_writer(&mut writer, &mut early_report).await?;

            let job = Job::new(next_id, payload);
            if let Err(e) = self.backend.put_job(job.clone()).await {
                error!(job_id = next_id, error = %e, "Failed to dispatch job");
                self.abandon(writer).await;
                return Err(e);
            }

            first_job_id.get_or_insert(next_id);
            last_job = Some(job);
            dispatched += 1;
            next_id += 1;
            tokio::task::yield_now().await;
        }
        drop(jobs);

        info!(dispatched, "Producer exhausted, draining backend");
        self.set_phase(Phase::Draining);

        while self.backend.has_work().await {
            self.check_writer(&mut writer, &mut early_report).await?;
            pause(self.config.poll_interval).await;
        }

        self.set_phase(Phase::Finalizing);
        let shutdown = self.backend.shutdown().await;

        let report = match writer {
            Some(handle) => handle.join(self.config.writer_join_timeout).await?,
            None => early_report,
        };
        shutdown?;

        match &last_job {
            Some(job) => {
                self.store.write_new(&Checkpoint::at(job.clone())).await?;
                self.progress.update(job.id);
                info!(job_id = job.id, "Final checkpoint written");
            }
            None if self.config.clear_on_empty_run => {
                self.store.write_new(&Checkpoint::<T>::empty()).await?;
                info!("No jobs produced, checkpoint cleared");
            }
            None => {
                info!(last_job_id = ?resumed_from, "No jobs produced, keeping existing checkpoint");
            }
        }

        self.progress.finish();
        self.set_phase(Phase::Done);

        let summary = RunSummary {
            resumed_from,
            first_job_id,
            last_job_id: last_job.map(|job| job.id),
            dispatched,
            checkpoint_writes: report.map(|r| r.writes),
        };
        info!(
            dispatched = summary.dispatched,
            last_job_id = ?summary.last_job_id,
            "Run complete"
        );
        Ok(summary)
    }

    /// Surface a writer that stopped while the backend is still running.
    ///
    /// A writer error stops the backend and fails the run. A writer that
    /// stopped cleanly means the backend went away on its own; its report is
    /// kept and the run carries on so the backend can report its own failure.
    async fn check_writer(
        &self,
        writer: &mut Option<WriterHandle>,
        early_report: &mut Option<WriterReport>,
    ) -> Result<()> {
        if !writer.as_ref().is_some_and(WriterHandle::is_finished) {
            return Ok(());
        }
        let Some(handle) = writer.take() else {
            return Ok(());
        };

        match handle.join(self.config.writer_join_timeout).await {
            Ok(report) => {
                warn!("Checkpoint writer stopped before the run finished");
                *early_report = report;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Checkpoint writer failed, stopping backend");
                if let Err(shutdown_err) = self.backend.shutdown().await {
                    error!(error = %shutdown_err, "Backend shutdown failed");
                }
                Err(e)
            }
        }
    }

    /// Stop the backend and writer after a dispatch failure.
    ///
    /// No final checkpoint is written; the writer's last sample stays as the
    /// resume point.
    async fn abandon(&self, writer: Option<WriterHandle>) {
        if let Err(e) = self.backend.shutdown().await {
            error!(error = %e, "Backend shutdown failed");
        }
        if let Some(handle) = writer
            && let Err(e) = handle.join(self.config.writer_join_timeout).await
        {
            error!(error = %e, "Checkpoint writer failed");
        }
    }
}
