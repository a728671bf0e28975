// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution backend trait definitions.
//!
//! The coordinator never runs jobs itself. It hands them to an
//! [`ExecutionBackend`] and observes the backend through the narrower
//! [`ProgressSource`] capability.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Job, Payload};

/// Error type returned by [`JobHandler`] implementations.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Read-only view of what a backend is working on.
///
/// This is all the checkpoint writer needs: whether the backend's workers are
/// still running, and a point-in-time snapshot of the job it currently has
/// claimed.
#[async_trait]
pub trait ProgressSource<T: Payload>: Send + Sync {
    /// True while the backend's workers are running.
    async fn is_alive(&self) -> bool;

    /// The job the backend is currently on.
    ///
    /// Fails with [`Error::NoCurrentJob`](crate::Error::NoCurrentJob) when
    /// nothing is claimed. The returned job is not guaranteed to be finished.
    async fn current_job(&self) -> Result<Job<T>>;
}

/// Trait for execution backends.
///
/// Backends own queueing, parallelism, retries and backpressure. The
/// coordinator only brackets their lifecycle and feeds them jobs in id order.
#[async_trait]
pub trait ExecutionBackend<T: Payload>: ProgressSource<T> {
    /// Backend type identifier (e.g., "local", "mock")
    fn backend_type(&self) -> &'static str;

    /// Start the backend's workers.
    async fn start(&self) -> Result<()>;

    /// Stop the backend. No work is accepted afterwards.
    async fn shutdown(&self) -> Result<()>;

    /// Enqueue one job. May wait under backpressure.
    async fn put_job(&self, job: Job<T>) -> Result<()>;

    /// True while any job is queued or in flight.
    async fn has_work(&self) -> bool;
}

/// The unit of work an in-process backend executes for each job.
#[async_trait]
pub trait JobHandler<T: Payload>: Send + Sync {
    /// Process one job.
    async fn handle(&self, job: &Job<T>) -> std::result::Result<(), HandlerError>;
}
