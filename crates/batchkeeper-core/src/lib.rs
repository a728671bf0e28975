// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batchkeeper core - resumable batch coordination.
//!
//! This crate drives a producer of jobs into a pluggable execution backend
//! and keeps a checkpoint file so an interrupted batch continues after the
//! last job the backend was seen working on.
//!
//! # Features
//!
//! - **Checkpointing**: a background writer mirrors the backend's current job
//!   into a versioned JSON file while the batch runs
//! - **Resume**: a new run starts at the id after the checkpoint and hands the
//!   checkpointed payload to the producer as a hint
//! - **Backends**: an in-process worker pool and a scripted mock, behind the
//!   [`ExecutionBackend`] trait
//! - **Producers**: closures or streams, addressed directly or by a
//!   `component:name` locator
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use batchkeeper_core::{Controller, LocalBackend, ProducerTarget, from_fn};
//!
//! #[tokio::main]
//! async fn main() -> batchkeeper_core::Result<()> {
//!     let backend = Arc::new(LocalBackend::with_handler(MyHandler));
//!
//!     let controller = Controller::builder()
//!         .backend(backend)
//!         .target(ProducerTarget::direct(
//!             "users.sync",
//!             from_fn(|resume: Option<u64>| resume.map_or(0, |last| last + 1)..10_000),
//!         ))
//!         .build()?;
//!
//!     let summary = controller.run().await?;
//!     println!("dispatched {} jobs", summary.dispatched);
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! The recorded position is a lower bound: the writer records the job the
//! backend is on, not the job it finished. A crash may re-run that job; it
//! never skips one.

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod producer;
pub mod progress;
pub mod types;

pub use backend::{
    ExecutionBackend, HandlerError, JobHandler, LocalBackend, LocalBackendConfig,
    LocalBackendStats, MockBackend, ProgressSource,
};
pub use checkpoint::{CheckpointStore, CheckpointWriter, STATE_FORMAT_VERSION, WriterReport};
pub use config::{ConfigError, ControllerConfig};
pub use controller::{Controller, ControllerBuilder};
pub use error::{Error, Result};
pub use producer::{
    Producer, ProducerLocator, ProducerRegistry, ProducerTarget, ResolvedProducer, from_fn,
    from_stream_fn,
};
pub use progress::{NoProgress, ProgressReporter, TracingProgress};
pub use types::{Checkpoint, Job, Payload, Phase, ResumeState, RunSummary};
