// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for batchkeeper-core.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the coordinator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Producer locator is not of the form `component:name`.
    #[error("invalid target `{0}`: expected `path.to.component:producer_name`")]
    InvalidTargetSpec(String),

    /// Producer locator is well-formed but nothing is registered under it.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The backend has not claimed any job yet.
    #[error("backend has no current job")]
    NoCurrentJob,

    /// Writing the checkpoint file failed. The I/O error is surfaced as-is.
    #[error(transparent)]
    StateWrite(#[from] std::io::Error),

    /// A payload could not be serialized into the checkpoint record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The execution backend rejected an operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The background checkpoint writer panicked or was cancelled.
    #[error("checkpoint writer task failed: {0}")]
    WriterTask(String),

    /// A required controller component was not supplied to the builder.
    #[error("{0} is required")]
    MissingComponent(&'static str),
}

impl Error {
    /// Whether this error should abort the run.
    ///
    /// `NoCurrentJob` is the only error the coordinator recovers from itself.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::NoCurrentJob)
    }
}

/// Failures while reading a checkpoint. Never propagated; logged and
/// treated as "no checkpoint".
#[derive(Debug, Error)]
pub(crate) enum StateReadError {
    #[error("failed to read state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("unsupported state file version {0}")]
    UnsupportedVersion(u32),

    #[error("recorded job id {0} leaves no id to resume at")]
    JobIdOutOfRange(u64),
}

/// Result type using the coordinator [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
