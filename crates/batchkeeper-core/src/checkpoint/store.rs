// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File-backed checkpoint store.
//!
//! The checkpoint is a single JSON document:
//!
//! ```json
//! { "version": 1, "written_at": "2025-06-01T12:00:00Z", "job_id": 41, "job": "user-41" }
//! ```
//!
//! An empty checkpoint omits `job_id` and `job`. Anything that does not parse
//! as this envelope, including a file truncated by an interrupted write, reads
//! back as the empty checkpoint.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Result, StateReadError};
use crate::types::Checkpoint;

/// Version of the envelope written by this store.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    written_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<&'a T>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    job_id: Option<u64>,
    job: Option<T>,
}

/// Owner of one checkpoint file.
///
/// A single writing process is assumed; concurrent writers from other
/// processes are not coordinated.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store for the file at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint.
    ///
    /// Never fails: a missing file, an unreadable file and a corrupt file all
    /// yield the empty checkpoint. The latter two are logged.
    pub async fn read<T: DeserializeOwned>(&self) -> Checkpoint<T> {
        match self.try_read().await {
            Ok(Some(checkpoint)) => {
                info!(
                    path = %self.path.display(),
                    job_id = ?checkpoint.job_id,
                    "Read previous state"
                );
                checkpoint
            }
            Ok(None) => Checkpoint::empty(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Error reading state file, ignoring it and starting without"
                );
                Checkpoint::empty()
            }
        }
    }

    async fn try_read<T: DeserializeOwned>(
        &self,
    ) -> std::result::Result<Option<Checkpoint<T>>, StateReadError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // The writer creates the file before its first write.
        if bytes.is_empty() {
            debug!(path = %self.path.display(), "State file is empty");
            return Ok(None);
        }

        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        if envelope.version != STATE_FORMAT_VERSION {
            return Err(StateReadError::UnsupportedVersion(envelope.version));
        }
        if let Some(job_id) = envelope.job_id
            && job_id.checked_add(1).is_none()
        {
            return Err(StateReadError::JobIdOutOfRange(job_id));
        }

        Ok(Some(Checkpoint {
            job_id: envelope.job_id,
            job: envelope.job_id.and(envelope.job),
        }))
    }

    /// Write the checkpoint through a fresh truncating open/close.
    pub async fn write_new<T: Serialize>(&self, checkpoint: &Checkpoint<T>) -> Result<()> {
        let bytes = encode(checkpoint)?;
        self.ensure_parent_dir().await?;
        tokio::fs::write(&self.path, &bytes).await?;
        debug!(
            path = %self.path.display(),
            job_id = ?checkpoint.job_id,
            "State written"
        );
        Ok(())
    }

    /// Open the file for repeated [`write_in_place`](Self::write_in_place) calls.
    ///
    /// The file is created if missing but not truncated, so the previous
    /// checkpoint survives until the first in-place write replaces it.
    pub async fn open_for_writer(&self) -> Result<File> {
        self.ensure_parent_dir().await?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        Ok(file)
    }

    /// Rewind `file` and overwrite it with `checkpoint`.
    ///
    /// The tail is truncated so a shorter record never leaves stale bytes
    /// behind. An interrupted call may corrupt the file; [`read`](Self::read)
    /// treats that as no checkpoint.
    pub async fn write_in_place<T: Serialize>(
        &self,
        file: &mut File,
        checkpoint: &Checkpoint<T>,
    ) -> Result<()> {
        let bytes = encode(checkpoint)?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&bytes).await?;
        file.set_len(bytes.len() as u64).await?;
        file.flush().await?;
        Ok(())
    }

    /// Delete the checkpoint file. A missing file is not an error.
    pub async fn reset(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "State file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn encode<T: Serialize>(checkpoint: &Checkpoint<T>) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        version: STATE_FORMAT_VERSION,
        written_at: Utc::now(),
        job_id: checkpoint.job_id,
        job: checkpoint.job_id.and(checkpoint.job.as_ref()),
    };
    Ok(serde_json::to_vec(&envelope)?)
}
