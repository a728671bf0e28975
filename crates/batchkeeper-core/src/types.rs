// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared types for batchkeeper-core.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bound satisfied by every job payload the coordinator can move between
/// the producer, the backend and the checkpoint file.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// One unit of work: a position in the batch and its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<T> {
    /// Position of the job in the batch. Strictly increasing within a run.
    pub id: u64,
    /// Producer-supplied payload.
    pub payload: T,
}

impl<T> Job<T> {
    /// Create a job.
    pub fn new(id: u64, payload: T) -> Self {
        Self { id, payload }
    }
}

/// The persisted resume position.
///
/// Both fields are `None` when nothing has been recorded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint<T> {
    /// Id of the job the backend was on when the record was written.
    pub job_id: Option<u64>,
    /// Payload of that job, handed back to the producer as a resume hint.
    pub job: Option<T>,
}

impl<T> Default for Checkpoint<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Checkpoint<T> {
    /// A checkpoint with no recorded position.
    pub fn empty() -> Self {
        Self {
            job_id: None,
            job: None,
        }
    }

    /// A checkpoint positioned at `job`.
    pub fn at(job: Job<T>) -> Self {
        Self {
            job_id: Some(job.id),
            job: Some(job.payload),
        }
    }

    /// Returns true if no position has been recorded.
    pub fn is_empty(&self) -> bool {
        self.job_id.is_none()
    }

    /// Derive where the next run starts.
    ///
    /// The recorded job is treated as possibly unfinished by the backend
    /// only through its payload hint; ids continue at `job_id + 1`. A
    /// position with no successor id starts from scratch.
    pub fn resume_state(self) -> ResumeState<T> {
        match self.job_id.and_then(|job_id| job_id.checked_add(1)) {
            Some(start_id) => ResumeState {
                start_id,
                seed: self.job,
            },
            None => ResumeState {
                start_id: 0,
                seed: None,
            },
        }
    }
}

/// Where a run begins, derived once from the checkpoint at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState<T> {
    /// Id assigned to the first job the producer yields.
    pub start_id: u64,
    /// Payload of the last checkpointed job, if any.
    pub seed: Option<T>,
}

impl<T> ResumeState<T> {
    /// Returns true if this run continues a previous one.
    pub fn is_resume(&self) -> bool {
        self.start_id > 0
    }
}

/// Lifecycle phases of a controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Producer and checkpoint path resolved; nothing started.
    Initializing,
    /// Reading the checkpoint.
    Resuming,
    /// Backend and checkpoint writer running, producer being enumerated.
    Producing,
    /// Producer exhausted, waiting for the backend to finish its work.
    Draining,
    /// Backend stopped, writer joined, final checkpoint being written.
    Finalizing,
    /// Run finished.
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Initializing => "initializing",
            Phase::Resuming => "resuming",
            Phase::Producing => "producing",
            Phase::Draining => "draining",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Id recorded in the checkpoint the run resumed from.
    pub resumed_from: Option<u64>,
    /// Id of the first job dispatched in this run.
    pub first_job_id: Option<u64>,
    /// Id of the last job dispatched in this run.
    pub last_job_id: Option<u64>,
    /// Number of jobs handed to the backend.
    pub dispatched: u64,
    /// Number of in-place writes the background writer performed, if it
    /// stopped within its timeout.
    pub checkpoint_writes: Option<u64>,
}
