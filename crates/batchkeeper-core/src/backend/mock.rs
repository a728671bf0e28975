// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! A scripted backend that records every job it is given and only finishes
//! jobs when told to, either explicitly or once per `has_work` poll.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::{ExecutionBackend, ProgressSource};
use crate::error::{Error, Result};
use crate::types::{Job, Payload};

/// Mock backend for testing.
pub struct MockBackend<T: Payload> {
    submitted: Mutex<Vec<Job<T>>>,
    queue: Mutex<VecDeque<Job<T>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    /// If true, every `has_work` call finishes the oldest queued job.
    pub complete_on_poll: bool,
    /// If set, `put_job` fails for this id.
    pub reject_id: Option<u64>,
}

impl<T: Payload> Default for MockBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Payload> MockBackend<T> {
    /// Create a mock backend that finishes one job per `has_work` poll.
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            complete_on_poll: true,
            reject_id: None,
        }
    }

    /// Create a mock backend whose jobs only finish through
    /// [`complete_next`](Self::complete_next).
    pub fn manual() -> Self {
        Self {
            complete_on_poll: false,
            ..Self::new()
        }
    }

    /// Create a mock backend that rejects the job with `id`.
    pub fn rejecting(id: u64) -> Self {
        Self {
            reject_id: Some(id),
            ..Self::new()
        }
    }

    /// Finish the oldest queued job, returning it.
    pub async fn complete_next(&self) -> Option<Job<T>> {
        self.queue.lock().await.pop_front()
    }

    /// Every job accepted so far, in submission order.
    pub async fn submitted(&self) -> Vec<Job<T>> {
        self.submitted.lock().await.clone()
    }

    /// Ids of every job accepted so far, in submission order.
    pub async fn submitted_ids(&self) -> Vec<u64> {
        self.submitted.lock().await.iter().map(|j| j.id).collect()
    }

    /// Whether `shutdown` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Payload> ProgressSource<T> for MockBackend<T> {
    async fn is_alive(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    async fn current_job(&self) -> Result<Job<T>> {
        self.queue
            .lock()
            .await
            .front()
            .cloned()
            .ok_or(Error::NoCurrentJob)
    }
}

#[async_trait]
impl<T: Payload> ExecutionBackend<T> for MockBackend<T> {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn put_job(&self, job: Job<T>) -> Result<()> {
        if !self.is_alive().await {
            return Err(Error::Backend("mock backend is not running".to_string()));
        }
        if self.reject_id == Some(job.id) {
            return Err(Error::Backend(format!("mock backend rejected job {}", job.id)));
        }
        self.submitted.lock().await.push(job.clone());
        self.queue.lock().await.push_back(job);
        Ok(())
    }

    async fn has_work(&self) -> bool {
        let mut queue = self.queue.lock().await;
        if self.complete_on_poll {
            queue.pop_front();
        }
        !queue.is_empty()
    }
}
