// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress reporting.
//!
//! Reporters are purely observational. Their methods cannot fail, and a
//! reporter that misbehaves internally must swallow the problem rather than
//! disturb the run.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

/// Receives position updates while a batch runs.
pub trait ProgressReporter: Send + Sync {
    /// Called once after the backend has started.
    fn start(&self);

    /// Called with the id of the job the backend is currently on.
    fn update(&self, position: u64);

    /// Called once after the final checkpoint has been written.
    fn finish(&self);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&self) {}

    fn update(&self, _position: u64) {}

    fn finish(&self) {}
}

#[derive(Debug, Default)]
struct Counters {
    started_at: Option<Instant>,
    last_logged_at: Option<Instant>,
    first_position: Option<u64>,
    position: Option<u64>,
}

/// Reporter that logs the current job, throughput and elapsed time through
/// `tracing`, at most once per `interval`.
#[derive(Debug)]
pub struct TracingProgress {
    interval: Duration,
    counters: Mutex<Counters>,
}

impl TracingProgress {
    /// Create a reporter that logs at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Jobs per second since the first update, if measurable.
    fn rate(counters: &Counters, now: Instant) -> Option<f64> {
        let started = counters.started_at?;
        let advanced = counters.position?.saturating_sub(counters.first_position?);
        let secs = now.duration_since(started).as_secs_f64();
        (secs > 0.0).then(|| advanced as f64 / secs)
    }

    fn log(counters: &Counters, now: Instant, message: &'static str) {
        let elapsed = counters
            .started_at
            .map(|s| now.duration_since(s))
            .unwrap_or_default();
        let rate = Self::rate(counters, now).unwrap_or(0.0);
        match counters.position {
            Some(position) => info!(
                current_job = position,
                jobs_per_sec = %format!("{rate:.1}"),
                elapsed = %format_elapsed(elapsed),
                "{message}"
            ),
            None => info!(elapsed = %format_elapsed(elapsed), "{message}"),
        }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ProgressReporter for TracingProgress {
    fn start(&self) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters = Counters {
                started_at: Some(Instant::now()),
                ..Counters::default()
            };
        }
    }

    fn update(&self, position: u64) {
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        let now = Instant::now();
        counters.started_at.get_or_insert(now);
        counters.first_position.get_or_insert(position);
        counters.position = Some(position);

        let due = counters
            .last_logged_at
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            counters.last_logged_at = Some(now);
            Self::log(&counters, now, "Progress");
        }
    }

    fn finish(&self) {
        if let Ok(counters) = self.counters.lock() {
            Self::log(&counters, Instant::now(), "Batch finished");
        }
    }
}

/// Format a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
