// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in producers and job handler.
//!
//! Producers registered here:
//!
//! - `builtin.range:numbers` yields `0..range_end` as JSON numbers
//! - `builtin.lines:file` yields `{"line": n, "text": ".."}` for each line of
//!   the input file

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use batchkeeper_core::{HandlerError, Job, JobHandler, ProducerRegistry, from_fn};
use serde_json::{Value, json};
use tracing::info;

pub const RANGE_TARGET: &str = "builtin.range:numbers";
pub const LINES_TARGET: &str = "builtin.lines:file";

/// Position after the resume hint, reading the hint with `index`.
fn next_index(resume: Option<&Value>, index: impl Fn(&Value) -> Option<u64>) -> u64 {
    resume.and_then(index).map_or(0, |last| last + 1)
}

/// Build the registry of built-in producers.
///
/// The lines producer is only registered when an input file is given; the
/// file is read once, here.
pub async fn registry(
    range_end: u64,
    input: Option<&Path>,
) -> anyhow::Result<ProducerRegistry<Value>> {
    let mut registry = ProducerRegistry::new();

    registry.register(
        "builtin.range",
        "numbers",
        from_fn(move |resume: Option<Value>| {
            let start = next_index(resume.as_ref(), Value::as_u64);
            (start..range_end).map(Value::from)
        }),
    );

    if let Some(path) = input {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        let lines: Arc<Vec<String>> = Arc::new(text.lines().map(str::to_string).collect());

        registry.register(
            "builtin.lines",
            "file",
            from_fn(move |resume: Option<Value>| {
                let start = next_index(resume.as_ref(), |hint| hint.get("line")?.as_u64());
                let lines = lines.clone();
                let start = usize::try_from(start).unwrap_or(usize::MAX).min(lines.len());
                (start..lines.len()).map(move |n| {
                    let text = &lines[n];
                    json!({ "line": n, "text": text })
                })
            }),
        );
    }

    Ok(registry)
}

/// Logs every job, optionally taking a fixed time per job.
pub struct EchoHandler {
    delay: Duration,
}

impl EchoHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl JobHandler<Value> for EchoHandler {
    async fn handle(&self, job: &Job<Value>) -> Result<(), HandlerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        info!(job_id = job.id, payload = %job.payload, "Processed job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchkeeper_core::Producer;
    use futures::StreamExt;
    use std::io::Write;

    async fn produce(
        registry: &ProducerRegistry<Value>,
        target: &str,
        resume: Option<Value>,
    ) -> Vec<Value> {
        let resolved = registry.resolve(target.into()).unwrap();
        resolved.producer.produce(resume).collect().await
    }

    #[tokio::test]
    async fn test_range_resumes_after_hint() {
        let registry = registry(5, None).await.unwrap();

        let fresh = produce(&registry, RANGE_TARGET, None).await;
        assert_eq!(fresh, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);

        let resumed = produce(&registry, RANGE_TARGET, Some(json!(2))).await;
        assert_eq!(resumed, vec![json!(3), json!(4)]);

        let past_end = produce(&registry, RANGE_TARGET, Some(json!(9))).await;
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_lines_resume_after_hinted_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alpha\nbeta\ngamma").unwrap();

        let registry = registry(0, Some(file.path())).await.unwrap();

        let fresh = produce(&registry, LINES_TARGET, None).await;
        assert_eq!(fresh.len(), 3);
        assert_eq!(fresh[0], json!({ "line": 0, "text": "alpha" }));

        let hint = json!({ "line": 1, "text": "beta" });
        let resumed = produce(&registry, LINES_TARGET, Some(hint)).await;
        assert_eq!(resumed, vec![json!({ "line": 2, "text": "gamma" })]);
    }

    #[tokio::test]
    async fn test_lines_not_registered_without_input() {
        let registry = registry(10, None).await.unwrap();
        assert!(registry.resolve(LINES_TARGET.into()).is_err());
        assert_eq!(registry.locators(), vec![RANGE_TARGET]);
    }

    #[tokio::test]
    async fn test_missing_input_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.txt");
        assert!(registry(10, Some(&missing)).await.is_err());
    }
}
