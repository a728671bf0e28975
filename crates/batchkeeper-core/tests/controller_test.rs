// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for controller runs against the mock backend.
//!
//! Run with:
//! ```bash
//! cargo test -p batchkeeper-core --test controller_test
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batchkeeper_core::{
    Checkpoint, CheckpointStore, Controller, ControllerConfig, Error, ExecutionBackend, Job,
    MockBackend, Phase, ProducerRegistry, ProducerTarget, ProgressSource, Result, from_fn,
};
use tempfile::TempDir;

fn test_config() -> ControllerConfig {
    ControllerConfig::new()
        .with_poll_interval(Duration::from_millis(1))
        .with_writer_join_timeout(Duration::from_secs(2))
        .with_progress(false)
}

type Hints<T> = Arc<Mutex<Vec<Option<T>>>>;

/// Numbers `0..end`, continuing after the resume hint. Records every hint.
fn numbers(end: u64, hints: Hints<u64>) -> ProducerTarget<u64> {
    ProducerTarget::direct(
        "numbers",
        from_fn(move |resume: Option<u64>| {
            hints.lock().unwrap().push(resume);
            resume.map_or(0, |last| last + 1)..end
        }),
    )
}

/// `item-0 .. item-{end-1}`, continuing after the hinted item.
fn items(end: u64, hints: Hints<String>) -> ProducerTarget<String> {
    ProducerTarget::direct(
        "items",
        from_fn(move |resume: Option<String>| {
            let start = resume
                .as_deref()
                .and_then(|item| item.strip_prefix("item-"))
                .and_then(|n| n.parse::<u64>().ok())
                .map_or(0, |last| last + 1);
            hints.lock().unwrap().push(resume);
            (start..end).map(|n| format!("item-{n}"))
        }),
    )
}

fn controller<T, B>(
    backend: Arc<B>,
    target: ProducerTarget<T>,
    state_file: &Path,
    config: ControllerConfig,
) -> Controller<T>
where
    T: batchkeeper_core::Payload,
    B: ExecutionBackend<T> + 'static,
{
    Controller::<T>::builder()
        .backend(backend)
        .target(target)
        .state_file(state_file)
        .config(config)
        .build()
        .expect("controller should build")
}

/// Poll the checkpoint file until it records `job_id`.
async fn wait_for_checkpoint<T: batchkeeper_core::Payload>(store: &CheckpointStore, job_id: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let checkpoint: Checkpoint<T> = store.read().await;
            if checkpoint.job_id == Some(job_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("checkpoint never reached job {job_id}"));
}

#[tokio::test]
async fn test_complete_run_records_last_job() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    let backend = Arc::new(MockBackend::<u64>::new());
    let hints = Hints::default();

    let summary = controller(backend.clone(), numbers(5, hints.clone()), &path, test_config())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.dispatched, 5);
    assert_eq!(summary.first_job_id, Some(0));
    assert_eq!(summary.last_job_id, Some(4));
    assert_eq!(backend.submitted_ids().await, vec![0, 1, 2, 3, 4]);
    assert_eq!(*hints.lock().unwrap(), vec![None]);

    let checkpoint: Checkpoint<u64> = CheckpointStore::new(&path).read().await;
    assert_eq!(checkpoint, Checkpoint::at(Job::new(4, 4)));
}

/// Mock backend that always reports job 0 as its current job.
struct PinnedAtFirst {
    inner: MockBackend<u64>,
}

#[async_trait]
impl ProgressSource<u64> for PinnedAtFirst {
    async fn is_alive(&self) -> bool {
        self.inner.is_alive().await
    }

    async fn current_job(&self) -> Result<Job<u64>> {
        Ok(Job::new(0, 0))
    }
}

#[async_trait]
impl ExecutionBackend<u64> for PinnedAtFirst {
    fn backend_type(&self) -> &'static str {
        "pinned"
    }

    async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    async fn put_job(&self, job: Job<u64>) -> Result<()> {
        self.inner.put_job(job).await
    }

    async fn has_work(&self) -> bool {
        self.inner.has_work().await
    }
}

#[tokio::test]
async fn test_final_write_replaces_lagging_writer_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    let backend = Arc::new(PinnedAtFirst {
        inner: MockBackend::new(),
    });

    let summary = controller(backend, numbers(5, Hints::default()), &path, test_config())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.last_job_id, Some(4));
    assert!(summary.checkpoint_writes.is_some_and(|writes| writes <= 1));
    let checkpoint: Checkpoint<u64> = CheckpointStore::new(&path).read().await;
    assert_eq!(checkpoint, Checkpoint::at(Job::new(4, 4)));
}

#[tokio::test]
async fn test_checkpoint_at_last_possible_id_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    std::fs::write(&path, br#"{"version":1,"job_id":18446744073709551615,"job":1}"#).unwrap();

    let backend = Arc::new(MockBackend::<u64>::new());
    let hints = Hints::default();
    let summary = controller(backend.clone(), numbers(3, hints.clone()), &path, test_config())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.resumed_from, None);
    assert_eq!(backend.submitted_ids().await, vec![0, 1, 2]);
    assert_eq!(*hints.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_resume_continues_after_checkpoint() {
    for k in [0u64, 3, 8] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("numbers.state");
        CheckpointStore::new(&path)
            .write_new(&Checkpoint::at(Job::new(k, k)))
            .await
            .unwrap();

        let backend = Arc::new(MockBackend::<u64>::new());
        let hints = Hints::default();
        let summary = controller(backend.clone(), numbers(10, hints.clone()), &path, test_config())
            .run()
            .await
            .unwrap();

        let expected: Vec<u64> = (k + 1..10).collect();
        assert_eq!(backend.submitted_ids().await, expected, "resume from {k}");
        assert_eq!(summary.resumed_from, Some(k));
        assert_eq!(summary.first_job_id, Some(k + 1));
        assert_eq!(*hints.lock().unwrap(), vec![Some(k)]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupted_run_resumes_at_next_job() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("items.state");
    let store = CheckpointStore::new(&path);

    // First run: the backend finishes items 0 and 1 and is on item 2 when
    // the process dies.
    let backend = Arc::new(MockBackend::<String>::manual());
    let first = controller(
        backend.clone(),
        items(5, Hints::default()),
        &path,
        test_config(),
    );
    let run = tokio::spawn(async move { first.run().await });

    wait_for_checkpoint::<String>(&store, 0).await;
    backend.complete_next().await;
    wait_for_checkpoint::<String>(&store, 1).await;
    backend.complete_next().await;
    wait_for_checkpoint::<String>(&store, 2).await;

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    // Dropping the run stops its writer even though the backend is still up.
    tokio::time::timeout(Duration::from_secs(1), async {
        while Arc::strong_count(&backend) > 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("writer should release the backend");
    backend.shutdown().await.unwrap();

    let checkpoint: Checkpoint<String> = store.read().await;
    assert_eq!(checkpoint.job_id, Some(2));
    assert_eq!(checkpoint.job.as_deref(), Some("item-2"));

    // Second run picks up after the recorded item.
    let backend = Arc::new(MockBackend::<String>::new());
    let hints = Hints::default();
    let summary = controller(backend.clone(), items(5, hints.clone()), &path, test_config())
        .run()
        .await
        .unwrap();

    assert_eq!(backend.submitted_ids().await, vec![3, 4]);
    let payloads: Vec<String> = backend
        .submitted()
        .await
        .into_iter()
        .map(|job| job.payload)
        .collect();
    assert_eq!(payloads, vec!["item-3", "item-4"]);
    assert_eq!(*hints.lock().unwrap(), vec![Some("item-2".to_string())]);
    assert_eq!(summary.last_job_id, Some(4));

    let checkpoint: Checkpoint<String> = store.read().await;
    assert_eq!(checkpoint.job_id, Some(4));
}

#[tokio::test]
async fn test_corrupt_checkpoint_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    std::fs::write(&path, b"\x00\xffnot a checkpoint{{").unwrap();

    let backend = Arc::new(MockBackend::<u64>::new());
    let summary = controller(backend.clone(), numbers(3, Hints::default()), &path, test_config())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.resumed_from, None);
    assert_eq!(backend.submitted_ids().await, vec![0, 1, 2]);
    let checkpoint: Checkpoint<u64> = CheckpointStore::new(&path).read().await;
    assert_eq!(checkpoint.job_id, Some(2));
}

#[tokio::test]
async fn test_empty_run_keeps_checkpoint_by_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    let store = CheckpointStore::new(&path);
    store.write_new(&Checkpoint::at(Job::new(9, 9u64))).await.unwrap();

    let backend = Arc::new(MockBackend::<u64>::new());
    let summary = controller(backend.clone(), numbers(10, Hints::default()), &path, test_config())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.last_job_id, None);
    assert!(backend.submitted_ids().await.is_empty());
    let checkpoint: Checkpoint<u64> = store.read().await;
    assert_eq!(checkpoint.job_id, Some(9));
}

#[tokio::test]
async fn test_empty_run_clears_checkpoint_when_configured() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    let store = CheckpointStore::new(&path);
    store.write_new(&Checkpoint::at(Job::new(9, 9u64))).await.unwrap();

    let backend = Arc::new(MockBackend::<u64>::new());
    controller(
        backend,
        numbers(10, Hints::default()),
        &path,
        test_config().with_clear_on_empty_run(true),
    )
    .run()
    .await
    .unwrap();

    let checkpoint: Checkpoint<u64> = store.read().await;
    assert!(checkpoint.is_empty());
    assert!(path.exists());
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    let ctl = controller(
        Arc::new(MockBackend::<u64>::new()),
        numbers(3, Hints::default()),
        &path,
        test_config(),
    );

    ctl.reset().await.unwrap();
    ctl.run().await.unwrap();
    assert!(path.exists());

    ctl.reset().await.unwrap();
    ctl.reset().await.unwrap();
    assert!(!path.exists());
    assert!(ctl.status().await.is_empty());
}

#[tokio::test]
async fn test_bad_targets_fail_before_backend_starts() {
    let backend = Arc::new(MockBackend::<u64>::new());

    let result = Controller::<u64>::builder()
        .backend(backend.clone())
        .target("numbers")
        .build();
    assert!(matches!(result, Err(Error::InvalidTargetSpec(_))));

    let result = Controller::<u64>::builder()
        .backend(backend.clone())
        .target("jobs.numbers:missing")
        .build();
    assert!(matches!(result, Err(Error::TargetNotFound(_))));

    assert!(!backend.is_alive().await);
    assert!(backend.submitted_ids().await.is_empty());
}

#[tokio::test]
async fn test_registry_target_uses_component_state_file() {
    let dir = TempDir::new().unwrap();
    let mut registry = ProducerRegistry::<u64>::new();
    registry.register(
        "jobs.numbers",
        "count",
        from_fn(|resume: Option<u64>| resume.map_or(0, |last| last + 1)..4),
    );

    let backend = Arc::new(MockBackend::<u64>::new());
    let controller = Controller::<u64>::builder()
        .backend(backend.clone())
        .target("jobs.numbers:count")
        .registry(registry)
        .config(test_config().with_state_dir(dir.path()))
        .build()
        .unwrap();

    assert_eq!(controller.state_file(), dir.path().join("jobs.numbers.state"));
    controller.run().await.unwrap();
    assert_eq!(controller.phase(), Phase::Done);
    assert_eq!(controller.status().await.job_id, Some(3));
}

#[tokio::test]
async fn test_unwritable_checkpoint_fails_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("numbers.state");
    std::fs::create_dir(&path).unwrap();

    let backend = Arc::new(MockBackend::<u64>::new());
    let result = controller(backend.clone(), numbers(50, Hints::default()), &path, test_config())
        .run()
        .await;

    assert!(matches!(result, Err(Error::StateWrite(_))));
    assert!(backend.is_stopped());
}
