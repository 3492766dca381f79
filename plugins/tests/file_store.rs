use emrakul_core::api::{
    BatchMember, BatchPatch, BatchRecord, BatchState, StoreError, TaskFilter, TaskPatch,
    TaskRecord, TaskResult, TaskSpec, TaskStatus, TaskStore, WorkerKind,
};
use emrakul_plugins::store::FileTaskStore;
use pretty_assertions::assert_eq;

fn record(id: &str, worker: WorkerKind) -> TaskRecord {
    TaskRecord::new(id, TaskSpec::new(worker, "refactor the parser", "/srv/app"))
}

#[tokio::test]
async fn records_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        store.create(record("codex-aaaa", WorkerKind::Codex)).await.unwrap();
        store.update("codex-aaaa", TaskPatch::running()).await.unwrap();
        let mut result = TaskResult::skipped("done");
        result.exit_code = Some(0);
        result.stdout = "patched 3 files".into();
        store
            .update(
                "codex-aaaa",
                TaskPatch::finish(TaskStatus::Succeeded, result),
            )
            .await
            .unwrap();
    }

    let reopened = FileTaskStore::open(dir.path()).unwrap();
    let rec = reopened.get("codex-aaaa").await.unwrap();
    assert_eq!(rec.status, TaskStatus::Succeeded);
    assert!(rec.started_at.is_some());
    let result = rec.result.unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "patched 3 files");
}

#[tokio::test]
async fn result_is_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTaskStore::open(dir.path()).unwrap();
    store.create(record("gemini-1", WorkerKind::Gemini)).await.unwrap();
    store
        .update(
            "gemini-1",
            TaskPatch::finish(TaskStatus::Skipped, TaskResult::skipped("first")),
        )
        .await
        .unwrap();

    let err = store
        .update(
            "gemini-1",
            TaskPatch::finish(TaskStatus::Skipped, TaskResult::skipped("second")),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::ResultAlreadyWritten(_) | StoreError::InvalidTransition { .. }
    ));
    let rec = store.get("gemini-1").await.unwrap();
    assert_eq!(rec.result.unwrap().message.as_deref(), Some("first"));
}

#[tokio::test]
async fn batch_creation_checks_every_id_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTaskStore::open(dir.path()).unwrap();
    store.create(record("kimi-taken", WorkerKind::Kimi)).await.unwrap();

    let members = vec![
        BatchMember {
            name: "fresh".into(),
            task_id: "kimi-fresh".into(),
        },
        BatchMember {
            name: "taken".into(),
            task_id: "kimi-taken".into(),
        },
    ];
    let tasks = vec![
        record("kimi-fresh", WorkerKind::Kimi),
        record("kimi-taken", WorkerKind::Kimi),
    ];
    let err = store
        .create_batch(BatchRecord::new("batch-1", None, members, 2), tasks)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(id) if id == "kimi-taken"));

    assert!(matches!(
        store.get("kimi-fresh").await.unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert!(store.list_batches().await.unwrap().is_empty());
}

#[tokio::test]
async fn batches_and_filters_round_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTaskStore::open(dir.path()).unwrap();

    let mut a = record("codex-a", WorkerKind::Codex);
    a.batch_id = Some("batch-x".into());
    let mut b = record("gemini-b", WorkerKind::Gemini);
    b.batch_id = Some("batch-x".into());
    let members = vec![
        BatchMember {
            name: "a".into(),
            task_id: a.id.clone(),
        },
        BatchMember {
            name: "b".into(),
            task_id: b.id.clone(),
        },
    ];
    store
        .create_batch(BatchRecord::new("batch-x", Some("nightly".into()), members, 1), vec![a, b])
        .await
        .unwrap();
    store.create(record("opencode-c", WorkerKind::Opencode)).await.unwrap();

    store
        .update_batch("batch-x", BatchPatch::state(BatchState::Running))
        .await
        .unwrap();
    store.update_batch("batch-x", BatchPatch::cancel()).await.unwrap();
    let err = store
        .update_batch("batch-x", BatchPatch::state(BatchState::Queued))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidBatchTransition { .. }));

    let batch = store.get_batch("batch-x").await.unwrap();
    assert_eq!(batch.state, BatchState::Running);
    assert!(batch.cancel_requested);
    assert_eq!(batch.name.as_deref(), Some("nightly"));

    let in_batch = store.list(&TaskFilter::batch("batch-x")).await.unwrap();
    assert_eq!(in_batch.len(), 2);
    let gemini = store
        .list(&TaskFilter {
            worker: Some(WorkerKind::Gemini),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(gemini.len(), 1);
    assert_eq!(gemini[0].id, "gemini-b");
    assert_eq!(store.list(&TaskFilter::default()).await.unwrap().len(), 3);
}
