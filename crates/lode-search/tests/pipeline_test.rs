//! Step semantics: partial failure, retry, required-index abort,
//! cancellation reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lode_core::models::{
    ContentRecord, IndexHit, IndexKind, SearchIndexDescriptor, StepStatus, UpsertRequest,
};
use lode_core::{Cancellable, CancellationToken, ISearchIndex, LodeError, LodeResult};
use lode_index::{FtsIndex, IndexRegistry};
use lode_search::IndexingPipeline;
use lode_storage::ContentStore;

/// An index that fails until told otherwise.
struct FlakyIndex {
    descriptor: SearchIndexDescriptor,
    healthy: AtomicBool,
}

impl FlakyIndex {
    fn new(id: &str, required: bool) -> Self {
        let mut descriptor = SearchIndexDescriptor::new(id, IndexKind::Fts);
        descriptor.required = required;
        Self {
            descriptor,
            healthy: AtomicBool::new(false),
        }
    }

    fn heal(&self) {
        self.healthy.store(true, Ordering::Relaxed);
    }

    fn check(&self) -> LodeResult<()> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(LodeError::IndexUnavailable {
                id: self.descriptor.id.clone(),
                reason: "flaky".into(),
            })
        }
    }
}

#[async_trait]
impl ISearchIndex for FlakyIndex {
    fn descriptor(&self) -> &SearchIndexDescriptor {
        &self.descriptor
    }

    async fn index(&self, _record: &ContentRecord, _cancel: &CancellationToken) -> LodeResult<()> {
        self.check()
    }

    async fn remove(&self, _content_id: &str) -> LodeResult<()> {
        self.check()
    }

    async fn clear(&self) -> LodeResult<()> {
        Ok(())
    }

    async fn search(
        &self,
        _query: &str,
        _limit: usize,
        _cancel: &CancellationToken,
    ) -> LodeResult<Vec<IndexHit>> {
        Ok(Vec::new())
    }
}

fn fts(id: &str) -> Arc<dyn ISearchIndex> {
    Arc::new(
        FtsIndex::open_in_memory(SearchIndexDescriptor::new(id, IndexKind::Fts), true).unwrap(),
    )
}

fn request(content: &str) -> UpsertRequest {
    UpsertRequest {
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn failed_step_does_not_abort_later_steps() {
    let store = ContentStore::open_in_memory().unwrap();
    let flaky = Arc::new(FlakyIndex::new("flaky", false));
    let registry = IndexRegistry::from_entries(vec![flaky.clone(), fts("good")]);
    let cancel = CancellationToken::new();

    let (_, op) = store
        .plan_upsert(request("body"), &registry.ids())
        .unwrap();
    let pipeline = IndexingPipeline::new(&store, &registry);
    let outcome = pipeline.drive(&op, &cancel).await.unwrap();

    assert!(!outcome.completed);
    assert!(outcome.first_error.is_some());
    assert!(outcome.required_failure.is_none());

    let steps = store.load_steps(&op.operation_id).unwrap();
    assert_eq!(steps[0].status, StepStatus::Completed); // upsert
    assert_eq!(steps[1].status, StepStatus::Failed); // index:flaky
    assert_eq!(steps[2].status, StepStatus::Completed); // index:good
    assert!(steps[1].last_error.as_deref().unwrap().contains("flaky"));
}

#[tokio::test]
async fn redrive_retries_only_non_completed_steps() {
    let store = ContentStore::open_in_memory().unwrap();
    let flaky = Arc::new(FlakyIndex::new("flaky", false));
    let registry = IndexRegistry::from_entries(vec![fts("good"), flaky.clone()]);
    let cancel = CancellationToken::new();

    let (_, op) = store
        .plan_upsert(request("body"), &registry.ids())
        .unwrap();
    let pipeline = IndexingPipeline::new(&store, &registry);
    pipeline.drive(&op, &cancel).await.unwrap();

    let before = store.load_steps(&op.operation_id).unwrap();
    assert_eq!(before[1].attempts, 1); // index:good succeeded once
    assert_eq!(before[2].attempts, 1); // index:flaky failed once

    flaky.heal();
    let driven = pipeline.drive_incomplete(&cancel).await.unwrap();
    assert_eq!(driven, 1);

    let after = store.load_steps(&op.operation_id).unwrap();
    assert!(after.iter().all(|s| s.status == StepStatus::Completed));
    // The already-completed step was not re-run.
    assert_eq!(after[1].attempts, 1);
    assert_eq!(after[2].attempts, 2);
    assert!(store.operation_completed(&op.operation_id).unwrap());
}

#[tokio::test]
async fn required_index_failure_aborts_the_remainder() {
    let store = ContentStore::open_in_memory().unwrap();
    let required = Arc::new(FlakyIndex::new("required", true));
    let registry = IndexRegistry::from_entries(vec![required, fts("later")]);
    let cancel = CancellationToken::new();

    let (_, op) = store
        .plan_upsert(request("body"), &registry.ids())
        .unwrap();
    let pipeline = IndexingPipeline::new(&store, &registry);
    let outcome = pipeline.drive(&op, &cancel).await.unwrap();

    assert!(outcome.required_failure.is_some());
    let steps = store.load_steps(&op.operation_id).unwrap();
    assert_eq!(steps[1].status, StepStatus::Failed);
    // The later index step never ran.
    assert_eq!(steps[2].status, StepStatus::Pending);
    assert_eq!(steps[2].attempts, 0);
}

#[tokio::test]
async fn delete_operation_is_idempotent_end_to_end() {
    let store = ContentStore::open_in_memory().unwrap();
    let registry = IndexRegistry::from_entries(vec![fts("fts")]);
    let cancel = CancellationToken::new();
    let pipeline = IndexingPipeline::new(&store, &registry);

    let (record, op) = store
        .plan_upsert(request("to be removed"), &registry.ids())
        .unwrap();
    pipeline.drive(&op, &cancel).await.unwrap();

    let del1 = store.plan_delete(&record.id, &registry.ids()).unwrap();
    let outcome = pipeline.drive(&del1, &cancel).await.unwrap();
    assert!(outcome.completed);
    assert!(store.get(&record.id).unwrap().is_none());

    // Deleting again succeeds and leaves the same final state.
    let del2 = store.plan_delete(&record.id, &registry.ids()).unwrap();
    let outcome = pipeline.drive(&del2, &cancel).await.unwrap();
    assert!(outcome.completed);
    assert!(store.get(&record.id).unwrap().is_none());
}

#[tokio::test]
async fn cancellation_resets_the_running_step() {
    let store = ContentStore::open_in_memory().unwrap();
    let registry = IndexRegistry::from_entries(vec![fts("fts")]);
    let cancel = CancellationToken::new();

    let (_, op) = store
        .plan_upsert(request("body"), &registry.ids())
        .unwrap();
    let pipeline = IndexingPipeline::new(&store, &registry);

    // Cancel before the drive: no step may move past pending.
    cancel.cancel();
    let err = pipeline.drive(&op, &cancel).await.unwrap_err();
    assert!(matches!(err, LodeError::Cancelled));
    let steps = store.load_steps(&op.operation_id).unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Pending));

    // A fresh token drives it to completion.
    let outcome = pipeline.drive(&op, &CancellationToken::new()).await.unwrap();
    assert!(outcome.completed);
}

#[tokio::test]
async fn unknown_index_step_fails_with_index_not_found() {
    let store = ContentStore::open_in_memory().unwrap();
    let registry = IndexRegistry::from_entries(vec![]);
    let cancel = CancellationToken::new();

    // Plan against an index that is not registered.
    let (_, op) = store
        .plan_upsert(request("body"), &["ghost".to_string()])
        .unwrap();
    let pipeline = IndexingPipeline::new(&store, &registry);
    let outcome = pipeline.drive(&op, &cancel).await.unwrap();

    assert!(!outcome.completed);
    let steps = store.load_steps(&op.operation_id).unwrap();
    assert_eq!(steps[1].status, StepStatus::Failed);
    assert!(steps[1]
        .last_error
        .as_deref()
        .unwrap()
        .contains("index not found"));
}
