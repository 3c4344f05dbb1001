//! ContentStore — owns the content database, assigns ids, and plans
//! the per-index step fan-out for each ingestion verb.

use std::path::Path;

use chrono::Utc;

use lode_core::ids::new_id;
use lode_core::models::{
    index_delete_step, index_step, ContentRecord, ContentSummary, Operation, OperationKind,
    OperationStep, UpsertRequest, STEP_DELETE, STEP_UPSERT,
};
use lode_core::{LodeError, LodeResult};

use crate::pool::StorePool;
use crate::queries::{content_crud, operation_ops};
use crate::{migrations, to_storage_err};

/// The content store for one node. Exclusively owns the content
/// database and the operation ledger.
pub struct ContentStore {
    pool: StorePool,
}

impl ContentStore {
    /// Open a content store backed by a file on disk.
    pub fn open(path: &Path) -> LodeResult<Self> {
        let store = Self {
            pool: StorePool::open(path)?,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory content store (for testing).
    pub fn open_in_memory() -> LodeResult<Self> {
        let store = Self {
            pool: StorePool::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> LodeResult<()> {
        self.pool.write(migrations::run_migrations)
    }

    /// Persist the record and plan its fan-out in one transaction:
    /// content row, operation row, and one `pending` step row per
    /// planned step. An existing id is updated in place, preserving
    /// `created_at`.
    pub fn plan_upsert(
        &self,
        request: UpsertRequest,
        index_ids: &[String],
    ) -> LodeResult<(ContentRecord, Operation)> {
        self.pool.write(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| to_storage_err(format!("plan_upsert begin: {e}")))?;

            let now = Utc::now();
            let id = match request.id.as_deref().filter(|s| !s.is_empty()) {
                Some(id) => id.to_string(),
                None => new_id(),
            };
            let created_at = content_crud::get_content(&tx, &id)?
                .map(|existing| existing.created_at)
                .unwrap_or(now);

            let record = ContentRecord {
                id: id.clone(),
                title: request.title,
                description: request.description,
                content: request.content,
                mime_type: request.mime_type,
                tags: request.tags,
                source_url: request.source_url,
                created_at,
                updated_at: now,
            };
            content_crud::upsert_content(&tx, &record)?;

            let mut planned_steps = vec![STEP_UPSERT.to_string()];
            planned_steps.extend(index_ids.iter().map(|id| index_step(id)));
            let operation = Operation {
                operation_id: new_id(),
                content_id: id,
                kind: OperationKind::Upsert,
                planned_steps,
                created_at: now,
                updated_at: now,
            };
            operation_ops::insert_operation(&tx, &operation)?;

            tx.commit()
                .map_err(|e| to_storage_err(format!("plan_upsert commit: {e}")))?;
            Ok((record, operation))
        })
    }

    /// Plan a delete: operation row plus `pending` steps. The content
    /// row itself is removed by the pipeline's storage step, so a
    /// half-driven delete stays re-driveable.
    pub fn plan_delete(&self, content_id: &str, index_ids: &[String]) -> LodeResult<Operation> {
        self.pool.write(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| to_storage_err(format!("plan_delete begin: {e}")))?;

            let now = Utc::now();
            let mut planned_steps = vec![STEP_DELETE.to_string()];
            planned_steps.extend(index_ids.iter().map(|id| index_delete_step(id)));
            let operation = Operation {
                operation_id: new_id(),
                content_id: content_id.to_string(),
                kind: OperationKind::Delete,
                planned_steps,
                created_at: now,
                updated_at: now,
            };
            operation_ops::insert_operation(&tx, &operation)?;

            tx.commit()
                .map_err(|e| to_storage_err(format!("plan_delete commit: {e}")))?;
            Ok(operation)
        })
    }

    pub fn get(&self, id: &str) -> LodeResult<Option<ContentRecord>> {
        self.pool.read(|conn| content_crud::get_content(conn, id))
    }

    /// Like `get`, but absence is an error.
    pub fn get_required(&self, id: &str) -> LodeResult<ContentRecord> {
        self.get(id)?
            .ok_or_else(|| LodeError::not_found(format!("content '{id}'")))
    }

    pub fn list(&self, skip: usize, take: usize) -> LodeResult<Vec<ContentSummary>> {
        self.pool.read(|conn| content_crud::list_content(conn, skip, take))
    }

    /// Remove the content row. Idempotent.
    pub fn apply_delete(&self, id: &str) -> LodeResult<bool> {
        self.pool.write(|conn| content_crud::delete_content(conn, id))
    }

    pub fn all_ids(&self) -> LodeResult<Vec<String>> {
        self.pool.read(content_crud::all_content_ids)
    }

    pub fn count(&self) -> LodeResult<usize> {
        self.pool.read(content_crud::count_content)
    }

    // --- Operation ledger ---

    pub fn load_operation(&self, operation_id: &str) -> LodeResult<Option<Operation>> {
        self.pool.read(|conn| operation_ops::get_operation(conn, operation_id))
    }

    pub fn load_steps(&self, operation_id: &str) -> LodeResult<Vec<OperationStep>> {
        self.pool.read(|conn| operation_ops::get_steps(conn, operation_id))
    }

    pub fn mark_step_running(&self, operation_id: &str, step: &str) -> LodeResult<()> {
        self.pool
            .write(|conn| operation_ops::mark_step_running(conn, operation_id, step))
    }

    pub fn mark_step_completed(&self, operation_id: &str, step: &str) -> LodeResult<()> {
        self.pool
            .write(|conn| operation_ops::mark_step_completed(conn, operation_id, step))
    }

    pub fn mark_step_failed(
        &self,
        operation_id: &str,
        step: &str,
        error: &str,
    ) -> LodeResult<()> {
        self.pool
            .write(|conn| operation_ops::mark_step_failed(conn, operation_id, step, error))
    }

    pub fn reset_step_pending(&self, operation_id: &str, step: &str) -> LodeResult<()> {
        self.pool
            .write(|conn| operation_ops::reset_step_pending(conn, operation_id, step))
    }

    /// Completed iff every planned step is `completed`.
    pub fn operation_completed(&self, operation_id: &str) -> LodeResult<bool> {
        self.pool.read(|conn| operation_ops::operation_completed(conn, operation_id))
    }

    /// Operations with non-completed steps, oldest first.
    pub fn incomplete_operations(&self) -> LodeResult<Vec<String>> {
        self.pool.read(operation_ops::incomplete_operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::models::{StepStatus, Tag};

    fn store() -> ContentStore {
        ContentStore::open_in_memory().unwrap()
    }

    fn request(content: &str) -> UpsertRequest {
        UpsertRequest {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_plans_storage_step_plus_one_per_index() {
        let store = store();
        let indexes = vec!["fts".to_string(), "vec".to_string()];
        let (record, operation) = store.plan_upsert(request("hello"), &indexes).unwrap();
        assert_eq!(
            operation.planned_steps,
            vec!["upsert", "index:fts", "index:vec"]
        );
        assert_eq!(operation.content_id, record.id);

        let steps = store.load_steps(&operation.operation_id).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(steps.iter().all(|s| s.attempts == 0));
    }

    #[test]
    fn upsert_with_existing_id_preserves_created_at() {
        let store = store();
        let (first, _) = store.plan_upsert(request("v1"), &[]).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut update = request("v2");
        update.id = Some(first.id.clone());
        let (second, _) = store.plan_upsert(update, &[]).unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get_required(&first.id).unwrap().content, "v2");
    }

    #[test]
    fn delete_plans_delete_steps() {
        let store = store();
        let indexes = vec!["fts".to_string()];
        let operation = store.plan_delete("some-id", &indexes).unwrap();
        assert_eq!(operation.planned_steps, vec!["delete", "index:fts:delete"]);
    }

    #[test]
    fn apply_delete_is_idempotent() {
        let store = store();
        let (record, _) = store.plan_upsert(request("bye"), &[]).unwrap();
        assert!(store.apply_delete(&record.id).unwrap());
        assert!(!store.apply_delete(&record.id).unwrap());
        assert!(store.get(&record.id).unwrap().is_none());
    }

    #[test]
    fn step_transitions_and_completion() {
        let store = store();
        let (_, op) = store
            .plan_upsert(request("x"), &["fts".to_string()])
            .unwrap();
        let op_id = &op.operation_id;

        assert!(!store.operation_completed(op_id).unwrap());

        store.mark_step_running(op_id, "upsert").unwrap();
        store.mark_step_completed(op_id, "upsert").unwrap();
        store.mark_step_running(op_id, "index:fts").unwrap();
        store.mark_step_failed(op_id, "index:fts", "boom").unwrap();

        let steps = store.load_steps(op_id).unwrap();
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[1].status, StepStatus::Failed);
        assert_eq!(steps[1].attempts, 1);
        assert_eq!(steps[1].last_error.as_deref(), Some("boom"));
        assert!(!store.operation_completed(op_id).unwrap());
        assert_eq!(store.incomplete_operations().unwrap(), vec![op_id.clone()]);

        store.mark_step_running(op_id, "index:fts").unwrap();
        store.mark_step_completed(op_id, "index:fts").unwrap();
        assert!(store.operation_completed(op_id).unwrap());
        assert!(store.incomplete_operations().unwrap().is_empty());
    }

    #[test]
    fn list_orders_newest_first_then_id() {
        let store = store();
        store.plan_upsert(request("a"), &[]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.plan_upsert(request("b"), &[]).unwrap();

        let page = store.list(0, 10).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at >= page[1].created_at);

        let second_page = store.list(1, 10).unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].id, page[1].id);
    }

    #[test]
    fn tags_roundtrip_through_storage() {
        let store = store();
        let mut req = request("tagged");
        req.tags = vec![Tag::parse("lang:Rust").unwrap()];
        let (record, _) = store.plan_upsert(req, &[]).unwrap();
        let loaded = store.get_required(&record.id).unwrap();
        assert_eq!(loaded.tags.len(), 1);
        assert_eq!(loaded.tags[0].value, "Rust");
    }
}
