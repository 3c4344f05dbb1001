//! The indexing pipeline: drives an operation's planned steps in order
//! against the registered indexes.
//!
//! Steps move `pending → running → {completed, failed}`. A failed step
//! does not abort later steps unless its index is required. Re-driving
//! an operation retries only steps that are not yet completed; a step
//! observed cancelled mid-run is reset to `pending`.

use tracing::{debug, warn};

use lode_core::models::{ContentRecord, Operation, OperationKind, StepAction, StepStatus};
use lode_core::{CancellationToken, LodeError, LodeResult};
use lode_index::IndexRegistry;
use lode_storage::ContentStore;

/// What one drive accomplished.
#[derive(Debug)]
pub struct DriveOutcome {
    /// Every planned step is now `completed`.
    pub completed: bool,
    /// First step error encountered, if any.
    pub first_error: Option<String>,
    /// Set when a `required` index failed; later steps were not run.
    pub required_failure: Option<LodeError>,
}

/// Executes operations against one node's store and index registry.
pub struct IndexingPipeline<'a> {
    store: &'a ContentStore,
    registry: &'a IndexRegistry,
}

impl<'a> IndexingPipeline<'a> {
    pub fn new(store: &'a ContentStore, registry: &'a IndexRegistry) -> Self {
        Self { store, registry }
    }

    /// Drive every non-completed step of the operation, in planned
    /// order.
    pub async fn drive(
        &self,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> LodeResult<DriveOutcome> {
        let op_id = &operation.operation_id;
        let steps = self.store.load_steps(op_id)?;

        // The record is loaded once; index steps of an upsert all see
        // the same snapshot.
        let record = match operation.kind {
            OperationKind::Upsert => self.store.get(&operation.content_id)?,
            OperationKind::Delete => None,
        };

        let mut first_error: Option<String> = None;
        for step in &steps {
            if step.status == StepStatus::Completed {
                continue;
            }
            cancel.check()?;
            self.store.mark_step_running(op_id, &step.step)?;
            debug!(operation = %op_id, step = %step.step, "step running");

            match self
                .execute(&step.step, operation, record.as_ref(), cancel)
                .await
            {
                Ok(()) => {
                    self.store.mark_step_completed(op_id, &step.step)?;
                    debug!(operation = %op_id, step = %step.step, "step completed");
                }
                Err(LodeError::Cancelled) => {
                    // Sole owner of the running step: hand it back for
                    // the next drive.
                    self.store.reset_step_pending(op_id, &step.step)?;
                    return Err(LodeError::Cancelled);
                }
                Err(e) => {
                    let message = e.to_string();
                    self.store.mark_step_failed(op_id, &step.step, &message)?;
                    warn!(operation = %op_id, step = %step.step, error = %message, "step failed");
                    if first_error.is_none() {
                        first_error = Some(message);
                    }
                    if self.step_is_required(&step.step) {
                        return Ok(DriveOutcome {
                            completed: false,
                            first_error,
                            required_failure: Some(e),
                        });
                    }
                }
            }
        }

        Ok(DriveOutcome {
            completed: self.store.operation_completed(op_id)?,
            first_error,
            required_failure: None,
        })
    }

    /// Re-drive every operation with outstanding steps.
    pub async fn drive_incomplete(&self, cancel: &CancellationToken) -> LodeResult<usize> {
        let mut driven = 0;
        for op_id in self.store.incomplete_operations()? {
            cancel.check()?;
            let Some(operation) = self.store.load_operation(&op_id)? else {
                continue;
            };
            self.drive(&operation, cancel).await?;
            driven += 1;
        }
        Ok(driven)
    }

    async fn execute(
        &self,
        step_token: &str,
        operation: &Operation,
        record: Option<&ContentRecord>,
        cancel: &CancellationToken,
    ) -> LodeResult<()> {
        match StepAction::parse(step_token) {
            None => Err(LodeError::invalid_argument(format!(
                "unknown step token '{step_token}'"
            ))),
            // The content row was persisted in the planning
            // transaction; this step just confirms it is there.
            Some(StepAction::Upsert) => {
                if record.is_none() {
                    return Err(LodeError::not_found(format!(
                        "content '{}'",
                        operation.content_id
                    )));
                }
                Ok(())
            }
            Some(StepAction::Delete) => {
                self.store.apply_delete(&operation.content_id)?;
                Ok(())
            }
            Some(StepAction::Index { index_id }) => {
                let index = self.registry.get_required(&index_id)?;
                let record = record.ok_or_else(|| {
                    LodeError::not_found(format!("content '{}'", operation.content_id))
                })?;
                index.index(record, cancel).await
            }
            Some(StepAction::IndexDelete { index_id }) => {
                self.registry
                    .get_required(&index_id)?
                    .remove(&operation.content_id)
                    .await
            }
        }
    }

    fn step_is_required(&self, step_token: &str) -> bool {
        match StepAction::parse(step_token) {
            Some(StepAction::Index { index_id })
            | Some(StepAction::IndexDelete { index_id }) => self
                .registry
                .get(&index_id)
                .map(|index| index.descriptor().required)
                .unwrap_or(false),
            _ => false,
        }
    }
}
