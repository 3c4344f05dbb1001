//! The operation ledger and its step table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use lode_core::models::{Operation, OperationKind, OperationStep, StepStatus};
use lode_core::LodeResult;

use crate::to_storage_err;

/// Insert an operation and one `pending` step row per planned step.
/// Callers wrap this in the same transaction as the content write.
pub fn insert_operation(conn: &Connection, operation: &Operation) -> LodeResult<()> {
    let steps_json = serde_json::to_string(&operation.planned_steps)
        .map_err(|e| to_storage_err(e.to_string()))?;
    conn.execute(
        "INSERT INTO operations (operation_id, content_id, kind, planned_steps, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            operation.operation_id,
            operation.content_id,
            operation.kind.as_str(),
            steps_json,
            operation.created_at.to_rfc3339(),
            operation.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;

    for step in &operation.planned_steps {
        conn.execute(
            "INSERT INTO operation_steps (operation_id, step, status, attempts, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3)",
            params![operation.operation_id, step, Utc::now().to_rfc3339()],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    }
    Ok(())
}

/// Fetch one operation by id.
pub fn get_operation(conn: &Connection, operation_id: &str) -> LodeResult<Option<Operation>> {
    let mut stmt = conn
        .prepare(
            "SELECT operation_id, content_id, kind, planned_steps, created_at, updated_at
             FROM operations WHERE operation_id = ?1",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;

    let mut rows = stmt
        .query_map(params![operation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(|e| to_storage_err(e.to_string()))?;

    match rows.next() {
        Some(row) => {
            let (operation_id, content_id, kind, steps_json, created, updated) =
                row.map_err(|e| to_storage_err(e.to_string()))?;
            let kind = OperationKind::parse(&kind)
                .ok_or_else(|| to_storage_err(format!("unknown operation kind '{kind}'")))?;
            let planned_steps: Vec<String> =
                serde_json::from_str(&steps_json).map_err(|e| to_storage_err(e.to_string()))?;
            Ok(Some(Operation {
                operation_id,
                content_id,
                kind,
                planned_steps,
                created_at: parse_instant(&created)?,
                updated_at: parse_instant(&updated)?,
            }))
        }
        None => Ok(None),
    }
}

/// All step rows for one operation, in planned order.
pub fn get_steps(conn: &Connection, operation_id: &str) -> LodeResult<Vec<OperationStep>> {
    let operation = get_operation(conn, operation_id)?
        .ok_or_else(|| to_storage_err(format!("operation '{operation_id}' not found")))?;

    let mut stmt = conn
        .prepare(
            "SELECT step, status, attempts, last_error
             FROM operation_steps WHERE operation_id = ?1",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;

    let rows = stmt
        .query_map(params![operation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .map_err(|e| to_storage_err(e.to_string()))?;

    let mut by_step = std::collections::HashMap::new();
    for row in rows {
        let (step, status, attempts, last_error) =
            row.map_err(|e| to_storage_err(e.to_string()))?;
        let status = StepStatus::parse(&status)
            .ok_or_else(|| to_storage_err(format!("unknown step status '{status}'")))?;
        by_step.insert(
            step.clone(),
            OperationStep {
                operation_id: operation_id.to_string(),
                step,
                status,
                attempts: attempts as u32,
                last_error,
            },
        );
    }

    // Return in planned order, not table order.
    let mut steps = Vec::with_capacity(operation.planned_steps.len());
    for token in &operation.planned_steps {
        let step = by_step
            .remove(token)
            .ok_or_else(|| to_storage_err(format!("missing step row '{token}'")))?;
        steps.push(step);
    }
    Ok(steps)
}

/// Transition a step to `running` and count the attempt.
pub fn mark_step_running(conn: &Connection, operation_id: &str, step: &str) -> LodeResult<()> {
    set_step(conn, operation_id, step, StepStatus::Running, None, true)
}

/// Transition a step to `completed`.
pub fn mark_step_completed(conn: &Connection, operation_id: &str, step: &str) -> LodeResult<()> {
    set_step(conn, operation_id, step, StepStatus::Completed, None, false)
}

/// Transition a step to `failed`, recording the error.
pub fn mark_step_failed(
    conn: &Connection,
    operation_id: &str,
    step: &str,
    error: &str,
) -> LodeResult<()> {
    set_step(
        conn,
        operation_id,
        step,
        StepStatus::Failed,
        Some(error),
        false,
    )
}

/// Return a step observed cancelled mid-run to `pending` so the next
/// pipeline drive retries it.
pub fn reset_step_pending(conn: &Connection, operation_id: &str, step: &str) -> LodeResult<()> {
    set_step(conn, operation_id, step, StepStatus::Pending, None, false)
}

fn set_step(
    conn: &Connection,
    operation_id: &str,
    step: &str,
    status: StepStatus,
    error: Option<&str>,
    count_attempt: bool,
) -> LodeResult<()> {
    let attempts_sql = if count_attempt { "attempts + 1" } else { "attempts" };
    let affected = conn
        .execute(
            &format!(
                "UPDATE operation_steps
                 SET status = ?1, attempts = {attempts_sql},
                     last_error = COALESCE(?2, last_error), updated_at = ?3
                 WHERE operation_id = ?4 AND step = ?5"
            ),
            params![
                status.as_str(),
                error,
                Utc::now().to_rfc3339(),
                operation_id,
                step
            ],
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    if affected == 0 {
        return Err(to_storage_err(format!(
            "no step row for ({operation_id}, {step})"
        )));
    }
    // Touch the owning operation so its updated_at tracks step activity.
    conn.execute(
        "UPDATE operations SET updated_at = ?1 WHERE operation_id = ?2",
        params![Utc::now().to_rfc3339(), operation_id],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// An operation is completed iff every step is `completed`.
pub fn operation_completed(conn: &Connection, operation_id: &str) -> LodeResult<bool> {
    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM operation_steps
             WHERE operation_id = ?1 AND status != 'completed'",
            params![operation_id],
            |row| row.get(0),
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(remaining == 0)
}

/// Ids of operations that still have non-completed steps, oldest first.
pub fn incomplete_operations(conn: &Connection) -> LodeResult<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT o.operation_id
             FROM operations o
             JOIN operation_steps s ON s.operation_id = o.operation_id
             WHERE s.status != 'completed'
             ORDER BY o.created_at ASC, o.operation_id ASC",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| to_storage_err(e.to_string()))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.map_err(|e| to_storage_err(e.to_string()))?);
    }
    Ok(ids)
}

fn parse_instant(raw: &str) -> LodeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| to_storage_err(format!("bad timestamp '{raw}': {e}")))
}
