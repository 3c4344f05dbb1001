//! Insert, update, get, delete, and list for content records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use lode_core::models::{ContentRecord, ContentSummary, Tag};
use lode_core::LodeResult;

use crate::to_storage_err;

/// Insert or replace a content record by id.
pub fn upsert_content(conn: &Connection, record: &ContentRecord) -> LodeResult<()> {
    let tags_json =
        serde_json::to_string(&record.tags).map_err(|e| to_storage_err(e.to_string()))?;
    conn.execute(
        "INSERT INTO content (
            id, title, description, content, mime_type, tags, source_url,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            title       = excluded.title,
            description = excluded.description,
            content     = excluded.content,
            mime_type   = excluded.mime_type,
            tags        = excluded.tags,
            source_url  = excluded.source_url,
            updated_at  = excluded.updated_at",
        params![
            record.id,
            record.title,
            record.description,
            record.content,
            record.mime_type,
            tags_json,
            record.source_url,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}

/// Fetch a record by id.
pub fn get_content(conn: &Connection, id: &str) -> LodeResult<Option<ContentRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, description, content, mime_type, tags, source_url,
                    created_at, updated_at
             FROM content WHERE id = ?1",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;

    let mut rows = stmt
        .query_map(params![id], |row| Ok(parse_content_row(row)))
        .map_err(|e| to_storage_err(e.to_string()))?;

    match rows.next() {
        Some(row) => {
            let record = row.map_err(|e| to_storage_err(e.to_string()))??;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// List a page of summaries ordered by `created_at` descending, then
/// `id` ascending, so pagination is deterministic.
pub fn list_content(conn: &Connection, skip: usize, take: usize) -> LodeResult<Vec<ContentSummary>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, mime_type, created_at, updated_at
             FROM content
             ORDER BY created_at DESC, id ASC
             LIMIT ?1 OFFSET ?2",
        )
        .map_err(|e| to_storage_err(e.to_string()))?;

    let rows = stmt
        .query_map(params![take as i64, skip as i64], |row| {
            let created: String = row.get(3)?;
            let updated: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                created,
                updated,
            ))
        })
        .map_err(|e| to_storage_err(e.to_string()))?;

    let mut results = Vec::new();
    for row in rows {
        let (id, title, mime_type, created, updated) =
            row.map_err(|e| to_storage_err(e.to_string()))?;
        results.push(ContentSummary {
            id,
            title,
            mime_type,
            created_at: parse_instant(&created)?,
            updated_at: parse_instant(&updated)?,
        });
    }
    Ok(results)
}

/// Remove a record. Idempotent; returns whether a row was deleted.
pub fn delete_content(conn: &Connection, id: &str) -> LodeResult<bool> {
    let affected = conn
        .execute("DELETE FROM content WHERE id = ?1", params![id])
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(affected > 0)
}

/// Every stored content id, ascending. Used for inverted queries.
pub fn all_content_ids(conn: &Connection) -> LodeResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT id FROM content ORDER BY id ASC")
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

pub fn count_content(conn: &Connection) -> LodeResult<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM content", [], |row| row.get(0))
        .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(count as usize)
}

/// Parse one full content row. Returns a nested result so rusqlite's
/// row error and our parse errors stay distinct.
fn parse_content_row(row: &Row<'_>) -> LodeResult<ContentRecord> {
    let tags_json: String = row.get(5).map_err(|e| to_storage_err(e.to_string()))?;
    let tags: Vec<Tag> =
        serde_json::from_str(&tags_json).map_err(|e| to_storage_err(e.to_string()))?;
    let created: String = row.get(7).map_err(|e| to_storage_err(e.to_string()))?;
    let updated: String = row.get(8).map_err(|e| to_storage_err(e.to_string()))?;
    Ok(ContentRecord {
        id: row.get(0).map_err(|e| to_storage_err(e.to_string()))?,
        title: row.get(1).map_err(|e| to_storage_err(e.to_string()))?,
        description: row.get(2).map_err(|e| to_storage_err(e.to_string()))?,
        content: row.get(3).map_err(|e| to_storage_err(e.to_string()))?,
        mime_type: row.get(4).map_err(|e| to_storage_err(e.to_string()))?,
        tags,
        source_url: row.get(6).map_err(|e| to_storage_err(e.to_string()))?,
        created_at: parse_instant(&created)?,
        updated_at: parse_instant(&updated)?,
    })
}

fn parse_instant(raw: &str) -> LodeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| to_storage_err(format!("bad timestamp '{raw}': {e}")))
}
