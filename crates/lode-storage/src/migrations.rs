//! Content database schema: content rows, operations, operation steps.

use rusqlite::Connection;

use lode_core::LodeResult;

use crate::to_storage_err;

pub fn run_migrations(conn: &Connection) -> LodeResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS content (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            content     TEXT NOT NULL,
            mime_type   TEXT NOT NULL DEFAULT '',
            tags        TEXT NOT NULL DEFAULT '[]',
            source_url  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_content_created ON content(created_at DESC, id ASC);

        CREATE TABLE IF NOT EXISTS operations (
            operation_id  TEXT PRIMARY KEY,
            content_id    TEXT NOT NULL,
            kind          TEXT NOT NULL,
            planned_steps TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_operations_content ON operations(content_id);

        CREATE TABLE IF NOT EXISTS operation_steps (
            operation_id TEXT NOT NULL,
            step         TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending',
            attempts     INTEGER NOT NULL DEFAULT 0,
            last_error   TEXT,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (operation_id, step),
            FOREIGN KEY (operation_id) REFERENCES operations(operation_id) ON DELETE CASCADE
        );
        ",
    )
    .map_err(|e| to_storage_err(e.to_string()))?;
    Ok(())
}
