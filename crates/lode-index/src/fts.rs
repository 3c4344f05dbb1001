//! FTS5 full-text index: porter-stemmed, field-aware, BM25-ranked,
//! with snippet extraction.
//!
//! Layout: an FTS5 virtual table `entries(title, description, content)`
//! whose rowids are owned by the `entry_map` table, which carries the
//! external `content_id` key. Upserts are delete-then-insert in one
//! transaction.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use lode_core::constants::{
    DEFAULT_SNIPPET_LENGTH, SNIPPET_MARK_CLOSE, SNIPPET_MARK_OPEN, SNIPPET_SEPARATOR,
};
use lode_core::models::{ContentRecord, IndexHit, SearchIndexDescriptor};
use lode_core::{CancellationToken, ISearchIndex, LodeError, LodeResult};

use crate::to_index_err;

/// Snippet budget in tokens handed to FTS5; the 200-char cap is
/// enforced afterwards on a char boundary.
const SNIPPET_TOKENS: usize = 16;

/// A persistent FTS5 index over (title, description, content).
pub struct FtsIndex {
    descriptor: SearchIndexDescriptor,
    conn: Mutex<Connection>,
}

impl FtsIndex {
    /// Open (or create) the index file. Stemming selects the porter
    /// tokenizer and applies to both write and query side.
    pub fn open(
        descriptor: SearchIndexDescriptor,
        path: &Path,
        stemming: bool,
    ) -> LodeResult<Self> {
        let conn = Connection::open(path).map_err(|e| LodeError::IndexUnavailable {
            id: descriptor.id.clone(),
            reason: format!("open {}: {e}", path.display()),
        })?;
        debug!(index = %descriptor.id, path = %path.display(), stemming, "FTS index opened");
        Self::init(descriptor, conn, stemming)
    }

    /// Open an in-memory index (for testing).
    pub fn open_in_memory(descriptor: SearchIndexDescriptor, stemming: bool) -> LodeResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| LodeError::IndexUnavailable {
            id: descriptor.id.clone(),
            reason: e.to_string(),
        })?;
        Self::init(descriptor, conn, stemming)
    }

    fn init(
        descriptor: SearchIndexDescriptor,
        conn: Connection,
        stemming: bool,
    ) -> LodeResult<Self> {
        let tokenizer = if stemming {
            "porter unicode61"
        } else {
            "unicode61"
        };
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;

             CREATE TABLE IF NOT EXISTS entry_map (
                 content_id TEXT NOT NULL UNIQUE
             );

             CREATE VIRTUAL TABLE IF NOT EXISTS entries USING fts5(
                 title, description, content,
                 tokenize = '{tokenizer}'
             );"
        ))
        .map_err(|e| LodeError::IndexUnavailable {
            id: descriptor.id.clone(),
            reason: format!("schema: {e}"),
        })?;
        Ok(Self {
            descriptor,
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> LodeResult<T>
    where
        F: FnOnce(&Connection) -> LodeResult<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| to_index_err(format!("fts lock poisoned: {e}")))?;
        f(&guard)
    }

    /// Every content id present in the index, ascending.
    pub fn all_ids(&self) -> LodeResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT content_id FROM entry_map ORDER BY content_id ASC")
                .map_err(|e| to_index_err(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| to_index_err(e.to_string()))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|e| to_index_err(e.to_string()))?);
            }
            Ok(ids)
        })
    }

    pub fn len(&self) -> LodeResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM entry_map", [], |row| row.get(0))
                .map_err(|e| to_index_err(e.to_string()))?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> LodeResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Distinguish bad MATCH syntax from real storage failures.
fn map_match_err(e: rusqlite::Error) -> LodeError {
    let message = e.to_string();
    if message.contains("fts5") {
        LodeError::QuerySyntax {
            position: 0,
            message,
        }
    } else {
        to_index_err(message)
    }
}

#[async_trait]
impl ISearchIndex for FtsIndex {
    fn descriptor(&self) -> &SearchIndexDescriptor {
        &self.descriptor
    }

    async fn index(&self, record: &ContentRecord, cancel: &CancellationToken) -> LodeResult<()> {
        cancel.check()?;
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| to_index_err(format!("fts index begin: {e}")))?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT rowid FROM entry_map WHERE content_id = ?1",
                    params![record.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| to_index_err(e.to_string()))?;

            let rowid = match existing {
                Some(rowid) => {
                    tx.execute("DELETE FROM entries WHERE rowid = ?1", params![rowid])
                        .map_err(|e| to_index_err(e.to_string()))?;
                    rowid
                }
                None => {
                    tx.execute(
                        "INSERT INTO entry_map (content_id) VALUES (?1)",
                        params![record.id],
                    )
                    .map_err(|e| to_index_err(e.to_string()))?;
                    tx.last_insert_rowid()
                }
            };

            tx.execute(
                "INSERT INTO entries (rowid, title, description, content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![rowid, record.title, record.description, record.content],
            )
            .map_err(|e| to_index_err(e.to_string()))?;

            tx.commit()
                .map_err(|e| to_index_err(format!("fts index commit: {e}")))?;
            Ok(())
        })
    }

    async fn remove(&self, content_id: &str) -> LodeResult<()> {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| to_index_err(format!("fts remove begin: {e}")))?;
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT rowid FROM entry_map WHERE content_id = ?1",
                    params![content_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| to_index_err(e.to_string()))?;
            if let Some(rowid) = existing {
                tx.execute("DELETE FROM entries WHERE rowid = ?1", params![rowid])
                    .map_err(|e| to_index_err(e.to_string()))?;
                tx.execute("DELETE FROM entry_map WHERE rowid = ?1", params![rowid])
                    .map_err(|e| to_index_err(e.to_string()))?;
            }
            tx.commit()
                .map_err(|e| to_index_err(format!("fts remove commit: {e}")))?;
            Ok(())
        })
    }

    async fn clear(&self) -> LodeResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("DELETE FROM entries; DELETE FROM entry_map;")
                .map_err(|e| to_index_err(e.to_string()))?;
            Ok(())
        })
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> LodeResult<Vec<IndexHit>> {
        cancel.check()?;
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let raw = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT m.content_id, entries.rank,
                            snippet(entries, -1, '{SNIPPET_MARK_OPEN}', '{SNIPPET_MARK_CLOSE}',
                                    '{SNIPPET_SEPARATOR}', {SNIPPET_TOKENS})
                     FROM entries
                     JOIN entry_map m ON m.rowid = entries.rowid
                     WHERE entries MATCH ?1
                     ORDER BY rank
                     LIMIT ?2"
                ))
                .map_err(|e| to_index_err(e.to_string()))?;

            let rows = stmt
                .query_map(params![query, limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(map_match_err)?;

            let mut collected = Vec::new();
            for row in rows {
                // Bad MATCH syntax surfaces while stepping, not at prepare.
                collected.push(row.map_err(map_match_err)?);
            }
            Ok(collected)
        })?;

        Ok(normalize_hits(raw))
    }
}

/// Map raw BM25 ranks into `(0, 1]`.
///
/// FTS5 ranks are negative with the best match the most negative, so
/// the squash must grow with `|rank|`: `|rank| / (1 + |rank|)` is
/// monotonically increasing in match quality. Dividing by the
/// per-query maximum sends the best document to 1.0; a
/// single-document match therefore scores 1.0, which keeps any
/// non-trivial match at or above the default relevance floor.
fn normalize_hits(raw: Vec<(String, f64, String)>) -> Vec<IndexHit> {
    let squash = |rank: f64| rank.abs() / (1.0 + rank.abs());
    let max_norm = raw
        .iter()
        .map(|(_, rank, _)| squash(*rank))
        .fold(0.0_f64, f64::max);

    let mut hits: Vec<IndexHit> = raw
        .into_iter()
        .map(|(content_id, rank, snippet)| IndexHit {
            content_id,
            // A degenerate all-zero rank set carries no scoring
            // signal; those rows still matched, so they score 1.0.
            score: if max_norm > 0.0 {
                squash(rank) / max_norm
            } else {
                1.0
            },
            snippet: Some(cap_snippet(snippet)),
        })
        .collect();

    // Descending score; ties broken by ascending content_id so
    // pagination is deterministic.
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.content_id.cmp(&b.content_id))
    });
    hits
}

/// Enforce the character cap on a char boundary.
fn cap_snippet(snippet: String) -> String {
    if snippet.chars().count() <= DEFAULT_SNIPPET_LENGTH {
        return snippet;
    }
    let mut capped: String = snippet.chars().take(DEFAULT_SNIPPET_LENGTH).collect();
    capped.push_str(SNIPPET_SEPARATOR);
    capped
}

impl Drop for FtsIndex {
    fn drop(&mut self) {
        if let Ok(conn) = self.conn.lock() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lode_core::models::IndexKind;

    fn record(id: &str, title: &str, content: &str) -> ContentRecord {
        ContentRecord {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            content: content.into(),
            mime_type: String::new(),
            tags: Vec::new(),
            source_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn index() -> FtsIndex {
        FtsIndex::open_in_memory(SearchIndexDescriptor::new("fts", IndexKind::Fts), true)
            .unwrap()
    }

    #[tokio::test]
    async fn single_match_scores_one() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "simple test content"), &cancel)
            .await
            .unwrap();

        let hits = fts.search("test", 10, &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content_id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits[0].score >= 0.3, "regression: match under relevance floor");
    }

    #[tokio::test]
    async fn stemming_unifies_regular_forms() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "summary of findings"), &cancel)
            .await
            .unwrap();

        // Write side stemmed, query side stemmed: plural query matches
        // the singular document and vice versa.
        let hits = fts.search("summaries", 10, &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
        let hits = fts.search("finding", 10, &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
        // Irregular forms stay distinct.
        let hits = fts.search("found", 10, &cancel).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_previous_entry() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "old topic"), &cancel).await.unwrap();
        fts.index(&record("a", "", "new subject"), &cancel).await.unwrap();

        assert!(fts.search("topic", 10, &cancel).await.unwrap().is_empty());
        assert_eq!(fts.search("subject", 10, &cancel).await.unwrap().len(), 1);
        assert_eq!(fts.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "something"), &cancel).await.unwrap();
        fts.remove("a").await.unwrap();
        fts.remove("a").await.unwrap();
        fts.remove("never-existed").await.unwrap();
        assert!(fts.search("something", 10, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_preserves_schema() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "text"), &cancel).await.unwrap();
        fts.clear().await.unwrap();
        assert!(fts.is_empty().unwrap());
        // Still writable after clear.
        fts.index(&record("b", "", "more text"), &cancel).await.unwrap();
        assert_eq!(fts.search("text", 10, &cancel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_query_returns_empty() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "anything"), &cancel).await.unwrap();
        assert!(fts.search("", 10, &cancel).await.unwrap().is_empty());
        assert!(fts.search("   ", 10, &cancel).await.unwrap().is_empty());
        assert!(fts.search("anything", 0, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn field_scoped_match() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "release notes", "body text"), &cancel)
            .await
            .unwrap();
        fts.index(&record("b", "unrelated", "release schedule"), &cancel)
            .await
            .unwrap();

        let hits = fts.search("title : release", 10, &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content_id, "a");
    }

    #[tokio::test]
    async fn snippet_has_markers_and_cap() {
        let fts = index();
        let cancel = CancellationToken::new();
        let long_body = format!("{} needle {}", "padding ".repeat(80), "padding ".repeat(80));
        fts.index(&record("a", "", &long_body), &cancel).await.unwrap();

        let hits = fts.search("needle", 10, &cancel).await.unwrap();
        let snippet = hits[0].snippet.as_ref().unwrap();
        assert!(snippet.contains("<mark>needle</mark>"));
        assert!(snippet.chars().count() <= DEFAULT_SNIPPET_LENGTH + SNIPPET_SEPARATOR.len());
    }

    #[tokio::test]
    async fn all_empty_record_is_listed_but_invisible() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", ""), &cancel).await.unwrap();
        assert_eq!(fts.all_ids().unwrap(), vec!["a".to_string()]);
        assert!(fts.search("anything", 10, &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn more_relevant_document_sorts_first() {
        let fts = index();
        let cancel = CancellationToken::new();
        // "z" is saturated with the query term; "a" mentions it once
        // in a long body, so their BM25 ranks differ clearly. Ids are
        // chosen so the id tie-break cannot mask a reversed ordering.
        fts.index(&record("z", "", "needle needle needle"), &cancel)
            .await
            .unwrap();
        let weak = format!("needle {}", "filler words all the way down ".repeat(30));
        fts.index(&record("a", "", &weak), &cancel).await.unwrap();

        let hits = fts.search("needle", 10, &cancel).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content_id, "z");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits[1].score < hits[0].score);
        assert!(hits[1].score > 0.0);
    }

    #[tokio::test]
    async fn deterministic_tie_break_by_content_id() {
        let fts = index();
        let cancel = CancellationToken::new();
        // Identical bodies produce identical BM25 ranks.
        fts.index(&record("b", "", "same words here"), &cancel).await.unwrap();
        fts.index(&record("a", "", "same words here"), &cancel).await.unwrap();

        let hits = fts.search("words", 10, &cancel).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.content_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn bad_match_syntax_is_a_query_error() {
        let fts = index();
        let cancel = CancellationToken::new();
        fts.index(&record("a", "", "text"), &cancel).await.unwrap();
        let err = fts.search("AND AND (", 10, &cancel).await.unwrap_err();
        assert!(matches!(err, LodeError::QuerySyntax { .. }));
    }
}
