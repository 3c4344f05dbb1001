//! SQLite-backed embeddings cache.
//!
//! Keyed by `(provider, model, content_hash)` where the hash is blake3
//! over the exact input string. Values are raw (unnormalized) vectors.
//! Every failure here is non-fatal: callers fall through to the
//! generator on read errors and ignore write errors.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, warn};

use lode_core::vector::{from_blob, to_blob};

/// What the cache is allowed to do for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Off,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl CacheMode {
    pub fn from_flags(allow_read: bool, allow_write: bool) -> Self {
        match (allow_read, allow_write) {
            (true, true) => Self::ReadWrite,
            (true, false) => Self::ReadOnly,
            (false, true) => Self::WriteOnly,
            (false, false) => Self::Off,
        }
    }

    fn reads(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    fn writes(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Process-wide embeddings cache, shared by reference among the vector
/// indexes of one process.
pub struct EmbeddingsCache {
    conn: Option<Mutex<Connection>>,
    mode: CacheMode,
}

impl EmbeddingsCache {
    /// Open the cache file. Open failures disable the cache rather
    /// than failing the caller.
    pub fn open(path: &Path, mode: CacheMode) -> Self {
        if mode == CacheMode::Off {
            return Self { conn: None, mode };
        }
        match Connection::open(path) {
            Ok(conn) => {
                let schema = conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS embedding_cache (
                        provider     TEXT NOT NULL,
                        model        TEXT NOT NULL,
                        content_hash TEXT NOT NULL,
                        embedding    BLOB NOT NULL,
                        dimensions   INTEGER NOT NULL,
                        created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                        PRIMARY KEY (provider, model, content_hash)
                    );
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;",
                );
                if let Err(e) = schema {
                    warn!(path = %path.display(), error = %e, "embeddings cache schema failed; cache disabled");
                    return Self { conn: None, mode };
                }
                debug!(path = %path.display(), ?mode, "embeddings cache opened");
                Self {
                    conn: Some(Mutex::new(conn)),
                    mode,
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "embeddings cache open failed; cache disabled");
                Self { conn: None, mode }
            }
        }
    }

    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self {
            conn: None,
            mode: CacheMode::Off,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Look up a raw vector for the exact input text.
    pub fn get(&self, provider: &str, model: &str, text: &str) -> Option<Vec<f32>> {
        if !self.mode.reads() {
            return None;
        }
        let conn = self.conn.as_ref()?;
        let hash = content_hash(text);
        let guard = match conn.lock() {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "embeddings cache lock poisoned on read");
                return None;
            }
        };
        let blob: Result<Vec<u8>, _> = guard.query_row(
            "SELECT embedding FROM embedding_cache
             WHERE provider = ?1 AND model = ?2 AND content_hash = ?3",
            params![provider, model, hash],
            |row| row.get(0),
        );
        match blob {
            Ok(bytes) => match from_blob(&bytes) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!(%hash, error = %e, "corrupt cache entry ignored");
                    None
                }
            },
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                warn!(error = %e, "embeddings cache read failed");
                None
            }
        }
    }

    /// Store a raw vector. Failures are logged and swallowed.
    pub fn put(&self, provider: &str, model: &str, text: &str, vector: &[f32]) {
        if !self.mode.writes() {
            return;
        }
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let hash = content_hash(text);
        let guard = match conn.lock() {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "embeddings cache lock poisoned on write");
                return;
            }
        };
        let result = guard.execute(
            "INSERT OR REPLACE INTO embedding_cache (provider, model, content_hash, embedding, dimensions)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![provider, model, hash, to_blob(vector), vector.len() as i64],
        );
        if let Err(e) = result {
            warn!(error = %e, "embeddings cache write failed");
        }
    }

    /// Number of cached embeddings.
    pub fn len(&self) -> usize {
        let Some(conn) = self.conn.as_ref() else {
            return 0;
        };
        let Ok(guard) = conn.lock() else { return 0 };
        guard
            .query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EmbeddingsCache {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_ref() {
            if let Ok(guard) = conn.lock() {
                let _ = guard.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
            }
        }
    }
}

/// Hash over the exact input string.
fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
