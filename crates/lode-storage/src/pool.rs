//! Connections for one content database.
//!
//! All mutations go through a single mutex-guarded writer; queries are
//! served round-robin from a small set of read-only connections, which
//! WAL keeps from ever waiting on the writer. An in-memory database
//! has no shared file for readers to attach to, so a pool opened in
//! memory keeps no readers and routes queries through the writer.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use lode_core::LodeResult;

use crate::to_storage_err;

/// Read connections kept per file-backed store.
const READ_CONNECTIONS: usize = 4;

/// Connection set for one content database.
pub struct StorePool {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl StorePool {
    /// Open the pool for a database file, creating the file if absent.
    pub fn open(path: &Path) -> LodeResult<Self> {
        let writer = Connection::open(path)
            .map_err(|e| to_storage_err(format!("open {}: {e}", path.display())))?;
        writer
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;",
            )
            .map_err(|e| to_storage_err(e.to_string()))?;

        // Opening the writer created the file, so the read-only opens
        // below cannot race its creation.
        let mut readers = Vec::with_capacity(READ_CONNECTIONS);
        for _ in 0..READ_CONNECTIONS {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| to_storage_err(e.to_string()))?;
            reader
                .execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
                .map_err(|e| to_storage_err(e.to_string()))?;
            readers.push(Mutex::new(reader));
        }

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Open an in-memory pool (for testing): writer only, reads
    /// routed through it.
    pub fn open_in_memory() -> LodeResult<Self> {
        let writer = Connection::open_in_memory().map_err(|e| to_storage_err(e.to_string()))?;
        writer
            .execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(|e| to_storage_err(e.to_string()))?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Run a mutation on the exclusive writer.
    pub fn write<F, T>(&self, f: F) -> LodeResult<T>
    where
        F: FnOnce(&Connection) -> LodeResult<T>,
    {
        let guard = self
            .writer
            .lock()
            .map_err(|e| to_storage_err(format!("writer lock poisoned: {e}")))?;
        f(&guard)
    }

    /// Run a query on the next read connection, or on the writer when
    /// the database is in-memory.
    pub fn read<F, T>(&self, f: F) -> LodeResult<T>
    where
        F: FnOnce(&Connection) -> LodeResult<T>,
    {
        if self.readers.is_empty() {
            return self.write(f);
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let guard = self.readers[idx]
            .lock()
            .map_err(|e| to_storage_err(format!("reader lock poisoned: {e}")))?;
        f(&guard)
    }
}

impl Drop for StorePool {
    /// Merge the WAL into the main file so committed writes survive
    /// close-and-reopen even if the sidecar files are lost.
    fn drop(&mut self) {
        if let Ok(conn) = self.writer.lock() {
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                debug!(error = %e, "WAL checkpoint on drop failed");
            }
        }
    }
}
