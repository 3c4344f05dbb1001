//! # lode-storage
//!
//! The per-node content database: content records, the operation
//! ledger, and the step table the indexing pipeline drives.

pub mod migrations;
pub mod pool;
pub mod queries;
pub mod store;

pub use store::ContentStore;

use lode_core::LodeError;

/// Fold a storage-layer failure into the shared error surface.
pub(crate) fn to_storage_err(message: impl Into<String>) -> LodeError {
    LodeError::Sqlite {
        message: message.into(),
    }
}
