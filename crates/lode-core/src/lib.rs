//! # lode-core
//!
//! Foundation crate for the Lode knowledge store.
//! Defines all types, traits, errors, config, and constants.
//! Every other crate in the workspace depends on this.

pub mod cancel;
pub mod config;
pub mod constants;
pub mod errors;
pub mod ids;
pub mod models;
pub mod traits;
pub mod vector;

// Re-export the most commonly used types at the crate root.
pub use cancel::{Cancellable, CancellationToken};
pub use config::{NodeAccess, NodeConfig, RootConfig};
pub use errors::{LodeError, LodeResult};
pub use models::{
    ContentRecord, IndexHit, IndexKind, Operation, OperationKind, OperationStep,
    SearchIndexDescriptor, StepStatus, Tag,
};
pub use traits::{IEmbeddingProvider, ISearchIndex};
