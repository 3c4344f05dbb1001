//! Data model: content records, the operation ledger, index descriptors,
//! and search request/response shapes.

pub mod content;
pub mod descriptor;
pub mod operation;
pub mod search;

pub use content::{ContentRecord, ContentSummary, Tag, UpsertOutcome, UpsertRequest};
pub use descriptor::{IndexKind, SearchIndexDescriptor};
pub use operation::{
    index_delete_step, index_step, Operation, OperationKind, OperationStep, StepAction,
    StepStatus, STEP_DELETE, STEP_UPSERT,
};
pub use search::{
    IndexHit, NodeHit, SearchMetadata, SearchRequest, SearchResponse, SearchResult,
    ValidationReport,
};
