//! Query modules: free functions over a borrowed connection.

pub mod content_crud;
pub mod operation_ops;
