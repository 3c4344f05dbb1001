//! # lode-embeddings
//!
//! Embedding providers (Ollama, OpenAI, and an offline hashed
//! fallback) plus the SQLite-backed embeddings cache shared by the
//! vector indexes of one process.

pub mod cache;
pub mod providers;

pub use cache::{CacheMode, EmbeddingsCache};
pub use providers::create_provider;
