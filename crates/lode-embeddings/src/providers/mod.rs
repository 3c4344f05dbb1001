//! Embedding providers: HTTP-backed model clients plus an offline
//! fallback.

pub mod hashed;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use lode_core::config::EmbeddingsConfig;
use lode_core::{IEmbeddingProvider, LodeError, LodeResult};

pub use hashed::HashedProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Build a provider from a vector index's embeddings config.
/// `dimensions` is the owning index's declared dimensionality.
pub fn create_provider(
    config: &EmbeddingsConfig,
    dimensions: usize,
) -> LodeResult<Arc<dyn IEmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            config.base_url.as_deref(),
            &config.model,
            dimensions,
        ))),
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            config.base_url.as_deref(),
            config.api_key.as_deref(),
            &config.model,
            dimensions,
        ))),
        "hashed" => Ok(Arc::new(HashedProvider::new(&config.model, dimensions))),
        other => Err(LodeError::invalid_config(format!(
            "unknown embeddings provider '{other}'"
        ))),
    }
}
