//! Ollama embedding client: POST `{base}/api/embeddings`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use lode_core::{IEmbeddingProvider, LodeError, LodeResult};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// Client for a local or remote Ollama server.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaProvider {
    pub fn new(base_url: Option<&str>, model: &str, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            dimensions,
        }
    }
}

#[async_trait]
impl IEmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> LodeResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        debug!(%url, model = %self.model, "requesting embedding");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LodeError::transport(format!("ollama request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LodeError::transport(format!(
                "ollama returned {status}: {detail}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| LodeError::transport(format!("ollama response malformed: {e}")))?;
        if parsed.embedding.is_empty() {
            return Err(LodeError::transport("ollama returned an empty embedding"));
        }
        Ok(parsed.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_id(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
