//! OpenAI-compatible embedding client: POST `{base}/v1/embeddings`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use lode_core::{IEmbeddingProvider, LodeError, LodeResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for the OpenAI embeddings endpoint (or any server speaking
/// the same shape).
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAiProvider {
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<&str>,
        model: &str,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
            dimensions,
        }
    }
}

#[async_trait]
impl IEmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> LodeResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        debug!(%url, model = %self.model, "requesting embedding");
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LodeError::transport(format!("openai request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LodeError::transport(format!(
                "openai returned {status}: {detail}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| LodeError::transport(format!("openai response malformed: {e}")))?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LodeError::transport("openai returned no embedding data"))?;
        if datum.embedding.is_empty() {
            return Err(LodeError::transport("openai returned an empty embedding"));
        }
        Ok(datum.embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
