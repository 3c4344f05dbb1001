//! Hashed term-frequency fallback provider.
//!
//! Generates fixed-dimension vectors by hashing terms into buckets and
//! weighting by term frequency. No network, deterministic — suitable
//! for air-gapped setups and tests. Not as semantically rich as a
//! neural model, but always available.

use std::collections::HashMap;

use async_trait::async_trait;

use lode_core::{IEmbeddingProvider, LodeResult};

/// Offline embedding provider over FNV-1a term buckets.
pub struct HashedProvider {
    model: String,
    dimensions: usize,
}

impl HashedProvider {
    pub fn new(model: &str, dimensions: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions,
        }
    }

    /// Hash a term into a bucket index using FNV-1a.
    fn hash_term(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h as usize) % dims
    }

    /// Tokenize text into lowercase alphanumeric terms.
    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }

    fn term_vector(&self, text: &str) -> Vec<f32> {
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            // A lone non-zero component keeps the vector normalizable.
            let mut v = vec![0.0; self.dimensions];
            v[0] = 1.0;
            return v;
        }

        let mut tf: HashMap<String, f32> = HashMap::new();
        for tok in &tokens {
            *tf.entry(tok.clone()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        let mut v = vec![0.0f32; self.dimensions];
        for (term, count) in &tf {
            let freq = count / total;
            // Longer terms carry more signal than near-stopwords.
            let idf = 1.0 + (term.len() as f32).ln();
            let bucket = Self::hash_term(term, self.dimensions);
            v[bucket] += freq * idf;
        }
        v
    }
}

#[async_trait]
impl IEmbeddingProvider for HashedProvider {
    async fn embed(&self, text: &str) -> LodeResult<Vec<f32>> {
        Ok(self.term_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_id(&self) -> &str {
        "hashed"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_for_identical_text() {
        let provider = HashedProvider::new("fnv-bucket-16", 16);
        let a = provider.embed("kubernetes and docker").await.unwrap();
        let b = provider.embed("kubernetes and docker").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn shared_terms_raise_similarity() {
        let provider = HashedProvider::new("fnv-bucket-64", 64);
        let a = provider.embed("rust async runtime").await.unwrap();
        let b = provider.embed("rust async executor").await.unwrap();
        let c = provider.embed("gardening tips tulips").await.unwrap();

        let sim = |x: &[f32], y: &[f32]| {
            let nx = lode_core::vector::normalize(x).unwrap();
            let ny = lode_core::vector::normalize(y).unwrap();
            lode_core::vector::dot(&nx, &ny).unwrap()
        };
        assert!(sim(&a, &b) > sim(&a, &c));
    }

    #[tokio::test]
    async fn empty_text_is_still_normalizable() {
        let provider = HashedProvider::new("fnv-bucket-8", 8);
        let v = provider.embed("").await.unwrap();
        assert!(lode_core::vector::normalize(&v).is_ok());
    }
}
