use async_trait::async_trait;
use keepsake_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::providers::ollama::DEFAULT_OLLAMA_URL;

/// Turns text into a fixed-length vector for similarity search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding model name, recorded for diagnostics.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Embeddings from a local Ollama server via `POST /api/embed`.
#[derive(Clone)]
pub struct OllamaEmbeddings {
    client: Client,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
}

impl OllamaEmbeddings {
    pub fn new(base_url: Option<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions: None,
        }
    }

    /// Reject vectors whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| Error::Agent(format!("embedding request failed: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "embedding request returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = res
            .json()
            .await
            .map_err(|e| Error::Agent(format!("failed to parse embedding response: {e}")))?;

        let vector = parsed
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Agent("embedding response contained no vectors".into()))?;

        if let Some(expected) = self.dimensions
            && vector.len() != expected
        {
            return Err(Error::Agent(format!(
                "embedding model '{}' returned {} dimensions, expected {expected}",
                self.model,
                vector.len()
            )));
        }

        Ok(vector)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
