//! OpenAI-compatible embedding provider
//!
//! Talks to any `/embeddings` endpoint speaking the OpenAI request shape
//! (OpenAI, Azure OpenAI, Ollama, llama.cpp server). Credentials come from
//! the environment only; the engine itself reads no environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use kdd_core::embed::{EmbedError, Result};
use kdd_core::EmbeddingModel;

/// Environment variable holding the API key. Optional for local servers.
pub const API_KEY_ENV: &str = "KDD_EMBED_API_KEY";

/// Environment variable holding the endpoint base URL.
pub const BASE_URL_ENV: &str = "KDD_EMBED_BASE_URL";

/// Per-call timeout; on expiry the document degrades to L1.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Blocking HTTP client for an OpenAI-compatible embeddings endpoint.
pub struct OpenAiCompatModel {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
    dimensions: usize,
}

impl OpenAiCompatModel {
    /// Build from `KDD_EMBED_BASE_URL` and `KDD_EMBED_API_KEY`.
    pub fn from_env(model_id: &str, dimensions: usize) -> Result<Self> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| EmbedError::Unavailable(format!("{BASE_URL_ENV} is not set")))?;
        let api_key = std::env::var(API_KEY_ENV).ok();
        Self::new(&base_url, api_key, model_id, dimensions)
    }

    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model_id: &str,
        dimensions: usize,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model_id: model_id.to_string(),
            dimensions,
        })
    }
}

impl EmbeddingModel for OpenAiCompatModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        debug!(model = %self.model_id, chars = text.len(), "embedding request");

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model_id,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| EmbedError::Generation(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedError::Generation(format!(
                "endpoint returned {status}: {body}"
            )));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbedError::Generation(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::Generation("empty embedding response".to_string()))?;

        if vector.len() != self.dimensions {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = EmbeddingRequest {
            model: "nomic-embed-text-v1.5",
            input: "hola",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "nomic-embed-text-v1.5");
        assert_eq!(json["input"], "hola");
    }

    #[test]
    fn test_missing_base_url_is_unavailable() {
        // The variable is absent in the test environment.
        std::env::remove_var(BASE_URL_ENV);
        let result = OpenAiCompatModel::from_env("m", 8);
        assert!(matches!(result, Err(EmbedError::Unavailable(_))));
    }
}
