use super::{endpoint_url, non_empty};
use crate::embeddings::Embedder;
use crate::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// OpenAI-compatible `/embeddings` client (also served by Ollama under `/v1`).
pub struct HttpEmbedder {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            endpoint: endpoint_url(base_url, "embeddings")?,
            model: model.into(),
            api_key: None,
            dimensions,
            client: Client::new(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = non_empty(api_key);
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "model": self.model, "input": text }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CapabilityError::BadResponse {
                backend: "embeddings".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        parse_embedding(&payload, self.dimensions)
    }
}

fn parse_embedding(payload: &Value, dimensions: usize) -> Result<Vec<f32>, CapabilityError> {
    let vector = payload
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| CapabilityError::BadResponse {
            backend: "embeddings".to_string(),
            details: "response has no data[0].embedding".to_string(),
        })?
        .iter()
        .map(|value| value.as_f64().map(|value| value as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| CapabilityError::BadResponse {
            backend: "embeddings".to_string(),
            details: "embedding contains non-numeric values".to_string(),
        })?;

    if vector.len() != dimensions {
        return Err(CapabilityError::BadResponse {
            backend: "embeddings".to_string(),
            details: format!("expected {dimensions} dimensions, got {}", vector.len()),
        });
    }
    Ok(vector)
}
