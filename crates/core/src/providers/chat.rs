use super::{endpoint_url, non_empty};
use crate::answer::{AnswerGenerator, SYSTEM_PROMPT};
use crate::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl ChatCompletionClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, CapabilityError> {
        Ok(Self {
            endpoint: endpoint_url(base_url, "chat/completions")?,
            model: model.into(),
            api_key: None,
            temperature: 0.5,
            max_tokens: 500,
            client: Client::new(),
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = non_empty(api_key);
        self
    }
}

#[async_trait]
impl AnswerGenerator for ChatCompletionClient {
    async fn complete(&self, prompt: &str, context_budget: usize) -> Result<String, CapabilityError> {
        let prompt = truncate_chars(prompt, context_budget);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CapabilityError::BadResponse {
                backend: "chat".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &Value) -> Result<String, CapabilityError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CapabilityError::BadResponse {
            backend: "chat".to_string(),
            details: "response has no choices[0].message.content".to_string(),
        })
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
