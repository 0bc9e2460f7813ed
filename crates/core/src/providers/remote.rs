use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{GenerationProvider, ProviderKind};
use crate::error::ProviderError;
use crate::prompt::AssembledPrompt;

const PROVIDER_NAME: &str = "remote";

/// Hosted LLM API spoken over authenticated HTTPS (Gemini-style
/// `generateContent` wire shape). The credential is injected by the caller;
/// it is never read from the environment here and never logged.
pub struct RemoteProvider {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
    max_output_tokens: u32,
    client: Client,
}

impl RemoteProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
            max_output_tokens: 512,
            client: Client::new(),
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() || error.is_connect() {
        ProviderError::Unavailable {
            provider: PROVIDER_NAME.to_string(),
            details: error.to_string(),
        }
    } else {
        ProviderError::Response {
            provider: PROVIDER_NAME.to_string(),
            details: error.to_string(),
        }
    }
}

#[async_trait]
impl GenerationProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    async fn generate(&self, prompt: &AssembledPrompt) -> Result<String, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt.text }] }],
                "generationConfig": {
                    "temperature": 0.7,
                    "maxOutputTokens": self.max_output_tokens,
                },
            }))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            // 5xx and throttling are worth another attempt; auth and bad
            // requests are not.
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(ProviderError::Unavailable {
                    provider: PROVIDER_NAME.to_string(),
                    details: status.to_string(),
                });
            }
            return Err(ProviderError::Response {
                provider: PROVIDER_NAME.to_string(),
                details: status.to_string(),
            });
        }

        let parsed: Value = response.json().await.map_err(classify_transport_error)?;
        let text = parsed
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::Response {
                provider: PROVIDER_NAME.to_string(),
                details: "response contained no generated text".to_string(),
            });
        }

        Ok(text.to_string())
    }
}
