use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GenerationProvider, ProviderKind};
use crate::error::ProviderError;
use crate::prompt::AssembledPrompt;

const PROVIDER_NAME: &str = "local";

/// Locally hosted model runtime (Ollama wire shape). No network dependency
/// beyond loopback and no credential.
pub struct LocalProvider {
    base_url: String,
    model: String,
    timeout: Duration,
    num_predict: u32,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl LocalProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            timeout,
            // bounded completion length keeps CPU inference responsive
            num_predict: 512,
            client: Client::new(),
        }
    }

    /// Probe the runtime before binding a session to it.
    pub async fn ensure_ready(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|error| ProviderError::Unavailable {
                provider: PROVIDER_NAME.to_string(),
                details: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Unavailable {
                provider: PROVIDER_NAME.to_string(),
                details: format!("runtime answered {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn generate(&self, prompt: &AssembledPrompt) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": prompt.text,
                "stream": false,
                "options": {
                    "temperature": 0.7,
                    "top_p": 0.9,
                    "repeat_penalty": 1.1,
                    "num_predict": self.num_predict,
                },
            }))
            .send()
            .await
            .map_err(|error| {
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
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() {
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

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|error| ProviderError::Response {
                    provider: PROVIDER_NAME.to_string(),
                    details: error.to_string(),
                })?;

        if parsed.response.trim().is_empty() {
            return Err(ProviderError::Response {
                provider: PROVIDER_NAME.to_string(),
                details: "runtime returned an empty completion".to_string(),
            });
        }

        Ok(parsed.response)
    }
}
