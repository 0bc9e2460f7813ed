pub mod local;
pub mod remote;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalProvider;
pub use remote::RemoteProvider;

use crate::config::RetryPolicy;
use crate::error::{ConfigError, ProviderError};
use crate::prompt::AssembledPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Remote,
    Local,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Remote => write!(f, "remote"),
            ProviderKind::Local => write!(f, "local"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "remote" => Ok(ProviderKind::Remote),
            "local" => Ok(ProviderKind::Local),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Generation capability shared by the remote API and the local runtime.
///
/// Both variants honor the same contract, so everything upstream of the
/// provider is variant-agnostic; the choice is made once, when a session is
/// bound, and never changes afterward.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn generate(&self, prompt: &AssembledPrompt) -> Result<String, ProviderError>;
}

/// Bounded-backoff retry around a single generation call.
///
/// Only transient failures (unreachable backend, timeout) are retried;
/// malformed responses come back immediately. Exhausted retries surface the
/// last `Unavailable` error to the caller.
pub async fn generate_with_retry(
    provider: &dyn GenerationProvider,
    prompt: &AssembledPrompt,
    retry: &RetryPolicy,
) -> Result<String, ProviderError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match provider.generate(prompt).await {
            Ok(text) => return Ok(text),
            Err(error) if error.is_transient() && attempt < retry.max_attempts => {
                tokio::time::sleep(retry.delay_after(attempt)).await;
            }
            Err(error) => return Err(error),
        }
    }
}
