use std::time::Duration;

use serde::Deserialize;

use crate::chunking::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::providers::ProviderKind;

/// Engine-wide settings supplied by the configuration collaborator.
///
/// Defaults mirror a CPU-friendly study setup: small chunks, shallow
/// retrieval, a short memory window, and a generous deadline for local
/// model inference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub provider: ProviderKind,
    pub credential: Option<String>,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub max_context_tokens: usize,
    pub history_window: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            credential: None,
            embedding_model: format!("hashed-trigram-{DEFAULT_EMBEDDING_DIMENSIONS}"),
            chunk_size: 800,
            chunk_overlap: 150,
            retrieval_k: 3,
            max_context_tokens: 1024,
            history_window: 8,
            request_timeout_secs: 300,
            max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Fatal at construction: an engine is never built from a bad config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval_k == 0 {
            return Err(ConfigError::ZeroRetrievalK);
        }
        if self.provider == ProviderKind::Remote && self.credential.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        self.chunking().map(|_| ())
    }

    pub fn chunking(&self) -> Result<ChunkingConfig, ConfigError> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bounded exponential backoff shared by the embedding and generation
/// retry loops.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (1-based): doubles each time.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn remote_without_credential_is_rejected() {
        let config = EngineConfig {
            provider: ProviderKind::Remote,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential)
        ));
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let config = EngineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }
}
