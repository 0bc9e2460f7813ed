use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::EmbedError;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// External embedding capability. Deterministic for identical text and model
/// version; dimension is fixed per model. The `model_id` is stamped onto
/// every corpus at creation and re-checked on every query, so vectors from
/// different models never mix in one index.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Self-contained character-trigram hashing embedder.
///
/// No model runtime required, deterministic across runs, and cheap enough
/// for tests and offline use. Vectors are L2-normalized so cosine and
/// inner-product agree.
#[derive(Debug, Clone)]
pub struct HashedNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashedNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("hashed-trigram-{dimensions}"),
        }
    }
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

// FNV-1a, the same bucketing scheme used for stable chunk ids elsewhere.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashedNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for trigram in chars.windows(3) {
            let mut buffer = [0u8; 12];
            let mut written = 0;
            for ch in trigram {
                written += ch.encode_utf8(&mut buffer[written..]).len();
            }
            let bucket = (fnv1a(&buffer[..written]) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

/// Embedder backed by a local embeddings endpoint (Ollama wire shape:
/// POST `{base}/api/embeddings` with `{model, prompt}`).
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            dimensions,
            timeout,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(self.timeout)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() || error.is_connect() {
                    EmbedError::Unavailable(error.to_string())
                } else {
                    EmbedError::Response(error.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() {
                return Err(EmbedError::Unavailable(status.to_string()));
            }
            return Err(EmbedError::Response(status.to_string()));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|error| EmbedError::Response(error.to_string()))?;

        if parsed.embedding.len() != self.dimensions {
            return Err(EmbedError::Response(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                parsed.embedding.len()
            )));
        }

        Ok(parsed.embedding)
    }
}
