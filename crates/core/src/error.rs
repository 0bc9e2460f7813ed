use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },

    #[error("retrieval k must be greater than zero")]
    ZeroRetrievalK,

    #[error("embedding dimension must be greater than zero")]
    ZeroDimensions,

    #[error("unknown provider: {0} (expected `remote` or `local`)")]
    UnknownProvider(String),

    #[error("unknown difficulty: {0} (expected `easy`, `medium`, or `hard`)")]
    UnknownDifficulty(String),

    #[error("remote provider requires a credential")]
    MissingCredential,
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("vector dimension {actual} does not match corpus dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corpus was indexed with embedding model `{corpus_model}` but the query used `{query_model}`")]
    EmbeddingModelMismatch {
        corpus_model: String,
        query_model: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid embedding response: {0}")]
    Response(String),
}

impl EmbedError {
    /// Transient failures are worth retrying; malformed responses are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} provider unavailable: {details}")]
    Unavailable { provider: String, details: String },

    #[error("invalid response from {provider} provider: {details}")]
    Response { provider: String, details: String },
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable { .. })
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("embedding failed for chunk {chunk_index} after {attempts} attempt(s): {source}")]
    EmbeddingExhausted {
        chunk_index: usize,
        attempts: u32,
        source: EmbedError,
    },

    #[error("corpus rejected document {document_id}: {source}")]
    CorpusRejected {
        document_id: String,
        source: CorpusError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("query embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id} is {state}: cannot {operation}")]
    InvalidState {
        id: String,
        state: crate::session::SessionState,
        operation: &'static str,
    },

    #[error("unknown session: {0}")]
    Unknown(String),

    #[error("session already exists: {0}")]
    Duplicate(String),

    #[error("retrieval stage failed: {0}")]
    Retrieval(#[from] RetrieveError),

    #[error("generation stage failed: {0}")]
    Generation(#[from] ProviderError),

    #[error("{stage} stage exceeded its {limit_secs}s deadline")]
    StageTimeout { stage: &'static str, limit_secs: u64 },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
