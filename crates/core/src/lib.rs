pub mod chunking;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod retrieve;
pub mod session;

pub use chunking::{split_text, ChunkDraft, ChunkingConfig};
pub use config::{EngineConfig, RetryPolicy};
pub use corpus::Corpus;
pub use embeddings::{
    Embedder, HashedNgramEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, CorpusError, EmbedError, IngestError, ProviderError, RetrieveError, SessionError,
};
pub use index::{Similarity, VectorIndex};
pub use ingest::{discover_text_files, read_document_from_path, IngestionPipeline};
pub use models::{
    Chunk, CorpusUpdateSummary, Difficulty, Document, RetrievalResult, Role, ScoredChunk,
    TaskDirective, Turn,
};
pub use prompt::{AssembledPrompt, PromptAssembler};
pub use providers::{
    generate_with_retry, GenerationProvider, LocalProvider, ProviderKind, RemoteProvider,
};
pub use retrieve::Retriever;
pub use session::{SessionManager, SessionState, TurnOutcome};
