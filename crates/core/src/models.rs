use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A source document as handed over by the upload collaborator: plain text
/// plus identity. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        document_id: impl Into<String>,
        filename: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            filename: filename.into(),
            text: text.into(),
            uploaded_at: Utc::now(),
        }
    }
}

/// The atomic unit of retrieval: a bounded span of document text.
///
/// `start_offset`/`end_offset` are byte offsets into the source document, so
/// `document.text[start_offset..end_offset] == text`. The embedding vector
/// lives in the corpus index, keyed by `chunk_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// One retrieval hit. Results are ordered most relevant first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub type RetrievalResult = Vec<ScoredChunk>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation entry. Assistant turns record the chunk ids that
/// grounded the reply, for citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub context_chunk_ids: Vec<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            context_chunk_ids: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, context_chunk_ids: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            context_chunk_ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ConfigError::UnknownDifficulty(other.to_string())),
        }
    }
}

/// What the student is asking the engine to do with the retrieved material.
/// There is no default; callers must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskDirective {
    Explain,
    Summarize,
    GenerateQuestions { difficulty: Difficulty },
}

/// What one `ingest` call did to the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusUpdateSummary {
    pub document_id: String,
    pub chunks_indexed: usize,
    pub chunks_replaced: usize,
    pub corpus_size: usize,
}
