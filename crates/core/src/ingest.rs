use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunking::{split_text, ChunkDraft, ChunkingConfig};
use crate::config::RetryPolicy;
use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{Chunk, CorpusUpdateSummary, Document};

/// Drives chunking, embedding, and indexing for one document at a time.
///
/// Per-chunk embedding failures are retried with bounded backoff; if a chunk
/// still cannot be embedded, the whole document fails and nothing is written
/// to the corpus. Re-ingesting a document id replaces its prior chunks.
pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Self {
        Self {
            embedder,
            chunking,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn ingest(
        &self,
        document: &Document,
        corpus: &Corpus,
    ) -> Result<CorpusUpdateSummary, IngestError> {
        corpus
            .check_model(self.embedder.model_id())
            .map_err(|source| IngestError::CorpusRejected {
                document_id: document.document_id.clone(),
                source,
            })?;

        // Stage every (chunk, vector) pair before touching the corpus so a
        // late embedding failure never leaves the document half-indexed.
        let mut staged = Vec::new();
        for draft in split_text(&document.text, self.chunking) {
            let vector = self.embed_with_retry(&draft).await?;
            let chunk = Chunk {
                chunk_id: make_chunk_id(&document.document_id, draft.index, &draft.text),
                document_id: document.document_id.clone(),
                chunk_index: draft.index,
                text: draft.text,
                start_offset: draft.start,
                end_offset: draft.end,
            };
            staged.push((chunk, vector));
        }

        corpus
            .upsert_document(&document.document_id, staged)
            .map_err(|source| IngestError::CorpusRejected {
                document_id: document.document_id.clone(),
                source,
            })
    }

    async fn embed_with_retry(&self, draft: &ChunkDraft) -> Result<Vec<f32>, IngestError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.embedder.embed(&draft.text).await {
                Ok(vector) => return Ok(vector),
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts => {
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                }
                Err(error) => {
                    return Err(IngestError::EmbeddingExhausted {
                        chunk_index: draft.index,
                        attempts: attempt,
                        source: error,
                    })
                }
            }
        }
    }
}

/// Stable chunk identity: same document, ordinal, and text always hash to
/// the same id, which is what makes re-ingestion an upsert.
fn make_chunk_id(document_id: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively collect plain-text study files, sorted for determinism.
pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));
        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Turn a file on disk into an uploadable [`Document`]. The document id is
/// derived from the path, so re-reading the same file re-ingests the same
/// document rather than duplicating it.
pub fn read_document_from_path(path: &Path) -> Result<Document, IngestError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let text = fs::read_to_string(path)?;

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let document_id = format!("{:x}", hasher.finalize());

    Ok(Document::new(document_id, filename, text))
}
