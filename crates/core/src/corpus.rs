use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CorpusError;
use crate::index::{Similarity, VectorIndex};
use crate::models::{Chunk, CorpusUpdateSummary, RetrievalResult, ScoredChunk};

/// A named, queryable collection of chunks backed by one vector index.
///
/// Shared across sessions behind an `Arc`; interior state follows a
/// single-writer / multiple-reader discipline, so concurrent retrieval
/// observes either the pre-insert or post-insert corpus, never a torn one.
/// The embedding model tag is fixed at creation and checked on every
/// ingest and query.
pub struct Corpus {
    id: String,
    name: String,
    embedding_model: String,
    dimensions: usize,
    metric: Similarity,
    inner: RwLock<CorpusInner>,
}

#[derive(Serialize, Deserialize)]
struct CorpusInner {
    index: VectorIndex,
    chunks: HashMap<String, Chunk>,
}

/// Durable form of a corpus: the serialized index plus the chunk metadata
/// table, keyed by corpus id. Round-trips to identical search results.
#[derive(Serialize, Deserialize)]
struct CorpusSnapshot {
    id: String,
    name: String,
    embedding_model: String,
    dimensions: usize,
    metric: Similarity,
    index: VectorIndex,
    chunks: HashMap<String, Chunk>,
}

impl Corpus {
    pub fn new(
        name: impl Into<String>,
        embedding_model: impl Into<String>,
        dimensions: usize,
        metric: Similarity,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            embedding_model: embedding_model.into(),
            dimensions,
            metric,
            inner: RwLock::new(CorpusInner {
                index: VectorIndex::new(dimensions, metric),
                chunks: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn size(&self) -> usize {
        self.inner.read().unwrap().index.len()
    }

    /// Reject queries or ingests coming from a different embedding model
    /// than the one this corpus was indexed with.
    pub fn check_model(&self, model_id: &str) -> Result<(), CorpusError> {
        if model_id != self.embedding_model {
            return Err(CorpusError::EmbeddingModelMismatch {
                corpus_model: self.embedding_model.clone(),
                query_model: model_id.to_string(),
            });
        }
        Ok(())
    }

    /// Replace `document_id`'s chunks with `staged` in one write section.
    ///
    /// Every vector is validated before anything is removed, so a bad batch
    /// leaves the corpus untouched (all-or-nothing per document).
    pub fn upsert_document(
        &self,
        document_id: &str,
        staged: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<CorpusUpdateSummary, CorpusError> {
        for (_, vector) in &staged {
            if vector.len() != self.dimensions {
                return Err(CorpusError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }

        let mut inner = self.inner.write().unwrap();
        let chunks_replaced = inner.index.remove_by_document(document_id);
        inner
            .chunks
            .retain(|_, chunk| chunk.document_id != document_id);

        let chunks_indexed = staged.len();
        for (chunk, vector) in staged {
            inner
                .index
                .insert(chunk.chunk_id.clone(), chunk.document_id.clone(), vector)?;
            inner.chunks.insert(chunk.chunk_id.clone(), chunk);
        }

        Ok(CorpusUpdateSummary {
            document_id: document_id.to_string(),
            chunks_indexed,
            chunks_replaced,
            corpus_size: inner.index.len(),
        })
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult, CorpusError> {
        let inner = self.inner.read().unwrap();
        let hits = inner.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                inner
                    .chunks
                    .get(&chunk_id)
                    .map(|chunk| ScoredChunk {
                        chunk: chunk.clone(),
                        score,
                    })
            })
            .collect())
    }

    /// Explicit clear-and-rebuild hook; the only way a corpus ever shrinks.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.index = VectorIndex::new(self.dimensions, self.metric);
        inner.chunks.clear();
    }

    /// Persist to `path`, writing a sibling temp file first so a crash
    /// mid-save never corrupts an existing snapshot.
    pub fn save_to(&self, path: &Path) -> Result<(), CorpusError> {
        let snapshot = {
            let inner = self.inner.read().unwrap();
            CorpusSnapshot {
                id: self.id.clone(),
                name: self.name.clone(),
                embedding_model: self.embedding_model.clone(),
                dimensions: self.dimensions,
                metric: inner.index.metric(),
                index: inner.index.clone(),
                chunks: inner.chunks.clone(),
            }
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self, CorpusError> {
        let bytes = fs::read(path)?;
        let snapshot: CorpusSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Self {
            id: snapshot.id,
            name: snapshot.name,
            embedding_model: snapshot.embedding_model,
            dimensions: snapshot.dimensions,
            metric: snapshot.metric,
            inner: RwLock::new(CorpusInner {
                index: snapshot.index,
                chunks: snapshot.chunks,
            }),
        })
    }
}
