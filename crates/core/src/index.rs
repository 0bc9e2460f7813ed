use serde::{Deserialize, Serialize};

use crate::error::CorpusError;

/// Similarity metric, fixed when the index is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    Cosine,
    InnerProduct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk_id: String,
    document_id: String,
    vector: Vec<f32>,
}

/// Brute-force in-memory nearest-neighbor index.
///
/// Insertion is incremental (no rebuild); entries are scanned linearly on
/// search, which is plenty for a single student's textbooks. The index is
/// serializable so a corpus can be persisted and reloaded with identical
/// search behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimensions: usize,
    metric: Similarity,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(dimensions: usize, metric: Similarity) -> Self {
        Self {
            dimensions,
            metric,
            entries: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn metric(&self) -> Similarity {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(
        &mut self,
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<(), CorpusError> {
        self.check_dimension(vector.len())?;
        self.entries.push(IndexEntry {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            vector,
        });
        Ok(())
    }

    /// Drop every vector belonging to `document_id`; returns how many were
    /// removed. Used by re-ingestion to replace a document's chunks.
    pub fn remove_by_document(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.document_id != document_id);
        before - self.entries.len()
    }

    /// Top-`k` chunk ids by descending score. `k` larger than the index is
    /// clamped, never an error. Ties keep insertion order (stable sort), so
    /// the earlier-inserted chunk wins.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, CorpusError> {
        self.check_dimension(query.len())?;

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, self.score(query, &entry.vector)))
            .collect();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(k.min(self.entries.len()));

        Ok(scored
            .into_iter()
            .map(|(position, score)| (self.entries[position].chunk_id.clone(), score))
            .collect())
    }

    fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        let dot: f32 = query.iter().zip(candidate).map(|(q, c)| q * c).sum();
        match self.metric {
            Similarity::InnerProduct => dot,
            Similarity::Cosine => {
                let query_norm: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
                let candidate_norm: f32 = candidate.iter().map(|v| v * v).sum::<f32>().sqrt();
                if query_norm < f32::EPSILON || candidate_norm < f32::EPSILON {
                    0.0
                } else {
                    dot / (query_norm * candidate_norm)
                }
            }
        }
    }

    fn check_dimension(&self, actual: usize) -> Result<(), CorpusError> {
        if actual != self.dimensions {
            return Err(CorpusError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }
}
