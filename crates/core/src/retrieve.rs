use std::sync::Arc;

use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::error::RetrieveError;
use crate::models::RetrievalResult;

/// Embeds a query with the corpus's own embedding model and asks the index
/// for the top-k nearest chunks.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Embedding-space consistency is a hard invariant: the corpus records
    /// which model indexed it, and a query from any other model is rejected
    /// before touching the index.
    pub async fn retrieve(
        &self,
        query_text: &str,
        corpus: &Corpus,
        k: usize,
    ) -> Result<RetrievalResult, RetrieveError> {
        corpus.check_model(self.embedder.model_id())?;
        let query_vector = self.embedder.embed(query_text).await?;
        Ok(corpus.search(&query_vector, k)?)
    }
}
