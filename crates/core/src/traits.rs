use crate::error::{StoreError, UpsertError};
use crate::models::{Chunk, IndexStats, ResetScope, SearchFilters, SearchMatch};
use async_trait::async_trait;

/// Persistent chunk store with filtered similarity search.
///
/// The index owns embeddings: `upsert` embeds the chunk text itself, so callers
/// only ever hand over text and metadata.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Inserts or replaces one chunk. Either the whole chunk is stored or nothing is.
    async fn upsert(&self, chunk: &Chunk) -> Result<(), UpsertError>;

    /// Matches passing every filter, best first; equal scores keep insertion order.
    /// `top_k = usize::MAX` returns every match.
    async fn search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchMatch>, StoreError>;

    async fn stats(&self) -> Result<IndexStats, StoreError>;

    /// Removes every chunk the scope covers and returns how many were removed.
    async fn reset(&self, scope: &ResetScope) -> Result<usize, StoreError>;

    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError>;
}
