//! Embedded vector index on top of redb.
//!
//! # Tables
//!
//! - `chunks`: chunk id -> JSON record (text, metadata, insertion sequence)
//! - `vectors`: chunk id -> embedding as little-endian `f32` bytes
//! - `meta`: `next_seq` and `dimensions`

use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::{db_error, CapabilityError, StoreError, UpsertError};
use crate::models::{Chunk, ChunkMetadata, IndexStats, ResetScope, SearchFilters, SearchMatch};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CHUNKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const VECTORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ_KEY: &str = "next_seq";
const DIMENSIONS_KEY: &str = "dimensions";

#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    text: String,
    metadata: ChunkMetadata,
    seq: u64,
}

pub struct RedbVectorIndex {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    embed_timeout: Duration,
    dimensions: usize,
    path: PathBuf,
}

impl RedbVectorIndex {
    /// Opens or creates the index file. An existing index must have been built
    /// with an embedder of the same dimension.
    pub fn open(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        embed_timeout: Duration,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(db_error)?;
        let dimensions = embedder.dimensions();

        let write_txn = db.begin_write().map_err(db_error)?;
        {
            write_txn.open_table(CHUNKS_TABLE).map_err(db_error)?;
            write_txn.open_table(VECTORS_TABLE).map_err(db_error)?;
            let mut meta = write_txn.open_table(META_TABLE).map_err(db_error)?;

            let stored = meta
                .get(DIMENSIONS_KEY)
                .map_err(db_error)?
                .map(|guard| guard.value() as usize);
            match stored {
                Some(expected) if expected != dimensions => {
                    return Err(StoreError::DimensionMismatch {
                        expected,
                        actual: dimensions,
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(DIMENSIONS_KEY, dimensions as u64)
                        .map_err(db_error)?;
                }
            }
        }
        write_txn.commit().map_err(db_error)?;

        info!(path = %path.display(), dimensions, "opened vector index");

        Ok(Self {
            db: Arc::new(db),
            embedder,
            embed_timeout,
            dimensions,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn embed(&self, chunk: &Chunk) -> Result<Vec<f32>, UpsertError> {
        let embedded = tokio::time::timeout(self.embed_timeout, self.embedder.embed(&chunk.text))
            .await
            .unwrap_or(Err(CapabilityError::TimedOut(self.embed_timeout)));

        embedded.map_err(|source| UpsertError::Embedding {
            chunk_id: chunk.chunk_id.clone(),
            source,
        })
    }

    fn write(&self, chunk: &Chunk, vector: &[f32]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(db_error)?;
        {
            let mut chunks = write_txn.open_table(CHUNKS_TABLE).map_err(db_error)?;
            let mut vectors = write_txn.open_table(VECTORS_TABLE).map_err(db_error)?;
            let mut meta = write_txn.open_table(META_TABLE).map_err(db_error)?;

            let existing = match chunks.get(chunk.chunk_id.as_str()).map_err(db_error)? {
                Some(guard) => Some(serde_json::from_slice::<StoredChunk>(guard.value())?.seq),
                None => None,
            };
            let seq = match existing {
                Some(seq) => seq,
                None => {
                    let next = meta
                        .get(NEXT_SEQ_KEY)
                        .map_err(db_error)?
                        .map(|guard| guard.value())
                        .unwrap_or(0);
                    meta.insert(NEXT_SEQ_KEY, next + 1).map_err(db_error)?;
                    next
                }
            };

            let record = serde_json::to_vec(&StoredChunk {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                seq,
            })?;
            chunks
                .insert(chunk.chunk_id.as_str(), record.as_slice())
                .map_err(db_error)?;
            vectors
                .insert(chunk.chunk_id.as_str(), encode_vector(vector).as_slice())
                .map_err(db_error)?;
        }
        write_txn.commit().map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for RedbVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), UpsertError> {
        let vector = self.embed(chunk).await?;
        if vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            }
            .into());
        }

        self.write(chunk, &vector)?;
        debug!(chunk_id = %chunk.chunk_id, source = %chunk.metadata.source_id, "stored chunk");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchMatch>, StoreError> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read().map_err(db_error)?;
        let chunks = read_txn.open_table(CHUNKS_TABLE).map_err(db_error)?;
        let vectors = read_txn.open_table(VECTORS_TABLE).map_err(db_error)?;

        let mut scored: Vec<(u64, SearchMatch)> = Vec::new();
        for entry in chunks.iter().map_err(db_error)? {
            let (key, value) = entry.map_err(db_error)?;
            let record: StoredChunk = serde_json::from_slice(value.value())?;
            if !filters.matches(&record.metadata) {
                continue;
            }

            let Some(vector) = vectors.get(key.value()).map_err(db_error)? else {
                continue;
            };
            let score = cosine_similarity(query_vector, &decode_vector(vector.value()));

            scored.push((
                record.seq,
                SearchMatch {
                    chunk_id: key.value().to_string(),
                    text: record.text,
                    score,
                    metadata: record.metadata,
                },
            ));
        }

        scored.sort_by(|(left_seq, left), (right_seq, right)| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left_seq.cmp(right_seq))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, found)| found)
            .collect())
    }

    async fn stats(&self) -> Result<IndexStats, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_error)?;
        let chunks = read_txn.open_table(CHUNKS_TABLE).map_err(db_error)?;

        let mut stats = IndexStats::default();
        for entry in chunks.iter().map_err(db_error)? {
            let (_, value) = entry.map_err(db_error)?;
            let record: StoredChunk = serde_json::from_slice(value.value())?;
            stats.total_chunks += 1;
            *stats
                .per_content_type
                .entry(record.metadata.content_type)
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn reset(&self, scope: &ResetScope) -> Result<usize, StoreError> {
        let write_txn = self.db.begin_write().map_err(db_error)?;
        let removed = {
            let mut chunks = write_txn.open_table(CHUNKS_TABLE).map_err(db_error)?;
            let mut vectors = write_txn.open_table(VECTORS_TABLE).map_err(db_error)?;

            let mut doomed = Vec::new();
            for entry in chunks.iter().map_err(db_error)? {
                let (key, value) = entry.map_err(db_error)?;
                let record: StoredChunk = serde_json::from_slice(value.value())?;
                if scope.covers(&record.metadata) {
                    doomed.push(key.value().to_string());
                }
            }

            for id in &doomed {
                chunks.remove(id.as_str()).map_err(db_error)?;
                vectors.remove(id.as_str()).map_err(db_error)?;
            }
            doomed.len()
        };
        write_txn.commit().map_err(db_error)?;

        info!(removed, ?scope, "reset vector index");
        Ok(removed)
    }

    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_error)?;
        let chunks = read_txn.open_table(CHUNKS_TABLE).map_err(db_error)?;
        let found = chunks.get(chunk_id).map_err(db_error)?.is_some();
        Ok(found)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
