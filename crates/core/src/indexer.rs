use crate::chunking::Chunker;
use crate::classifier::Classifier;
use crate::config::{IndexingConfig, PipelineConfig};
use crate::error::{IndexingError, IngestError, StoreError, UpsertError};
use crate::extractor::SourceExtractor;
use crate::models::{Chunk, ContentType, ResetScope, SourceRef};
use crate::ocr::OcrAdapter;
use crate::traits::VectorIndex;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceRange {
    #[default]
    All,
    /// Inclusive PDF page range. Data modules are not selected.
    Pages { start: u32, end: u32 },
    Modules(BTreeSet<String>),
}

impl SourceRange {
    pub fn selects(&self, source: &SourceRef) -> bool {
        match (self, source) {
            (Self::All, _) => true,
            (Self::Pages { start, end }, SourceRef::PdfPage { page, .. }) => {
                page >= start && page <= end
            }
            (Self::Modules(ids), SourceRef::XmlModule { module, .. }) => ids.contains(module),
            _ => false,
        }
    }

    fn validate(&self) -> Result<(), IndexingError> {
        match self {
            Self::Pages { start, end } if *start == 0 || start > end => Err(
                IndexingError::InvalidRequest(format!("invalid page range {start}..={end}")),
            ),
            Self::Modules(ids) if ids.is_empty() => Err(IndexingError::InvalidRequest(
                "module list is empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingRequest {
    pub range: SourceRange,
    pub ocr_enabled: bool,
    pub force_reindex: bool,
}

impl Default for IndexingRequest {
    fn default() -> Self {
        Self {
            range: SourceRange::All,
            ocr_enabled: true,
            force_reindex: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Extracting,
    Classifying,
    Chunking,
    EmbeddingAndStoring,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub phase: RunPhase,
    pub processed_sources: usize,
    pub total_sources: usize,
    pub current_source: Option<String>,
    pub elapsed: Duration,
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Extraction,
    Ocr,
    Embedding,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub source_id: String,
    pub stage: RunStage,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    SucceededWithWarnings,
    Cancelled,
}

#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub sources_total: usize,
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub chunks_written: usize,
    pub chunks_unchanged: usize,
    pub per_content_type: BTreeMap<ContentType, usize>,
    pub errors: Vec<RunError>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,
}

struct PreparedSource {
    source_id: String,
    chunks: Result<Vec<Chunk>, RunError>,
    warnings: Vec<RunError>,
}

struct RunTracker<'a> {
    started: Instant,
    total: usize,
    processed: AtomicUsize,
    callback: Option<&'a ProgressCallback>,
}

impl RunTracker<'_> {
    fn emit(&self, phase: RunPhase, current_source: Option<&str>) {
        if let Some(callback) = self.callback {
            callback(&Progress {
                phase,
                processed_sources: self.processed.load(Ordering::SeqCst),
                total_sources: self.total,
                current_source: current_source.map(str::to_string),
                elapsed: self.started.elapsed(),
            });
        }
    }

    fn finish_source(&self) -> usize {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Drives extraction, classification, OCR, chunking and storage over a
/// selection of sources.
pub struct IndexingOrchestrator<I: VectorIndex> {
    extractor: Arc<dyn SourceExtractor>,
    index: Arc<I>,
    ocr: OcrAdapter,
    classifier: Classifier,
    chunker: Chunker,
    config: IndexingConfig,
    progress: Option<ProgressCallback>,
}

impl<I: VectorIndex> IndexingOrchestrator<I> {
    pub fn new(
        extractor: Arc<dyn SourceExtractor>,
        index: Arc<I>,
        ocr: OcrAdapter,
        config: &PipelineConfig,
    ) -> Result<Self, IndexingError> {
        config.validate()?;
        Ok(Self {
            extractor,
            index,
            ocr,
            classifier: Classifier::new(config.classifier)?,
            chunker: Chunker::new(config.chunking)?,
            config: config.indexing.clone(),
            progress: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    pub async fn run(
        &self,
        request: &IndexingRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport, IndexingError> {
        request.range.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let sources = self
            .extractor
            .sources()
            .into_iter()
            .filter(|source| request.range.selects(source))
            .collect::<Vec<_>>();

        let tracker = RunTracker {
            started: Instant::now(),
            total: sources.len(),
            processed: AtomicUsize::new(0),
            callback: self.progress.as_ref(),
        };
        tracker.emit(RunPhase::Idle, None);
        info!(%run_id, sources = sources.len(), range = ?request.range, "indexing run started");

        let mut errors = self
            .extractor
            .unreadable()
            .into_iter()
            .map(|skipped| RunError {
                source_id: skipped.path.display().to_string(),
                stage: RunStage::Extraction,
                message: skipped.reason,
            })
            .collect::<Vec<_>>();

        if request.force_reindex && !sources.is_empty() {
            let ids = sources.iter().map(SourceRef::source_id).collect::<BTreeSet<_>>();
            let removed = self
                .index
                .reset(&ResetScope::Sources(ids))
                .await
                .inspect_err(|_| tracker.emit(RunPhase::Failed, None))?;
            info!(%run_id, removed, "cleared selected sources before reindexing");
        }

        let ocr_enabled = request.ocr_enabled && self.ocr.is_enabled();
        let workers = self.config.workers.max(1);
        let mut prepared = stream::iter(sources)
            .map(|source| self.prepare(source, ocr_enabled, &tracker))
            .buffered(workers);

        let mut cancelled = false;
        let mut sources_failed = 0usize;
        let mut chunks_written = 0usize;
        let mut chunks_unchanged = 0usize;
        let mut per_content_type = BTreeMap::new();

        while let Some(source) = prepared.next().await {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            errors.extend(source.warnings);
            let chunks = match source.chunks {
                Ok(chunks) => chunks,
                Err(error) => {
                    warn!(source = %error.source_id, stage = ?error.stage, message = %error.message, "source failed");
                    errors.push(error);
                    sources_failed += 1;
                    tracker.finish_source();
                    continue;
                }
            };

            tracker.emit(RunPhase::EmbeddingAndStoring, Some(&source.source_id));
            let outcome = match self
                .store_source(&source.source_id, chunks, request.force_reindex)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracker.emit(RunPhase::Failed, Some(&source.source_id));
                    warn!(%run_id, source = %source.source_id, %error, "vector index failed, aborting run");
                    return Err(IndexingError::Storage(error));
                }
            };

            chunks_written += outcome.written.values().sum::<usize>();
            chunks_unchanged += outcome.unchanged;
            for (content_type, count) in outcome.written {
                *per_content_type.entry(content_type).or_insert(0) += count;
            }
            if outcome.aborted {
                sources_failed += 1;
            }
            errors.extend(outcome.errors);
            tracker.finish_source();
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if errors.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::SucceededWithWarnings
        };
        tracker.emit(
            if cancelled {
                RunPhase::Cancelled
            } else {
                RunPhase::Completed
            },
            None,
        );

        let report = RunReport {
            run_id,
            started_at,
            status,
            sources_total: tracker.total,
            sources_processed: tracker.processed.load(Ordering::SeqCst),
            sources_failed,
            chunks_written,
            chunks_unchanged,
            per_content_type,
            errors,
            duration: tracker.started.elapsed(),
        };
        info!(
            %run_id,
            status = ?report.status,
            written = report.chunks_written,
            unchanged = report.chunks_unchanged,
            errors = report.errors.len(),
            "indexing run finished"
        );
        Ok(report)
    }

    async fn prepare(
        &self,
        source: SourceRef,
        ocr_enabled: bool,
        tracker: &RunTracker<'_>,
    ) -> PreparedSource {
        let source_id = source.source_id();
        let failed = |message: String| PreparedSource {
            source_id: source_id.clone(),
            chunks: Err(RunError {
                source_id: source_id.clone(),
                stage: RunStage::Extraction,
                message,
            }),
            warnings: Vec::new(),
        };

        tracker.emit(RunPhase::Extracting, Some(&source_id));
        let extractor = Arc::clone(&self.extractor);
        let fragments = match tokio::task::spawn_blocking(move || extractor.extract(&source)).await {
            Ok(Ok(fragments)) => fragments,
            Ok(Err(error)) => return failed(error.to_string()),
            Err(join) => return failed(IngestError::Worker(join.to_string()).to_string()),
        };

        tracker.emit(RunPhase::Classifying, Some(&source_id));
        let mut classified = self.classifier.classify_source(&fragments);

        let mut warnings = Vec::new();
        if ocr_enabled {
            for fragment in classified
                .iter_mut()
                .filter(|fragment| fragment.content_type() == ContentType::Diagram)
            {
                let outcome = self.ocr.enrich(fragment).await;
                if outcome.is_failure() {
                    warnings.push(RunError {
                        source_id: source_id.clone(),
                        stage: RunStage::Ocr,
                        message: format!("fragment {}: {outcome:?}", fragment.ordinal),
                    });
                }
            }
        }

        tracker.emit(RunPhase::Chunking, Some(&source_id));
        let chunks = self.chunker.chunk_all(&classified);

        PreparedSource {
            source_id: source_id.clone(),
            chunks: Ok(chunks),
            warnings,
        }
    }

    /// Writes one source's chunks. Only fatal storage errors are returned;
    /// everything else is recorded in the outcome.
    async fn store_source(
        &self,
        source_id: &str,
        chunks: Vec<Chunk>,
        force_reindex: bool,
    ) -> Result<StoreOutcome, StoreError> {
        let mut outcome = StoreOutcome::default();

        let mut pending = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if !force_reindex && self.index.contains(&chunk.chunk_id).await? {
                outcome.unchanged += 1;
            } else {
                pending.push(chunk);
            }
        }

        let index = &self.index;
        let mut upserts = stream::iter(pending)
            .map(|chunk| async move {
                let result = index.upsert(&chunk).await;
                (chunk.metadata.content_type, result)
            })
            .buffer_unordered(self.config.write_concurrency.max(1));

        while let Some((content_type, result)) = upserts.next().await {
            match result {
                Ok(()) => *outcome.written.entry(content_type).or_insert(0) += 1,
                Err(UpsertError::Embedding { chunk_id, source }) => {
                    warn!(source = %source_id, %chunk_id, error = %source, "chunk skipped, embedding failed");
                    outcome.errors.push(RunError {
                        source_id: source_id.to_string(),
                        stage: RunStage::Embedding,
                        message: format!("chunk {chunk_id}: {source}"),
                    });
                }
                Err(UpsertError::Store(error)) if error.is_fatal() => return Err(error),
                Err(UpsertError::Store(error)) => {
                    warn!(source = %source_id, %error, "write failed, abandoning source");
                    outcome.errors.push(RunError {
                        source_id: source_id.to_string(),
                        stage: RunStage::Storage,
                        message: error.to_string(),
                    });
                    outcome.aborted = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct StoreOutcome {
    written: BTreeMap<ContentType, usize>,
    unchanged: usize,
    aborted: bool,
    errors: Vec<RunError>,
}
