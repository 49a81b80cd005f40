pub mod answer;
pub mod chunking;
pub mod classifier;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod indexer;
pub mod models;
pub mod ocr;
pub mod providers;
pub mod resolver;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

pub use answer::{build_prompt, AnswerGenerator, AnswerOutcome};
pub use chunking::{normalize_whitespace, Chunker};
pub use classifier::Classifier;
pub use config::{
    ChunkPolicy, ChunkingConfig, ClassifierConfig, IndexingConfig, OcrConfig, PipelineConfig,
    QueryConfig,
};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    CapabilityError, IndexingError, IngestError, SearchError, StoreError, UpsertError,
};
pub use extractor::{
    discover_data_modules, discover_pdf_files, CorpusExtractor, PdfExtractor, SkippedDocument,
    SourceExtractor,
};
pub use index::RedbVectorIndex;
pub use indexer::{
    IndexingOrchestrator, IndexingRequest, Progress, ProgressCallback, RunError, RunPhase,
    RunReport, RunStage, RunStatus, SourceRange,
};
pub use models::{
    Chunk, ChunkMetadata, ClassifiedContent, ClassifiedFragment, ContentType, Fragment,
    FragmentContent, IndexStats, ResetScope, SearchFilters, SearchMatch, SourceRef,
};
pub use ocr::{OcrAdapter, OcrEngine, OcrOutcome};
pub use providers::{ChatCompletionClient, HttpEmbedder, HttpOcrEngine, TesseractOcr};
pub use resolver::{QueryPage, QueryRequest, QueryResolver, ResolveOptions, Response};
pub use traits::VectorIndex;
