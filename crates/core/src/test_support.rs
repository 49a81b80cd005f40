use crate::answer::AnswerGenerator;
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::{CapabilityError, IngestError, StoreError, UpsertError};
use crate::extractor::{page_blocks, parse_module, SkippedDocument, SourceExtractor};
use crate::models::{
    Chunk, ChunkMetadata, ContentType, Fragment, FragmentContent, ImageData, ImageFormat,
    IndexStats, ResetScope, SearchFilters, SearchMatch, SourceRef,
};
use crate::ocr::OcrEngine;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn chunk(id: &str, text: &str, content_type: ContentType, importance: u8) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            source_id: "spec#p1".to_string(),
            page: Some(1),
            chapter: "1".to_string(),
            content_type,
            importance,
            module_code: None,
            element_id: None,
            fragment_ordinal: 0,
            chunk_index: 0,
            region: None,
        },
    }
}

/// Trigram embedder that starts failing after a number of calls, or on texts
/// containing a marker.
pub struct FlakyEmbedder {
    inner: CharacterNgramEmbedder,
    calls: AtomicUsize,
    fail_from: usize,
    fail_on: Option<String>,
}

impl FlakyEmbedder {
    pub fn failing_from(calls: usize) -> Self {
        Self {
            inner: CharacterNgramEmbedder::default(),
            calls: AtomicUsize::new(0),
            fail_from: calls,
            fail_on: None,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::failing_from(usize::MAX)
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let marked = self
            .fail_on
            .as_deref()
            .is_some_and(|marker| text.contains(marker));
        if call >= self.fail_from || marked {
            return Err(CapabilityError::Unavailable("embedding backend down".to_string()));
        }
        Ok(self.inner.embed_text(text))
    }
}

pub struct ScriptedOcr {
    reply: Result<String, String>,
    delay: Duration,
}

impl ScriptedOcr {
    pub fn text(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("ocr backend down".to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            reply: Ok("late text from the figure".to_string()),
            delay,
        }
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format != ImageFormat::Unknown
    }

    async fn recognize(&self, _image: &ImageData) -> Result<String, CapabilityError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(CapabilityError::Unavailable)
    }
}

pub struct ScriptedAnswer {
    reply: Result<String, String>,
    delay: Duration,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedAnswer {
    pub fn answering(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("completion backend down".to_string()),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::answering("too late")
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().map(|prompts| prompts.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AnswerGenerator for ScriptedAnswer {
    async fn complete(&self, prompt: &str, _context_budget: usize) -> Result<String, CapabilityError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(CapabilityError::Unavailable)
    }
}

/// In-memory corpus: each source maps to its fragments or an extraction failure.
#[derive(Default)]
pub struct FakeExtractor {
    sources: Vec<(SourceRef, Result<Vec<Fragment>, String>)>,
    skipped: Vec<SkippedDocument>,
}

impl FakeExtractor {
    pub fn with_page(mut self, document: &str, page: u32, text: &str) -> Self {
        let source = SourceRef::PdfPage {
            document: document.to_string(),
            page,
        };
        let fragments = fragments_for(&source, page_blocks(text));
        self.sources.push((source, Ok(fragments)));
        self
    }

    pub fn with_contents(mut self, document: &str, page: u32, contents: Vec<FragmentContent>) -> Self {
        let source = SourceRef::PdfPage {
            document: document.to_string(),
            page,
        };
        let fragments = fragments_for(&source, contents);
        self.sources.push((source, Ok(fragments)));
        self
    }

    pub fn with_module(mut self, module: &str, xml: &str) -> Self {
        let source = SourceRef::XmlModule {
            module: module.to_string(),
            path: PathBuf::from(format!("{module}.xml")),
        };
        let fragments = parse_module(module, xml).map_err(|error| error.to_string());
        self.sources.push((source, fragments));
        self
    }

    pub fn with_broken_page(mut self, document: &str, page: u32) -> Self {
        self.sources.push((
            SourceRef::PdfPage {
                document: document.to_string(),
                page,
            },
            Err("corrupt content stream".to_string()),
        ));
        self
    }

    pub fn with_unreadable(mut self, path: &str) -> Self {
        self.skipped.push(SkippedDocument {
            path: PathBuf::from(path),
            reason: "not a pdf".to_string(),
        });
        self
    }
}

fn fragments_for(source: &SourceRef, contents: Vec<FragmentContent>) -> Vec<Fragment> {
    contents
        .into_iter()
        .enumerate()
        .map(|(ordinal, content)| Fragment {
            source_id: source.source_id(),
            ordinal,
            page: source.page(),
            module_code: None,
            element_id: None,
            content,
            region: None,
        })
        .collect()
}

impl SourceExtractor for FakeExtractor {
    fn sources(&self) -> Vec<SourceRef> {
        self.sources.iter().map(|(source, _)| source.clone()).collect()
    }

    fn extract(&self, source: &SourceRef) -> Result<Vec<Fragment>, IngestError> {
        let (_, fragments) = self
            .sources
            .iter()
            .find(|(candidate, _)| candidate == source)
            .ok_or_else(|| IngestError::UnknownSource(source.source_id()))?;
        fragments.clone().map_err(IngestError::PdfParse)
    }

    fn unreadable(&self) -> Vec<SkippedDocument> {
        self.skipped.clone()
    }
}

/// Index whose storage is gone: every write and read fails with a fatal error.
pub struct BrokenIndex;

#[async_trait]
impl VectorIndex for BrokenIndex {
    fn dimensions(&self) -> usize {
        CharacterNgramEmbedder::default().dimensions
    }

    async fn upsert(&self, _chunk: &Chunk) -> Result<(), UpsertError> {
        Err(StoreError::Database("disk detached".to_string()).into())
    }

    async fn search(
        &self,
        _query_vector: &[f32],
        _filters: &SearchFilters,
        _top_k: usize,
    ) -> Result<Vec<SearchMatch>, StoreError> {
        Err(StoreError::Database("disk detached".to_string()))
    }

    async fn stats(&self) -> Result<IndexStats, StoreError> {
        Err(StoreError::Database("disk detached".to_string()))
    }

    async fn reset(&self, _scope: &ResetScope) -> Result<usize, StoreError> {
        Err(StoreError::Database("disk detached".to_string()))
    }

    async fn contains(&self, _chunk_id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}
