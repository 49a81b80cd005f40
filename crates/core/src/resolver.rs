use crate::answer::{build_prompt, AnswerGenerator, AnswerOutcome};
use crate::config::QueryConfig;
use crate::embeddings::Embedder;
use crate::error::{CapabilityError, SearchError};
use crate::models::{ContentType, SearchFilters, SearchMatch};
use crate::traits::VectorIndex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub attach_images: bool,
    pub generate_answer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub query: String,
    pub matches: Vec<SearchMatch>,
    /// Diagram chunks from the pages (or data modules) of `matches`, in rank order of those.
    pub images: Vec<SearchMatch>,
    pub answer: AnswerOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub filters: SearchFilters,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPage {
    pub matches: Vec<SearchMatch>,
    pub total_count: usize,
    pub total_pages: usize,
}

pub struct QueryResolver<I: VectorIndex> {
    index: Arc<I>,
    embedder: Arc<dyn Embedder>,
    answer: Option<Arc<dyn AnswerGenerator>>,
    config: QueryConfig,
}

impl<I: VectorIndex> QueryResolver<I> {
    pub fn new(index: Arc<I>, embedder: Arc<dyn Embedder>, config: QueryConfig) -> Self {
        Self {
            index,
            embedder,
            answer: None,
            config,
        }
    }

    pub fn with_answer_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.answer = Some(generator);
        self
    }

    pub async fn resolve(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
        options: ResolveOptions,
    ) -> Result<Response, SearchError> {
        let top_k = if top_k == 0 {
            self.config.default_top_k
        } else {
            top_k
        };
        let query_vector = self.embed_query(query).await?;
        let matches = self.ranked(&query_vector, filters, top_k).await?;
        info!(query = %query.trim(), matches = matches.len(), "query resolved");

        let images = if options.attach_images {
            self.related_images(&query_vector, &matches).await?
        } else {
            Vec::new()
        };

        let answer = if options.generate_answer {
            self.answer(query, &matches).await
        } else {
            AnswerOutcome::NotRequested
        };

        Ok(Response {
            query: query.trim().to_string(),
            matches,
            images,
            answer,
        })
    }

    /// Ranks every match above `min_score` so the totals cover the whole
    /// result set, then returns the requested slice.
    pub async fn query_page(&self, request: &QueryRequest) -> Result<QueryPage, SearchError> {
        if request.page == 0 || request.page_size == 0 {
            return Err(SearchError::Request(
                "page and page_size must be at least 1".to_string(),
            ));
        }

        let query_vector = self.embed_query(&request.query).await?;
        let ranked = self
            .ranked(&query_vector, &request.filters, usize::MAX)
            .await?;

        let total_count = ranked.len();
        let total_pages = total_count.div_ceil(request.page_size).max(1);
        let matches = ranked
            .into_iter()
            .skip((request.page - 1).saturating_mul(request.page_size))
            .take(request.page_size)
            .collect();

        Ok(QueryPage {
            matches,
            total_count,
            total_pages,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let timeout = self.config.embed_timeout;
        match tokio::time::timeout(timeout, self.embedder.embed(query)).await {
            Ok(vector) => Ok(vector?),
            Err(_) => Err(CapabilityError::TimedOut(timeout).into()),
        }
    }

    async fn ranked(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let mut matches = self.index.search(query_vector, filters, top_k).await?;
        matches.retain(|found| found.score >= self.config.min_score);
        Ok(matches)
    }

    async fn related_images(
        &self,
        query_vector: &[f32],
        matches: &[SearchMatch],
    ) -> Result<Vec<SearchMatch>, SearchError> {
        let mut scopes = Vec::new();
        for scope in matches.iter().filter_map(ImageScope::of) {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        let mut images = Vec::new();
        for scope in scopes {
            let remaining = self.config.max_images.saturating_sub(images.len());
            if remaining == 0 {
                break;
            }
            let found = self
                .index
                .search(
                    query_vector,
                    &scope.filters(),
                    self.config.max_images_per_page.min(remaining),
                )
                .await?;
            debug!(?scope, images = found.len(), "attached diagrams");
            images.extend(found);
        }
        Ok(images)
    }

    async fn answer(&self, query: &str, matches: &[SearchMatch]) -> AnswerOutcome {
        let Some(generator) = &self.answer else {
            return AnswerOutcome::Unavailable("no answer generator configured".to_string());
        };
        let Some(prompt) = build_prompt(
            query,
            matches,
            self.config.answer_top_n,
            self.config.answer_context_chars,
        ) else {
            return AnswerOutcome::NoContext;
        };

        let timeout = self.config.answer_timeout;
        match tokio::time::timeout(
            timeout,
            generator.complete(&prompt, self.config.answer_context_chars),
        )
        .await
        {
            Ok(Ok(text)) => AnswerOutcome::Generated(text),
            Ok(Err(error)) => {
                warn!(%error, "answer generation failed, returning search results only");
                AnswerOutcome::Unavailable(error.to_string())
            }
            Err(_) => {
                warn!(?timeout, "answer generation timed out");
                AnswerOutcome::TimedOut
            }
        }
    }
}

/// Where diagrams related to a match live: its PDF page, or its data module
/// when the match has no page.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImageScope {
    Page(u32),
    Module(String),
}

impl ImageScope {
    fn of(found: &SearchMatch) -> Option<Self> {
        match (found.metadata.page, &found.metadata.module_code) {
            (Some(page), _) => Some(Self::Page(page)),
            (None, Some(module)) => Some(Self::Module(module.clone())),
            (None, None) => None,
        }
    }

    fn filters(&self) -> SearchFilters {
        let mut filters = SearchFilters {
            content_type: Some(ContentType::Diagram),
            ..Default::default()
        };
        match self {
            Self::Page(page) => filters.page = Some(*page),
            Self::Module(module) => filters.module_code = Some(module.clone()),
        }
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::RedbVectorIndex;
    use crate::models::Chunk;
    use crate::test_support::{chunk, ScriptedAnswer};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn open_index(dir: &TempDir) -> Arc<RedbVectorIndex> {
        Arc::new(
            RedbVectorIndex::open(
                &dir.path().join("index.redb"),
                Arc::new(CharacterNgramEmbedder::default()),
                Duration::from_secs(5),
            )
            .expect("index should open"),
        )
    }

    fn resolver(index: &Arc<RedbVectorIndex>) -> QueryResolver<RedbVectorIndex> {
        QueryResolver::new(
            Arc::clone(index),
            Arc::new(CharacterNgramEmbedder::default()),
            QueryConfig::default(),
        )
    }

    fn on_page(mut chunk: Chunk, page: u32) -> Chunk {
        chunk.metadata.page = Some(page);
        chunk.metadata.source_id = format!("spec#p{page}");
        chunk
    }

    async fn seed(index: &RedbVectorIndex) -> Result<(), Box<dyn std::error::Error>> {
        let chunks = [
            on_page(chunk("t1", "The brake system stops the wheel.", ContentType::Text, 3), 4),
            on_page(chunk("t2", "Tyre pressure is checked weekly.", ContentType::Text, 1), 5),
            on_page(chunk("d1", "Brake caliper", ContentType::Diagram, 2), 4),
            on_page(chunk("d2", "Brake lever assembly", ContentType::Diagram, 2), 4),
            on_page(chunk("d3", "Brake cable routing", ContentType::Diagram, 2), 4),
            on_page(chunk("d4", "Tyre valve", ContentType::Diagram, 2), 5),
        ];
        for chunk in &chunks {
            index.upsert(chunk).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn best_match_comes_first_and_scores_never_increase() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        seed(&index).await?;

        let response = resolver(&index)
            .resolve("brake system", &SearchFilters::default(), 10, ResolveOptions::default())
            .await?;

        assert_eq!(response.matches[0].chunk_id, "t1");
        assert!(response.matches[0].score >= 0.3);
        assert!(response
            .matches
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score));
        assert!(response.images.is_empty());
        assert_eq!(response.answer, AnswerOutcome::NotRequested);
        Ok(())
    }

    #[tokio::test]
    async fn diagram_filter_on_text_only_corpus_is_empty_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        index
            .upsert(&chunk("t1", "The brake system stops the wheel.", ContentType::Text, 3))
            .await?;
        let filters = SearchFilters {
            content_type: Some(ContentType::Diagram),
            ..Default::default()
        };

        let response = resolver(&index)
            .resolve(
                "brake system",
                &filters,
                10,
                ResolveOptions {
                    attach_images: true,
                    generate_answer: false,
                },
            )
            .await?;

        assert!(response.matches.is_empty());
        assert!(response.images.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn empty_query_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        let result = resolver(&index)
            .resolve("   ", &SearchFilters::default(), 10, ResolveOptions::default())
            .await;
        assert!(matches!(result, Err(SearchError::EmptyQuery)));
        Ok(())
    }

    #[tokio::test]
    async fn images_come_from_result_pages_within_limits() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        seed(&index).await?;
        let filters = SearchFilters {
            content_type: Some(ContentType::Text),
            page: Some(4),
            ..Default::default()
        };

        let response = resolver(&index)
            .resolve(
                "brake",
                &filters,
                10,
                ResolveOptions {
                    attach_images: true,
                    generate_answer: false,
                },
            )
            .await?;

        assert_eq!(response.matches.len(), 1);
        assert_eq!(response.images.len(), QueryConfig::default().max_images_per_page);
        assert!(response.images.iter().all(|image| {
            image.metadata.page == Some(4) && image.metadata.content_type == ContentType::Diagram
        }));
        Ok(())
    }

    #[tokio::test]
    async fn totals_cover_every_match_beyond_the_first_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        for i in 0..25 {
            index
                .upsert(&chunk(
                    &format!("b{i}"),
                    &format!("brake inspection step {i}"),
                    ContentType::Text,
                    2,
                ))
                .await?;
        }

        let first = resolver(&index)
            .query_page(&QueryRequest {
                query: "brake".to_string(),
                filters: SearchFilters::default(),
                page: 1,
                page_size: 5,
            })
            .await?;

        assert_eq!(first.matches.len(), 5);
        assert_eq!(first.total_count, 25);
        assert_eq!(first.total_pages, 5);
        Ok(())
    }

    #[tokio::test]
    async fn module_matches_attach_diagrams_from_the_same_module() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        let in_module = |mut chunk: Chunk, module: &str| {
            chunk.metadata.page = None;
            chunk.metadata.source_id = module.to_string();
            chunk.metadata.module_code = Some(module.to_string());
            chunk
        };
        for chunk in [
            in_module(chunk("m1", "Bleed the brake hydraulic line.", ContentType::Text, 3), "DMC-BIKE-041"),
            in_module(chunk("m2", "Brake hydraulic line", ContentType::Diagram, 2), "DMC-BIKE-041"),
            in_module(chunk("m3", "Brake pad wear gauge", ContentType::Diagram, 2), "DMC-BIKE-042"),
        ] {
            index.upsert(&chunk).await?;
        }
        let filters = SearchFilters {
            content_type: Some(ContentType::Text),
            ..Default::default()
        };

        let response = resolver(&index)
            .resolve(
                "brake hydraulic line",
                &filters,
                10,
                ResolveOptions {
                    attach_images: true,
                    generate_answer: false,
                },
            )
            .await?;

        assert_eq!(response.matches.len(), 1);
        let ids = response
            .images
            .iter()
            .map(|image| image.chunk_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["m2"]);
        Ok(())
    }

    #[tokio::test]
    async fn answer_outcomes_never_fail_the_query() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        seed(&index).await?;
        let options = ResolveOptions {
            attach_images: false,
            generate_answer: true,
        };

        let generator = Arc::new(ScriptedAnswer::answering("Inspect the brake pads."));
        let answered = resolver(&index)
            .with_answer_generator(generator.clone())
            .resolve("brake system", &SearchFilters::default(), 5, options)
            .await?;
        assert_eq!(
            answered.answer,
            AnswerOutcome::Generated("Inspect the brake pads.".to_string())
        );
        let prompt = generator
            .prompts
            .lock()
            .map(|prompts| prompts.concat())
            .unwrap_or_default();
        assert!(prompt.contains("[Chapter 1, page 4]"));
        assert!(prompt.ends_with("Question: brake system\n\nAnswer:"));

        let failed = resolver(&index)
            .with_answer_generator(Arc::new(ScriptedAnswer::failing()))
            .resolve("brake system", &SearchFilters::default(), 5, options)
            .await?;
        assert!(matches!(failed.answer, AnswerOutcome::Unavailable(_)));
        assert!(!failed.matches.is_empty());

        let mut config = QueryConfig::default();
        config.answer_timeout = Duration::from_millis(20);
        let slow = QueryResolver::new(
            Arc::clone(&index),
            Arc::new(CharacterNgramEmbedder::default()),
            config,
        )
        .with_answer_generator(Arc::new(ScriptedAnswer::slow(Duration::from_secs(5))))
        .resolve("brake system", &SearchFilters::default(), 5, options)
        .await?;
        assert_eq!(slow.answer, AnswerOutcome::TimedOut);
        Ok(())
    }

    #[tokio::test]
    async fn no_matches_means_no_prompt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        let generator = Arc::new(ScriptedAnswer::answering("unused"));

        let response = resolver(&index)
            .with_answer_generator(generator.clone())
            .resolve(
                "brake system",
                &SearchFilters::default(),
                5,
                ResolveOptions {
                    attach_images: false,
                    generate_answer: true,
                },
            )
            .await?;

        assert!(response.matches.is_empty());
        assert_eq!(response.answer, AnswerOutcome::NoContext);
        assert_eq!(generator.prompt_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn pages_slice_the_ranked_results() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = open_index(&dir);
        for i in 0..5 {
            index
                .upsert(&chunk(
                    &format!("n{i}"),
                    &format!("brake pad note {i}"),
                    ContentType::Text,
                    2,
                ))
                .await?;
        }
        let resolver = resolver(&index);

        let second = resolver
            .query_page(&QueryRequest {
                query: "brake".to_string(),
                filters: SearchFilters::default(),
                page: 2,
                page_size: 2,
            })
            .await?;
        assert_eq!(second.matches.len(), 2);
        assert_eq!(second.total_count, 5);
        assert_eq!(second.total_pages, 3);

        let last = resolver
            .query_page(&QueryRequest {
                query: "brake".to_string(),
                filters: SearchFilters::default(),
                page: 3,
                page_size: 2,
            })
            .await?;
        assert_eq!(last.matches.len(), 1);
        assert_eq!(last.total_count, 5);

        let first = resolver
            .query_page(&QueryRequest {
                query: "brake".to_string(),
                filters: SearchFilters::default(),
                page: 1,
                page_size: 2,
            })
            .await?;
        assert!(first
            .matches
            .iter()
            .all(|found| !second.matches.iter().any(|other| other.chunk_id == found.chunk_id)));

        let empty = resolver
            .query_page(&QueryRequest {
                query: "brake".to_string(),
                filters: SearchFilters {
                    content_type: Some(ContentType::Table),
                    ..Default::default()
                },
                page: 1,
                page_size: 10,
            })
            .await?;
        assert_eq!(empty.total_count, 0);
        assert_eq!(empty.total_pages, 1);
        Ok(())
    }
}
