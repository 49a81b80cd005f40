use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use s1000d_search_core::{
    discover_pdf_files, AnswerOutcome, CharacterNgramEmbedder, ChatCompletionClient, ContentType,
    CorpusExtractor, Embedder, HttpEmbedder, HttpOcrEngine, IndexingOrchestrator, IndexingRequest,
    OcrAdapter, OcrEngine, PipelineConfig, Progress, QueryRequest, QueryResolver,
    RedbVectorIndex, ResetScope, ResolveOptions, RunStatus, SearchFilters, SearchMatch,
    SourceRange, TesseractOcr, VectorIndex,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "s1000d-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path of the persistent vector index.
    #[arg(long, env = "S1000D_INDEX_PATH", default_value = "s1000d-index.redb")]
    index: PathBuf,

    /// JSON pipeline configuration; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Args)]
struct EmbeddingArgs {
    /// OpenAI-compatible embeddings base URL. Offline trigram embeddings when unset.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value = "768")]
    embedding_dimensions: usize,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, classify, chunk and index PDFs and S1000D data modules.
    Index {
        /// PDF file to index. Repeatable.
        #[arg(long)]
        pdf: Vec<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        pdf_dir: Option<PathBuf>,
        /// Folder searched recursively for XML data modules.
        #[arg(long)]
        xml_dir: Option<PathBuf>,
        #[arg(long, requires = "end_page", conflicts_with = "module")]
        start_page: Option<u32>,
        #[arg(long, requires = "start_page")]
        end_page: Option<u32>,
        /// Only index these data modules. Repeatable.
        #[arg(long)]
        module: Vec<String>,
        #[arg(long, default_value_t = false)]
        no_ocr: bool,
        /// Re-embed chunks that are already indexed.
        #[arg(long, default_value_t = false)]
        force: bool,
        #[arg(long)]
        workers: Option<usize>,
        /// Multimodal OCR service endpoint.
        #[arg(long, env = "LLM_OCR_ENDPOINT")]
        ocr_endpoint: Option<String>,
        #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
        ocr_api_key: Option<String>,
        /// Use a local tesseract binary for OCR instead of the OCR endpoint.
        #[arg(long, default_value_t = false)]
        tesseract: bool,
    },
    /// Search the index, optionally attaching diagrams and a generated answer.
    Query {
        #[arg(long)]
        query: String,
        #[arg(long)]
        chapter: Option<String>,
        #[arg(long)]
        content_type: Option<ContentType>,
        #[arg(long)]
        min_importance: Option<u8>,
        /// Restrict matches to one PDF page.
        #[arg(long)]
        source_page: Option<u32>,
        #[arg(long)]
        module_code: Option<String>,
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Result page (1-based). Switches to paginated output.
        #[arg(long, requires = "page_size")]
        page: Option<usize>,
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long, default_value_t = false)]
        images: bool,
        #[arg(long, default_value_t = false)]
        answer: bool,
        #[arg(long, env = "COMPLETION_ENDPOINT")]
        completion_endpoint: Option<String>,
        #[arg(long, env = "COMPLETION_MODEL", default_value = "llama3.1")]
        completion_model: String,
        #[arg(long, env = "COMPLETION_API_KEY", hide_env_values = true)]
        completion_api_key: Option<String>,
    },
    /// Print chunk counts per content type.
    Stats,
    /// Remove indexed chunks, either all of them or a page range.
    Reset {
        #[arg(long, requires = "end_page")]
        start_page: Option<u32>,
        #[arg(long, requires = "start_page")]
        end_page: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let embedder = build_embedder(&cli.embedding)?;
    let index = Arc::new(
        RedbVectorIndex::open(&cli.index, Arc::clone(&embedder), config.indexing.embed_timeout)
            .with_context(|| format!("opening index {}", cli.index.display()))?,
    );
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %cli.index.display(),
        dimensions = index.dimensions(),
        "s1000d-search boot"
    );

    match cli.command {
        Command::Index {
            pdf,
            pdf_dir,
            xml_dir,
            start_page,
            end_page,
            module,
            no_ocr,
            force,
            workers,
            ocr_endpoint,
            ocr_api_key,
            tesseract,
        } => {
            if let Some(workers) = workers {
                config.indexing.workers = workers;
            }

            let mut pdf_paths = pdf;
            if let Some(folder) = &pdf_dir {
                pdf_paths.extend(discover_pdf_files(folder));
            }
            let xml_roots = xml_dir.into_iter().collect::<Vec<_>>();
            let extractor = tokio::task::spawn_blocking(move || {
                CorpusExtractor::open(&pdf_paths, &xml_roots)
            })
            .await?;

            let engine: Option<Arc<dyn OcrEngine>> = if tesseract {
                Some(Arc::new(TesseractOcr::default()))
            } else if let Some(endpoint) = ocr_endpoint {
                Some(Arc::new(HttpOcrEngine::new(&endpoint, ocr_api_key)?))
            } else {
                None
            };
            if engine.is_none() && !no_ocr {
                warn!("no OCR engine configured, diagrams are indexed by caption only");
            }
            let ocr = OcrAdapter::new(engine, config.ocr.clone());

            let range = match (start_page, end_page) {
                (Some(start), Some(end)) => SourceRange::Pages { start, end },
                _ if !module.is_empty() => {
                    SourceRange::Modules(module.into_iter().collect::<BTreeSet<_>>())
                }
                _ => SourceRange::All,
            };
            let request = IndexingRequest {
                range,
                ocr_enabled: !no_ocr,
                force_reindex: force,
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current source");
                    on_signal.cancel();
                }
            });

            let orchestrator =
                IndexingOrchestrator::new(Arc::new(extractor), Arc::clone(&index), ocr, &config)?
                    .with_progress(Arc::new(|progress: &Progress| {
                        debug!(
                            phase = ?progress.phase,
                            processed = progress.processed_sources,
                            total = progress.total_sources,
                            source = progress.current_source.as_deref().unwrap_or("-"),
                            "indexing progress"
                        );
                    }));

            let report = orchestrator.run(&request, &cancel).await?;

            println!(
                "run {} {:?}: {} chunks written, {} unchanged, {}/{} sources processed, {} failed in {:.1}s",
                report.run_id,
                report.status,
                report.chunks_written,
                report.chunks_unchanged,
                report.sources_processed,
                report.sources_total,
                report.sources_failed,
                report.duration.as_secs_f64()
            );
            for (content_type, count) in &report.per_content_type {
                println!("  {content_type}: {count}");
            }
            for error in &report.errors {
                println!("  error [{:?}] {}: {}", error.stage, error.source_id, error.message);
            }
            if report.status == RunStatus::Cancelled {
                println!("run cancelled, chunks written so far are kept");
            }
        }
        Command::Query {
            query,
            chapter,
            content_type,
            min_importance,
            source_page,
            module_code,
            top_k,
            page,
            page_size,
            images,
            answer,
            completion_endpoint,
            completion_model,
            completion_api_key,
        } => {
            let filters = SearchFilters {
                chapter,
                content_type,
                min_importance,
                page: source_page,
                module_code,
            };

            let mut resolver =
                QueryResolver::new(Arc::clone(&index), Arc::clone(&embedder), config.query.clone());
            if let Some(endpoint) = completion_endpoint.filter(|_| answer) {
                let client = ChatCompletionClient::new(&endpoint, completion_model)?
                    .with_api_key(completion_api_key);
                resolver = resolver.with_answer_generator(Arc::new(client));
            }

            if let (Some(page), Some(page_size)) = (page, page_size) {
                let result = resolver
                    .query_page(&QueryRequest {
                        query,
                        filters,
                        page,
                        page_size,
                    })
                    .await?;
                println!(
                    "page {page}/{} ({} matches)",
                    result.total_pages, result.total_count
                );
                for found in &result.matches {
                    print_match(found);
                }
                return Ok(());
            }

            let response = resolver
                .resolve(
                    &query,
                    &filters,
                    top_k,
                    ResolveOptions {
                        attach_images: images,
                        generate_answer: answer,
                    },
                )
                .await?;

            println!("query: {}", response.query);
            if response.matches.is_empty() {
                println!("no matches above the score threshold");
            }
            for found in &response.matches {
                print_match(found);
            }
            for image in &response.images {
                println!(
                    "  image: page={} chunk={} {}",
                    image.metadata.page.unwrap_or_default(),
                    image.chunk_id,
                    image.text.lines().next().unwrap_or_default()
                );
            }
            match &response.answer {
                AnswerOutcome::Generated(text) => println!("answer:\n{text}"),
                AnswerOutcome::NotRequested => {}
                AnswerOutcome::NoContext => println!("answer: no matching excerpts to answer from"),
                AnswerOutcome::Unavailable(reason) => println!("answer unavailable: {reason}"),
                AnswerOutcome::TimedOut => println!("answer unavailable: generation timed out"),
            }
        }
        Command::Stats => {
            let stats = index.stats().await?;
            println!("{} chunks in {}", stats.total_chunks, index.path().display());
            for content_type in ContentType::ALL {
                let count = stats.per_content_type.get(&content_type).copied().unwrap_or(0);
                println!("  {content_type}: {count}");
            }
        }
        Command::Reset {
            start_page,
            end_page,
        } => {
            let scope = match (start_page, end_page) {
                (Some(start), Some(end)) => ResetScope::Pages { start, end },
                _ => ResetScope::All,
            };
            let removed = index.reset(&scope).await?;
            println!("{removed} chunks removed ({scope:?})");
        }
    }

    Ok(())
}

fn build_embedder(args: &EmbeddingArgs) -> anyhow::Result<Arc<dyn Embedder>> {
    match &args.embedding_endpoint {
        Some(endpoint) => {
            let embedder =
                HttpEmbedder::new(endpoint, args.embedding_model.clone(), args.embedding_dimensions)?
                    .with_api_key(args.embedding_api_key.clone());
            Ok(Arc::new(embedder))
        }
        None => Ok(Arc::new(CharacterNgramEmbedder::default())),
    }
}

fn print_match(found: &SearchMatch) {
    let location = match (found.metadata.page, &found.metadata.module_code) {
        (Some(page), _) => format!("page={page}"),
        (None, Some(module)) => format!("module={module}"),
        (None, None) => "source=?".to_string(),
    };
    println!(
        "[{}] score={:.4} chapter={} {location} importance={} chunk={}",
        found.metadata.content_type,
        found.score,
        found.metadata.chapter,
        found.metadata.importance,
        found.chunk_id
    );
    println!("  {}", found.text);
}
