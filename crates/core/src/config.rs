use crate::error::IngestError;
use crate::models::ContentType;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    pub size: usize,
    pub overlap: usize,
}

impl ChunkPolicy {
    pub const fn new(size: usize, overlap: usize) -> Self {
        Self { size, overlap }
    }
}

/// Window sizes for the splittable content types. Tables and diagrams are never split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub text: ChunkPolicy,
    pub heading: ChunkPolicy,
    pub list: ChunkPolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            text: ChunkPolicy::new(1_000, 200),
            heading: ChunkPolicy::new(500, 50),
            list: ChunkPolicy::new(800, 100),
        }
    }
}

impl ChunkingConfig {
    pub fn policy(&self, content_type: ContentType) -> Option<ChunkPolicy> {
        match content_type {
            ContentType::Text => Some(self.text),
            ContentType::Heading => Some(self.heading),
            ContentType::List => Some(self.list),
            ContentType::Table | ContentType::Diagram => None,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        for (name, policy) in [
            ("text", self.text),
            ("heading", self.heading),
            ("list", self.list),
        ] {
            if policy.size == 0 {
                return Err(IngestError::InvalidChunkConfig(format!(
                    "{name} chunk size must be positive"
                )));
            }
            if policy.overlap >= policy.size {
                return Err(IngestError::InvalidChunkConfig(format!(
                    "{name} overlap {} must be smaller than size {}",
                    policy.overlap, policy.size
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub context_window: usize,
    pub heading_max_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            context_window: 2,
            heading_max_chars: 100,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub min_width: u32,
    pub min_height: u32,
    pub max_image_bytes: usize,
    /// A caption at least this long is taken to already describe the figure.
    pub caption_sufficient_chars: usize,
    pub min_text_chars: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_width: 100,
            min_height: 100,
            max_image_bytes: 5 * 1024 * 1024,
            caption_sufficient_chars: 120,
            min_text_chars: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub workers: usize,
    pub write_concurrency: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub embed_timeout: Duration,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            write_concurrency: 4,
            embed_timeout: Duration::from_secs(30),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_top_k: usize,
    pub min_score: f64,
    pub max_images: usize,
    pub max_images_per_page: usize,
    pub answer_top_n: usize,
    pub answer_context_chars: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub answer_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub embed_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            min_score: 0.1,
            max_images: 5,
            max_images_per_page: 2,
            answer_top_n: 5,
            answer_context_chars: 6_000,
            answer_timeout: Duration::from_secs(60),
            embed_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub classifier: ClassifierConfig,
    pub ocr: OcrConfig,
    pub indexing: IndexingConfig,
    pub query: QueryConfig,
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            IngestError::InvalidArgument(format!("config {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;
        if self.indexing.workers == 0 || self.indexing.write_concurrency == 0 {
            return Err(IngestError::InvalidArgument(
                "workers and write_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.query.min_score) {
            return Err(IngestError::InvalidArgument(format!(
                "min_score {} is outside [0, 1]",
                self.query.min_score
            )));
        }
        Ok(())
    }
}
