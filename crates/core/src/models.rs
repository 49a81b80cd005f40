use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A single extractable unit of the corpus: one PDF page or one XML data module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceRef {
    PdfPage { document: String, page: u32 },
    XmlModule { module: String, path: PathBuf },
}

impl SourceRef {
    pub fn source_id(&self) -> String {
        match self {
            Self::PdfPage { document, page } => format!("{document}#p{page}"),
            Self::XmlModule { module, .. } => module.clone(),
        }
    }

    pub fn page(&self) -> Option<u32> {
        match self {
            Self::PdfPage { page, .. } => Some(*page),
            Self::XmlModule { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub page: u32,
    pub rect: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Jpeg2000,
    Png,
    Raw,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentKind {
    TextBlock,
    Heading,
    Table,
    Image,
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentContent {
    TextBlock(String),
    Heading(String),
    Table {
        caption: Option<String>,
        rows: Vec<Vec<String>>,
    },
    Image {
        caption: Option<String>,
        image: Option<ImageData>,
        graphic_ref: Option<String>,
    },
    List(Vec<String>),
}

impl FragmentContent {
    pub fn kind(&self) -> FragmentKind {
        match self {
            Self::TextBlock(_) => FragmentKind::TextBlock,
            Self::Heading(_) => FragmentKind::Heading,
            Self::Table { .. } => FragmentKind::Table,
            Self::Image { .. } => FragmentKind::Image,
            Self::List(_) => FragmentKind::List,
        }
    }

    /// Textual view used by the classifier heuristics.
    pub fn plain_text(&self) -> String {
        match self {
            Self::TextBlock(text) | Self::Heading(text) => text.clone(),
            Self::Table { caption, rows } => {
                let mut lines = caption.iter().cloned().collect::<Vec<_>>();
                lines.extend(rows.iter().map(|row| row.join(" | ")));
                lines.join("\n")
            }
            Self::Image { caption, .. } => caption.clone().unwrap_or_default(),
            Self::List(items) => items.join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub source_id: String,
    pub ordinal: usize,
    pub page: Option<u32>,
    pub module_code: Option<String>,
    pub element_id: Option<String>,
    pub content: FragmentContent,
    pub region: Option<BoundingRegion>,
}

impl Fragment {
    pub fn kind(&self) -> FragmentKind {
        self.content.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Heading,
    Table,
    Diagram,
    List,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Text,
        ContentType::Heading,
        ContentType::Table,
        ContentType::Diagram,
        ContentType::List,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Heading => "heading",
            Self::Table => "table",
            Self::Diagram => "diagram",
            Self::List => "list",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ContentType::ALL
            .into_iter()
            .find(|content_type| content_type.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown content type: {value}"))
    }
}

/// Classified payload. Each variant carries what its chunking policy needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedContent {
    Text(String),
    Heading { text: String, level: u8 },
    Table {
        caption: Option<String>,
        rows: Vec<Vec<String>>,
    },
    Diagram {
        caption: Option<String>,
        graphic_ref: Option<String>,
        image: Option<ImageData>,
        ocr_text: String,
    },
    List(Vec<String>),
}

impl ClassifiedContent {
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Text(_) => ContentType::Text,
            Self::Heading { .. } => ContentType::Heading,
            Self::Table { .. } => ContentType::Table,
            Self::Diagram { .. } => ContentType::Diagram,
            Self::List(_) => ContentType::List,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFragment {
    pub source_id: String,
    pub ordinal: usize,
    pub page: Option<u32>,
    pub module_code: Option<String>,
    pub element_id: Option<String>,
    pub region: Option<BoundingRegion>,
    pub content: ClassifiedContent,
    pub importance: u8,
    pub chapter: String,
}

impl ClassifiedFragment {
    pub fn content_type(&self) -> ContentType {
        self.content.content_type()
    }

    pub fn ocr_text(&self) -> Option<&str> {
        match &self.content {
            ClassifiedContent::Diagram { ocr_text, .. } => Some(ocr_text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    pub page: Option<u32>,
    pub chapter: String,
    pub content_type: ContentType,
    pub importance: u8,
    pub module_code: Option<String>,
    pub element_id: Option<String>,
    pub fragment_ordinal: usize,
    pub chunk_index: usize,
    pub region: Option<BoundingRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Conjunction of metadata predicates applied by the vector index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Exact chapter or dotted prefix (`2.5` matches `2.5.2`).
    pub chapter: Option<String>,
    pub content_type: Option<ContentType>,
    pub min_importance: Option<u8>,
    pub page: Option<u32>,
    pub module_code: Option<String>,
}

impl SearchFilters {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(chapter) = &self.chapter {
            if !chapter_matches(&metadata.chapter, chapter) {
                return false;
            }
        }
        if let Some(content_type) = self.content_type {
            if metadata.content_type != content_type {
                return false;
            }
        }
        if let Some(min_importance) = self.min_importance {
            if metadata.importance < min_importance {
                return false;
            }
        }
        if let Some(page) = self.page {
            if metadata.page != Some(page) {
                return false;
            }
        }
        if let Some(module_code) = &self.module_code {
            if metadata.module_code.as_deref() != Some(module_code.as_str()) {
                return false;
            }
        }
        true
    }
}

fn chapter_matches(chapter: &str, filter: &str) -> bool {
    let filter = filter.trim();
    if filter.is_empty() || chapter == filter {
        return true;
    }
    chapter
        .strip_prefix(filter)
        .is_some_and(|rest| rest.starts_with('.'))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub per_content_type: std::collections::BTreeMap<ContentType, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    All,
    Sources(std::collections::BTreeSet<String>),
    Pages { start: u32, end: u32 },
}

impl ResetScope {
    pub fn covers(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            Self::All => true,
            Self::Sources(ids) => ids.contains(&metadata.source_id),
            Self::Pages { start, end } => metadata
                .page
                .is_some_and(|page| page >= *start && page <= *end),
        }
    }
}
