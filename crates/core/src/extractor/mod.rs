pub mod pdf;
mod raster;
pub mod xml;

pub use pdf::{page_blocks, PdfExtractor};
pub use xml::{extract_module, parse_module};

use crate::error::IngestError;
use crate::models::{Fragment, SourceRef};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Produces fragments for one source at a time, in reading order.
///
/// Extraction must be repeatable: the same source always yields the same
/// fragments, which is what makes chunk ids stable across runs.
pub trait SourceExtractor: Send + Sync {
    fn sources(&self) -> Vec<SourceRef>;

    fn extract(&self, source: &SourceRef) -> Result<Vec<Fragment>, IngestError>;

    /// Inputs that could not be opened at all and therefore contribute no sources.
    fn unreadable(&self) -> Vec<SkippedDocument> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub fn discover_files(folder: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, "pdf")
}

pub fn discover_data_modules(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, "xml")
}

pub(crate) fn file_stem(path: &Path) -> Result<String, IngestError> {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// PDF documents plus XML data modules, exposed as one ordered list of sources.
#[derive(Default)]
pub struct CorpusExtractor {
    documents: Vec<PdfExtractor>,
    modules: Vec<(String, PathBuf)>,
    skipped: Vec<SkippedDocument>,
}

impl CorpusExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every PDF and registers every data module found under `xml_roots`.
    /// Files that cannot be opened are remembered and reported, not fatal.
    pub fn open(pdf_paths: &[PathBuf], xml_roots: &[PathBuf]) -> Self {
        let mut corpus = Self::new();

        for path in pdf_paths {
            match PdfExtractor::open(path) {
                Ok(document) => corpus.documents.push(document),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable pdf");
                    corpus.skipped.push(SkippedDocument {
                        path: path.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        for root in xml_roots {
            let files = if root.is_file() {
                vec![root.clone()]
            } else {
                discover_data_modules(root)
            };
            for path in files {
                corpus.add_module(path);
            }
        }

        corpus
    }

    fn add_module(&mut self, path: PathBuf) {
        match file_stem(&path) {
            Ok(module) => self.modules.push((module, path)),
            Err(error) => self.skipped.push(SkippedDocument {
                path,
                reason: error.to_string(),
            }),
        }
    }
}

impl SourceExtractor for CorpusExtractor {
    fn sources(&self) -> Vec<SourceRef> {
        let pages = self.documents.iter().flat_map(PdfExtractor::sources);
        let modules = self
            .modules
            .iter()
            .map(|(module, path)| SourceRef::XmlModule {
                module: module.clone(),
                path: path.clone(),
            });
        pages.chain(modules).collect()
    }

    fn extract(&self, source: &SourceRef) -> Result<Vec<Fragment>, IngestError> {
        match source {
            SourceRef::PdfPage { document, page } => self
                .documents
                .iter()
                .find(|candidate| candidate.name() == document)
                .ok_or_else(|| IngestError::UnknownSource(source.source_id()))?
                .extract_page(*page),
            SourceRef::XmlModule { module, path } => extract_module(path, module),
        }
    }

    fn unreadable(&self) -> Vec<SkippedDocument> {
        self.skipped.clone()
    }
}
