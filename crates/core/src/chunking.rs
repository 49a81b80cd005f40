use crate::config::{ChunkPolicy, ChunkingConfig};
use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata, ClassifiedContent, ClassifiedFragment, ContentType};
use sha2::{Digest, Sha256};

pub const OCR_SEPARATOR: &str = "\n\nText recognized in figure:\n";

const TEXT_SEPARATORS: [&str; 4] = ["\n\n", ". ", "\n", " "];
const HEADING_SEPARATORS: [&str; 2] = ["\n", " "];
const LIST_SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable id of the chunk starting at `offset` characters into a fragment.
pub fn make_chunk_id(source_id: &str, fragment_ordinal: usize, offset: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update((fragment_ordinal as u64).to_le_bytes());
    hasher.update((offset as u64).to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Caption line first, then one `cell | cell` line per row.
pub fn serialize_table(caption: Option<&str>, rows: &[Vec<String>]) -> String {
    let mut lines = caption
        .map(str::trim)
        .filter(|caption| !caption.is_empty())
        .map(str::to_string)
        .into_iter()
        .collect::<Vec<_>>();
    lines.extend(rows.iter().map(|row| row.join(" | ")));
    lines.join("\n")
}

/// Caption plus recognized text. Without a caption a label is derived from the
/// graphic reference or page so the chunk is never empty.
pub fn diagram_text(
    caption: Option<&str>,
    graphic_ref: Option<&str>,
    page: Option<u32>,
    ocr_text: &str,
) -> String {
    let label = match caption.map(str::trim).filter(|caption| !caption.is_empty()) {
        Some(caption) => caption.to_string(),
        None => match (graphic_ref, page) {
            (Some(reference), _) => format!("Figure {reference}"),
            (None, Some(page)) => format!("Figure on page {page}"),
            (None, None) => "Figure".to_string(),
        },
    };

    let ocr_text = ocr_text.trim();
    if ocr_text.is_empty() {
        label
    } else {
        format!("{label}{OCR_SEPARATOR}{ocr_text}")
    }
}

pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn chunk_all(&self, fragments: &[ClassifiedFragment]) -> Vec<Chunk> {
        fragments
            .iter()
            .flat_map(|fragment| self.chunk(fragment))
            .collect()
    }

    pub fn chunk(&self, fragment: &ClassifiedFragment) -> Vec<Chunk> {
        let pieces = match &fragment.content {
            ClassifiedContent::Text(text) => {
                self.windows(text, ContentType::Text, &TEXT_SEPARATORS)
            }
            ClassifiedContent::Heading { text, .. } => {
                self.windows(text, ContentType::Heading, &HEADING_SEPARATORS)
            }
            ClassifiedContent::List(items) => {
                self.windows(&items.join("\n"), ContentType::List, &LIST_SEPARATORS)
            }
            ClassifiedContent::Table { caption, rows } => {
                whole(serialize_table(caption.as_deref(), rows))
            }
            ClassifiedContent::Diagram {
                caption,
                graphic_ref,
                ocr_text,
                ..
            } => whole(diagram_text(
                caption.as_deref(),
                graphic_ref.as_deref(),
                fragment.page,
                ocr_text,
            )),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (offset, text))| Chunk {
                chunk_id: make_chunk_id(&fragment.source_id, fragment.ordinal, offset),
                text,
                metadata: ChunkMetadata {
                    source_id: fragment.source_id.clone(),
                    page: fragment.page,
                    chapter: fragment.chapter.clone(),
                    content_type: fragment.content_type(),
                    importance: fragment.importance,
                    module_code: fragment.module_code.clone(),
                    element_id: fragment.element_id.clone(),
                    fragment_ordinal: fragment.ordinal,
                    chunk_index,
                    region: fragment.region,
                },
            })
            .collect()
    }

    fn windows(
        &self,
        text: &str,
        content_type: ContentType,
        separators: &[&str],
    ) -> Vec<(usize, String)> {
        match self.config.policy(content_type) {
            Some(policy) => split_windows(text, policy, separators),
            None => whole(text.trim().to_string()),
        }
    }
}

fn whole(text: String) -> Vec<(usize, String)> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![(0, text)]
    }
}

/// Sliding character window. Each piece is `(char offset, text)`.
///
/// Breaks at the first separator (in preference order) found late enough in the
/// window to make progress; a word longer than the window extends it to the
/// next whitespace. The next window starts `overlap` characters before the
/// previous end, moved forward to the start of a word.
pub fn split_windows(text: &str, policy: ChunkPolicy, separators: &[&str]) -> Vec<(usize, String)> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let separators = separators
        .iter()
        .map(|separator| separator.chars().collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let mut pieces = Vec::new();
    let mut start = skip_whitespace(&chars, 0);

    while start < total {
        let end = if total - start <= policy.size {
            total
        } else {
            break_point(&chars, start, policy, &separators)
        };

        let piece = chars[start..end].iter().collect::<String>();
        let piece = piece.trim_end();
        if !piece.is_empty() {
            pieces.push((start, piece.to_string()));
        }
        if end >= total {
            break;
        }

        let mut next = end.saturating_sub(policy.overlap).max(start + 1);
        if next > 0 && !chars[next - 1].is_whitespace() {
            while next < end && !chars[next].is_whitespace() {
                next += 1;
            }
        }
        next = skip_whitespace(&chars, next);
        start = if next <= start || next >= end { skip_whitespace(&chars, end) } else { next };
    }

    pieces
}

fn break_point(chars: &[char], start: usize, policy: ChunkPolicy, separators: &[Vec<char>]) -> usize {
    let limit = start + policy.size;
    let earliest = start + policy.overlap + 1;

    for separator in separators {
        if let Some(found) = rfind(chars, start, limit, separator) {
            let end = found + separator.len();
            if end >= earliest {
                return end;
            }
        }
    }

    // Single word wider than the window.
    let mut end = limit;
    while end < chars.len() && !chars[end].is_whitespace() {
        end += 1;
    }
    end
}

/// Last occurrence of `needle` lying entirely within `chars[from..to]`.
fn rfind(chars: &[char], from: usize, to: usize, needle: &[char]) -> Option<usize> {
    let to = to.min(chars.len());
    if needle.is_empty() || to < from + needle.len() {
        return None;
    }
    (from..=to - needle.len())
        .rev()
        .find(|&index| chars[index..index + needle.len()] == *needle)
}

fn skip_whitespace(chars: &[char], mut index: usize) -> usize {
    while index < chars.len() && chars[index].is_whitespace() {
        index += 1;
    }
    index
}
