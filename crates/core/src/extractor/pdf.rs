use super::file_stem;
use crate::chunking::normalize_whitespace;
use crate::classifier::{is_list_line, looks_like_heading_line};
use crate::error::IngestError;
use crate::models::{
    BoundingRegion, Fragment, FragmentContent, ImageData, ImageFormat, SourceRef,
};
use super::raster::{encode_png, RawImage};
use lopdf::xobject::PdfImage;
use lopdf::{Document, Object};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// One loaded PDF. The document is parsed once and pages are extracted on demand.
pub struct PdfExtractor {
    name: String,
    document: Document,
    pages: BTreeMap<u32, lopdf::ObjectId>,
}

impl PdfExtractor {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let name = file_stem(path)?;
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let pages = document.get_pages();

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        Ok(Self {
            name,
            document,
            pages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> Vec<SourceRef> {
        self.pages
            .keys()
            .map(|page| SourceRef::PdfPage {
                document: self.name.clone(),
                page: *page,
            })
            .collect()
    }

    pub fn extract_page(&self, page: u32) -> Result<Vec<Fragment>, IngestError> {
        let source_id = SourceRef::PdfPage {
            document: self.name.clone(),
            page,
        }
        .source_id();
        let page_id = *self
            .pages
            .get(&page)
            .ok_or_else(|| IngestError::UnknownSource(source_id.clone()))?;

        let text = self
            .document
            .extract_text(&[page])
            .map_err(|error| IngestError::PdfParse(format!("page {page}: {error}")))?;

        let mut contents = page_blocks(&text);

        match self.document.get_page_images(page_id) {
            Ok(images) => {
                for image in images {
                    let (bytes, format) = self.image_bytes(&image);
                    contents.push(FragmentContent::Image {
                        caption: None,
                        image: Some(ImageData {
                            bytes,
                            width: image.width.max(0) as u32,
                            height: image.height.max(0) as u32,
                            format,
                        }),
                        graphic_ref: Some(format!("obj-{}-{}", image.id.0, image.id.1)),
                    });
                }
            }
            Err(error) => {
                warn!(source = %source_id, %error, "could not read page images");
            }
        }

        debug!(source = %source_id, fragments = contents.len(), "extracted pdf page");

        Ok(contents
            .into_iter()
            .enumerate()
            .map(|(ordinal, content)| {
                let region = matches!(content, FragmentContent::Image { .. }).then_some(
                    BoundingRegion { page, rect: None },
                );
                Fragment {
                    source_id: source_id.clone(),
                    ordinal,
                    page: Some(page),
                    module_code: None,
                    element_id: None,
                    content,
                    region,
                }
            })
            .collect())
    }
}

impl PdfExtractor {
    /// Encoded images pass through unchanged. Raw pixel data is re-encoded as
    /// PNG when its layout is understood, and kept raw otherwise.
    fn image_bytes(&self, image: &PdfImage<'_>) -> (Vec<u8>, ImageFormat) {
        let format = image_format(image.filters.as_deref());
        if format != ImageFormat::Raw {
            return (image.content.to_vec(), format);
        }

        let predictor = image
            .origin_dict
            .get(b"DecodeParms")
            .and_then(Object::as_dict)
            .and_then(|params| params.get(b"Predictor"))
            .and_then(Object::as_i64)
            .ok();
        let raw = RawImage {
            data: image.content,
            filters: image.filters.as_deref().unwrap_or_default(),
            width: image.width.max(0) as u32,
            height: image.height.max(0) as u32,
            color_space: image.color_space.as_deref(),
            bits_per_component: image.bits_per_component,
            predictor,
        };
        match encode_png(&raw) {
            Ok(png) => (png, ImageFormat::Png),
            Err(error) => {
                debug!(document = %self.name, object = ?image.id, %error, "keeping raw image data");
                (image.content.to_vec(), ImageFormat::Raw)
            }
        }
    }
}

fn image_format(filters: Option<&[String]>) -> ImageFormat {
    let Some(filters) = filters else {
        return ImageFormat::Raw;
    };
    match filters.last().map(String::as_str) {
        Some("DCTDecode") => ImageFormat::Jpeg,
        Some("JPXDecode") => ImageFormat::Jpeg2000,
        Some("FlateDecode") | Some("LZWDecode") | Some("RunLengthDecode") | None => {
            ImageFormat::Raw
        }
        Some(_) => ImageFormat::Unknown,
    }
}

#[derive(Debug, PartialEq)]
enum LineShape {
    Plain,
    Bullet,
    Cells(usize),
}

fn line_shape(line: &str) -> LineShape {
    if is_list_line(line) {
        return LineShape::Bullet;
    }
    match split_cells(line) {
        Some(cells) => LineShape::Cells(cells.len()),
        None => LineShape::Plain,
    }
}

/// Splits a table-looking line on `|`, tabs, or runs of two or more spaces.
///
/// Space-aligned columns need at least three cells, and no cell before the
/// last may close a sentence; otherwise the line is prose with wide gaps.
pub(crate) fn split_cells(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if trimmed.contains('|') {
        let cells = trimmed
            .trim_matches('|')
            .split('|')
            .map(|cell| cell.trim().to_string())
            .collect::<Vec<_>>();
        return (cells.len() >= 2).then_some(cells);
    }
    if trimmed.contains('\t') {
        let cells = trimmed
            .split('\t')
            .map(|cell| cell.trim().to_string())
            .filter(|cell| !cell.is_empty())
            .collect::<Vec<_>>();
        return (cells.len() >= 2).then_some(cells);
    }
    if !trimmed.contains("  ") {
        return None;
    }

    let cells = trimmed
        .split("  ")
        .map(|cell| cell.trim().to_string())
        .filter(|cell| !cell.is_empty())
        .collect::<Vec<_>>();
    let ends_sentence = |cell: &String| cell.ends_with(['.', ';', ':', '?', '!']);
    let prose = cells
        .split_last()
        .is_some_and(|(_, leading)| leading.iter().any(ends_sentence));
    (cells.len() >= 3 && !prose).then_some(cells)
}

/// Turns one page of extracted text into layout blocks in reading order.
///
/// Blank lines end paragraphs. Inside a paragraph run, consecutive lines with
/// the same cell count become a table, bullet lines become a list, and a lone
/// heading-looking first line is split off so it can be classified on its own.
pub fn page_blocks(text: &str) -> Vec<FragmentContent> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
        } else {
            paragraph.push(line);
        }
    }
    flush_paragraph(&mut paragraph, &mut blocks);

    blocks
}

fn flush_paragraph<'a>(lines: &mut Vec<&'a str>, blocks: &mut Vec<FragmentContent>) {
    if lines.is_empty() {
        return;
    }

    let mut runs: Vec<(LineShape, Vec<&str>)> = Vec::new();
    for line in lines.drain(..) {
        let shape = line_shape(line);
        match runs.last_mut() {
            Some((LineShape::Bullet, items)) if shape == LineShape::Plain => items.push(line),
            Some((last, items)) if *last == shape => items.push(line),
            _ => runs.push((shape, vec![line])),
        }
    }

    let mut plain: Vec<&str> = Vec::new();
    for (shape, run) in runs {
        match shape {
            LineShape::Cells(_) if run.len() >= 2 => {
                push_plain(&mut plain, blocks);
                let rows = run.iter().filter_map(|line| split_cells(line)).collect();
                blocks.push(FragmentContent::Table {
                    caption: None,
                    rows,
                });
            }
            LineShape::Bullet => {
                push_plain(&mut plain, blocks);
                blocks.push(FragmentContent::List(list_items(&run)));
            }
            _ => plain.extend(run),
        }
    }
    push_plain(&mut plain, blocks);
}

fn push_plain(lines: &mut Vec<&str>, blocks: &mut Vec<FragmentContent>) {
    if lines.is_empty() {
        return;
    }

    let mut body = &lines[..];
    if body.len() > 1 && looks_like_heading_line(body[0], 100) {
        blocks.push(FragmentContent::TextBlock(normalize_whitespace(body[0])));
        body = &body[1..];
    }

    let joined = normalize_whitespace(&body.join(" "));
    if !joined.is_empty() {
        blocks.push(FragmentContent::TextBlock(joined));
    }
    lines.clear();
}

fn list_items(lines: &[&str]) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for line in lines {
        let normalized = normalize_whitespace(line);
        match items.last_mut() {
            Some(last) if !is_list_line(line) => {
                last.push(' ');
                last.push_str(&normalized);
            }
            _ => items.push(normalized),
        }
    }
    items
}
