use crate::config::ClassifierConfig;
use crate::error::IngestError;
use crate::models::{ClassifiedContent, ClassifiedFragment, Fragment, FragmentContent};
use regex::Regex;

const UNKNOWN_CHAPTER: &str = "Unknown";
const MAX_IMPORTANCE: u8 = 5;
const BULLETS: [&str; 7] = ["-", "*", "•", "–", "▪", "◦", "·"];

/// Neighbourhood of a fragment within its source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyContext<'a> {
    pub preceding: &'a [Fragment],
    pub following: &'a [Fragment],
    /// Chapter carried over from earlier fragments of the same source.
    pub chapter: Option<&'a str>,
}

pub struct Classifier {
    config: ClassifierConfig,
    chapter_marker: Regex,
    normative: Regex,
    domain_terms: Regex,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, IngestError> {
        Ok(Self {
            config,
            chapter_marker: Regex::new(r"(?i)\bchapter\s+(\d+(?:\.\d+)*)")?,
            normative: Regex::new(r"(?i)\b(shall|must|mandatory|critical|warning|caution)\b")?,
            domain_terms: Regex::new(
                r"(?i)\b(business rules?|data modules?|publication modules?|applicability|brex|csdb|ietm|common source database)\b",
            )?,
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classifies every fragment of one source in reading order, carrying the
    /// chapter forward from each heading.
    pub fn classify_source(&self, fragments: &[Fragment]) -> Vec<ClassifiedFragment> {
        let window = self.config.context_window;
        let mut chapter: Option<String> = None;
        let mut classified = Vec::with_capacity(fragments.len());

        for (index, fragment) in fragments.iter().enumerate() {
            let following_end = (index + 1 + window).min(fragments.len());
            let context = ClassifyContext {
                preceding: &fragments[index.saturating_sub(window)..index],
                following: &fragments[index + 1..following_end],
                chapter: chapter.as_deref(),
            };
            let result = self.classify(fragment, &context);
            if matches!(result.content, ClassifiedContent::Heading { .. }) {
                chapter = Some(result.chapter.clone());
            }
            classified.push(result);
        }

        classified
    }

    pub fn classify(&self, fragment: &Fragment, context: &ClassifyContext<'_>) -> ClassifiedFragment {
        let content = match &fragment.content {
            FragmentContent::Heading(text) => self.heading(text),
            FragmentContent::Table { caption, rows } => ClassifiedContent::Table {
                caption: caption.clone(),
                rows: rows.clone(),
            },
            FragmentContent::Image {
                caption,
                image,
                graphic_ref,
            } => ClassifiedContent::Diagram {
                caption: caption.clone(),
                graphic_ref: graphic_ref.clone(),
                image: image.clone(),
                ocr_text: String::new(),
            },
            FragmentContent::List(items) => ClassifiedContent::List(items.clone()),
            FragmentContent::TextBlock(text) => self.text_block(text, context.following),
        };

        let chapter = match &content {
            ClassifiedContent::Heading { text, .. } => self.heading_chapter(text),
            _ => context
                .chapter
                .map(str::to_string)
                .or_else(|| self.nearest_preceding_heading(context.preceding))
                .unwrap_or_else(|| UNKNOWN_CHAPTER.to_string()),
        };
        let importance = self.importance(&content);

        ClassifiedFragment {
            source_id: fragment.source_id.clone(),
            ordinal: fragment.ordinal,
            page: fragment.page,
            module_code: fragment.module_code.clone(),
            element_id: fragment.element_id.clone(),
            region: fragment.region,
            content,
            importance,
            chapter,
        }
    }

    fn text_block(&self, text: &str, following: &[Fragment]) -> ClassifiedContent {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        if lines.len() >= 2 && lines.iter().all(|line| is_list_line(line)) {
            return ClassifiedContent::List(lines.iter().map(|line| line.to_string()).collect());
        }

        if let Some(rows) = pipe_table(&lines) {
            return ClassifiedContent::Table {
                caption: None,
                rows,
            };
        }

        if lines.len() == 1 && self.is_heading_text(lines[0], following) {
            return self.heading(lines[0]);
        }

        ClassifiedContent::Text(text.to_string())
    }

    fn is_heading_text(&self, line: &str, following: &[Fragment]) -> bool {
        if !heading_shape(line, self.config.heading_max_chars) {
            return false;
        }
        if has_heading_marker(line) || self.chapter_marker.is_match(line) {
            return true;
        }

        let length = line.chars().count();
        following.first().is_some_and(|next| {
            matches!(
                next.content,
                FragmentContent::TextBlock(_) | FragmentContent::List(_)
            ) && next.content.plain_text().trim().chars().count() > length
        })
    }

    fn heading(&self, text: &str) -> ClassifiedContent {
        let level = self
            .numbering(text)
            .map(|numbering| numbering.split('.').count().min(u8::MAX as usize) as u8)
            .unwrap_or(1);
        ClassifiedContent::Heading {
            text: text.trim().to_string(),
            level,
        }
    }

    fn numbering(&self, text: &str) -> Option<String> {
        if let Some(captures) = self.chapter_marker.captures(text) {
            return captures.get(1).map(|found| found.as_str().to_string());
        }
        leading_numbering(text).map(str::to_string)
    }

    fn heading_chapter(&self, text: &str) -> String {
        self.numbering(text).unwrap_or_else(|| text.trim().to_string())
    }

    fn nearest_preceding_heading(&self, preceding: &[Fragment]) -> Option<String> {
        preceding.iter().rev().find_map(|fragment| match &fragment.content {
            FragmentContent::Heading(text) => Some(self.heading_chapter(text)),
            _ => None,
        })
    }

    fn importance(&self, content: &ClassifiedContent) -> u8 {
        let text = match content {
            ClassifiedContent::Text(text) | ClassifiedContent::Heading { text, .. } => text.clone(),
            ClassifiedContent::Table { caption, rows } => {
                let mut lines = caption.iter().cloned().collect::<Vec<_>>();
                lines.extend(rows.iter().map(|row| row.join(" ")));
                lines.join("\n")
            }
            ClassifiedContent::Diagram { caption, .. } => caption.clone().unwrap_or_default(),
            ClassifiedContent::List(items) => items.join("\n"),
        };

        let mut score = 1u8;
        if matches!(content, ClassifiedContent::Heading { .. }) {
            score += 1;
        }
        if matches!(
            content,
            ClassifiedContent::Table { .. } | ClassifiedContent::Diagram { .. }
        ) {
            score += 1;
        }
        if self.normative.is_match(&text) {
            score += 1;
        }
        if self.domain_terms.is_match(&text) {
            score += 1;
        }
        if self.chapter_marker.is_match(&text) {
            score += 1;
        }
        score.min(MAX_IMPORTANCE)
    }
}

/// Bulleted (`- item`, `• item`) or enumerated (`1) item`, `(a) item`) line.
pub(crate) fn is_list_line(line: &str) -> bool {
    let Some((marker, rest)) = line.trim_start().split_once(' ') else {
        return false;
    };
    if rest.trim().is_empty() {
        return false;
    }
    if BULLETS.contains(&marker) {
        return true;
    }
    let inner = marker.strip_prefix('(').unwrap_or(marker);
    inner.strip_suffix(')').is_some_and(|label| {
        !label.is_empty() && label.len() <= 3 && label.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

/// Short, single, unpunctuated line that also carries a strong heading marker.
pub(crate) fn looks_like_heading_line(line: &str, max_chars: usize) -> bool {
    heading_shape(line, max_chars) && has_heading_marker(line)
}

fn heading_shape(line: &str, max_chars: usize) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && !trimmed.contains('\n')
        && trimmed.chars().count() <= max_chars
        && trimmed.chars().any(char::is_alphabetic)
        && !trimmed.ends_with(['.', ',', ';', ':', '?', '!'])
        && !is_list_line(trimmed)
}

fn has_heading_marker(line: &str) -> bool {
    let trimmed = line.trim();
    if leading_numbering(trimmed).is_some() {
        return true;
    }
    let lowered = trimmed.to_lowercase();
    if lowered
        .strip_prefix("chapter ")
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
    {
        return true;
    }
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).collect::<Vec<_>>();
    letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase())
}

/// `2.5.2 Business rules` → `2.5.2`; the number must be followed by a word.
fn leading_numbering(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    let (first, rest) = trimmed.split_once(char::is_whitespace)?;
    let numbering = first.trim_end_matches('.');
    let well_formed = !numbering.is_empty()
        && numbering
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    let followed_by_word = rest
        .trim_start()
        .starts_with(|c: char| c.is_alphabetic());
    (well_formed && followed_by_word).then_some(numbering)
}

fn pipe_table(lines: &[&str]) -> Option<Vec<Vec<String>>> {
    if lines.len() < 2 || !lines.iter().all(|line| line.contains('|')) {
        return None;
    }
    let rows = lines
        .iter()
        .map(|line| {
            line.trim()
                .trim_matches('|')
                .split('|')
                .map(|cell| cell.trim().to_string())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let width = rows[0].len();
    (width >= 2 && rows.iter().all(|row| row.len() == width)).then_some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::page_blocks;
    use crate::models::ContentType;

    fn classifier() -> Classifier {
        Classifier::new(ClassifierConfig::default()).expect("patterns should compile")
    }

    fn fragments(contents: Vec<FragmentContent>) -> Vec<Fragment> {
        contents
            .into_iter()
            .enumerate()
            .map(|(ordinal, content)| Fragment {
                source_id: "spec#p12".to_string(),
                ordinal,
                page: Some(12),
                module_code: None,
                element_id: None,
                content,
                region: None,
            })
            .collect()
    }

    #[test]
    fn page_with_heading_paragraphs_and_table() {
        let page = "1.2 Brake system\n\n\
            The brake system shall be inspected before each flight.\n\n\
            Worn pads must be replaced.\n\n\
            Component | Limit\nPad | 3 mm\n";
        let classified = classifier().classify_source(&fragments(page_blocks(page)));

        let types = classified
            .iter()
            .map(ClassifiedFragment::content_type)
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![
                ContentType::Heading,
                ContentType::Text,
                ContentType::Text,
                ContentType::Table
            ]
        );
        assert!(classified.iter().all(|fragment| fragment.chapter == "1.2"));
        assert_eq!(
            classified[0].content,
            ClassifiedContent::Heading {
                text: "1.2 Brake system".to_string(),
                level: 2
            }
        );
    }

    #[test]
    fn headings_outrank_plain_body_text() {
        let classified = classifier().classify_source(&fragments(vec![
            FragmentContent::TextBlock("3.1 Wheel assembly".to_string()),
            FragmentContent::TextBlock("The wheel is attached with four bolts.".to_string()),
        ]));
        assert!(classified[0].importance > classified[1].importance);
    }

    #[test]
    fn importance_counts_keywords_and_structure() {
        let classifier = classifier();
        let context = ClassifyContext::default();
        let plain = fragments(vec![FragmentContent::TextBlock(
            "The seat is adjustable.".to_string(),
        )]);
        let normative = fragments(vec![FragmentContent::TextBlock(
            "Each project shall define business rules in a BREX data module.".to_string(),
        )]);
        let table = fragments(vec![FragmentContent::Table {
            caption: None,
            rows: vec![vec!["a".to_string(), "b".to_string()]],
        }]);

        assert_eq!(classifier.classify(&plain[0], &context).importance, 1);
        assert_eq!(classifier.classify(&normative[0], &context).importance, 3);
        assert_eq!(classifier.classify(&table[0], &context).importance, 2);
    }

    #[test]
    fn short_unpunctuated_line_before_longer_body_is_a_heading() {
        let classified = classifier().classify_source(&fragments(vec![
            FragmentContent::TextBlock("Brake adjustment".to_string()),
            FragmentContent::TextBlock(
                "Turn the barrel adjuster until the pads clear the rim.".to_string(),
            ),
        ]));
        assert_eq!(classified[0].content_type(), ContentType::Heading);
        assert_eq!(classified[1].chapter, "Brake adjustment");
    }

    #[test]
    fn lone_short_line_without_marker_stays_text() {
        let classified =
            classifier().classify_source(&fragments(vec![FragmentContent::TextBlock(
                "see figure".to_string(),
            )]));
        assert_eq!(classified[0].content_type(), ContentType::Text);
        assert_eq!(classified[0].chapter, UNKNOWN_CHAPTER);
    }

    #[test]
    fn bullet_and_pipe_blocks_are_restructured() {
        let classifier = classifier();
        let context = ClassifyContext::default();
        let blocks = fragments(vec![
            FragmentContent::TextBlock("- Remove the wheel\n- Inspect the disc".to_string()),
            FragmentContent::TextBlock("Item | Nm\nAxle nut | 35".to_string()),
        ]);

        assert_eq!(
            classifier.classify(&blocks[0], &context).content,
            ClassifiedContent::List(vec![
                "- Remove the wheel".to_string(),
                "- Inspect the disc".to_string()
            ])
        );
        assert_eq!(
            classifier.classify(&blocks[1], &context).content_type(),
            ContentType::Table
        );
    }

    #[test]
    fn images_are_always_diagrams() {
        let classified = classifier().classify_source(&fragments(vec![
            FragmentContent::Heading("Chapter 4 Brakes".to_string()),
            FragmentContent::Image {
                caption: Some("Caliper".to_string()),
                image: None,
                graphic_ref: Some("ICN-1".to_string()),
            },
        ]));
        assert_eq!(classified[1].content_type(), ContentType::Diagram);
        assert_eq!(classified[1].ocr_text(), Some(""));
        assert_eq!(classified[1].chapter, "4");
    }

    #[test]
    fn list_and_heading_line_helpers() {
        assert!(is_list_line("- Remove the wheel"));
        assert!(is_list_line("(a) Check tension"));
        assert!(is_list_line("2) Refit"));
        assert!(!is_list_line("2.5 Business rules"));
        assert!(!is_list_line("-"));

        assert!(looks_like_heading_line("2.5.2 Business rules", 100));
        assert!(looks_like_heading_line("GENERAL", 100));
        assert!(!looks_like_heading_line("The brake system shall be", 100));
        assert!(!looks_like_heading_line("1.2 Scope.", 100));
    }
}
