use crate::error::IngestError;
use crate::models::{DocumentKind, PageQuality};
use lopdf::Document;
use tracing::warn;

/// Pages below this share of alphabetic characters are likely garbled.
const MIN_ALPHABETIC_RATIO: f64 = 0.2;
const MIN_PAGE_CHARS: usize = 20;
const FORM_FEED: char = '\u{000c}';

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
    pub quality: PageQuality,
}

impl PageText {
    pub fn new(number: u32, text: String) -> Self {
        let quality = assess_page_quality(&text);
        Self {
            number,
            text,
            quality,
        }
    }

    pub fn needs_reprocessing(&self) -> bool {
        self.quality == PageQuality::NeedsReprocessing
    }
}

pub trait DocumentExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl DocumentExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) => pages.push(text),
                Err(error) => {
                    warn!(page = page_no, error = %error, "page text extraction failed");
                    pages.push(String::new());
                }
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse("pdf has no pages".to_string()));
        }

        Ok(pages)
    }
}

#[derive(Default)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
        let text = String::from_utf8_lossy(bytes);
        let mut pages: Vec<String> = text.split(FORM_FEED).map(str::to_string).collect();
        if pages.len() > 1 && pages.last().is_some_and(|page| page.trim().is_empty()) {
            pages.pop();
        }
        Ok(pages)
    }
}

/// Extracts and normalizes every page. Never fails: an unreadable document
/// comes back as a single empty page so ingestion can continue.
pub fn extract_page_texts(bytes: &[u8], kind: DocumentKind) -> Vec<PageText> {
    let extracted = match kind {
        DocumentKind::Pdf => LopdfExtractor.extract_pages(bytes),
        DocumentKind::Text => PlainTextExtractor.extract_pages(bytes),
    };

    match extracted {
        Ok(pages) => pages
            .iter()
            .enumerate()
            .map(|(index, raw)| PageText::new(index as u32 + 1, normalize_page_text(raw)))
            .collect(),
        Err(error) => {
            warn!(error = %error, ?kind, "extraction failed, continuing with empty text");
            vec![PageText::new(1, String::new())]
        }
    }
}

pub fn assess_page_quality(text: &str) -> PageQuality {
    if text.trim().chars().count() < MIN_PAGE_CHARS {
        return PageQuality::NeedsReprocessing;
    }

    let total = text.chars().count();
    let alphabetic = text.chars().filter(|c| c.is_alphabetic()).count();
    if (alphabetic as f64) / (total as f64) < MIN_ALPHABETIC_RATIO {
        PageQuality::NeedsReprocessing
    } else {
        PageQuality::Clean
    }
}

pub fn normalize_page_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;

    for line in raw.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !previous_blank {
                lines.push(String::new());
            }
            previous_blank = true;
        } else {
            lines.push(collapsed);
            previous_blank = false;
        }
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

const PAGE_OPEN_PREFIX: &str = "<page number=\"";
const PAGE_OPEN_SUFFIX: &str = "\">";
const PAGE_CLOSE: &str = "</page>";

pub fn tag_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| {
            format!(
                "{PAGE_OPEN_PREFIX}{}{PAGE_OPEN_SUFFIX}\n{}\n{PAGE_CLOSE}",
                page.number, page.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn parse_tagged_pages(tagged: &str) -> Vec<(u32, String)> {
    let mut pages = Vec::new();
    let mut current: Option<(u32, Vec<&str>)> = None;
    let mut untagged: Vec<&str> = Vec::new();

    for line in tagged.lines() {
        let trimmed = line.trim();
        if let Some(number) = parse_page_open(trimmed) {
            if let Some((open_number, body)) = current.take() {
                pages.push((open_number, body.join("\n")));
            }
            current = Some((number, Vec::new()));
        } else if trimmed == PAGE_CLOSE {
            if let Some((number, body)) = current.take() {
                pages.push((number, body.join("\n")));
            }
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        } else {
            untagged.push(line);
        }
    }

    if let Some((number, body)) = current.take() {
        pages.push((number, body.join("\n")));
    }

    if pages.is_empty() {
        let text = untagged.join("\n");
        if !text.trim().is_empty() {
            pages.push((1, text));
        }
    }

    pages
}

pub fn strip_page_markers(tagged: &str) -> String {
    parse_tagged_pages(tagged)
        .into_iter()
        .map(|(_, text)| text)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn count_tagged_pages(tagged: &str) -> u32 {
    tagged
        .lines()
        .filter(|line| parse_page_open(line.trim()).is_some())
        .count() as u32
}

fn parse_page_open(line: &str) -> Option<u32> {
    line.strip_prefix(PAGE_OPEN_PREFIX)?
        .strip_suffix(PAGE_OPEN_SUFFIX)?
        .parse()
        .ok()
}
