use crate::extractor::parse_tagged_pages;
use crate::models::{RagOptions, TextChunk};
use regex::Regex;
use std::sync::OnceLock;

/// Appended to chunks cut down to the ceiling. Counted inside the ceiling.
pub const TRUNCATION_MARKER: &str = " […]";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
    pub ceiling_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&RagOptions::default())
    }
}

impl From<&RagOptions> for ChunkingConfig {
    fn from(value: &RagOptions) -> Self {
        Self {
            target_chars: value.chunk_target_chars,
            overlap_chars: value.chunk_overlap_chars,
            ceiling_chars: value.chunk_ceiling_chars,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn paragraph_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("paragraph pattern is valid"))
}

struct Draft {
    text: String,
    page_start: u32,
    page_end: u32,
}

pub fn build_chunks(tagged_text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let target = config.target_chars.max(1);
    // Oversized paragraphs leave room for the overlap carried into the next chunk.
    let piece_limit = target
        .saturating_sub(config.overlap_chars + 1)
        .max(target / 2)
        .max(1);

    let mut pieces: Vec<(u32, String)> = Vec::new();
    for (page, text) in parse_tagged_pages(tagged_text) {
        for paragraph in paragraph_break().split(&text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            for piece in split_oversized(paragraph, piece_limit) {
                pieces.push((page, piece));
            }
        }
    }

    let mut drafts: Vec<Draft> = Vec::new();
    let mut current: Option<Draft> = None;

    for (page, piece) in pieces {
        let fits = current
            .as_ref()
            .is_some_and(|draft| char_len(&draft.text) + 2 + char_len(&piece) <= target);

        current = Some(match current.take() {
            Some(mut draft) if fits => {
                draft.text.push_str("\n\n");
                draft.text.push_str(&piece);
                draft.page_end = page;
                draft
            }
            Some(done) => {
                let budget = target.saturating_sub(char_len(&piece) + 1);
                let overlap = overlap_tail(&done.text, config.overlap_chars.min(budget));
                let next = if overlap.is_empty() {
                    Draft {
                        text: piece,
                        page_start: page,
                        page_end: page,
                    }
                } else {
                    Draft {
                        text: format!("{overlap} {piece}"),
                        page_start: done.page_end,
                        page_end: page,
                    }
                };
                drafts.push(done);
                next
            }
            None => Draft {
                text: piece,
                page_start: page,
                page_end: page,
            },
        });
    }
    drafts.extend(current);

    drafts
        .into_iter()
        .filter_map(|draft| {
            let trimmed = draft.text.trim();
            if trimmed.is_empty() {
                return None;
            }
            let text = enforce_ceiling(trimmed, config.ceiling_chars);
            Some(Draft {
                text,
                page_start: draft.page_start,
                page_end: draft.page_end,
            })
        })
        .enumerate()
        .map(|(ordinal, draft)| TextChunk {
            ordinal: ordinal as u32,
            text: draft.text,
            page_start: draft.page_start,
            page_end: draft.page_end,
        })
        .collect()
}

/// Cuts `text` so that it fits in `ceiling` characters including the
/// truncation marker, preferring the last sentence end or newline.
pub fn enforce_ceiling(text: &str, ceiling: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= ceiling {
        return text.to_string();
    }

    let limit = ceiling.saturating_sub(char_len(TRUNCATION_MARKER));
    let window = &chars[..limit];
    let boundary = window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|index| index + 1);

    let mut kept: String = match boundary {
        Some(cut) => window[..cut].iter().collect::<String>().trim_end().to_string(),
        None => String::new(),
    };
    if kept.is_empty() {
        kept = window.iter().collect::<String>().trim_end().to_string();
    }

    kept.push_str(TRUNCATION_MARKER);
    kept
}

fn overlap_tail(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.trim().to_string();
    }

    let tail = &chars[chars.len() - max_chars..];
    let start = if chars[chars.len() - max_chars - 1].is_whitespace() {
        0
    } else {
        match tail.iter().position(|c| c.is_whitespace()) {
            Some(index) => index + 1,
            None => return String::new(),
        }
    };

    tail[start..].iter().collect::<String>().trim().to_string()
}

fn split_oversized(paragraph: &str, target: usize) -> Vec<String> {
    if char_len(paragraph) <= target {
        return vec![paragraph.to_string()];
    }

    let mut units = Vec::new();
    for sentence in split_sentences(paragraph) {
        if char_len(&sentence) <= target {
            units.push(sentence);
            continue;
        }
        for word in sentence.split_whitespace() {
            if char_len(word) <= target {
                units.push(word.to_string());
            } else {
                let chars: Vec<char> = word.chars().collect();
                units.extend(chars.chunks(target).map(|part| part.iter().collect::<String>()));
            }
        }
    }

    let mut packed: Vec<String> = Vec::new();
    let mut current = String::new();
    for unit in units {
        if current.is_empty() {
            current = unit;
        } else if char_len(&current) + 1 + char_len(&unit) <= target {
            current.push(' ');
            current.push_str(&unit);
        } else {
            packed.push(std::mem::take(&mut current));
            current = unit;
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_trimmed(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        let at_terminator = matches!(c, '.' | '!' | '?');
        if at_terminator && chars.peek().map_or(true, |next| next.is_whitespace()) {
            push_trimmed(&mut sentences, &mut current);
        }
    }
    push_trimmed(&mut sentences, &mut current);
    sentences
}

fn push_trimmed(target: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
    current.clear();
}
