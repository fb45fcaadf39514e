use crate::models::{ChatMessage, ScoredPoint};

pub const NO_RESULTS_SCOPED: &str =
    "I couldn't find any relevant information in the selected documents. \
     Try widening the document selection or rephrasing the question.";
pub const NO_RESULTS_UNSCOPED: &str =
    "I couldn't find any relevant information in your documents. \
     Try rephrasing the question or uploading a document that covers it.";
pub const APOLOGY: &str =
    "I'm sorry, I wasn't able to produce an answer from the retrieved documents.";
pub const UNTITLED_DOCUMENT: &str = "Untitled document";

const DISPLAY_NAME_MAX_CHARS: usize = 80;
const DISPLAY_NAME_MIN_CHARS: usize = 3;

pub fn no_results_message(scoped: bool) -> &'static str {
    if scoped {
        NO_RESULTS_SCOPED
    } else {
        NO_RESULTS_UNSCOPED
    }
}

pub fn build_answer_prompt(question: &str, hits: &[ScoredPoint], history: &[ChatMessage]) -> String {
    let mut prompt = String::from(
        "You are a document assistant. Answer the question using only the numbered context passages below.\n",
    );

    if !history.is_empty() {
        prompt.push_str(
            "Stay consistent with the conversation history; resolve references such as \"it\" or \"that\" against it.\n",
        );
        prompt.push_str("\nConversation history:\n");
        for message in history {
            prompt.push_str(message.role.label());
            prompt.push_str(": ");
            prompt.push_str(message.content.trim());
            prompt.push('\n');
        }
    }

    prompt.push_str("\nContext:\n");
    for (index, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!("[#{}] {}\n", index + 1, hit.payload.text.trim()));
    }

    prompt.push_str(
        "\nCite the passages you rely on with [#index] notation, for example [#1] or [#2]. \
         If the context does not contain the answer, say so.\n",
    );
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question.trim());
    prompt.push_str("\nAnswer:");
    prompt
}

pub fn build_naming_prompt(excerpt: &str) -> String {
    format!(
        "Suggest a short, descriptive title (at most eight words) for the document excerpt below. \
         Reply with the title only, without quotes.\n\nExcerpt:\n{}\n\nTitle:",
        excerpt.trim()
    )
}

pub fn clean_display_name(raw: &str) -> Option<String> {
    let first_line = raw.trim().lines().next()?.trim();
    let unquoted = first_line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
        .trim();
    let capped: String = unquoted.chars().take(DISPLAY_NAME_MAX_CHARS).collect();
    let capped = capped.trim_end().to_string();

    (capped.chars().count() >= DISPLAY_NAME_MIN_CHARS).then_some(capped)
}

pub fn excerpt_at_word_boundary(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(max_chars).collect();
    match head.rfind(char::is_whitespace) {
        Some(cut) if cut > 0 => head[..cut].trim_end().to_string(),
        _ => head,
    }
}
