use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
}

/// Heuristic verdict on extracted page text. Pages marked
/// `NeedsReprocessing` are kept as-is until an OCR pass exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageQuality {
    Clean,
    NeedsReprocessing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextChunk {
    pub ordinal: u32,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointPayload {
    pub doc_id: String,
    pub ordinal: u32,
    pub text: String,
    pub display_name: String,
    pub page_start: u32,
    pub page_end: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl IndexPoint {
    pub fn from_chunk(doc_id: &str, display_name: &str, chunk: &TextChunk, vector: Vec<f32>) -> Self {
        Self {
            id: point_id(doc_id, chunk.ordinal),
            vector,
            payload: PointPayload {
                doc_id: doc_id.to_string(),
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                display_name: display_name.to_string(),
                page_start: chunk.page_start,
                page_end: chunk.page_end,
            },
        }
    }
}

/// Point key derived from the owning document and the chunk position, so
/// re-ingesting the same chunks overwrites instead of duplicating.
pub fn point_id(doc_id: &str, ordinal: u32) -> String {
    format!("{doc_id}-{ordinal:05}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentFilter {
    pub doc_ids: BTreeSet<String>,
}

impl DocumentFilter {
    pub fn any_of<I, S>(doc_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            doc_ids: doc_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, doc_id: &str) -> bool {
        self.doc_ids.contains(doc_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub doc_id: String,
    pub chunk_ordinal: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, document_ids: Option<Vec<String>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            document_ids,
            citations: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        document_ids: Option<Vec<String>>,
        citations: Option<Vec<Citation>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            document_ids,
            citations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub target_documents: Option<BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub message_count: usize,
    pub target_documents: Option<BTreeSet<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            message_count: session.messages.len(),
            target_documents: session.target_documents.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub id: String,
    pub name: String,
    pub status: DocumentStatus,
    pub upload_date: Option<DateTime<Utc>>,
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInfo {
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub doc_id: String,
    pub display_name: String,
    pub chunk_count: usize,
    pub flagged_pages: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AskOutcome {
    pub session_id: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub recent_history: Vec<ChatMessage>,
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SingleTurnAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone)]
pub struct RagOptions {
    pub chunk_target_chars: usize,
    pub chunk_overlap_chars: usize,
    pub chunk_ceiling_chars: usize,
    pub top_k: usize,
    pub history_window: usize,
    pub recent_history: usize,
    pub naming_excerpt_chars: usize,
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            chunk_target_chars: 700,
            chunk_overlap_chars: 80,
            chunk_ceiling_chars: 750,
            top_k: 5,
            history_window: 6,
            recent_history: 10,
            naming_excerpt_chars: 1_000,
        }
    }
}
