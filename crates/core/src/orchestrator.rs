use crate::chunking::{build_chunks, ChunkingConfig};
use crate::conversation::{citations_for, distinct_doc_ids, new_session_id, ConversationManager};
use crate::embeddings::EmbeddingService;
use crate::error::{RagError, Result};
use crate::extractor::{count_tagged_pages, extract_page_texts, strip_page_markers, tag_pages};
use crate::ingest::{detect_document_kind, digest_bytes, new_document_id, sniff_document_kind};
use crate::llm::extract_answer;
use crate::models::{
    AskOutcome, ChatMessage, DocumentFilter, DocumentKind, DocumentMetadata, DocumentStatus,
    IndexPoint, IngestOutcome, RagOptions, SingleTurnAnswer,
};
use crate::prompt::{
    build_answer_prompt, build_naming_prompt, clean_display_name, excerpt_at_word_boundary,
    no_results_message, APOLOGY, UNTITLED_DOCUMENT,
};
use crate::traits::{DocumentStore, LanguageModel, VectorIndex};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SUMMARY_CHARS: usize = 200;

pub struct RagPipeline {
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn DocumentStore>,
    model: Arc<dyn LanguageModel>,
    embeddings: EmbeddingService,
    conversations: ConversationManager,
    options: RagOptions,
}

impl RagPipeline {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
        model: Arc<dyn LanguageModel>,
        embeddings: EmbeddingService,
    ) -> Self {
        Self {
            index,
            store,
            model,
            embeddings,
            conversations: ConversationManager::new(),
            options: RagOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RagOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RagOptions {
        &self.options
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig::from(&self.options)
    }

    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<IngestOutcome> {
        if bytes.is_empty() {
            return Err(RagError::Validation(format!("{filename} is empty")));
        }
        let kind = detect_document_kind(filename, content_type).ok_or_else(|| {
            RagError::Validation(format!(
                "unsupported document type for {filename}; expected pdf, txt or md"
            ))
        })?;

        let doc_id = new_document_id();
        self.store.put_raw(&doc_id, bytes).await?;
        info!(
            %doc_id,
            filename,
            size = bytes.len(),
            sha256 = %digest_bytes(bytes),
            "raw document stored"
        );

        self.process(&doc_id, bytes, kind).await
    }

    /// Rebuilds cleaned text and index points from the stored raw bytes.
    pub async fn reprocess(&self, doc_id: &str) -> Result<IngestOutcome> {
        let bytes = self
            .store
            .raw(doc_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {doc_id}")))?;

        if let Err(error) = self.index.delete_by_doc_id(doc_id).await {
            warn!(%doc_id, %error, "could not clear previous points before reprocessing");
        }

        self.process(doc_id, &bytes, sniff_document_kind(&bytes)).await
    }

    async fn process(&self, doc_id: &str, bytes: &[u8], kind: DocumentKind) -> Result<IngestOutcome> {
        let pages = extract_page_texts(bytes, kind);
        let flagged_pages: Vec<u32> = pages
            .iter()
            .filter(|page| page.needs_reprocessing())
            .map(|page| page.number)
            .collect();
        for page in &flagged_pages {
            warn!(%doc_id, page, "page text looks unreliable; kept as extracted");
        }

        let cleaned = tag_pages(&pages);
        self.store.put_cleaned(doc_id, &cleaned).await?;

        let display_name = self.display_name(&cleaned).await;
        let chunks = build_chunks(&cleaned, &self.chunking());

        if chunks.is_empty() {
            warn!(%doc_id, "document produced no chunks; skipping indexing");
            return Ok(IngestOutcome {
                doc_id: doc_id.to_string(),
                display_name,
                chunk_count: 0,
                flagged_pages,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;
        let dimensions = vectors.first().map_or(0, Vec::len);
        self.index.ensure_collection(dimensions).await?;

        let points: Vec<IndexPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint::from_chunk(doc_id, &display_name, chunk, vector))
            .collect();
        self.index.upsert(&points).await?;

        info!(
            %doc_id,
            display_name = %display_name,
            chunk_count = points.len(),
            pages = pages.len(),
            flagged = flagged_pages.len(),
            "document indexed"
        );

        Ok(IngestOutcome {
            doc_id: doc_id.to_string(),
            display_name,
            chunk_count: points.len(),
            flagged_pages,
        })
    }

    async fn display_name(&self, cleaned: &str) -> String {
        let excerpt: String = strip_page_markers(cleaned)
            .chars()
            .take(self.options.naming_excerpt_chars)
            .collect();
        if excerpt.trim().is_empty() {
            return UNTITLED_DOCUMENT.to_string();
        }

        let named = self
            .model
            .generate(&build_naming_prompt(&excerpt))
            .await
            .and_then(|response| extract_answer(&response));
        match named {
            Ok(raw) => clean_display_name(&raw).unwrap_or_else(|| UNTITLED_DOCUMENT.to_string()),
            Err(error) => {
                warn!(%error, "document naming failed");
                UNTITLED_DOCUMENT.to_string()
            }
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<String>> {
        Ok(self.store.list_ids().await?)
    }

    pub async fn document_metadata(&self, doc_id: &str) -> Result<DocumentMetadata> {
        let raw_info = self.store.raw_info(doc_id).await?;
        let cleaned = self.store.cleaned(doc_id).await?;
        let plain = cleaned.as_deref().map(strip_page_markers);

        let status = match (&raw_info, &plain) {
            (None, None) => DocumentStatus::Unknown,
            (Some(_), None) => DocumentStatus::Uploaded,
            (_, Some(text)) if text.trim().is_empty() => DocumentStatus::Processing,
            (_, Some(_)) => DocumentStatus::Processed,
        };

        let name = match self.index.payload_for_doc(doc_id).await {
            Ok(Some(payload)) => payload.display_name,
            Ok(None) => doc_id.to_string(),
            Err(error) => {
                warn!(%doc_id, %error, "index unavailable for display name");
                doc_id.to_string()
            }
        };

        Ok(DocumentMetadata {
            id: doc_id.to_string(),
            name,
            status,
            upload_date: raw_info.map(|info| info.stored_at),
            size: raw_info.map(|info| info.size),
            pages: cleaned
                .as_deref()
                .map(count_tagged_pages)
                .filter(|pages| *pages > 0),
            summary: plain
                .map(|text| excerpt_at_word_boundary(&text, SUMMARY_CHARS))
                .filter(|summary| !summary.is_empty()),
        })
    }

    pub async fn document_chunks(&self, doc_id: &str) -> Result<Vec<String>> {
        let cleaned = self
            .store
            .cleaned(doc_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {doc_id}")))?;
        Ok(build_chunks(&cleaned, &self.chunking())
            .into_iter()
            .map(|chunk| chunk.text)
            .collect())
    }

    /// Removes index points and stored files. Index failures are logged and
    /// do not stop file removal. Returns the number of files removed.
    pub async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        if let Err(error) = self.index.delete_by_doc_id(doc_id).await {
            warn!(%doc_id, %error, "index delete failed; removing files anyway");
        }
        let removed = self.store.delete(doc_id).await?;
        info!(%doc_id, removed, "document deleted");
        Ok(removed)
    }

    pub async fn download_document(&self, doc_id: &str) -> Result<Vec<u8>> {
        self.store
            .raw(doc_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {doc_id}")))
    }

    pub async fn ask(
        &self,
        session_id: Option<&str>,
        query: &str,
        target: Option<Vec<String>>,
    ) -> Result<AskOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("query is empty".to_string()));
        }

        let session_id = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(new_session_id, str::to_string);
        let target: Option<BTreeSet<String>> = target
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.into_iter().collect());

        let turn = self
            .conversations
            .begin_turn(&session_id, target, self.options.history_window);

        let query_vector = self.embeddings.embed_query(query).await?;
        let filter = turn.target_documents.clone().map(|doc_ids| DocumentFilter { doc_ids });
        let hits = self
            .index
            .search(&query_vector, self.options.top_k, filter.as_ref())
            .await?;

        if hits.is_empty() {
            let answer = no_results_message(filter.is_some()).to_string();
            debug!(%session_id, scoped = filter.is_some(), "no chunks retrieved");
            self.conversations.append_turn(
                &session_id,
                ChatMessage::user(query, None),
                ChatMessage::assistant(answer.clone(), None, None),
            );
            return Ok(AskOutcome {
                recent_history: self
                    .conversations
                    .recent_history(&session_id, self.options.recent_history),
                session_id,
                answer,
                citations: Vec::new(),
                document_ids: Vec::new(),
            });
        }

        let document_ids = distinct_doc_ids(&hits);
        let prompt = build_answer_prompt(query, &hits, &turn.history);
        let response = self.model.generate(&prompt).await?;
        let answer = match extract_answer(&response)?.trim() {
            "" => APOLOGY.to_string(),
            text => text.to_string(),
        };
        let citations = citations_for(&hits);

        self.conversations.append_turn(
            &session_id,
            ChatMessage::user(query, Some(document_ids.clone())),
            ChatMessage::assistant(
                answer.clone(),
                Some(document_ids.clone()),
                Some(citations.clone()),
            ),
        );

        info!(
            %session_id,
            hits = hits.len(),
            history = turn.history.len(),
            "question answered"
        );

        Ok(AskOutcome {
            recent_history: self
                .conversations
                .recent_history(&session_id, self.options.recent_history),
            session_id,
            answer,
            citations,
            document_ids,
        })
    }

    pub async fn ask_single_turn(&self, query: &str) -> Result<SingleTurnAnswer> {
        let session_id = new_session_id();
        let outcome = self.ask(Some(&session_id), query, None).await;
        self.conversations.delete(&session_id);
        let outcome = outcome?;
        Ok(SingleTurnAnswer {
            answer: outcome.answer,
            citations: outcome.citations,
        })
    }
}
