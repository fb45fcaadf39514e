pub mod chunking;
pub mod conversation;
pub mod document_store;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, ChunkingConfig, TRUNCATION_MARKER};
pub use conversation::ConversationManager;
pub use document_store::FsDocumentStore;
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbedderLoader, EmbeddingConfig, EmbeddingService,
    HttpEmbedder, DEFAULT_EMBEDDING_BATCH, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IndexError, IngestError, LlmError, RagError, StoreError};
pub use extractor::{extract_page_texts, PageText};
pub use ingest::{discover_documents, ingest_folder, IngestionReport, SkippedDocument};
pub use llm::{build_language_model, GenerationResponse, LlmConfig, LlmProvider};
pub use models::{
    AskOutcome, ChatMessage, Citation, DocumentMetadata, DocumentStatus, IngestOutcome,
    RagOptions, Role, Session, SessionSummary, SingleTurnAnswer,
};
pub use orchestrator::RagPipeline;
pub use stores::{MemoryIndex, QdrantStore};
pub use traits::{DocumentStore, LanguageModel, VectorIndex};
