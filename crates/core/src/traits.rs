use crate::error::{IndexError, LlmError, StoreError};
use crate::llm::GenerationResponse;
use crate::models::{DocumentFilter, IndexPoint, PointPayload, RawInfo, ScoredPoint};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the collection with `dimensions` only when it does not exist.
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), IndexError>;

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), IndexError>;

    /// Nearest points by cosine similarity. A missing collection yields no hits.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError>;

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), IndexError>;

    async fn count_by_doc_id(&self, doc_id: &str) -> Result<usize, IndexError>;

    async fn payload_for_doc(&self, doc_id: &str) -> Result<Option<PointPayload>, IndexError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put_raw(&self, doc_id: &str, bytes: &[u8]) -> Result<(), StoreError>;

    async fn put_cleaned(&self, doc_id: &str, text: &str) -> Result<(), StoreError>;

    async fn raw(&self, doc_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn raw_info(&self, doc_id: &str) -> Result<Option<RawInfo>, StoreError>;

    async fn cleaned(&self, doc_id: &str) -> Result<Option<String>, StoreError>;

    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, doc_id: &str) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GenerationResponse, LlmError>;
}
