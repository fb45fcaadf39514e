use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_EMBEDDING_BATCH: usize = 64;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    batch_size: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let endpoint = Url::parse(&format!("{}/embeddings", base_url.trim_end_matches('/')))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            batch_size: batch_size.max(1),
            client: Client::new(),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&EmbeddingRequest {
            model: &self.model,
            input: batch,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api { status, message });
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        payload
            .data
            .sort_by_key(|item| item.index.unwrap_or(usize::MAX));
        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

#[async_trait]
pub trait EmbedderLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError>;
}

#[derive(Debug, Clone)]
pub enum EmbeddingConfig {
    Ngram {
        dimensions: usize,
    },
    OpenAi {
        base_url: String,
        model: String,
        api_key: Option<String>,
        batch_size: usize,
    },
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::Ngram {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[async_trait]
impl EmbedderLoader for EmbeddingConfig {
    async fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let model: Arc<dyn Embedder> = match self {
            EmbeddingConfig::Ngram { dimensions } => Arc::new(CharacterNgramEmbedder {
                dimensions: *dimensions,
            }),
            EmbeddingConfig::OpenAi {
                base_url,
                model,
                api_key,
                batch_size,
            } => Arc::new(HttpEmbedder::new(
                base_url,
                model.clone(),
                api_key.clone(),
                *batch_size,
            )?),
        };
        Ok(model)
    }
}

/// Shared entry point for chunk and query embeddings. The model is loaded on
/// first use; concurrent first callers wait on the same load.
pub struct EmbeddingService {
    loader: Box<dyn EmbedderLoader>,
    model: OnceCell<Arc<dyn Embedder>>,
    loads: AtomicUsize,
}

impl EmbeddingService {
    pub fn new(loader: impl EmbedderLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.model.initialized()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn model(&self) -> Result<&Arc<dyn Embedder>, EmbeddingError> {
        self.model
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                let model = self.loader.load().await?;
                info!(model = model.model_name(), "embedding model loaded");
                Ok::<_, EmbeddingError>(model)
            })
            .await
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.model().await?.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowLoader;

    #[async_trait]
    impl EmbedderLoader for SlowLoader {
        async fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(CharacterNgramEmbedder { dimensions: 16 }))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl EmbedderLoader for FailingLoader {
        async fn load(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            Err(EmbeddingError::Init("weights missing".to_string()))
        }
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_one("Hydraulic pressure and flow");
        let second = embedder.embed_one("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_one("abc");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn service_preserves_order_and_count() {
        let service = EmbeddingService::new(EmbeddingConfig::default());
        let texts = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let vectors = service.embed(&texts).await.expect("embedding should succeed");

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
        assert_eq!(
            service.embed_query("alpha").await.expect("query embedding"),
            vectors[0]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_load() {
        let service = Arc::new(EmbeddingService::new(SlowLoader));
        assert!(!service.is_initialized());

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.embed_query(&format!("query {i}")).await
            }));
        }
        for handle in handles {
            let vector = handle.await.expect("task should join").expect("embedding");
            assert_eq!(vector.len(), 16);
        }

        assert!(service.is_initialized());
        assert_eq!(service.load_count(), 1);
    }

    #[tokio::test]
    async fn failed_load_is_retried_by_the_next_caller() {
        let service = EmbeddingService::new(FailingLoader);
        assert!(service.embed_query("x").await.is_err());
        assert!(service.embed_query("x").await.is_err());
        assert_eq!(service.load_count(), 2);
        assert!(!service.is_initialized());
    }

    #[tokio::test]
    async fn empty_input_does_not_load_the_model() {
        let service = EmbeddingService::new(FailingLoader);
        assert!(service.embed(&[]).await.expect("empty batch").is_empty());
        assert_eq!(service.load_count(), 0);
    }
}
