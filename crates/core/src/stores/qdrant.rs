use crate::error::IndexError;
use crate::models::{DocumentFilter, IndexPoint, PointPayload, ScoredPoint};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str, collection: impl Into<String>) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: Client::new(),
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.collection,
            suffix
        )
    }

    async fn check(response: Response) -> Result<Response, IndexError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!("{status}: {body}"),
        })
    }

    /// `Ok(false)` when another caller created the resource first.
    async fn check_created(response: Response) -> Result<bool, IndexError> {
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT
            || (status == StatusCode::BAD_REQUEST && body.contains("already exists"))
        {
            return Ok(false);
        }
        Err(IndexError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!("{status}: {body}"),
        })
    }
}

/// Qdrant only accepts integers or UUIDs as point ids, so the string key is
/// mapped onto a UUID deterministically.
pub fn qdrant_point_id(key: &str) -> Uuid {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn doc_filter(doc_id: &str) -> Value {
    json!({ "must": [{ "key": "doc_id", "match": { "value": doc_id } }] })
}

fn any_of_filter(filter: &DocumentFilter) -> Value {
    let should: Vec<Value> = filter
        .doc_ids
        .iter()
        .map(|doc_id| json!({ "key": "doc_id", "match": { "value": doc_id } }))
        .collect();
    json!({ "should": should })
}

fn parse_payload(value: Option<&Value>) -> Option<PointPayload> {
    value.and_then(|payload| serde_json::from_value(payload.clone()).ok())
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), IndexError> {
        let existing = self.client.get(self.url("")).send().await?;
        if existing.status().is_success() {
            return Ok(());
        }
        if existing.status() != StatusCode::NOT_FOUND {
            Self::check(existing).await?;
        }

        let response = self
            .client
            .put(self.url(""))
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            }))
            .send()
            .await?;
        let created = Self::check_created(response).await?;

        let response = self
            .client
            .put(self.url("/index?wait=true"))
            .json(&json!({ "field_name": "doc_id", "field_schema": "keyword" }))
            .send()
            .await?;
        Self::check_created(response).await?;

        if created {
            info!(collection = %self.collection, dimensions, "qdrant collection created");
        } else {
            debug!(collection = %self.collection, "qdrant collection created concurrently");
        }
        Ok(())
    }

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }

        let points = points
            .iter()
            .map(|point| {
                Ok(json!({
                    "id": qdrant_point_id(&point.id),
                    "vector": point.vector,
                    "payload": serde_json::to_value(&point.payload)?,
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let response = self
            .client
            .put(self.url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::check(response).await?;

        debug!(collection = %self.collection, count = points.len(), "qdrant upsert");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let mut body = json!({
            "vector": query_vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = any_of_filter(filter);
        }

        let response = self
            .client
            .post(self.url("/points/search"))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let parsed: Value = Self::check(response).await?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in hits {
            let Some(payload) = parse_payload(hit.pointer("/payload")) else {
                continue;
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

            result.push(ScoredPoint {
                id: crate::models::point_id(&payload.doc_id, payload.ordinal),
                score: score as f32,
                payload,
            });
        }

        Ok(result)
    }

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), IndexError> {
        let response = self
            .client
            .post(self.url("/points/delete?wait=true"))
            .json(&json!({ "filter": doc_filter(doc_id) }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn count_by_doc_id(&self, doc_id: &str) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(self.url("/points/count"))
            .json(&json!({ "filter": doc_filter(doc_id), "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }

        let parsed: Value = Self::check(response).await?.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn payload_for_doc(&self, doc_id: &str) -> Result<Option<PointPayload>, IndexError> {
        let response = self
            .client
            .post(self.url("/points/scroll"))
            .json(&json!({
                "filter": doc_filter(doc_id),
                "limit": 1,
                "with_payload": true,
                "with_vector": false,
            }))
            .send()
            .await?;

        let parsed: Value = Self::check(response).await?.json().await?;
        Ok(parse_payload(parsed.pointer("/result/points/0/payload")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct FakeQdrant {
        rejection: axum::http::StatusCode,
        creates: Arc<AtomicUsize>,
    }

    // Every GET reports a missing collection, as both racers see before
    // either create lands. Only the first create succeeds.
    async fn create_collection(
        State(fake): State<FakeQdrant>,
        Path(name): Path<String>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        if fake.creates.fetch_add(1, Ordering::SeqCst) == 0 {
            (axum::http::StatusCode::OK, Json(json!({ "result": true, "status": "ok" })))
        } else {
            (
                fake.rejection,
                Json(json!({
                    "status": { "error": format!("Wrong input: Collection `{name}` already exists!") }
                })),
            )
        }
    }

    async fn spawn_fake_qdrant(rejection: axum::http::StatusCode) -> (String, Arc<AtomicUsize>) {
        let creates = Arc::new(AtomicUsize::new(0));
        let fake = FakeQdrant {
            rejection,
            creates: Arc::clone(&creates),
        };
        let app = Router::new()
            .route(
                "/collections/{name}",
                get(|| async { axum::http::StatusCode::NOT_FOUND }).put(create_collection),
            )
            .route(
                "/collections/{name}/index",
                put(|| async { Json(json!({ "result": { "status": "acknowledged" }, "status": "ok" })) }),
            )
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake qdrant");
        let addr = listener.local_addr().expect("fake qdrant address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), creates)
    }

    #[tokio::test]
    async fn concurrent_first_creates_both_succeed() {
        let (endpoint, creates) = spawn_fake_qdrant(axum::http::StatusCode::CONFLICT).await;
        let store = QdrantStore::new(&endpoint, "docs").expect("store");

        let (first, second) = tokio::join!(store.ensure_collection(8), store.ensure_collection(8));
        assert!(first.is_ok(), "{first:?}");
        assert!(second.is_ok(), "{second:?}");
        assert_eq!(creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn already_exists_bad_request_counts_as_created() {
        let (endpoint, _) = spawn_fake_qdrant(axum::http::StatusCode::BAD_REQUEST).await;
        let store = QdrantStore::new(&endpoint, "docs").expect("store");

        store.ensure_collection(8).await.expect("first create");
        store.ensure_collection(8).await.expect("second create");
    }

    #[tokio::test]
    async fn other_create_failures_still_surface() {
        let (endpoint, _) =
            spawn_fake_qdrant(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;
        let store = QdrantStore::new(&endpoint, "docs").expect("store");

        store.ensure_collection(8).await.expect("first create");
        assert!(matches!(
            store.ensure_collection(8).await,
            Err(IndexError::BackendResponse { .. })
        ));
    }

    #[test]
    fn point_uuid_is_deterministic_per_key() {
        assert_eq!(qdrant_point_id("doc-00001"), qdrant_point_id("doc-00001"));
        assert_ne!(qdrant_point_id("doc-00001"), qdrant_point_id("doc-00002"));
    }

    #[test]
    fn any_of_filter_uses_should_clauses() {
        let filter = any_of_filter(&DocumentFilter::any_of(["a", "b"]));
        let should = filter["should"].as_array().cloned().unwrap_or_default();
        assert_eq!(should.len(), 2);
        assert_eq!(should[0]["match"]["value"], "a");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(matches!(
            QdrantStore::new("not a url", "docs"),
            Err(IndexError::Url(_))
        ));
    }

    #[test]
    fn payload_parses_from_search_hit() {
        let hit = json!({
            "id": "2f1c",
            "score": 0.5,
            "payload": {
                "doc_id": "d1", "ordinal": 3, "text": "t", "display_name": "n",
                "page_start": 1, "page_end": 2
            }
        });
        let payload = parse_payload(hit.pointer("/payload")).expect("payload should parse");
        assert_eq!(payload.ordinal, 3);
        assert_eq!(payload.page_end, 2);
    }
}
