use crate::error::IndexError;
use crate::models::{DocumentFilter, IndexPoint, PointPayload, ScoredPoint};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

struct Collection {
    dimensions: usize,
    points: BTreeMap<String, IndexPoint>,
}

#[derive(Default)]
pub struct MemoryIndex {
    collection: RwLock<Option<Collection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.read().as_ref().map(|collection| collection.dimensions)
    }

    pub fn len(&self) -> usize {
        self.read()
            .as_ref()
            .map_or(0, |collection| collection.points.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn point_ids(&self) -> Vec<String> {
        self.read()
            .as_ref()
            .map(|collection| collection.points.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn payloads(&self) -> Vec<PointPayload> {
        self.read()
            .as_ref()
            .map(|collection| {
                collection
                    .points
                    .values()
                    .map(|point| point.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Collection>> {
        self.collection
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Collection>> {
        self.collection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), IndexError> {
        let mut guard = self.write();
        if guard.is_none() {
            *guard = Some(Collection {
                dimensions,
                points: BTreeMap::new(),
            });
        }
        Ok(())
    }

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), IndexError> {
        let mut guard = self.write();
        let collection = guard
            .as_mut()
            .ok_or_else(|| IndexError::NotReady("memory collection".to_string()))?;

        if let Some(point) = points
            .iter()
            .find(|point| point.vector.len() != collection.dimensions)
        {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dimensions,
                actual: point.vector.len(),
            });
        }

        for point in points {
            collection.points.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let guard = self.read();
        let Some(collection) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        if query_vector.len() != collection.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: collection.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .values()
            .filter(|point| filter.map_or(true, |filter| filter.matches(&point.payload.doc_id)))
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: cosine_similarity(query_vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.id.cmp(&right.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_doc_id(&self, doc_id: &str) -> Result<(), IndexError> {
        let mut guard = self.write();
        let collection = guard
            .as_mut()
            .ok_or_else(|| IndexError::NotReady("memory collection".to_string()))?;
        collection
            .points
            .retain(|_, point| point.payload.doc_id != doc_id);
        Ok(())
    }

    async fn count_by_doc_id(&self, doc_id: &str) -> Result<usize, IndexError> {
        Ok(self.read().as_ref().map_or(0, |collection| {
            collection
                .points
                .values()
                .filter(|point| point.payload.doc_id == doc_id)
                .count()
        }))
    }

    async fn payload_for_doc(&self, doc_id: &str) -> Result<Option<PointPayload>, IndexError> {
        Ok(self.read().as_ref().and_then(|collection| {
            collection
                .points
                .values()
                .find(|point| point.payload.doc_id == doc_id)
                .map(|point| point.payload.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TextChunk;

    fn point(doc_id: &str, ordinal: u32, vector: Vec<f32>) -> IndexPoint {
        let chunk = TextChunk {
            ordinal,
            text: format!("{doc_id} chunk {ordinal}"),
            page_start: 1,
            page_end: 1,
        };
        IndexPoint::from_chunk(doc_id, "Name", &chunk, vector)
    }

    #[tokio::test]
    async fn ensure_collection_keeps_the_first_dimension() {
        let index = MemoryIndex::new();
        index.ensure_collection(3).await.expect("create");
        index.ensure_collection(8).await.expect("no-op");
        assert_eq!(index.dimensions(), Some(3));

        let wrong = index.upsert(&[point("a", 0, vec![1.0; 8])]).await;
        assert!(matches!(wrong, Err(IndexError::DimensionMismatch { expected: 3, actual: 8 })));
    }

    #[tokio::test]
    async fn upsert_with_same_ids_overwrites() {
        let index = MemoryIndex::new();
        index.ensure_collection(2).await.expect("create");
        let points = vec![point("a", 0, vec![1.0, 0.0]), point("a", 1, vec![0.0, 1.0])];
        index.upsert(&points).await.expect("first upsert");
        index.upsert(&points).await.expect("second upsert");

        assert_eq!(index.len(), 2);
        assert_eq!(index.point_ids(), vec!["a-00000".to_string(), "a-00001".to_string()]);
        let ordinals: Vec<u32> = index.payloads().iter().map(|payload| payload.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1]);
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_honours_filter() {
        let index = MemoryIndex::new();
        index.ensure_collection(2).await.expect("create");
        index
            .upsert(&[
                point("a", 0, vec![1.0, 0.0]),
                point("b", 0, vec![0.9, 0.1]),
                point("b", 1, vec![0.0, 1.0]),
            ])
            .await
            .expect("upsert");

        let all = index.search(&[1.0, 0.0], 2, None).await.expect("search");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].payload.doc_id, "a");

        let scoped = DocumentFilter::any_of(["b"]);
        let hits = index.search(&[1.0, 0.0], 5, Some(&scoped)).await.expect("search");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.payload.doc_id == "b"));
    }

    #[tokio::test]
    async fn search_without_collection_is_empty_and_delete_is_not_ready() {
        let index = MemoryIndex::new();
        assert!(index.search(&[1.0], 5, None).await.expect("search").is_empty());
        assert!(index.delete_by_doc_id("a").await.is_err());
        assert_eq!(index.count_by_doc_id("a").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn delete_by_doc_id_removes_only_that_document() {
        let index = MemoryIndex::new();
        index.ensure_collection(2).await.expect("create");
        index
            .upsert(&[point("a", 0, vec![1.0, 0.0]), point("b", 0, vec![0.0, 1.0])])
            .await
            .expect("upsert");

        index.delete_by_doc_id("a").await.expect("delete");
        index.delete_by_doc_id("a").await.expect("repeat delete");

        assert_eq!(index.count_by_doc_id("a").await.expect("count"), 0);
        assert_eq!(index.count_by_doc_id("b").await.expect("count"), 1);
        assert!(index.payload_for_doc("a").await.expect("payload").is_none());
        assert_eq!(
            index.payload_for_doc("b").await.expect("payload").map(|p| p.display_name),
            Some("Name".to_string())
        );
    }
}
