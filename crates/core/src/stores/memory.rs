use crate::error::PipelineError;
use crate::models::{IndexRecord, Namespace, RetrievalMatch};
use crate::traits::VectorStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

type Partition = HashMap<String, IndexRecord>;

/// Process-local store partitioned by namespace, scored by cosine similarity.
/// Each partition is keyed by record id.
#[derive(Default)]
pub struct InMemoryStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, namespace: &Namespace) -> usize {
        self.partitions
            .read()
            .await
            .get(namespace.as_str())
            .map_or(0, Partition::len)
    }

    /// Stored records in reading order.
    pub async fn records(&self, namespace: &Namespace) -> Vec<IndexRecord> {
        let partitions = self.partitions.read().await;
        let mut records: Vec<IndexRecord> = partitions
            .get(namespace.as_str())
            .map(|partition| partition.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|left, right| {
            left.metadata
                .chunk_index
                .cmp(&right.metadata.chunk_index)
                .then_with(|| left.id.cmp(&right.id))
        });
        records
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(
        &self,
        namespace: &Namespace,
        records: &[IndexRecord],
    ) -> Result<(), PipelineError> {
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(namespace.as_str().to_string()).or_default();

        for record in records {
            partition.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalMatch>, PipelineError> {
        let partitions = self.partitions.read().await;
        let Some(partition) = partitions.get(namespace.as_str()) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<RetrievalMatch> = partition
            .values()
            .map(|record| RetrievalMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector).clamp(0.0, 1.0),
                metadata: record.metadata.clone(),
            })
            .collect();

        matches.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.id.cmp(&right.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
