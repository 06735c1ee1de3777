use crate::error::PipelineError;
use crate::models::{Chunk, IndexRecord, Namespace, RecordMetadata};
use crate::retry::RetryExecutor;
use crate::traits::VectorStore;
use chrono::{DateTime, Utc};
use tracing::error;
use uuid::Uuid;

/// `{namespace}-chunk-{index}-{millis}-{random}`. The random suffix keeps
/// re-ingestions within the same millisecond from colliding.
pub fn record_id(namespace: &Namespace, chunk_index: u64, indexed_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{namespace}-chunk-{chunk_index}-{}-{}",
        indexed_at.timestamp_millis(),
        &suffix[..12]
    )
}

pub fn build_records(
    chunks: &[Chunk],
    vectors: Vec<Vec<f32>>,
    namespace: &Namespace,
    indexed_at: DateTime<Utc>,
) -> Result<Vec<IndexRecord>, PipelineError> {
    if chunks.len() != vectors.len() {
        let violation = PipelineError::contract(format!(
            "embedding count {} doesn't match chunk count {}",
            vectors.len(),
            chunks.len()
        ));
        error!(
            namespace = %namespace,
            chunks = chunks.len(),
            vectors = vectors.len(),
            "chunk/vector count mismatch"
        );
        return Err(violation);
    }

    Ok(chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexRecord {
            id: record_id(namespace, chunk.chunk_index, indexed_at),
            vector,
            metadata: RecordMetadata {
                text: chunk.text.clone(),
                source_page: chunk.source_page,
                namespace: namespace.to_string(),
                chunk_index: chunk.chunk_index,
                indexed_at,
            },
        })
        .collect())
}

pub struct VectorIndexWriter<'a, S> {
    store: &'a S,
    executor: &'a RetryExecutor,
}

impl<'a, S> VectorIndexWriter<'a, S>
where
    S: VectorStore,
{
    pub fn new(store: &'a S, executor: &'a RetryExecutor) -> Self {
        Self { store, executor }
    }

    /// Stores one batch; returns how many records were written.
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
        namespace: &Namespace,
        operation: &str,
    ) -> Result<usize, PipelineError> {
        let records = build_records(chunks, vectors, namespace, Utc::now())?;
        if records.is_empty() {
            return Ok(0);
        }

        self.executor
            .run(operation, || self.store.upsert(namespace, &records))
            .await?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::ErrorKind;
    use crate::stores::InMemoryStore;
    use std::collections::HashSet;
    use std::time::Duration;

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|index| Chunk {
                text: format!("text {index}"),
                source_page: 2,
                chunk_index: index as u64 + 40,
            })
            .collect()
    }

    #[test]
    fn ids_differ_for_the_same_chunk_and_instant() {
        let namespace = Namespace::new("notes").unwrap();
        let now = Utc::now();
        let ids: HashSet<String> = (0..100).map(|_| record_id(&namespace, 7, now)).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids
            .iter()
            .all(|id| id.starts_with(&format!("notes-chunk-7-{}-", now.timestamp_millis()))));
    }

    #[test]
    fn records_carry_chunk_metadata() {
        let namespace = Namespace::new("notes").unwrap();
        let now = Utc::now();
        let records =
            build_records(&chunks(2), vec![vec![0.1, 0.2], vec![0.3, 0.4]], &namespace, now).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].vector, vec![0.3, 0.4]);
        assert_eq!(records[1].metadata.chunk_index, 41);
        assert_eq!(records[1].metadata.source_page, 2);
        assert_eq!(records[1].metadata.namespace, "notes");
        assert_eq!(records[1].metadata.indexed_at, now);
    }

    #[test]
    fn count_mismatch_is_a_contract_violation() {
        let namespace = Namespace::new("notes").unwrap();
        let error = build_records(&chunks(3), vec![vec![0.0]], &namespace, Utc::now()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ContractViolation);
        assert!(!error.is_recoverable());
    }

    #[tokio::test]
    async fn writer_upserts_into_the_target_namespace() {
        let store = InMemoryStore::new();
        let executor = RetryExecutor::new(RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        });
        let writer = VectorIndexWriter::new(&store, &executor);
        let namespace = Namespace::new("course").unwrap();

        let written = writer
            .upsert(&chunks(3), vec![vec![1.0]; 3], &namespace, "Upserting batch 1/1")
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(store.len(&namespace).await, 3);
        assert_eq!(executor.stats().attempts, 1);
    }
}
