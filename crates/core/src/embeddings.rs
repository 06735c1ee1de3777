use crate::error::PipelineError;
use crate::models::Chunk;
use crate::retry::RetryExecutor;
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;
use futures::Stream;
use std::time::Duration;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Local hashing embedder: deterministic, offline, no credentials.
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
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
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
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Vectors for one batch of consecutive chunks.
#[derive(Debug, Clone)]
pub struct EmbeddedBatch<'c> {
    pub batch_index: usize,
    pub chunks: &'c [Chunk],
    pub vectors: Vec<Vec<f32>>,
}

pub struct EmbeddingBatcher<'a, E> {
    provider: &'a E,
    executor: &'a RetryExecutor,
    batch_size: usize,
    pause: Duration,
}

impl<'a, E> EmbeddingBatcher<'a, E>
where
    E: EmbeddingProvider,
{
    pub fn new(
        provider: &'a E,
        executor: &'a RetryExecutor,
        batch_size: usize,
        pause: Duration,
    ) -> Self {
        Self {
            provider,
            executor,
            batch_size: batch_size.max(1),
            pause,
        }
    }

    pub fn batch_count(&self, chunk_count: usize) -> usize {
        chunk_count.div_ceil(self.batch_size)
    }

    /// Lazily embeds `chunks` one batch at a time. Nothing is requested until
    /// the stream is polled, and every call starts again from the first batch.
    pub fn embed_batches<'c>(
        &'c self,
        chunks: &'c [Chunk],
    ) -> impl Stream<Item = Result<EmbeddedBatch<'c>, PipelineError>> + Send + 'c {
        let total = self.batch_count(chunks.len());
        let provider: &'c E = self.provider;
        let executor: &'c RetryExecutor = self.executor;
        let (batch_size, pause) = (self.batch_size, self.pause);

        async_stream::try_stream! {
            for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
                if batch_index > 0 && !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }

                let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
                let operation = format!("Embedding batch {}/{}", batch_index + 1, total);
                let vectors = executor
                    .run(&operation, || provider.embed_many(&texts))
                    .await?;

                if vectors.len() != batch.len() {
                    Err::<(), _>(PipelineError::contract(format!(
                        "embedding provider returned {} vectors for {} chunks",
                        vectors.len(),
                        batch.len()
                    ))
                    .with_operation(operation.clone()))?;
                }

                debug!(batch = batch_index + 1, total, size = batch.len(), "batch embedded");
                yield EmbeddedBatch {
                    batch_index,
                    chunks: batch,
                    vectors,
                };
            }
        }
    }

    /// Single-item embedding for a question, under the same retry policy.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        self.executor
            .run("Query embedding", || self.provider.embed_one(text))
            .await
    }
}
