use crate::models::{Document, IndexRecord, Namespace, RetrievalMatch};
use crate::PipelineError;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, source: &Path) -> Result<Document, PipelineError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(PipelineError::new(
                crate::ErrorKind::ProviderResponse,
                "embedding provider did not return exactly one vector",
            )),
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        namespace: &Namespace,
        records: &[IndexRecord],
    ) -> Result<(), PipelineError>;

    /// Up to `top_k` matches, best score first.
    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalMatch>, PipelineError>;

    async fn health_check(&self) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, PipelineError>;
}
