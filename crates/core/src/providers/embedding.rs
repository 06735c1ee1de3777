use crate::error::{ErrorKind, PipelineError};
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const BACKEND: &str = "embeddings";

/// Client for OpenAI/Voyage-style `POST /embeddings` endpoints.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &Url,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, PipelineError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PipelineError::missing_config(
                "VOYAGE_API_KEY",
                "create an API key at dash.voyageai.com and export VOYAGE_API_KEY",
            ));
        }
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        let endpoint = format!("{}/embeddings", base_url.as_str().trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.trim().to_string(),
            model: model.into(),
            dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
            input_type,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(BACKEND, status, &body));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        vectors_in_order(parsed, texts.len(), self.dimensions)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum InputType {
    Document,
    Query,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: InputType,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

fn vectors_in_order(
    mut parsed: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(PipelineError::new(
            ErrorKind::ProviderResponse,
            format!(
                "embedding service returned {} vectors for {expected} inputs",
                parsed.data.len()
            ),
        ));
    }

    parsed
        .data
        .into_iter()
        .map(|entry| {
            if entry.embedding.len() != dimensions {
                return Err(PipelineError::new(
                    ErrorKind::ProviderResponse,
                    format!(
                        "embedding service returned {} dimensions, expected {dimensions}",
                        entry.embedding.len()
                    ),
                ));
            }
            Ok(entry.embedding)
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        self.request(texts, InputType::Document).await
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vectors = self.request(&[text.to_string()], InputType::Query).await?;
        vectors.pop().ok_or_else(|| {
            PipelineError::new(ErrorKind::ProviderResponse, "no vector returned for query")
        })
    }
}
