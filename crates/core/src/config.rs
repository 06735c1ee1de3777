use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
    /// Boundaries in priority order; an empty string splits between characters.
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: 1_000,
            overlap: 200,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
    /// Extra factor on the delay after an explicit rate-limit response.
    pub rate_limit_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter_fraction: 0.1,
            rate_limit_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub score_threshold: f64,
    pub max_context_chars: usize,
    pub separator: String,
    pub temperature: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.7,
            max_context_chars: 8_000,
            separator: "\n\n---\n\n".to_string(),
            temperature: 0.3,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "rate_limit_delay_ms")]
    pub rate_limit_delay: Duration,
    pub retry: RetryPolicy,
    pub retrieval: RetrievalOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: 10,
            rate_limit_delay: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            retrieval: RetrievalOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            PipelineError::invalid_config(format!(
                "cannot read config {}: {error}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            PipelineError::invalid_config(format!(
                "cannot parse config {}: {error}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let chunking = &self.chunking;
        if chunking.size == 0 {
            return Err(PipelineError::invalid_config("chunk size must be positive"));
        }
        if chunking.overlap >= chunking.size {
            return Err(PipelineError::invalid_config(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                chunking.overlap, chunking.size
            )));
        }
        if chunking.separators.is_empty() {
            return Err(PipelineError::invalid_config(
                "at least one chunk separator is required",
            ));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_config("batch size must be positive"));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(PipelineError::invalid_config(
                "max retry attempts must be at least 1",
            ));
        }
        if !(retry.multiplier >= 1.0) {
            return Err(PipelineError::invalid_config(
                "backoff multiplier must be at least 1",
            ));
        }
        if !(retry.rate_limit_multiplier >= 1.0) {
            return Err(PipelineError::invalid_config(
                "rate limit multiplier must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_fraction) {
            return Err(PipelineError::invalid_config(
                "jitter fraction must be within [0, 1]",
            ));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(PipelineError::invalid_config(
                "initial retry delay exceeds the maximum delay",
            ));
        }

        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 {
            return Err(PipelineError::invalid_config("top_k must be positive"));
        }
        if !(0.0..=1.0).contains(&retrieval.score_threshold) {
            return Err(PipelineError::invalid_config(
                "score threshold must be within [0, 1]",
            ));
        }
        if retrieval.max_context_chars == 0 {
            return Err(PipelineError::invalid_config(
                "context budget must be positive",
            ));
        }

        Ok(())
    }
}

pub const DEFAULT_EMBEDDING_URL: &str = "https://api.voyageai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "voyage-2";
pub const DEFAULT_CHAT_URL: &str = "https://api.x.ai/v1";
pub const DEFAULT_CHAT_MODEL: &str = "grok-2-latest";

/// Endpoints and credentials for the remote collaborators.
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub embedding_url: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_api_key: Option<String>,
    pub vector_store_url: Option<String>,
    pub vector_store_collection: Option<String>,
    pub vector_store_api_key: Option<String>,
    pub chat_url: Option<String>,
    pub chat_model: Option<String>,
    pub chat_api_key: Option<String>,
}

impl ServiceSettings {
    pub fn require_embedding_api_key(&self) -> Result<&str, PipelineError> {
        required(
            &self.embedding_api_key,
            "VOYAGE_API_KEY",
            "create an API key at dash.voyageai.com and export VOYAGE_API_KEY",
        )
    }

    pub fn require_chat_api_key(&self) -> Result<&str, PipelineError> {
        present(&self.chat_api_key).ok_or_else(missing_chat_api_key)
    }

    pub fn require_vector_store_url(&self) -> Result<Url, PipelineError> {
        let raw = required(
            &self.vector_store_url,
            "QDRANT_URL",
            "point QDRANT_URL at a running Qdrant instance, e.g. http://localhost:6333",
        )?;
        parse_endpoint(raw)
    }

    pub fn require_vector_store_collection(&self) -> Result<&str, PipelineError> {
        required(
            &self.vector_store_collection,
            "QDRANT_COLLECTION",
            "export QDRANT_COLLECTION with the name of an existing collection",
        )
    }

    pub fn embedding_url(&self) -> Result<Url, PipelineError> {
        parse_endpoint(
            self.embedding_url
                .as_deref()
                .unwrap_or(DEFAULT_EMBEDDING_URL),
        )
    }

    pub fn chat_url(&self) -> Result<Url, PipelineError> {
        parse_endpoint(self.chat_url.as_deref().unwrap_or(DEFAULT_CHAT_URL))
    }

    pub fn embedding_model(&self) -> &str {
        self.embedding_model
            .as_deref()
            .unwrap_or(DEFAULT_EMBEDDING_MODEL)
    }

    pub fn chat_model(&self) -> &str {
        self.chat_model.as_deref().unwrap_or(DEFAULT_CHAT_MODEL)
    }
}

pub fn missing_chat_api_key() -> PipelineError {
    PipelineError::missing_config(
        "XAI_API_KEY",
        "create an API key at console.x.ai and export XAI_API_KEY",
    )
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required<'a>(
    value: &'a Option<String>,
    variable: &str,
    hint: &str,
) -> Result<&'a str, PipelineError> {
    present(value).ok_or_else(|| PipelineError::missing_config(variable, hint))
}

pub fn parse_endpoint(raw: &str) -> Result<Url, PipelineError> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::invalid_config(format!(
            "endpoint {raw} must use http or https"
        )));
    }
    Ok(url)
}
