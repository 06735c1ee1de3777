use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{ErrorKind, PipelineError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// Pages in reading order, as produced by a loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|page| page.text.chars().count()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_page: u32,
    pub chunk_index: u64,
}

/// Isolated partition of the vector store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(value: impl Into<String>) -> Result<Self, PipelineError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(PipelineError::new(
                ErrorKind::InvalidInput,
                "namespace must not be empty",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace for the `index`-th file (0-based) of a multi-file upload.
    pub fn for_file(base: &Namespace, index: usize) -> Self {
        Self(format!("{}-file{}", base.0, index + 1))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{epoch_millis}-{file stem}`, the naming used for uploaded files.
pub fn upload_namespace(file_name: &str, now: DateTime<Utc>) -> Result<Namespace, PipelineError> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| {
            PipelineError::new(
                ErrorKind::InvalidInput,
                format!("cannot derive a namespace from file name {file_name:?}"),
            )
        })?;
    Namespace::new(format!("{}-{}", now.timestamp_millis(), stem))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub text: String,
    pub source_page: u32,
    pub namespace: String,
    pub chunk_index: u64,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub id: String,
    pub score: f64,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlock {
    pub text: String,
    /// Ids of the matches that made it into `text`, best first.
    pub match_ids: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmptyReason {
    NoMatches,
    BelowThreshold,
}

/// Outcome of retrieval: either grounding context or a reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Retrieval {
    Context(ContextBlock),
    Empty(EmptyReason),
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        matches!(self, Retrieval::Empty(_))
    }
}
