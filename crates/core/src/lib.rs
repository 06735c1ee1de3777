pub mod answer;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod providers;
pub mod retrieval;
pub mod retry;
pub mod store;
pub mod stores;
pub mod traits;

pub use answer::{
    AnswerSynthesizer, QueryStage, EMPTY_QUESTION_MESSAGE, LOW_RELEVANCE_MESSAGE,
    NO_MATCHES_MESSAGE,
};
pub use chunking::{chunk_pages, normalize_text};
pub use config::{ChunkingConfig, PipelineConfig, RetrievalOptions, RetryPolicy, ServiceSettings};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddedBatch, EmbeddingBatcher, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{format_error, ErrorCategory, ErrorContext, ErrorKind, PipelineError};
pub use extractor::{loader_for_path, AutoLoader, PdfLoader, TextLoader};
pub use ingest::{discover_documents, FileOutcome, IngestionReport, IngestionStage};
pub use models::{
    upload_namespace, Chunk, ContextBlock, Document, EmptyReason, IndexRecord, Namespace, Page,
    RecordMetadata, Retrieval, RetrievalMatch,
};
pub use orchestrator::RagPipeline;
pub use progress::{ProgressStats, ProgressTracker};
pub use providers::{ChatCompletionsClient, HttpEmbedder};
pub use retrieval::{assemble_context, RetrievalAssembler};
pub use retry::{RetryAttempt, RetryExecutor, RetryStats};
pub use store::{build_records, VectorIndexWriter};
pub use stores::{InMemoryStore, QdrantStore};
pub use traits::{DocumentLoader, EmbeddingProvider, LanguageModel, VectorStore};
