use crate::answer::{failure_message, AnswerSynthesizer, QueryStage, EMPTY_QUESTION_MESSAGE};
use crate::chunking::chunk_pages;
use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingBatcher;
use crate::error::PipelineError;
use crate::extractor::validate_source_file;
use crate::ingest::{FileOutcome, IngestionReport, IngestionStage};
use crate::models::{Namespace, Retrieval};
use crate::progress::ProgressTracker;
use crate::retrieval::RetrievalAssembler;
use crate::retry::RetryExecutor;
use crate::store::VectorIndexWriter;
use crate::traits::{DocumentLoader, EmbeddingProvider, LanguageModel, VectorStore};
use futures::{pin_mut, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Ingestion and question answering over one set of collaborators.
pub struct RagPipeline<L, E, S, M> {
    loader: L,
    embedder: E,
    store: S,
    model: M,
    config: PipelineConfig,
}

impl<L, E, S, M> RagPipeline<L, E, S, M>
where
    L: DocumentLoader,
    E: EmbeddingProvider,
    S: VectorStore,
    M: LanguageModel,
{
    pub fn new(
        loader: L,
        embedder: E,
        store: S,
        model: M,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            loader,
            embedder,
            store,
            model,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads, chunks, embeds and stores one document into `namespace`.
    ///
    /// Batches run strictly in order. When a batch fails after earlier ones
    /// were stored, those records stay in the store and the error says how
    /// many there are.
    pub async fn ingest_document(
        &self,
        source: &Path,
        namespace: &Namespace,
        config: Option<&PipelineConfig>,
    ) -> Result<IngestionReport, PipelineError> {
        let config = config.unwrap_or(&self.config);
        config.validate()?;
        info!(
            stage = %IngestionStage::Pending,
            source = %source.display(),
            namespace = %namespace,
            "ingestion requested"
        );

        validate_source_file(source).await?;

        let executor = RetryExecutor::new(config.retry.clone());
        executor
            .run("Vector store health check", || self.store.health_check())
            .await
            .map_err(|error| self.failed(error, namespace, 0))?;

        info!(stage = %IngestionStage::Chunking, namespace = %namespace, "loading document");
        let document = self
            .loader
            .load(source)
            .await
            .map_err(|error| self.failed(error, namespace, 0))?;
        let chunks = chunk_pages(&document.pages, &config.chunking)
            .map_err(|error| self.failed(error, namespace, 0))?;

        let batcher = EmbeddingBatcher::new(
            &self.embedder,
            &executor,
            config.batch_size,
            config.rate_limit_delay,
        );
        let writer = VectorIndexWriter::new(&self.store, &executor);
        let total_batches = batcher.batch_count(chunks.len());
        let mut tracker = ProgressTracker::new(chunks.len());
        info!(
            pages = document.pages.len(),
            chars = document.total_chars(),
            chunks = chunks.len(),
            batches = total_batches,
            "document chunked"
        );

        info!(stage = %IngestionStage::Embedding, namespace = %namespace, "embedding chunks");
        let batches = batcher.embed_batches(&chunks);
        pin_mut!(batches);

        let mut stored = 0usize;
        while let Some(batch) = batches.next().await {
            let batch = batch.map_err(|error| self.failed(error, namespace, stored))?;
            let batch_number = batch.batch_index + 1;

            debug!(
                stage = %IngestionStage::Upserting,
                batch = batch_number,
                total = total_batches,
                "upserting batch"
            );
            let operation = format!("Upserting batch {batch_number}/{total_batches}");
            let written = writer
                .upsert(batch.chunks, batch.vectors, namespace, &operation)
                .await
                .map_err(|error| self.failed(error, namespace, stored))?;

            stored += written;
            tracker.update(written);
            let progress = tracker.stats();
            info!(
                batch = batch_number,
                total = total_batches,
                processed = progress.processed,
                percentage = progress.percentage,
                rate_per_second = progress.rate_per_second,
                eta_seconds = progress.eta_seconds,
                "batch stored"
            );
        }

        let progress = tracker.stats();
        let retry = executor.stats();
        info!(
            stage = %IngestionStage::Completed,
            namespace = %namespace,
            chunks = chunks.len(),
            elapsed_seconds = progress.elapsed_seconds,
            retries = retry.retries,
            "ingestion completed"
        );

        Ok(IngestionReport {
            namespace: namespace.clone(),
            chunk_count: chunks.len(),
            batch_count: total_batches,
            elapsed_seconds: progress.elapsed_seconds,
            rate_per_second: progress.rate_per_second,
            retry,
        })
    }

    /// Ingests each file into `{base}-file{n}`, one after another. A failing
    /// file is reported in its outcome and the rest still run.
    pub async fn ingest_many(&self, files: &[PathBuf], base: &Namespace) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());

        for (index, path) in files.iter().enumerate() {
            let namespace = Namespace::for_file(base, index);
            info!(
                file = index + 1,
                total = files.len(),
                source = %path.display(),
                namespace = %namespace,
                "ingesting file"
            );
            let result = self.ingest_document(path, &namespace, None).await;
            outcomes.push(FileOutcome {
                path: path.clone(),
                namespace,
                result,
            });
        }

        outcomes
    }

    /// Always produces text for the user: an answer, a fallback when the
    /// documents hold nothing relevant, or an explanation of what went wrong.
    pub async fn answer_question(&self, question: &str, namespace: &str) -> String {
        let question = question.trim();
        if question.is_empty() {
            return EMPTY_QUESTION_MESSAGE.to_string();
        }

        match self.try_answer(question, namespace).await {
            Ok(answer) => answer,
            Err((stage, failure)) => {
                error!(
                    stage = %stage,
                    namespace,
                    code = failure.kind.code(),
                    error = %failure,
                    "question failed"
                );
                failure_message(&failure, stage)
            }
        }
    }

    async fn try_answer(
        &self,
        question: &str,
        namespace: &str,
    ) -> Result<String, (QueryStage, PipelineError)> {
        let at = |stage: QueryStage| move |error: PipelineError| (stage, error);

        info!(stage = %QueryStage::Received, namespace, "question received");
        let namespace = Namespace::new(namespace).map_err(at(QueryStage::Received))?;
        let options = &self.config.retrieval;
        let executor = RetryExecutor::new(self.config.retry.clone());

        debug!(stage = %QueryStage::EmbeddingQuery, "embedding question");
        let batcher = EmbeddingBatcher::new(&self.embedder, &executor, 1, self.config.rate_limit_delay);
        let vector = batcher
            .embed_query(question)
            .await
            .map_err(at(QueryStage::EmbeddingQuery))?;

        debug!(stage = %QueryStage::Retrieving, namespace = %namespace, "querying vector store");
        let assembler = RetrievalAssembler::new(&self.store, &executor, options);
        let retrieval = assembler
            .retrieve(&vector, &namespace)
            .await
            .map_err(at(QueryStage::Retrieving))?;

        match &retrieval {
            Retrieval::Context(block) => debug!(
                stage = %QueryStage::Filtering,
                kept = block.match_ids.len(),
                truncated = block.truncated,
                "context assembled"
            ),
            Retrieval::Empty(reason) => {
                debug!(stage = %QueryStage::Filtering, reason = ?reason, "no usable context")
            }
        }

        let synthesizer = AnswerSynthesizer::new(&self.model, &executor, options.temperature);
        let stage = match retrieval {
            Retrieval::Empty(_) => QueryStage::RespondingFallback,
            Retrieval::Context(_) => QueryStage::GeneratingAnswer,
        };
        let answer = synthesizer
            .answer(question, &retrieval)
            .await
            .map_err(at(stage))?;

        info!(
            stage = %QueryStage::Completed,
            namespace = %namespace,
            grounded = !retrieval.is_empty(),
            attempts = executor.stats().attempts,
            "question answered"
        );
        Ok(answer)
    }

    fn failed(&self, error: PipelineError, namespace: &Namespace, stored: usize) -> PipelineError {
        let error = if stored > 0 {
            error.with_records_stored(stored)
        } else {
            error
        };
        error!(
            stage = %IngestionStage::Failed,
            namespace = %namespace,
            code = error.kind.code(),
            records_stored = stored,
            error = %error,
            "ingestion failed"
        );
        error
    }
}
