use crate::error::{ErrorCategory, ErrorKind, PipelineError};
use crate::models::{ContextBlock, EmptyReason, Retrieval};
use crate::retry::RetryExecutor;
use crate::traits::LanguageModel;
use std::fmt;
use tracing::{debug, info};

pub const SYSTEM_PROMPT: &str = "You are a helpful study assistant. Answer the user's question based ONLY on the context provided from their uploaded study materials.

IMPORTANT INSTRUCTIONS:
1. Answer using ONLY the information from the context above
2. If the context doesn't contain enough information to answer fully, say what you can based on the context and mention what's missing
3. Keep your answer clear, concise, and educational
4. Do not make up information or use external knowledge
5. Format your answer with clear paragraphs and bullet points if helpful
6. Be direct and helpful";

pub const NO_MATCHES_MESSAGE: &str = "I couldn't find relevant information about this topic in your uploaded documents. Please make sure you've uploaded the relevant PDF files.";

pub const LOW_RELEVANCE_MESSAGE: &str = "I found some information, but it doesn't seem relevant enough to provide a confident answer. Please try rephrasing your question or upload more relevant materials.";

pub const EMPTY_QUESTION_MESSAGE: &str = "Please provide a question.";

pub fn user_prompt(context: &str, question: &str) -> String {
    format!(
        "CONTEXT FROM UPLOADED DOCUMENTS:\n{context}\n\nUSER'S QUESTION: {question}\n\nPlease provide your answer now:"
    )
}

pub fn fallback_message(reason: EmptyReason) -> &'static str {
    match reason {
        EmptyReason::NoMatches => NO_MATCHES_MESSAGE,
        EmptyReason::BelowThreshold => LOW_RELEVANCE_MESSAGE,
    }
}

/// Where a question currently is on its way to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    EmbeddingQuery,
    Retrieving,
    Filtering,
    RespondingFallback,
    GeneratingAnswer,
    Completed,
    Failed,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryStage::Received => "received",
            QueryStage::EmbeddingQuery => "embedding_query",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Filtering => "filtering",
            QueryStage::RespondingFallback => "responding_fallback",
            QueryStage::GeneratingAnswer => "generating_answer",
            QueryStage::Completed => "completed",
            QueryStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The explanatory string a question gets instead of an error.
pub fn failure_message(error: &PipelineError, stage: QueryStage) -> String {
    let kind = error.root_kind();
    match kind {
        ErrorKind::Unauthorized => {
            return "Invalid API key. Please check the API keys configured for the embedding, vector store and chat services.".to_string();
        }
        ErrorKind::RateLimited => {
            return "The AI service quota has been exceeded. Please check your API quota or try again later.".to_string();
        }
        _ => {}
    }

    if kind.category() == ErrorCategory::Configuration {
        return "The AI service is currently unavailable due to configuration issues. Please check your API keys in environment variables.".to_string();
    }
    if stage == QueryStage::Retrieving {
        return "I'm having trouble accessing the knowledge base. Please check the vector store settings and that your PDF was properly uploaded.".to_string();
    }

    format!(
        "Sorry, I encountered an error while processing your question: {}. Please try again or check the server logs for more details.",
        error.message
    )
}

pub struct AnswerSynthesizer<'a, M> {
    model: &'a M,
    executor: &'a RetryExecutor,
    temperature: f32,
}

impl<'a, M> AnswerSynthesizer<'a, M>
where
    M: LanguageModel,
{
    pub fn new(model: &'a M, executor: &'a RetryExecutor, temperature: f32) -> Self {
        Self {
            model,
            executor,
            temperature,
        }
    }

    /// Empty retrievals are answered locally; the model is only asked when
    /// there is context to ground the answer in.
    pub async fn answer(
        &self,
        question: &str,
        retrieval: &Retrieval,
    ) -> Result<String, PipelineError> {
        match retrieval {
            Retrieval::Empty(reason) => {
                info!(stage = %QueryStage::RespondingFallback, reason = ?reason, "no grounding context");
                Ok(fallback_message(*reason).to_string())
            }
            Retrieval::Context(block) => self.generate(question, block).await,
        }
    }

    async fn generate(&self, question: &str, block: &ContextBlock) -> Result<String, PipelineError> {
        info!(
            stage = %QueryStage::GeneratingAnswer,
            context_chars = block.text.chars().count(),
            matches = block.match_ids.len(),
            "generating answer"
        );

        let prompt = user_prompt(&block.text, question);
        let answer = self
            .executor
            .run("Answer generation", || {
                self.model.complete(SYSTEM_PROMPT, &prompt, self.temperature)
            })
            .await?;

        debug!(answer_chars = answer.chars().count(), "answer generated");
        Ok(answer)
    }
}
