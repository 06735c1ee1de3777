use crate::config::RetrievalOptions;
use crate::error::{truncate, PipelineError};
use crate::models::{ContextBlock, EmptyReason, Namespace, Retrieval, RetrievalMatch};
use crate::retry::RetryExecutor;
use crate::traits::VectorStore;
use tracing::debug;

pub struct RetrievalAssembler<'a, S> {
    store: &'a S,
    executor: &'a RetryExecutor,
    options: &'a RetrievalOptions,
}

impl<'a, S> RetrievalAssembler<'a, S>
where
    S: VectorStore,
{
    pub fn new(store: &'a S, executor: &'a RetryExecutor, options: &'a RetrievalOptions) -> Self {
        Self {
            store,
            executor,
            options,
        }
    }

    /// One namespace-scoped similarity query, retried like every remote call.
    pub async fn fetch(
        &self,
        question_vector: &[f32],
        namespace: &Namespace,
    ) -> Result<Vec<RetrievalMatch>, PipelineError> {
        let top_k = self.options.top_k;
        let matches = self
            .executor
            .run("Vector query", || {
                self.store.query(namespace, question_vector, top_k)
            })
            .await?;

        debug!(
            namespace = %namespace,
            top_k,
            returned = matches.len(),
            best_score = matches.first().map(|hit| hit.score),
            "vector query finished"
        );
        Ok(matches)
    }

    pub async fn retrieve(
        &self,
        question_vector: &[f32],
        namespace: &Namespace,
    ) -> Result<Retrieval, PipelineError> {
        let matches = self.fetch(question_vector, namespace).await?;
        Ok(assemble_context(
            matches,
            self.options.score_threshold,
            self.options.max_context_chars,
            &self.options.separator,
        ))
    }
}

/// Keeps matches scoring strictly above `threshold`, best first, and joins
/// their text until `max_chars` would be exceeded. A single leading match that
/// is larger than the whole budget is cut down rather than dropped.
pub fn assemble_context(
    matches: Vec<RetrievalMatch>,
    threshold: f64,
    max_chars: usize,
    separator: &str,
) -> Retrieval {
    let mut candidates: Vec<RetrievalMatch> = matches
        .into_iter()
        .filter(|hit| !hit.metadata.text.trim().is_empty())
        .collect();
    if candidates.is_empty() {
        return Retrieval::Empty(EmptyReason::NoMatches);
    }

    candidates.retain(|hit| hit.score > threshold);
    if candidates.is_empty() {
        return Retrieval::Empty(EmptyReason::BelowThreshold);
    }
    candidates.sort_by(|left, right| right.score.total_cmp(&left.score));

    let separator_chars = separator.chars().count();
    let mut text = String::new();
    let mut used = 0usize;
    let mut match_ids = Vec::new();
    let mut truncated = false;

    for hit in &candidates {
        let body = hit.metadata.text.as_str();
        let body_chars = body.chars().count();

        if match_ids.is_empty() {
            if body_chars > max_chars {
                text.push_str(truncate(body, max_chars));
                match_ids.push(hit.id.clone());
                truncated = true;
                break;
            }
            text.push_str(body);
            used = body_chars;
        } else {
            if used + separator_chars + body_chars > max_chars {
                truncated = true;
                break;
            }
            text.push_str(separator);
            text.push_str(body);
            used += separator_chars + body_chars;
        }
        match_ids.push(hit.id.clone());
    }

    debug!(
        kept = match_ids.len(),
        above_threshold = candidates.len(),
        chars = text.chars().count(),
        truncated,
        "context assembled"
    );

    Retrieval::Context(ContextBlock {
        text,
        match_ids,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{IndexRecord, RecordMetadata};
    use crate::stores::InMemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn hit(id: &str, score: f64, text: &str) -> RetrievalMatch {
        RetrievalMatch {
            id: id.to_string(),
            score,
            metadata: RecordMetadata {
                text: text.to_string(),
                source_page: 1,
                namespace: "ns".to_string(),
                chunk_index: 0,
                indexed_at: Utc::now(),
            },
        }
    }

    fn context(retrieval: Retrieval) -> ContextBlock {
        match retrieval {
            Retrieval::Context(block) => block,
            Retrieval::Empty(reason) => panic!("expected context, got {reason:?}"),
        }
    }

    #[test]
    fn threshold_is_strict_and_order_is_by_score() {
        let matches = vec![
            hit("c", 0.7, "exactly at threshold"),
            hit("d", 0.5, "low"),
            hit("b", 0.75, "second"),
            hit("a", 0.9, "first"),
        ];

        let block = context(assemble_context(matches, 0.7, 8_000, "\n---\n"));
        assert_eq!(block.match_ids, vec!["a", "b"]);
        assert_eq!(block.text, "first\n---\nsecond");
        assert!(!block.truncated);
    }

    #[test]
    fn no_matches_and_all_below_threshold_are_distinguished() {
        assert_eq!(
            assemble_context(Vec::new(), 0.7, 100, "|"),
            Retrieval::Empty(EmptyReason::NoMatches)
        );
        assert_eq!(
            assemble_context(vec![hit("a", 0.4, "weak")], 0.7, 100, "|"),
            Retrieval::Empty(EmptyReason::BelowThreshold)
        );
    }

    #[test]
    fn blank_texts_are_ignored() {
        let matches = vec![hit("blank", 0.99, "   "), hit("real", 0.8, "content")];
        let block = context(assemble_context(matches, 0.7, 100, "|"));
        assert_eq!(block.match_ids, vec!["real"]);

        assert_eq!(
            assemble_context(vec![hit("blank", 0.99, "\n")], 0.7, 100, "|"),
            Retrieval::Empty(EmptyReason::NoMatches)
        );
    }

    #[test]
    fn budget_stops_before_overflowing_match() {
        let matches = vec![
            hit("a", 0.95, "aaaaaaaaaa"),
            hit("b", 0.9, "bbbbbbbbbb"),
            hit("c", 0.85, "cc"),
        ];

        let block = context(assemble_context(matches, 0.7, 21, "|"));
        assert_eq!(block.text, "aaaaaaaaaa|bbbbbbbbbb");
        assert_eq!(block.match_ids, vec!["a", "b"]);
        assert!(block.truncated);
    }

    #[test]
    fn oversized_first_match_is_cut_to_budget() {
        let block = context(assemble_context(
            vec![hit("a", 0.9, "ééééééééé"), hit("b", 0.8, "b")],
            0.1,
            4,
            "|",
        ));
        assert_eq!(block.text, "éééé");
        assert_eq!(block.match_ids, vec!["a"]);
        assert!(block.truncated);
    }

    #[tokio::test]
    async fn retrieve_is_scoped_to_the_namespace() {
        let store = InMemoryStore::new();
        let embedder = CharacterNgramEmbedder::default();
        let biology = Namespace::new("biology").unwrap();
        let chemistry = Namespace::new("chemistry").unwrap();
        let text = "Photosynthesis converts light energy into chemical energy.";

        for namespace in [&biology, &chemistry] {
            store
                .upsert(
                    namespace,
                    &[IndexRecord {
                        id: format!("{namespace}-chunk-0"),
                        vector: embedder.embed_text(text),
                        metadata: RecordMetadata {
                            text: text.to_string(),
                            source_page: 1,
                            namespace: namespace.to_string(),
                            chunk_index: 0,
                            indexed_at: Utc::now(),
                        },
                    }],
                )
                .await
                .unwrap();
        }

        let executor = RetryExecutor::new(RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        });
        let options = RetrievalOptions::default();
        let assembler = RetrievalAssembler::new(&store, &executor, &options);

        let block = context(
            assembler
                .retrieve(&embedder.embed_text(text), &biology)
                .await
                .unwrap(),
        );
        assert_eq!(block.match_ids, vec!["biology-chunk-0"]);
        assert_eq!(block.text, text);

        let empty = Namespace::new("physics").unwrap();
        assert_eq!(
            assembler
                .retrieve(&embedder.embed_text(text), &empty)
                .await
                .unwrap(),
            Retrieval::Empty(EmptyReason::NoMatches)
        );
    }
}
