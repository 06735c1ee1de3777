use crate::error::{ErrorKind, PipelineError};
use crate::models::{IndexRecord, Namespace, RecordMetadata, RetrievalMatch};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Qdrant collection shared by all namespaces; every point carries its
/// namespace in the payload and every search filters on it.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(
        endpoint: &Url,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
            vector_size,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }
}

/// Qdrant only accepts integer or UUID point ids, so record ids are mapped
/// onto a stable UUID and kept verbatim in the payload.
pub fn point_id(record_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes())
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    record_id: String,
    text: String,
    source_page: u32,
    namespace: String,
    chunk_index: u64,
    indexed_at: chrono::DateTime<chrono::Utc>,
}

async fn ensure_success(response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PipelineError::from_status(BACKEND, status, &body))
}

fn check_dimension(vector_size: usize, actual: usize) -> Result<(), PipelineError> {
    if actual != vector_size {
        return Err(PipelineError::new(
            ErrorKind::InvalidInput,
            format!("vector dimension {actual} does not match collection size {vector_size}"),
        ));
    }
    Ok(())
}

fn upsert_body(
    namespace: &Namespace,
    records: &[IndexRecord],
    vector_size: usize,
) -> Result<Value, PipelineError> {
    let points = records
        .iter()
        .map(|record| {
            check_dimension(vector_size, record.vector.len())?;
            if record.metadata.namespace != namespace.as_str() {
                return Err(PipelineError::contract(format!(
                    "record {} belongs to namespace {}, not {namespace}",
                    record.id, record.metadata.namespace
                )));
            }

            Ok(json!({
                "id": point_id(&record.id),
                "vector": record.vector,
                "payload": {
                    "record_id": record.id,
                    "text": record.metadata.text,
                    "source_page": record.metadata.source_page,
                    "namespace": namespace.as_str(),
                    "chunk_index": record.metadata.chunk_index,
                    "indexed_at": record.metadata.indexed_at,
                },
            }))
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;

    Ok(json!({ "points": points }))
}

fn search_body(namespace: &Namespace, vector: &[f32], top_k: usize) -> Value {
    json!({
        "vector": vector,
        "limit": top_k,
        "with_payload": true,
        "filter": {
            "must": [
                { "key": "namespace", "match": { "value": namespace.as_str() } }
            ]
        },
    })
}

/// Search hits as matches, best first.
fn parse_hits(parsed: &Value) -> Result<Vec<RetrievalMatch>, PipelineError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut matches = Vec::with_capacity(hits.len());
    for hit in hits {
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
        let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
        let payload: PointPayload = serde_json::from_value(payload)?;

        matches.push(RetrievalMatch {
            id: payload.record_id,
            score,
            metadata: RecordMetadata {
                text: payload.text,
                source_page: payload.source_page,
                namespace: payload.namespace,
                chunk_index: payload.chunk_index,
                indexed_at: payload.indexed_at,
            },
        });
    }

    matches.sort_by(|left, right| right.score.total_cmp(&left.score));
    Ok(matches)
}

fn configured_size(parsed: &Value) -> Option<u64> {
    parsed
        .pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
}

fn check_collection_size(
    collection: &str,
    parsed: &Value,
    vector_size: usize,
) -> Result<(), PipelineError> {
    match configured_size(parsed) {
        Some(size) if size != vector_size as u64 => Err(PipelineError::invalid_config(format!(
            "collection {collection} stores {size}-dimensional vectors but the embedder produces {vector_size}"
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(
        &self,
        namespace: &Namespace,
        records: &[IndexRecord],
    ) -> Result<(), PipelineError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = upsert_body(namespace, records, self.vector_size)?;

        let request = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&body);
        let response = self.authorized(request).send().await?;
        ensure_success(response).await?;

        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalMatch>, PipelineError> {
        check_dimension(self.vector_size, vector.len())?;

        let request = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&search_body(namespace, vector, top_k));
        let response = ensure_success(self.authorized(request).send().await?).await?;
        let parsed: Value = response.json().await?;

        parse_hits(&parsed)
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        let request = self.client.get(self.collection_url());
        let response = self.authorized(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::invalid_config(format!(
                "qdrant collection {} does not exist",
                self.collection
            ))
            .with_hint("create the collection or point QDRANT_COLLECTION at an existing one"));
        }

        let parsed: Value = ensure_success(response).await?.json().await?;
        check_collection_size(&self.collection, &parsed, self.vector_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn point_ids_are_stable_per_record() {
        assert_eq!(point_id("notes-chunk-0-1"), point_id("notes-chunk-0-1"));
        assert_ne!(point_id("notes-chunk-0-1"), point_id("notes-chunk-0-2"));
    }

    #[test]
    fn endpoint_trailing_slash_is_dropped() {
        let url = Url::parse("http://localhost:6333/").unwrap();
        let store = QdrantStore::new(&url, "docs", 8).unwrap();
        assert_eq!(store.collection_url(), "http://localhost:6333/collections/docs");
    }

    fn record(namespace: &str, id: &str, vector: Vec<f32>) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            vector,
            metadata: RecordMetadata {
                text: format!("Text of {id}."),
                source_page: 4,
                namespace: namespace.to_string(),
                chunk_index: 7,
                indexed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            },
        }
    }

    #[test]
    fn wrong_dimension_is_rejected_before_any_request() {
        let namespace = Namespace::new("notes").unwrap();
        let error = upsert_body(&namespace, &[record("notes", "a", vec![1.0; 3])], 8).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidInput);
        assert_eq!(check_dimension(8, 3).unwrap_err().kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn records_from_another_namespace_are_a_contract_violation() {
        let namespace = Namespace::new("notes").unwrap();
        let error = upsert_body(&namespace, &[record("other", "a", vec![1.0, 0.0])], 2).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ContractViolation);
    }

    #[test]
    fn search_filters_on_the_requested_namespace() {
        let namespace = Namespace::new("biology-2024").unwrap();
        let body = search_body(&namespace, &[0.5, 0.5], 5);

        assert_eq!(body["limit"], 5);
        assert_eq!(body["with_payload"], true);
        let must = body.pointer("/filter/must").and_then(Value::as_array).unwrap();
        assert_eq!(must.len(), 1);
        assert_eq!(must[0]["key"], "namespace");
        assert_eq!(must[0]["match"]["value"], "biology-2024");
    }

    #[test]
    fn stored_payloads_come_back_as_matches() {
        let namespace = Namespace::new("notes").unwrap();
        let stored = record("notes", "notes-chunk-7-1714564800000-a1b2c3d4e5f6", vec![0.6, 0.8]);
        let body = upsert_body(&namespace, &[stored.clone()], 2).unwrap();

        let point = &body["points"][0];
        assert_eq!(point["id"], json!(point_id(&stored.id)));
        let response = json!({
            "result": [
                { "id": point["id"], "score": 0.42, "payload": {
                    "record_id": "other", "text": "Lower.", "source_page": 1,
                    "namespace": "notes", "chunk_index": 0,
                    "indexed_at": "2024-05-01T12:00:00Z" } },
                { "id": point["id"], "score": 0.91, "payload": point["payload"] },
            ]
        });

        let matches = parse_hits(&response).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, stored.id);
        assert_eq!(matches[0].score, 0.91);
        assert_eq!(matches[0].metadata.text, stored.metadata.text);
        assert_eq!(matches[0].metadata.source_page, 4);
        assert_eq!(matches[0].metadata.namespace, "notes");
        assert_eq!(matches[0].metadata.chunk_index, 7);
        assert_eq!(matches[0].metadata.indexed_at, stored.metadata.indexed_at);
        assert_eq!(matches[1].id, "other");

        assert!(parse_hits(&json!({ "result": [] })).unwrap().is_empty());
    }

    #[test]
    fn collection_size_mismatch_is_a_config_error() {
        let info = json!({ "result": { "config": { "params": { "vectors": { "size": 1536 } } } } });
        assert_eq!(configured_size(&info), Some(1536));

        let error = check_collection_size("docs", &info, 1024).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidConfig);
        assert!(error.message.contains("1536"));
        assert!(check_collection_size("docs", &info, 1536).is_ok());
        assert!(check_collection_size("docs", &json!({ "result": {} }), 1024).is_ok());
    }
}
