//! Search-index projection sink.
//!
//! The index engine resolves conflicts itself: each request carries the
//! revision version as an external version number and the engine refuses
//! writes that do not advance it, answering with a conflict status.

use crate::config::{SearchSinkConfig, VersionType};
use crate::error::{SinkError, SinkResult};
use crate::signing::{RequestSigner, Unsigned};
use crate::sink::{ApplyOutcome, ProjectionSink};
use async_trait::async_trait;
use ledgerfeed_protocol::{value_to_json, ChangeEvent};
use parking_lot::Mutex;
use reqwest::{Client, Method, Url};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// HTTP method of a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Replace a document.
    Put,
    /// Delete a document.
    Delete,
}

impl HttpMethod {
    fn to_method(self) -> Method {
        match self {
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A request to the search index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Method.
    pub method: HttpMethod,
    /// Unencoded path segments.
    pub path: Vec<String>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Json>,
}

impl SearchRequest {
    /// Returns a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A response from the search index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    /// HTTP status.
    pub status: u16,
    /// Response body; `Null` when empty or not JSON.
    pub body: Json,
}

impl SearchResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Json) -> Self {
        Self { status, body }
    }

    fn reason(&self) -> String {
        self.body
            .pointer("/error/type")
            .or_else(|| self.body.pointer("/error"))
            .or_else(|| self.body.pointer("/result"))
            .map(|reason| match reason {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| format!("status {}", self.status))
    }
}

/// Sends requests to a search index.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Sends one request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: SearchRequest) -> SinkResult<SearchResponse>;
}

/// A search index reached over HTTP.
pub struct HttpSearchTransport {
    client: Client,
    base: Url,
    signer: Arc<dyn RequestSigner>,
}

impl HttpSearchTransport {
    /// Creates a transport for the index domain at `base`.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable transport error if `base` is not a URL that
    /// can carry a path.
    pub fn new(base: &str) -> SinkResult<Self> {
        let base = Url::parse(base)
            .map_err(|e| SinkError::transport_fatal(format!("invalid endpoint {base}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SinkError::transport_fatal(format!(
                "endpoint {base} cannot carry a path"
            )));
        }
        Ok(Self {
            client: Client::new(),
            base,
            signer: Arc::new(Unsigned),
        })
    }

    /// Uses a preconfigured HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Uses `signer` to stamp credentials on each request.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }

    fn url_for(&self, request: &SearchRequest) -> SinkResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::transport_fatal("endpoint cannot carry a path"))?
            .pop_if_empty()
            .extend(&request.path);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

#[async_trait]
impl SearchTransport for HttpSearchTransport {
    async fn send(&self, request: SearchRequest) -> SinkResult<SearchResponse> {
        let url = self.url_for(&request)?;
        let mut builder = self.client.request(request.method.to_method(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let mut http_request = builder.build()?;
        self.signer.sign(&mut http_request).await?;

        let response = self.client.execute(http_request).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
        Ok(SearchResponse { status, body })
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    /// `None` for a delete tombstone.
    source: Option<Json>,
}

/// An in-memory index with external versioning.
///
/// Deletes leave a versioned tombstone behind, and deleting a missing
/// document answers 404 while still recording the tombstone.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    documents: Mutex<BTreeMap<(String, String), StoredDocument>>,
    failure: Mutex<Option<SinkError>>,
}

impl MemorySearchIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the source of a live document.
    pub fn get(&self, index: &str, id: &str) -> Option<Json> {
        self.documents
            .lock()
            .get(&(index.to_string(), id.to_string()))
            .and_then(|doc| doc.source.clone())
    }

    /// Returns the stored version, tombstones included.
    pub fn version(&self, index: &str, id: &str) -> Option<u64> {
        self.documents
            .lock()
            .get(&(index.to_string(), id.to_string()))
            .map(|doc| doc.version)
    }

    /// Returns every live document of an index, ordered by ID.
    pub fn documents(&self, index: &str) -> Vec<(String, Json)> {
        self.documents
            .lock()
            .iter()
            .filter(|((doc_index, _), _)| doc_index == index)
            .filter_map(|((_, id), doc)| doc.source.clone().map(|source| (id.clone(), source)))
            .collect()
    }

    /// Makes every subsequent request fail with `error` until cleared.
    pub fn set_failure(&self, error: Option<SinkError>) {
        *self.failure.lock() = error;
    }
}

fn bad_request(reason: &str) -> SearchResponse {
    SearchResponse::new(400, json!({"error": {"type": reason}}))
}

#[async_trait]
impl SearchTransport for MemorySearchIndex {
    async fn send(&self, request: SearchRequest) -> SinkResult<SearchResponse> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }

        let [index, doc, id] = request.path.as_slice() else {
            return Ok(bad_request("invalid_path"));
        };
        if doc != "_doc" {
            return Ok(bad_request("invalid_path"));
        }
        let Some(version) = request
            .query_param("version")
            .and_then(|v| v.parse::<u64>().ok())
        else {
            return Ok(bad_request("action_request_validation_exception"));
        };
        let version_type = match request.query_param("version_type") {
            Some("external") => VersionType::External,
            Some("external_gte") => VersionType::ExternalGte,
            _ => return Ok(bad_request("action_request_validation_exception")),
        };

        let key = (index.clone(), id.clone());
        let mut documents = self.documents.lock();
        let existing = documents.get(&key).cloned();

        if let Some(existing) = &existing {
            if version_type.conflicts(existing.version, version) {
                return Ok(SearchResponse::new(
                    409,
                    json!({"error": {"type": "version_conflict_engine_exception"}}),
                ));
            }
        }

        match request.method {
            HttpMethod::Put => {
                let source = request.body.unwrap_or_else(|| json!({}));
                let created = existing.map_or(true, |doc| doc.source.is_none());
                documents.insert(
                    key,
                    StoredDocument {
                        version,
                        source: Some(source),
                    },
                );
                let (status, result) = if created { (201, "created") } else { (200, "updated") };
                Ok(SearchResponse::new(
                    status,
                    json!({"_id": id, "_version": version, "result": result}),
                ))
            }
            HttpMethod::Delete => {
                let found = existing.is_some_and(|doc| doc.source.is_some());
                documents.insert(
                    key,
                    StoredDocument {
                        version,
                        source: None,
                    },
                );
                let (status, result) = if found { (200, "deleted") } else { (404, "not_found") };
                Ok(SearchResponse::new(
                    status,
                    json!({"_id": id, "_version": version, "result": result}),
                ))
            }
        }
    }
}

/// Projects events into a search index.
pub struct SearchIndexSink {
    name: String,
    transport: Arc<dyn SearchTransport>,
    config: SearchSinkConfig,
}

impl SearchIndexSink {
    /// Creates a sink sending through `transport`.
    pub fn new(transport: Arc<dyn SearchTransport>, config: SearchSinkConfig) -> Self {
        Self {
            name: "search-index".to_string(),
            transport,
            config,
        }
    }

    /// Overrides the sink name used in reports.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SearchSinkConfig {
        &self.config
    }

    /// Builds the request for an event.
    pub fn to_request(&self, event: &ChangeEvent) -> SearchRequest {
        let config = &self.config;
        let path = vec![
            config.index.clone(),
            "_doc".to_string(),
            event.document_id.clone(),
        ];
        let query = vec![
            ("version".to_string(), event.version.to_string()),
            (
                "version_type".to_string(),
                config.version_type.as_str().to_string(),
            ),
        ];

        match &event.fields {
            Some(fields) => {
                let mut body: Map<String, Json> = fields
                    .iter()
                    .map(|(name, value)| {
                        (config.field_map.target(name).to_string(), value_to_json(value))
                    })
                    .collect();
                body.insert("version".to_string(), Json::from(event.version));
                SearchRequest {
                    method: HttpMethod::Put,
                    path,
                    query,
                    body: Some(Json::Object(body)),
                }
            }
            None => SearchRequest {
                method: HttpMethod::Delete,
                path,
                query,
                body: None,
            },
        }
    }
}

fn map_response(method: HttpMethod, response: &SearchResponse) -> SinkResult<ApplyOutcome> {
    match response.status {
        200..=299 => Ok(ApplyOutcome::Applied),
        404 if method == HttpMethod::Delete => Ok(ApplyOutcome::Applied),
        409 => Ok(ApplyOutcome::Superseded),
        429 => Err(SinkError::Throttled(response.reason())),
        500..=599 => Err(SinkError::transport_retryable(format!(
            "status {}: {}",
            response.status,
            response.reason()
        ))),
        status => Err(SinkError::Rejected {
            status,
            message: response.reason(),
        }),
    }
}

#[async_trait]
impl ProjectionSink for SearchIndexSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, event: &ChangeEvent) -> SinkResult<ApplyOutcome> {
        let request = self.to_request(event);
        let method = request.method;
        let response = self.transport.send(request).await?;
        let outcome = map_response(method, &response)?;
        if outcome == ApplyOutcome::Superseded {
            debug!(
                sink = %self.name,
                document_id = %event.document_id,
                version = event.version,
                "index holds a newer version"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldMap;
    use ledgerfeed_codec::Value;
    use ledgerfeed_protocol::Fields;

    fn sink() -> (Arc<MemorySearchIndex>, SearchIndexSink) {
        let index = Arc::new(MemorySearchIndex::new());
        let sink = SearchIndexSink::new(index.clone(), SearchSinkConfig::default());
        (index, sink)
    }

    fn upsert(id: &str, version: u64, points: i64) -> ChangeEvent {
        let mut fields = Fields::new();
        fields.insert("postcode".into(), Value::from("SW1A"));
        fields.insert("penaltyPoints".into(), Value::Int(points));
        ChangeEvent::upsert(id, version, fields)
    }

    #[test]
    fn upsert_request() {
        let (_, sink) = sink();
        let request = sink.to_request(&upsert("A1", 3, 6));
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.path, vec!["licence", "_doc", "A1"]);
        assert_eq!(request.query_param("version"), Some("3"));
        assert_eq!(request.query_param("version_type"), Some("external"));
        assert_eq!(
            request.body,
            Some(json!({"postcode": "SW1A", "penaltyPoints": 6, "version": 3}))
        );
    }

    #[test]
    fn delete_request() {
        let (_, sink) = sink();
        let request = sink.to_request(&ChangeEvent::deletion("A1", 1));
        assert_eq!(request.method, HttpMethod::Delete);
        assert_eq!(request.query_param("version"), Some("1"));
        assert!(request.body.is_none());
    }

    #[test]
    fn renamed_fields() {
        let index = Arc::new(MemorySearchIndex::new());
        let config = SearchSinkConfig::new("licence")
            .with_field_map(FieldMap::new().rename("penaltyPoints", "points"))
            .with_version_type(VersionType::ExternalGte);
        let sink = SearchIndexSink::new(index, config);

        let request = sink.to_request(&upsert("A1", 0, 2));
        assert_eq!(request.body.as_ref().unwrap()["points"], json!(2));
        assert_eq!(request.query_param("version_type"), Some("external_gte"));
    }

    #[tokio::test]
    async fn external_versioning() {
        let (index, sink) = sink();

        assert_eq!(sink.apply(&upsert("A1", 0, 0)).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            sink.apply(&upsert("A1", 0, 5)).await.unwrap(),
            ApplyOutcome::Superseded
        );
        assert_eq!(index.get("licence", "A1").unwrap()["penaltyPoints"], json!(0));

        assert_eq!(sink.apply(&upsert("A1", 2, 9)).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            sink.apply(&upsert("A1", 1, 1)).await.unwrap(),
            ApplyOutcome::Superseded
        );
        assert_eq!(index.version("licence", "A1"), Some(2));
    }

    #[tokio::test]
    async fn delete_then_revive() {
        let (index, sink) = sink();
        sink.apply(&upsert("A1", 0, 0)).await.unwrap();

        let deletion = ChangeEvent::deletion("A1", 1);
        assert_eq!(sink.apply(&deletion).await.unwrap(), ApplyOutcome::Applied);
        assert!(index.get("licence", "A1").is_none());
        assert_eq!(index.version("licence", "A1"), Some(1));

        assert_eq!(
            sink.apply(&upsert("A1", 1, 4)).await.unwrap(),
            ApplyOutcome::Superseded
        );
        assert_eq!(sink.apply(&upsert("A1", 2, 4)).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(index.documents("licence").len(), 1);
    }

    #[tokio::test]
    async fn delete_of_missing_document_is_applied() {
        let (index, sink) = sink();
        let outcome = sink.apply(&ChangeEvent::deletion("B2", 4)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(index.version("licence", "B2"), Some(4));
    }

    #[tokio::test]
    async fn transport_failure_is_error() {
        let (index, sink) = sink();
        index.set_failure(Some(SinkError::transport_retryable("connection reset")));
        assert!(sink.apply(&upsert("A1", 0, 0)).await.is_err());
    }

    #[test]
    fn response_mapping() {
        let ok = SearchResponse::new(201, Json::Null);
        assert_eq!(map_response(HttpMethod::Put, &ok).unwrap(), ApplyOutcome::Applied);

        let missing = SearchResponse::new(404, json!({"result": "not_found"}));
        assert_eq!(
            map_response(HttpMethod::Delete, &missing).unwrap(),
            ApplyOutcome::Applied
        );
        assert!(matches!(
            map_response(HttpMethod::Put, &missing),
            Err(SinkError::Rejected { status: 404, .. })
        ));

        let conflict = SearchResponse::new(409, Json::Null);
        assert_eq!(
            map_response(HttpMethod::Put, &conflict).unwrap(),
            ApplyOutcome::Superseded
        );

        let busy = SearchResponse::new(429, Json::Null);
        assert!(map_response(HttpMethod::Put, &busy).unwrap_err().is_retryable());

        let down = SearchResponse::new(503, Json::Null);
        assert!(map_response(HttpMethod::Put, &down).unwrap_err().is_retryable());

        let invalid = SearchResponse::new(
            400,
            json!({"error": {"type": "mapper_parsing_exception"}}),
        );
        assert_eq!(
            map_response(HttpMethod::Put, &invalid).unwrap_err(),
            SinkError::Rejected {
                status: 400,
                message: "mapper_parsing_exception".into()
            }
        );
    }
}
