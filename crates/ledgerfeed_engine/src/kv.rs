//! Key-value projection sink.
//!
//! Each document becomes one item keyed by its document ID. Every write
//! carries a [`VersionGuard`] which the store evaluates atomically:
//! the write lands only when the item has no version attribute yet or
//! its stored version is lower than the incoming one.
//!
//! Deletions do not remove the item. They set the version and a deleted
//! flag so the version token survives for later conflict checks.

use crate::config::KeyValueSinkConfig;
use crate::error::{SinkError, SinkResult};
use crate::signing::{RequestSigner, Unsigned};
use crate::sink::{ApplyOutcome, ProjectionSink};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ledgerfeed_codec::{Decimal, Value};
use ledgerfeed_protocol::ChangeEvent;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A stored item: attribute name to typed value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A typed attribute value in the store's JSON wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String.
    #[serde(rename = "S")]
    String(String),
    /// Number, carried as its decimal string.
    #[serde(rename = "N")]
    Number(String),
    /// Boolean.
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// Null marker.
    #[serde(rename = "NULL")]
    Null(bool),
    /// List.
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    /// Map.
    #[serde(rename = "M")]
    Map(BTreeMap<String, AttributeValue>),
    /// Binary, base64 on the wire.
    #[serde(rename = "B", with = "base64_bytes")]
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Converts a decoded value to an attribute value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null(true),
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(n) => Self::Number(n.to_string()),
            Value::Float(f) if f.is_finite() => Self::Number(f.to_string()),
            Value::Float(_) => Self::Null(true),
            Value::Decimal(d) if number_in_range(d) => Self::Number(d.to_string()),
            Value::Decimal(d) => Self::String(d.to_string()),
            Value::Timestamp(ts) => Self::String(ts.to_rfc3339()),
            Value::Symbol(s) | Value::String(s) => Self::String(s.clone()),
            Value::Blob(bytes) | Value::Clob(bytes) => Self::Binary(bytes.clone()),
            Value::List(items) | Value::SExp(items) => {
                Self::List(items.iter().map(Self::from_value).collect())
            }
            Value::Struct(fields) => {
                let mut map = BTreeMap::new();
                for (name, field) in fields {
                    map.entry(name.clone())
                        .or_insert_with(|| Self::from_value(field));
                }
                Self::Map(map)
            }
        }
    }

    /// Creates a number attribute.
    pub fn number(n: impl ToString) -> Self {
        Self::Number(n.to_string())
    }

    /// Creates a string attribute.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Returns the value as an unsigned integer, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.parse().ok(),
            _ => None,
        }
    }

    /// Renders the value as untyped JSON.
    pub fn to_json(&self) -> Json {
        match self {
            Self::String(s) => Json::String(s.clone()),
            Self::Number(n) => n
                .parse::<i64>()
                .map(Json::from)
                .ok()
                .or_else(|| n.parse::<f64>().ok().and_then(Number::from_f64).map(Json::Number))
                .unwrap_or_else(|| Json::String(n.clone())),
            Self::Bool(b) => Json::Bool(*b),
            Self::Null(_) => Json::Null,
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Json::Object(
                map.iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Binary(bytes) => Json::String(STANDARD.encode(bytes)),
        }
    }
}

/// Whether the store can hold `d` as a number: zero, or a magnitude
/// between 1E-130 and 1E126.
fn number_in_range(d: &Decimal) -> bool {
    if d.is_zero() {
        return true;
    }
    let digits = d.coefficient.unsigned_abs().ilog10() as i64;
    let magnitude = digits + i64::from(d.exponent);
    (-130..=125).contains(&magnitude)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Renders an item as untyped JSON.
pub fn item_to_json(item: &Item) -> Json {
    let map: Map<String, Json> = item
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    Json::Object(map)
}

/// The primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    /// Key attribute name.
    pub attribute: String,
    /// Document ID.
    pub value: String,
}

impl PrimaryKey {
    /// Creates a primary key.
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(self.attribute.clone(), AttributeValue::string(&self.value));
        item
    }
}

/// Condition attached to every write: "attribute absent OR stored < incoming".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGuard {
    /// Version attribute name.
    pub attribute: String,
    /// Version carried by the write.
    pub incoming: u64,
}

impl VersionGuard {
    /// Creates a guard.
    pub fn new(attribute: impl Into<String>, incoming: u64) -> Self {
        Self {
            attribute: attribute.into(),
            incoming,
        }
    }

    /// Evaluates the guard against the currently stored item.
    ///
    /// A stored version that is not a number fails the guard.
    pub fn admits(&self, current: Option<&Item>) -> bool {
        match current.and_then(|item| item.get(&self.attribute)) {
            None => true,
            Some(stored) => stored.as_u64().is_some_and(|v| v < self.incoming),
        }
    }

    /// Condition expression in the store's syntax.
    pub const EXPRESSION: &'static str = "attribute_not_exists(#v) OR #v < :v";
}

/// A version-conditioned write.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalWrite {
    /// Replaces the whole item.
    Put {
        /// Target table.
        table: String,
        /// Item key.
        key: PrimaryKey,
        /// Full item, key and version included.
        item: Item,
        /// Version condition.
        guard: VersionGuard,
    },
    /// Sets the version and the deleted flag, keeping other attributes.
    Tombstone {
        /// Target table.
        table: String,
        /// Item key.
        key: PrimaryKey,
        /// Flag attribute set to true.
        deleted_attribute: String,
        /// Version condition.
        guard: VersionGuard,
    },
}

impl ConditionalWrite {
    /// Returns the target table.
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Tombstone { table, .. } => table,
        }
    }

    /// Returns the item key.
    pub fn key(&self) -> &PrimaryKey {
        match self {
            Self::Put { key, .. } | Self::Tombstone { key, .. } => key,
        }
    }

    /// Returns the version condition.
    pub fn guard(&self) -> &VersionGuard {
        match self {
            Self::Put { guard, .. } | Self::Tombstone { guard, .. } => guard,
        }
    }

    /// Returns the operation name and JSON body for the store's HTTP API.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Encoding`] if the item cannot be serialized.
    pub fn to_request(&self) -> SinkResult<(&'static str, Json)> {
        let version = AttributeValue::number(self.guard().incoming);
        match self {
            Self::Put {
                table, item, guard, ..
            } => {
                let item = serde_json::to_value(item)
                    .map_err(|e| SinkError::Encoding(e.to_string()))?;
                Ok((
                    "PutItem",
                    json!({
                        "TableName": table,
                        "Item": item,
                        "ConditionExpression": VersionGuard::EXPRESSION,
                        "ExpressionAttributeNames": { "#v": guard.attribute },
                        "ExpressionAttributeValues": { ":v": version },
                    }),
                ))
            }
            Self::Tombstone {
                table,
                key,
                deleted_attribute,
                guard,
            } => {
                let key = serde_json::to_value(key.to_item())
                    .map_err(|e| SinkError::Encoding(e.to_string()))?;
                Ok((
                    "UpdateItem",
                    json!({
                        "TableName": table,
                        "Key": key,
                        "UpdateExpression": "SET #v = :v, #d = :d",
                        "ConditionExpression": VersionGuard::EXPRESSION,
                        "ExpressionAttributeNames": {
                            "#v": guard.attribute,
                            "#d": deleted_attribute,
                        },
                        "ExpressionAttributeValues": {
                            ":v": version,
                            ":d": AttributeValue::Bool(true),
                        },
                    }),
                ))
            }
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The condition held and the write landed.
    Written,
    /// The condition failed; nothing changed.
    ConditionFailed,
}

/// A keyed store with atomic conditional writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Performs one conditional write.
    async fn write(&self, write: ConditionalWrite) -> SinkResult<WriteOutcome>;
}

/// An in-memory store.
///
/// Writes are evaluated and applied under a single lock, which makes the
/// conditional check atomic.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    tables: Mutex<BTreeMap<String, BTreeMap<String, Item>>>,
    failure: Mutex<Option<SinkError>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored item.
    pub fn get(&self, table: &str, key: &str) -> Option<Item> {
        self.tables.lock().get(table)?.get(key).cloned()
    }

    /// Returns every item in a table, ordered by key.
    pub fn items(&self, table: &str) -> Vec<Item> {
        self.tables
            .lock()
            .get(table)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes every subsequent write fail with `error` until cleared.
    pub fn set_failure(&self, error: Option<SinkError>) {
        *self.failure.lock() = error;
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn write(&self, write: ConditionalWrite) -> SinkResult<WriteOutcome> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }

        let mut tables = self.tables.lock();
        let items = tables.entry(write.table().to_string()).or_default();
        if !write.guard().admits(items.get(&write.key().value)) {
            return Ok(WriteOutcome::ConditionFailed);
        }

        match write {
            ConditionalWrite::Put { key, item, .. } => {
                items.insert(key.value, item);
            }
            ConditionalWrite::Tombstone {
                key,
                deleted_attribute,
                guard,
                ..
            } => {
                let item = items
                    .entry(key.value.clone())
                    .or_insert_with(|| key.to_item());
                item.insert(guard.attribute, AttributeValue::number(guard.incoming));
                item.insert(deleted_attribute, AttributeValue::Bool(true));
            }
        }
        Ok(WriteOutcome::Written)
    }
}

const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.0";

/// A store reached over the DynamoDB JSON protocol.
pub struct DynamoDbHttpStore {
    client: Client,
    endpoint: Url,
    signer: Arc<dyn RequestSigner>,
}

impl DynamoDbHttpStore {
    /// Creates a store for `endpoint` with an unsigned client.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable transport error if the endpoint is not a URL.
    pub fn new(endpoint: &str) -> SinkResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| SinkError::transport_fatal(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
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

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl KeyValueStore for DynamoDbHttpStore {
    async fn write(&self, write: ConditionalWrite) -> SinkResult<WriteOutcome> {
        let (operation, body) = write.to_request()?;
        let body = serde_json::to_vec(&body).map_err(|e| SinkError::Encoding(e.to_string()))?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(body)
            .build()?;
        self.signer.sign(&mut request).await?;

        let response = self.client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(WriteOutcome::Written);
        }

        let text = response.text().await.unwrap_or_default();
        map_error_response(status.as_u16(), &text)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

fn map_error_response(status: u16, text: &str) -> SinkResult<WriteOutcome> {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or(ErrorBody {
        kind: String::new(),
        message: text.to_string(),
    });
    let kind = body.kind.rsplit('#').next().unwrap_or_default();

    match kind {
        "ConditionalCheckFailedException" => Ok(WriteOutcome::ConditionFailed),
        "ProvisionedThroughputExceededException"
        | "ThrottlingException"
        | "RequestLimitExceeded" => Err(SinkError::Throttled(body.message)),
        _ if status >= 500 => Err(SinkError::transport_retryable(format!(
            "status {status}: {kind} {}",
            body.message
        ))),
        _ => Err(SinkError::Rejected {
            status,
            message: format!("{kind}: {}", body.message),
        }),
    }
}

/// Projects events into a [`KeyValueStore`].
pub struct KeyValueSink {
    name: String,
    store: Arc<dyn KeyValueStore>,
    config: KeyValueSinkConfig,
}

impl KeyValueSink {
    /// Creates a sink writing through `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: KeyValueSinkConfig) -> Self {
        Self {
            name: "key-value".to_string(),
            store,
            config,
        }
    }

    /// Overrides the sink name used in reports.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &KeyValueSinkConfig {
        &self.config
    }

    /// Builds the conditional write for an event.
    pub fn to_write(&self, event: &ChangeEvent) -> ConditionalWrite {
        let config = &self.config;
        let key = PrimaryKey::new(&config.key_attribute, &event.document_id);
        let guard = VersionGuard::new(&config.version_attribute, event.version);

        match &event.fields {
            Some(fields) => {
                let mut item: Item = fields
                    .iter()
                    .map(|(name, value)| {
                        (
                            config.field_map.target(name).to_string(),
                            AttributeValue::from_value(value),
                        )
                    })
                    .collect();
                item.insert(key.attribute.clone(), AttributeValue::string(&key.value));
                item.insert(guard.attribute.clone(), AttributeValue::number(guard.incoming));
                ConditionalWrite::Put {
                    table: config.table_name.clone(),
                    key,
                    item,
                    guard,
                }
            }
            None => ConditionalWrite::Tombstone {
                table: config.table_name.clone(),
                key,
                deleted_attribute: config.deleted_attribute.clone(),
                guard,
            },
        }
    }
}

#[async_trait]
impl ProjectionSink for KeyValueSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, event: &ChangeEvent) -> SinkResult<ApplyOutcome> {
        match self.store.write(self.to_write(event)).await? {
            WriteOutcome::Written => Ok(ApplyOutcome::Applied),
            WriteOutcome::ConditionFailed => {
                debug!(
                    sink = %self.name,
                    document_id = %event.document_id,
                    version = event.version,
                    "stored version is not older"
                );
                Ok(ApplyOutcome::Superseded)
            }
        }
    }
}
