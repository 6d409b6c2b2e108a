//! # Ledgerfeed Engine
//!
//! Projection sinks and the batch pipeline for the ledger change feed.
//!
//! This crate provides:
//! - The `ProjectionSink` capability and its two implementations
//! - Key-value store boundary (DynamoDB JSON protocol, in-memory)
//! - Search-index boundary (HTTP with external versioning, in-memory)
//! - Request signing abstraction
//! - The batch pipeline with bounded fan-out and a time budget
//!
//! ## Key Invariants
//!
//! - Every write is conditioned on the stored version of its document
//! - A stale write is `Superseded`, never an error
//! - Record-scoped failures never stop sibling records
//! - Only sink failures and timeouts fail a batch
//! - No retries inside the pipeline; redelivery is the recovery path

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod kv;
mod pipeline;
mod search;
mod signing;
mod sink;

pub use config::{
    FieldMap, KeyValueSinkConfig, PipelineConfig, SearchSinkConfig, VersionType,
    DEFAULT_MAX_IN_FLIGHT,
};
pub use error::{PipelineError, PipelineResult, SinkError, SinkResult};
pub use kv::{
    item_to_json, AttributeValue, ConditionalWrite, DynamoDbHttpStore, Item, KeyValueSink,
    KeyValueStore, MemoryKeyValueStore, PrimaryKey, VersionGuard, WriteOutcome,
};
pub use pipeline::{
    BatchReport, Pipeline, PipelineStats, RecordFailure, RecordStage, SinkFailure,
};
pub use search::{
    HttpMethod, HttpSearchTransport, MemorySearchIndex, SearchIndexSink, SearchRequest,
    SearchResponse, SearchTransport,
};
pub use signing::{RequestSigner, StaticHeaders, Unsigned};
pub use sink::{ApplyOutcome, ProjectionSink};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
