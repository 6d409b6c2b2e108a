//! # Ledgerfeed Protocol
//!
//! Stream intake, aggregate framing and change-envelope types.
//!
//! This crate provides the record path from transport bytes to events:
//! - `TransportBatch` for the per-invocation stream event document
//! - `expand` / `AggregateBuilder` for aggregate framing
//! - `ChangeEnvelope` for decoded journal records
//! - `classify` for extracting a `ChangeEvent` from a revision
//! - JSON rendering for downstream stores
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ```
//! use ledgerfeed_protocol::{classify, expand, ChangeEnvelope, ChangeEvent, Fields, TransportRecord};
//!
//! let event = ChangeEvent::upsert("A1", 0, Fields::new());
//! let payload = event.to_envelope().encode().unwrap();
//! let record = TransportRecord::new("1", "A1", payload);
//!
//! for logical in expand(&record, true) {
//!     let envelope = ChangeEnvelope::decode(&logical.unwrap().data).unwrap();
//!     let classified = classify(&envelope).unwrap();
//!     assert_eq!(classified.into_event(), Some(event.clone()));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregate;
mod batch;
mod classify;
mod envelope;
mod error;
mod event;
mod json;

pub use aggregate::{
    expand, frame_aggregate, is_aggregated, AggregateBuilder, AggregatedRecord, Expansion,
    LogicalRecord, Record, RecordId, Tag, AGGREGATE_MAGIC, DIGEST_LEN,
};
pub use batch::{
    KinesisData, MalformedRecord, StreamEvent, StreamEventRecord, TransportBatch, TransportRecord,
};
pub use classify::{classify, Classified};
pub use envelope::{ChangeEnvelope, RecordKind};
pub use error::{
    CorruptRevisionError, EnvelopeError, FramingError, IntakeError, ProtocolError, ProtocolResult,
};
pub use event::{ChangeEvent, ChangeKind, Fields};
pub use json::{envelope_to_json, fields_to_json, value_to_json};

/// Decodes and classifies one logical record.
///
/// # Errors
///
/// Returns the record-scoped error of whichever step failed.
pub fn decode_record(record: &LogicalRecord) -> ProtocolResult<Classified> {
    let envelope = ChangeEnvelope::decode(&record.data)?;
    Ok(classify(&envelope)?)
}
