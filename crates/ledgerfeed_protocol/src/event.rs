//! The canonical change event.

use crate::envelope::{ChangeEnvelope, RecordKind};
use ledgerfeed_codec::{Timestamp, Value};
use std::collections::BTreeMap;

/// Business fields of a revision, by name.
pub type Fields = BTreeMap<String, Value>;

/// Type of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Full-state upsert of the document.
    Upsert,
    /// Logical deletion of the document.
    Delete,
}

/// One revision of a ledger document.
///
/// `fields` is the complete current state of the document's business fields,
/// never a diff. `None` marks a deletion.
///
/// # Fields
///
/// - `document_id`: stable identity of the ledger document
/// - `version`: per-document revision number; `0` is the creation
/// - `fields`: full snapshot, or `None` for a deletion
/// - `table`, `tx_id`, `tx_time`: provenance, when present in the journal
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Document ID.
    pub document_id: String,
    /// Revision number.
    pub version: u64,
    /// Full snapshot, or `None` for a deletion.
    pub fields: Option<Fields>,
    /// Source table name.
    pub table: Option<String>,
    /// Committing transaction ID.
    pub tx_id: Option<String>,
    /// Commit time.
    pub tx_time: Option<Timestamp>,
}

impl ChangeEvent {
    /// Creates an upsert event.
    pub fn upsert(document_id: impl Into<String>, version: u64, fields: Fields) -> Self {
        Self {
            document_id: document_id.into(),
            version,
            fields: Some(fields),
            table: None,
            tx_id: None,
            tx_time: None,
        }
    }

    /// Creates a deletion event.
    pub fn deletion(document_id: impl Into<String>, version: u64) -> Self {
        Self {
            document_id: document_id.into(),
            version,
            fields: None,
            table: None,
            tx_id: None,
            tx_time: None,
        }
    }

    /// Sets the source table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Sets the transaction ID and commit time.
    pub fn with_transaction(mut self, tx_id: impl Into<String>, tx_time: Option<Timestamp>) -> Self {
        self.tx_id = Some(tx_id.into());
        self.tx_time = tx_time;
        self
    }

    /// The type of change.
    pub fn kind(&self) -> ChangeKind {
        if self.fields.is_some() {
            ChangeKind::Upsert
        } else {
            ChangeKind::Delete
        }
    }

    /// Returns true if this event deletes the document.
    pub fn is_deletion(&self) -> bool {
        self.fields.is_none()
    }

    /// Returns true if this is the document's first revision.
    pub fn is_creation(&self) -> bool {
        self.version == 0
    }

    /// Builds the journal envelope that carries this event.
    pub fn to_envelope(&self) -> ChangeEnvelope {
        let mut metadata = vec![
            ("id".to_string(), Value::from(self.document_id.as_str())),
            ("version".to_string(), version_value(self.version)),
        ];
        if let Some(tx_time) = &self.tx_time {
            metadata.push(("txTime".to_string(), Value::Timestamp(tx_time.clone())));
        }
        if let Some(tx_id) = &self.tx_id {
            metadata.push(("txId".to_string(), Value::from(tx_id.as_str())));
        }

        let mut revision = vec![("metadata".to_string(), Value::Struct(metadata))];
        if let Some(fields) = &self.fields {
            revision.push((
                "data".to_string(),
                Value::Struct(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            ));
        }

        let mut payload = Vec::with_capacity(2);
        if let Some(table) = &self.table {
            payload.push((
                "tableInfo".to_string(),
                Value::structure([("tableName", Value::from(table.as_str()))]),
            ));
        }
        payload.push(("revision".to_string(), Value::Struct(revision)));

        ChangeEnvelope::new(RecordKind::RevisionDetails, Value::Struct(payload))
    }
}

fn version_value(version: u64) -> Value {
    // Journal versions are far below i64::MAX.
    Value::Int(i64::try_from(version).unwrap_or(i64::MAX))
}
