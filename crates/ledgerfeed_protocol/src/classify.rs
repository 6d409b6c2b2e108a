//! Revision classification and extraction.

use crate::envelope::{ChangeEnvelope, RecordKind};
use crate::error::CorruptRevisionError;
use crate::event::{ChangeEvent, Fields};
use ledgerfeed_codec::Value;

/// Outcome of classifying an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Not a revision; nothing to project.
    Skip(RecordKind),
    /// A revision to project.
    Event(ChangeEvent),
}

impl Classified {
    /// Returns the event, if any.
    pub fn into_event(self) -> Option<ChangeEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Skip(_) => None,
        }
    }
}

/// Classifies an envelope and extracts its change event.
///
/// # Errors
///
/// Returns [`CorruptRevisionError`] when a revision envelope has no usable
/// document ID or version, or carries data that is not a struct.
pub fn classify(envelope: &ChangeEnvelope) -> Result<Classified, CorruptRevisionError> {
    if envelope.kind != RecordKind::RevisionDetails {
        return Ok(Classified::Skip(envelope.kind.clone()));
    }
    extract(&envelope.payload).map(Classified::Event)
}

fn extract(payload: &Value) -> Result<ChangeEvent, CorruptRevisionError> {
    let revision = payload
        .get("revision")
        .filter(|r| r.as_struct().is_some())
        .ok_or_else(|| CorruptRevisionError::new("payload has no revision"))?;
    let metadata = revision
        .get("metadata")
        .filter(|m| m.as_struct().is_some())
        .ok_or_else(|| CorruptRevisionError::new("revision has no metadata"))?;

    let document_id = metadata
        .get("id")
        .and_then(Value::as_text)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CorruptRevisionError::new("metadata has no document id"))?;

    let version = match metadata.get("version") {
        Some(Value::Int(v)) => u64::try_from(*v).map_err(|_| {
            CorruptRevisionError::new(format!("negative version {v}"))
                .with_document_id(document_id)
        })?,
        Some(other) => {
            return Err(CorruptRevisionError::new(format!(
                "version must be an int, found {}",
                other.type_name()
            ))
            .with_document_id(document_id))
        }
        None => {
            return Err(
                CorruptRevisionError::new("metadata has no version").with_document_id(document_id)
            )
        }
    };

    let fields = match revision.get("data") {
        None | Some(Value::Null) => None,
        Some(Value::Struct(pairs)) => {
            let mut fields = Fields::new();
            for (name, value) in pairs {
                fields.entry(name.clone()).or_insert_with(|| value.clone());
            }
            Some(fields)
        }
        Some(other) => {
            return Err(CorruptRevisionError::new(format!(
                "revision data must be a struct, found {}",
                other.type_name()
            ))
            .with_document_id(document_id))
        }
    };

    Ok(ChangeEvent {
        document_id: document_id.to_string(),
        version,
        fields,
        table: payload
            .get_path(&["tableInfo", "tableName"])
            .and_then(Value::as_text)
            .map(str::to_string),
        tx_id: metadata
            .get("txId")
            .and_then(Value::as_text)
            .map(str::to_string),
        tx_time: metadata.get("txTime").and_then(Value::as_timestamp).cloned(),
    })
}
