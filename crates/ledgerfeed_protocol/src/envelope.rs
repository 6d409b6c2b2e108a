//! Change envelopes: the top-level document of every journal record.

use crate::error::EnvelopeError;
use ledgerfeed_codec::{from_ion, to_ion, CodecResult, Value};
use std::fmt;

/// Kind of journal record, from the envelope's `recordType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A document revision; the only kind projected downstream.
    RevisionDetails,
    /// Stream control record (created, completed, ...).
    Control,
    /// Summary of a committed ledger block.
    BlockSummary,
    /// Any kind this version does not know.
    Other(String),
}

impl RecordKind {
    /// Parses a record type name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "REVISION_DETAILS" => Self::RevisionDetails,
            "CONTROL" => Self::Control,
            "BLOCK_SUMMARY" => Self::BlockSummary,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RevisionDetails => "REVISION_DETAILS",
            Self::Control => "CONTROL",
            Self::BlockSummary => "BLOCK_SUMMARY",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    /// Kind of record.
    pub kind: RecordKind,
    /// Kind-specific payload (`Null` if absent).
    pub payload: Value,
    /// Stream ARN, when the producer included it.
    pub stream_arn: Option<String>,
}

impl ChangeEnvelope {
    /// Creates an envelope.
    pub fn new(kind: RecordKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            stream_arn: None,
        }
    }

    /// Decodes an envelope from a logical record payload.
    ///
    /// Only the first top-level user value is read; trailing values are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] for malformed binary input, or a
    /// shape error if the value is not an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Self::from_value(from_ion(bytes)?)
    }

    /// Interprets a decoded value as an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if `recordType` is missing or not text.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let fields = match value {
            Value::Struct(fields) => fields,
            other => {
                return Err(EnvelopeError::NotAStruct {
                    found: other.type_name(),
                })
            }
        };

        let mut kind = None;
        let mut payload = None;
        let mut stream_arn = None;
        for (name, field) in fields {
            match name.as_str() {
                "recordType" if kind.is_none() => {
                    let text = field.as_text().ok_or(EnvelopeError::InvalidField {
                        field: "recordType",
                        expected: "string or symbol",
                        found: field.type_name(),
                    })?;
                    kind = Some(RecordKind::from_name(text));
                }
                "payload" if payload.is_none() => payload = Some(field),
                "qldbStreamArn" if stream_arn.is_none() => {
                    stream_arn = field.as_text().map(str::to_string);
                }
                _ => {}
            }
        }

        Ok(Self {
            kind: kind.ok_or(EnvelopeError::MissingField {
                field: "recordType",
            })?,
            payload: payload.unwrap_or(Value::Null),
            stream_arn,
        })
    }

    /// Converts the envelope back to a value.
    pub fn to_value(&self) -> Value {
        let mut fields = Vec::with_capacity(3);
        if let Some(arn) = &self.stream_arn {
            fields.push(("qldbStreamArn".to_string(), Value::from(arn.as_str())));
        }
        fields.push((
            "recordType".to_string(),
            Value::from(self.kind.as_str()),
        ));
        fields.push(("payload".to_string(), self.payload.clone()));
        Value::Struct(fields)
    }

    /// Encodes the envelope as a binary payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload holds an unencodable value.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_ion(&self.to_value())
    }

    /// Returns true if this envelope carries a document revision.
    pub fn is_revision(&self) -> bool {
        self.kind == RecordKind::RevisionDetails
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfeed_codec::CodecError;

    #[test]
    fn record_kind_names() {
        assert_eq!(RecordKind::from_name("REVISION_DETAILS"), RecordKind::RevisionDetails);
        assert_eq!(RecordKind::from_name("CONTROL"), RecordKind::Control);
        assert_eq!(RecordKind::from_name("BLOCK_SUMMARY"), RecordKind::BlockSummary);
        assert_eq!(
            RecordKind::from_name("FUTURE_KIND"),
            RecordKind::Other("FUTURE_KIND".into())
        );
        assert_eq!(RecordKind::Control.to_string(), "CONTROL");
    }

    #[test]
    fn envelope_from_value() {
        let value = Value::structure([
            ("qldbStreamArn", Value::from("arn:aws:qldb:eu-west-1:1:stream/ledger/id")),
            ("recordType", Value::Symbol("REVISION_DETAILS".into())),
            ("payload", Value::structure([("revision", Value::Null)])),
        ]);

        let envelope = ChangeEnvelope::from_value(value).unwrap();
        assert!(envelope.is_revision());
        assert!(envelope.stream_arn.is_some());
        assert!(envelope.payload.get("revision").is_some());
    }

    #[test]
    fn missing_payload_is_null() {
        let value = Value::structure([("recordType", Value::from("CONTROL"))]);
        let envelope = ChangeEnvelope::from_value(value).unwrap();
        assert_eq!(envelope.kind, RecordKind::Control);
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn shape_errors() {
        assert_eq!(
            ChangeEnvelope::from_value(Value::Int(1)),
            Err(EnvelopeError::NotAStruct { found: "int" })
        );
        assert_eq!(
            ChangeEnvelope::from_value(Value::structure([("payload", Value::Null)])),
            Err(EnvelopeError::MissingField {
                field: "recordType"
            })
        );
        assert!(matches!(
            ChangeEnvelope::from_value(Value::structure([("recordType", Value::Int(3))])),
            Err(EnvelopeError::InvalidField { field: "recordType", .. })
        ));
    }

    #[test]
    fn decode_failure_is_decode_error() {
        assert_eq!(
            ChangeEnvelope::decode(&[0xe0, 0x01, 0x00, 0xea, 0x85]),
            Err(EnvelopeError::Decode(CodecError::UnexpectedEof))
        );
    }

    #[test]
    fn encode_decode() {
        let mut envelope = ChangeEnvelope::new(
            RecordKind::BlockSummary,
            Value::structure([("blockHash", Value::Blob(vec![1, 2, 3]))]),
        );
        envelope.stream_arn = Some("arn".into());

        let bytes = envelope.encode().unwrap();
        assert_eq!(ChangeEnvelope::decode(&bytes).unwrap(), envelope);
    }
}
