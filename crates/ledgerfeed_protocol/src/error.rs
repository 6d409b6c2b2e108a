//! Error types for the protocol crate.
//!
//! Every error here is record-scoped: it describes why one transport or
//! logical record could not be turned into a change event. None of them
//! abort a batch.

use ledgerfeed_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Any record-scoped failure on the path from transport bytes to event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Aggregate framing could not be unpacked.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The payload is not a valid change envelope.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A revision lacks its identity or version.
    #[error(transparent)]
    CorruptRevision(#[from] CorruptRevisionError),
}

/// Checksum or format violation while expanding a transport record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The transport encoding (base64) of the record is invalid.
    #[error("invalid transport encoding: {message}")]
    InvalidTransportEncoding {
        /// Decoder message.
        message: String,
    },

    /// The embedded digest does not match the aggregate body.
    #[error("aggregate checksum mismatch")]
    ChecksumMismatch {
        /// Digest carried by the record.
        expected: [u8; 16],
        /// Digest computed over the body.
        actual: [u8; 16],
    },

    /// The aggregate body is not a valid protobuf message.
    #[error("malformed aggregate body: {message}")]
    Protobuf {
        /// Decoder message.
        message: String,
    },

    /// A sub-record references a partition key that is not in the table.
    #[error("partition key index {index} out of range (table has {table_len})")]
    PartitionKeyIndex {
        /// The referenced index.
        index: u64,
        /// Number of entries in the table.
        table_len: usize,
    },

    /// A sub-record references an explicit hash key that is not in the table.
    #[error("explicit hash key index {index} out of range (table has {table_len})")]
    ExplicitHashKeyIndex {
        /// The referenced index.
        index: u64,
        /// Number of entries in the table.
        table_len: usize,
    },
}

impl FramingError {
    /// Create an invalid transport encoding error.
    pub fn invalid_encoding(message: impl Into<String>) -> Self {
        Self::InvalidTransportEncoding {
            message: message.into(),
        }
    }
}

/// The logical record payload could not be decoded into an envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    /// The binary payload is malformed.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// The top-level value is not a struct.
    #[error("envelope must be a struct, found {found}")]
    NotAStruct {
        /// Type name of the value found.
        found: &'static str,
    },

    /// A required envelope field is missing.
    #[error("envelope is missing field '{field}'")]
    MissingField {
        /// Field name.
        field: &'static str,
    },

    /// An envelope field has the wrong type.
    #[error("envelope field '{field}' must be {expected}, found {found}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Expected type description.
        expected: &'static str,
        /// Type name of the value found.
        found: &'static str,
    },
}

/// A revision envelope decoded cleanly but lacks a usable identity or version.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("corrupt revision: {reason}")]
pub struct CorruptRevisionError {
    /// What was wrong with the revision.
    pub reason: String,
    /// The document ID, when it could be read.
    pub document_id: Option<String>,
}

impl CorruptRevisionError {
    /// Create a corrupt revision error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            document_id: None,
        }
    }

    /// Attach the document ID that was read before the failure.
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

/// The invocation document itself could not be parsed.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// Not a valid stream event document.
    #[error("invalid stream event: {0}")]
    Json(#[from] serde_json::Error),
}
