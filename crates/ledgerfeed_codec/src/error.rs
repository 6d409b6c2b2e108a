//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The stream did not start with (or contained a malformed) version marker.
    #[error("invalid binary version marker: {found:02x?}")]
    InvalidVersionMarker {
        /// The four bytes found where the marker was expected.
        found: [u8; 4],
    },

    /// Invalid binary structure.
    #[error("invalid binary structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A symbol ID that is not defined by the active symbol table.
    #[error("unknown symbol id {sid}")]
    UnknownSymbol {
        /// The unresolved symbol ID.
        sid: u64,
    },

    /// Local symbol table imports a shared table, which cannot be resolved.
    #[error("shared symbol table imports are not supported")]
    UnsupportedImport,

    /// Integer does not fit the target representation.
    #[error("integer overflow")]
    IntegerOverflow,

    /// Containers nested deeper than the decoder allows.
    #[error("nesting depth exceeds {max}")]
    DepthLimitExceeded {
        /// The configured maximum depth.
        max: usize,
    },

    /// The stream holds no user value.
    #[error("stream contains no value")]
    NoValue,
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Returns true if the error was caused by input that ended too early.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::UnexpectedEof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            CodecError::UnknownSymbol { sid: 42 }.to_string(),
            "unknown symbol id 42"
        );
        assert!(CodecError::InvalidVersionMarker {
            found: [0xe0, 0x02, 0x00, 0xea]
        }
        .to_string()
        .contains("02"));
    }

    #[test]
    fn truncation_classification() {
        assert!(CodecError::UnexpectedEof.is_truncation());
        assert!(!CodecError::invalid_structure("bad").is_truncation());
    }
}
