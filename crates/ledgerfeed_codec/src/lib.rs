//! # Ledgerfeed Codec
//!
//! Ion 1.0 binary decoding and encoding for ledger journal payloads.
//!
//! The ledger's change stream carries every revision as a self-describing
//! binary document. This crate decodes that format into a dynamic
//! [`Value`] tree and can encode values back, which fixtures and tooling
//! use to produce realistic payloads.
//!
//! ## Supported Subset
//!
//! - All scalar types: null, bool, int (i64 range), float, decimal,
//!   timestamp, symbol, string, blob, clob
//! - Containers: list, s-expression, struct (including sorted structs)
//! - Annotation wrappers and local symbol tables (append or reset)
//! - Version markers and padding anywhere at the top level
//!
//! Shared symbol table imports are rejected; journal payloads never use them.
//!
//! ## Usage
//!
//! ```
//! use ledgerfeed_codec::{from_ion, to_ion, Value};
//!
//! let value = Value::structure([("id", Value::from("A1")), ("version", Value::Int(3))]);
//! let bytes = to_ion(&value).unwrap();
//!
//! let decoded = from_ion(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod primitives;
mod symbols;
mod value;

pub use decoder::{from_ion, from_ion_all, BinaryDecoder, MAX_DEPTH};
pub use encoder::{to_ion, to_ion_stream, BinaryEncoder};
pub use error::{CodecError, CodecResult};
pub use primitives::VERSION_MARKER;
pub use symbols::{SymbolTable, SYSTEM_SYMBOLS};
pub use value::{Decimal, Timestamp, TimestampPrecision, Value};

/// Trait for types that can be encoded to a binary stream.
pub trait Encode {
    /// Encode this value to binary bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from a binary stream.
pub trait Decode: Sized {
    /// Decode this value from binary bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_ion(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_ion(bytes)
    }
}
