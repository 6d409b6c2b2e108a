//! # Ledgerfeed Testkit
//!
//! Test utilities for the ledger change feed.
//!
//! This crate provides:
//! - Fixtures for change events, encoded records and transport batches
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use ledgerfeed_testkit::prelude::*;
//!
//! let batch = event_batch(&[licence_event("A1", 0, 0), licence_deletion("A1", 1)]);
//! assert_eq!(batch.records.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
