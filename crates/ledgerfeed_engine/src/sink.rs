//! Projection sink abstraction.

use crate::error::SinkResult;
use async_trait::async_trait;
use ledgerfeed_protocol::ChangeEvent;
use std::fmt;

/// Successful outcome of applying an event to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The projection now reflects the event.
    Applied,
    /// The projection already holds this version or a newer one.
    Superseded,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

/// A downstream projection of ledger documents.
///
/// Implementations condition every write on the version they have stored
/// for the document, so applying the same event twice or applying events
/// out of order converges on the highest version. Concurrent calls for
/// the same document rely on the store's conditional write, not on
/// in-process locking.
#[async_trait]
pub trait ProjectionSink: Send + Sync {
    /// Sink name used in reports and logs.
    fn name(&self) -> &str;

    /// Applies one change event.
    ///
    /// A stale event yields `Ok(ApplyOutcome::Superseded)`, never an error.
    async fn apply(&self, event: &ChangeEvent) -> SinkResult<ApplyOutcome>;
}
