//! Batch pipeline.
//!
//! One invocation takes a [`TransportBatch`] through
//! `Received → Expanding → Decoding → Classifying → Dispatching → Completed`
//! for every logical record. Records are processed concurrently up to
//! [`PipelineConfig::max_in_flight`], and each event goes to every sink at
//! once. A failure is attached to the record it happened to and never stops
//! its siblings.
//!
//! The batch fails, and should be redelivered as a whole, only when a sink
//! reported an error or the time budget ran out. Framing, decode and corrupt
//! revision failures are reported but cannot be fixed by redelivery.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, SinkError};
use crate::sink::{ApplyOutcome, ProjectionSink};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use ledgerfeed_protocol::{
    classify, expand, ChangeEnvelope, Classified, FramingError, LogicalRecord, ProtocolError,
    RecordId, TransportBatch, TransportRecord,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Stage of the per-record state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordStage {
    /// Read from the invocation document.
    Received,
    /// Unpacking aggregate framing.
    Expanding,
    /// Decoding the binary envelope.
    Decoding,
    /// Extracting the change event.
    Classifying,
    /// Applying the event to the sinks.
    Dispatching,
    /// Done.
    Completed,
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Expanding => "expanding",
            Self::Decoding => "decoding",
            Self::Classifying => "classifying",
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// A record that could not be turned into an event.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    /// Identity of the offending record.
    pub record: RecordId,
    /// Stage that failed.
    pub stage: RecordStage,
    /// Cause.
    pub error: ProtocolError,
}

impl RecordFailure {
    fn framing(source: &TransportRecord, position: usize, error: FramingError) -> Self {
        // Whole-aggregate failures end the expansion; index failures are per sub-record.
        let sub_sequence = match error {
            FramingError::PartitionKeyIndex { .. } | FramingError::ExplicitHashKeyIndex { .. } => {
                Some(position as u64)
            }
            _ => None,
        };
        Self {
            record: RecordId {
                sequence_number: source.sequence_number.clone(),
                sub_sequence,
            },
            stage: RecordStage::Expanding,
            error: error.into(),
        }
    }
}

/// An event that a sink failed to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkFailure {
    /// Record that carried the event.
    pub record: RecordId,
    /// Document ID of the event.
    pub document_id: String,
    /// Version of the event.
    pub version: u64,
    /// Name of the failing sink.
    pub sink: String,
    /// Cause.
    pub error: SinkError,
}

/// Outcome of one batch invocation.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Transport records in the invocation, malformed ones included.
    pub records_received: usize,
    /// Logical records produced by expansion.
    pub logical_records: usize,
    /// Events extracted from revisions.
    pub events: usize,
    /// Records skipped: non-revision records and filtered tables.
    pub skipped: usize,
    /// Sink dispatches that applied.
    pub applied: usize,
    /// Sink dispatches that found a newer version.
    pub superseded: usize,
    /// Records rejected before dispatch.
    pub rejected: Vec<RecordFailure>,
    /// Sink dispatches that failed.
    pub sink_failures: Vec<SinkFailure>,
    /// Whether the time budget ran out before all records completed.
    pub timed_out: bool,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl BatchReport {
    /// Number of failed sink dispatches.
    pub fn failed(&self) -> usize {
        self.sink_failures.len()
    }

    /// Returns true if the batch needs no redelivery.
    pub fn is_success(&self) -> bool {
        self.sink_failures.is_empty() && !self.timed_out
    }

    /// Converts the report into the invocation result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BatchFailed`] if any sink failed or the
    /// time budget ran out.
    pub fn into_result(self) -> PipelineResult<BatchReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PipelineError::BatchFailed {
                failed: self.failed(),
                timed_out: self.timed_out,
            })
        }
    }
}

/// Cumulative statistics across invocations.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Batches processed.
    pub batches_processed: u64,
    /// Batches that failed.
    pub batches_failed: u64,
    /// Transport records received.
    pub records_received: u64,
    /// Records rejected before dispatch.
    pub records_rejected: u64,
    /// Records skipped.
    pub records_skipped: u64,
    /// Sink dispatches applied.
    pub applied: u64,
    /// Sink dispatches superseded.
    pub superseded: u64,
    /// Sink dispatches failed.
    pub sink_failures: u64,
    /// Batches that ran out of time.
    pub timeouts: u64,
    /// Duration of the last batch.
    pub last_duration: Option<Duration>,
}

enum RecordOutcome {
    Rejected(RecordFailure),
    Skipped {
        record: RecordId,
        reason: String,
    },
    Dispatched {
        record: RecordId,
        document_id: String,
        version: u64,
        results: Vec<(String, Result<ApplyOutcome, SinkError>)>,
    },
}

/// Fans change events out to projection sinks.
///
/// Construct once and reuse across invocations.
pub struct Pipeline {
    config: PipelineConfig,
    sinks: Vec<Arc<dyn ProjectionSink>>,
    stats: Mutex<PipelineStats>,
}

impl Pipeline {
    /// Creates a pipeline with no sinks.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    /// Adds a sink.
    pub fn with_sink(mut self, sink: Arc<dyn ProjectionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Adds a sink.
    pub fn add_sink(&mut self, sink: Arc<dyn ProjectionSink>) {
        self.sinks.push(sink);
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the sink names in dispatch order.
    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }

    /// Gets the cumulative statistics.
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    /// Parses an invocation document and processes it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Intake`] if the document cannot be read and
    /// [`PipelineError::BatchFailed`] if the batch must be redelivered.
    pub async fn process_event_json(&self, json: &str) -> PipelineResult<BatchReport> {
        let batch = TransportBatch::from_json(json)?;
        self.process_batch(batch).await.into_result()
    }

    /// Processes one batch.
    pub async fn process_batch(&self, batch: TransportBatch) -> BatchReport {
        let started = Instant::now();
        let deadline = self
            .config
            .time_budget
            .map(|budget| tokio::time::Instant::now() + budget);

        let mut report = BatchReport {
            records_received: batch.len(),
            ..BatchReport::default()
        };

        for malformed in &batch.malformed {
            self.tally(
                &mut report,
                RecordOutcome::Rejected(RecordFailure {
                    record: RecordId::transport(&malformed.sequence_number),
                    stage: RecordStage::Received,
                    error: malformed.error.clone().into(),
                }),
            );
        }

        let verify = self.config.verify_checksums;
        let logical = batch.records.iter().flat_map(|source| {
            expand(source, verify)
                .enumerate()
                .map(move |(position, result)| {
                    result.map_err(|error| RecordFailure::framing(source, position, error))
                })
        });
        let mut outcomes = stream::iter(logical)
            .map(|item| self.process_record(item))
            .buffer_unordered(self.config.max_in_flight.max(1));

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, outcomes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        report.timed_out = true;
                        break;
                    }
                },
                None => outcomes.next().await,
            };
            match next {
                Some(outcome) => self.tally(&mut report, outcome),
                None => break,
            }
        }
        drop(outcomes);

        report.duration = started.elapsed();
        self.finish(&report);
        report
    }

    async fn process_record(&self, item: Result<LogicalRecord, RecordFailure>) -> RecordOutcome {
        match item {
            Ok(record) => self.dispatch_record(record).await,
            Err(failure) => RecordOutcome::Rejected(failure),
        }
    }

    async fn dispatch_record(&self, record: LogicalRecord) -> RecordOutcome {
        let id = record.id();
        let rejected = |stage, error: ProtocolError| {
            RecordOutcome::Rejected(RecordFailure {
                record: id.clone(),
                stage,
                error,
            })
        };

        let envelope = match ChangeEnvelope::decode(&record.data) {
            Ok(envelope) => envelope,
            Err(e) => return rejected(RecordStage::Decoding, e.into()),
        };

        let event = match classify(&envelope) {
            Ok(Classified::Event(event)) => event,
            Ok(Classified::Skip(kind)) => {
                return RecordOutcome::Skipped {
                    record: id.clone(),
                    reason: format!("record type {kind}"),
                }
            }
            Err(e) => return rejected(RecordStage::Classifying, e.into()),
        };

        if !self.config.allows_table(event.table.as_deref()) {
            return RecordOutcome::Skipped {
                record: id.clone(),
                reason: format!("table {}", event.table.as_deref().unwrap_or("<none>")),
            };
        }

        let event = &event;
        let results = join_all(self.sinks.iter().map(|sink| async move {
            (sink.name().to_string(), sink.apply(event).await)
        }))
        .await;

        RecordOutcome::Dispatched {
            record: id.clone(),
            document_id: event.document_id.clone(),
            version: event.version,
            results,
        }
    }

    fn tally(&self, report: &mut BatchReport, outcome: RecordOutcome) {
        // A sub-record with a bad key index was still unpacked from its aggregate.
        let expanded = match &outcome {
            RecordOutcome::Rejected(failure) => {
                failure.stage > RecordStage::Expanding || failure.record.sub_sequence.is_some()
            }
            _ => true,
        };
        if expanded {
            report.logical_records += 1;
        }

        match outcome {
            RecordOutcome::Rejected(failure) => {
                warn!(
                    record = %failure.record,
                    stage = %failure.stage,
                    error = %failure.error,
                    "record rejected"
                );
                report.rejected.push(failure);
            }
            RecordOutcome::Skipped { record, reason } => {
                debug!(record = %record, reason = %reason, "record skipped");
                report.skipped += 1;
            }
            RecordOutcome::Dispatched {
                record,
                document_id,
                version,
                results,
            } => {
                report.events += 1;
                for (sink, result) in results {
                    match result {
                        Ok(ApplyOutcome::Applied) => report.applied += 1,
                        Ok(ApplyOutcome::Superseded) => {
                            debug!(
                                record = %record,
                                document_id = %document_id,
                                version,
                                sink = %sink,
                                "event superseded"
                            );
                            report.superseded += 1;
                        }
                        Err(error) => {
                            error!(
                                record = %record,
                                document_id = %document_id,
                                version,
                                sink = %sink,
                                retryable = error.is_retryable(),
                                error = %error,
                                "sink failed"
                            );
                            report.sink_failures.push(SinkFailure {
                                record: record.clone(),
                                document_id: document_id.clone(),
                                version,
                                sink,
                                error,
                            });
                        }
                    }
                }
            }
        }
    }

    fn finish(&self, report: &BatchReport) {
        if report.timed_out {
            warn!(
                budget_ms = self.config.time_budget.map(|b| b.as_millis() as u64),
                "time budget exhausted, abandoning outstanding records"
            );
        }
        info!(
            records = report.records_received,
            logical_records = report.logical_records,
            events = report.events,
            applied = report.applied,
            superseded = report.superseded,
            skipped = report.skipped,
            rejected = report.rejected.len(),
            failed = report.failed(),
            timed_out = report.timed_out,
            duration_ms = report.duration.as_millis() as u64,
            "batch processed"
        );

        let mut stats = self.stats.lock();
        stats.batches_processed += 1;
        if !report.is_success() {
            stats.batches_failed += 1;
        }
        if report.timed_out {
            stats.timeouts += 1;
        }
        stats.records_received += report.records_received as u64;
        stats.records_rejected += report.rejected.len() as u64;
        stats.records_skipped += report.skipped as u64;
        stats.applied += report.applied as u64;
        stats.superseded += report.superseded as u64;
        stats.sink_failures += report.failed() as u64;
        stats.last_duration = Some(report.duration);
    }
}
