//! Batch intake: the stream event document delivered per invocation.

use crate::error::{FramingError, IntakeError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The stream event document as delivered by the upstream platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Records in delivery order.
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamEventRecord>,
}

/// One entry of [`StreamEvent::records`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventRecord {
    /// Platform event ID.
    #[serde(rename = "eventID", default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Event source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    /// Region of the source stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    /// The stream record itself.
    pub kinesis: KinesisData,
}

/// Stream-specific fields of a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisData {
    /// Base64 transport encoding of the record bytes.
    pub data: String,
    /// Partition key the producer used.
    #[serde(default)]
    pub partition_key: String,
    /// Sequence number within the shard.
    pub sequence_number: String,
    /// Arrival time in epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_arrival_timestamp: Option<f64>,
    /// Schema version of the record layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinesis_schema_version: Option<String>,
}

/// One opaque transport record, possibly an aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRecord {
    /// Sequence number assigned by the stream.
    pub sequence_number: String,
    /// Partition key of the transport record.
    pub partition_key: String,
    /// Raw record bytes.
    pub data: Bytes,
    /// Arrival time in epoch seconds, if known.
    pub approximate_arrival: Option<f64>,
    /// Platform event ID, if known.
    pub event_id: Option<String>,
}

impl TransportRecord {
    /// Creates a record from raw bytes.
    pub fn new(
        sequence_number: impl Into<String>,
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            partition_key: partition_key.into(),
            data: data.into(),
            approximate_arrival: None,
            event_id: None,
        }
    }

    /// Decodes the transport encoding of a stream event record.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::InvalidTransportEncoding`] if `data` is not
    /// valid base64.
    pub fn from_event_record(record: &StreamEventRecord) -> Result<Self, FramingError> {
        let data = STANDARD
            .decode(record.kinesis.data.trim())
            .map_err(|e| FramingError::invalid_encoding(e.to_string()))?;
        Ok(Self {
            sequence_number: record.kinesis.sequence_number.clone(),
            partition_key: record.kinesis.partition_key.clone(),
            data: Bytes::from(data),
            approximate_arrival: record.kinesis.approximate_arrival_timestamp,
            event_id: record.event_id.clone(),
        })
    }

    /// Converts back to a stream event record.
    pub fn to_event_record(&self) -> StreamEventRecord {
        StreamEventRecord {
            event_id: self.event_id.clone(),
            event_source: Some("aws:kinesis".to_string()),
            aws_region: None,
            kinesis: KinesisData {
                data: STANDARD.encode(&self.data),
                partition_key: self.partition_key.clone(),
                sequence_number: self.sequence_number.clone(),
                approximate_arrival_timestamp: self.approximate_arrival,
                kinesis_schema_version: Some("1.0".to_string()),
            },
        }
    }
}

/// A record whose transport encoding could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    /// Sequence number of the record.
    pub sequence_number: String,
    /// Why it was rejected.
    pub error: FramingError,
}

/// An ordered batch of transport records for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportBatch {
    /// Readable records in delivery order.
    pub records: Vec<TransportRecord>,
    /// Records rejected at intake, reported but not processed.
    pub malformed: Vec<MalformedRecord>,
}

impl TransportBatch {
    /// Creates a batch from records.
    pub fn new(records: Vec<TransportRecord>) -> Self {
        Self {
            records,
            malformed: Vec::new(),
        }
    }

    /// Parses a stream event document.
    ///
    /// # Errors
    ///
    /// Returns an error only if the document itself is not a stream event.
    /// Records with bad transport encoding land in [`malformed`](Self::malformed).
    pub fn from_json(json: &str) -> Result<Self, IntakeError> {
        let event: StreamEvent = serde_json::from_str(json)?;
        Ok(Self::from_event(&event))
    }

    /// Parses a stream event document from bytes.
    ///
    /// # Errors
    ///
    /// Same as [`from_json`](Self::from_json).
    pub fn from_slice(json: &[u8]) -> Result<Self, IntakeError> {
        let event: StreamEvent = serde_json::from_slice(json)?;
        Ok(Self::from_event(&event))
    }

    /// Converts an already parsed stream event.
    pub fn from_event(event: &StreamEvent) -> Self {
        let mut batch = Self::default();
        for record in &event.records {
            match TransportRecord::from_event_record(record) {
                Ok(transport) => batch.records.push(transport),
                Err(error) => batch.malformed.push(MalformedRecord {
                    sequence_number: record.kinesis.sequence_number.clone(),
                    error,
                }),
            }
        }
        batch
    }

    /// Builds the stream event document for this batch.
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent {
            records: self.records.iter().map(TransportRecord::to_event_record).collect(),
        }
    }

    /// Number of records delivered, including malformed ones.
    pub fn len(&self) -> usize {
        self.records.len() + self.malformed.len()
    }

    /// Returns true if the batch holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"{
        "Records": [
            {
                "eventID": "shardId-000000000000:4954",
                "eventSource": "aws:kinesis",
                "awsRegion": "eu-west-1",
                "kinesis": {
                    "kinesisSchemaVersion": "1.0",
                    "partitionKey": "pk-1",
                    "sequenceNumber": "4954",
                    "data": "aGVsbG8=",
                    "approximateArrivalTimestamp": 1580385605.123
                }
            },
            {
                "kinesis": {
                    "partitionKey": "pk-2",
                    "sequenceNumber": "4955",
                    "data": "!!not base64!!"
                }
            }
        ]
    }"#;

    #[test]
    fn parse_stream_event() {
        let batch = TransportBatch::from_json(EVENT).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records.len(), 1);
        let record = &batch.records[0];
        assert_eq!(record.sequence_number, "4954");
        assert_eq!(record.partition_key, "pk-1");
        assert_eq!(&record.data[..], b"hello");
        assert_eq!(record.event_id.as_deref(), Some("shardId-000000000000:4954"));
        assert!(record.approximate_arrival.is_some());
    }

    #[test]
    fn bad_base64_is_record_scoped() {
        let batch = TransportBatch::from_json(EVENT).unwrap();

        assert_eq!(batch.malformed.len(), 1);
        assert_eq!(batch.malformed[0].sequence_number, "4955");
        assert!(matches!(
            batch.malformed[0].error,
            FramingError::InvalidTransportEncoding { .. }
        ));
    }

    #[test]
    fn invalid_document_is_intake_error() {
        assert!(TransportBatch::from_json("{\"Records\": 3}").is_err());
        assert!(TransportBatch::from_json("not json").is_err());
    }

    #[test]
    fn empty_event() {
        let batch = TransportBatch::from_json("{}").unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn event_document_roundtrip() {
        let batch = TransportBatch::new(vec![
            TransportRecord::new("1", "a", b"one".to_vec()),
            TransportRecord::new("2", "b", b"two".to_vec()),
        ]);
        let json = serde_json::to_string(&batch.to_event()).unwrap();

        assert_eq!(TransportBatch::from_json(&json).unwrap(), batch);
    }
}
