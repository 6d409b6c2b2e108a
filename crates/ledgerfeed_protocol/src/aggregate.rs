//! Aggregate record framing.
//!
//! Producers pack several logical records into one transport record:
//!
//! ```text
//! +-----------+---------------------------+------------------+
//! | magic (4) | AggregatedRecord protobuf | MD5 of body (16) |
//! +-----------+---------------------------+------------------+
//! ```
//!
//! Anything without the magic prefix is a plain record carrying exactly one
//! logical record.

use crate::batch::TransportRecord;
use crate::error::FramingError;
use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use prost::Message;
use std::fmt;

/// Magic prefix identifying an aggregated record.
pub const AGGREGATE_MAGIC: [u8; 4] = [0xF3, 0x89, 0x9A, 0xC2];

/// Length of the trailing MD5 digest.
pub const DIGEST_LEN: usize = 16;

/// Protobuf body of an aggregated record.
#[derive(Clone, PartialEq, Message)]
pub struct AggregatedRecord {
    /// Partition keys referenced by index from [`Record`].
    #[prost(string, repeated, tag = "1")]
    pub partition_key_table: Vec<String>,
    /// Explicit hash keys referenced by index from [`Record`].
    #[prost(string, repeated, tag = "2")]
    pub explicit_hash_key_table: Vec<String>,
    /// Sub-records in framing order.
    #[prost(message, repeated, tag = "3")]
    pub records: Vec<Record>,
}

/// One sub-record of an aggregate.
#[derive(Clone, PartialEq, Message)]
pub struct Record {
    /// Index into the partition key table.
    #[prost(uint64, required, tag = "1")]
    pub partition_key_index: u64,
    /// Index into the explicit hash key table.
    #[prost(uint64, optional, tag = "2")]
    pub explicit_hash_key_index: Option<u64>,
    /// Logical record payload.
    #[prost(bytes = "bytes", required, tag = "3")]
    pub data: Bytes,
    /// Producer tags.
    #[prost(message, repeated, tag = "4")]
    pub tags: Vec<Tag>,
}

/// Producer-supplied key/value tag.
#[derive(Clone, PartialEq, Message)]
pub struct Tag {
    /// Tag key.
    #[prost(string, required, tag = "1")]
    pub key: String,
    /// Tag value.
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

/// Identity of a logical record within a batch, used in reports and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    /// Sequence number of the transport record.
    pub sequence_number: String,
    /// Position within the aggregate, if aggregated.
    pub sub_sequence: Option<u64>,
}

impl RecordId {
    /// Identity of a whole transport record.
    pub fn transport(sequence_number: impl Into<String>) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            sub_sequence: None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_sequence {
            Some(sub) => write!(f, "{}/{}", self.sequence_number, sub),
            None => f.write_str(&self.sequence_number),
        }
    }
}

/// One logical record unpacked from a transport record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRecord {
    /// Sequence number of the parent transport record.
    pub sequence_number: String,
    /// Index within the aggregate; `None` for plain records.
    pub sub_sequence: Option<u64>,
    /// Effective partition key.
    pub partition_key: String,
    /// Explicit hash key, if the producer set one.
    pub explicit_hash_key: Option<String>,
    /// Binary payload.
    pub data: Bytes,
}

impl LogicalRecord {
    /// The record's identity.
    pub fn id(&self) -> RecordId {
        RecordId {
            sequence_number: self.sequence_number.clone(),
            sub_sequence: self.sub_sequence,
        }
    }

    fn plain(source: &TransportRecord) -> Self {
        Self {
            sequence_number: source.sequence_number.clone(),
            sub_sequence: None,
            partition_key: source.partition_key.clone(),
            explicit_hash_key: None,
            data: source.data.clone(),
        }
    }
}

/// Returns true if the bytes carry aggregate framing.
pub fn is_aggregated(data: &[u8]) -> bool {
    data.len() >= AGGREGATE_MAGIC.len() + DIGEST_LEN && data.starts_with(&AGGREGATE_MAGIC)
}

/// Expands a transport record into its logical records.
///
/// The returned iterator is lazy: nothing is parsed until the first call to
/// `next`. A framing failure of the aggregate as a whole is yielded once and
/// ends the sequence; a failure of one sub-record is yielded in its place and
/// its siblings still follow.
pub fn expand(record: &TransportRecord, verify_checksums: bool) -> Expansion<'_> {
    Expansion {
        source: record,
        verify_checksums,
        state: ExpansionState::Pending,
    }
}

/// Lazy sequence of logical records from one transport record.
///
/// Cloning an expansion that has not started yields an independent,
/// identical sequence.
#[derive(Debug, Clone)]
pub struct Expansion<'a> {
    source: &'a TransportRecord,
    verify_checksums: bool,
    state: ExpansionState,
}

#[derive(Debug, Clone)]
enum ExpansionState {
    Pending,
    Aggregate {
        message: AggregatedRecord,
        next: usize,
    },
    Done,
}

impl Iterator for Expansion<'_> {
    type Item = Result<LogicalRecord, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                ExpansionState::Pending => {
                    if !is_aggregated(&self.source.data) {
                        self.state = ExpansionState::Done;
                        return Some(Ok(LogicalRecord::plain(self.source)));
                    }
                    match decode_aggregate(&self.source.data, self.verify_checksums) {
                        Ok(message) => {
                            self.state = ExpansionState::Aggregate { message, next: 0 }
                        }
                        Err(e) => {
                            self.state = ExpansionState::Done;
                            return Some(Err(e));
                        }
                    }
                }
                ExpansionState::Aggregate { message, next } => {
                    let index = *next;
                    let record = message.records.get(index)?;
                    *next += 1;
                    return Some(resolve_sub_record(self.source, message, index, record));
                }
                ExpansionState::Done => return None,
            }
        }
    }
}

fn decode_aggregate(data: &Bytes, verify_checksums: bool) -> Result<AggregatedRecord, FramingError> {
    let body = data.slice(AGGREGATE_MAGIC.len()..data.len() - DIGEST_LEN);

    if verify_checksums {
        let mut expected = [0u8; DIGEST_LEN];
        expected.copy_from_slice(&data[data.len() - DIGEST_LEN..]);
        let actual = digest(&body);
        if actual != expected {
            return Err(FramingError::ChecksumMismatch { expected, actual });
        }
    }

    AggregatedRecord::decode(body).map_err(|e| FramingError::Protobuf {
        message: e.to_string(),
    })
}

fn resolve_sub_record(
    source: &TransportRecord,
    message: &AggregatedRecord,
    index: usize,
    record: &Record,
) -> Result<LogicalRecord, FramingError> {
    let partition_key = if message.partition_key_table.is_empty() {
        source.partition_key.clone()
    } else {
        lookup(&message.partition_key_table, record.partition_key_index)
            .ok_or(FramingError::PartitionKeyIndex {
                index: record.partition_key_index,
                table_len: message.partition_key_table.len(),
            })?
            .clone()
    };

    let explicit_hash_key = match record.explicit_hash_key_index {
        Some(i) => Some(
            lookup(&message.explicit_hash_key_table, i)
                .ok_or(FramingError::ExplicitHashKeyIndex {
                    index: i,
                    table_len: message.explicit_hash_key_table.len(),
                })?
                .clone(),
        ),
        None => None,
    };

    Ok(LogicalRecord {
        sequence_number: source.sequence_number.clone(),
        sub_sequence: Some(index as u64),
        partition_key,
        explicit_hash_key,
        data: record.data.clone(),
    })
}

fn lookup(table: &[String], index: u64) -> Option<&String> {
    usize::try_from(index).ok().and_then(|i| table.get(i))
}

fn digest(body: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(Md5::digest(body).as_slice());
    out
}

/// Frames a protobuf aggregate with magic and digest.
pub fn frame_aggregate(message: &AggregatedRecord) -> Bytes {
    let body = message.encode_to_vec();
    let mut out = BytesMut::with_capacity(AGGREGATE_MAGIC.len() + body.len() + DIGEST_LEN);
    out.put_slice(&AGGREGATE_MAGIC);
    out.put_slice(&body);
    out.put_slice(&digest(&body));
    out.freeze()
}

/// Builds aggregated transport payloads.
#[derive(Debug, Clone, Default)]
pub struct AggregateBuilder {
    message: AggregatedRecord,
}

impl AggregateBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a logical record.
    pub fn push(&mut self, partition_key: &str, data: impl Into<Bytes>) -> &mut Self {
        let partition_key_index = intern(&mut self.message.partition_key_table, partition_key);
        self.message.records.push(Record {
            partition_key_index,
            explicit_hash_key_index: None,
            data: data.into(),
            tags: Vec::new(),
        });
        self
    }

    /// Appends a logical record routed by an explicit hash key.
    pub fn push_with_hash_key(
        &mut self,
        partition_key: &str,
        explicit_hash_key: &str,
        data: impl Into<Bytes>,
    ) -> &mut Self {
        let partition_key_index = intern(&mut self.message.partition_key_table, partition_key);
        let hash_key_index = intern(&mut self.message.explicit_hash_key_table, explicit_hash_key);
        self.message.records.push(Record {
            partition_key_index,
            explicit_hash_key_index: Some(hash_key_index),
            data: data.into(),
            tags: Vec::new(),
        });
        self
    }

    /// Number of logical records added so far.
    pub fn len(&self) -> usize {
        self.message.records.len()
    }

    /// Returns true if no records were added.
    pub fn is_empty(&self) -> bool {
        self.message.records.is_empty()
    }

    /// Produces the framed aggregate.
    pub fn build(&self) -> Bytes {
        frame_aggregate(&self.message)
    }
}

fn intern(table: &mut Vec<String>, key: &str) -> u64 {
    let index = match table.iter().position(|k| k == key) {
        Some(i) => i,
        None => {
            table.push(key.to_string());
            table.len() - 1
        }
    };
    index as u64
}
