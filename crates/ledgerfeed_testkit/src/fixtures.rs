//! Change events, encoded records and batches for tests.

use bytes::Bytes;
use ledgerfeed_codec::{Decimal, Timestamp, Value};
use ledgerfeed_protocol::{
    AggregateBuilder, ChangeEnvelope, ChangeEvent, Fields, RecordKind, TransportBatch,
    TransportRecord,
};

/// Ledger table used by the licence fixtures.
pub const LICENCE_TABLE: &str = "BicycleLicence";

/// Fields of a licence document.
pub fn licence_fields(postcode: &str, penalty_points: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("postcode".into(), Value::from(postcode));
    fields.insert("penaltyPoints".into(), Value::Int(penalty_points));
    fields
}

/// A licence revision with a fee and validity date.
pub fn licence_event(id: &str, version: u64, penalty_points: i64) -> ChangeEvent {
    let mut fields = licence_fields("SW1A 2AA", penalty_points);
    fields.insert("fee".into(), Value::Decimal(Decimal::new(4500, -2)));
    fields.insert(
        "validUntil".into(),
        Value::Timestamp(Timestamp::from_ymd(2030, 1, 1)),
    );
    ChangeEvent::upsert(id, version, fields)
        .with_table(LICENCE_TABLE)
        .with_transaction(
            format!("tx-{id}-{version}"),
            Some(Timestamp::from_utc(2020, 1, 30, 12, 0, 5)),
        )
}

/// A licence deletion.
pub fn licence_deletion(id: &str, version: u64) -> ChangeEvent {
    ChangeEvent::deletion(id, version).with_table(LICENCE_TABLE)
}

/// Encodes an event as a revision record payload.
pub fn revision_record(event: &ChangeEvent) -> Bytes {
    Bytes::from(
        event
            .to_envelope()
            .encode()
            .expect("Failed to encode revision"),
    )
}

/// Encodes a control record payload.
pub fn control_record() -> Bytes {
    let envelope = ChangeEnvelope::new(
        RecordKind::Control,
        Value::structure([("controlRecordType", Value::from("CREATED"))]),
    );
    Bytes::from(envelope.encode().expect("Failed to encode control record"))
}

/// Encodes a revision that has a version but no document ID.
pub fn corrupt_revision_record() -> Bytes {
    let envelope = ChangeEnvelope::new(
        RecordKind::RevisionDetails,
        Value::structure([(
            "revision",
            Value::structure([("metadata", Value::structure([("version", Value::Int(1))]))]),
        )]),
    );
    Bytes::from(envelope.encode().expect("Failed to encode corrupt revision"))
}

/// A payload that starts like a binary document and is then truncated.
pub fn truncated_record() -> Bytes {
    Bytes::from_static(&[0xe0, 0x01, 0x00, 0xea, 0xd5, 0x01])
}

/// Packs payloads into one aggregated blob, keyed by position.
pub fn aggregate<I>(payloads: I) -> Bytes
where
    I: IntoIterator<Item = Bytes>,
{
    let mut builder = AggregateBuilder::new();
    for (i, payload) in payloads.into_iter().enumerate() {
        builder.push(&format!("pk-{i}"), payload);
    }
    builder.build()
}

/// One plain transport record per payload, with sequence numbers 1, 2, ...
pub fn plain_batch<I>(payloads: I) -> TransportBatch
where
    I: IntoIterator<Item = Bytes>,
{
    TransportBatch::new(
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| TransportRecord::new((i + 1).to_string(), format!("pk-{i}"), payload))
            .collect(),
    )
}

/// A batch holding one aggregated transport record.
pub fn aggregated_batch<I>(payloads: I) -> TransportBatch
where
    I: IntoIterator<Item = Bytes>,
{
    TransportBatch::new(vec![TransportRecord::new("1", "aggregate", aggregate(payloads))])
}

/// A plain batch of encoded events.
pub fn event_batch(events: &[ChangeEvent]) -> TransportBatch {
    plain_batch(events.iter().map(revision_record))
}

/// Renders a batch as the invocation document.
pub fn stream_event_json(batch: &TransportBatch) -> String {
    serde_json::to_string(&batch.to_event()).expect("Failed to render stream event")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerfeed_protocol::{decode_record, expand, Classified};

    #[test]
    fn aggregated_batch_expands_in_order() {
        let events = [licence_event("A1", 0, 0), licence_deletion("B2", 3)];
        let batch = aggregated_batch(events.iter().map(revision_record));

        let decoded: Vec<_> = expand(&batch.records[0], true)
            .map(|record| decode_record(&record.unwrap()).unwrap())
            .collect();
        assert_eq!(
            decoded,
            events
                .iter()
                .cloned()
                .map(Classified::Event)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn stream_event_roundtrip() {
        let batch = event_batch(&[licence_event("A1", 0, 0)]);
        let parsed = TransportBatch::from_json(&stream_event_json(&batch)).unwrap();
        assert_eq!(parsed.records, batch.records);
    }
}
