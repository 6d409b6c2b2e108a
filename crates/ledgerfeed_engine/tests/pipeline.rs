//! Integration tests for the batch pipeline and its sinks.

use async_trait::async_trait;
use bytes::Bytes;
use ledgerfeed_engine::{
    item_to_json, ApplyOutcome, AttributeValue, BatchReport, Item, KeyValueSink,
    KeyValueSinkConfig, MemoryKeyValueStore, MemorySearchIndex, Pipeline, PipelineConfig,
    PipelineError, ProjectionSink, RecordStage, SearchIndexSink, SearchSinkConfig, SinkError,
    SinkResult,
};
use ledgerfeed_codec::{Decimal, Timestamp, Value};
use ledgerfeed_protocol::{
    frame_aggregate, AggregatedRecord, ChangeEvent, FramingError, ProtocolError, Record,
    TransportBatch, TransportRecord,
};
use ledgerfeed_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = "licences";
const INDEX: &str = "licence";

struct Harness {
    store: Arc<MemoryKeyValueStore>,
    index: Arc<MemorySearchIndex>,
    pipeline: Pipeline,
}

impl Harness {
    fn new(config: PipelineConfig) -> Self {
        let store = Arc::new(MemoryKeyValueStore::new());
        let index = Arc::new(MemorySearchIndex::new());
        let pipeline = Pipeline::new(config)
            .with_sink(Arc::new(KeyValueSink::new(
                store.clone(),
                KeyValueSinkConfig::new(TABLE),
            )))
            .with_sink(Arc::new(SearchIndexSink::new(
                index.clone(),
                SearchSinkConfig::new(INDEX),
            )));
        Self {
            store,
            index,
            pipeline,
        }
    }

    async fn apply(&self, events: &[ChangeEvent]) -> BatchReport {
        self.pipeline.process_batch(event_batch(events)).await
    }

    fn item(&self, id: &str) -> Option<Item> {
        self.store.get(TABLE, id)
    }
}

fn scenario_creation() -> ChangeEvent {
    ChangeEvent::upsert("A1", 0, licence_fields("SW1A", 0))
}

#[tokio::test]
async fn creation_is_projected_to_both_sinks() {
    let harness = Harness::new(PipelineConfig::default());
    let report = harness.apply(&[scenario_creation()]).await;

    assert!(report.is_success());
    assert_eq!(report.events, 1);
    assert_eq!(report.applied, 2);

    let item = harness.item("A1").unwrap();
    assert_eq!(
        item_to_json(&item),
        json!({"pk": "A1", "postcode": "SW1A", "penaltyPoints": 0, "version": 0})
    );
    assert_eq!(
        harness.index.get(INDEX, "A1").unwrap(),
        json!({"postcode": "SW1A", "penaltyPoints": 0, "version": 0})
    );
}

#[tokio::test]
async fn stale_update_is_superseded() {
    let harness = Harness::new(PipelineConfig::default());
    harness.apply(&[scenario_creation()]).await;
    let before = harness.item("A1");

    let stale = ChangeEvent::upsert("A1", 0, licence_fields("SW1A", 5));
    let report = harness.apply(&[stale]).await;

    assert!(report.is_success());
    assert_eq!(report.applied, 0);
    assert_eq!(report.superseded, 2);
    assert_eq!(harness.item("A1"), before);
    assert_eq!(
        harness.index.get(INDEX, "A1").unwrap()["penaltyPoints"],
        json!(0)
    );
}

#[tokio::test]
async fn deletion_leaves_tombstones() {
    let harness = Harness::new(PipelineConfig::default());
    harness.apply(&[scenario_creation()]).await;

    let report = harness.apply(&[ChangeEvent::deletion("A1", 1)]).await;
    assert!(report.is_success());
    assert_eq!(report.applied, 2);

    let item = harness.item("A1").unwrap();
    assert_eq!(item["isDeleted"], AttributeValue::Bool(true));
    assert_eq!(item["version"], AttributeValue::number(1));
    assert!(harness.index.get(INDEX, "A1").is_none());
    assert_eq!(harness.index.version(INDEX, "A1"), Some(1));
}

#[tokio::test]
async fn later_revision_revives_deleted_document() {
    let harness = Harness::new(PipelineConfig::default());
    harness
        .apply(&[scenario_creation(), ChangeEvent::deletion("A1", 1)])
        .await;
    harness.apply(&[ChangeEvent::deletion("A1", 1)]).await;

    let revived = ChangeEvent::upsert("A1", 2, licence_fields("N1 9GU", 3));
    let report = harness.apply(&[revived]).await;
    assert_eq!(report.applied, 2);

    let item = harness.item("A1").unwrap();
    assert!(!item.contains_key("isDeleted"));
    assert_eq!(item["postcode"], AttributeValue::string("N1 9GU"));
    assert_eq!(harness.index.get(INDEX, "A1").unwrap()["version"], json!(2));
}

#[tokio::test]
async fn redelivery_is_idempotent() {
    let harness = Harness::new(PipelineConfig::default());
    let events = [
        licence_event("A1", 0, 0),
        licence_event("B2", 4, 6),
        licence_deletion("C3", 2),
    ];

    let first = harness.apply(&events).await;
    let items = harness.store.items(TABLE);
    let documents = harness.index.documents(INDEX);

    let second = harness.apply(&events).await;
    assert_eq!(first.applied, 6);
    assert_eq!(second.applied, 0);
    assert_eq!(second.superseded, 6);
    assert!(second.is_success());
    assert_eq!(harness.store.items(TABLE), items);
    assert_eq!(harness.index.documents(INDEX), documents);

    let stats = harness.pipeline.stats();
    assert_eq!(stats.batches_processed, 2);
    assert_eq!(stats.applied, 6);
    assert_eq!(stats.superseded, 6);
}

#[tokio::test]
async fn aggregated_invocation_document() {
    let harness = Harness::new(PipelineConfig::default());
    let batch = aggregated_batch([
        revision_record(&licence_event("A1", 0, 0)),
        control_record(),
        revision_record(&licence_event("B2", 1, 3)),
    ]);

    let report = harness
        .pipeline
        .process_event_json(&stream_event_json(&batch))
        .await
        .unwrap();

    assert_eq!(report.records_received, 1);
    assert_eq!(report.logical_records, 3);
    assert_eq!(report.events, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 4);
    assert!(harness.item("B2").is_some());
}

#[tokio::test]
async fn unreadable_invocation_document() {
    let harness = Harness::new(PipelineConfig::default());
    let err = harness
        .pipeline
        .process_event_json("{\"Records\": 7}")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Intake(_)));
}

#[tokio::test]
async fn record_scoped_failures_do_not_fail_the_batch() {
    let harness = Harness::new(PipelineConfig::default());

    let mut tampered = aggregate([revision_record(&licence_event("X9", 0, 0))]).to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;

    let mut batch = plain_batch([
        revision_record(&licence_event("A1", 0, 0)),
        corrupt_revision_record(),
        truncated_record(),
    ]);
    batch
        .records
        .push(TransportRecord::new("4", "tampered", Bytes::from(tampered)));

    let mut document = batch.to_event();
    document.records[0].kinesis.data = "not base64!".to_string();
    let json = serde_json::to_string(&document).unwrap();
    let batch = TransportBatch::from_json(&json).unwrap();

    let mut report = harness.pipeline.process_batch(batch).await;
    assert!(report.is_success());
    assert_eq!(report.records_received, 4);
    assert_eq!(report.events, 0);

    report.rejected.sort_by(|a, b| a.record.cmp(&b.record));
    let stages: Vec<_> = report
        .rejected
        .iter()
        .map(|f| (f.record.to_string(), f.stage))
        .collect();
    assert_eq!(
        stages,
        vec![
            ("1".to_string(), RecordStage::Received),
            ("2".to_string(), RecordStage::Classifying),
            ("3".to_string(), RecordStage::Decoding),
            ("4".to_string(), RecordStage::Expanding),
        ]
    );
    assert!(matches!(
        report.rejected[1].error,
        ProtocolError::CorruptRevision(_)
    ));
    assert_eq!(report.logical_records, 2);
}

#[tokio::test]
async fn bad_key_index_is_scoped_to_its_sub_record() {
    let harness = Harness::new(PipelineConfig::default());
    let sub_record = |partition_key_index, event: &ChangeEvent| Record {
        partition_key_index,
        explicit_hash_key_index: None,
        data: revision_record(event),
        tags: Vec::new(),
    };
    let message = AggregatedRecord {
        partition_key_table: vec!["pk-0".to_string()],
        explicit_hash_key_table: Vec::new(),
        records: vec![
            sub_record(0, &licence_event("A1", 0, 0)),
            sub_record(7, &licence_event("B2", 0, 0)),
            sub_record(0, &licence_event("C3", 0, 0)),
        ],
    };
    let batch = TransportBatch::new(vec![TransportRecord::new(
        "1",
        "aggregate",
        frame_aggregate(&message),
    )]);

    let report = harness.pipeline.process_batch(batch).await;
    assert!(report.is_success());
    assert_eq!(report.logical_records, 3);
    assert_eq!(report.events, 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].record.to_string(), "1/1");
    assert_eq!(report.rejected[0].stage, RecordStage::Expanding);
    assert!(matches!(
        report.rejected[0].error,
        ProtocolError::Framing(FramingError::PartitionKeyIndex { .. })
    ));
    assert!(harness.item("A1").is_some());
    assert!(harness.item("C3").is_some());
}

#[tokio::test]
async fn extreme_exponents_are_projected_without_panicking() {
    let harness = Harness::new(PipelineConfig::default());
    let mut fields = licence_fields("SW1A", 0);
    fields.insert(
        "issued".into(),
        Value::Timestamp(
            Timestamp::from_utc(2020, 1, 2, 3, 4, 5).with_fraction(Decimal::new(0, i32::MAX)),
        ),
    );
    fields.insert("fee".into(), Value::Decimal(Decimal::new(1, 200_000_000)));
    let events = [
        ChangeEvent::upsert("W1", 0, fields),
        licence_event("A1", 0, 0),
    ];

    let report = harness.apply(&events).await;
    assert!(report.is_success());
    assert_eq!(report.events, 2);
    assert_eq!(report.applied, 4);

    let item = harness.item("W1").unwrap();
    assert_eq!(item["issued"], AttributeValue::string("2020-01-02T03:04:05Z"));
    assert_eq!(item["fee"], AttributeValue::string("1E200000000"));
    let document = harness.index.get(INDEX, "W1").unwrap();
    assert_eq!(document["issued"], json!("2020-01-02T03:04:05Z"));
    assert_eq!(document["fee"], serde_json::Value::Null);
}

#[tokio::test]
async fn checksum_verification_can_be_disabled() {
    let harness = Harness::new(PipelineConfig::new().with_verify_checksums(false));
    let mut tampered = aggregate([revision_record(&licence_event("X9", 0, 0))]).to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;

    let batch = TransportBatch::new(vec![TransportRecord::new("1", "pk", tampered)]);
    let report = harness.pipeline.process_batch(batch).await;
    assert_eq!(report.events, 1);
    assert!(report.rejected.is_empty());
}

#[tokio::test]
async fn sink_failure_fails_the_batch() {
    let harness = Harness::new(PipelineConfig::default());
    harness
        .store
        .set_failure(Some(SinkError::transport_retryable("connection reset")));

    let report = harness
        .apply(&[licence_event("A1", 0, 0), licence_event("B2", 0, 0)])
        .await;

    assert!(!report.is_success());
    assert_eq!(report.failed(), 2);
    assert_eq!(report.applied, 2);
    assert!(report.sink_failures.iter().all(|f| f.sink == "key-value"));
    assert!(harness.index.get(INDEX, "A1").is_some());

    let err = report.into_result().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::BatchFailed {
            failed: 2,
            timed_out: false
        }
    ));
    assert_eq!(harness.pipeline.stats().batches_failed, 1);

    harness.store.set_failure(None);
    let retry = harness
        .apply(&[licence_event("A1", 0, 0), licence_event("B2", 0, 0)])
        .await;
    assert!(retry.is_success());
    assert_eq!(retry.applied, 2);
    assert_eq!(retry.superseded, 2);
}

#[tokio::test]
async fn table_allow_list() {
    let harness = Harness::new(PipelineConfig::new().with_tables([LICENCE_TABLE]));
    let other = ChangeEvent::upsert("P1", 0, licence_fields("E1", 0)).with_table("Person");

    let report = harness
        .apply(&[licence_event("A1", 0, 0), other, scenario_creation()])
        .await;
    assert_eq!(report.events, 1);
    assert_eq!(report.skipped, 2);
    assert!(harness.item("P1").is_none());
}

struct StalledSink;

#[async_trait]
impl ProjectionSink for StalledSink {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn apply(&self, _event: &ChangeEvent) -> SinkResult<ApplyOutcome> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ApplyOutcome::Applied)
    }
}

#[tokio::test]
async fn time_budget_abandons_outstanding_work() {
    let pipeline = Pipeline::new(PipelineConfig::new().with_time_budget(Duration::from_millis(50)))
        .with_sink(Arc::new(StalledSink));

    let report = pipeline
        .process_batch(event_batch(&[licence_event("A1", 0, 0)]))
        .await;

    assert!(report.timed_out);
    assert!(!report.is_success());
    assert!(report.duration < Duration::from_secs(30));
    assert_eq!(pipeline.stats().timeouts, 1);
}

#[tokio::test]
async fn bounded_fan_out_processes_every_record() {
    let harness = Harness::new(PipelineConfig::new().with_max_in_flight(2));
    let events: Vec<_> = (0..20)
        .map(|i| licence_event(&format!("D{i}"), 0, i))
        .collect();

    let report = harness.apply(&events).await;
    assert_eq!(report.applied, 40);
    assert_eq!(harness.store.items(TABLE).len(), 20);
}

/// The live projection of document M1 after applying `events` one batch at a time.
///
/// A tombstone keeps the attributes it was written over; only its key,
/// version and flag are part of the projection.
fn fold_projection(events: &[ChangeEvent]) -> (Option<Item>, Option<serde_json::Value>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let harness = Harness::new(PipelineConfig::default());
        for event in events {
            harness.apply(std::slice::from_ref(event)).await;
        }
        let item = harness.item("M1").map(|mut item| {
            if item.get("isDeleted") == Some(&AttributeValue::Bool(true)) {
                item.retain(|name, _| matches!(name.as_str(), "pk" | "version" | "isDeleted"));
            }
            item
        });
        (item, harness.index.get(INDEX, "M1"))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn monotonic_merge(
        (low, high) in ascending_versions_strategy(),
        first in prop::option::of(fields_strategy()),
        second in prop::option::of(fields_strategy()),
    ) {
        let event = |version, fields: Option<_>| match fields {
            Some(fields) => ChangeEvent::upsert("M1", version, fields),
            None => ChangeEvent::deletion("M1", version),
        };
        let older = event(low, first);
        let newer = event(high, second);

        let only_newer = fold_projection(&[newer.clone()]);
        prop_assert_eq!(&fold_projection(&[older.clone(), newer.clone()]), &only_newer);
        prop_assert_eq!(&fold_projection(&[newer, older]), &only_newer);
    }
}

mod http {
    use super::*;
    use ledgerfeed_engine::{DynamoDbHttpStore, HttpSearchTransport, StaticHeaders};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kv_sink(server: &MockServer) -> KeyValueSink {
        let store = DynamoDbHttpStore::new(&server.uri()).unwrap();
        KeyValueSink::new(Arc::new(store), KeyValueSinkConfig::new(TABLE))
    }

    fn search_sink(server: &MockServer) -> SearchIndexSink {
        let signer = StaticHeaders::new()
            .with_header("authorization", "Bearer t0ken")
            .unwrap();
        let transport = HttpSearchTransport::new(&server.uri())
            .unwrap()
            .with_signer(Arc::new(signer));
        SearchIndexSink::new(Arc::new(transport), SearchSinkConfig::new(INDEX))
    }

    #[tokio::test]
    async fn dynamodb_put_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", "DynamoDB_20120810.PutItem"))
            .and(header("content-type", "application/x-amz-json-1.0"))
            .and(body_partial_json(json!({
                "TableName": TABLE,
                "Item": {"pk": {"S": "A1"}, "version": {"N": "0"}},
                "ConditionExpression": "attribute_not_exists(#v) OR #v < :v",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = kv_sink(&server).apply(&scenario_creation()).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn dynamodb_condition_failure_is_superseded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "DynamoDB_20120810.UpdateItem"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException",
                "message": "The conditional request failed",
            })))
            .mount(&server)
            .await;

        let outcome = kv_sink(&server)
            .apply(&ChangeEvent::deletion("A1", 1))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Superseded);
    }

    #[tokio::test]
    async fn dynamodb_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let err = kv_sink(&server)
            .apply(&scenario_creation())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn search_upsert_carries_external_version() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/licence/_doc/A1"))
            .and(query_param("version", "3"))
            .and(query_param("version_type", "external"))
            .and(header("authorization", "Bearer t0ken"))
            .and(body_partial_json(json!({"postcode": "SW1A", "version": 3})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": "created"})))
            .expect(1)
            .mount(&server)
            .await;

        let event = ChangeEvent::upsert("A1", 3, licence_fields("SW1A", 0));
        let outcome = search_sink(&server).apply(&event).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn search_conflict_is_superseded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"type": "version_conflict_engine_exception"},
                "status": 409,
            })))
            .mount(&server)
            .await;

        let outcome = search_sink(&server)
            .apply(&scenario_creation())
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Superseded);
    }

    #[tokio::test]
    async fn search_delete_of_missing_document() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/licence/_doc/A1"))
            .and(query_param("version", "1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"result": "not_found"})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = search_sink(&server)
            .apply(&ChangeEvent::deletion("A1", 1))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn search_document_ids_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/licence/_doc/a%2Fb"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let event = ChangeEvent::upsert("a/b", 0, licence_fields("SW1A", 0));
        let outcome = search_sink(&server).apply(&event).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }
}
