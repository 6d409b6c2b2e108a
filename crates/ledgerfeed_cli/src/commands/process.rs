//! Process command implementation.

use ledgerfeed_engine::{
    item_to_json, BatchReport, DynamoDbHttpStore, FieldMap, HttpSearchTransport, KeyValueSink,
    KeyValueSinkConfig, KeyValueStore, MemoryKeyValueStore, MemorySearchIndex, Pipeline,
    PipelineConfig, SearchIndexSink, SearchSinkConfig, SearchTransport,
};
use ledgerfeed_protocol::TransportBatch;
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Options for the process command.
pub struct Options {
    pub table_name: String,
    pub dynamodb_endpoint: Option<String>,
    pub search_endpoint: Option<String>,
    pub index: String,
    pub only_tables: Vec<String>,
    pub kv_renames: Vec<String>,
    pub search_renames: Vec<String>,
    pub max_in_flight: usize,
    pub time_budget_ms: Option<u64>,
    pub verify_checksums: bool,
}

/// Batch report representation for output.
#[derive(Debug, Serialize)]
struct ReportInfo {
    records_received: usize,
    logical_records: usize,
    events: usize,
    skipped: usize,
    applied: usize,
    superseded: usize,
    rejected: Vec<FailureInfo>,
    sink_failures: Vec<FailureInfo>,
    timed_out: bool,
    duration_ms: u128,
}

#[derive(Debug, Serialize)]
struct FailureInfo {
    record: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
    error: String,
}

impl From<&BatchReport> for ReportInfo {
    fn from(report: &BatchReport) -> Self {
        Self {
            records_received: report.records_received,
            logical_records: report.logical_records,
            events: report.events,
            skipped: report.skipped,
            applied: report.applied,
            superseded: report.superseded,
            rejected: report
                .rejected
                .iter()
                .map(|f| FailureInfo {
                    record: f.record.to_string(),
                    stage: Some(f.stage.to_string()),
                    sink: None,
                    document_id: None,
                    error: f.error.to_string(),
                })
                .collect(),
            sink_failures: report
                .sink_failures
                .iter()
                .map(|f| FailureInfo {
                    record: f.record.to_string(),
                    stage: None,
                    sink: Some(f.sink.clone()),
                    document_id: Some(f.document_id.clone()),
                    error: f.error.to_string(),
                })
                .collect(),
            timed_out: report.timed_out,
            duration_ms: report.duration.as_millis(),
        }
    }
}

/// Runs the process command.
pub async fn run(
    event_path: &Path,
    options: Options,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = std::fs::read_to_string(event_path)?;
    let batch = TransportBatch::from_json(&document)?;
    tracing::debug!(
        path = %event_path.display(),
        records = batch.len(),
        "loaded invocation document"
    );

    let mut config = PipelineConfig::new()
        .with_max_in_flight(options.max_in_flight)
        .with_verify_checksums(options.verify_checksums);
    if let Some(ms) = options.time_budget_ms {
        config = config.with_time_budget(Duration::from_millis(ms));
    }
    if !options.only_tables.is_empty() {
        config = config.with_tables(options.only_tables);
    }

    let memory_store = Arc::new(MemoryKeyValueStore::new());
    let store: Arc<dyn KeyValueStore> = match &options.dynamodb_endpoint {
        Some(endpoint) => Arc::new(DynamoDbHttpStore::new(endpoint)?),
        None => memory_store.clone(),
    };
    let memory_index = Arc::new(MemorySearchIndex::new());
    let transport: Arc<dyn SearchTransport> = match &options.search_endpoint {
        Some(endpoint) => Arc::new(HttpSearchTransport::new(endpoint)?),
        None => memory_index.clone(),
    };

    let kv_config = KeyValueSinkConfig::new(&options.table_name)
        .with_field_map(parse_renames(&options.kv_renames)?);
    let search_config = SearchSinkConfig::new(&options.index)
        .with_field_map(parse_renames(&options.search_renames)?);

    let pipeline = Pipeline::new(config)
        .with_sink(Arc::new(KeyValueSink::new(store, kv_config)))
        .with_sink(Arc::new(SearchIndexSink::new(transport, search_config)));

    let report = pipeline.process_batch(batch).await;
    let info = ReportInfo::from(&report);

    match format {
        "json" => {
            let mut output = json!({ "report": info });
            if options.dynamodb_endpoint.is_none() {
                let items: Vec<Json> = memory_store
                    .items(&options.table_name)
                    .iter()
                    .map(item_to_json)
                    .collect();
                output["keyValue"] = Json::Array(items);
            }
            if options.search_endpoint.is_none() {
                let documents: serde_json::Map<String, Json> =
                    memory_index.documents(&options.index).into_iter().collect();
                output["search"] = Json::Object(documents);
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            print_text_output(&info);
            if options.dynamodb_endpoint.is_none() {
                println!();
                println!("Key-value table {}:", options.table_name);
                for item in memory_store.items(&options.table_name) {
                    println!("  {}", item_to_json(&item));
                }
            }
            if options.search_endpoint.is_none() {
                println!();
                println!("Search index {}:", options.index);
                for (id, source) in memory_index.documents(&options.index) {
                    println!("  {id}: {source}");
                }
            }
        }
    }

    report.into_result()?;
    Ok(())
}

fn parse_renames(renames: &[String]) -> Result<FieldMap, Box<dyn std::error::Error>> {
    let mut map = FieldMap::new();
    for rename in renames {
        let (from, to) = rename
            .split_once('=')
            .filter(|(from, to)| !from.is_empty() && !to.is_empty())
            .ok_or_else(|| format!("invalid rename {rename:?}, expected FROM=TO"))?;
        map = map.rename(from, to);
    }
    Ok(map)
}

fn print_text_output(info: &ReportInfo) {
    println!("Records received:  {}", info.records_received);
    println!("Logical records:   {}", info.logical_records);
    println!("Events:            {}", info.events);
    println!("Skipped:           {}", info.skipped);
    println!("Applied:           {}", info.applied);
    println!("Superseded:        {}", info.superseded);
    println!("Rejected:          {}", info.rejected.len());
    println!("Sink failures:     {}", info.sink_failures.len());
    println!("Timed out:         {}", info.timed_out);
    println!("Duration:          {} ms", info.duration_ms);

    for failure in &info.rejected {
        println!(
            "  rejected {} at {}: {}",
            failure.record,
            failure.stage.as_deref().unwrap_or("-"),
            failure.error
        );
    }
    for failure in &info.sink_failures {
        println!(
            "  {} failed for {} ({}): {}",
            failure.sink.as_deref().unwrap_or("-"),
            failure.document_id.as_deref().unwrap_or("-"),
            failure.record,
            failure.error
        );
    }
}
