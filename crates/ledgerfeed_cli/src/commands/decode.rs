//! Decode command implementation.

use ledgerfeed_protocol::{envelope_to_json, expand, ChangeEnvelope, TransportBatch};
use serde_json::{json, Value as Json};
use std::path::Path;

/// Runs the decode command.
///
/// Prints one JSON object per logical record. Records that fail to expand
/// or decode are printed with their error instead of an envelope.
pub fn run(event_path: &Path, verify_checksums: bool) -> Result<(), Box<dyn std::error::Error>> {
    let document = std::fs::read_to_string(event_path)?;
    let batch = TransportBatch::from_json(&document)?;

    for malformed in &batch.malformed {
        print_record(json!({
            "record": malformed.sequence_number,
            "error": malformed.error.to_string(),
        }))?;
    }

    for record in &batch.records {
        for logical in expand(record, verify_checksums) {
            let output = match logical {
                Ok(logical) => {
                    let mut output = json!({
                        "record": logical.id().to_string(),
                        "partitionKey": logical.partition_key,
                    });
                    match ChangeEnvelope::decode(&logical.data) {
                        Ok(envelope) => output["envelope"] = envelope_to_json(&envelope),
                        Err(e) => output["error"] = Json::String(e.to_string()),
                    }
                    output
                }
                Err(e) => json!({
                    "record": record.sequence_number,
                    "error": e.to_string(),
                }),
            };
            print_record(output)?;
        }
    }

    Ok(())
}

fn print_record(output: Json) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
