//! JSON rendering of decoded values.
//!
//! Downstream stores speak JSON. The mapping is lossy where JSON has no
//! equivalent type:
//!
//! | Value             | JSON                               |
//! |-------------------|------------------------------------|
//! | decimal           | number (integer when exact)        |
//! | timestamp         | RFC 3339 string                    |
//! | symbol            | string                             |
//! | blob / clob       | base64 string                      |
//! | sexp              | array                              |
//! | non-finite float  | null                               |

use crate::envelope::ChangeEnvelope;
use crate::event::Fields;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ledgerfeed_codec::{Decimal, Value};
use serde_json::{Map, Number, Value as Json};

/// Converts a value to JSON.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Decimal(d) => decimal_to_json(*d),
        Value::Timestamp(ts) => Json::String(ts.to_rfc3339()),
        Value::Symbol(s) | Value::String(s) => Json::String(s.clone()),
        Value::Blob(bytes) | Value::Clob(bytes) => Json::String(STANDARD.encode(bytes)),
        Value::List(items) | Value::SExp(items) => {
            Json::Array(items.iter().map(value_to_json).collect())
        }
        Value::Struct(fields) => {
            let mut map = Map::new();
            for (name, field) in fields {
                if !map.contains_key(name) {
                    map.insert(name.clone(), value_to_json(field));
                }
            }
            Json::Object(map)
        }
    }
}

/// Converts event fields to a JSON object.
pub fn fields_to_json(fields: &Fields) -> Map<String, Json> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect()
}

/// Renders an envelope for inspection.
pub fn envelope_to_json(envelope: &ChangeEnvelope) -> Json {
    let mut map = Map::new();
    map.insert(
        "recordType".to_string(),
        Json::String(envelope.kind.as_str().to_string()),
    );
    if let Some(arn) = &envelope.stream_arn {
        map.insert("qldbStreamArn".to_string(), Json::String(arn.clone()));
    }
    map.insert("payload".to_string(), value_to_json(&envelope.payload));
    Json::Object(map)
}

fn decimal_to_json(d: Decimal) -> Json {
    if d.exponent >= 0 {
        let exact = 10i128
            .checked_pow(d.exponent.unsigned_abs())
            .and_then(|scale| d.coefficient.checked_mul(scale))
            .and_then(|n| i64::try_from(n).ok());
        if let Some(n) = exact {
            return Json::from(n);
        }
    }
    Number::from_f64(d.to_f64()).map_or(Json::Null, Json::Number)
}
