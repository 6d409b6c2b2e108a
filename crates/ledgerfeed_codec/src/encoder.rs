//! Ion 1.0 binary encoder.

use crate::error::{CodecError, CodecResult};
use crate::primitives::{
    int_bytes, uint_bytes, write_header, write_varint, write_varuint, T_ANNOTATION, T_BLOB,
    T_CLOB, T_DECIMAL, T_FLOAT, T_LIST, T_NEG_INT, T_POS_INT, T_SEXP, T_STRING, T_STRUCT,
    T_SYMBOL, T_TIMESTAMP, VERSION_MARKER,
};
use crate::symbols::{SymbolTable, SID_ION_SYMBOL_TABLE, SID_SYMBOLS};
use crate::value::{Decimal, Timestamp, TimestampPrecision, Value};

/// Encode a value as a complete binary stream.
///
/// # Errors
///
/// Returns an error if the value cannot be represented (for example a
/// timestamp with out-of-range components).
pub fn to_ion(value: &Value) -> CodecResult<Vec<u8>> {
    to_ion_stream(std::slice::from_ref(value))
}

/// Encode several top-level values as one binary stream sharing a symbol table.
///
/// # Errors
///
/// Returns the first encoding error encountered.
pub fn to_ion_stream(values: &[Value]) -> CodecResult<Vec<u8>> {
    let mut encoder = BinaryEncoder::new();
    for value in values {
        encoder.push(value)?;
    }
    Ok(encoder.finish())
}

/// Encoder that buffers values until the local symbol table is known.
///
/// Field names and symbol values that are not system symbols are assigned
/// local IDs in first-seen order.
#[derive(Debug, Default)]
pub struct BinaryEncoder {
    symbols: SymbolTable,
    local: Vec<String>,
    body: Vec<u8>,
}

impl BinaryEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one top-level value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented. The buffered
    /// output is left unchanged in that case.
    pub fn push(&mut self, value: &Value) -> CodecResult<()> {
        let mut out = Vec::new();
        self.encode(value, &mut out)?;
        self.body.extend_from_slice(&out);
        Ok(())
    }

    /// Finish encoding and return the complete stream.
    pub fn finish(self) -> Vec<u8> {
        let mut out = VERSION_MARKER.to_vec();
        if !self.local.is_empty() {
            write_local_symbol_table(&mut out, &self.local);
        }
        out.extend_from_slice(&self.body);
        out
    }

    fn symbol_id(&mut self, text: &str) -> u64 {
        if let Some(sid) = self.symbols.lookup(text) {
            return sid;
        }
        self.local.push(text.to_string());
        self.symbols.intern(text)
    }

    fn encode(&mut self, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
        match value {
            Value::Null => out.push(0x0f),
            Value::Bool(b) => out.push(0x10 | u8::from(*b)),
            Value::Int(n) => {
                let type_code = if *n < 0 { T_NEG_INT } else { T_POS_INT };
                let bytes = uint_bytes(u128::from(n.unsigned_abs()));
                write_header(out, type_code, bytes.len());
                out.extend_from_slice(&bytes);
            }
            Value::Float(f) => {
                if f.to_bits() == 0 {
                    write_header(out, T_FLOAT, 0);
                } else {
                    write_header(out, T_FLOAT, 8);
                    out.extend_from_slice(&f.to_be_bytes());
                }
            }
            Value::Decimal(d) => {
                let body = decimal_body(*d);
                write_header(out, T_DECIMAL, body.len());
                out.extend_from_slice(&body);
            }
            Value::Timestamp(ts) => {
                let body = timestamp_body(ts)?;
                write_header(out, T_TIMESTAMP, body.len());
                out.extend_from_slice(&body);
            }
            Value::Symbol(text) => {
                let bytes = uint_bytes(u128::from(self.symbol_id(text)));
                write_header(out, T_SYMBOL, bytes.len());
                out.extend_from_slice(&bytes);
            }
            Value::String(s) => {
                write_header(out, T_STRING, s.len());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Clob(bytes) => {
                write_header(out, T_CLOB, bytes.len());
                out.extend_from_slice(bytes);
            }
            Value::Blob(bytes) => {
                write_header(out, T_BLOB, bytes.len());
                out.extend_from_slice(bytes);
            }
            Value::List(items) | Value::SExp(items) => {
                let mut body = Vec::new();
                for item in items {
                    self.encode(item, &mut body)?;
                }
                let type_code = if matches!(value, Value::List(_)) {
                    T_LIST
                } else {
                    T_SEXP
                };
                write_header(out, type_code, body.len());
                out.extend_from_slice(&body);
            }
            Value::Struct(fields) => {
                let mut body = Vec::new();
                for (name, field) in fields {
                    write_varuint(&mut body, self.symbol_id(name));
                    self.encode(field, &mut body)?;
                }
                write_header(out, T_STRUCT, body.len());
                out.extend_from_slice(&body);
            }
        }
        Ok(())
    }
}

fn decimal_body(d: Decimal) -> Vec<u8> {
    let mut body = Vec::new();
    if d.coefficient == 0 && d.exponent == 0 {
        return body;
    }
    write_varint(
        &mut body,
        u64::from(d.exponent.unsigned_abs()),
        d.exponent < 0,
    );
    body.extend_from_slice(&int_bytes(d.coefficient));
    body
}

fn timestamp_body(ts: &Timestamp) -> CodecResult<Vec<u8>> {
    if !(1..=12).contains(&ts.month)
        || !(1..=31).contains(&ts.day)
        || ts.hour > 23
        || ts.minute > 59
        || ts.second > 59
    {
        return Err(CodecError::encoding_failed(
            "timestamp component out of range",
        ));
    }

    let mut body = Vec::new();
    match ts.offset_minutes {
        Some(offset) => write_varint(&mut body, u64::from(offset.unsigned_abs()), offset < 0),
        None => write_varint(&mut body, 0, true),
    }
    write_varuint(&mut body, u64::from(ts.year));
    if ts.precision >= TimestampPrecision::Month {
        write_varuint(&mut body, u64::from(ts.month));
    }
    if ts.precision >= TimestampPrecision::Day {
        write_varuint(&mut body, u64::from(ts.day));
    }
    if ts.precision >= TimestampPrecision::Minute {
        write_varuint(&mut body, u64::from(ts.hour));
        write_varuint(&mut body, u64::from(ts.minute));
    }
    if ts.precision >= TimestampPrecision::Second {
        write_varuint(&mut body, u64::from(ts.second));
        if let Some(fraction) = ts.fraction {
            if fraction.coefficient < 0 {
                return Err(CodecError::encoding_failed("negative timestamp fraction"));
            }
            write_varint(
                &mut body,
                u64::from(fraction.exponent.unsigned_abs()),
                fraction.exponent < 0,
            );
            body.extend_from_slice(&int_bytes(fraction.coefficient));
        }
    }
    Ok(body)
}

fn write_local_symbol_table(out: &mut Vec<u8>, symbols: &[String]) {
    let mut list = Vec::new();
    for text in symbols {
        write_header(&mut list, T_STRING, text.len());
        list.extend_from_slice(text.as_bytes());
    }

    let mut table = Vec::new();
    write_varuint(&mut table, SID_SYMBOLS);
    write_header(&mut table, T_LIST, list.len());
    table.extend_from_slice(&list);

    let mut wrapper = Vec::new();
    write_varuint(&mut wrapper, 1);
    write_varuint(&mut wrapper, SID_ION_SYMBOL_TABLE);
    write_header(&mut wrapper, T_STRUCT, table.len());
    wrapper.extend_from_slice(&table);

    write_header(out, T_ANNOTATION, wrapper.len());
    out.extend_from_slice(&wrapper);
}
