//! Ion 1.0 binary decoder.

use crate::error::{CodecError, CodecResult};
use crate::primitives::{
    L_NULL, L_VARIABLE, T_ANNOTATION, T_BLOB, T_BOOL, T_CLOB, T_DECIMAL, T_FLOAT, T_LIST,
    T_NEG_INT, T_NULL, T_POS_INT, T_SEXP, T_STRING, T_STRUCT, T_SYMBOL, T_TIMESTAMP,
    VERSION_MARKER,
};
use crate::symbols::{SymbolTable, SID_ION_SYMBOL_TABLE};
use crate::value::{Decimal, Timestamp, TimestampPrecision, Value};

/// Maximum container nesting accepted from untrusted input.
pub const MAX_DEPTH: usize = 64;

/// Decode the first user value of a binary stream.
///
/// # Errors
///
/// Returns an error if the stream is malformed, references unknown symbols,
/// or holds no user value at all.
pub fn from_ion(bytes: &[u8]) -> CodecResult<Value> {
    BinaryDecoder::new(bytes)
        .next_value()?
        .ok_or(CodecError::NoValue)
}

/// Decode every top-level user value of a binary stream.
///
/// # Errors
///
/// Returns the first decoding error encountered.
pub fn from_ion_all(bytes: &[u8]) -> CodecResult<Vec<Value>> {
    let mut decoder = BinaryDecoder::new(bytes);
    let mut values = Vec::new();
    while let Some(value) = decoder.next_value()? {
        values.push(value);
    }
    Ok(values)
}

/// A streaming decoder over one binary buffer.
///
/// System values (version markers, local symbol tables, padding) are
/// consumed internally; [`next_value`](Self::next_value) only yields user
/// values.
pub struct BinaryDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    symbols: SymbolTable,
    seen_marker: bool,
}

impl<'a> BinaryDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            symbols: SymbolTable::system(),
            seen_marker: false,
        }
    }

    /// The symbol table currently in effect.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current byte offset into the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the next top-level user value, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input. The decoder should not be used
    /// after an error.
    pub fn next_value(&mut self) -> CodecResult<Option<Value>> {
        loop {
            if self.is_empty() {
                return Ok(None);
            }
            if !self.seen_marker || self.data[self.pos] == VERSION_MARKER[0] {
                self.read_version_marker()?;
                continue;
            }

            let end = self.data.len();
            let Some((annotations, value)) = self.read_value(end, 0)? else {
                continue;
            };

            if annotations.first() == Some(&SID_ION_SYMBOL_TABLE) && value.as_struct().is_some()
            {
                self.load_local_symbols(&value)?;
                continue;
            }
            if annotations.is_empty() && matches!(&value, Value::Symbol(s) if s == "$ion_1_0") {
                continue;
            }
            return Ok(Some(value));
        }
    }

    fn read_version_marker(&mut self) -> CodecResult<()> {
        let bytes = self.read_bytes(VERSION_MARKER.len(), self.data.len())?;
        if bytes != VERSION_MARKER {
            let mut found = [0u8; 4];
            found.copy_from_slice(bytes);
            return Err(CodecError::InvalidVersionMarker { found });
        }
        self.symbols = SymbolTable::system();
        self.seen_marker = true;
        Ok(())
    }

    fn load_local_symbols(&mut self, table: &Value) -> CodecResult<()> {
        let append = match table.get("imports") {
            Some(Value::Symbol(s)) => s == "$ion_symbol_table",
            Some(Value::List(imports)) if !imports.is_empty() => {
                return Err(CodecError::UnsupportedImport)
            }
            _ => false,
        };

        let declared: Vec<Option<String>> = match table.get("symbols") {
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Some(text.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        if !append {
            self.symbols = SymbolTable::system();
        }
        self.symbols.extend(declared);
        Ok(())
    }

    /// Reads one value ending no later than `end`. Returns `None` for padding.
    fn read_value(&mut self, end: usize, depth: usize) -> CodecResult<Option<(Vec<u64>, Value)>> {
        let descriptor = self.read_byte(end)?;
        let type_code = descriptor >> 4;
        let low = descriptor & 0x0f;

        match type_code {
            T_NULL => {
                if low == L_NULL {
                    return Ok(Some((Vec::new(), Value::Null)));
                }
                let len = self.read_length(low, end)?;
                self.read_bytes(len, end)?;
                Ok(None)
            }
            T_ANNOTATION => {
                if low < 3 || low == L_NULL {
                    return Err(CodecError::invalid_structure(
                        "malformed annotation wrapper",
                    ));
                }
                let len = self.read_length(low, end)?;
                let wrapper_end = self.checked_end(len, end)?;

                let annot_len = self.read_varuint_usize(wrapper_end)?;
                if annot_len == 0 {
                    return Err(CodecError::invalid_structure("empty annotation list"));
                }
                let annot_end = self.checked_end(annot_len, wrapper_end)?;
                let mut annotations = Vec::new();
                while self.pos < annot_end {
                    annotations.push(self.read_varuint(annot_end)?);
                }

                if self.data.get(self.pos).map(|b| b >> 4) == Some(T_ANNOTATION) {
                    return Err(CodecError::invalid_structure("nested annotation wrapper"));
                }
                let (_, value) = self
                    .read_value(wrapper_end, depth)?
                    .ok_or_else(|| CodecError::invalid_structure("annotation wraps padding"))?;
                self.expect_end(wrapper_end)?;
                Ok(Some((annotations, value)))
            }
            15 => Err(CodecError::invalid_structure("reserved type code")),
            _ => {
                if low == L_NULL {
                    return Ok(Some((Vec::new(), Value::Null)));
                }
                let value = self.read_typed(type_code, low, end, depth)?;
                Ok(Some((Vec::new(), value)))
            }
        }
    }

    fn read_typed(&mut self, type_code: u8, low: u8, end: usize, depth: usize) -> CodecResult<Value> {
        if type_code == T_BOOL {
            return match low {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(CodecError::invalid_structure("invalid bool representation")),
            };
        }

        let len = if type_code == T_STRUCT && low == 1 {
            let len = self.read_varuint_usize(end)?;
            if len == 0 {
                return Err(CodecError::invalid_structure("empty sorted struct"));
            }
            len
        } else {
            self.read_length(low, end)?
        };
        let value_end = self.checked_end(len, end)?;

        let value = match type_code {
            T_POS_INT => {
                let magnitude = self.read_uint(value_end)?;
                Value::Int(i64::try_from(magnitude).map_err(|_| CodecError::IntegerOverflow)?)
            }
            T_NEG_INT => {
                let magnitude = self.read_uint(value_end)?;
                if magnitude == 0 {
                    return Err(CodecError::invalid_structure("negative zero int"));
                }
                let negated = -i128::from(magnitude);
                Value::Int(i64::try_from(negated).map_err(|_| CodecError::IntegerOverflow)?)
            }
            T_FLOAT => {
                let bytes = self.read_bytes(len, value_end)?;
                match *bytes {
                    [] => Value::Float(0.0),
                    [a, b, c, d] => Value::Float(f64::from(f32::from_be_bytes([a, b, c, d]))),
                    [a, b, c, d, e, f, g, h] => {
                        Value::Float(f64::from_be_bytes([a, b, c, d, e, f, g, h]))
                    }
                    _ => return Err(CodecError::invalid_structure("invalid float length")),
                }
            }
            T_DECIMAL => Value::Decimal(self.read_decimal(value_end)?),
            T_TIMESTAMP => Value::Timestamp(self.read_timestamp(value_end)?),
            T_SYMBOL => {
                let sid = self.read_uint(value_end)?;
                Value::Symbol(self.symbols.resolve(sid)?.to_string())
            }
            T_STRING => {
                let bytes = self.read_bytes(len, value_end)?;
                let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Value::String(text.to_string())
            }
            T_CLOB => Value::Clob(self.read_bytes(len, value_end)?.to_vec()),
            T_BLOB => Value::Blob(self.read_bytes(len, value_end)?.to_vec()),
            T_LIST | T_SEXP => {
                if depth >= MAX_DEPTH {
                    return Err(CodecError::DepthLimitExceeded { max: MAX_DEPTH });
                }
                let mut items = Vec::new();
                while self.pos < value_end {
                    if let Some((_, item)) = self.read_value(value_end, depth + 1)? {
                        items.push(item);
                    }
                }
                if type_code == T_LIST {
                    Value::List(items)
                } else {
                    Value::SExp(items)
                }
            }
            T_STRUCT => {
                if depth >= MAX_DEPTH {
                    return Err(CodecError::DepthLimitExceeded { max: MAX_DEPTH });
                }
                let mut fields = Vec::new();
                while self.pos < value_end {
                    let sid = self.read_varuint(value_end)?;
                    // Padding may carry any field ID, including 0.
                    if let Some((_, field)) = self.read_value(value_end, depth + 1)? {
                        fields.push((self.symbols.resolve(sid)?.to_string(), field));
                    }
                }
                Value::Struct(fields)
            }
            _ => return Err(CodecError::invalid_structure("reserved type code")),
        };

        self.expect_end(value_end)?;
        Ok(value)
    }

    fn read_decimal(&mut self, end: usize) -> CodecResult<Decimal> {
        if self.pos == end {
            return Ok(Decimal::new(0, 0));
        }
        let exponent = self.read_varint(end)?;
        let exponent = i32::try_from(exponent).map_err(|_| CodecError::IntegerOverflow)?;
        let coefficient = self.read_int(end)?;
        Ok(Decimal::new(coefficient, exponent))
    }

    fn read_timestamp(&mut self, end: usize) -> CodecResult<Timestamp> {
        // Offset -0 marks an unknown local offset.
        let offset_first = self.data.get(self.pos).copied();
        let offset = self.read_varint(end)?;
        let offset_minutes = if offset == 0 && offset_first == Some(0xc0) {
            None
        } else {
            Some(i32::try_from(offset).map_err(|_| CodecError::IntegerOverflow)?)
        };

        let year = u16::try_from(self.read_varuint(end)?)
            .map_err(|_| CodecError::invalid_structure("timestamp year out of range"))?;
        let mut ts = Timestamp {
            precision: TimestampPrecision::Year,
            offset_minutes,
            year,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            fraction: None,
        };

        if self.pos < end {
            ts.month = self.read_component(end, 1..=12)?;
            ts.precision = TimestampPrecision::Month;
        }
        if self.pos < end {
            ts.day = self.read_component(end, 1..=31)?;
            ts.precision = TimestampPrecision::Day;
        }
        if self.pos < end {
            ts.hour = self.read_component(end, 0..=23)?;
            if self.pos >= end {
                return Err(CodecError::invalid_structure("timestamp hour without minute"));
            }
            ts.minute = self.read_component(end, 0..=59)?;
            ts.precision = TimestampPrecision::Minute;
        }
        if self.pos < end {
            ts.second = self.read_component(end, 0..=59)?;
            ts.precision = TimestampPrecision::Second;
        }
        if self.pos < end {
            let exponent = i32::try_from(self.read_varint(end)?)
                .map_err(|_| CodecError::IntegerOverflow)?;
            let coefficient = self.read_int(end)?;
            let fraction = Decimal::new(coefficient, exponent);
            if coefficient < 0 || (exponent >= 0 && coefficient != 0) {
                return Err(CodecError::invalid_structure(
                    "timestamp fraction out of range",
                ));
            }
            ts.fraction = Some(fraction);
        }
        Ok(ts)
    }

    fn read_component(&mut self, end: usize, range: std::ops::RangeInclusive<u8>) -> CodecResult<u8> {
        let raw = self.read_varuint(end)?;
        u8::try_from(raw)
            .ok()
            .filter(|v| range.contains(v))
            .ok_or_else(|| CodecError::invalid_structure("timestamp component out of range"))
    }

    #[inline]
    fn read_byte(&mut self, end: usize) -> CodecResult<u8> {
        if self.pos >= end {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize, end: usize) -> CodecResult<&'a [u8]> {
        let stop = self.checked_end(len, end)?;
        let bytes = &self.data[self.pos..stop];
        self.pos = stop;
        Ok(bytes)
    }

    #[inline]
    fn checked_end(&self, len: usize, end: usize) -> CodecResult<usize> {
        self.pos
            .checked_add(len)
            .filter(|stop| *stop <= end)
            .ok_or(CodecError::UnexpectedEof)
    }

    fn expect_end(&self, end: usize) -> CodecResult<()> {
        if self.pos == end {
            Ok(())
        } else {
            Err(CodecError::invalid_structure("value length mismatch"))
        }
    }

    fn read_length(&mut self, low: u8, end: usize) -> CodecResult<usize> {
        if low == L_VARIABLE {
            self.read_varuint_usize(end)
        } else {
            Ok(usize::from(low))
        }
    }

    fn read_varuint(&mut self, end: usize) -> CodecResult<u64> {
        let mut value: u64 = 0;
        loop {
            let byte = self.read_byte(end)?;
            value = value
                .checked_mul(128)
                .and_then(|v| v.checked_add(u64::from(byte & 0x7f)))
                .ok_or(CodecError::IntegerOverflow)?;
            if byte & 0x80 != 0 {
                return Ok(value);
            }
        }
    }

    fn read_varuint_usize(&mut self, end: usize) -> CodecResult<usize> {
        usize::try_from(self.read_varuint(end)?).map_err(|_| CodecError::IntegerOverflow)
    }

    fn read_varint(&mut self, end: usize) -> CodecResult<i64> {
        let first = self.read_byte(end)?;
        let negative = first & 0x40 != 0;
        let mut magnitude = u64::from(first & 0x3f);
        let mut last = first & 0x80 != 0;
        while !last {
            let byte = self.read_byte(end)?;
            magnitude = magnitude
                .checked_mul(128)
                .and_then(|v| v.checked_add(u64::from(byte & 0x7f)))
                .ok_or(CodecError::IntegerOverflow)?;
            last = byte & 0x80 != 0;
        }
        let magnitude = i64::try_from(magnitude).map_err(|_| CodecError::IntegerOverflow)?;
        Ok(if negative { -magnitude } else { magnitude })
    }

    /// Reads a fixed-width unsigned integer spanning up to `end`.
    fn read_uint(&mut self, end: usize) -> CodecResult<u64> {
        let bytes = self.read_bytes(end - self.pos, end)?;
        bytes.iter().try_fold(0u64, |acc, b| {
            acc.checked_mul(256)
                .and_then(|v| v.checked_add(u64::from(*b)))
                .ok_or(CodecError::IntegerOverflow)
        })
    }

    /// Reads a fixed-width sign-and-magnitude integer spanning up to `end`.
    fn read_int(&mut self, end: usize) -> CodecResult<i128> {
        let bytes = self.read_bytes(end - self.pos, end)?;
        let Some((first, rest)) = bytes.split_first() else {
            return Ok(0);
        };
        let negative = first & 0x80 != 0;
        let magnitude = rest.iter().try_fold(u128::from(first & 0x7f), |acc, b| {
            acc.checked_mul(256)
                .and_then(|v| v.checked_add(u128::from(*b)))
                .ok_or(CodecError::IntegerOverflow)
        })?;
        let magnitude = i128::try_from(magnitude).map_err(|_| CodecError::IntegerOverflow)?;
        Ok(if negative { -magnitude } else { magnitude })
    }
}
