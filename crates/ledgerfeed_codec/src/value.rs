//! Dynamic value type for decoded journal payloads.

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, TimeZone, Utc};
use std::fmt;

/// An arbitrary-precision-style decimal: `coefficient * 10^exponent`.
///
/// The coefficient is bounded to the `i128` range, which covers every
/// decimal the ledger emits for business fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    /// Signed coefficient.
    pub coefficient: i128,
    /// Base-10 exponent.
    pub exponent: i32,
}

impl Decimal {
    /// Creates a decimal from its coefficient and exponent.
    pub fn new(coefficient: i128, exponent: i32) -> Self {
        Self {
            coefficient,
            exponent,
        }
    }

    /// Returns true if the decimal is numerically zero.
    pub fn is_zero(&self) -> bool {
        self.coefficient == 0
    }

    /// Converts to the nearest `f64`.
    ///
    /// Magnitudes beyond the `f64` range become infinite or zero.
    pub fn to_f64(&self) -> f64 {
        format!("{}e{}", self.coefficient, self.exponent)
            .parse()
            .unwrap_or(f64::NAN)
    }
}

/// Padding beyond this many zeros switches [`Decimal`] display to `E` notation.
const MAX_PLAIN_ZEROS: usize = 32;

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.coefficient < 0 { "-" } else { "" };
        let digits = self.coefficient.unsigned_abs().to_string();

        if self.exponent >= 0 {
            if self.coefficient == 0 {
                return f.write_str("0");
            }
            let zeros = self.exponent.unsigned_abs() as usize;
            if zeros > MAX_PLAIN_ZEROS {
                return write!(f, "{sign}{digits}E{}", self.exponent);
            }
            return write!(f, "{sign}{digits}{}", "0".repeat(zeros));
        }

        let scale = self.exponent.unsigned_abs() as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{int_part}.{frac_part}")
        } else if scale - digits.len() > MAX_PLAIN_ZEROS {
            if self.coefficient == 0 {
                return f.write_str("0");
            }
            write!(f, "{sign}{digits}E{}", self.exponent)
        } else {
            write!(f, "{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
        }
    }
}

/// Precision of a [`Timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimestampPrecision {
    /// Year only.
    Year,
    /// Year and month.
    Month,
    /// Calendar date.
    Day,
    /// Date, hour and minute.
    Minute,
    /// Date and time to the second, optionally with a fraction.
    Second,
}

/// A point in time with explicit precision.
///
/// Time components are stored in UTC; `offset_minutes` records the local
/// offset the writer observed (`None` when unknown).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// Precision of this timestamp.
    pub precision: TimestampPrecision,
    /// Local offset from UTC in minutes, if known.
    pub offset_minutes: Option<i32>,
    /// Year (1-9999).
    pub year: u16,
    /// Month (1-12); 1 below month precision.
    pub month: u8,
    /// Day of month (1-31); 1 below day precision.
    pub day: u8,
    /// Hour (UTC).
    pub hour: u8,
    /// Minute (UTC).
    pub minute: u8,
    /// Second.
    pub second: u8,
    /// Fractional seconds, `0 <= fraction < 1`.
    pub fraction: Option<Decimal>,
}

impl Timestamp {
    /// Creates a day-precision timestamp.
    pub fn from_ymd(year: u16, month: u8, day: u8) -> Self {
        Self {
            precision: TimestampPrecision::Day,
            offset_minutes: None,
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0,
            fraction: None,
        }
    }

    /// Creates a second-precision UTC timestamp.
    pub fn from_utc(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            precision: TimestampPrecision::Second,
            offset_minutes: Some(0),
            year,
            month,
            day,
            hour,
            minute,
            second,
            fraction: None,
        }
    }

    /// Sets the fractional seconds.
    pub fn with_fraction(mut self, fraction: Decimal) -> Self {
        self.fraction = Some(fraction);
        self
    }

    /// Sets the local offset in minutes.
    pub fn with_offset(mut self, offset_minutes: i32) -> Self {
        self.offset_minutes = Some(offset_minutes);
        self
    }

    /// Returns the fractional seconds as nanoseconds, truncating finer digits.
    pub fn nanoseconds(&self) -> u32 {
        let Some(fraction) = self.fraction.filter(|fraction| !fraction.is_zero()) else {
            return 0;
        };
        let shift = 9 + i64::from(fraction.exponent);
        let nanos = if shift >= 0 {
            u32::try_from(shift)
                .ok()
                .and_then(|shift| 10i128.checked_pow(shift))
                .and_then(|scale| fraction.coefficient.checked_mul(scale))
        } else {
            u32::try_from(shift.unsigned_abs())
                .ok()
                .and_then(|shift| 10i128.checked_pow(shift))
                .map(|scale| fraction.coefficient / scale)
                .or(Some(0))
        };
        nanos
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n < 1_000_000_000)
            .unwrap_or(0)
    }

    /// Converts to a chrono date-time in the recorded offset (UTC if unknown).
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let naive = NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month.max(1)),
            u32::from(self.day.max(1)),
        )?
        .and_hms_nano_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            self.nanoseconds(),
        )?;
        let offset = FixedOffset::east_opt(self.offset_minutes.unwrap_or(0) * 60)?;
        Some(Utc.from_utc_datetime(&naive).with_timezone(&offset))
    }

    /// Renders the timestamp as text at its own precision.
    pub fn to_rfc3339(&self) -> String {
        match self.precision {
            TimestampPrecision::Year => format!("{:04}T", self.year),
            TimestampPrecision::Month => format!("{:04}-{:02}T", self.year, self.month),
            TimestampPrecision::Day => {
                format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
            }
            TimestampPrecision::Minute | TimestampPrecision::Second => self
                .to_datetime()
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .unwrap_or_else(|| {
                    format!(
                        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
                        self.year, self.month, self.day, self.hour, self.minute, self.second
                    )
                }),
        }
    }
}

/// A dynamic decoded value.
///
/// Typed nulls collapse to [`Value::Null`] and annotations are not retained;
/// nothing downstream of the decoder depends on either.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null of any type.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Int(i64),
    /// Binary floating point.
    Float(f64),
    /// Decimal.
    Decimal(Decimal),
    /// Timestamp.
    Timestamp(Timestamp),
    /// Symbol, resolved to its text.
    Symbol(String),
    /// UTF-8 string.
    String(String),
    /// Binary large object.
    Blob(Vec<u8>),
    /// Character large object.
    Clob(Vec<u8>),
    /// Ordered, heterogeneous list.
    List(Vec<Value>),
    /// S-expression.
    SExp(Vec<Value>),
    /// Struct of named fields in stream order. Field names may repeat.
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Creates a struct value from name/value pairs, preserving order.
    pub fn structure<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns a short name for the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Timestamp(_) => "timestamp",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Blob(_) => "blob",
            Value::Clob(_) => "clob",
            Value::List(_) => "list",
            Value::SExp(_) => "sexp",
            Value::Struct(_) => "struct",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the text of a string or symbol value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a timestamp, if it is one.
    pub fn as_timestamp(&self) -> Option<&Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// Get the elements of a list or s-expression.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::SExp(items) => Some(items),
            _ => None,
        }
    }

    /// Get the fields of a struct.
    pub fn as_struct(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a field in this struct value. The first occurrence wins.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_struct()?
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Follows a path of field names through nested structs.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |value, field| value.get(field))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_display() {
        assert_eq!(Decimal::new(12345, -2).to_string(), "123.45");
        assert_eq!(Decimal::new(-5, -3).to_string(), "-0.005");
        assert_eq!(Decimal::new(7, 2).to_string(), "700");
        assert_eq!(Decimal::new(0, 3).to_string(), "0");
        assert_eq!(Decimal::new(0, -2).to_string(), "0.00");
    }

    #[test]
    fn decimal_display_with_extreme_exponents() {
        assert_eq!(Decimal::new(1, 200_000_000).to_string(), "1E200000000");
        assert_eq!(Decimal::new(-1, -200_000_000).to_string(), "-1E-200000000");
        assert_eq!(Decimal::new(0, -200_000_000).to_string(), "0");
        assert_eq!(Decimal::new(0, i32::MAX).to_string(), "0");
        assert_eq!(Decimal::new(5, 32).to_string().len(), 33);
        assert_eq!(Decimal::new(5, 33).to_string(), "5E33");
    }

    #[test]
    fn decimal_to_f64() {
        assert!((Decimal::new(125, -1).to_f64() - 12.5).abs() < f64::EPSILON);
        assert!((Decimal::new(-3, 0).to_f64() + 3.0).abs() < f64::EPSILON);
        assert_eq!(Decimal::new(1, 200_000_000).to_f64(), f64::INFINITY);
        assert_eq!(Decimal::new(-1, 200_000_000).to_f64(), f64::NEG_INFINITY);
        assert_eq!(Decimal::new(1, -200_000_000).to_f64(), 0.0);
    }

    #[test]
    fn timestamp_nanoseconds() {
        let ts = Timestamp::from_utc(2021, 3, 4, 5, 6, 7).with_fraction(Decimal::new(123, -3));
        assert_eq!(ts.nanoseconds(), 123_000_000);

        let fine = Timestamp::from_utc(2021, 3, 4, 5, 6, 7)
            .with_fraction(Decimal::new(123_456_789_123, -12));
        assert_eq!(fine.nanoseconds(), 123_456_789);
    }

    #[test]
    fn timestamp_zero_fraction_with_extreme_exponent() {
        let ts = Timestamp::from_utc(2020, 1, 2, 3, 4, 5).with_fraction(Decimal::new(0, i32::MAX));
        assert_eq!(ts.nanoseconds(), 0);
        assert_eq!(ts.to_rfc3339(), "2020-01-02T03:04:05Z");

        let tiny = Timestamp::from_utc(2020, 1, 2, 3, 4, 5).with_fraction(Decimal::new(5, i32::MIN));
        assert_eq!(tiny.nanoseconds(), 0);
    }

    #[test]
    fn timestamp_rendering() {
        let ts = Timestamp::from_utc(2020, 1, 30, 12, 0, 5);
        assert_eq!(ts.to_rfc3339(), "2020-01-30T12:00:05Z");

        let shifted = Timestamp::from_utc(2020, 1, 30, 12, 0, 5).with_offset(60);
        assert_eq!(shifted.to_rfc3339(), "2020-01-30T13:00:05+01:00");

        assert_eq!(Timestamp::from_ymd(2020, 1, 30).to_rfc3339(), "2020-01-30");
    }

    #[test]
    fn struct_lookup() {
        let value = Value::structure([
            ("id", Value::from("A1")),
            ("version", Value::from(3i64)),
            ("id", Value::from("shadowed")),
        ]);

        assert_eq!(value.get("id").and_then(Value::as_text), Some("A1"));
        assert_eq!(value.get("version").and_then(Value::as_int), Some(3));
        assert_eq!(value.get("missing"), None);
    }

    #[test]
    fn nested_path_lookup() {
        let value = Value::structure([(
            "payload",
            Value::structure([(
                "revision",
                Value::structure([("metadata", Value::structure([("id", Value::from("X"))]))]),
            )]),
        )]);

        assert_eq!(
            value
                .get_path(&["payload", "revision", "metadata", "id"])
                .and_then(Value::as_text),
            Some("X")
        );
        assert_eq!(value.get_path(&["payload", "nope"]), None);
    }

    #[test]
    fn symbol_and_string_share_text_accessor() {
        assert_eq!(Value::Symbol("a".into()).as_text(), Some("a"));
        assert_eq!(Value::String("b".into()).as_text(), Some("b"));
        assert_eq!(Value::Int(1).as_text(), None);
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("hi"), Value::String("hi".into()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Blob(vec![1, 2]));
        assert_eq!(
            Value::from(vec![1i64, 2]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(()), Value::Null);
    }
}
