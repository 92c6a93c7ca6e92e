//! Value codecs between state-tree leaves and query-string values.
//!
//! Every codec obeys the same two rules:
//! - `deserialize(serialize(v))` gives back `v` for values the field can
//!   legitimately hold (floats and dates normalise, e.g. `2.0` → `"2"`).
//! - Bad input never fails. Unparseable numbers and dates become `null`,
//!   a missing value becomes the type's neutral value (`null`, `false`, `[]`).

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Separator used by array codecs unless the context overrides it.
pub const DEFAULT_SEPARATOR: &str = "_";

/// Default date format, `10/10/1985`.
pub const DEFAULT_DATE_FORMAT: &str = "%-m/%-d/%Y";

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializerConfig {
    /// Overrides the separator of every array codec.
    #[serde(default)]
    pub array_string_separator: Option<String>,
}

/// Per-call settings handed to every codec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializerContext {
    #[serde(default)]
    pub serializer_config: SerializerConfig,
}

impl SerializerContext {
    /// Context whose array codecs split and join on `separator`.
    pub fn with_array_separator(separator: impl Into<String>) -> Self {
        Self {
            serializer_config: SerializerConfig {
                array_string_separator: Some(separator.into()),
            },
        }
    }

    fn array_separator<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.serializer_config
            .array_string_separator
            .as_deref()
            .unwrap_or(fallback)
    }
}

/// Converts one leaf of the state tree to and from its query-string form.
///
/// `serialize` returning `None` means the parameter is left out of the
/// query string entirely.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value, context: &SerializerContext) -> Option<String>;

    fn deserialize(&self, raw: Option<&str>, context: &SerializerContext) -> Value;
}

// ── Scalars ──

#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer for StringSerializer {
    fn serialize(&self, value: &Value, _context: &SerializerContext) -> Option<String> {
        display_scalar(value)
    }

    fn deserialize(&self, raw: Option<&str>, _context: &SerializerContext) -> Value {
        raw.map_or(Value::Null, |s| Value::String(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntSerializer;

impl Serializer for IntSerializer {
    fn serialize(&self, value: &Value, _context: &SerializerContext) -> Option<String> {
        match value {
            Value::Number(n) => Some(format_number(n)),
            Value::String(s) => parse_int(s).map(|n| format_number(&n)),
            _ => None,
        }
    }

    fn deserialize(&self, raw: Option<&str>, _context: &SerializerContext) -> Value {
        raw.and_then(parse_int).map_or(Value::Null, Value::Number)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FloatSerializer;

impl Serializer for FloatSerializer {
    fn serialize(&self, value: &Value, _context: &SerializerContext) -> Option<String> {
        match value {
            Value::Number(n) => Some(format_number(n)),
            Value::String(s) => parse_float(s).and_then(Number::from_f64).map(|n| format_number(&n)),
            _ => None,
        }
    }

    fn deserialize(&self, raw: Option<&str>, _context: &SerializerContext) -> Value {
        raw.and_then(parse_float)
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

/// `1` for true, `0` for false. Only `1` reads back as true.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanSerializer;

impl Serializer for BooleanSerializer {
    fn serialize(&self, value: &Value, _context: &SerializerContext) -> Option<String> {
        Some(if is_truthy(value) { "1" } else { "0" }.to_string())
    }

    fn deserialize(&self, raw: Option<&str>, _context: &SerializerContext) -> Value {
        Value::Bool(raw == Some("1"))
    }
}

/// Calendar dates.
///
/// State holds dates as ISO `YYYY-MM-DD` strings (RFC 3339 timestamps are
/// accepted and truncated to their date). The query string uses `format`.
#[derive(Debug, Clone)]
pub struct DateSerializer {
    format: String,
}

impl DateSerializer {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

impl Default for DateSerializer {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl Serializer for DateSerializer {
    fn serialize(&self, value: &Value, _context: &SerializerContext) -> Option<String> {
        let date = value.as_str().and_then(parse_state_date)?;
        Some(date.format(&self.format).to_string())
    }

    fn deserialize(&self, raw: Option<&str>, _context: &SerializerContext) -> Value {
        raw.and_then(|s| {
            NaiveDate::parse_from_str(s, &self.format)
                .ok()
                .or_else(|| parse_state_date(s))
        })
        .map_or(Value::Null, |date| {
            Value::String(date.format(ISO_DATE_FORMAT).to_string())
        })
    }
}

// ── Arrays ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    String,
    Int,
    Float,
}

/// Delimited arrays.
///
/// `[]` is omitted from the query string, `[""]` keeps the key with an
/// empty value, and an empty query value reads back as `[]`.
#[derive(Debug, Clone)]
pub struct ArraySerializer {
    separator: String,
    element: ElementKind,
}

impl ArraySerializer {
    pub fn new(element: ElementKind, separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            element,
        }
    }

    fn format_element(&self, item: &Value) -> String {
        match (self.element, item) {
            (_, Value::Null) => String::new(),
            (ElementKind::String, item) => display_scalar(item).unwrap_or_default(),
            (_, Value::Number(n)) => format_number(n),
            (_, item) => display_scalar(item).unwrap_or_default(),
        }
    }

    fn parse_element(&self, raw: &str) -> Value {
        match self.element {
            ElementKind::String => Value::String(raw.to_string()),
            ElementKind::Int => parse_int(raw).map_or(Value::Null, Value::Number),
            ElementKind::Float => parse_float(raw)
                .and_then(Number::from_f64)
                .map_or(Value::Null, Value::Number),
        }
    }
}

impl Serializer for ArraySerializer {
    fn serialize(&self, value: &Value, context: &SerializerContext) -> Option<String> {
        let items = value.as_array()?;
        if items.is_empty() {
            return None;
        }
        let separator = context.array_separator(&self.separator);
        let parts: Vec<String> = items.iter().map(|item| self.format_element(item)).collect();
        Some(parts.join(separator))
    }

    fn deserialize(&self, raw: Option<&str>, context: &SerializerContext) -> Value {
        let raw = match raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Value::Array(Vec::new()),
        };
        let separator = context.array_separator(&self.separator);
        Value::Array(
            raw.split(separator)
                .map(|part| self.parse_element(part))
                .collect(),
        )
    }
}

/// Constructors for the built-in codecs.
pub mod serializers {
    use std::sync::Arc;

    use super::*;

    pub fn string() -> Arc<dyn Serializer> {
        Arc::new(StringSerializer)
    }

    pub fn int() -> Arc<dyn Serializer> {
        Arc::new(IntSerializer)
    }

    pub fn float() -> Arc<dyn Serializer> {
        Arc::new(FloatSerializer)
    }

    pub fn boolean() -> Arc<dyn Serializer> {
        Arc::new(BooleanSerializer)
    }

    pub fn date() -> Arc<dyn Serializer> {
        Arc::new(DateSerializer::default())
    }

    /// Date codec with a chrono `strftime` format, e.g. `"%Y%m%d"`.
    pub fn date_with_format(format: &str) -> Arc<dyn Serializer> {
        Arc::new(DateSerializer::new(format))
    }

    pub fn array_string() -> Arc<dyn Serializer> {
        array_string_with(DEFAULT_SEPARATOR)
    }

    pub fn array_string_with(separator: &str) -> Arc<dyn Serializer> {
        Arc::new(ArraySerializer::new(ElementKind::String, separator))
    }

    pub fn array_int() -> Arc<dyn Serializer> {
        array_int_with(DEFAULT_SEPARATOR)
    }

    pub fn array_int_with(separator: &str) -> Arc<dyn Serializer> {
        Arc::new(ArraySerializer::new(ElementKind::Int, separator))
    }

    pub fn array_float() -> Arc<dyn Serializer> {
        array_float_with(DEFAULT_SEPARATOR)
    }

    pub fn array_float_with(separator: &str) -> Arc<dyn Serializer> {
        Arc::new(ArraySerializer::new(ElementKind::Float, separator))
    }
}

// ── Helpers ──

fn display_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(format_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Integral floats print without a fraction (`2.0` → `2`).
fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Leading base-10 integer: optional sign, then digits up to the first
/// non-digit (`"12abc"` → 12). Digit runs beyond `i64` become floats.
fn parse_int(raw: &str) -> Option<Number> {
    let s = raw.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let digits = &digits[..end];
    if let Ok(n) = digits.parse::<i64>() {
        return Some(Number::from(if negative { -n } else { n }));
    }
    let f = digits.parse::<f64>().ok()?;
    Number::from_f64(if negative { -f } else { f })
}

/// Longest numeric prefix (`"1.5px"` → 1.5).
fn parse_float(raw: &str) -> Option<f64> {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

fn parse_state_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, ISO_DATE_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> SerializerContext {
        SerializerContext::default()
    }

    // ========================================================================
    // string
    // ========================================================================

    #[test]
    fn string_round_trip() {
        let s = serializers::string();
        assert_eq!(s.serialize(&json!("string"), &ctx()), Some("string".into()));
        assert_eq!(s.deserialize(Some("string"), &ctx()), json!("string"));
    }

    #[test]
    fn string_null_is_neutral() {
        let s = serializers::string();
        assert_eq!(s.deserialize(None, &ctx()), Value::Null);
        assert_eq!(s.serialize(&Value::Null, &ctx()), None);
    }

    // ========================================================================
    // int / float
    // ========================================================================

    #[test]
    fn int_round_trip() {
        let s = serializers::int();
        assert_eq!(s.serialize(&json!(2), &ctx()), Some("2".into()));
        assert_eq!(s.deserialize(Some("2"), &ctx()), json!(2));
        assert_eq!(s.deserialize(Some("-17"), &ctx()), json!(-17));
    }

    #[test]
    fn int_bad_input_is_null() {
        let s = serializers::int();
        assert_eq!(s.deserialize(Some("abc"), &ctx()), Value::Null);
        assert_eq!(s.deserialize(Some(""), &ctx()), Value::Null);
        assert_eq!(s.deserialize(None, &ctx()), Value::Null);
    }

    #[test]
    fn int_takes_leading_digits() {
        let s = serializers::int();
        assert_eq!(s.deserialize(Some("12abc"), &ctx()), json!(12));
        assert_eq!(s.deserialize(Some("3.9"), &ctx()), json!(3));
    }

    #[test]
    fn int_beyond_i64_keeps_magnitude() {
        let s = serializers::int();
        let big = s.deserialize(Some("99999999999999999999"), &ctx());
        assert_eq!(big.as_f64(), Some(1e20));
        assert_eq!(s.serialize(&big, &ctx()), Some("100000000000000000000".into()));
        let small = s.deserialize(Some("-99999999999999999999x"), &ctx());
        assert_eq!(small.as_f64(), Some(-1e20));
        assert_eq!(
            s.deserialize(Some("9223372036854775807"), &ctx()),
            json!(i64::MAX)
        );
    }

    #[test]
    fn float_normalises_integral_values() {
        let s = serializers::float();
        assert_eq!(s.serialize(&json!(2.0), &ctx()), Some("2".into()));
        assert_eq!(s.deserialize(Some("2.0"), &ctx()), json!(2.0));
        assert_eq!(s.serialize(&json!(2.01), &ctx()), Some("2.01".into()));
    }

    #[test]
    fn float_prefix_and_exponent() {
        let s = serializers::float();
        assert_eq!(s.deserialize(Some("1.5px"), &ctx()), json!(1.5));
        assert_eq!(s.deserialize(Some("1e3"), &ctx()), json!(1000.0));
        assert_eq!(s.deserialize(Some("1e"), &ctx()), json!(1.0));
        assert_eq!(s.deserialize(Some(".5"), &ctx()), json!(0.5));
        assert_eq!(s.deserialize(Some("."), &ctx()), Value::Null);
        assert_eq!(s.deserialize(Some("NaN"), &ctx()), Value::Null);
    }

    // ========================================================================
    // boolean
    // ========================================================================

    #[test]
    fn boolean_round_trip() {
        let s = serializers::boolean();
        assert_eq!(s.serialize(&json!(true), &ctx()), Some("1".into()));
        assert_eq!(s.serialize(&json!(false), &ctx()), Some("0".into()));
        assert_eq!(s.deserialize(Some("1"), &ctx()), json!(true));
        assert_eq!(s.deserialize(Some("0"), &ctx()), json!(false));
    }

    #[test]
    fn boolean_missing_is_false() {
        let s = serializers::boolean();
        assert_eq!(s.deserialize(None, &ctx()), json!(false));
        assert_eq!(s.deserialize(Some("yes"), &ctx()), json!(false));
    }

    // ========================================================================
    // date
    // ========================================================================

    #[test]
    fn date_serializes_us_format() {
        let s = serializers::date();
        assert_eq!(s.serialize(&json!("1985-10-10"), &ctx()), Some("10/10/1985".into()));
        assert_eq!(s.serialize(&json!("1985-01-05"), &ctx()), Some("1/5/1985".into()));
    }

    #[test]
    fn date_accepts_rfc3339_state() {
        let s = serializers::date();
        assert_eq!(
            s.serialize(&json!("1985-10-10T00:00:00Z"), &ctx()),
            Some("10/10/1985".into())
        );
    }

    #[test]
    fn date_deserializes_to_iso() {
        let s = serializers::date();
        assert_eq!(s.deserialize(Some("10/10/1985"), &ctx()), json!("1985-10-10"));
        assert_eq!(s.deserialize(Some("1985-10-10"), &ctx()), json!("1985-10-10"));
    }

    #[test]
    fn date_bad_input_is_null() {
        let s = serializers::date();
        assert_eq!(s.deserialize(Some("yesterday"), &ctx()), Value::Null);
        assert_eq!(s.deserialize(None, &ctx()), Value::Null);
        assert_eq!(s.serialize(&json!("not a date"), &ctx()), None);
    }

    #[test]
    fn date_custom_format() {
        let s = serializers::date_with_format("%Y%m%d");
        assert_eq!(s.serialize(&json!("2024-02-29"), &ctx()), Some("20240229".into()));
        assert_eq!(s.deserialize(Some("20240229"), &ctx()), json!("2024-02-29"));
    }

    // ========================================================================
    // arrays
    // ========================================================================

    #[test]
    fn array_string_round_trip() {
        let s = serializers::array_string();
        assert_eq!(s.serialize(&json!(["a", "b"]), &ctx()), Some("a_b".into()));
        assert_eq!(s.deserialize(Some("a_b"), &ctx()), json!(["a", "b"]));
    }

    #[test]
    fn array_int_and_float() {
        let ints = serializers::array_int();
        assert_eq!(ints.serialize(&json!([1, 2]), &ctx()), Some("1_2".into()));
        assert_eq!(ints.deserialize(Some("1_2"), &ctx()), json!([1, 2]));
        assert_eq!(ints.deserialize(Some("1_x"), &ctx()), json!([1, null]));

        let floats = serializers::array_float();
        assert_eq!(floats.serialize(&json!([1.2, 2.01]), &ctx()), Some("1.2_2.01".into()));
        assert_eq!(floats.deserialize(Some("1.2_2.01"), &ctx()), json!([1.2, 2.01]));
    }

    #[test]
    fn array_empty_cases() {
        let s = serializers::array_string();
        assert_eq!(s.serialize(&json!([]), &ctx()), None);
        assert_eq!(s.serialize(&json!([""]), &ctx()), Some(String::new()));
        assert_eq!(s.deserialize(Some(""), &ctx()), json!([]));
        assert_eq!(s.deserialize(None, &ctx()), json!([]));
    }

    #[test]
    fn array_separator_from_context() {
        let s = serializers::array_string();
        let dash = SerializerContext::with_array_separator("-");
        assert_eq!(s.serialize(&json!(["cool", "parameter"]), &dash), Some("cool-parameter".into()));
        assert_eq!(s.deserialize(Some("A-B-C-D"), &dash), json!(["A", "B", "C", "D"]));
    }

    #[test]
    fn array_custom_separator() {
        let s = serializers::array_string_with(",");
        assert_eq!(s.serialize(&json!(["a", "b"]), &ctx()), Some("a,b".into()));
        assert_eq!(s.deserialize(Some("a,b"), &ctx()), json!(["a", "b"]));
    }

    #[test]
    fn context_deserializes_from_camel_case() {
        let context: SerializerContext =
            serde_json::from_value(json!({"serializerConfig": {"arrayStringSeparator": "-"}}))
                .unwrap();
        assert_eq!(context, SerializerContext::with_array_separator("-"));
    }
}
