// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Decoded gpsd reports
//!
//! A [`Record`] is a typed view over one JSON object. Every field is
//! optional: accessors return `Option` and absence is never an error on its
//! own. Indexing with `record["field"]` is also supported and yields
//! `Value::Null` for missing fields.

use std::fmt;
use std::ops::Index;

use serde_json::{Map, Value};

use crate::error::{DecodeError, FieldError};

/// Known report classes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordClass {
    Version,
    Devices,
    Device,
    Sky,
    Tpv,
    Pps,
    Toff,
    Watch,
    Error,
    /// Any class this crate has no dedicated handling for
    Other(String),
}

impl RecordClass {
    /// Parse a `class` discriminant
    pub fn parse(s: &str) -> Self {
        match s {
            "VERSION" => Self::Version,
            "DEVICES" => Self::Devices,
            "DEVICE" => Self::Device,
            "SKY" => Self::Sky,
            "TPV" => Self::Tpv,
            "PPS" => Self::Pps,
            "TOFF" => Self::Toff,
            "WATCH" => Self::Watch,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of the class
    pub fn as_str(&self) -> &str {
        match self {
            Self::Version => "VERSION",
            Self::Devices => "DEVICES",
            Self::Device => "DEVICE",
            Self::Sky => "SKY",
            Self::Tpv => "TPV",
            Self::Pps => "PPS",
            Self::Toff => "TOFF",
            Self::Watch => "WATCH",
            Self::Error => "ERROR",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Map<String, Value>,
}

static NULL: Value = Value::Null;

impl Record {
    /// Decode one line of the stream
    ///
    /// Surrounding whitespace (including the line terminator) is ignored.
    /// Anything other than a JSON object is rejected.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let trimmed = line.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(DecodeError::new(
                trimmed,
                format!("expected a JSON object, got {}", json_type(&other)),
            )),
            Err(e) => Err(DecodeError::new(trimmed, e.to_string())),
        }
    }

    /// Wrap an already parsed object
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The raw `class` discriminant, if any
    pub fn class_name(&self) -> Option<&str> {
        self.str("class")
    }

    /// The parsed discriminant
    pub fn class(&self) -> Option<RecordClass> {
        self.class_name().map(RecordClass::parse)
    }

    /// Whether the field is present (a JSON `null` counts as absent)
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Raw field lookup
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }

    /// Numeric field; booleans read as 0/1
    pub fn f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer field
    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// String field
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    /// Boolean field; numbers are true when non-zero
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            _ => None,
        }
    }

    /// Field rendered as a label value
    ///
    /// Strings are returned verbatim, integral numbers without a fraction,
    /// everything else through its JSON representation.
    pub fn label(&self, name: &str) -> Option<String> {
        self.get(name).map(value_label)
    }

    /// Nested list of objects, each decoded into its own record
    ///
    /// Entries that are not objects are skipped.
    pub fn records(&self, name: &str) -> Option<Vec<Record>> {
        let items = self.get(name)?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|v| v.as_object().cloned().map(Record::from_map))
                .collect(),
        )
    }

    /// Numeric field that the caller cannot do without
    pub fn require_f64(&self, name: &str) -> Result<f64, FieldError> {
        match self.get(name) {
            None => Err(self.missing(name)),
            Some(_) => self.f64(name).ok_or_else(|| FieldError::WrongType {
                class: self.class_name().unwrap_or("unknown").to_string(),
                field: name.to_string(),
                expected: "a number",
            }),
        }
    }

    /// String field that the caller cannot do without
    pub fn require_str(&self, name: &str) -> Result<&str, FieldError> {
        match self.get(name) {
            None => Err(self.missing(name)),
            Some(v) => v.as_str().ok_or_else(|| FieldError::WrongType {
                class: self.class_name().unwrap_or("unknown").to_string(),
                field: name.to_string(),
                expected: "a string",
            }),
        }
    }

    fn missing(&self, name: &str) -> FieldError {
        FieldError::Missing {
            class: self.class_name().unwrap_or("unknown").to_string(),
            field: name.to_string(),
        }
    }

    /// Field names in this record
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or replace a field
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Index<&str> for Record {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.fields) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Render a JSON value as a metric label
pub fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKY: &str = r#"{"class":"SKY","device":"/dev/ttyACM0","hdop":0.92,"nSat":3,
        "satellites":[{"PRN":5,"el":31.0,"az":86.0,"ss":39.0,"used":true,"gnssid":0,"svid":5},
                      {"PRN":67,"el":12.0,"used":false},
                      42]}"#;

    #[test]
    fn test_decode_object() {
        let record = Record::decode("{\"class\":\"TPV\",\"mode\":3,\"lat\":52.1}\n").unwrap();
        assert_eq!(record.class(), Some(RecordClass::Tpv));
        assert_eq!(record.i64("mode"), Some(3));
        assert_eq!(record.f64("lat"), Some(52.1));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_decode_malformed_keeps_raw_text() {
        let err = Record::decode("{\"class\":\"TPV\",\n").unwrap_err();
        assert_eq!(err.raw, "{\"class\":\"TPV\",");
        assert!(!err.explanation.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = Record::decode("[1,2,3]").unwrap_err();
        assert!(err.explanation.contains("an array"));
    }

    #[test]
    fn test_absent_and_null_fields() {
        let record = Record::decode(r#"{"class":"TPV","lat":null}"#).unwrap();
        assert!(!record.has("lat"));
        assert!(!record.has("lon"));
        assert_eq!(record.f64("lon"), None);
        assert_eq!(record["lon"], Value::Null);
    }

    #[test]
    fn test_index_and_accessor_agree() {
        let record = Record::decode(SKY).unwrap();
        assert_eq!(record["device"].as_str(), record.str("device"));
        assert_eq!(record["hdop"].as_f64(), record.f64("hdop"));
    }

    #[test]
    fn test_nested_records() {
        let record = Record::decode(SKY).unwrap();
        let sats = record.records("satellites").unwrap();
        assert_eq!(sats.len(), 2);
        assert_eq!(sats[0].i64("PRN"), Some(5));
        assert_eq!(sats[0].bool("used"), Some(true));
        assert_eq!(sats[0]["ss"].as_f64(), Some(39.0));
        assert_eq!(sats[1].bool("used"), Some(false));
        assert!(!sats[1].has("ss"));
        assert!(record.records("devices").is_none());
    }

    #[test]
    fn test_bool_and_number_coercion() {
        let record = Record::decode(r#"{"a":true,"b":0,"c":2.5}"#).unwrap();
        assert_eq!(record.f64("a"), Some(1.0));
        assert_eq!(record.bool("b"), Some(false));
        assert_eq!(record.bool("c"), Some(true));
    }

    #[test]
    fn test_labels() {
        let record = Record::decode(r#"{"PRN":12,"f":3.0,"g":1.5,"s":"gps"}"#).unwrap();
        assert_eq!(record.label("PRN").as_deref(), Some("12"));
        assert_eq!(record.label("f").as_deref(), Some("3"));
        assert_eq!(record.label("g").as_deref(), Some("1.5"));
        assert_eq!(record.label("s").as_deref(), Some("gps"));
        assert_eq!(record.label("missing"), None);
    }

    #[test]
    fn test_require_fields() {
        let record = Record::decode(r#"{"class":"PPS","device":7}"#).unwrap();
        assert_eq!(
            record.require_f64("clock_nsec"),
            Err(FieldError::Missing {
                class: "PPS".to_string(),
                field: "clock_nsec".to_string()
            })
        );
        assert!(matches!(
            record.require_str("device"),
            Err(FieldError::WrongType { .. })
        ));
    }

    #[test]
    fn test_class_roundtrip_names() {
        for name in ["VERSION", "DEVICES", "SKY", "TPV", "PPS", "WATCH", "GST"] {
            assert_eq!(RecordClass::parse(name).as_str(), name);
        }
        assert_eq!(
            RecordClass::parse("GST"),
            RecordClass::Other("GST".to_string())
        );
    }
}
