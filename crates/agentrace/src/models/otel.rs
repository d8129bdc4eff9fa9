use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type AttributeBag = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsEnvelope {
    #[serde(default)]
    pub resource_logs: Vec<ResourceLogs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLogs {
    #[serde(default)]
    pub resource: Option<Resource>,

    #[serde(default)]
    pub scope_logs: Vec<ScopeLogs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeLogs {
    #[serde(default)]
    pub log_records: Vec<LogRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default)]
    pub time_unix_nano: Option<Value>,

    #[serde(default)]
    pub attributes: Vec<KeyValue>,

    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyValue {
    #[serde(default)]
    pub key: String,

    #[serde(default)]
    pub value: Value,
}

/// One OTLP `AnyValue`, reduced to the shapes the pipeline understands.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
    Double(f64),
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Reads the tagged `{stringValue}|{intValue}|...` form. OTLP/JSON encodes
    /// 64-bit integers as strings, so `intValue` accepts both.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        if let Some(text) = object.get("stringValue").and_then(Value::as_str) {
            return Some(Self::String(text.to_string()));
        }
        if let Some(raw) = object.get("intValue") {
            let parsed = match raw {
                Value::Number(number) => number.as_i64(),
                Value::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            };
            return parsed.map(Self::Int);
        }
        if let Some(flag) = object.get("boolValue").and_then(Value::as_bool) {
            return Some(Self::Bool(flag));
        }
        if let Some(raw) = object.get("doubleValue") {
            let parsed = match raw {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            return parsed.map(Self::Double);
        }
        if let Some(array) = object.get("arrayValue") {
            let values = array
                .get("values")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Self::from_json).collect())
                .unwrap_or_default();
            return Some(Self::Array(values));
        }

        None
    }

    /// Scalars become one string each; arrays flatten recursively in order.
    #[must_use]
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<String>) {
        match self {
            Self::String(text) => out.push(text.clone()),
            Self::Int(number) => out.push(number.to_string()),
            Self::Bool(flag) => out.push(flag.to_string()),
            Self::Double(number) => out.push(number.to_string()),
            Self::Array(values) => {
                for value in values {
                    value.flatten_into(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodexOtelEvent {
    pub timestamp_iso: String,
    pub attributes: AttributeBag,
}

impl CodexOtelEvent {
    /// First non-empty value among `keys`, scanned in order.
    #[must_use]
    pub fn first_value(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.attributes.get(*key).and_then(|values| {
                values
                    .iter()
                    .map(|value| value.trim())
                    .find(|value| !value.is_empty())
            })
        })
    }

    #[must_use]
    pub fn values(&self, key: &str) -> &[String] {
        self.attributes.get(key).map_or(&[][..], Vec::as_slice)
    }
}
