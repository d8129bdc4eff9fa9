use serde_json::Value;

use crate::models::otel::KeyValue;
use crate::models::{AttributeBag, AttributeValue, CodexOtelEvent, LogsEnvelope};
use crate::utils::time::unix_nanos_to_iso_or_now;

/// Flattens a raw OTLP/JSON logs envelope into timestamped attribute bags,
/// one per log record, in source order. Malformed input yields no events.
#[must_use]
pub fn otel_envelope_to_codex_events(raw: &str) -> Vec<CodexOtelEvent> {
    let Ok(envelope) = serde_json::from_str::<LogsEnvelope>(raw) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for resource_logs in &envelope.resource_logs {
        let resource_attributes = resource_logs
            .resource
            .as_ref()
            .map(|resource| extract_attributes(&resource.attributes))
            .unwrap_or_default();

        for scope_logs in &resource_logs.scope_logs {
            for record in &scope_logs.log_records {
                let record_attributes = extract_attributes(&record.attributes);
                events.push(CodexOtelEvent {
                    timestamp_iso: unix_nanos_to_iso_or_now(
                        record.time_unix_nano.as_ref().and_then(read_unix_nanos),
                    ),
                    attributes: merge_attributes(&resource_attributes, record_attributes),
                });
            }
        }
    }
    events
}

/// Resource attributes act as defaults; record values for the same key are
/// appended after them rather than replacing them.
#[must_use]
pub fn merge_attributes(resource: &AttributeBag, record: AttributeBag) -> AttributeBag {
    let mut merged = resource.clone();
    for (key, values) in record {
        merged.entry(key).or_default().extend(values);
    }
    merged
}

#[must_use]
pub fn extract_attributes(attributes: &[KeyValue]) -> AttributeBag {
    let mut bag = AttributeBag::new();
    for attribute in attributes {
        if attribute.key.is_empty() {
            continue;
        }
        let Some(value) = AttributeValue::from_json(&attribute.value) else {
            continue;
        };
        bag.entry(attribute.key.clone())
            .or_default()
            .extend(value.flatten());
    }
    bag
}

fn read_unix_nanos(value: &Value) -> Option<i128> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_u64().map(i128::from))
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.is_finite())
                    .map(|float| float as i128)
            }),
        Value::String(text) => text.trim().parse::<i128>().ok(),
        _ => None,
    }
}
