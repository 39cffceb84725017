//! OTLP utility functions
//!
//! Provides reusable functions for working with OTLP protobuf types:
//! - Attribute lookup and upsert on `KeyValue` lists
//! - Attribute value conversion (string and JSON forms)
//! - Resource attribute access shared by the three signal kinds

use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
use opentelemetry_proto::tonic::resource::v1::Resource;
use serde_json::Value as JsonValue;

// ============================================================================
// ATTRIBUTE LOOKUP
// ============================================================================

/// Find an attribute value by key (first entry wins)
pub fn get_attribute<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a AnyValue> {
    attrs
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
}

/// String form of an attribute value, `None` when the key is absent
pub fn get_attribute_string(attrs: &[KeyValue], key: &str) -> Option<String> {
    attrs
        .iter()
        .find(|kv| kv.key == key)
        .map(|kv| kv.value.as_ref().map(any_value_to_string).unwrap_or_default())
}

/// String form of a resource attribute; missing resource or key yields an empty string
pub fn resource_attribute_string(resource: Option<&Resource>, key: &str) -> String {
    resource
        .and_then(|r| get_attribute_string(&r.attributes, key))
        .unwrap_or_default()
}

// ============================================================================
// ATTRIBUTE MUTATION
// ============================================================================

/// Create a string AnyValue
pub fn string_value(value: &str) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(value.to_string())),
    }
}

/// Create a string-valued KeyValue
pub fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(string_value(value)),
    }
}

/// Insert or replace an attribute value
pub fn upsert_attribute(attrs: &mut Vec<KeyValue>, key: &str, value: Option<AnyValue>) {
    match attrs.iter_mut().find(|kv| kv.key == key) {
        Some(existing) => existing.value = value,
        None => attrs.push(KeyValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Insert or replace a string attribute
pub fn upsert_string(attrs: &mut Vec<KeyValue>, key: &str, value: &str) {
    upsert_attribute(attrs, key, Some(string_value(value)));
}

/// Remove an attribute, returning its value if it was present
pub fn remove_attribute(attrs: &mut Vec<KeyValue>, key: &str) -> Option<Option<AnyValue>> {
    let idx = attrs.iter().position(|kv| kv.key == key)?;
    Some(attrs.remove(idx).value)
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

/// Convert AnyValue to string representation
pub fn any_value_to_string(value: &AnyValue) -> String {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(any_value::Value::ArrayValue(_)) | Some(any_value::Value::KvlistValue(_)) => {
            any_value_to_json(value).to_string()
        }
        Some(any_value::Value::BytesValue(b)) => hex::encode(b),
        None => String::new(),
    }
}

/// Convert AnyValue to JSON value (preserves native types)
pub fn any_value_to_json(value: &AnyValue) -> JsonValue {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => serde_json::json!(s),
        Some(any_value::Value::BoolValue(b)) => serde_json::json!(b),
        Some(any_value::Value::IntValue(i)) => serde_json::json!(i),
        Some(any_value::Value::DoubleValue(d)) => serde_json::json!(d),
        Some(any_value::Value::ArrayValue(arr)) => {
            serde_json::json!(arr.values.iter().map(any_value_to_json).collect::<Vec<_>>())
        }
        Some(any_value::Value::KvlistValue(kvlist)) => {
            let map: serde_json::Map<String, JsonValue> = kvlist
                .values
                .iter()
                .filter_map(|kv| {
                    kv.value
                        .as_ref()
                        .map(|v| (kv.key.clone(), any_value_to_json(v)))
                })
                .collect();
            JsonValue::Object(map)
        }
        Some(any_value::Value::BytesValue(b)) => serde_json::json!(hex::encode(b)),
        None => JsonValue::Null,
    }
}

/// Typed, order-independent fingerprint of an attribute list.
/// Keys are sorted; values keep their type so `"1"` and `1` stay distinct.
pub fn attributes_fingerprint(attrs: &[KeyValue]) -> Vec<(String, String)> {
    let mut parts: Vec<(String, String)> = attrs
        .iter()
        .map(|kv| {
            let value = kv
                .value
                .as_ref()
                .map(|v| any_value_to_json(v).to_string())
                .unwrap_or_default();
            (kv.key.clone(), value)
        })
        .collect();
    parts.sort();
    parts
}
