//! Session-bus control surface: the published `Control` interface, the
//! client proxy used by the CLI, and value conversions between JSON
//! configuration values and D-Bus variants.

pub mod client;
pub mod service;

pub use client::ControlProxy;
pub use service::serve;

use crate::history::HistoryEntry;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use zbus::zvariant::{OwnedValue, Value};

/// Well-known bus name. Owning it is the single-instance lock.
pub const BUS_NAME: &str = "org.fede.whisperaloud";

/// Object path of the control interface.
pub const OBJECT_PATH: &str = "/org/fede/whisperaloud";

/// Interface name (methods and signals per the compatibility contract).
pub const INTERFACE: &str = "org.fede.whisperaloud.Control";

/// Convert a JSON scalar into a D-Bus variant.
///
/// Nulls become empty strings (a variant has no null); string arrays map to
/// `as`; nested objects are flattened to their JSON text.
pub fn json_to_variant(value: &JsonValue) -> OwnedValue {
    let v: Value<'static> = match value {
        JsonValue::Bool(b) => Value::from(*b),
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => {
            Value::from(n.as_i64().unwrap_or_default())
        }
        JsonValue::Number(n) => Value::from(n.as_f64().unwrap_or_default()),
        JsonValue::String(s) => Value::from(s.clone()),
        JsonValue::Null => Value::from(String::new()),
        JsonValue::Array(items) => Value::from(
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect::<Vec<String>>(),
        ),
        JsonValue::Object(_) => Value::from(value.to_string()),
    };
    OwnedValue::try_from(v).expect("plain variant carries no file descriptors")
}

/// Convert a D-Bus variant back into a JSON value.
pub fn variant_to_json(value: &OwnedValue) -> JsonValue {
    let v: Value<'_> = Value::try_from(value).expect("OwnedValue always converts back to Value");
    match v {
        Value::Bool(b) => JsonValue::Bool(b),
        Value::U8(n) => JsonValue::from(n),
        Value::I16(n) => JsonValue::from(n),
        Value::U16(n) => JsonValue::from(n),
        Value::I32(n) => JsonValue::from(n),
        Value::U32(n) => JsonValue::from(n),
        Value::I64(n) => JsonValue::from(n),
        Value::U64(n) => JsonValue::from(n),
        Value::F64(n) => JsonValue::from(n),
        Value::Str(s) => JsonValue::String(s.to_string()),
        Value::Array(_) => Vec::<String>::try_from(value.clone())
            .map(|items| JsonValue::Array(items.into_iter().map(JsonValue::String).collect()))
            .unwrap_or(JsonValue::Null),
        _ => JsonValue::Null,
    }
}

/// Serialize a history entry as an `a{sv}` dictionary.
pub fn entry_to_dict(entry: &HistoryEntry) -> HashMap<String, OwnedValue> {
    let mut dict = HashMap::new();
    dict.insert("id".to_string(), json_to_variant(&JsonValue::from(entry.id)));
    dict.insert(
        "text".to_string(),
        json_to_variant(&JsonValue::String(entry.text.clone())),
    );
    dict.insert(
        "timestamp".to_string(),
        json_to_variant(&JsonValue::String(entry.created_at.to_rfc3339())),
    );
    dict.insert(
        "duration".to_string(),
        json_to_variant(&JsonValue::from(entry.duration_secs)),
    );
    dict.insert(
        "language".to_string(),
        json_to_variant(&JsonValue::String(entry.language.clone())),
    );
    dict.insert(
        "model".to_string(),
        json_to_variant(&JsonValue::String(entry.model.clone())),
    );
    dict.insert(
        "confidence".to_string(),
        json_to_variant(&JsonValue::from(entry.confidence)),
    );
    dict.insert(
        "processing_time".to_string(),
        json_to_variant(&JsonValue::from(entry.processing_time_secs)),
    );
    dict.insert(
        "favorite".to_string(),
        json_to_variant(&JsonValue::Bool(entry.favorite)),
    );
    dict.insert(
        "notes".to_string(),
        json_to_variant(&JsonValue::String(entry.notes.clone())),
    );
    dict.insert(
        "tags".to_string(),
        json_to_variant(&JsonValue::Array(
            entry.tags.iter().cloned().map(JsonValue::String).collect(),
        )),
    );
    dict.insert(
        "archive_hash".to_string(),
        json_to_variant(&JsonValue::String(
            entry.archive_hash.clone().unwrap_or_default(),
        )),
    );
    dict
}
