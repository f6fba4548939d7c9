//! Field-name translation between external rows and internal records.
//!
//! External payloads (the remote service, the HTTP API) name fields in
//! snake_case; internal records use camelCase. Translation walks arrays and
//! objects recursively and only rewrites object keys. Scalars pass through.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// `first_name` -> `firstName`. An underscore followed by a lowercase ASCII
/// letter collapses into the uppercased letter; anything else is kept.
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '_' {
            if let Some(next) = chars.peek().copied().filter(char::is_ascii_lowercase) {
                out.push(next.to_ascii_uppercase());
                chars.next();
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// `firstName` -> `first_name`. Every uppercase ASCII letter becomes an
/// underscore plus its lowercase form.
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn rename_keys(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| rename_keys(item, rename))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                out.insert(rename(&key), rename_keys(inner, rename));
            }
            Value::Object(out)
        }
        scalar => scalar,
    }
}

/// External (snake_case) shape to internal (camelCase) shape.
pub fn to_internal(value: Value) -> Value {
    rename_keys(value, snake_to_camel)
}

/// Internal (camelCase) shape to external (snake_case) shape.
pub fn to_external(value: Value) -> Value {
    rename_keys(value, camel_to_snake)
}

/// Serialize an internal record straight into its external shape.
pub fn encode<T: Serialize>(record: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(record).map(to_external)
}

/// Deserialize an internal record from an external row.
pub fn decode<T: DeserializeOwned>(row: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(to_internal(row))
}

/// Drop keys that must never be written through an update payload.
pub fn strip_keys(value: &mut Value, keys: &[&str]) {
    if let Value::Object(map) = value {
        for key in keys {
            map.remove(*key);
        }
    }
}
