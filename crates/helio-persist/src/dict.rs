//! Helpers for persisted property dicts.

use serde_json::Value;
use uuid::Uuid;

pub fn get_str<'a>(dict: &'a Value, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(Value::as_str)
}

pub fn get_string(dict: &Value, key: &str) -> Option<String> {
    get_str(dict, key).map(str::to_string)
}

pub fn get_uuid(dict: &Value, key: &str) -> Option<Uuid> {
    get_str(dict, key).and_then(|text| Uuid::parse_str(text).ok())
}

pub fn get_u64(dict: &Value, key: &str) -> Option<u64> {
    dict.get(key).and_then(Value::as_u64)
}

pub fn get_array<'a>(dict: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    dict.get(key).and_then(Value::as_array)
}

pub fn get_object<'a>(dict: &'a Value, key: &str) -> Option<&'a serde_json::Map<String, Value>> {
    dict.get(key).and_then(Value::as_object)
}
