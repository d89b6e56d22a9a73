//! Persistent object contract
//!
//! Every persisted model item carries a UUID identity and round-trips through
//! a JSON dict. The dict shape is `{"type": ..., "uuid": ..., ...}`; raw
//! object identity is never persisted, only UUIDs.

use serde_json::{Map, Value};
use uuid::Uuid;

/// Contract for items that persist as dicts keyed by UUID.
pub trait PersistentObject: Send + Sync {
    /// Stable identity of this item within its project.
    fn uuid(&self) -> Uuid;

    /// Persisted type tag, e.g. `"data_item"`.
    fn item_type(&self) -> &'static str;

    /// Serialize the item to its persisted dict.
    fn write_to_dict(&self) -> Value;

    /// Populate the item from a persisted dict. Unknown keys are ignored;
    /// missing keys leave the current value in place.
    fn read_from_dict(&self, dict: &Value);
}

/// Start a persisted dict with the common `type`/`uuid` keys.
pub fn base_dict(item_type: &str, uuid: Uuid) -> Map<String, Value> {
    let mut dict = Map::new();
    dict.insert("type".to_string(), Value::String(item_type.to_string()));
    dict.insert("uuid".to_string(), Value::String(uuid.to_string()));
    dict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_dict_carries_type_and_uuid() {
        let uuid = Uuid::new_v4();
        let dict = base_dict("data_item", uuid);
        assert_eq!(dict.get("type").and_then(Value::as_str), Some("data_item"));
        assert_eq!(
            dict.get("uuid").and_then(Value::as_str),
            Some(uuid.to_string().as_str())
        );
    }
}
