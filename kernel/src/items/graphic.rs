//! Graphic: a region annotation owned by a display item.

use helio_notify::Event;
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::RwLock;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

/// A named region (rectangle, interval, point) used to qualify a data
/// reference, e.g. the crop region of a `cropped_xdata` binding. Geometry is
/// an open property set; the kernel only cares about identity and change.
pub struct Graphic {
    uuid: Uuid,
    graphic_type: String,
    properties: RwLock<Map<String, JsonValue>>,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
}

impl Graphic {
    pub fn new(graphic_type: &str) -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4(), graphic_type)
    }

    pub fn with_uuid(uuid: Uuid, graphic_type: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            graphic_type: graphic_type.to_string(),
            properties: RwLock::new(Map::new()),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn graphic_type(&self) -> &str {
        &self.graphic_type
    }

    pub fn property(&self, name: &str) -> Option<JsonValue> {
        self.properties.read().get(name).cloned()
    }

    pub fn set_property(&self, name: &str, value: JsonValue) {
        self.properties.write().insert(name.to_string(), value);
        self.property_changed_event.fire(&name.to_string());
    }

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
    }
}

impl PersistentObject for Graphic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "graphic"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        dict.insert(
            "graphic_type".to_string(),
            JsonValue::String(self.graphic_type.clone()),
        );
        dict.insert(
            "properties".to_string(),
            JsonValue::Object(self.properties.read().clone()),
        );
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        if let Some(properties) = dict::get_object(source, "properties") {
            *self.properties.write() = properties.clone();
        }
    }
}

/// Rebuild a graphic from its persisted dict.
pub(crate) fn graphic_from_dict(source: &JsonValue) -> Option<Arc<Graphic>> {
    let uuid = dict::get_uuid(source, "uuid")?;
    let graphic_type = dict::get_str(source, "graphic_type").unwrap_or("rect-graphic");
    let graphic = Graphic::with_uuid(uuid, graphic_type);
    graphic.read_from_dict(source);
    Some(graphic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_set_fires_named_change() {
        let graphic = Graphic::new("rect-graphic");
        let seen: Arc<parking_lot::Mutex<Vec<String>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _listener = graphic.property_changed_event.listen(move |name| {
            seen_clone.lock().push(name.clone());
        });
        graphic.set_property("bounds", json!([0.25, 0.25, 0.5, 0.5]));
        assert_eq!(seen.lock().as_slice(), ["bounds"]);
    }

    #[test]
    fn dict_round_trip_keeps_type_and_properties() {
        let graphic = Graphic::new("interval-graphic");
        graphic.set_property("start", json!(0.2));
        let dict = graphic.write_to_dict();
        let copy = graphic_from_dict(&dict).unwrap();
        assert_eq!(copy.uuid(), graphic.uuid());
        assert_eq!(copy.graphic_type(), "interval-graphic");
        assert_eq!(copy.property("start"), Some(json!(0.2)));
    }
}
