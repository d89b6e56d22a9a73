//! Data item: the leaf entity computations consume.

use crate::items::Lifecycle;
use crate::values::{Value, ValueKind};
use helio_notify::Event;
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// A unit of acquired or derived data. The kernel tracks identity, a scalar
/// payload stand-in, and provenance; bulk data lives outside the model.
pub struct DataItem {
    uuid: Uuid,
    title: RwLock<Option<String>>,
    source_uuid: RwLock<Option<Uuid>>,
    data: RwLock<Option<Value>>,
    pub data_changed_event: Event<()>,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
    pub(crate) lifecycle: Lifecycle,
}

impl DataItem {
    pub fn new() -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4())
    }

    pub fn with_uuid(uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            title: RwLock::new(None),
            source_uuid: RwLock::new(None),
            data: RwLock::new(None),
            data_changed_event: Event::new(),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn title(&self) -> Option<String> {
        self.title.read().clone()
    }

    pub fn set_title(&self, title: Option<&str>) {
        *self.title.write() = title.map(str::to_string);
        self.property_changed_event.fire(&"title".to_string());
    }

    pub fn source_uuid(&self) -> Option<Uuid> {
        *self.source_uuid.read()
    }

    pub fn set_source_uuid(&self, source_uuid: Option<Uuid>) {
        *self.source_uuid.write() = source_uuid;
        self.property_changed_event.fire(&"source_uuid".to_string());
    }

    pub fn data(&self) -> Option<Value> {
        self.data.read().clone()
    }

    /// Replace the data payload. Fires `data_changed`, which reaches any
    /// bound item watching this data item.
    pub fn set_data(&self, data: Option<Value>) {
        *self.data.write() = data;
        self.data_changed_event.fire(&());
    }

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
        self.lifecycle.mark_removed();
    }

    pub(crate) fn close(&self) {
        self.lifecycle.mark_closed();
    }
}

impl PersistentObject for DataItem {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "data_item"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        if let Some(title) = self.title() {
            dict.insert("title".to_string(), JsonValue::String(title));
        }
        if let Some(source_uuid) = self.source_uuid() {
            dict.insert(
                "source_uuid".to_string(),
                JsonValue::String(source_uuid.to_string()),
            );
        }
        if let Some(data) = self.data() {
            dict.insert(
                "data_kind".to_string(),
                JsonValue::String(data.kind().as_str().to_string()),
            );
            dict.insert("data".to_string(), data.to_json());
        }
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        if let Some(title) = dict::get_string(source, "title") {
            *self.title.write() = Some(title);
        }
        if let Some(source_uuid) = dict::get_uuid(source, "source_uuid") {
            *self.source_uuid.write() = Some(source_uuid);
        }
        let kind = dict::get_str(source, "data_kind").and_then(ValueKind::from_str);
        if let (Some(kind), Some(raw)) = (kind, source.get("data")) {
            *self.data.write() = Value::from_json(kind, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_round_trip_preserves_fields() {
        let item = DataItem::new();
        item.set_title(Some("spectrum"));
        item.set_data(Some(Value::Real(2.5)));
        let dict = item.write_to_dict();

        let copy = DataItem::with_uuid(item.uuid());
        copy.read_from_dict(&dict);
        assert_eq!(copy.title().as_deref(), Some("spectrum"));
        assert_eq!(copy.data(), Some(Value::Real(2.5)));
    }

    #[test]
    fn set_data_fires_data_changed() {
        let item = DataItem::new();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let _listener = item.data_changed_event.listen(move |_| {
            fired_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        item.set_data(Some(Value::Integral(5)));
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_notifies_before_detaching() {
        let item = DataItem::new();
        item.lifecycle.mark_inserted();
        let notified = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let notified_clone = notified.clone();
        let _listener = item.about_to_be_removed_event.listen(move |_| {
            notified_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        item.about_to_be_removed();
        assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!item.lifecycle.is_inserted());
    }
}
