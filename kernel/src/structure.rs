//! Data structures: generic referenced property bags
//!
//! A data structure holds arbitrary named properties. Each property value is
//! a tagged union decided at write time (a scalar, a single reference
//! specifier, or a reference list), never inferred by inspecting shapes at
//! read time. Reference-valued properties carry a reference proxy: a minimal
//! current-value lookup (no change or rebind notifications) maintained by
//! the owning project.

use crate::items::{object_specifier, Lifecycle, ProjectItem};
use crate::specifier::Specifier;
use helio_notify::Event;
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A property value, tagged at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(JsonValue),
    Reference(Specifier),
    ReferenceList(Vec<Specifier>),
}

impl PropertyValue {
    fn write_to_json(&self) -> JsonValue {
        match self {
            PropertyValue::Scalar(value) => value.clone(),
            PropertyValue::Reference(specifier) => specifier.to_dict(),
            PropertyValue::ReferenceList(specifiers) => {
                JsonValue::Array(specifiers.iter().map(Specifier::to_dict).collect())
            }
        }
    }

    // The persisted form is untagged; specifier-shaped dicts are recognized
    // only at this read boundary.
    fn read_from_json(raw: &JsonValue) -> PropertyValue {
        if let Some(specifier) = Specifier::from_dict(raw) {
            return PropertyValue::Reference(specifier);
        }
        if let Some(entries) = raw.as_array() {
            let specifiers: Vec<Specifier> =
                entries.iter().filter_map(Specifier::from_dict).collect();
            if !entries.is_empty() && specifiers.len() == entries.len() {
                return PropertyValue::ReferenceList(specifiers);
            }
        }
        PropertyValue::Scalar(raw.clone())
    }

    pub fn reference_uuids(&self) -> Vec<Uuid> {
        match self {
            PropertyValue::Scalar(_) => Vec::new(),
            PropertyValue::Reference(specifier) => specifier.uuid.into_iter().collect(),
            PropertyValue::ReferenceList(specifiers) => specifiers
                .iter()
                .filter_map(|specifier| specifier.uuid)
                .collect(),
        }
    }
}

/// A passive bag of named properties, a subset of which reference other
/// project items. No evaluation loop; computations and the UI consult it.
pub struct DataStructure {
    uuid: Uuid,
    structure_type: RwLock<String>,
    source_uuid: RwLock<Option<Uuid>>,
    properties: RwLock<IndexMap<String, PropertyValue>>,
    proxies: Mutex<HashMap<String, ProjectItem>>,
    pub data_structure_changed_event: Event<String>,
    pub referenced_objects_changed_event: Event<()>,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
    pub(crate) lifecycle: Lifecycle,
}

impl DataStructure {
    pub fn new(structure_type: &str) -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4(), structure_type)
    }

    pub fn with_uuid(uuid: Uuid, structure_type: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            structure_type: RwLock::new(structure_type.to_string()),
            source_uuid: RwLock::new(None),
            properties: RwLock::new(IndexMap::new()),
            proxies: Mutex::new(HashMap::new()),
            data_structure_changed_event: Event::new(),
            referenced_objects_changed_event: Event::new(),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn structure_type(&self) -> String {
        self.structure_type.read().clone()
    }

    pub fn source_uuid(&self) -> Option<Uuid> {
        *self.source_uuid.read()
    }

    pub fn set_source_uuid(&self, source_uuid: Option<Uuid>) {
        *self.source_uuid.write() = source_uuid;
        self.property_changed_event.fire(&"source_uuid".to_string());
    }

    fn notify_property(&self, name: &str) {
        self.data_structure_changed_event.fire(&name.to_string());
        self.property_changed_event.fire(&name.to_string());
    }

    /// Set a scalar property, replacing any reference previously stored
    /// under the same name (and dropping its proxy).
    pub fn set_property_value(&self, name: &str, value: JsonValue) {
        self.properties
            .write()
            .insert(name.to_string(), PropertyValue::Scalar(value));
        self.proxies.lock().remove(name);
        self.notify_property(name);
    }

    /// Point a property at another project item.
    pub fn set_referenced_object(&self, name: &str, item: &ProjectItem) {
        if let Some(current) = self.get_referenced_object(name) {
            if current.uuid() == item.uuid() {
                return;
            }
        }
        let specifier =
            object_specifier(item, None).expect("item kind has no specifier form");
        self.properties
            .write()
            .insert(name.to_string(), PropertyValue::Reference(specifier));
        self.proxies.lock().insert(name.to_string(), item.clone());
        self.notify_property(name);
        self.referenced_objects_changed_event.fire(&());
    }

    /// Point a property at a list of project items.
    pub fn set_referenced_objects(&self, name: &str, items: &[ProjectItem]) {
        let specifiers: Vec<Specifier> = items
            .iter()
            .map(|item| object_specifier(item, None).expect("item kind has no specifier form"))
            .collect();
        self.properties
            .write()
            .insert(name.to_string(), PropertyValue::ReferenceList(specifiers));
        self.proxies.lock().remove(name);
        self.notify_property(name);
        self.referenced_objects_changed_event.fire(&());
    }

    /// Remove a property and its proxy, if any.
    pub fn remove_property_value(&self, name: &str) {
        if self.properties.write().shift_remove(name).is_some() {
            self.proxies.lock().remove(name);
            self.notify_property(name);
        }
    }

    pub fn remove_referenced_object(&self, name: &str) {
        self.remove_property_value(name);
    }

    pub fn get_property_value(&self, name: &str) -> Option<PropertyValue> {
        self.properties.read().get(name).cloned()
    }

    /// Scalar view of a property, for property-qualified bindings.
    pub fn scalar_property_value(&self, name: &str) -> Option<JsonValue> {
        match self.properties.read().get(name)? {
            PropertyValue::Scalar(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Current item a reference property points at, through its proxy.
    pub fn get_referenced_object(&self, name: &str) -> Option<ProjectItem> {
        self.proxies.lock().get(name).cloned()
    }

    pub fn referenced_objects(&self) -> Vec<ProjectItem> {
        self.proxies.lock().values().cloned().collect()
    }

    /// UUIDs named by reference-valued properties, live or dangling.
    pub fn referenced_uuids(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .properties
            .read()
            .values()
            .flat_map(PropertyValue::reference_uuids)
            .collect();
        uuids.extend(self.source_uuid());
        uuids
    }

    /// Reference properties that name `uuid` but have no live proxy yet.
    pub(crate) fn dangling_reference_properties(&self, uuid: Uuid) -> Vec<String> {
        let proxies = self.proxies.lock();
        self.properties
            .read()
            .iter()
            .filter(|(name, value)| {
                !proxies.contains_key(*name)
                    && matches!(value, PropertyValue::Reference(specifier) if specifier.uuid == Some(uuid))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fill or clear the proxy for a reference property; called by the
    /// project as targets appear and disappear.
    pub(crate) fn set_reference_proxy_item(&self, name: &str, item: Option<ProjectItem>) {
        match item {
            Some(item) => {
                self.proxies.lock().insert(name.to_string(), item);
            }
            None => {
                self.proxies.lock().remove(name);
            }
        }
    }

    /// Drop any proxies pointing at `uuid`; the stored specifiers stay so the
    /// reference can re-resolve if the target returns.
    pub(crate) fn clear_proxies_for(&self, uuid: Uuid) {
        self.proxies.lock().retain(|_, item| item.uuid() != uuid);
    }

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
        self.lifecycle.mark_removed();
    }
}

impl PersistentObject for DataStructure {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "data_structure"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        dict.insert(
            "structure_type".to_string(),
            JsonValue::String(self.structure_type()),
        );
        if let Some(source_uuid) = self.source_uuid() {
            dict.insert(
                "source_uuid".to_string(),
                JsonValue::String(source_uuid.to_string()),
            );
        }
        let mut properties = serde_json::Map::new();
        for (name, value) in self.properties.read().iter() {
            properties.insert(name.clone(), value.write_to_json());
        }
        dict.insert("properties".to_string(), JsonValue::Object(properties));
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        if let Some(structure_type) = dict::get_string(source, "structure_type") {
            *self.structure_type.write() = structure_type;
        }
        if let Some(source_uuid) = dict::get_uuid(source, "source_uuid") {
            *self.source_uuid.write() = Some(source_uuid);
        }
        if let Some(raw_properties) = dict::get_object(source, "properties") {
            let mut properties = self.properties.write();
            properties.clear();
            for (name, raw) in raw_properties {
                properties.insert(name.clone(), PropertyValue::read_from_json(raw));
            }
        }
    }
}
