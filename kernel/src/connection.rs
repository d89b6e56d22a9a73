//! Connections between library objects
//!
//! A connection links two items by UUID and, while bound, forwards property
//! changes between them. The only concrete kind the kernel carries is the
//! property connection: source property mirrors into target property and
//! back, with a suppress guard so the echo does not loop.
//!
//! Connections cascade-delete with either endpoint.

use crate::items::{Lifecycle, ProjectItem};
use helio_notify::{Event, EventListener};
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A persisted property connection between a source and a target item.
pub struct Connection {
    uuid: Uuid,
    parent_uuid: RwLock<Option<Uuid>>,
    source_uuid: RwLock<Option<Uuid>>,
    source_property: RwLock<Option<String>>,
    target_uuid: RwLock<Option<Uuid>>,
    target_property: RwLock<Option<String>>,
    listeners: Mutex<Vec<EventListener>>,
    suppress: AtomicBool,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
    pub(crate) lifecycle: Lifecycle,
}

impl Connection {
    pub fn new(
        source: &ProjectItem,
        source_property: &str,
        target: &ProjectItem,
        target_property: &str,
    ) -> Arc<Self> {
        let connection = Self::with_uuid(Uuid::new_v4());
        *connection.source_uuid.write() = Some(source.uuid());
        *connection.source_property.write() = Some(source_property.to_string());
        *connection.target_uuid.write() = Some(target.uuid());
        *connection.target_property.write() = Some(target_property.to_string());
        connection
    }

    pub fn with_uuid(uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            parent_uuid: RwLock::new(None),
            source_uuid: RwLock::new(None),
            source_property: RwLock::new(None),
            target_uuid: RwLock::new(None),
            target_property: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            suppress: AtomicBool::new(false),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn from_dict(source: &JsonValue) -> Arc<Self> {
        let connection =
            Self::with_uuid(dict::get_uuid(source, "uuid").unwrap_or_else(Uuid::new_v4));
        connection.read_from_dict(source);
        connection
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn parent_uuid(&self) -> Option<Uuid> {
        *self.parent_uuid.read()
    }

    pub fn set_parent_uuid(&self, parent_uuid: Option<Uuid>) {
        *self.parent_uuid.write() = parent_uuid;
        self.property_changed_event.fire(&"parent_uuid".to_string());
    }

    pub fn source_uuid(&self) -> Option<Uuid> {
        *self.source_uuid.read()
    }

    pub fn target_uuid(&self) -> Option<Uuid> {
        *self.target_uuid.read()
    }

    /// Every endpoint this connection depends on; removal of any one
    /// cascades to the connection.
    pub fn endpoint_uuids(&self) -> Vec<Uuid> {
        [self.source_uuid(), self.target_uuid(), self.parent_uuid()]
            .into_iter()
            .flatten()
            .collect()
    }

    fn forward(
        from: &ProjectItem,
        from_property: &str,
        to: &ProjectItem,
        to_property: &str,
        suppress: &AtomicBool,
    ) {
        if suppress.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(value) = from.property_value(from_property) {
            to.set_property_value(to_property, value);
        }
        suppress.store(false, Ordering::SeqCst);
    }

    /// Begin forwarding between the resolved endpoints. Copies the source
    /// value across once, then mirrors changes in both directions.
    pub fn bind(self: &Arc<Self>, source: &ProjectItem, target: &ProjectItem) {
        let source_property = self
            .source_property
            .read()
            .clone()
            .expect("connection bound without a source property");
        let target_property = self
            .target_property
            .read()
            .clone()
            .expect("connection bound without a target property");
        let mut listeners = self.listeners.lock();
        assert!(listeners.is_empty(), "connection bound twice");

        Self::forward(
            source,
            &source_property,
            target,
            &target_property,
            &self.suppress,
        );

        if let Some(source_changed) = property_changed_event(source) {
            let weak = Arc::downgrade(self);
            let from = source.clone();
            let to = target.clone();
            let from_property = source_property.clone();
            let to_property = target_property.clone();
            listeners.push(source_changed.listen(move |name| {
                if *name == from_property {
                    if let Some(connection) = weak.upgrade() {
                        Self::forward(&from, &from_property, &to, &to_property, &connection.suppress);
                    }
                }
            }));
        }
        if let Some(target_changed) = property_changed_event(target) {
            let weak = Arc::downgrade(self);
            let from = target.clone();
            let to = source.clone();
            let from_property = target_property;
            let to_property = source_property;
            listeners.push(target_changed.listen(move |name| {
                if *name == from_property {
                    if let Some(connection) = weak.upgrade() {
                        Self::forward(&from, &from_property, &to, &to_property, &connection.suppress);
                    }
                }
            }));
        }
    }

    pub fn is_bound(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    /// Stop forwarding. Safe to call on an unbound connection.
    pub fn unbind(&self) {
        for listener in self.listeners.lock().drain(..) {
            listener.close();
        }
    }

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
        self.lifecycle.mark_removed();
    }
}

fn property_changed_event(item: &ProjectItem) -> Option<&Event<String>> {
    match item {
        ProjectItem::Data(data_item) => Some(&data_item.property_changed_event),
        ProjectItem::Graphic(graphic) => Some(&graphic.property_changed_event),
        ProjectItem::Structure(structure) => Some(&structure.property_changed_event),
        ProjectItem::Display(display_item) => Some(&display_item.property_changed_event),
        ProjectItem::Channel(channel) => Some(&channel.property_changed_event),
        _ => None,
    }
}

impl PersistentObject for Connection {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "connection"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        for (key, uuid) in [
            ("parent_uuid", self.parent_uuid()),
            ("source_uuid", self.source_uuid()),
            ("target_uuid", self.target_uuid()),
        ] {
            if let Some(uuid) = uuid {
                dict.insert(key.to_string(), JsonValue::String(uuid.to_string()));
            }
        }
        if let Some(property) = self.source_property.read().clone() {
            dict.insert("source_property".to_string(), JsonValue::String(property));
        }
        if let Some(property) = self.target_property.read().clone() {
            dict.insert("target_property".to_string(), JsonValue::String(property));
        }
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        *self.parent_uuid.write() = dict::get_uuid(source, "parent_uuid");
        *self.source_uuid.write() = dict::get_uuid(source, "source_uuid");
        *self.target_uuid.write() = dict::get_uuid(source, "target_uuid");
        if let Some(property) = dict::get_string(source, "source_property") {
            *self.source_property.write() = Some(property);
        }
        if let Some(property) = dict::get_string(source, "target_property") {
            *self.target_property.write() = Some(property);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::Graphic;
    use serde_json::json;

    fn bound_pair() -> (Arc<Graphic>, Arc<Graphic>, Arc<Connection>) {
        let source = Graphic::new("interval-graphic");
        let target = Graphic::new("interval-graphic");
        source.set_property("start", json!(0.1));
        let connection = Connection::new(
            &ProjectItem::Graphic(source.clone()),
            "start",
            &ProjectItem::Graphic(target.clone()),
            "start",
        );
        connection.bind(
            &ProjectItem::Graphic(source.clone()),
            &ProjectItem::Graphic(target.clone()),
        );
        (source, target, connection)
    }

    #[test]
    fn bind_copies_initial_value() {
        let (_source, target, connection) = bound_pair();
        assert_eq!(target.property("start"), Some(json!(0.1)));
        connection.unbind();
    }

    #[test]
    fn forwards_source_changes_to_target() {
        let (source, target, connection) = bound_pair();
        source.set_property("start", json!(0.4));
        assert_eq!(target.property("start"), Some(json!(0.4)));
        connection.unbind();
    }

    #[test]
    fn forwards_target_changes_back_to_source() {
        let (source, target, connection) = bound_pair();
        target.set_property("start", json!(0.7));
        assert_eq!(source.property("start"), Some(json!(0.7)));
        connection.unbind();
    }

    #[test]
    fn unbind_stops_forwarding() {
        let (source, target, connection) = bound_pair();
        connection.unbind();
        source.set_property("start", json!(0.9));
        assert_eq!(target.property("start"), Some(json!(0.1)));
    }

    #[test]
    fn dict_round_trip_preserves_endpoints() {
        let (source, target, connection) = bound_pair();
        connection.unbind();
        let copy = Connection::from_dict(&connection.write_to_dict());
        assert_eq!(copy.uuid(), connection.uuid());
        assert_eq!(copy.source_uuid(), Some(source.uuid()));
        assert_eq!(copy.target_uuid(), Some(target.uuid()));
        assert_eq!(
            copy.endpoint_uuids(),
            vec![source.uuid(), target.uuid()]
        );
    }
}
