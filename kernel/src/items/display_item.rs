//! Display item and its data channels.

use crate::items::graphic::{graphic_from_dict, Graphic};
use crate::items::Lifecycle;
use helio_notify::Event;
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// The facet of a display item that exposes one data item for display.
/// Referenced by `data_source` and the facet-qualified specifier forms.
pub struct DisplayDataChannel {
    uuid: Uuid,
    data_item_uuid: RwLock<Option<Uuid>>,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
}

impl DisplayDataChannel {
    pub fn new(data_item_uuid: Option<Uuid>) -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4(), data_item_uuid)
    }

    pub fn with_uuid(uuid: Uuid, data_item_uuid: Option<Uuid>) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            data_item_uuid: RwLock::new(data_item_uuid),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn data_item_uuid(&self) -> Option<Uuid> {
        *self.data_item_uuid.read()
    }

    /// Re-point the channel at another data item. Watchers of the old target
    /// must rebind, so this fires `property_changed("data_item_uuid")`.
    pub fn set_data_item_uuid(&self, data_item_uuid: Option<Uuid>) {
        *self.data_item_uuid.write() = data_item_uuid;
        self.property_changed_event
            .fire(&"data_item_uuid".to_string());
    }

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict("display_data_channel", self.uuid);
        if let Some(data_item_uuid) = self.data_item_uuid() {
            dict.insert(
                "data_item_uuid".to_string(),
                JsonValue::String(data_item_uuid.to_string()),
            );
        }
        JsonValue::Object(dict)
    }
}

/// A display of one or more data items, owning the data channels that expose
/// them and the graphics drawn over them.
pub struct DisplayItem {
    uuid: Uuid,
    display_data_channels: RwLock<Vec<Arc<DisplayDataChannel>>>,
    graphics: RwLock<Vec<Arc<Graphic>>>,
    pub graphic_inserted_event: Event<(usize, Arc<Graphic>)>,
    pub graphic_removed_event: Event<(usize, Arc<Graphic>)>,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
    pub(crate) lifecycle: Lifecycle,
}

impl DisplayItem {
    pub fn new() -> Arc<Self> {
        Self::with_uuid(Uuid::new_v4())
    }

    pub fn with_uuid(uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            display_data_channels: RwLock::new(Vec::new()),
            graphics: RwLock::new(Vec::new()),
            graphic_inserted_event: Event::new(),
            graphic_removed_event: Event::new(),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn display_data_channels(&self) -> Vec<Arc<DisplayDataChannel>> {
        self.display_data_channels.read().clone()
    }

    pub fn append_display_data_channel(&self, channel: Arc<DisplayDataChannel>) {
        self.display_data_channels.write().push(channel);
    }

    /// The data items this display derives from.
    pub fn data_item_uuids(&self) -> Vec<Uuid> {
        self.display_data_channels
            .read()
            .iter()
            .filter_map(|channel| channel.data_item_uuid())
            .collect()
    }

    pub fn graphics(&self) -> Vec<Arc<Graphic>> {
        self.graphics.read().clone()
    }

    pub fn add_graphic(&self, graphic: Arc<Graphic>) {
        let index = self.graphics.read().len();
        self.insert_graphic(index, graphic);
    }

    pub fn insert_graphic(&self, index: usize, graphic: Arc<Graphic>) {
        self.graphics.write().insert(index, graphic.clone());
        self.graphic_inserted_event.fire(&(index, graphic));
    }

    /// Remove a graphic. The graphic is detached before its watchers are
    /// notified, so a rebind triggered by the notification resolves to
    /// nothing rather than to the dying graphic.
    pub fn remove_graphic(&self, index: usize) -> Arc<Graphic> {
        let graphic = self.graphics.write().remove(index);
        graphic.about_to_be_removed();
        self.graphic_removed_event.fire(&(index, graphic.clone()));
        graphic
    }

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
        for channel in self.display_data_channels.read().iter() {
            channel.about_to_be_removed();
        }
        for graphic in self.graphics.read().iter() {
            graphic.about_to_be_removed();
        }
        self.lifecycle.mark_removed();
    }
}

impl PersistentObject for DisplayItem {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "display_item"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        let channels: Vec<JsonValue> = self
            .display_data_channels
            .read()
            .iter()
            .map(|channel| channel.write_to_dict())
            .collect();
        dict.insert(
            "display_data_channels".to_string(),
            JsonValue::Array(channels),
        );
        let graphics: Vec<JsonValue> = self
            .graphics
            .read()
            .iter()
            .map(|graphic| graphic.write_to_dict())
            .collect();
        dict.insert("graphics".to_string(), JsonValue::Array(graphics));
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        if let Some(entries) = dict::get_array(source, "display_data_channels") {
            let mut channels = self.display_data_channels.write();
            channels.clear();
            for entry in entries {
                if let Some(uuid) = dict::get_uuid(entry, "uuid") {
                    channels.push(DisplayDataChannel::with_uuid(
                        uuid,
                        dict::get_uuid(entry, "data_item_uuid"),
                    ));
                }
            }
        }
        if let Some(entries) = dict::get_array(source, "graphics") {
            let mut graphics = self.graphics.write();
            graphics.clear();
            for entry in entries {
                if let Some(graphic) = graphic_from_dict(entry) {
                    graphics.push(graphic);
                }
            }
        }
    }
}
