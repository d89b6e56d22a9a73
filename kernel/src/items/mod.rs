//! Model items
//!
//! Minimal persisted items the graph resolves against: data items, display
//! items with their data channels and graphics. These carry only what the
//! reference graph needs (UUID identity, change events, provenance); actual
//! data payloads and rendering live outside the kernel.

pub mod data_item;
pub mod display_item;
pub mod graphic;

pub use data_item::DataItem;
pub use display_item::{DisplayDataChannel, DisplayItem};
pub use graphic::Graphic;

use crate::computation::Computation;
use crate::connection::Connection;
use crate::specifier::{Specifier, SpecifierType};
use crate::structure::DataStructure;
use crate::values::Value;
use helio_notify::Event;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// Container lifecycle flags shared by every model item.
///
/// Transitions are programmer contracts: inserting an item that already has a
/// container, removing a detached item, or closing twice panics.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

#[derive(Debug, Default)]
struct LifecycleState {
    inserted: bool,
    closed: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_inserted(&self) {
        let mut state = self.state.lock();
        assert!(!state.closed, "item used after close");
        assert!(!state.inserted, "item already belongs to a container");
        state.inserted = true;
    }

    pub fn mark_removed(&self) {
        let mut state = self.state.lock();
        assert!(state.inserted, "item removed without a container");
        state.inserted = false;
    }

    pub fn mark_closed(&self) {
        let mut state = self.state.lock();
        assert!(!state.closed, "item closed twice");
        state.closed = true;
    }

    pub fn is_inserted(&self) -> bool {
        self.state.lock().inserted
    }
}

/// A live reference to any item the project can own or resolve.
#[derive(Clone)]
pub enum ProjectItem {
    Data(Arc<DataItem>),
    Display(Arc<DisplayItem>),
    Channel(Arc<DisplayDataChannel>),
    Graphic(Arc<Graphic>),
    Structure(Arc<DataStructure>),
    Computation(Arc<Computation>),
    Connection(Arc<Connection>),
}

impl ProjectItem {
    pub fn uuid(&self) -> Uuid {
        match self {
            ProjectItem::Data(item) => item.uuid(),
            ProjectItem::Display(item) => item.uuid(),
            ProjectItem::Channel(item) => item.uuid(),
            ProjectItem::Graphic(item) => item.uuid(),
            ProjectItem::Structure(item) => item.uuid(),
            ProjectItem::Computation(item) => item.uuid(),
            ProjectItem::Connection(item) => item.uuid(),
        }
    }

    pub fn item_type(&self) -> &'static str {
        match self {
            ProjectItem::Data(_) => "data_item",
            ProjectItem::Display(_) => "display_item",
            ProjectItem::Channel(_) => "display_data_channel",
            ProjectItem::Graphic(_) => "graphic",
            ProjectItem::Structure(_) => "data_structure",
            ProjectItem::Computation(_) => "computation",
            ProjectItem::Connection(_) => "connection",
        }
    }

    pub fn about_to_be_removed_event(&self) -> &Event<()> {
        match self {
            ProjectItem::Data(item) => &item.about_to_be_removed_event,
            ProjectItem::Display(item) => &item.about_to_be_removed_event,
            ProjectItem::Channel(item) => &item.about_to_be_removed_event,
            ProjectItem::Graphic(item) => &item.about_to_be_removed_event,
            ProjectItem::Structure(item) => &item.about_to_be_removed_event,
            ProjectItem::Computation(item) => &item.about_to_be_removed_event,
            ProjectItem::Connection(item) => &item.about_to_be_removed_event,
        }
    }

    /// Read a named property, for property-qualified bindings and
    /// connections. Items without generic properties read as `None`.
    pub fn property_value(&self, name: &str) -> Option<JsonValue> {
        match self {
            ProjectItem::Data(item) => match name {
                "title" => item.title().map(JsonValue::String),
                "data" => item.data().map(|value| value.to_json()),
                _ => None,
            },
            ProjectItem::Graphic(item) => item.property(name),
            ProjectItem::Structure(item) => item.scalar_property_value(name),
            _ => None,
        }
    }

    /// Write a named property where the item supports it; used by property
    /// connections.
    pub fn set_property_value(&self, name: &str, value: JsonValue) {
        match self {
            ProjectItem::Data(item) => match name {
                "title" => item.set_title(value.as_str()),
                "data" => item.set_data(Value::from_json_lossy(&value)),
                _ => {}
            },
            ProjectItem::Graphic(item) => item.set_property(name, value),
            ProjectItem::Structure(item) => item.set_property_value(name, value),
            _ => {}
        }
    }
}

impl std::fmt::Debug for ProjectItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectItem")
            .field("type", &self.item_type())
            .field("uuid", &self.uuid())
            .finish()
    }
}

impl PartialEq for ProjectItem {
    fn eq(&self, other: &Self) -> bool {
        self.uuid() == other.uuid()
    }
}

/// Build the persisted specifier for an item, optionally overriding the type
/// tag (used for the facet-qualified data-source forms).
pub fn object_specifier(
    item: &ProjectItem,
    specifier_type: Option<SpecifierType>,
) -> Option<Specifier> {
    match item {
        ProjectItem::Data(data_item) => Some(Specifier::new(
            specifier_type.unwrap_or(SpecifierType::DataItem),
            data_item.uuid(),
        )),
        ProjectItem::Channel(channel) => {
            let tag = match specifier_type {
                Some(tag) if tag.is_data_source_facet() => tag,
                _ => SpecifierType::DataSource,
            };
            Some(Specifier::new(tag, channel.uuid()))
        }
        ProjectItem::Graphic(graphic) => {
            Some(Specifier::new(SpecifierType::Graphic, graphic.uuid()))
        }
        ProjectItem::Structure(structure) => {
            Some(Specifier::new(SpecifierType::Structure, structure.uuid()))
        }
        ProjectItem::Display(display_item) => Some(Specifier::new(
            SpecifierType::DisplayItem,
            display_item.uuid(),
        )),
        ProjectItem::Computation(_) | ProjectItem::Connection(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_tracks_insert_and_remove() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_inserted());
        lifecycle.mark_inserted();
        assert!(lifecycle.is_inserted());
        lifecycle.mark_removed();
        assert!(!lifecycle.is_inserted());
        lifecycle.mark_inserted();
        lifecycle.mark_removed();
        lifecycle.mark_closed();
    }

    #[test]
    #[should_panic(expected = "already belongs")]
    fn double_insert_panics() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_inserted();
        lifecycle.mark_inserted();
    }

    #[test]
    #[should_panic(expected = "closed twice")]
    fn double_close_panics() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_closed();
        lifecycle.mark_closed();
    }

    #[test]
    fn object_specifier_uses_item_tags() {
        let data_item = DataItem::new();
        let item = ProjectItem::Data(data_item.clone());
        let specifier = object_specifier(&item, None).unwrap();
        assert_eq!(specifier.specifier_type, SpecifierType::DataItem);
        assert_eq!(specifier.uuid, Some(data_item.uuid()));
    }

    #[test]
    fn channel_specifier_honors_facet_override() {
        let channel = DisplayDataChannel::new(None);
        let item = ProjectItem::Channel(channel.clone());
        let plain = object_specifier(&item, None).unwrap();
        assert_eq!(plain.specifier_type, SpecifierType::DataSource);
        let facet = object_specifier(&item, Some(SpecifierType::CroppedXdata)).unwrap();
        assert_eq!(facet.specifier_type, SpecifierType::CroppedXdata);
        assert_eq!(facet.uuid, Some(channel.uuid()));
    }
}
