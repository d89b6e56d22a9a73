//! Live resolved references
//!
//! A [`BoundItem`] is what a specifier becomes once resolved: a handle with a
//! current value and two distinct notifications. `changed` means the target's
//! observable content changed (re-evaluate); `needs_rebind` means the
//! identity the specifier points at is no longer valid (unbind, then resolve
//! again). Consumers must treat the two differently.
//!
//! Every bound item is exclusively owned by the variable, output, or proxy
//! that created it, and is closed exactly once before being discarded.

use crate::items::{DataItem, DisplayDataChannel, Graphic, ProjectItem};
use crate::specifier::SpecifierType;
use crate::values::Value;
use helio_notify::{Event, EventListener};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// The facet of a display data channel a binding exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetKind {
    Data,
    DisplayData,
    CroppedData,
    CroppedDisplayData,
    FilterData,
    FilteredData,
}

impl FacetKind {
    /// Facet selected by a specifier type tag, or by the `property` qualifier
    /// of a plain `data_source` specifier.
    pub fn from_specifier(
        specifier_type: SpecifierType,
        property: Option<&str>,
    ) -> Option<FacetKind> {
        match specifier_type {
            SpecifierType::Xdata => Some(FacetKind::Data),
            SpecifierType::DisplayXdata => Some(FacetKind::DisplayData),
            SpecifierType::CroppedXdata => Some(FacetKind::CroppedData),
            SpecifierType::CroppedDisplayXdata => Some(FacetKind::CroppedDisplayData),
            SpecifierType::FilterXdata => Some(FacetKind::FilterData),
            SpecifierType::FilteredXdata => Some(FacetKind::FilteredData),
            SpecifierType::DataSource => match property {
                Some("display_data") => Some(FacetKind::DisplayData),
                _ => Some(FacetKind::Data),
            },
            _ => None,
        }
    }

    pub fn is_cropped(self) -> bool {
        matches!(self, FacetKind::CroppedData | FacetKind::CroppedDisplayData)
    }
}

/// A resolved data-channel facet: the channel, its backing data item, and the
/// crop graphic for the cropped forms.
#[derive(Clone)]
pub struct DataFacet {
    pub channel: Arc<DisplayDataChannel>,
    pub data_item: Arc<DataItem>,
    pub kind: FacetKind,
    pub graphic: Option<Arc<Graphic>>,
}

/// Current value of a bound item.
#[derive(Clone)]
pub enum BoundValue {
    Scalar(Value),
    Item(ProjectItem),
    Facet(DataFacet),
    List(Vec<BoundValue>),
}

impl BoundValue {
    /// The data item underlying this value, when there is exactly one.
    pub fn data_item(&self) -> Option<Arc<DataItem>> {
        match self {
            BoundValue::Item(ProjectItem::Data(item)) => Some(item.clone()),
            BoundValue::Facet(facet) => Some(facet.data_item.clone()),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            BoundValue::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

/// Capability contract every resolvable target satisfies.
pub trait BoundItem: Send + Sync {
    /// Current value, or `None` when the binding has lost its target.
    fn value(&self) -> Option<BoundValue>;

    /// Fired when the target's observable content changes.
    fn changed_event(&self) -> &Event<()>;

    /// Fired when the target identity becomes invalid or ambiguous.
    fn needs_rebind_event(&self) -> &Event<()>;

    /// Concrete entity UUIDs this binding depends on, for the project's
    /// dependency tracker.
    fn base_objects(&self) -> Vec<Uuid> {
        Vec::new()
    }

    /// Release subscriptions. Called exactly once; a second close is a
    /// programmer error.
    fn close(&self);
}

/// Listener set owned by a bound item, enforcing the once-only close.
struct BoundListeners {
    listeners: Mutex<Option<Vec<EventListener>>>,
}

impl BoundListeners {
    fn new(listeners: Vec<EventListener>) -> Self {
        Self {
            listeners: Mutex::new(Some(listeners)),
        }
    }

    fn close(&self) {
        let listeners = self.listeners.lock().take();
        assert!(listeners.is_some(), "bound item closed twice");
        for listener in listeners.into_iter().flatten() {
            listener.close();
        }
    }
}

/// Direct binding to a project item.
pub struct BoundObject {
    item: ProjectItem,
    changed_event: Event<()>,
    needs_rebind_event: Event<()>,
    listeners: BoundListeners,
}

impl BoundObject {
    pub fn new(item: ProjectItem) -> Self {
        let changed_event: Event<()> = Event::new();
        let needs_rebind_event: Event<()> = Event::new();
        let mut listeners = Vec::new();

        let changed = changed_event.clone();
        match &item {
            ProjectItem::Data(data_item) => {
                listeners.push(
                    data_item
                        .data_changed_event
                        .listen(move |_| changed.fire(&())),
                );
            }
            ProjectItem::Display(display_item) => {
                listeners.push(
                    display_item
                        .property_changed_event
                        .listen(move |_| changed.fire(&())),
                );
            }
            ProjectItem::Channel(channel) => {
                // re-pointing the channel replaces the facet identity
                let needs_rebind = needs_rebind_event.clone();
                listeners.push(
                    channel
                        .property_changed_event
                        .listen(move |_| needs_rebind.fire(&())),
                );
            }
            ProjectItem::Graphic(graphic) => {
                listeners.push(
                    graphic
                        .property_changed_event
                        .listen(move |_| changed.fire(&())),
                );
            }
            ProjectItem::Structure(structure) => {
                listeners.push(
                    structure
                        .data_structure_changed_event
                        .listen(move |_| changed.fire(&())),
                );
            }
            ProjectItem::Computation(computation) => {
                listeners.push(
                    computation
                        .computation_mutated_event
                        .listen(move |_| changed.fire(&())),
                );
            }
            ProjectItem::Connection(_) => {}
        }

        let needs_rebind = needs_rebind_event.clone();
        listeners.push(
            item.about_to_be_removed_event()
                .listen(move |_| needs_rebind.fire(&())),
        );

        Self {
            item,
            changed_event,
            needs_rebind_event,
            listeners: BoundListeners::new(listeners),
        }
    }
}

impl BoundItem for BoundObject {
    fn value(&self) -> Option<BoundValue> {
        Some(BoundValue::Item(self.item.clone()))
    }

    fn changed_event(&self) -> &Event<()> {
        &self.changed_event
    }

    fn needs_rebind_event(&self) -> &Event<()> {
        &self.needs_rebind_event
    }

    fn base_objects(&self) -> Vec<Uuid> {
        vec![self.item.uuid()]
    }

    fn close(&self) {
        self.listeners.close();
    }
}

/// Binding to one named property of an item.
pub struct BoundProperty {
    item: ProjectItem,
    property: String,
    changed_event: Event<()>,
    needs_rebind_event: Event<()>,
    listeners: BoundListeners,
}

impl BoundProperty {
    pub fn new(item: ProjectItem, property: &str) -> Self {
        let changed_event: Event<()> = Event::new();
        let needs_rebind_event: Event<()> = Event::new();
        let mut listeners = Vec::new();
        let property_name = property.to_string();

        let changed = changed_event.clone();
        match &item {
            ProjectItem::Structure(structure) => {
                listeners.push(structure.data_structure_changed_event.listen(move |name| {
                    if *name == property_name {
                        changed.fire(&());
                    }
                }));
            }
            ProjectItem::Graphic(graphic) => {
                listeners.push(graphic.property_changed_event.listen(move |name| {
                    if *name == property_name {
                        changed.fire(&());
                    }
                }));
            }
            ProjectItem::Data(data_item) => {
                if property == "data" {
                    listeners.push(
                        data_item
                            .data_changed_event
                            .listen(move |_| changed.fire(&())),
                    );
                } else {
                    listeners.push(data_item.property_changed_event.listen(move |name| {
                        if *name == property_name {
                            changed.fire(&());
                        }
                    }));
                }
            }
            _ => {}
        }

        let needs_rebind = needs_rebind_event.clone();
        listeners.push(
            item.about_to_be_removed_event()
                .listen(move |_| needs_rebind.fire(&())),
        );

        Self {
            item,
            property: property.to_string(),
            changed_event,
            needs_rebind_event,
            listeners: BoundListeners::new(listeners),
        }
    }
}

impl BoundItem for BoundProperty {
    fn value(&self) -> Option<BoundValue> {
        let raw = self.item.property_value(&self.property)?;
        Value::from_json_lossy(&raw).map(BoundValue::Scalar)
    }

    fn changed_event(&self) -> &Event<()> {
        &self.changed_event
    }

    fn needs_rebind_event(&self) -> &Event<()> {
        &self.needs_rebind_event
    }

    fn base_objects(&self) -> Vec<Uuid> {
        vec![self.item.uuid()]
    }

    fn close(&self) {
        self.listeners.close();
    }
}

/// Binding to a display data channel facet, optionally qualified by a crop
/// graphic.
pub struct BoundDataSource {
    facet: DataFacet,
    changed_event: Event<()>,
    needs_rebind_event: Event<()>,
    listeners: BoundListeners,
}

impl BoundDataSource {
    pub fn new(
        channel: Arc<DisplayDataChannel>,
        data_item: Arc<DataItem>,
        kind: FacetKind,
        graphic: Option<Arc<Graphic>>,
    ) -> Self {
        let changed_event: Event<()> = Event::new();
        let needs_rebind_event: Event<()> = Event::new();
        let mut listeners = Vec::new();

        let changed = changed_event.clone();
        listeners.push(
            data_item
                .data_changed_event
                .listen(move |_| changed.fire(&())),
        );
        let needs_rebind = needs_rebind_event.clone();
        listeners.push(
            data_item
                .about_to_be_removed_event
                .listen(move |_| needs_rebind.fire(&())),
        );
        let needs_rebind = needs_rebind_event.clone();
        listeners.push(
            channel
                .about_to_be_removed_event
                .listen(move |_| needs_rebind.fire(&())),
        );
        let needs_rebind = needs_rebind_event.clone();
        listeners.push(
            channel
                .property_changed_event
                .listen(move |_| needs_rebind.fire(&())),
        );
        if let Some(graphic) = &graphic {
            let changed = changed_event.clone();
            listeners.push(
                graphic
                    .property_changed_event
                    .listen(move |_| changed.fire(&())),
            );
            let needs_rebind = needs_rebind_event.clone();
            listeners.push(
                graphic
                    .about_to_be_removed_event
                    .listen(move |_| needs_rebind.fire(&())),
            );
        }

        Self {
            facet: DataFacet {
                channel,
                data_item,
                kind,
                graphic,
            },
            changed_event,
            needs_rebind_event,
            listeners: BoundListeners::new(listeners),
        }
    }
}

impl BoundItem for BoundDataSource {
    fn value(&self) -> Option<BoundValue> {
        Some(BoundValue::Facet(self.facet.clone()))
    }

    fn changed_event(&self) -> &Event<()> {
        &self.changed_event
    }

    fn needs_rebind_event(&self) -> &Event<()> {
        &self.needs_rebind_event
    }

    fn base_objects(&self) -> Vec<Uuid> {
        let mut uuids = vec![self.facet.data_item.uuid()];
        if let Some(graphic) = &self.facet.graphic {
            uuids.push(graphic.uuid());
        }
        uuids
    }

    fn close(&self) {
        self.listeners.close();
    }
}

/// Aggregate binding over a list of resolved items, kept in lockstep with an
/// observable specifier list by the owning variable.
pub struct BoundList {
    items: Vec<Box<dyn BoundItem>>,
    changed_event: Event<()>,
    needs_rebind_event: Event<()>,
    listeners: BoundListeners,
}

impl BoundList {
    pub fn new(items: Vec<Box<dyn BoundItem>>) -> Self {
        let changed_event: Event<()> = Event::new();
        let needs_rebind_event: Event<()> = Event::new();
        let mut listeners = Vec::new();
        for item in &items {
            let changed = changed_event.clone();
            listeners.push(item.changed_event().listen(move |_| changed.fire(&())));
            let needs_rebind = needs_rebind_event.clone();
            listeners.push(
                item.needs_rebind_event()
                    .listen(move |_| needs_rebind.fire(&())),
            );
        }
        Self {
            items,
            changed_event,
            needs_rebind_event,
            listeners: BoundListeners::new(listeners),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl BoundItem for BoundList {
    fn value(&self) -> Option<BoundValue> {
        let values: Option<Vec<BoundValue>> =
            self.items.iter().map(|item| item.value()).collect();
        values.map(BoundValue::List)
    }

    fn changed_event(&self) -> &Event<()> {
        &self.changed_event
    }

    fn needs_rebind_event(&self) -> &Event<()> {
        &self.needs_rebind_event
    }

    fn base_objects(&self) -> Vec<Uuid> {
        let mut uuids = Vec::new();
        for item in &self.items {
            uuids.extend(item.base_objects());
        }
        uuids
    }

    fn close(&self) {
        self.listeners.close();
        for item in &self.items {
            item.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_listener(event: &Event<()>) -> (Arc<AtomicUsize>, EventListener) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let listener = event.listen(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn bound_object_forwards_data_change() {
        let data_item = DataItem::new();
        let bound = BoundObject::new(ProjectItem::Data(data_item.clone()));
        let (changed, _l1) = counter_listener(bound.changed_event());
        let (rebinds, _l2) = counter_listener(bound.needs_rebind_event());

        data_item.set_data(Some(Value::Integral(1)));
        assert_eq!(changed.load(Ordering::SeqCst), 1);
        assert_eq!(rebinds.load(Ordering::SeqCst), 0);
        bound.close();
    }

    #[test]
    fn bound_object_requests_rebind_on_removal() {
        let data_item = DataItem::new();
        data_item.lifecycle.mark_inserted();
        let bound = BoundObject::new(ProjectItem::Data(data_item.clone()));
        let (rebinds, _listener) = counter_listener(bound.needs_rebind_event());
        data_item.about_to_be_removed();
        assert_eq!(rebinds.load(Ordering::SeqCst), 1);
        bound.close();
    }

    #[test]
    fn closed_bound_object_stops_forwarding() {
        let data_item = DataItem::new();
        let bound = BoundObject::new(ProjectItem::Data(data_item.clone()));
        let (changed, _listener) = counter_listener(bound.changed_event());
        bound.close();
        data_item.set_data(Some(Value::Integral(1)));
        assert_eq!(changed.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "closed twice")]
    fn double_close_panics() {
        let data_item = DataItem::new();
        let bound = BoundObject::new(ProjectItem::Data(data_item));
        bound.close();
        bound.close();
    }

    #[test]
    fn cropped_facet_tracks_graphic_changes() {
        let data_item = DataItem::new();
        let channel = DisplayDataChannel::new(Some(data_item.uuid()));
        let graphic = Graphic::new("rect-graphic");
        let bound = BoundDataSource::new(
            channel,
            data_item.clone(),
            FacetKind::CroppedData,
            Some(graphic.clone()),
        );
        let (changed, _listener) = counter_listener(bound.changed_event());
        graphic.set_property("bounds", serde_json::json!([0.0, 0.0, 0.5, 0.5]));
        assert_eq!(changed.load(Ordering::SeqCst), 1);
        assert_eq!(bound.base_objects(), vec![data_item.uuid(), graphic.uuid()]);
        bound.close();
    }

    #[test]
    fn channel_repoint_invalidates_facet() {
        let data_item = DataItem::new();
        let channel = DisplayDataChannel::new(Some(data_item.uuid()));
        let bound = BoundDataSource::new(channel.clone(), data_item, FacetKind::Data, None);
        let (rebinds, _listener) = counter_listener(bound.needs_rebind_event());
        channel.set_data_item_uuid(Some(Uuid::new_v4()));
        assert_eq!(rebinds.load(Ordering::SeqCst), 1);
        bound.close();
    }

    #[test]
    fn bound_list_aggregates_children() {
        let first = DataItem::new();
        let second = DataItem::new();
        let bound = BoundList::new(vec![
            Box::new(BoundObject::new(ProjectItem::Data(first.clone()))),
            Box::new(BoundObject::new(ProjectItem::Data(second.clone()))),
        ]);
        let (changed, _l1) = counter_listener(bound.changed_event());
        first.set_data(Some(Value::Integral(1)));
        second.set_data(Some(Value::Integral(2)));
        assert_eq!(changed.load(Ordering::SeqCst), 2);
        assert_eq!(bound.len(), 2);
        match bound.value() {
            Some(BoundValue::List(values)) => assert_eq!(values.len(), 2),
            _ => panic!("expected list value"),
        }
        bound.close();
    }

    #[test]
    fn facet_kind_from_specifier_tags() {
        assert_eq!(
            FacetKind::from_specifier(SpecifierType::CroppedXdata, None),
            Some(FacetKind::CroppedData)
        );
        assert_eq!(
            FacetKind::from_specifier(SpecifierType::DataSource, Some("display_data")),
            Some(FacetKind::DisplayData)
        );
        assert_eq!(
            FacetKind::from_specifier(SpecifierType::DataSource, None),
            Some(FacetKind::Data)
        );
        assert_eq!(FacetKind::from_specifier(SpecifierType::Graphic, None), None);
    }
}
