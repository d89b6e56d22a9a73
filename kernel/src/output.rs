//! Computation outputs
//!
//! An output names where a computation's result lands: a single specifier or
//! a list of specifiers. Outputs own their bound items the same way
//! variables do, but carry no value typing; a bound item that loses its
//! target simply drops away, leaving the computation unresolved until the
//! output is re-pointed or rebound.

use crate::binding::{BoundItem, BoundValue};
use crate::specifier::Specifier;
use helio_notify::{Event, EventListener};
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

enum OutputBound {
    Unbound,
    Single(Box<dyn BoundItem>),
    List(Vec<Box<dyn BoundItem>>),
}

/// One named output of a computation.
pub struct ComputationOutput {
    uuid: Uuid,
    name: RwLock<Option<String>>,
    label: RwLock<Option<String>>,
    specifier: RwLock<Option<Specifier>>,
    specifiers: RwLock<Option<Vec<Specifier>>>,
    bound: Mutex<OutputBound>,
    bound_listeners: Mutex<Vec<EventListener>>,
    /// Fired when a specifier changed and the output must be re-resolved.
    pub needs_rebind_event: Event<()>,
    pub property_changed_event: Event<String>,
}

impl ComputationOutput {
    fn empty(uuid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            name: RwLock::new(None),
            label: RwLock::new(None),
            specifier: RwLock::new(None),
            specifiers: RwLock::new(None),
            bound: Mutex::new(OutputBound::Unbound),
            bound_listeners: Mutex::new(Vec::new()),
            needs_rebind_event: Event::new(),
            property_changed_event: Event::new(),
        })
    }

    pub fn new(name: &str, specifier: Option<Specifier>) -> Arc<Self> {
        let output = Self::empty(Uuid::new_v4());
        *output.name.write() = Some(name.to_string());
        *output.specifier.write() = specifier;
        output
    }

    pub fn new_list(name: &str, specifiers: Vec<Specifier>) -> Arc<Self> {
        let output = Self::empty(Uuid::new_v4());
        *output.name.write() = Some(name.to_string());
        *output.specifiers.write() = Some(specifiers);
        output
    }

    pub fn from_dict(source: &JsonValue) -> Arc<Self> {
        let output = Self::empty(dict::get_uuid(source, "uuid").unwrap_or_else(Uuid::new_v4));
        output.read_from_dict(source);
        output
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: Option<&str>) {
        *self.label.write() = label.map(str::to_string);
        self.property_changed_event.fire(&"label".to_string());
    }

    pub fn specifier(&self) -> Option<Specifier> {
        self.specifier.read().clone()
    }

    pub fn set_specifier(&self, specifier: Option<Specifier>) {
        *self.specifier.write() = specifier;
        self.property_changed_event.fire(&"specifier".to_string());
        self.needs_rebind_event.fire(&());
    }

    pub fn specifiers(&self) -> Option<Vec<Specifier>> {
        self.specifiers.read().clone()
    }

    pub fn set_specifiers(&self, specifiers: Option<Vec<Specifier>>) {
        *self.specifiers.write() = specifiers;
        self.property_changed_event.fire(&"specifiers".to_string());
        self.needs_rebind_event.fire(&());
    }

    /// Resolve this output's specifier(s) through `resolve`. Bound items that
    /// later lose their target clear themselves, leaving the output unbound.
    pub fn bind(self: &Arc<Self>, resolve: &dyn Fn(&Specifier) -> Option<Box<dyn BoundItem>>) {
        self.unbind();
        if let Some(specifier) = self.specifier() {
            if let Some(bound) = resolve(&specifier) {
                let weak = Arc::downgrade(self);
                self.bound_listeners
                    .lock()
                    .push(bound.needs_rebind_event().listen(move |_| {
                        if let Some(output) = weak.upgrade() {
                            output.clear_bound();
                        }
                    }));
                *self.bound.lock() = OutputBound::Single(bound);
            }
        } else if let Some(specifiers) = self.specifiers() {
            let mut items = Vec::new();
            for specifier in &specifiers {
                if let Some(bound) = resolve(specifier) {
                    let weak = Arc::downgrade(self);
                    self.bound_listeners
                        .lock()
                        .push(bound.needs_rebind_event().listen(move |_| {
                            if let Some(output) = weak.upgrade() {
                                output.clear_bound();
                            }
                        }));
                    items.push(bound);
                }
            }
            *self.bound.lock() = OutputBound::List(items);
        }
    }

    fn clear_bound(&self) {
        self.unbind();
    }

    /// Release bound items and their subscriptions. Safe to call when
    /// already unbound.
    pub fn unbind(&self) {
        for listener in self.bound_listeners.lock().drain(..) {
            listener.close();
        }
        match std::mem::replace(&mut *self.bound.lock(), OutputBound::Unbound) {
            OutputBound::Unbound => {}
            OutputBound::Single(bound) => bound.close(),
            OutputBound::List(items) => {
                for bound in items {
                    bound.close();
                }
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(&*self.bound.lock(), OutputBound::Unbound)
    }

    /// True when every declared specifier has a live bound item. An output
    /// with no specifier at all is trivially bound.
    pub fn is_fully_bound(&self) -> bool {
        let bound = self.bound.lock();
        if self.specifier().is_some() {
            matches!(&*bound, OutputBound::Single(_))
        } else if let Some(specifiers) = self.specifiers() {
            match &*bound {
                OutputBound::List(items) => items.len() == specifiers.len(),
                _ => specifiers.is_empty(),
            }
        } else {
            true
        }
    }

    pub fn bound_value(&self) -> Option<BoundValue> {
        match &*self.bound.lock() {
            OutputBound::Unbound => None,
            OutputBound::Single(bound) => bound.value(),
            OutputBound::List(items) => {
                let values: Option<Vec<BoundValue>> =
                    items.iter().map(|bound| bound.value()).collect();
                values.map(BoundValue::List)
            }
        }
    }

    /// UUIDs of the concrete items this output currently points at.
    pub fn bound_uuids(&self) -> Vec<Uuid> {
        match &*self.bound.lock() {
            OutputBound::Unbound => Vec::new(),
            OutputBound::Single(bound) => bound.base_objects(),
            OutputBound::List(items) => items
                .iter()
                .flat_map(|bound| bound.base_objects())
                .collect(),
        }
    }

    /// UUIDs named by the persisted specifier(s), bound or not.
    pub fn specifier_uuids(&self) -> Vec<Uuid> {
        let mut uuids = Vec::new();
        if let Some(specifier) = self.specifier() {
            uuids.extend(specifier.uuid);
        }
        if let Some(specifiers) = self.specifiers() {
            uuids.extend(specifiers.iter().filter_map(|specifier| specifier.uuid));
        }
        uuids
    }
}

impl PersistentObject for ComputationOutput {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "output"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        if let Some(name) = self.name() {
            dict.insert("name".to_string(), JsonValue::String(name));
        }
        if let Some(label) = self.label() {
            dict.insert("label".to_string(), JsonValue::String(label));
        }
        if let Some(specifier) = self.specifier() {
            dict.insert("specifier".to_string(), specifier.to_dict());
        }
        if let Some(specifiers) = self.specifiers() {
            dict.insert(
                "specifiers".to_string(),
                JsonValue::Array(specifiers.iter().map(Specifier::to_dict).collect()),
            );
        }
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        if let Some(name) = dict::get_string(source, "name") {
            *self.name.write() = Some(name);
        }
        if let Some(label) = dict::get_string(source, "label") {
            *self.label.write() = Some(label);
        }
        *self.specifier.write() = source.get("specifier").and_then(Specifier::from_dict);
        *self.specifiers.write() = dict::get_array(source, "specifiers")
            .map(|entries| entries.iter().filter_map(Specifier::from_dict).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BoundObject;
    use crate::items::{DataItem, ProjectItem};
    use crate::specifier::SpecifierType;

    fn resolver_for(
        item: Arc<DataItem>,
    ) -> impl Fn(&Specifier) -> Option<Box<dyn BoundItem>> {
        move |specifier: &Specifier| {
            if specifier.uuid == Some(item.uuid()) {
                Some(Box::new(BoundObject::new(ProjectItem::Data(item.clone()))))
            } else {
                None
            }
        }
    }

    #[test]
    fn bind_resolves_single_specifier() {
        let item = DataItem::new();
        let output = ComputationOutput::new(
            "out",
            Some(Specifier::new(SpecifierType::DataItem, item.uuid())),
        );
        output.bind(&resolver_for(item.clone()));
        assert!(output.is_fully_bound());
        assert_eq!(output.bound_uuids(), vec![item.uuid()]);
        output.unbind();
        assert!(!output.is_bound());
    }

    #[test]
    fn dangling_specifier_stays_unbound() {
        let item = DataItem::new();
        let output = ComputationOutput::new(
            "out",
            Some(Specifier::new(SpecifierType::DataItem, Uuid::new_v4())),
        );
        output.bind(&resolver_for(item));
        assert!(!output.is_fully_bound());
        assert_eq!(output.bound_value().is_some(), false);
    }

    #[test]
    fn target_removal_clears_binding() {
        let item = DataItem::new();
        item.lifecycle.mark_inserted();
        let output = ComputationOutput::new(
            "out",
            Some(Specifier::new(SpecifierType::DataItem, item.uuid())),
        );
        output.bind(&resolver_for(item.clone()));
        assert!(output.is_fully_bound());
        item.about_to_be_removed();
        assert!(!output.is_bound());
        assert!(!output.is_fully_bound());
    }

    #[test]
    fn list_output_requires_every_specifier_bound() {
        let item = DataItem::new();
        let output = ComputationOutput::new_list(
            "out",
            vec![
                Specifier::new(SpecifierType::DataItem, item.uuid()),
                Specifier::new(SpecifierType::DataItem, Uuid::new_v4()),
            ],
        );
        output.bind(&resolver_for(item));
        assert!(output.is_bound());
        assert!(!output.is_fully_bound());
    }

    #[test]
    fn set_specifier_requests_rebind() {
        let output = ComputationOutput::new("out", None);
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        let _listener = output.needs_rebind_event.listen(move |_| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        output.set_specifier(Some(Specifier::new(SpecifierType::DataItem, Uuid::new_v4())));
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn dict_round_trip_preserves_specifiers() {
        let output = ComputationOutput::new_list(
            "out",
            vec![Specifier::new(SpecifierType::DataItem, Uuid::new_v4())],
        );
        let copy = ComputationOutput::from_dict(&output.write_to_dict());
        assert_eq!(copy.uuid(), output.uuid());
        assert_eq!(copy.specifiers(), output.specifiers());
        assert_eq!(copy.name().as_deref(), Some("out"));
    }
}
