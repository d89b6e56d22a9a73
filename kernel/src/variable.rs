//! Computation variables
//!
//! A variable is one named input of a computation. It is either value-typed
//! (holds a scalar [`Value`] directly) or reference-typed (holds a
//! [`Specifier`], optionally a secondary specifier and a property-name
//! qualifier), never both. Reference-typed variables own at most one bound
//! item at a time; value-typed variables synthesize a passthrough bound item
//! so the computation's resolution logic stays uniform.
//!
//! Binding states: unbound → bound → (rebind) → unbound → bound → …, with a
//! terminal closed state. Replacing the bound item always closes the old one
//! first.

use crate::binding::{BoundItem, BoundValue};
use crate::specifier::{Specifier, SpecifierType};
use crate::values::{Value, ValueKind};
use helio_notify::{Event, EventListener, ObservableList};
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Declared type of a variable, used when retyping through the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableType {
    Scalar(ValueKind),
    DataSource { property: Option<String> },
    Graphic,
}

/// One named input (or parameter) of a computation.
pub struct ComputationVariable {
    uuid: Uuid,
    name: RwLock<Option<String>>,
    label: RwLock<Option<String>>,
    value_kind: RwLock<Option<ValueKind>>,
    value: RwLock<Option<Value>>,
    value_default: RwLock<Option<Value>>,
    value_min: RwLock<Option<Value>>,
    value_max: RwLock<Option<Value>>,
    control_type: RwLock<Option<String>>,
    specifier: RwLock<Option<Specifier>>,
    secondary_specifier: RwLock<Option<Specifier>>,
    property_name: RwLock<Option<String>>,
    objects: Option<Arc<ObservableList<Specifier>>>,
    objects_listeners: Mutex<Vec<EventListener>>,
    bound: Mutex<Option<Box<dyn BoundItem>>>,
    bound_listeners: Mutex<Vec<EventListener>>,
    closed: AtomicBool,
    /// Fired whenever anything about the variable changes; the owning
    /// computation forwards this as "needs update".
    pub changed_event: Event<()>,
    /// Fired when a specifier changed and the variable must be re-resolved
    /// against the context.
    pub needs_rebind_event: Event<()>,
    pub property_changed_event: Event<String>,
}

impl ComputationVariable {
    fn empty(uuid: Uuid, objects: Option<Arc<ObservableList<Specifier>>>) -> Arc<Self> {
        let variable = Arc::new(Self {
            uuid,
            name: RwLock::new(None),
            label: RwLock::new(None),
            value_kind: RwLock::new(None),
            value: RwLock::new(None),
            value_default: RwLock::new(None),
            value_min: RwLock::new(None),
            value_max: RwLock::new(None),
            control_type: RwLock::new(None),
            specifier: RwLock::new(None),
            secondary_specifier: RwLock::new(None),
            property_name: RwLock::new(None),
            objects,
            objects_listeners: Mutex::new(Vec::new()),
            bound: Mutex::new(None),
            bound_listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            changed_event: Event::new(),
            needs_rebind_event: Event::new(),
            property_changed_event: Event::new(),
        });
        variable.attach_objects_listeners();
        variable
    }

    /// Value-typed variable holding a scalar directly.
    pub fn new_scalar(name: &str, kind: ValueKind, value: Option<Value>) -> Arc<Self> {
        let variable = Self::empty(Uuid::new_v4(), None);
        *variable.name.write() = Some(name.to_string());
        *variable.value_kind.write() = Some(kind);
        *variable.value.write() = value;
        variable
    }

    /// Reference-typed variable resolved through the context.
    pub fn new_reference(
        name: &str,
        specifier: Specifier,
        secondary_specifier: Option<Specifier>,
        property_name: Option<&str>,
    ) -> Arc<Self> {
        let variable = Self::empty(Uuid::new_v4(), None);
        *variable.name.write() = Some(name.to_string());
        *variable.specifier.write() = Some(specifier);
        *variable.secondary_specifier.write() = secondary_specifier;
        *variable.property_name.write() = property_name.map(str::to_string);
        variable
    }

    /// List-valued (variadic) variable tracking an observable specifier list.
    pub fn new_list(name: &str, specifiers: Vec<Specifier>) -> Arc<Self> {
        let objects = Arc::new(ObservableList::from_items(specifiers));
        let variable = Self::empty(Uuid::new_v4(), Some(objects));
        *variable.name.write() = Some(name.to_string());
        variable
    }

    /// Rebuild a variable from its persisted dict.
    pub fn from_dict(source: &JsonValue) -> Arc<Self> {
        let uuid = dict::get_uuid(source, "uuid").unwrap_or_else(Uuid::new_v4);
        let objects = dict::get_array(source, "object_specifiers").map(|entries| {
            Arc::new(ObservableList::from_items(
                entries.iter().filter_map(Specifier::from_dict).collect(),
            ))
        });
        let variable = Self::empty(uuid, objects);
        variable.read_from_dict(source);
        variable
    }

    fn attach_objects_listeners(self: &Arc<Self>) {
        let Some(objects) = &self.objects else {
            return;
        };
        let mut listeners = self.objects_listeners.lock();
        let weak = Arc::downgrade(self);
        listeners.push(objects.item_inserted_event.listen(move |_| {
            if let Some(variable) = weak.upgrade() {
                variable.needs_rebind_event.fire(&());
                variable.property_changed("object_specifiers");
            }
        }));
        let weak = Arc::downgrade(self);
        listeners.push(objects.item_removed_event.listen(move |_| {
            if let Some(variable) = weak.upgrade() {
                variable.needs_rebind_event.fire(&());
                variable.property_changed("object_specifiers");
            }
        }));
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

    pub fn display_label(&self) -> Option<String> {
        self.label().or_else(|| self.name())
    }

    pub fn set_label(&self, label: Option<&str>) {
        *self.label.write() = label.map(str::to_string);
        self.property_changed("label");
    }

    pub fn value_kind(&self) -> Option<ValueKind> {
        *self.value_kind.read()
    }

    pub fn value(&self) -> Option<Value> {
        self.value.read().clone()
    }

    pub fn set_value(&self, value: Option<Value>) {
        *self.value.write() = value;
        self.property_changed("value");
    }

    pub fn value_default(&self) -> Option<Value> {
        self.value_default.read().clone()
    }

    pub fn set_value_default(&self, value: Option<Value>) {
        *self.value_default.write() = value;
        self.property_changed("value_default");
    }

    pub fn value_min(&self) -> Option<Value> {
        self.value_min.read().clone()
    }

    pub fn set_value_min(&self, value: Option<Value>) {
        *self.value_min.write() = value;
        self.property_changed("value_min");
    }

    pub fn value_max(&self) -> Option<Value> {
        self.value_max.read().clone()
    }

    pub fn set_value_max(&self, value: Option<Value>) {
        *self.value_max.write() = value;
        self.property_changed("value_max");
    }

    pub fn has_range(&self) -> bool {
        self.value_kind().is_some() && self.value_min().is_some() && self.value_max().is_some()
    }

    pub fn control_type(&self) -> Option<String> {
        self.control_type.read().clone()
    }

    pub fn set_control_type(&self, control_type: Option<&str>) {
        *self.control_type.write() = control_type.map(str::to_string);
        self.property_changed("control_type");
    }

    pub fn specifier(&self) -> Option<Specifier> {
        self.specifier.read().clone()
    }

    /// Re-point the variable. The old bound item is torn down by the owning
    /// computation in response to `needs_rebind`.
    pub fn set_specifier(&self, specifier: Option<Specifier>) {
        *self.specifier.write() = specifier;
        self.property_changed("specifier");
    }

    pub fn secondary_specifier(&self) -> Option<Specifier> {
        self.secondary_specifier.read().clone()
    }

    pub fn set_secondary_specifier(&self, specifier: Option<Specifier>) {
        *self.secondary_specifier.write() = specifier;
        self.property_changed("secondary_specifier");
    }

    pub fn property_name(&self) -> Option<String> {
        self.property_name.read().clone()
    }

    pub fn set_property_name(&self, property_name: Option<&str>) {
        *self.property_name.write() = property_name.map(str::to_string);
        self.property_changed("property_name");
    }

    pub fn objects(&self) -> Option<&Arc<ObservableList<Specifier>>> {
        self.objects.as_ref()
    }

    pub fn is_list(&self) -> bool {
        self.objects.is_some()
    }

    fn property_changed(&self, name: &str) {
        self.property_changed_event.fire(&name.to_string());
        if name == "specifier" || name == "secondary_specifier" {
            self.needs_rebind_event.fire(&());
        }
        self.changed_event.fire(&());
    }

    /// Specifier used to look this variable up in a computation context: a
    /// `variable` specifier for value-typed variables, the stored specifier
    /// otherwise.
    pub fn variable_specifier(&self) -> Option<Specifier> {
        if self.value_kind().is_some() {
            Some(Specifier::variable(self.uuid))
        } else {
            self.specifier()
        }
    }

    /// Derived declared type.
    pub fn variable_type(&self) -> Option<VariableType> {
        if let Some(kind) = self.value_kind() {
            return Some(VariableType::Scalar(kind));
        }
        let specifier = self.specifier()?;
        match specifier.specifier_type {
            SpecifierType::Graphic => Some(VariableType::Graphic),
            _ => Some(VariableType::DataSource {
                property: specifier.property,
            }),
        }
    }

    /// Retype the variable. Clears and regenerates default bounds and clears
    /// any stale specifier so value-type and specifier are never both set.
    pub fn set_variable_type(&self, variable_type: VariableType) {
        if self.variable_type().as_ref() == Some(&variable_type) {
            return;
        }
        match variable_type {
            VariableType::Scalar(kind) => {
                self.set_specifier(None);
                self.set_secondary_specifier(None);
                *self.value_kind.write() = Some(kind);
                self.property_changed("value_type");
                self.set_control_type(Some(kind.default_control_type()));
                self.set_value_default(kind.default_value());
                self.set_value_min(None);
                self.set_value_max(None);
            }
            VariableType::DataSource { property } => {
                self.clear_value_fields();
                let mut specifier = self
                    .specifier()
                    .filter(|current| {
                        current.specifier_type == SpecifierType::DataSource
                            || current.specifier_type.is_data_source_facet()
                    })
                    .unwrap_or_else(|| Specifier::untargeted(SpecifierType::DataSource));
                specifier.specifier_type = SpecifierType::DataSource;
                specifier.property = property;
                let secondary = self
                    .secondary_specifier()
                    .unwrap_or_else(|| Specifier::untargeted(SpecifierType::Graphic));
                self.set_specifier(Some(specifier));
                self.set_secondary_specifier(Some(secondary));
            }
            VariableType::Graphic => {
                self.clear_value_fields();
                self.set_specifier(Some(Specifier::untargeted(SpecifierType::Graphic)));
                self.set_secondary_specifier(None);
            }
        }
    }

    fn clear_value_fields(&self) {
        *self.value_kind.write() = None;
        self.property_changed("value_type");
        self.set_control_type(None);
        self.set_value_default(None);
        self.set_value_min(None);
        self.set_value_max(None);
    }

    /// Replace the bound item, closing the previous one first and forwarding
    /// its notifications to this variable's events.
    pub(crate) fn set_bound_item(&self, bound: Option<Box<dyn BoundItem>>) {
        for listener in self.bound_listeners.lock().drain(..) {
            listener.close();
        }
        if let Some(previous) = self.bound.lock().take() {
            previous.close();
        }
        if let Some(bound) = bound {
            let mut listeners = self.bound_listeners.lock();
            let changed = self.changed_event.clone();
            listeners.push(bound.changed_event().listen(move |_| changed.fire(&())));
            let needs_rebind = self.needs_rebind_event.clone();
            listeners.push(
                bound
                    .needs_rebind_event()
                    .listen(move |_| needs_rebind.fire(&())),
            );
            *self.bound.lock() = Some(bound);
        }
    }

    pub fn has_bound_item(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn bound_value(&self) -> Option<BoundValue> {
        self.bound.lock().as_ref().and_then(|bound| bound.value())
    }

    pub fn bound_base_objects(&self) -> Vec<Uuid> {
        self.bound
            .lock()
            .as_ref()
            .map(|bound| bound.base_objects())
            .unwrap_or_default()
    }

    /// Passthrough bound item exposing this variable's scalar value.
    pub fn bound_variable(self: &Arc<Self>) -> Box<dyn BoundItem> {
        Box::new(BoundScalar::new(self.clone()))
    }

    /// State saved for undo: the mutable slots of the variable.
    pub fn save_properties(&self) -> SavedVariableProperties {
        SavedVariableProperties {
            value: self.value(),
            specifier: self.specifier(),
            secondary_specifier: self.secondary_specifier(),
        }
    }

    pub fn restore_properties(&self, saved: SavedVariableProperties) {
        self.set_value(saved.value);
        self.set_specifier(saved.specifier);
        self.set_secondary_specifier(saved.secondary_specifier);
    }

    /// Tear the variable down. Never called twice.
    pub fn close(&self) {
        assert!(
            !self.closed.swap(true, Ordering::SeqCst),
            "variable closed twice"
        );
        for listener in self.objects_listeners.lock().drain(..) {
            listener.close();
        }
        self.set_bound_item(None);
    }
}

impl PersistentObject for ComputationVariable {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "variable"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        if let Some(name) = self.name() {
            dict.insert("name".to_string(), JsonValue::String(name));
        }
        if let Some(label) = self.label() {
            dict.insert("label".to_string(), JsonValue::String(label));
        }
        if let Some(kind) = self.value_kind() {
            dict.insert(
                "value_type".to_string(),
                JsonValue::String(kind.as_str().to_string()),
            );
        }
        for (key, value) in [
            ("value", self.value()),
            ("value_default", self.value_default()),
            ("value_min", self.value_min()),
            ("value_max", self.value_max()),
        ] {
            if let Some(value) = value {
                dict.insert(key.to_string(), value.to_json());
            }
        }
        if let Some(control_type) = self.control_type() {
            dict.insert("control_type".to_string(), JsonValue::String(control_type));
        }
        if let Some(specifier) = self.specifier() {
            dict.insert("specifier".to_string(), specifier.to_dict());
        }
        if let Some(specifier) = self.secondary_specifier() {
            dict.insert("secondary_specifier".to_string(), specifier.to_dict());
        }
        if let Some(property_name) = self.property_name() {
            dict.insert(
                "property_name".to_string(),
                JsonValue::String(property_name),
            );
        }
        if let Some(objects) = &self.objects {
            dict.insert(
                "object_specifiers".to_string(),
                JsonValue::Array(
                    objects
                        .items()
                        .iter()
                        .map(Specifier::to_dict)
                        .collect(),
                ),
            );
        }
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        // value_type must be read before the values it types
        let kind = dict::get_str(source, "value_type").and_then(ValueKind::from_str);
        *self.value_kind.write() = kind;
        if let Some(kind) = kind {
            for (key, slot) in [
                ("value", &self.value),
                ("value_default", &self.value_default),
                ("value_min", &self.value_min),
                ("value_max", &self.value_max),
            ] {
                if let Some(raw) = source.get(key) {
                    *slot.write() = Value::from_json(kind, raw);
                }
            }
        }
        if let Some(name) = dict::get_string(source, "name") {
            *self.name.write() = Some(name);
        }
        if let Some(label) = dict::get_string(source, "label") {
            *self.label.write() = Some(label);
        }
        if let Some(control_type) = dict::get_string(source, "control_type") {
            *self.control_type.write() = Some(control_type);
        }
        *self.specifier.write() = source.get("specifier").and_then(Specifier::from_dict);
        *self.secondary_specifier.write() = source
            .get("secondary_specifier")
            .and_then(Specifier::from_dict);
        if let Some(property_name) = dict::get_string(source, "property_name") {
            *self.property_name.write() = Some(property_name);
        }
    }
}

/// Saved variable slots for undo.
#[derive(Debug, Clone)]
pub struct SavedVariableProperties {
    pub value: Option<Value>,
    pub specifier: Option<Specifier>,
    pub secondary_specifier: Option<Specifier>,
}

/// Passthrough bound item over a value-typed variable.
struct BoundScalar {
    variable: Arc<ComputationVariable>,
    changed_event: Event<()>,
    needs_rebind_event: Event<()>,
    listeners: Mutex<Option<Vec<EventListener>>>,
}

impl BoundScalar {
    fn new(variable: Arc<ComputationVariable>) -> Self {
        let changed_event: Event<()> = Event::new();
        let changed = changed_event.clone();
        let listener = variable.property_changed_event.listen(move |name| {
            if name == "value" {
                changed.fire(&());
            }
        });
        Self {
            variable,
            changed_event,
            needs_rebind_event: Event::new(),
            listeners: Mutex::new(Some(vec![listener])),
        }
    }
}

impl BoundItem for BoundScalar {
    fn value(&self) -> Option<BoundValue> {
        self.variable.value().map(BoundValue::Scalar)
    }

    fn changed_event(&self) -> &Event<()> {
        &self.changed_event
    }

    fn needs_rebind_event(&self) -> &Event<()> {
        &self.needs_rebind_event
    }

    fn close(&self) {
        let listeners = self.listeners.lock().take();
        assert!(listeners.is_some(), "bound item closed twice");
        for listener in listeners.into_iter().flatten() {
            listener.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn scalar_variable_exposes_passthrough_value() {
        let variable =
            ComputationVariable::new_scalar("k", ValueKind::Integral, Some(Value::Integral(2)));
        let bound = variable.bound_variable();
        match bound.value() {
            Some(BoundValue::Scalar(Value::Integral(2))) => {}
            _ => panic!("expected scalar 2"),
        }
        bound.close();
    }

    #[test]
    fn passthrough_fires_changed_on_value_edit() {
        let variable =
            ComputationVariable::new_scalar("k", ValueKind::Real, Some(Value::Real(1.0)));
        let bound = variable.bound_variable();
        let changed = Arc::new(AtomicUsize::new(0));
        let changed_clone = changed.clone();
        let _listener = bound.changed_event().listen(move |_| {
            changed_clone.fetch_add(1, Ordering::SeqCst);
        });
        variable.set_value(Some(Value::Real(2.0)));
        assert_eq!(changed.load(Ordering::SeqCst), 1);
        bound.close();
    }

    #[test]
    fn specifier_change_requests_rebind() {
        let uuid = Uuid::new_v4();
        let variable = ComputationVariable::new_reference(
            "a",
            Specifier::new(SpecifierType::DataItem, uuid),
            None,
            None,
        );
        let rebinds = Arc::new(AtomicUsize::new(0));
        let rebinds_clone = rebinds.clone();
        let _listener = variable.needs_rebind_event.listen(move |_| {
            rebinds_clone.fetch_add(1, Ordering::SeqCst);
        });
        variable.set_specifier(Some(Specifier::new(SpecifierType::DataItem, Uuid::new_v4())));
        assert_eq!(rebinds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retype_to_scalar_clears_specifiers() {
        let variable = ComputationVariable::new_reference(
            "a",
            Specifier::new(SpecifierType::DataItem, Uuid::new_v4()),
            None,
            None,
        );
        variable.set_variable_type(VariableType::Scalar(ValueKind::Integral));
        assert_eq!(variable.specifier(), None);
        assert_eq!(variable.secondary_specifier(), None);
        assert_eq!(variable.value_kind(), Some(ValueKind::Integral));
        assert_eq!(variable.value_default(), Some(Value::Integral(0)));
        assert_eq!(variable.control_type().as_deref(), Some("slider"));
    }

    #[test]
    fn retype_to_reference_clears_value_and_keeps_uuid() {
        let target = Uuid::new_v4();
        let variable =
            ComputationVariable::new_scalar("a", ValueKind::Real, Some(Value::Real(1.0)));
        variable.set_variable_type(VariableType::DataSource { property: None });
        assert_eq!(variable.value_kind(), None);
        assert_eq!(variable.value_default(), None);
        let specifier = variable.specifier().unwrap();
        assert_eq!(specifier.specifier_type, SpecifierType::DataSource);
        assert_eq!(specifier.uuid, None);

        // an existing data-source target survives a facet retype
        variable.set_specifier(Some(Specifier::new(SpecifierType::DataSource, target)));
        variable.set_variable_type(VariableType::DataSource {
            property: Some("display_data".to_string()),
        });
        let specifier = variable.specifier().unwrap();
        assert_eq!(specifier.uuid, Some(target));
        assert_eq!(specifier.property.as_deref(), Some("display_data"));
    }

    #[test]
    fn list_variable_requests_rebind_on_list_edit() {
        let variable = ComputationVariable::new_list(
            "src",
            vec![Specifier::new(SpecifierType::DataItem, Uuid::new_v4())],
        );
        let rebinds = Arc::new(AtomicUsize::new(0));
        let rebinds_clone = rebinds.clone();
        let _listener = variable.needs_rebind_event.listen(move |_| {
            rebinds_clone.fetch_add(1, Ordering::SeqCst);
        });
        let objects = variable.objects().unwrap().clone();
        objects.push(Specifier::new(SpecifierType::DataItem, Uuid::new_v4()));
        objects.remove(0);
        assert_eq!(rebinds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dict_round_trip_preserves_slots() {
        let target = Uuid::new_v4();
        let variable = ComputationVariable::new_reference(
            "a",
            Specifier::new(SpecifierType::DataSource, target),
            Some(Specifier::new(SpecifierType::Graphic, Uuid::new_v4())),
            Some("data"),
        );
        variable.set_label(Some("Source A"));
        let copy = ComputationVariable::from_dict(&variable.write_to_dict());
        assert_eq!(copy.uuid(), variable.uuid());
        assert_eq!(copy.specifier(), variable.specifier());
        assert_eq!(copy.secondary_specifier(), variable.secondary_specifier());
        assert_eq!(copy.property_name().as_deref(), Some("data"));
        assert_eq!(copy.display_label().as_deref(), Some("Source A"));
    }

    #[test]
    fn scalar_dict_round_trip_reads_value_type_first() {
        let variable =
            ComputationVariable::new_scalar("k", ValueKind::Complex, Some(Value::Complex(1.0, 2.0)));
        let copy = ComputationVariable::from_dict(&variable.write_to_dict());
        assert_eq!(copy.value(), Some(Value::Complex(1.0, 2.0)));
        assert_eq!(copy.value_kind(), Some(ValueKind::Complex));
    }

    #[test]
    fn save_and_restore_round_trips_mutable_slots() {
        let variable =
            ComputationVariable::new_scalar("k", ValueKind::Integral, Some(Value::Integral(2)));
        let saved = variable.save_properties();
        variable.set_value(Some(Value::Integral(9)));
        variable.restore_properties(saved);
        assert_eq!(variable.value(), Some(Value::Integral(2)));
    }

    #[test]
    #[should_panic(expected = "variable closed twice")]
    fn double_close_panics() {
        let variable = ComputationVariable::new_scalar("k", ValueKind::Integral, None);
        variable.close();
        variable.close();
    }
}
