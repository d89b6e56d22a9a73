//! Computation: a reproducible derivation over referenced inputs
//!
//! A computation owns an ordered list of variables (inputs) and outputs,
//! binds them against a resolution context, watches every bound item, and
//! drives evaluation through an injected transform registry or script
//! evaluator. Two mutually exclusive modes are fixed at creation: transform
//! mode carries a `processing_id` and produces a fresh result via
//! [`Computation::evaluate`]; script mode carries an expression and mutates a
//! supplied target via [`Computation::evaluate_with_target`].
//!
//! Evaluation failures (evaluator error, missing transform) are captured as
//! `error_text` and never propagate as panics. Binding misuse, such as a
//! double bind or evaluating in the wrong mode, is a programmer contract and
//! fails loudly.

use crate::binding::BoundValue;
use crate::context::{ComputationContext, ResolutionContext};
use crate::items::{object_specifier, ProjectItem};
use crate::output::ComputationOutput;
use crate::registry::{ResolvedInputs, ScriptEvaluator, TransformRegistry};
use crate::specifier::{Specifier, SpecifierType};
use crate::values::{Value, ValueKind};
use crate::variable::ComputationVariable;
use helio_notify::{Event, EventListener};
use helio_persist::object::base_dict;
use helio_persist::{dict, PersistentObject};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// An input or output description used when building a computation:
/// a single item (optionally facet-typed and crop-qualified) or a list.
#[derive(Clone)]
pub struct ComputationItem {
    pub item: Option<ProjectItem>,
    pub specifier_type: Option<SpecifierType>,
    pub secondary_item: Option<ProjectItem>,
    pub items: Option<Vec<ComputationItem>>,
}

impl ComputationItem {
    pub fn new(item: ProjectItem) -> Self {
        Self {
            item: Some(item),
            specifier_type: None,
            secondary_item: None,
            items: None,
        }
    }

    pub fn with_type(mut self, specifier_type: SpecifierType) -> Self {
        self.specifier_type = Some(specifier_type);
        self
    }

    pub fn with_secondary(mut self, secondary_item: ProjectItem) -> Self {
        self.secondary_item = Some(secondary_item);
        self
    }

    pub fn list(items: Vec<ProjectItem>) -> Self {
        Self {
            item: None,
            specifier_type: None,
            secondary_item: None,
            items: Some(items.into_iter().map(ComputationItem::new).collect()),
        }
    }
}

/// Outcome of one `evaluate` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// `needs_update` was clear; nothing happened.
    Skipped,
    /// Inputs were not fully resolved; evaluation was skipped.
    Unresolved,
    /// The transform produced a result.
    Completed(Value),
    /// The failure was captured as `error_text`.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Transform,
    Script,
}

/// Entry recording one specifier removed from a list-valued variable during
/// a cascade, sufficient to reverse the removal.
#[derive(Debug, Clone)]
pub struct ListEntryRemoved {
    pub computation_uuid: Uuid,
    pub variable_index: usize,
    pub list_index: usize,
    pub specifier: Specifier,
}

/// A computation on referenced data and parameters.
pub struct Computation {
    uuid: Uuid,
    mode: RwLock<Mode>,
    original_expression: RwLock<Option<String>>,
    processing_id: RwLock<Option<String>>,
    label: RwLock<Option<String>>,
    error_text: RwLock<Option<String>>,
    source_uuid: RwLock<Option<Uuid>>,
    variables: RwLock<Vec<Arc<ComputationVariable>>>,
    results: RwLock<Vec<Arc<ComputationOutput>>>,
    needs_update: AtomicBool,
    evaluation_count: AtomicU64,
    last_evaluate_time: Mutex<Option<Instant>>,
    context: Mutex<Option<Arc<ComputationContext>>>,
    variable_listeners: Mutex<HashMap<Uuid, Vec<EventListener>>>,
    result_listeners: Mutex<HashMap<Uuid, EventListener>>,
    pub computation_mutated_event: Event<()>,
    pub computation_output_changed_event: Event<()>,
    pub variable_inserted_event: Event<(usize, Arc<ComputationVariable>)>,
    pub variable_removed_event: Event<(usize, Arc<ComputationVariable>)>,
    pub property_changed_event: Event<String>,
    pub about_to_be_removed_event: Event<()>,
    pub(crate) lifecycle: crate::items::Lifecycle,
}

impl Computation {
    fn empty(uuid: Uuid, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            mode: RwLock::new(mode),
            original_expression: RwLock::new(None),
            processing_id: RwLock::new(None),
            label: RwLock::new(None),
            error_text: RwLock::new(None),
            source_uuid: RwLock::new(None),
            variables: RwLock::new(Vec::new()),
            results: RwLock::new(Vec::new()),
            needs_update: AtomicBool::new(true),
            evaluation_count: AtomicU64::new(0),
            last_evaluate_time: Mutex::new(None),
            context: Mutex::new(None),
            variable_listeners: Mutex::new(HashMap::new()),
            result_listeners: Mutex::new(HashMap::new()),
            computation_mutated_event: Event::new(),
            computation_output_changed_event: Event::new(),
            variable_inserted_event: Event::new(),
            variable_removed_event: Event::new(),
            property_changed_event: Event::new(),
            about_to_be_removed_event: Event::new(),
            lifecycle: crate::items::Lifecycle::new(),
        })
    }

    /// Transform-mode computation dispatching to a registered processing id.
    pub fn new_with_processing(processing_id: &str) -> Arc<Self> {
        let computation = Self::empty(Uuid::new_v4(), Mode::Transform);
        *computation.processing_id.write() = Some(processing_id.to_string());
        computation
    }

    /// Script-mode computation evaluating an expression against a target.
    pub fn new_with_expression(expression: &str) -> Arc<Self> {
        let computation = Self::empty(Uuid::new_v4(), Mode::Script);
        *computation.original_expression.write() = Some(expression.to_string());
        computation
    }

    /// Rebuild a computation (with variables and outputs) from its persisted
    /// dict. The result starts unbound and marked for update.
    pub fn from_dict(source: &JsonValue) -> Arc<Self> {
        let uuid = dict::get_uuid(source, "uuid").unwrap_or_else(Uuid::new_v4);
        let mode = if dict::get_str(source, "processing_id").is_some() {
            Mode::Transform
        } else {
            Mode::Script
        };
        let computation = Self::empty(uuid, mode);
        computation.read_from_dict(source);
        computation
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_transform_mode(&self) -> bool {
        *self.mode.read() == Mode::Transform
    }

    pub fn processing_id(&self) -> Option<String> {
        self.processing_id.read().clone()
    }

    pub fn expression(&self) -> Option<String> {
        self.original_expression.read().clone()
    }

    /// Replace the script expression. Only meaningful in script mode.
    pub fn set_expression(&self, expression: &str) {
        assert!(
            !self.is_transform_mode(),
            "expression edits require a script-mode computation"
        );
        if self.expression().as_deref() != Some(expression) {
            *self.original_expression.write() = Some(expression.to_string());
            self.property_changed_event
                .fire(&"original_expression".to_string());
            self.mark_update();
        }
    }

    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: Option<&str>) {
        *self.label.write() = label.map(str::to_string);
        self.property_changed_event.fire(&"label".to_string());
        self.computation_mutated_event.fire(&());
    }

    pub fn source_uuid(&self) -> Option<Uuid> {
        *self.source_uuid.read()
    }

    pub fn set_source_uuid(&self, source_uuid: Option<Uuid>) {
        *self.source_uuid.write() = source_uuid;
        self.property_changed_event.fire(&"source_uuid".to_string());
    }

    pub fn error_text(&self) -> Option<String> {
        self.error_text.read().clone()
    }

    fn set_error_text(&self, error_text: Option<String>) {
        if *self.error_text.read() != error_text {
            *self.error_text.write() = error_text;
            self.property_changed_event.fire(&"error_text".to_string());
            self.computation_mutated_event.fire(&());
        }
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update.load(Ordering::SeqCst)
    }

    /// Number of evaluator invocations so far; tests use this to assert
    /// execution counts.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluation_count.load(Ordering::SeqCst)
    }

    pub fn last_evaluate_time(&self) -> Option<Instant> {
        *self.last_evaluate_time.lock()
    }

    /// Mark the computation as needing evaluation and notify watchers.
    pub fn mark_update(&self) {
        self.needs_update.store(true, Ordering::SeqCst);
        self.computation_mutated_event.fire(&());
    }

    // --- variables and outputs ---------------------------------------------

    pub fn variables(&self) -> Vec<Arc<ComputationVariable>> {
        self.variables.read().clone()
    }

    pub fn outputs(&self) -> Vec<Arc<ComputationOutput>> {
        self.results.read().clone()
    }

    pub fn variable(&self, name: &str) -> Option<Arc<ComputationVariable>> {
        self.variables
            .read()
            .iter()
            .find(|variable| variable.name().as_deref() == Some(name))
            .cloned()
    }

    pub fn variable_at(&self, index: usize) -> Option<Arc<ComputationVariable>> {
        self.variables.read().get(index).cloned()
    }

    pub fn output(&self, name: &str) -> Option<Arc<ComputationOutput>> {
        self.results
            .read()
            .iter()
            .find(|output| output.name().as_deref() == Some(name))
            .cloned()
    }

    pub fn add_variable(self: &Arc<Self>, variable: Arc<ComputationVariable>) {
        let index = self.variables.read().len();
        self.insert_variable(index, variable);
    }

    pub fn insert_variable(self: &Arc<Self>, index: usize, variable: Arc<ComputationVariable>) {
        self.variables.write().insert(index, variable.clone());
        if self.context.lock().is_some() {
            self.bind_variable(&variable);
        }
        self.variable_inserted_event.fire(&(index, variable));
        self.computation_mutated_event.fire(&());
        self.needs_update.store(true, Ordering::SeqCst);
    }

    pub fn remove_variable(self: &Arc<Self>, variable: &Arc<ComputationVariable>) {
        let index = self
            .variables
            .read()
            .iter()
            .position(|candidate| candidate.uuid() == variable.uuid())
            .expect("variable removed from a computation that does not own it");
        self.unbind_variable(variable);
        self.variables.write().remove(index);
        variable.close();
        self.variable_removed_event.fire(&(index, variable.clone()));
        self.computation_mutated_event.fire(&());
        self.needs_update.store(true, Ordering::SeqCst);
    }

    /// Create and add a value-typed variable.
    pub fn create_variable(
        self: &Arc<Self>,
        name: &str,
        kind: ValueKind,
        value: Option<Value>,
    ) -> Arc<ComputationVariable> {
        let variable = ComputationVariable::new_scalar(name, kind, value);
        self.add_variable(variable.clone());
        variable
    }

    /// Create and add an input variable referencing an item or item list.
    pub fn create_input_item(
        self: &Arc<Self>,
        name: &str,
        input_item: ComputationItem,
        property_name: Option<&str>,
    ) -> Arc<ComputationVariable> {
        if let Some(items) = &input_item.items {
            let specifiers: Vec<Specifier> = items
                .iter()
                .filter_map(|entry| {
                    entry
                        .item
                        .as_ref()
                        .and_then(|item| object_specifier(item, entry.specifier_type))
                })
                .collect();
            let variable = ComputationVariable::new_list(name, specifiers);
            self.add_variable(variable.clone());
            variable
        } else {
            let item = input_item
                .item
                .as_ref()
                .expect("input item requires an item or an item list");
            let specifier = object_specifier(item, input_item.specifier_type)
                .expect("item kind has no specifier form");
            let secondary_specifier = input_item
                .secondary_item
                .as_ref()
                .and_then(|secondary| object_specifier(secondary, None));
            let variable = ComputationVariable::new_reference(
                name,
                specifier,
                secondary_specifier,
                property_name,
            );
            self.add_variable(variable.clone());
            variable
        }
    }

    /// Create and add an output slot pointing at an item or item list.
    pub fn create_output_item(
        self: &Arc<Self>,
        name: &str,
        output_item: Option<ComputationItem>,
    ) -> Option<Arc<ComputationOutput>> {
        let output = match &output_item {
            Some(entry) if entry.items.is_some() => {
                let specifiers: Vec<Specifier> = entry
                    .items
                    .as_ref()
                    .unwrap()
                    .iter()
                    .filter_map(|child| {
                        child
                            .item
                            .as_ref()
                            .and_then(|item| object_specifier(item, None))
                    })
                    .collect();
                ComputationOutput::new_list(name, specifiers)
            }
            Some(entry) => {
                assert!(entry.specifier_type.is_none() && entry.secondary_item.is_none());
                let specifier = entry
                    .item
                    .as_ref()
                    .and_then(|item| object_specifier(item, None));
                ComputationOutput::new(name, specifier)
            }
            None => return None,
        };
        self.results.write().push(output.clone());
        if self.context.lock().is_some() {
            self.bind_result(&output);
        }
        self.computation_mutated_event.fire(&());
        Some(output)
    }

    /// Re-point a named input at a different item.
    pub fn set_input_item(&self, name: &str, input_item: ComputationItem) {
        let item = input_item
            .item
            .as_ref()
            .expect("set_input_item requires a single item");
        assert!(input_item.items.is_none() && input_item.secondary_item.is_none());
        if let Some(variable) = self.variable(name) {
            variable.set_specifier(object_specifier(item, input_item.specifier_type));
        }
    }

    /// Re-point a named output, or clear it.
    pub fn set_output_item(&self, name: &str, output_item: Option<ComputationItem>) {
        if let Some(output) = self.output(name) {
            match output_item {
                Some(entry) if entry.items.is_some() => {
                    let specifiers: Vec<Specifier> = entry
                        .items
                        .unwrap()
                        .iter()
                        .filter_map(|child| {
                            child
                                .item
                                .as_ref()
                                .and_then(|item| object_specifier(item, None))
                        })
                        .collect();
                    output.set_specifiers(Some(specifiers));
                }
                Some(entry) => {
                    let specifier = entry
                        .item
                        .as_ref()
                        .and_then(|item| object_specifier(item, None));
                    output.set_specifier(specifier);
                }
                None => output.set_specifier(None),
            }
        }
    }

    pub fn get_input(&self, name: &str) -> Option<BoundValue> {
        self.variable(name).and_then(|variable| variable.bound_value())
    }

    /// Current value of a named output's binding.
    pub fn get_referenced_object(&self, name: &str) -> Option<BoundValue> {
        self.output(name).and_then(|output| output.bound_value())
    }

    /// Remove a named output entirely, e.g. when its result disappeared.
    pub fn clear_referenced_object(&self, name: &str) {
        let index = self
            .results
            .read()
            .iter()
            .position(|output| output.name().as_deref() == Some(name));
        if let Some(index) = index {
            let output = self.results.write().remove(index);
            self.unbind_result(&output);
            self.computation_mutated_event.fire(&());
            self.needs_update.store(true, Ordering::SeqCst);
        }
    }

    /// Insert one item into a named list-valued variable.
    pub fn insert_item_into_objects(&self, name: &str, index: usize, input_item: &ComputationItem) {
        let item = input_item
            .item
            .as_ref()
            .expect("list entries are single items");
        let specifier = object_specifier(item, input_item.specifier_type)
            .expect("item kind has no specifier form");
        let variable = self
            .variable(name)
            .expect("no list variable with that name");
        let objects = variable.objects().expect("variable is not list-valued");
        objects.insert(index, specifier);
    }

    /// Remove one entry from a named list-valued variable.
    pub fn remove_item_from_objects(&self, name: &str, index: usize) {
        let variable = self
            .variable(name)
            .expect("no list variable with that name");
        let objects = variable.objects().expect("variable is not list-valued");
        objects.remove(index);
    }

    /// Find the declared variable a `variable`-type specifier names.
    pub fn resolve_variable(&self, specifier: &Specifier) -> Option<Arc<ComputationVariable>> {
        let uuid = specifier.uuid?;
        self.variables
            .read()
            .iter()
            .find(|variable| variable.uuid() == uuid)
            .cloned()
    }

    // --- binding ------------------------------------------------------------

    /// Bind every variable and output against `parent`. Rebinding an
    /// already-bound computation is a programmer error.
    pub fn bind(self: &Arc<Self>, parent: Arc<dyn ResolutionContext>) {
        for variable in self.variables.read().iter() {
            assert!(
                !variable.has_bound_item(),
                "computation bound while a variable is already bound"
            );
        }
        for output in self.results.read().iter() {
            assert!(
                !output.is_bound(),
                "computation bound while an output is already bound"
            );
        }
        *self.context.lock() = Some(Arc::new(ComputationContext::new(self, parent)));

        let variables = self.variables();
        for variable in &variables {
            self.bind_variable(variable);
        }
        let outputs = self.outputs();
        for output in &outputs {
            self.bind_result(output);
        }
    }

    /// Release every binding and stop all notification forwarding. Safe on a
    /// never-bound computation.
    pub fn unbind(&self) {
        for variable in self.variables.read().iter() {
            self.unbind_variable(variable);
        }
        for output in self.results.read().iter() {
            self.unbind_result(output);
        }
        *self.context.lock() = None;
    }

    fn bind_variable(self: &Arc<Self>, variable: &Arc<ComputationVariable>) {
        let mut listeners = Vec::new();

        let weak = Arc::downgrade(self);
        listeners.push(variable.changed_event.listen(move |_| {
            if let Some(computation) = weak.upgrade() {
                computation.needs_update.store(true, Ordering::SeqCst);
                computation.computation_mutated_event.fire(&());
            }
        }));

        let weak = Arc::downgrade(self);
        let variable_for_rebind = variable.clone();
        listeners.push(variable.needs_rebind_event.listen(move |_| {
            if let Some(computation) = weak.upgrade() {
                computation.needs_update.store(true, Ordering::SeqCst);
                computation.unbind_variable(&variable_for_rebind);
                computation.bind_variable(&variable_for_rebind);
            }
        }));

        self.variable_listeners
            .lock()
            .insert(variable.uuid(), listeners);

        let context = self
            .context
            .lock()
            .clone()
            .expect("variable bound without a context");
        let bound = context.resolve(
            variable.variable_specifier().as_ref(),
            variable.secondary_specifier().as_ref(),
            variable.property_name().as_deref(),
            variable.objects(),
        );
        variable.set_bound_item(bound);
    }

    fn unbind_variable(&self, variable: &Arc<ComputationVariable>) {
        if let Some(listeners) = self.variable_listeners.lock().remove(&variable.uuid()) {
            for listener in listeners {
                listener.close();
            }
        }
        variable.set_bound_item(None);
    }

    fn bind_result(self: &Arc<Self>, output: &Arc<ComputationOutput>) {
        let weak = Arc::downgrade(self);
        let output_for_rebind = output.clone();
        let listener = output.needs_rebind_event.listen(move |_| {
            if let Some(computation) = weak.upgrade() {
                computation.unbind_result(&output_for_rebind);
                computation.bind_result(&output_for_rebind);
                computation.computation_output_changed_event.fire(&());
            }
        });
        self.result_listeners.lock().insert(output.uuid(), listener);

        let context = self
            .context
            .lock()
            .clone()
            .expect("output bound without a context");
        output.bind(&|specifier| context.resolve(Some(specifier), None, None, None));
    }

    fn unbind_result(&self, output: &Arc<ComputationOutput>) {
        if let Some(listener) = self.result_listeners.lock().remove(&output.uuid()) {
            listener.close();
        }
        output.unbind();
    }

    // --- resolution state ---------------------------------------------------

    /// True iff every specifier-valued variable has a live bound item and
    /// every output's specifier(s) are fully bound.
    pub fn is_resolved(&self) -> bool {
        for variable in self.variables.read().iter() {
            let needs_binding = variable.specifier().is_some() || variable.is_list();
            if needs_binding && !variable.has_bound_item() {
                return false;
            }
        }
        self.results
            .read()
            .iter()
            .all(|output| output.is_fully_bound())
    }

    /// Flattened set of concrete input entities, for dependency tracking.
    pub fn input_items(&self) -> HashSet<Uuid> {
        let mut uuids = HashSet::new();
        for variable in self.variables.read().iter() {
            uuids.extend(variable.bound_base_objects());
        }
        uuids
    }

    /// Flattened set of concrete output entities.
    pub fn output_items(&self) -> HashSet<Uuid> {
        let mut uuids = HashSet::new();
        for output in self.results.read().iter() {
            uuids.extend(output.bound_uuids());
        }
        uuids
    }

    /// UUIDs referenced by non-list variables and outputs, whether or not
    /// they currently resolve. A delete of any of these cascades to this
    /// computation.
    pub fn direct_reference_uuids(&self) -> HashSet<Uuid> {
        let mut uuids = HashSet::new();
        for variable in self.variables.read().iter() {
            if variable.is_list() {
                continue;
            }
            if let Some(specifier) = variable.specifier() {
                uuids.extend(specifier.uuid);
            }
            if let Some(specifier) = variable.secondary_specifier() {
                uuids.extend(specifier.uuid);
            }
            uuids.extend(variable.bound_base_objects());
        }
        for output in self.results.read().iter() {
            uuids.extend(output.specifier_uuids());
            uuids.extend(output.bound_uuids());
        }
        uuids
    }

    /// UUIDs referenced through list-valued variables; a delete of one of
    /// these shrinks the list instead of removing the computation.
    pub fn list_reference_uuids(&self) -> HashSet<Uuid> {
        let mut uuids = HashSet::new();
        for variable in self.variables.read().iter() {
            if let Some(objects) = variable.objects() {
                for specifier in objects.items() {
                    uuids.extend(specifier.uuid);
                }
            }
        }
        uuids
    }

    /// Remove all list entries referencing `removed_uuid`, returning one
    /// reversible record per removed entry, in removal order.
    pub fn list_item_removed(&self, removed_uuid: Uuid) -> Vec<ListEntryRemoved> {
        let mut entries = Vec::new();
        let variables = self.variables();
        for (variable_index, variable) in variables.iter().enumerate() {
            let Some(objects) = variable.objects() else {
                continue;
            };
            let matching: Vec<usize> = objects
                .items()
                .iter()
                .enumerate()
                .filter(|(_, specifier)| specifier.uuid == Some(removed_uuid))
                .map(|(index, _)| index)
                .collect();
            for list_index in matching.into_iter().rev() {
                let specifier = objects.remove(list_index);
                entries.push(ListEntryRemoved {
                    computation_uuid: self.uuid,
                    variable_index,
                    list_index,
                    specifier,
                });
            }
        }
        if !entries.is_empty() {
            self.needs_update.store(true, Ordering::SeqCst);
        }
        entries
    }

    /// True when some list-valued variable has no entries left.
    pub fn has_empty_list_variable(&self) -> bool {
        self.variables
            .read()
            .iter()
            .any(|variable| variable.objects().is_some_and(|objects| objects.is_empty()))
    }

    // --- evaluation ---------------------------------------------------------

    fn resolve_inputs(&self) -> (ResolvedInputs, bool) {
        let mut inputs = ResolvedInputs::new();
        let mut resolved = true;
        for variable in self.variables.read().iter() {
            let name = variable.name().unwrap_or_else(|| variable.uuid().to_string());
            match variable.bound_value() {
                Some(value) => {
                    inputs.insert(name, value);
                }
                None => resolved = false,
            }
        }
        for output in self.results.read().iter() {
            if !output.is_fully_bound() {
                resolved = false;
            }
        }
        (inputs, resolved)
    }

    /// Evaluate through the transform registry. Idempotent: a second call
    /// without an intervening `mark_update` does nothing.
    pub fn evaluate(&self, registry: &TransformRegistry) -> Evaluation {
        assert!(
            self.is_transform_mode(),
            "evaluate requires a transform-mode computation"
        );
        if !self.needs_update.swap(false, Ordering::SeqCst) {
            return Evaluation::Skipped;
        }
        let (inputs, resolved) = self.resolve_inputs();
        if !resolved {
            return Evaluation::Unresolved;
        }
        let processing_id = self
            .processing_id()
            .expect("transform-mode computation without a processing id");
        let Some(transform) = registry.get(&processing_id) else {
            self.set_error_text(Some(format!("missing transform '{processing_id}'")));
            return Evaluation::Failed;
        };
        self.evaluation_count.fetch_add(1, Ordering::SeqCst);
        *self.last_evaluate_time.lock() = Some(Instant::now());
        match transform.execute(&inputs) {
            Ok(value) => {
                self.set_error_text(None);
                Evaluation::Completed(value)
            }
            Err(error_text) => {
                tracing::debug!(computation = %self.uuid, error = %error_text, "evaluation failed");
                self.set_error_text(Some(error_text));
                Evaluation::Failed
            }
        }
    }

    /// Evaluate the script expression against an existing target object
    /// instead of producing a fresh result.
    pub fn evaluate_with_target(
        &self,
        evaluator: &dyn ScriptEvaluator,
        target: &BoundValue,
    ) -> Evaluation {
        assert!(
            !self.is_transform_mode(),
            "evaluate_with_target requires a script-mode computation"
        );
        if !self.needs_update.swap(false, Ordering::SeqCst) {
            return Evaluation::Skipped;
        }
        let (inputs, resolved) = self.resolve_inputs();
        if !resolved {
            return Evaluation::Unresolved;
        }
        let expression = self
            .expression()
            .expect("script-mode computation without an expression");
        self.evaluation_count.fetch_add(1, Ordering::SeqCst);
        *self.last_evaluate_time.lock() = Some(Instant::now());
        match evaluator.execute_script(&expression, target, &inputs) {
            Ok(()) => {
                self.set_error_text(None);
                Evaluation::Completed(Value::Boolean(true))
            }
            Err(error_text) => {
                self.set_error_text(Some(error_text));
                Evaluation::Failed
            }
        }
    }

    // --- lifecycle ----------------------------------------------------------

    pub(crate) fn about_to_be_removed(&self) {
        self.about_to_be_removed_event.fire(&());
        self.lifecycle.mark_removed();
    }
}

impl PersistentObject for Computation {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> &'static str {
        "computation"
    }

    fn write_to_dict(&self) -> JsonValue {
        let mut dict = base_dict(self.item_type(), self.uuid);
        if let Some(expression) = self.expression() {
            dict.insert(
                "original_expression".to_string(),
                JsonValue::String(expression),
            );
        }
        if let Some(processing_id) = self.processing_id() {
            dict.insert(
                "processing_id".to_string(),
                JsonValue::String(processing_id),
            );
        }
        if let Some(label) = self.label() {
            dict.insert("label".to_string(), JsonValue::String(label));
        }
        if let Some(error_text) = self.error_text() {
            dict.insert("error_text".to_string(), JsonValue::String(error_text));
        }
        if let Some(source_uuid) = self.source_uuid() {
            dict.insert(
                "source_uuid".to_string(),
                JsonValue::String(source_uuid.to_string()),
            );
        }
        dict.insert(
            "variables".to_string(),
            JsonValue::Array(
                self.variables
                    .read()
                    .iter()
                    .map(|variable| variable.write_to_dict())
                    .collect(),
            ),
        );
        dict.insert(
            "results".to_string(),
            JsonValue::Array(
                self.results
                    .read()
                    .iter()
                    .map(|output| output.write_to_dict())
                    .collect(),
            ),
        );
        JsonValue::Object(dict)
    }

    fn read_from_dict(&self, source: &JsonValue) {
        if let Some(expression) = dict::get_string(source, "original_expression") {
            *self.original_expression.write() = Some(expression);
        }
        if let Some(processing_id) = dict::get_string(source, "processing_id") {
            *self.processing_id.write() = Some(processing_id);
            *self.mode.write() = Mode::Transform;
        }
        if let Some(label) = dict::get_string(source, "label") {
            *self.label.write() = Some(label);
        }
        if let Some(error_text) = dict::get_string(source, "error_text") {
            *self.error_text.write() = Some(error_text);
        }
        if let Some(source_uuid) = dict::get_uuid(source, "source_uuid") {
            *self.source_uuid.write() = Some(source_uuid);
        }
        if let Some(entries) = dict::get_array(source, "variables") {
            *self.variables.write() = entries
                .iter()
                .map(ComputationVariable::from_dict)
                .collect();
        }
        if let Some(entries) = dict::get_array(source, "results") {
            *self.results.write() = entries.iter().map(ComputationOutput::from_dict).collect();
        }
        self.needs_update.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_variable_marks_update_and_notifies() {
        let computation = Computation::new_with_processing("multiply");
        let inserted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let inserted_clone = inserted.clone();
        let _listener = computation.variable_inserted_event.listen(move |_| {
            inserted_clone.fetch_add(1, Ordering::SeqCst);
        });
        computation.create_variable("k", ValueKind::Integral, Some(Value::Integral(2)));
        assert_eq!(inserted.load(Ordering::SeqCst), 1);
        assert!(computation.needs_update());
        assert!(computation.variable("k").is_some());
    }

    #[test]
    fn remove_variable_notifies_with_index() {
        let computation = Computation::new_with_processing("multiply");
        let first = computation.create_variable("a", ValueKind::Integral, None);
        let second = computation.create_variable("b", ValueKind::Integral, None);
        let removed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let removed_clone = removed.clone();
        let _listener = computation
            .variable_removed_event
            .listen(move |(index, _)| {
                removed_clone.lock().push(*index);
            });
        computation.remove_variable(&first);
        assert_eq!(removed.lock().as_slice(), [0]);
        assert!(computation.variable("a").is_none());
        computation.remove_variable(&second);
    }

    #[test]
    #[should_panic(expected = "does not own")]
    fn removing_foreign_variable_panics() {
        let computation = Computation::new_with_processing("multiply");
        let foreign = ComputationVariable::new_scalar("x", ValueKind::Integral, None);
        computation.remove_variable(&foreign);
    }

    #[test]
    #[should_panic(expected = "transform-mode")]
    fn evaluate_in_script_mode_panics() {
        let computation = Computation::new_with_expression("target.data = a");
        computation.evaluate(&TransformRegistry::new());
    }

    #[test]
    fn dict_round_trip_preserves_mode_and_slots() {
        let computation = Computation::new_with_processing("multiply");
        computation.set_label(Some("Multiply"));
        computation.create_variable("k", ValueKind::Integral, Some(Value::Integral(2)));
        let copy = Computation::from_dict(&computation.write_to_dict());
        assert_eq!(copy.uuid(), computation.uuid());
        assert!(copy.is_transform_mode());
        assert_eq!(copy.processing_id().as_deref(), Some("multiply"));
        assert_eq!(copy.variables().len(), 1);
        assert_eq!(
            copy.variable("k").unwrap().value(),
            Some(Value::Integral(2))
        );
        assert!(copy.needs_update());
    }

    #[test]
    fn mark_update_fires_mutated() {
        let computation = Computation::new_with_processing("multiply");
        let mutated = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mutated_clone = mutated.clone();
        let _listener = computation.computation_mutated_event.listen(move |_| {
            mutated_clone.fetch_add(1, Ordering::SeqCst);
        });
        computation.mark_update();
        assert_eq!(mutated.load(Ordering::SeqCst), 1);
        assert!(computation.needs_update());
    }
}
