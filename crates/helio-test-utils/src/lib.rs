//! Testing utilities for the Helio workspace
//!
//! Shared fixtures: project builders, recording transforms, and a trivial
//! script evaluator.

#![allow(missing_docs)]

use helio_kernel::registry::ResolvedInputs;
use helio_kernel::{
    BoundValue, DataItem, Project, ScriptEvaluator, Transform, TransformRegistry, Value,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Extract the effective scalar value of one resolved input: a scalar
/// directly, or the data payload of a referenced data item or facet.
pub fn input_value(input: &BoundValue) -> Option<Value> {
    if let Some(value) = input.as_scalar() {
        return Some(value.clone());
    }
    input.data_item().and_then(|item| item.data())
}

/// Transform computing `a * k`, counting its invocations.
#[derive(Default)]
pub struct MultiplyTransform {
    calls: AtomicU64,
}

impl MultiplyTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transform for MultiplyTransform {
    fn execute(&self, inputs: &ResolvedInputs) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let a = inputs
            .get("a")
            .and_then(input_value)
            .and_then(|value| value.as_f64())
            .ok_or_else(|| "input 'a' has no numeric value".to_string())?;
        let k = inputs
            .get("k")
            .and_then(input_value)
            .and_then(|value| value.as_f64())
            .ok_or_else(|| "input 'k' has no numeric value".to_string())?;
        Ok(Value::Real(a * k))
    }
}

/// Transform that always fails with a fixed message.
pub struct FailingTransform {
    pub message: String,
}

impl FailingTransform {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl Transform for FailingTransform {
    fn execute(&self, _inputs: &ResolvedInputs) -> Result<Value, String> {
        Err(self.message.clone())
    }
}

/// Build a registry with one transform registered.
pub fn registry_with(processing_id: &str, transform: Arc<dyn Transform>) -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry
        .register(processing_id, transform)
        .expect("fresh registry");
    registry
}

/// Script evaluator that sums the numeric inputs into the target data item,
/// counting invocations.
#[derive(Default)]
pub struct SummingScriptEvaluator {
    calls: AtomicU64,
}

impl SummingScriptEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScriptEvaluator for SummingScriptEvaluator {
    fn execute_script(
        &self,
        _expression: &str,
        target: &BoundValue,
        inputs: &ResolvedInputs,
    ) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target_item = target
            .data_item()
            .ok_or_else(|| "target is not a data item".to_string())?;
        let sum: f64 = inputs
            .values()
            .filter_map(input_value)
            .filter_map(|value| value.as_f64())
            .sum();
        target_item.set_data(Some(Value::Real(sum)));
        Ok(())
    }
}

/// A project with one data item holding the given value.
pub fn project_with_data_item(value: Value) -> (Arc<Project>, Arc<DataItem>) {
    let project = Project::new();
    let item = DataItem::new();
    item.set_data(Some(value));
    project.append_data_item(item.clone());
    (project, item)
}
