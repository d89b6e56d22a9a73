//! Transform registry and evaluator contracts
//!
//! The kernel never parses or executes expressions itself. Transform-mode
//! computations dispatch through a [`TransformRegistry`] keyed by processing
//! id; script-mode computations hand their expression to a
//! [`ScriptEvaluator`]. Either way the outcome is a result or an error text,
//! applied back onto the computation by the caller.
//!
//! The registry is built once at startup and injected into evaluation calls;
//! a process-wide copy can be installed for hosts that want ambient lookup,
//! but the computation entity itself never reads global state.

use crate::binding::BoundValue;
use crate::error::RegistryError;
use crate::values::Value;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved keyword inputs passed to a transform, in variable order.
pub type ResolvedInputs = IndexMap<String, BoundValue>;

/// A registered implementation of one processing id.
pub trait Transform: Send + Sync {
    /// Execute with fully resolved inputs; returns the result value or a
    /// user-visible error text.
    fn execute(&self, inputs: &ResolvedInputs) -> Result<Value, String>;
}

/// Executes script-mode computations against a supplied target.
pub trait ScriptEvaluator: Send + Sync {
    /// Run `expression` with the resolved inputs, mutating `target`; returns
    /// a user-visible error text on failure.
    fn execute_script(
        &self,
        expression: &str,
        target: &BoundValue,
        inputs: &ResolvedInputs,
    ) -> Result<(), String>;
}

/// Table of transform implementations keyed by processing id.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform. Each processing id is registered exactly once.
    pub fn register(
        &mut self,
        processing_id: &str,
        transform: Arc<dyn Transform>,
    ) -> Result<(), RegistryError> {
        if self.transforms.contains_key(processing_id) {
            return Err(RegistryError::AlreadyRegistered(processing_id.to_string()));
        }
        self.transforms.insert(processing_id.to_string(), transform);
        Ok(())
    }

    pub fn get(&self, processing_id: &str) -> Option<&Arc<dyn Transform>> {
        self.transforms.get(processing_id)
    }

    pub fn contains(&self, processing_id: &str) -> bool {
        self.transforms.contains_key(processing_id)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

static GLOBAL_REGISTRY: OnceCell<TransformRegistry> = OnceCell::new();

/// Install the process-wide registry. Done once at startup, read-only after.
pub fn install_registry(registry: TransformRegistry) -> Result<(), RegistryError> {
    GLOBAL_REGISTRY
        .set(registry)
        .map_err(|_| RegistryError::AlreadyInstalled)
}

/// The installed process-wide registry, if any.
pub fn installed_registry() -> Option<&'static TransformRegistry> {
    GLOBAL_REGISTRY.get()
}
