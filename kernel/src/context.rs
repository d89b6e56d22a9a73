//! Resolution contexts
//!
//! A resolution context turns specifiers into bound items. Contexts compose:
//! a computation-local context first checks whether the specifier names one
//! of the computation's own declared variables (exposed as a scalar
//! passthrough) and otherwise delegates to the project-wide context, which
//! dispatches on the specifier's type tag.
//!
//! Resolution is pure with respect to store state, and unknown or dangling
//! targets resolve to `None`; failed resolution is a normal state, never an
//! error.

use crate::binding::{BoundItem, BoundList};
use crate::computation::Computation;
use crate::specifier::Specifier;
use helio_notify::ObservableList;
use std::sync::{Arc, Weak};

/// Resolves specifiers to live bound items against the current store state.
pub trait ResolutionContext: Send + Sync {
    /// Resolve `specifier` (or, when `objects` is given, the whole specifier
    /// list as one aggregate binding).
    fn resolve(
        &self,
        specifier: Option<&Specifier>,
        secondary_specifier: Option<&Specifier>,
        property_name: Option<&str>,
        objects: Option<&Arc<ObservableList<Specifier>>>,
    ) -> Option<Box<dyn BoundItem>>;
}

/// Context scoped to one computation, chaining to a parent context.
pub struct ComputationContext {
    computation: Weak<Computation>,
    parent: Arc<dyn ResolutionContext>,
}

impl ComputationContext {
    pub fn new(computation: &Arc<Computation>, parent: Arc<dyn ResolutionContext>) -> Self {
        Self {
            computation: Arc::downgrade(computation),
            parent,
        }
    }
}

impl ResolutionContext for ComputationContext {
    fn resolve(
        &self,
        specifier: Option<&Specifier>,
        secondary_specifier: Option<&Specifier>,
        property_name: Option<&str>,
        objects: Option<&Arc<ObservableList<Specifier>>>,
    ) -> Option<Box<dyn BoundItem>> {
        if let Some(objects) = objects {
            // aggregate list binding; every entry must resolve
            let mut items = Vec::new();
            for entry in objects.items() {
                items.push(self.resolve(Some(&entry), None, None, None)?);
            }
            return Some(Box::new(BoundList::new(items)));
        }
        let specifier = specifier?;
        let computation = self.computation.upgrade()?;
        match computation.resolve_variable(specifier) {
            Some(variable) if variable.specifier().is_none() && !variable.is_list() => {
                Some(variable.bound_variable())
            }
            Some(_) => None,
            None => self
                .parent
                .resolve(Some(specifier), secondary_specifier, property_name, None),
        }
    }
}
