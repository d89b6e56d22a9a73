//! Dependency tracking for cascade deletion
//!
//! A small directed graph over entity UUIDs: an edge `target → dependent`
//! records that `dependent` must be removed before `target` can go. The
//! project rebuilds this on demand from the derived dependency surface
//! (computation inputs/outputs, structure references, provenance links)
//! rather than maintaining stored back-pointers.

use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraphMap<Uuid, ()>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, uuid: Uuid) {
        self.graph.add_node(uuid);
    }

    /// Record that `dependent` depends on `target`.
    pub fn add_dependency(&mut self, target: Uuid, dependent: Uuid) {
        if target != dependent {
            self.graph.add_edge(target, dependent, ());
        }
    }

    pub fn dependents_of(&self, uuid: Uuid) -> Vec<Uuid> {
        self.graph
            .neighbors_directed(uuid, Direction::Outgoing)
            .collect()
    }

    /// Order `members` so every entity is removed before anything it depends
    /// on: dependents first, dependency targets last. Entities tangled in a
    /// reference cycle keep their relative insertion order.
    pub fn removal_order(&self, members: &[Uuid]) -> Vec<Uuid> {
        let member_set: HashSet<Uuid> = members.iter().copied().collect();
        let mut remaining: Vec<Uuid> = members.to_vec();
        let mut removed: HashSet<Uuid> = HashSet::new();
        let mut order = Vec::with_capacity(members.len());
        while !remaining.is_empty() {
            // removable: all member dependents already removed
            let position = remaining.iter().position(|&uuid| {
                self.graph
                    .neighbors_directed(uuid, Direction::Outgoing)
                    .all(|dependent| {
                        !member_set.contains(&dependent) || removed.contains(&dependent)
                    })
            });
            let index = position.unwrap_or(0);
            let uuid = remaining.remove(index);
            removed.insert(uuid);
            order.push(uuid);
        }
        order
    }
}
