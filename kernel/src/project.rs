//! Project: the persistent store and container of record
//!
//! Every insertion and removal goes through the project so dependency
//! bookkeeping stays centralized. Ownership is strictly downward: the
//! project owns its entities in insertion-ordered UUID arenas, entities own
//! their parts, and everything else is a UUID-based specifier resolved on
//! demand. Removal notifies the entity and its watchers first, collects
//! every cascade-dependent entity, removes dependents before their targets,
//! and records one reversible entry per removal in an [`UndeleteLog`].

use crate::binding::{BoundDataSource, BoundItem, BoundList, BoundObject, BoundProperty, FacetKind};
use crate::changes::{DataItemRemovedRecord, ItemRemovedRecord, ListEntryRemovedRecord, UndeleteLog};
use crate::computation::Computation;
use crate::connection::Connection;
use crate::context::ResolutionContext;
use crate::dependency::DependencyGraph;
use crate::error::ProjectError;
use crate::items::{DataItem, DisplayDataChannel, DisplayItem, Graphic, ProjectItem};
use crate::pending::{ChangedQueue, DEFAULT_CAPACITY};
use crate::specifier::{Specifier, SpecifierType};
use crate::structure::DataStructure;
use crate::values::Collection;
use crate::variable::ComputationVariable;
use helio_notify::{Event, ObservableList};
use helio_persist::{MemoryStorageSystem, PersistentObject, StorageSystem};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Payload of the project's insert/remove notifications.
#[derive(Clone)]
pub struct ItemChange {
    pub collection: Collection,
    pub item: ProjectItem,
    pub index: usize,
}

/// The container of record for data items, display items, data structures,
/// computations, and connections.
pub struct Project {
    uuid: Uuid,
    storage: Arc<dyn StorageSystem>,
    data_items: RwLock<IndexMap<Uuid, Arc<DataItem>>>,
    display_items: RwLock<IndexMap<Uuid, Arc<DisplayItem>>>,
    data_structures: RwLock<IndexMap<Uuid, Arc<DataStructure>>>,
    computations: RwLock<IndexMap<Uuid, Arc<Computation>>>,
    connections: RwLock<IndexMap<Uuid, Arc<Connection>>>,
    removing: Mutex<HashSet<Uuid>>,
    changed_queue: ChangedQueue,
    pub item_inserted_event: Event<ItemChange>,
    pub item_removed_event: Event<ItemChange>,
}

impl Project {
    pub fn new() -> Arc<Self> {
        Self::with_storage(Arc::new(MemoryStorageSystem::new()))
    }

    pub fn with_storage(storage: Arc<dyn StorageSystem>) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            storage,
            data_items: RwLock::new(IndexMap::new()),
            display_items: RwLock::new(IndexMap::new()),
            data_structures: RwLock::new(IndexMap::new()),
            computations: RwLock::new(IndexMap::new()),
            connections: RwLock::new(IndexMap::new()),
            removing: Mutex::new(HashSet::new()),
            changed_queue: ChangedQueue::with_capacity(DEFAULT_CAPACITY),
            item_inserted_event: Event::new(),
            item_removed_event: Event::new(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn storage(&self) -> &Arc<dyn StorageSystem> {
        &self.storage
    }

    // --- lookups ------------------------------------------------------------

    pub fn data_items(&self) -> Vec<Arc<DataItem>> {
        self.data_items.read().values().cloned().collect()
    }

    pub fn display_items(&self) -> Vec<Arc<DisplayItem>> {
        self.display_items.read().values().cloned().collect()
    }

    pub fn data_structures(&self) -> Vec<Arc<DataStructure>> {
        self.data_structures.read().values().cloned().collect()
    }

    pub fn computations(&self) -> Vec<Arc<Computation>> {
        self.computations.read().values().cloned().collect()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn data_item(&self, uuid: Uuid) -> Option<Arc<DataItem>> {
        self.data_items.read().get(&uuid).cloned()
    }

    pub fn display_item(&self, uuid: Uuid) -> Option<Arc<DisplayItem>> {
        self.display_items.read().get(&uuid).cloned()
    }

    pub fn data_structure(&self, uuid: Uuid) -> Option<Arc<DataStructure>> {
        self.data_structures.read().get(&uuid).cloned()
    }

    pub fn computation(&self, uuid: Uuid) -> Option<Arc<Computation>> {
        self.computations.read().get(&uuid).cloned()
    }

    pub fn connection(&self, uuid: Uuid) -> Option<Arc<Connection>> {
        self.connections.read().get(&uuid).cloned()
    }

    // the find_* lookups skip owners that are mid-removal so a rebind racing
    // a cascade resolves to nothing instead of a dying facet

    fn find_channel(&self, uuid: Uuid) -> Option<(Arc<DisplayItem>, Arc<DisplayDataChannel>)> {
        for display_item in self.display_items.read().values() {
            if self.is_removing(display_item.uuid()) {
                continue;
            }
            for channel in display_item.display_data_channels() {
                if channel.uuid() == uuid {
                    return Some((display_item.clone(), channel));
                }
            }
        }
        None
    }

    fn find_graphic(&self, uuid: Uuid) -> Option<Arc<Graphic>> {
        for display_item in self.display_items.read().values() {
            if self.is_removing(display_item.uuid()) {
                continue;
            }
            for graphic in display_item.graphics() {
                if graphic.uuid() == uuid {
                    return Some(graphic);
                }
            }
        }
        None
    }

    fn find_variable(&self, uuid: Uuid) -> Option<Arc<ComputationVariable>> {
        for computation in self.computations.read().values() {
            if self.is_removing(computation.uuid()) {
                continue;
            }
            if let Some(variable) = computation
                .variables()
                .into_iter()
                .find(|variable| variable.uuid() == uuid)
            {
                return Some(variable);
            }
        }
        None
    }

    /// Any item (top-level or facet) by UUID.
    pub fn item(&self, uuid: Uuid) -> Option<ProjectItem> {
        if let Some(item) = self.data_item(uuid) {
            return Some(ProjectItem::Data(item));
        }
        if let Some(item) = self.display_item(uuid) {
            return Some(ProjectItem::Display(item));
        }
        if let Some((_, channel)) = self.find_channel(uuid) {
            return Some(ProjectItem::Channel(channel));
        }
        if let Some(graphic) = self.find_graphic(uuid) {
            return Some(ProjectItem::Graphic(graphic));
        }
        if let Some(item) = self.data_structure(uuid) {
            return Some(ProjectItem::Structure(item));
        }
        if let Some(item) = self.computation(uuid) {
            return Some(ProjectItem::Computation(item));
        }
        if let Some(item) = self.connection(uuid) {
            return Some(ProjectItem::Connection(item));
        }
        None
    }

    fn is_removing(&self, uuid: Uuid) -> bool {
        self.removing.lock().contains(&uuid)
    }

    /// Project-wide resolution context.
    pub fn resolution_context(self: &Arc<Self>) -> Arc<dyn ResolutionContext> {
        Arc::new(ProjectContext {
            project: Arc::downgrade(self),
        })
    }

    // --- insertion ----------------------------------------------------------

    pub fn append_data_item(self: &Arc<Self>, item: Arc<DataItem>) {
        self.insert_data_item_at(None, item);
    }

    fn insert_data_item_at(self: &Arc<Self>, index: Option<usize>, item: Arc<DataItem>) {
        let uuid = PersistentObject::uuid(&*item);
        assert!(
            self.data_items.read().get(&uuid).is_none(),
            "duplicate data item uuid"
        );
        item.lifecycle.mark_inserted();
        let index = insert_at(&self.data_items, index, uuid, item.clone());
        self.storage.write_item(uuid, item.write_to_dict());
        self.item_inserted_event.fire(&ItemChange {
            collection: Collection::DataItems,
            item: ProjectItem::Data(item),
            index,
        });
        self.resolve_new_targets(&[uuid]);
    }

    pub fn append_display_item(self: &Arc<Self>, item: Arc<DisplayItem>) {
        self.insert_display_item_at(None, item);
    }

    fn insert_display_item_at(self: &Arc<Self>, index: Option<usize>, item: Arc<DisplayItem>) {
        let uuid = PersistentObject::uuid(&*item);
        assert!(
            self.display_items.read().get(&uuid).is_none(),
            "duplicate display item uuid"
        );
        item.lifecycle.mark_inserted();
        let index = insert_at(&self.display_items, index, uuid, item.clone());
        self.item_inserted_event.fire(&ItemChange {
            collection: Collection::DisplayItems,
            item: ProjectItem::Display(item.clone()),
            index,
        });
        let mut uuids = vec![uuid];
        uuids.extend(item.display_data_channels().iter().map(|channel| channel.uuid()));
        uuids.extend(item.graphics().iter().map(|graphic| graphic.uuid()));
        self.resolve_new_targets(&uuids);
    }

    pub fn append_data_structure(self: &Arc<Self>, structure: Arc<DataStructure>) {
        self.insert_data_structure_at(None, structure);
    }

    fn insert_data_structure_at(
        self: &Arc<Self>,
        index: Option<usize>,
        structure: Arc<DataStructure>,
    ) {
        let uuid = PersistentObject::uuid(&*structure);
        assert!(
            self.data_structures.read().get(&uuid).is_none(),
            "duplicate data structure uuid"
        );
        structure.lifecycle.mark_inserted();
        let index = insert_at(&self.data_structures, index, uuid, structure.clone());
        // fill reference proxies for targets already in the store
        for referenced in structure.referenced_uuids() {
            for name in structure.dangling_reference_properties(referenced) {
                structure.set_reference_proxy_item(&name, self.item(referenced));
            }
        }
        self.item_inserted_event.fire(&ItemChange {
            collection: Collection::DataStructures,
            item: ProjectItem::Structure(structure),
            index,
        });
        self.resolve_new_targets(&[uuid]);
    }

    pub fn append_computation(self: &Arc<Self>, computation: Arc<Computation>) {
        self.insert_computation_at(None, computation);
    }

    fn insert_computation_at(
        self: &Arc<Self>,
        index: Option<usize>,
        computation: Arc<Computation>,
    ) {
        let uuid = PersistentObject::uuid(&*computation);
        assert!(
            self.computations.read().get(&uuid).is_none(),
            "duplicate computation uuid"
        );
        computation.lifecycle.mark_inserted();
        let index = insert_at(&self.computations, index, uuid, computation.clone());
        computation.bind(self.resolution_context());
        self.item_inserted_event.fire(&ItemChange {
            collection: Collection::Computations,
            item: ProjectItem::Computation(computation.clone()),
            index,
        });
        // declared variables are referenceable from other computations
        let mut uuids = vec![uuid];
        uuids.extend(
            computation
                .variables()
                .iter()
                .map(|variable| variable.uuid()),
        );
        self.resolve_new_targets(&uuids);
    }

    pub fn append_connection(self: &Arc<Self>, connection: Arc<Connection>) {
        self.insert_connection_at(None, connection);
    }

    fn insert_connection_at(self: &Arc<Self>, index: Option<usize>, connection: Arc<Connection>) {
        let uuid = PersistentObject::uuid(&*connection);
        assert!(
            self.connections.read().get(&uuid).is_none(),
            "duplicate connection uuid"
        );
        connection.lifecycle.mark_inserted();
        let index = insert_at(&self.connections, index, uuid, connection.clone());
        self.bind_connection(&connection);
        self.item_inserted_event.fire(&ItemChange {
            collection: Collection::Connections,
            item: ProjectItem::Connection(connection),
            index,
        });
    }

    fn bind_connection(&self, connection: &Arc<Connection>) {
        let source = connection.source_uuid().and_then(|uuid| self.item(uuid));
        let target = connection.target_uuid().and_then(|uuid| self.item(uuid));
        if let (Some(source), Some(target)) = (source, target) {
            connection.bind(&source, &target);
        }
    }

    /// Re-resolve anything that dangles on the just-inserted UUIDs: exactly
    /// the variables, outputs, proxies, and connections naming them.
    fn resolve_new_targets(self: &Arc<Self>, uuids: &[Uuid]) {
        for computation in self.computations() {
            for variable in computation.variables() {
                if variable.has_bound_item() {
                    continue;
                }
                let references = variable
                    .specifier()
                    .and_then(|specifier| specifier.uuid)
                    .is_some_and(|uuid| uuids.contains(&uuid))
                    || variable.objects().is_some_and(|objects| {
                        objects
                            .items()
                            .iter()
                            .any(|specifier| specifier.uuid.is_some_and(|uuid| uuids.contains(&uuid)))
                    });
                if references {
                    variable.needs_rebind_event.fire(&());
                }
            }
            for output in computation.outputs() {
                if !output.is_fully_bound()
                    && output
                        .specifier_uuids()
                        .iter()
                        .any(|uuid| uuids.contains(uuid))
                {
                    output.needs_rebind_event.fire(&());
                }
            }
        }
        for structure in self.data_structures() {
            for &uuid in uuids {
                for name in structure.dangling_reference_properties(uuid) {
                    structure.set_reference_proxy_item(&name, self.item(uuid));
                }
            }
        }
        for connection in self.connections() {
            if !connection.is_bound()
                && connection
                    .endpoint_uuids()
                    .iter()
                    .any(|uuid| uuids.contains(uuid))
            {
                self.bind_connection(&connection);
            }
        }
    }

    // --- background change hand-off ----------------------------------------

    /// Mark an item changed from any thread; drained by the single mutator.
    pub fn mark_item_changed(&self, uuid: Uuid) {
        self.changed_queue.mark(uuid);
    }

    /// Drain pending change marks and deliver the notifications on the
    /// mutating path. Call before evaluating.
    pub fn drain_changed(&self) {
        let batch = self.changed_queue.drain();
        if batch.overflowed {
            for computation in self.computations() {
                computation.mark_update();
            }
            return;
        }
        for uuid in batch.uuids {
            if let Some(item) = self.data_item(uuid) {
                item.data_changed_event.fire(&());
            }
        }
    }

    // --- removal and cascade ------------------------------------------------

    /// Remove a data item and everything that transitively depends on it.
    pub fn remove_data_item(self: &Arc<Self>, item: &Arc<DataItem>) -> UndeleteLog {
        let uuid = PersistentObject::uuid(&**item);
        assert!(
            self.data_items.read().contains_key(&uuid),
            "data item not in this project"
        );
        self.cascade_remove(uuid)
    }

    pub fn remove_display_item(self: &Arc<Self>, item: &Arc<DisplayItem>) -> UndeleteLog {
        let uuid = PersistentObject::uuid(&**item);
        assert!(
            self.display_items.read().contains_key(&uuid),
            "display item not in this project"
        );
        self.cascade_remove(uuid)
    }

    pub fn remove_data_structure(self: &Arc<Self>, structure: &Arc<DataStructure>) -> UndeleteLog {
        let uuid = PersistentObject::uuid(&**structure);
        assert!(
            self.data_structures.read().contains_key(&uuid),
            "data structure not in this project"
        );
        self.cascade_remove(uuid)
    }

    pub fn remove_computation(self: &Arc<Self>, computation: &Arc<Computation>) -> UndeleteLog {
        let uuid = PersistentObject::uuid(&**computation);
        assert!(
            self.computations.read().contains_key(&uuid),
            "computation not in this project"
        );
        self.cascade_remove(uuid)
    }

    pub fn remove_connection(self: &Arc<Self>, connection: &Arc<Connection>) -> UndeleteLog {
        let uuid = PersistentObject::uuid(&**connection);
        assert!(
            self.connections.read().contains_key(&uuid),
            "connection not in this project"
        );
        self.cascade_remove(uuid)
    }

    /// UUIDs other entities may use to reference `uuid`, including owned
    /// facets (display channels and graphics) and declared variables.
    fn reference_keys(&self, uuid: Uuid) -> Vec<Uuid> {
        let mut keys = vec![uuid];
        if let Some(display_item) = self.display_item(uuid) {
            keys.extend(
                display_item
                    .display_data_channels()
                    .iter()
                    .map(|channel| channel.uuid()),
            );
            keys.extend(display_item.graphics().iter().map(|graphic| graphic.uuid()));
        }
        if let Some(computation) = self.computation(uuid) {
            keys.extend(
                computation
                    .variables()
                    .iter()
                    .map(|variable| variable.uuid()),
            );
        }
        keys
    }

    /// What `uuid` itself depends on, for ordering the removals.
    fn dependency_uuids(&self, uuid: Uuid) -> Vec<Uuid> {
        if let Some(item) = self.data_item(uuid) {
            return item.source_uuid().into_iter().collect();
        }
        if let Some(item) = self.display_item(uuid) {
            return item.data_item_uuids();
        }
        if let Some(structure) = self.data_structure(uuid) {
            return structure.referenced_uuids();
        }
        if let Some(computation) = self.computation(uuid) {
            let mut uuids: Vec<Uuid> = computation.direct_reference_uuids().into_iter().collect();
            uuids.extend(computation.list_reference_uuids());
            uuids.extend(computation.source_uuid());
            return uuids;
        }
        if let Some(connection) = self.connection(uuid) {
            return connection.endpoint_uuids();
        }
        Vec::new()
    }

    fn is_cascade_dependent(&self, candidate: Uuid, keys: &HashSet<Uuid>) -> bool {
        if let Some(item) = self.data_item(candidate) {
            return item.source_uuid().is_some_and(|source| keys.contains(&source));
        }
        if let Some(item) = self.display_item(candidate) {
            return item
                .data_item_uuids()
                .iter()
                .any(|uuid| keys.contains(uuid));
        }
        if let Some(structure) = self.data_structure(candidate) {
            return structure
                .referenced_uuids()
                .iter()
                .any(|uuid| keys.contains(uuid));
        }
        if let Some(computation) = self.computation(candidate) {
            if computation
                .direct_reference_uuids()
                .iter()
                .any(|uuid| keys.contains(uuid))
            {
                return true;
            }
            if computation
                .source_uuid()
                .is_some_and(|source| keys.contains(&source))
            {
                return true;
            }
            // a list variable about to lose its last entries takes the
            // computation with it
            return computation.variables().iter().any(|variable| {
                variable.objects().is_some_and(|objects| {
                    let items = objects.items();
                    !items.is_empty()
                        && items
                            .iter()
                            .all(|specifier| specifier.uuid.is_some_and(|uuid| keys.contains(&uuid)))
                })
            });
        }
        if let Some(connection) = self.connection(candidate) {
            return connection
                .endpoint_uuids()
                .iter()
                .any(|uuid| keys.contains(uuid));
        }
        false
    }

    fn all_entity_uuids(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self.data_items.read().keys().copied().collect();
        uuids.extend(self.display_items.read().keys());
        uuids.extend(self.data_structures.read().keys());
        uuids.extend(self.computations.read().keys());
        uuids.extend(self.connections.read().keys());
        uuids
    }

    fn cascade_remove(self: &Arc<Self>, target: Uuid) -> UndeleteLog {
        // collect cascade members to a fixpoint
        let mut members: Vec<Uuid> = vec![target];
        loop {
            let mut keys: HashSet<Uuid> = HashSet::new();
            let mut key_owner: HashMap<Uuid, Uuid> = HashMap::new();
            for &member in &members {
                for key in self.reference_keys(member) {
                    keys.insert(key);
                    key_owner.insert(key, member);
                }
            }
            let mut changed = false;
            for candidate in self.all_entity_uuids() {
                if members.contains(&candidate) {
                    continue;
                }
                if self.is_cascade_dependent(candidate, &keys) {
                    members.push(candidate);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // map each referenceable key to its owning member for ordering edges
        let mut keys: HashSet<Uuid> = HashSet::new();
        let mut key_owner: HashMap<Uuid, Uuid> = HashMap::new();
        for &member in &members {
            for key in self.reference_keys(member) {
                keys.insert(key);
                key_owner.insert(key, member);
            }
        }
        let mut graph = DependencyGraph::new();
        for &member in &members {
            graph.add_node(member);
        }
        for &member in &members {
            for dependency in self.dependency_uuids(member) {
                if let Some(&owner) = key_owner.get(&dependency) {
                    graph.add_dependency(owner, member);
                }
            }
        }
        let order = graph.removal_order(&members);

        tracing::debug!(target_uuid = %target, cascade = order.len(), "cascade remove");

        let log = UndeleteLog::new();

        // shrink list variables of surviving computations first, so the
        // reversed replay re-inserts entries after their targets return
        let member_set: HashSet<Uuid> = members.iter().copied().collect();
        for computation in self.computations() {
            if member_set.contains(&PersistentObject::uuid(&*computation)) {
                continue;
            }
            for &key in &keys {
                for entry in computation.list_item_removed(key) {
                    log.append(Box::new(ListEntryRemovedRecord { entry }));
                }
            }
        }

        for uuid in order {
            self.remove_single(uuid, &log);
        }
        log
    }

    fn remove_single(self: &Arc<Self>, uuid: Uuid, log: &UndeleteLog) {
        self.removing.lock().insert(uuid);
        if let Some(item) = self.data_item(uuid) {
            // refresh the stored dict so the trash copy matches current state
            self.storage.write_item(uuid, item.write_to_dict());
            item.about_to_be_removed();
            let (index, ..) = self
                .data_items
                .write()
                .shift_remove_full(&uuid)
                .expect("data item vanished during removal");
            self.storage.remove_item(uuid);
            log.append(Box::new(DataItemRemovedRecord { uuid, index }));
            self.finish_removal(uuid, Collection::DataItems, ProjectItem::Data(item), index);
        } else if let Some(item) = self.display_item(uuid) {
            let snapshot = item.write_to_dict();
            item.about_to_be_removed();
            let (index, ..) = self
                .display_items
                .write()
                .shift_remove_full(&uuid)
                .expect("display item vanished during removal");
            log.append(Box::new(ItemRemovedRecord {
                collection: Collection::DisplayItems,
                index,
                snapshot,
            }));
            self.finish_removal(
                uuid,
                Collection::DisplayItems,
                ProjectItem::Display(item),
                index,
            );
        } else if let Some(structure) = self.data_structure(uuid) {
            let snapshot = structure.write_to_dict();
            structure.about_to_be_removed();
            let (index, ..) = self
                .data_structures
                .write()
                .shift_remove_full(&uuid)
                .expect("data structure vanished during removal");
            log.append(Box::new(ItemRemovedRecord {
                collection: Collection::DataStructures,
                index,
                snapshot,
            }));
            self.finish_removal(
                uuid,
                Collection::DataStructures,
                ProjectItem::Structure(structure),
                index,
            );
        } else if let Some(computation) = self.computation(uuid) {
            let snapshot = computation.write_to_dict();
            computation.about_to_be_removed();
            computation.unbind();
            let (index, ..) = self
                .computations
                .write()
                .shift_remove_full(&uuid)
                .expect("computation vanished during removal");
            log.append(Box::new(ItemRemovedRecord {
                collection: Collection::Computations,
                index,
                snapshot,
            }));
            self.finish_removal(
                uuid,
                Collection::Computations,
                ProjectItem::Computation(computation),
                index,
            );
        } else if let Some(connection) = self.connection(uuid) {
            let snapshot = connection.write_to_dict();
            connection.about_to_be_removed();
            connection.unbind();
            let (index, ..) = self
                .connections
                .write()
                .shift_remove_full(&uuid)
                .expect("connection vanished during removal");
            log.append(Box::new(ItemRemovedRecord {
                collection: Collection::Connections,
                index,
                snapshot,
            }));
            self.finish_removal(
                uuid,
                Collection::Connections,
                ProjectItem::Connection(connection),
                index,
            );
        } else {
            panic!("removal of an entity not present in this project");
        }
    }

    fn finish_removal(&self, uuid: Uuid, collection: Collection, item: ProjectItem, index: usize) {
        for structure in self.data_structures() {
            structure.clear_proxies_for(uuid);
        }
        self.item_removed_event.fire(&ItemChange {
            collection,
            item,
            index,
        });
        self.removing.lock().remove(&uuid);
    }

    // --- undo ---------------------------------------------------------------

    /// Rebuild an entity from a snapshot and re-insert it at its old index.
    /// Used by undo replay for everything except data items.
    pub(crate) fn undelete_from_snapshot(
        self: &Arc<Self>,
        collection: Collection,
        index: usize,
        snapshot: &JsonValue,
    ) {
        let uuid = helio_persist::dict::get_uuid(snapshot, "uuid")
            .expect("undelete snapshot without a uuid");
        match collection {
            Collection::DataItems => unreachable!("data items restore from storage"),
            Collection::DisplayItems => {
                let item = DisplayItem::with_uuid(uuid);
                item.read_from_dict(snapshot);
                self.insert_display_item_at(Some(index), item);
            }
            Collection::DataStructures => {
                let structure = DataStructure::with_uuid(uuid, "");
                structure.read_from_dict(snapshot);
                self.insert_data_structure_at(Some(index), structure);
            }
            Collection::Computations => {
                let computation = Computation::from_dict(snapshot);
                self.insert_computation_at(Some(index), computation);
            }
            Collection::Connections => {
                let connection = Connection::from_dict(snapshot);
                self.insert_connection_at(Some(index), connection);
            }
        }
    }

    /// Reconstruct a removed data item from the storage trash, re-insert it,
    /// and assert that this project is its container again.
    pub fn restore_data_item(self: &Arc<Self>, uuid: Uuid) -> Result<Arc<DataItem>, ProjectError> {
        self.restore_data_item_at(uuid, None)
    }

    pub(crate) fn restore_data_item_at(
        self: &Arc<Self>,
        uuid: Uuid,
        index: Option<usize>,
    ) -> Result<Arc<DataItem>, ProjectError> {
        let dict = self
            .storage
            .restore_item(uuid)
            .map_err(|_| ProjectError::NothingToRestore(uuid))?;
        let item = DataItem::with_uuid(uuid);
        item.read_from_dict(&dict);
        self.insert_data_item_at(index, item.clone());
        assert!(
            item.lifecycle.is_inserted() && self.data_item(uuid).is_some(),
            "restored data item not contained by this project"
        );
        Ok(item)
    }

    // --- teardown -----------------------------------------------------------

    /// Release all contained items. The project is unusable afterwards.
    pub fn close(&self) {
        for computation in self.computations() {
            computation.unbind();
            computation.about_to_be_removed();
        }
        for connection in self.connections() {
            connection.unbind();
            connection.about_to_be_removed();
        }
        for structure in self.data_structures() {
            structure.about_to_be_removed();
        }
        for display_item in self.display_items() {
            display_item.about_to_be_removed();
        }
        for item in self.data_items() {
            item.about_to_be_removed();
            item.close();
        }
        self.computations.write().clear();
        self.connections.write().clear();
        self.data_structures.write().clear();
        self.display_items.write().clear();
        self.data_items.write().clear();
    }
}

fn insert_at<T>(
    map: &RwLock<IndexMap<Uuid, T>>,
    index: Option<usize>,
    uuid: Uuid,
    value: T,
) -> usize {
    let mut map = map.write();
    let index = index.unwrap_or(map.len()).min(map.len());
    map.shift_insert(index, uuid, value);
    index
}

/// Project-wide resolution: dispatch on the specifier's type tag to the
/// appropriate collection lookup. Dangling and mid-removal targets resolve
/// to `None`.
struct ProjectContext {
    project: Weak<Project>,
}

impl ResolutionContext for ProjectContext {
    fn resolve(
        &self,
        specifier: Option<&Specifier>,
        secondary_specifier: Option<&Specifier>,
        property_name: Option<&str>,
        objects: Option<&Arc<ObservableList<Specifier>>>,
    ) -> Option<Box<dyn BoundItem>> {
        let project = self.project.upgrade()?;
        if let Some(objects) = objects {
            let mut items: Vec<Box<dyn BoundItem>> = Vec::new();
            for entry in objects.items() {
                items.push(self.resolve(Some(&entry), None, None, None)?);
            }
            return Some(Box::new(BoundList::new(items)));
        }
        let specifier = specifier?;
        let uuid = specifier.uuid?;
        if project.is_removing(uuid) {
            return None;
        }
        let effective_property = specifier.property.as_deref().or(property_name);
        match specifier.specifier_type {
            SpecifierType::DataItem => {
                let item = ProjectItem::Data(project.data_item(uuid)?);
                Some(bind_object_or_property(item, effective_property))
            }
            SpecifierType::DisplayItem => {
                let item = ProjectItem::Display(project.display_item(uuid)?);
                Some(Box::new(BoundObject::new(item)))
            }
            SpecifierType::Graphic => {
                let item = ProjectItem::Graphic(project.find_graphic(uuid)?);
                Some(bind_object_or_property(item, effective_property))
            }
            SpecifierType::Structure => {
                let item = ProjectItem::Structure(project.data_structure(uuid)?);
                Some(bind_object_or_property(item, effective_property))
            }
            SpecifierType::Variable => {
                let variable = project.find_variable(uuid)?;
                if variable.specifier().is_none() && !variable.is_list() {
                    Some(variable.bound_variable())
                } else {
                    None
                }
            }
            _ => {
                let (display_item, channel) = project.find_channel(uuid)?;
                if project.is_removing(display_item.uuid()) {
                    return None;
                }
                let data_item_uuid = channel.data_item_uuid()?;
                if project.is_removing(data_item_uuid) {
                    return None;
                }
                let data_item = project.data_item(data_item_uuid)?;
                let facet =
                    FacetKind::from_specifier(specifier.specifier_type, effective_property)?;
                let graphic = if facet.is_cropped() {
                    secondary_specifier
                        .and_then(|secondary| secondary.uuid)
                        .and_then(|graphic_uuid| project.find_graphic(graphic_uuid))
                } else {
                    None
                };
                Some(Box::new(BoundDataSource::new(
                    channel, data_item, facet, graphic,
                )))
            }
        }
    }
}

fn bind_object_or_property(item: ProjectItem, property: Option<&str>) -> Box<dyn BoundItem> {
    match property {
        Some(property) => Box::new(BoundProperty::new(item, property)),
        None => Box::new(BoundObject::new(item)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Value;

    #[test]
    fn append_assigns_order_and_fires_insert() {
        let project = Project::new();
        let changes: Arc<Mutex<Vec<(Collection, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        let _listener = project.item_inserted_event.listen(move |change| {
            changes_clone
                .lock()
                .push((change.collection, change.index));
        });
        project.append_data_item(DataItem::new());
        project.append_data_item(DataItem::new());
        assert_eq!(
            changes.lock().as_slice(),
            [(Collection::DataItems, 0), (Collection::DataItems, 1)]
        );
    }

    #[test]
    #[should_panic(expected = "duplicate data item uuid")]
    fn duplicate_uuid_panics() {
        let project = Project::new();
        let item = DataItem::new();
        let duplicate = DataItem::with_uuid(PersistentObject::uuid(&*item));
        project.append_data_item(item);
        project.append_data_item(duplicate);
    }

    #[test]
    #[should_panic(expected = "not in this project")]
    fn removing_absent_item_panics() {
        let project = Project::new();
        let item = DataItem::new();
        let _ = project.remove_data_item(&item);
    }

    #[test]
    fn removal_notifies_entity_before_store_event() {
        let project = Project::new();
        let item = DataItem::new();
        project.append_data_item(item.clone());

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let order_entity = order.clone();
        let _entity_listener = item.about_to_be_removed_event.listen(move |_| {
            order_entity.lock().push("entity");
        });
        let order_store = order.clone();
        let _store_listener = project.item_removed_event.listen(move |_| {
            order_store.lock().push("store");
        });

        project.remove_data_item(&item).close();
        assert_eq!(order.lock().as_slice(), ["entity", "store"]);
        assert!(project.data_items().is_empty());
    }

    #[test]
    fn restore_data_item_round_trips_through_trash() {
        let project = Project::new();
        let item = DataItem::new();
        item.set_data(Some(Value::Integral(7)));
        let uuid = PersistentObject::uuid(&*item);
        project.append_data_item(item.clone());
        project.remove_data_item(&item).close();
        assert!(project.data_item(uuid).is_none());

        let restored = project.restore_data_item(uuid).unwrap();
        assert_eq!(PersistentObject::uuid(&*restored), uuid);
        assert_eq!(restored.data(), Some(Value::Integral(7)));
        assert!(project.data_item(uuid).is_some());
    }

    #[test]
    fn restore_of_never_removed_item_is_an_error() {
        let project = Project::new();
        let uuid = Uuid::new_v4();
        assert_eq!(
            project.restore_data_item(uuid).err(),
            Some(ProjectError::NothingToRestore(uuid))
        );
    }

    #[test]
    fn item_lookup_reaches_channels_and_graphics() {
        let project = Project::new();
        let data_item = DataItem::new();
        project.append_data_item(data_item.clone());
        let display_item = DisplayItem::new();
        let channel = DisplayDataChannel::new(Some(PersistentObject::uuid(&*data_item)));
        display_item.append_display_data_channel(channel.clone());
        let graphic = Graphic::new("rect-graphic");
        display_item.add_graphic(graphic.clone());
        project.append_display_item(display_item);

        assert!(matches!(
            project.item(channel.uuid()),
            Some(ProjectItem::Channel(_))
        ));
        assert!(matches!(
            project.item(graphic.uuid()),
            Some(ProjectItem::Graphic(_))
        ));
        assert!(project.item(Uuid::new_v4()).is_none());
    }

    #[test]
    fn drain_changed_fires_data_changed_on_mutator() {
        let project = Project::new();
        let item = DataItem::new();
        project.append_data_item(item.clone());
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let _listener = item.data_changed_event.listen(move |_| {
            fired_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        project.mark_item_changed(PersistentObject::uuid(&*item));
        project.mark_item_changed(PersistentObject::uuid(&*item));
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
        project.drain_changed();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
