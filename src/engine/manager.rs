//! World state: entity lifecycle, ownership and component access.
//!
//! This module defines [`EntityManager`], which owns:
//!
//! * one [`ArchetypeStorage`] per registered archetype,
//! * one [`EntityIdAllocator`] per archetype,
//! * the owner side-map,
//! * the `on created` / `on destroyed` callback registries,
//! * the deferred command queue.
//!
//! ## Tick guard
//!
//! While the scheduler runs a tick the manager is flagged as *executing*.
//! Systems receive `&EntityManager`; every structural or component mutation
//! takes `&mut self` and asserts the flag is clear. Tripping the assertion is a
//! programmer error and panics. Structural changes requested from inside a
//! tick go through [`EntityManager::defer`] instead.
//!
//! ## Lifecycle notifications
//!
//! Subscribers are pushed every creation and destruction. Creation is
//! announced after the entity is fully initialized; destruction is announced
//! before its records are released, so a subscriber can still read them.
//! Callbacks are snapshotted before they run and may subscribe or unsubscribe
//! freely.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::engine::archetype::Registry;
use crate::engine::borrow::ComponentRef;
use crate::engine::commands::{Command, CommandOutcome};
use crate::engine::component::{Component, RuntimeComponent};
use crate::engine::config::EcsConfig;
use crate::engine::entity::{Entity, EntityIdAllocator};
use crate::engine::error::EntityError;
use crate::engine::storage::{ArchetypeStorage, DirtyEffect, DirtyIter, DirtyRecord};
use crate::engine::types::{ArchetypeId, ComponentID};


/// Owner of an entity, e.g. a network participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u32);

impl OwnerId {
    /// Implicit owner of every entity without an explicit owner.
    pub const SYSTEM: OwnerId = OwnerId(0);
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Callback invoked with the world and the affected entity.
pub type LifecycleHook = Arc<dyn Fn(&EntityManager, Entity) + Send + Sync>;

/// Deduplicated set of lifecycle callbacks.
///
/// Identity is the `Arc` allocation: subscribing the same `Arc` twice is a no-op.
#[derive(Default)]
pub struct LifecycleHooks {
    hooks: RwLock<Vec<LifecycleHook>>,
}

impl LifecycleHooks {
    /// Adds `hook`. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, hook: LifecycleHook) -> bool {
        let mut hooks = self.hooks.write();
        if hooks.iter().any(|h| Arc::ptr_eq(h, &hook)) {
            return false;
        }
        hooks.push(hook);
        true
    }

    /// Removes `hook`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, hook: &LifecycleHook) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|h| !Arc::ptr_eq(h, hook));
        hooks.len() != before
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize { self.hooks.read().len() }

    /// Returns `true` if nobody is subscribed.
    pub fn is_empty(&self) -> bool { self.hooks.read().is_empty() }

    fn notify(&self, world: &EntityManager, entity: Entity) {
        let snapshot: Vec<LifecycleHook> = self.hooks.read().clone();
        for hook in snapshot {
            hook(world, entity);
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks").field("len", &self.len()).finish()
    }
}

/// Owns every entity and component record of a world.
///
/// ## Invariants
/// * an entity exists iff its archetype's storage contains it iff its id is live
///   in that archetype's allocator,
/// * the owner map only holds existing entities, and never [`OwnerId::SYSTEM`].
pub struct EntityManager {
    registry: Arc<Registry>,
    config: EcsConfig,
    storages: BTreeMap<ArchetypeId, ArchetypeStorage>,
    ids: HashMap<ArchetypeId, EntityIdAllocator>,
    owners: HashMap<Entity, OwnerId>,
    created: LifecycleHooks,
    destroyed: LifecycleHooks,
    commands: Mutex<Vec<Command>>,
    executing: bool,
}

impl EntityManager {
    /// Builds storage for every archetype of `registry`.
    pub fn new(registry: Arc<Registry>, config: EcsConfig) -> Self {
        let capacity = config.storage_capacity();
        let mut storages = BTreeMap::new();
        let mut ids = HashMap::new();

        for archetype in registry.archetypes() {
            storages.insert(
                archetype.id(),
                ArchetypeStorage::new(archetype, registry.components(), capacity),
            );
            ids.insert(archetype.id(), EntityIdAllocator::new(config.max_entity_id));
        }
        tracing::debug!(archetypes = storages.len(), capacity, "entity manager ready");

        Self {
            registry,
            config,
            storages,
            ids,
            owners: HashMap::new(),
            created: LifecycleHooks::default(),
            destroyed: LifecycleHooks::default(),
            commands: Mutex::new(Vec::new()),
            executing: false,
        }
    }

    /// Builds a manager with [`EcsConfig::default`].
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self::new(registry, EcsConfig::default())
    }

    /// Registry this world was built from.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> { &self.registry }

    /// Configuration this world was built with.
    #[inline]
    pub fn config(&self) -> &EcsConfig { &self.config }

    // ── Tick guard ──────────────────────────────────────────────────────────

    /// Marks the world as executing a tick.
    ///
    /// ## Panics
    /// Panics if a tick is already executing.
    pub fn begin_tick(&mut self) {
        assert!(!self.executing, "begin_tick called while a tick is already executing");
        self.executing = true;
    }

    /// Clears the executing flag.
    pub fn end_tick(&mut self) {
        self.executing = false;
    }

    /// Returns `true` between [`begin_tick`](Self::begin_tick) and [`end_tick`](Self::end_tick).
    #[inline]
    pub fn is_executing(&self) -> bool { self.executing }

    #[inline]
    #[track_caller]
    fn assert_not_executing(&self, operation: &str) {
        assert!(!self.executing, "{operation} called while the world is executing a tick");
    }

    // ── Entity lifecycle ────────────────────────────────────────────────────

    /// Creates a system-owned entity of `archetype` with default component values.
    pub fn create_entity(&mut self, archetype: ArchetypeId) -> Result<Entity, EntityError> {
        self.create_entity_owned(archetype, OwnerId::SYSTEM)
    }

    /// Creates an entity of `archetype` owned by `owner`.
    ///
    /// ## Errors
    /// * [`EntityError::UnknownArchetype`] if the archetype was never registered,
    /// * [`EntityError::IdsExhausted`] if every numeric id is in use.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn create_entity_owned(&mut self, archetype: ArchetypeId, owner: OwnerId) -> Result<Entity, EntityError> {
        self.assert_not_executing("create_entity");

        let ids = self.ids.get_mut(&archetype).ok_or(EntityError::UnknownArchetype(archetype))?;
        let id = ids.allocate().ok_or(EntityError::IdsExhausted(archetype))?;
        let entity = Entity::new(archetype, id);

        let storage = self.storages.get_mut(&archetype).ok_or(EntityError::UnknownArchetype(archetype))?;
        let added = storage.add_entity(entity);
        debug_assert!(added, "freshly allocated entity {entity} was already stored");

        if owner != OwnerId::SYSTEM {
            self.owners.insert(entity, owner);
        }
        tracing::debug!(%entity, %owner, "created entity");

        self.created.notify(self, entity);
        Ok(entity)
    }

    /// Destroys `entity`, releasing its component resources.
    ///
    /// Destroying an entity that does not exist is logged and ignored.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        self.assert_not_executing("destroy_entity");

        if !self.entity_exists(entity) {
            tracing::error!(%entity, "destroy_entity: entity does not exist");
            return false;
        }

        self.destroyed.notify(self, entity);

        if let Some(storage) = self.storages.get_mut(&entity.archetype) {
            storage.remove_entity(entity);
        }
        if let Some(ids) = self.ids.get_mut(&entity.archetype) {
            ids.free(entity.id);
        }
        self.owners.remove(&entity);
        tracing::debug!(%entity, "destroyed entity");
        true
    }

    /// Returns `true` if `entity` is alive.
    pub fn entity_exists(&self, entity: Entity) -> bool {
        self.storages
            .get(&entity.archetype)
            .is_some_and(|storage| storage.contains(entity))
    }

    /// Number of live entities across all archetypes.
    pub fn entity_count(&self) -> usize {
        self.storages.values().map(ArchetypeStorage::len).sum()
    }

    /// Live entities of `archetype` in slot order.
    pub fn entities_of(&self, archetype: ArchetypeId) -> impl Iterator<Item = Entity> + '_ {
        self.storages.get(&archetype).into_iter().flat_map(|s| s.entities())
    }

    /// Registry of creation callbacks.
    #[inline]
    pub fn on_entity_created(&self) -> &LifecycleHooks { &self.created }

    /// Registry of destruction callbacks.
    #[inline]
    pub fn on_entity_destroyed(&self) -> &LifecycleHooks { &self.destroyed }

    // ── Ownership ───────────────────────────────────────────────────────────

    /// Assigns `owner` to `entity`. Assigning [`OwnerId::SYSTEM`] clears the entry.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn set_owner(&mut self, entity: Entity, owner: OwnerId) -> Result<(), EntityError> {
        self.assert_not_executing("set_owner");
        if !self.entity_exists(entity) {
            return Err(EntityError::NotFound(entity));
        }
        if owner == OwnerId::SYSTEM {
            self.owners.remove(&entity);
        } else {
            self.owners.insert(entity, owner);
        }
        Ok(())
    }

    /// Owner of `entity`, or `None` if it does not exist.
    pub fn owner_of(&self, entity: Entity) -> Option<OwnerId> {
        self.entity_exists(entity)
            .then(|| self.owners.get(&entity).copied().unwrap_or(OwnerId::SYSTEM))
    }

    /// All entities owned by `owner`, sorted.
    ///
    /// For [`OwnerId::SYSTEM`] this is every entity without an explicit owner.
    pub fn get_entities_by_owner(&self, owner: OwnerId) -> Vec<Entity> {
        let mut entities: Vec<Entity> = if owner == OwnerId::SYSTEM {
            self.storages
                .values()
                .flat_map(|s| s.entities())
                .filter(|e| !self.owners.contains_key(e))
                .collect()
        } else {
            self.owners
                .iter()
                .filter(|(_, &o)| o == owner)
                .map(|(&e, _)| e)
                .collect()
        };
        entities.sort_unstable();
        entities
    }

    // ── Component access ────────────────────────────────────────────────────

    #[track_caller]
    fn component_id_of<T: Component>(&self) -> ComponentID {
        match self.registry.components().id_of::<T>() {
            Some(id) => id,
            None => panic!("component type {} is not registered", std::any::type_name::<T>()),
        }
    }

    fn storage_of(&self, entity: Entity) -> Result<&ArchetypeStorage, EntityError> {
        self.storages
            .get(&entity.archetype)
            .filter(|s| s.contains(entity))
            .ok_or(EntityError::NotFound(entity))
    }

    fn storage_of_mut(&mut self, entity: Entity) -> Result<&mut ArchetypeStorage, EntityError> {
        self.storages
            .get_mut(&entity.archetype)
            .filter(|s| s.contains(entity))
            .ok_or(EntityError::NotFound(entity))
    }

    /// Reads `entity`'s `T`.
    ///
    /// The returned reference holds a shared borrow of the component column
    /// until it is dropped.
    ///
    /// ## Panics
    /// Panics if `T` is not a registered component type, or if a query is
    /// writing `T` in the entity's archetype.
    #[track_caller]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<ComponentRef<'_, T>, EntityError> {
        let component_id = self.component_id_of::<T>();
        self.storage_of(entity)?
            .get_component::<T>(entity)
            .ok_or(EntityError::MissingComponent { entity, component_id })
    }

    /// Mutable access to `entity`'s `T`. The dirty byte is left as is.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick or `T` is not registered.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, EntityError> {
        self.assert_not_executing("get_component_mut");
        let component_id = self.component_id_of::<T>();
        self.storage_of_mut(entity)?
            .get_component_mut::<T>(entity)
            .ok_or(EntityError::MissingComponent { entity, component_id })
    }

    /// Writes `entity`'s `T` and raises its dirty byte.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EntityError> {
        self.set_component_with(entity, value, DirtyEffect::Mark)
    }

    /// Writes `entity`'s `T` with an explicit dirty effect.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick or `T` is not registered.
    pub fn set_component_with<T: Component>(
        &mut self,
        entity: Entity,
        value: T,
        effect: DirtyEffect,
    ) -> Result<(), EntityError> {
        self.assert_not_executing("set_component");
        let component_id = self.component_id_of::<T>();
        if self.storage_of_mut(entity)?.set_component(entity, value, effect) {
            Ok(())
        } else {
            Err(EntityError::MissingComponent { entity, component_id })
        }
    }

    /// Writes raw record bytes of `component_id`.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick or `bytes` has the wrong size.
    pub fn set_component_bytes(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        bytes: &[u8],
        effect: DirtyEffect,
    ) -> Result<(), EntityError> {
        self.assert_not_executing("set_component_bytes");
        if self.storage_of_mut(entity)?.set_component_bytes(entity, component_id, bytes, effect) {
            Ok(())
        } else {
            Err(EntityError::MissingComponent { entity, component_id })
        }
    }

    /// Raw record bytes of `component_id`, borrowed like [`get_component`](Self::get_component).
    #[track_caller]
    pub fn component_bytes(&self, entity: Entity, component_id: ComponentID) -> Result<ComponentRef<'_, [u8]>, EntityError> {
        self.storage_of(entity)?
            .component_bytes(entity, component_id)
            .ok_or(EntityError::MissingComponent { entity, component_id })
    }

    /// Diagnostic views of every component of `entity`, in layout order.
    pub fn runtime_components(&self, entity: Entity) -> Result<Vec<RuntimeComponent>, EntityError> {
        let storage = self.storage_of(entity)?;
        let components = self.registry.components();
        Ok(storage
            .component_ids()
            .filter_map(|id| {
                storage
                    .component_bytes(entity, id)
                    .map(|bytes| components.cast_to_runtime_component(id, &bytes))
            })
            .collect())
    }

    /// Raises the dirty byte of `entity`'s `component_id`.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn mark_dirty(&mut self, entity: Entity, component_id: ComponentID) -> Result<(), EntityError> {
        self.assert_not_executing("mark_dirty");
        if self.storage_of_mut(entity)?.mark_dirty(entity, component_id) {
            Ok(())
        } else {
            Err(EntityError::MissingComponent { entity, component_id })
        }
    }

    // ── Serialization ───────────────────────────────────────────────────────

    /// Writes `entity`'s `component_id` record.
    ///
    /// An external serializer registered for the component takes precedence
    /// over the component's own hook.
    pub fn serialize_component(
        &self,
        entity: Entity,
        component_id: ComponentID,
        writer: &mut dyn Write,
    ) -> Result<(), EntityError> {
        let record = self.component_bytes(entity, component_id)?;
        let components = self.registry.components();

        let result = match components.serializer(component_id) {
            Some(serializer) => serializer.serialize(self, entity, &record, writer),
            None => (components.expect_description(component_id).hooks.serialize)(&record, writer),
        };
        result.map_err(|e| EntityError::EncodeFailed { component_id, message: e.to_string() })
    }

    /// Reads `entity`'s `component_id` record from `reader`.
    ///
    /// Decoding happens on a copy; the stored record is only replaced (through
    /// the usual release/acquire hooks) when decoding succeeds.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn deserialize_component(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        reader: &mut dyn Read,
        effect: DirtyEffect,
    ) -> Result<(), EntityError> {
        self.assert_not_executing("deserialize_component");
        let mut record = self.component_bytes(entity, component_id)?.to_vec();
        let components = self.registry.components();

        let decoded = match components.serializer(component_id) {
            Some(serializer) => serializer.deserialize(self, entity, &mut record, reader),
            None => (components.expect_description(component_id).hooks.deserialize)(&mut record, reader),
        };
        if !decoded {
            return Err(EntityError::DecodeFailed { entity, component_id });
        }
        self.set_component_bytes(entity, component_id, &record, effect)
    }

    // ── Storage access and dirty enumeration ────────────────────────────────

    /// Storage of `archetype`.
    #[inline]
    pub fn storage(&self, archetype: ArchetypeId) -> Option<&ArchetypeStorage> {
        self.storages.get(&archetype)
    }

    /// All storages in archetype id order.
    pub fn storages(&self) -> impl Iterator<Item = &ArchetypeStorage> + '_ {
        self.storages.values()
    }

    /// Starts a dirty-enumeration pass over `archetype`.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn dirty_components(&mut self, archetype: ArchetypeId) -> Option<DirtyIter<'_>> {
        self.assert_not_executing("dirty_components");
        self.storages.get_mut(&archetype).map(ArchetypeStorage::dirty_components)
    }

    /// Runs one dirty-enumeration pass over every storage.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn drain_dirty(&mut self, mut visit: impl FnMut(DirtyRecord<'_>)) -> usize {
        self.assert_not_executing("drain_dirty");
        let mut visited = 0;
        for storage in self.storages.values_mut() {
            for record in storage.dirty_components() {
                visit(record);
                visited += 1;
            }
        }
        visited
    }

    // ── Deferred commands ───────────────────────────────────────────────────

    /// Queues `command`. Safe to call from system bodies.
    pub fn defer(&self, command: Command) {
        self.commands.lock().push(command);
    }

    /// Queues a typed component write.
    ///
    /// ## Panics
    /// Panics if `T` is not registered.
    pub fn defer_set_component<T: Component>(&self, entity: Entity, value: T, effect: DirtyEffect) {
        let component_id = self.component_id_of::<T>();
        self.defer(Command::SetComponent {
            entity,
            component_id,
            bytes: bytemuck::bytes_of(&value).into(),
            effect,
        });
    }

    /// Number of queued commands.
    pub fn pending_commands(&self) -> usize { self.commands.lock().len() }

    /// Applies every queued command in order, logging failures.
    ///
    /// Returns the outcome of each command.
    ///
    /// ## Panics
    /// Panics if the world is executing a tick.
    pub fn apply_commands(&mut self) -> Vec<Result<CommandOutcome, EntityError>> {
        self.assert_not_executing("apply_commands");
        let queued = std::mem::take(&mut *self.commands.lock());

        queued
            .into_iter()
            .map(|command| {
                let description = format!("{command:?}");
                let outcome = command.apply(self);
                match &outcome {
                    Ok(outcome) => tracing::trace!(command = %description, ?outcome, "applied command"),
                    Err(error) => tracing::error!(command = %description, %error, "deferred command failed"),
                }
                outcome
            })
            .collect()
    }

    /// Drops every queued command. Returns how many were dropped.
    pub fn discard_commands(&mut self) -> usize {
        let dropped = std::mem::take(&mut *self.commands.lock()).len();
        if dropped > 0 {
            tracing::warn!(dropped, "discarded deferred commands");
        }
        dropped
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("storages", &self.storages)
            .field("owners", &self.owners.len())
            .field("executing", &self.executing)
            .finish()
    }
}
