//! Declarative component queries.
//!
//! This module provides a *builder-style* API for declaring which components a
//! system reads, writes or excludes, and for iterating the entities that match.
//!
//! ## Execution model
//! 1. A [`QueryBuilder`] records component types by `TypeId`.
//! 2. [`QueryBuilder::setup`] resolves them against the registry, caches the
//!    matching archetypes together with each one's column offsets, and
//!    registers the read and write sets with the owning system.
//! 3. [`Query::for_each`] walks matching storages (outer loop) and their
//!    slots (inner loop), skipping free slots.
//! 4. [`QueryItem`] resolves typed component access through the cached
//!    offsets of the storage it belongs to; no map lookup happens per access.
//!
//! ## Borrowing
//! Items hand out mutable references through a shared world. Before visiting
//! a storage, the query borrows every column it touches: shared for reads,
//! exclusive for writes. The borrows are held until the storage has been
//! visited, and items only exist inside the visiting closure. A conflicting
//! access made meanwhile (a second writing query over the same records, or a
//! [`ComponentRef`](crate::engine::borrow::ComponentRef) held across a write)
//! panics instead of aliasing.
//!
//! The scheduler orders systems by declared access, so bodies that declare
//! what they touch never observe such a panic.

use std::any::{type_name, TypeId};

use crate::engine::borrow::{BorrowGuard, BorrowKind};
use crate::engine::component::Component;
use crate::engine::entity::Entity;
use crate::engine::error::RegistryError;
use crate::engine::manager::EntityManager;
use crate::engine::storage::ArchetypeStorage;
use crate::engine::systems::SystemSetup;
use crate::engine::types::{AccessSets, ArchetypeId, ComponentID, Signature, SlotIndex};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    Without,
}

/// Builder for component queries.
///
/// ## Example
/// ```ignore
/// let query = QueryBuilder::new()
///     .read::<Velocity>()
///     .write::<Position>()
///     .without::<Frozen>()
///     .setup(setup)?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    terms: Vec<(TypeId, &'static str, Access)>,
}

impl QueryBuilder {
    /// Creates an empty query builder.
    pub fn new() -> Self { Self::default() }

    /// Requires `T` with read-only access.
    pub fn read<T: Component>(mut self) -> Self {
        self.terms.push((TypeId::of::<T>(), type_name::<T>(), Access::Read));
        self
    }

    /// Requires `T` with read-write access.
    pub fn write<T: Component>(mut self) -> Self {
        self.terms.push((TypeId::of::<T>(), type_name::<T>(), Access::Write));
        self
    }

    /// Excludes archetypes containing `T`.
    pub fn without<T: Component>(mut self) -> Self {
        self.terms.push((TypeId::of::<T>(), type_name::<T>(), Access::Without));
        self
    }

    /// Resolves the query and registers its access with the owning system.
    pub fn setup(self, setup: &mut SystemSetup<'_>) -> Result<Query, RegistryError> {
        let query = self.build(setup.world())?;
        for component_id in query.access.read.iterate_over_components() {
            setup.declare_read(component_id);
        }
        for component_id in query.access.write.iterate_over_components() {
            setup.declare_write(component_id);
        }
        Ok(query)
    }

    /// Resolves the query without registering access anywhere.
    ///
    /// Intended for code running outside a tick.
    pub fn build(self, world: &EntityManager) -> Result<Query, RegistryError> {
        let components = world.registry().components();
        let mut access = AccessSets::default();
        let mut required = Signature::default();
        let mut excluded = Signature::default();

        for &(type_id, name, term) in &self.terms {
            let component_id = components
                .id_of_type_id(type_id)
                .ok_or(RegistryError::UnregisteredType(name))?;
            match term {
                Access::Read => {
                    required.set(component_id);
                    access.add_read(component_id);
                }
                Access::Write => {
                    required.set(component_id);
                    access.add_write(component_id);
                }
                Access::Without => excluded.set(component_id),
            }
        }

        let archetypes = world
            .registry()
            .matching_archetypes(&required, &excluded)
            .filter_map(|archetype| world.storage(archetype.id()))
            .map(|storage| CachedArchetype::new(storage, &access))
            .collect();

        Ok(Query { required, excluded, access, archetypes })
    }
}

#[derive(Clone, Copy, Debug)]
struct CachedColumn {
    /// Column index inside the storage.
    index: usize,
    type_id: TypeId,
    component_id: ComponentID,
    offset: usize,
    dirty_offset: usize,
    writable: bool,
}

#[derive(Clone, Debug)]
struct CachedArchetype {
    id: ArchetypeId,
    columns: Vec<CachedColumn>,
}

impl CachedArchetype {
    fn new(storage: &ArchetypeStorage, access: &AccessSets) -> Self {
        let columns = storage
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| access.read.has(c.component_id) || access.write.has(c.component_id))
            .map(|(index, c)| CachedColumn {
                index,
                type_id: c.type_id,
                component_id: c.component_id,
                offset: c.offset,
                dirty_offset: c.dirty_offset,
                writable: access.write.has(c.component_id),
            })
            .collect();
        Self { id: storage.archetype_id(), columns }
    }

    #[track_caller]
    fn borrow<'s>(&self, storage: &'s ArchetypeStorage) -> BorrowGuard<'s> {
        storage.borrow_columns(self.columns.iter().map(|c| {
            let kind = if c.writable { BorrowKind::Exclusive } else { BorrowKind::Shared };
            (c.index, kind)
        }))
    }
}

/// A resolved query: matching archetypes plus their cached column offsets.
///
/// Archetypes are immutable after registration, so the cache never goes stale.
#[derive(Clone, Debug)]
pub struct Query {
    required: Signature,
    excluded: Signature,
    access: AccessSets,
    archetypes: Vec<CachedArchetype>,
}

impl Query {
    /// Matching archetypes.
    pub fn archetypes(&self) -> impl Iterator<Item = ArchetypeId> + '_ {
        self.archetypes.iter().map(|a| a.id)
    }

    /// Declared access.
    #[inline]
    pub fn access(&self) -> &AccessSets { &self.access }

    /// Components every match contains.
    #[inline]
    pub fn required(&self) -> &Signature { &self.required }

    /// Components no match contains.
    #[inline]
    pub fn excluded(&self) -> &Signature { &self.excluded }

    /// Calls `f` for every matching entity: storages outside, slots inside.
    ///
    /// ## Panics
    /// Panics if a column the query touches is borrowed in a conflicting way,
    /// e.g. a write while a [`ComponentRef`](crate::engine::borrow::ComponentRef)
    /// to the same component is alive.
    #[track_caller]
    pub fn for_each(&self, world: &EntityManager, mut f: impl FnMut(QueryItem<'_>)) {
        for cached in &self.archetypes {
            let Some(storage) = world.storage(cached.id) else { continue };
            if storage.is_empty() {
                continue;
            }
            let _guard = cached.borrow(storage);
            for slot in 0..storage.capacity() {
                let entity = storage.entity_at(slot);
                if !entity.is_null() {
                    f(QueryItem { storage, columns: &cached.columns, slot, entity });
                }
            }
        }
    }

    /// Number of matching entities.
    pub fn count(&self, world: &EntityManager) -> usize {
        self.archetypes
            .iter()
            .filter_map(|a| world.storage(a.id))
            .map(ArchetypeStorage::len)
            .sum()
    }

    /// Calls `f` with the item for `entity`, if it matches.
    ///
    /// ## Panics
    /// As [`for_each`](Self::for_each); in particular calling `get` for a
    /// writing query from inside another visit of the same columns panics.
    #[track_caller]
    pub fn get<R>(&self, world: &EntityManager, entity: Entity, f: impl FnOnce(QueryItem<'_>) -> R) -> Option<R> {
        let cached = self.archetypes.iter().find(|a| a.id == entity.archetype)?;
        let storage = world.storage(cached.id)?;
        let slot = storage.slot_of(entity)?;
        let _guard = cached.borrow(storage);
        Some(f(QueryItem { storage, columns: &cached.columns, slot, entity }))
    }
}

/// One matching entity, valid inside a [`Query::for_each`] or [`Query::get`] visit.
pub struct QueryItem<'w> {
    storage: &'w ArchetypeStorage,
    columns: &'w [CachedColumn],
    slot: SlotIndex,
    entity: Entity,
}

impl<'w> QueryItem<'w> {
    /// The entity.
    #[inline]
    pub fn entity(&self) -> Entity { self.entity }

    /// Storage slot of the entity.
    #[inline]
    pub fn slot(&self) -> SlotIndex { self.slot }

    #[inline]
    #[track_caller]
    fn column<T: Component>(&self) -> &CachedColumn {
        let type_id = TypeId::of::<T>();
        match self.columns.iter().find(|c| c.type_id == type_id) {
            Some(column) => column,
            None => panic!("query does not declare access to {}", type_name::<T>()),
        }
    }

    /// Shared reference to the entity's `T`.
    ///
    /// ## Panics
    /// Panics if the query declares neither read nor write access to `T`.
    #[track_caller]
    pub fn read<T: Component>(&self) -> &T {
        let offset = self.column::<T>().offset;
        // SAFETY: the cached column stores `T` at `offset` and the visit that
        // created this item holds a borrow of it.
        unsafe { self.storage.component_unchecked::<T>(self.slot, offset) }
    }

    /// Mutable reference to the entity's `T` with its dirty byte raised.
    ///
    /// ## Panics
    /// Panics if the query does not declare write access to `T`.
    #[track_caller]
    pub fn write<T: Component>(&mut self) -> &mut T {
        let column = *self.column::<T>();
        assert!(column.writable, "query declares {} read-only", type_name::<T>());
        // SAFETY: the cached column stores `T` at `offset`, the visit holds an
        // exclusive borrow of it and creates one item per slot; `&mut self`
        // keeps this the only reference obtained through the item.
        let value = unsafe { self.storage.component_mut_unchecked::<T>(self.slot, column.offset) };
        value.set_dirty(true);
        value
    }

    /// Component id and dirty offset of `T` inside this item's storage.
    pub fn component_info<T: Component>(&self) -> Option<(ComponentID, usize)> {
        let type_id = TypeId::of::<T>();
        self.columns
            .iter()
            .find(|c| c.type_id == type_id)
            .map(|c| (c.component_id, c.dirty_offset))
    }
}
