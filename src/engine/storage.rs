//! Dense byte-arena storage for all entities of one archetype.
//!
//! This module implements [`ArchetypeStorage`], a single contiguous allocation
//! holding one *row* per slot. A row is every component record of the
//! archetype laid out back to back:
//!
//! ```text
//! slot 0: | Position | Velocity | Health |
//! slot 1: | Position | Velocity | Health |
//! ...
//! ```
//!
//! # Addressing
//!
//! A component record lives at `base + slot * stride + offset`. Offsets are
//! computed once at construction by summing record sizes in component
//! registration order (each rounded up to the record's alignment); the stride
//! is the total rounded up to the largest alignment.
//!
//! # Slots
//!
//! A parallel `slots` vector mirrors every slot with the entity bound to it,
//! or [`Entity::NULL`] when free. `entity_index` maps entities back to slots.
//! The two form a bijection over live entities.
//!
//! # Capacity
//!
//! Capacity starts at a power of two no smaller than [`MIN_CAPACITY`] and
//! only ever doubles (when an insert finds the storage full) or halves (when a
//! removal leaves at most a quarter of the slots live). Halving compacts first
//! so live rows occupy a prefix, then moves that prefix into a smaller buffer.
//!
//! # Dirty enumeration
//!
//! [`ArchetypeStorage::dirty_components`] walks components in the outer loop
//! and slots in the inner loop, so one `(offset, dirty offset)` pair serves a
//! whole column of rows. Every raised flag is yielded once and cleared.
//!
//! # Safety and invariants
//!
//! The buffer is raw memory owned by the storage. Soundness relies on:
//!
//! - the allocation is `capacity * stride` bytes, aligned to the largest
//!   component alignment, and always fully initialized (zeroed on allocation);
//! - every column offset is a multiple of that column's alignment and the
//!   stride is a multiple of the largest alignment, so typed pointers into the
//!   buffer are aligned;
//! - the buffer is only reallocated through `&mut self`, so pointers handed
//!   out through `&self` stay valid for the borrow.
//!
//! Mutable access through `&self` ([`ArchetypeStorage::component_mut_unchecked`])
//! exists for parallel system execution. Its callers hold an exclusive
//! [`ColumnBorrow`] on the column, and every reference handed out through
//! `&self` holds a shared one, so the two never alias. The scheduler orders
//! systems so that well-declared bodies never contend for a column.

use std::{
    alloc::{self, Layout},
    any::TypeId,
    collections::HashMap,
    ptr::{self, NonNull},
    slice,
    sync::Arc,
};

use crate::engine::archetype::Archetype;
use crate::engine::borrow::{BorrowGuard, BorrowKind, BorrowTracker, ColumnBorrow, ComponentRef};
use crate::engine::component::{Component, ComponentHooks, ComponentRegistry};
use crate::engine::entity::Entity;
use crate::engine::types::{ArchetypeId, ComponentID, SlotIndex, MIN_CAPACITY};


/// Whether a component write raises the record's dirty flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirtyEffect {
    /// Raise the dirty byte after copying the value in.
    #[default]
    Mark,
    /// Copy the value verbatim, including its own dirty byte.
    Preserve,
}

/// Placement and hooks of one component inside a row.
#[derive(Clone, Debug)]
pub struct ColumnLayout {
    /// Component id.
    pub component_id: ComponentID,
    /// Rust type of the record.
    pub type_id: TypeId,
    /// Rust type name.
    pub name: &'static str,
    /// Byte offset inside the row.
    pub offset: usize,
    /// Record size.
    pub size: usize,
    /// Offset of the dirty byte inside the record.
    pub dirty_offset: usize,
    default_bytes: Arc<[u8]>,
    hooks: ComponentHooks,
}

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// One record yielded by dirty enumeration.
#[derive(Clone, Copy, Debug)]
pub struct DirtyRecord<'a> {
    /// Owning entity.
    pub entity: Entity,
    /// Component id of the record.
    pub component_id: ComponentID,
    /// Record bytes (dirty byte already cleared).
    pub data: &'a [u8],
}

impl DirtyRecord<'_> {
    /// Copies the record out as `T`.
    ///
    /// ## Panics
    /// Panics if `T` has a different size than the record.
    pub fn read<T: Component>(&self) -> T {
        bytemuck::pod_read_unaligned(self.data)
    }
}

/// Dense storage of every entity of one archetype.
pub struct ArchetypeStorage {
    archetype: ArchetypeId,
    columns: Vec<ColumnLayout>,
    stride: usize,
    align: usize,
    buffer: NonNull<u8>,
    capacity: usize,
    slots: Vec<Entity>,
    entity_index: HashMap<Entity, SlotIndex>,
    /// Lowest slot that may be free; insert scans start here.
    free_pivot: SlotIndex,
    borrows: BorrowTracker,
}

// SAFETY: the buffer is owned exclusively by the storage and holds plain
// bytes of `Pod` records; every other field is `Send + Sync`.
unsafe impl Send for ArchetypeStorage {}
// SAFETY: shared access only reads, except through `component_mut_unchecked`
// whose callers hold an exclusive borrow of the column.
unsafe impl Sync for ArchetypeStorage {}

impl ArchetypeStorage {
    /// Builds an empty storage for `archetype` with `capacity` slots.
    ///
    /// `capacity` is rounded up to a power of two no smaller than [`MIN_CAPACITY`].
    ///
    /// ## Panics
    /// Panics if a component of the archetype is missing from `components`.
    pub fn new(archetype: &Archetype, components: &ComponentRegistry, capacity: usize) -> Self {
        let mut columns = Vec::with_capacity(archetype.components().len());
        let mut running = 0usize;
        let mut align = 1usize;

        for &component_id in archetype.components() {
            let desc = components.expect_description(component_id);
            let offset = align_up(running, desc.align);
            running = offset + desc.size;
            align = align.max(desc.align);
            columns.push(ColumnLayout {
                component_id,
                type_id: desc.type_id,
                name: desc.name,
                offset,
                size: desc.size,
                dirty_offset: desc.dirty_offset,
                default_bytes: Arc::clone(&desc.default_bytes),
                hooks: desc.hooks,
            });
        }

        let columns_len = columns.len();
        let stride = align_up(running.max(1), align);
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let buffer = Self::allocate(stride, align, capacity);

        Self {
            archetype: archetype.id(),
            columns,
            stride,
            align,
            buffer,
            capacity,
            slots: vec![Entity::NULL; capacity],
            entity_index: HashMap::with_capacity(capacity),
            free_pivot: 0,
            borrows: BorrowTracker::new(columns_len),
        }
    }

    fn layout(stride: usize, align: usize, capacity: usize) -> Layout {
        match Layout::from_size_align(stride * capacity, align) {
            Ok(layout) => layout,
            Err(_) => panic!("archetype storage layout overflow ({stride} x {capacity})"),
        }
    }

    fn allocate(stride: usize, align: usize, capacity: usize) -> NonNull<u8> {
        let layout = Self::layout(stride, align, capacity);
        // SAFETY: stride >= 1 and capacity >= MIN_CAPACITY, so the layout is non-zero sized.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(raw) {
            Some(buffer) => buffer,
            None => alloc::handle_alloc_error(layout),
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Archetype stored here.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeId { self.archetype }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize { self.entity_index.len() }

    /// Returns `true` if no entity is stored.
    #[inline]
    pub fn is_empty(&self) -> bool { self.entity_index.is_empty() }

    /// Bytes per row.
    #[inline]
    pub fn record_stride(&self) -> usize { self.stride }

    /// Column layouts in row order.
    #[inline]
    pub fn columns(&self) -> &[ColumnLayout] { &self.columns }

    /// Component ids in row order.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.columns.iter().map(|c| c.component_id)
    }

    /// Offset of `component_id` inside a row.
    pub fn component_offset(&self, component_id: ComponentID) -> Option<usize> {
        self.column_of(component_id).map(|c| self.columns[c].offset)
    }

    /// Offset of the column storing Rust type `type_id`.
    pub fn component_offset_by_type(&self, type_id: TypeId) -> Option<usize> {
        self.column_of_type(type_id).map(|c| self.columns[c].offset)
    }

    /// Returns `true` if `entity` is stored here.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool { self.entity_index.contains_key(&entity) }

    /// Slot bound to `entity`.
    #[inline]
    pub fn slot_of(&self, entity: Entity) -> Option<SlotIndex> { self.entity_index.get(&entity).copied() }

    /// Entity bound to `slot`, or [`Entity::NULL`] for a free slot.
    ///
    /// ## Panics
    /// Panics if `slot >= capacity`.
    #[inline]
    pub fn entity_at(&self, slot: SlotIndex) -> Entity { self.slots[slot] }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.slots.iter().copied().filter(|e| !e.is_null())
    }

    #[inline]
    fn column_of(&self, component_id: ComponentID) -> Option<usize> {
        self.columns.iter().position(|c| c.component_id == component_id)
    }

    #[inline]
    fn column_of_type(&self, type_id: TypeId) -> Option<usize> {
        self.columns.iter().position(|c| c.type_id == type_id)
    }

    // ── Borrow tracking ─────────────────────────────────────────────────────

    /// Borrows column index `column`.
    ///
    /// ## Panics
    /// Panics if the request conflicts with a live borrow of the column.
    #[track_caller]
    pub(crate) fn borrow_column(&self, column: usize, kind: BorrowKind) -> ColumnBorrow<'_> {
        match self.borrows.try_borrow(column, kind) {
            Some(borrow) => borrow,
            None => panic!(
                "component {} of archetype {} is already borrowed; cannot borrow it {}",
                self.columns[column].name, self.archetype, kind
            ),
        }
    }

    /// Borrows every listed column together.
    #[track_caller]
    pub(crate) fn borrow_columns(&self, columns: impl IntoIterator<Item = (usize, BorrowKind)>) -> BorrowGuard<'_> {
        let mut guard = BorrowGuard::default();
        for (column, kind) in columns {
            guard.push(self.borrow_column(column, kind));
        }
        guard
    }

    // ── Raw addressing ──────────────────────────────────────────────────────

    /// Address of the record at `offset` in row `slot`.
    #[inline]
    fn record_ptr(&self, slot: SlotIndex, offset: usize) -> *mut u8 {
        debug_assert!(slot < self.capacity);
        debug_assert!(offset < self.stride);
        // SAFETY: slot < capacity and offset < stride keep the result inside the allocation.
        unsafe { self.buffer.as_ptr().add(slot * self.stride + offset) }
    }

    /// Record bytes of `column` in row `slot`.
    ///
    /// # Safety
    /// No exclusive borrow of `column` may be live for the returned lifetime.
    unsafe fn record(&self, slot: SlotIndex, column: usize) -> &[u8] {
        let layout = &self.columns[column];
        // SAFETY: the record lies inside the initialized allocation; `&self` keeps it alive.
        unsafe { slice::from_raw_parts(self.record_ptr(slot, layout.offset), layout.size) }
    }

    #[track_caller]
    fn shared_record(&self, slot: SlotIndex, column: usize) -> ComponentRef<'_, [u8]> {
        let borrow = self.borrow_column(column, BorrowKind::Shared);
        // SAFETY: the shared borrow rules out writers until the reference is dropped.
        ComponentRef::new(unsafe { self.record(slot, column) }, borrow)
    }

    fn record_mut(&mut self, slot: SlotIndex, column: usize) -> &mut [u8] {
        let layout = &self.columns[column];
        // SAFETY: as in `record`, and `&mut self` rules out any other access.
        unsafe { slice::from_raw_parts_mut(self.record_ptr(slot, layout.offset), layout.size) }
    }

    /// Address of `component_id` for `entity`: `base + slot * stride + offset`.
    pub fn component_ptr(&self, entity: Entity, component_id: ComponentID) -> Option<NonNull<u8>> {
        let slot = self.slot_of(entity)?;
        let column = self.column_of(component_id)?;
        NonNull::new(self.record_ptr(slot, self.columns[column].offset))
    }

    /// Raw bytes of `component_id` for `entity`.
    ///
    /// ## Panics
    /// Panics if a query is writing the column.
    #[track_caller]
    pub fn component_bytes(&self, entity: Entity, component_id: ComponentID) -> Option<ComponentRef<'_, [u8]>> {
        let slot = self.slot_of(entity)?;
        let column = self.column_of(component_id)?;
        Some(self.shared_record(slot, column))
    }

    // ── Typed access ────────────────────────────────────────────────────────

    /// Shared reference to `entity`'s `T`.
    ///
    /// ## Panics
    /// Panics if a query is writing the column.
    #[track_caller]
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<ComponentRef<'_, T>> {
        let slot = self.slot_of(entity)?;
        let column = self.column_of_type(TypeId::of::<T>())?;
        Some(self.typed_record(slot, column))
    }

    /// Shared reference to `entity`'s record of `component_id`, typed as `T`.
    ///
    /// ## Panics
    /// Panics if `component_id` does not store `T`, or if a query is writing the column.
    #[track_caller]
    pub fn get_component_by_id<T: Component>(&self, entity: Entity, component_id: ComponentID) -> Option<ComponentRef<'_, T>> {
        let slot = self.slot_of(entity)?;
        let column = self.column_of(component_id)?;
        let layout = &self.columns[column];
        assert!(
            layout.type_id == TypeId::of::<T>(),
            "component {} stores {}, not {}",
            component_id,
            layout.name,
            std::any::type_name::<T>()
        );
        Some(self.typed_record(slot, column))
    }

    /// `column` must store `T`.
    #[track_caller]
    fn typed_record<T: Component>(&self, slot: SlotIndex, column: usize) -> ComponentRef<'_, T> {
        let borrow = self.borrow_column(column, BorrowKind::Shared);
        // SAFETY: the column stores `T` at an aligned offset, the bytes are
        // initialized and the shared borrow keeps writers out.
        let value = unsafe { &*(self.record_ptr(slot, self.columns[column].offset) as *const T) };
        ComponentRef::new(value, borrow)
    }

    /// Exclusive reference to `entity`'s `T`. Does not touch the dirty flag.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = self.slot_of(entity)?;
        let offset = self.component_offset_by_type(TypeId::of::<T>())?;
        // SAFETY: as in `get_component`; `&mut self` guarantees exclusivity.
        Some(unsafe { &mut *(self.record_ptr(slot, offset) as *mut T) })
    }

    /// Shared reference to the `T` at `offset` in row `slot`.
    ///
    /// # Safety
    /// `offset` must be the offset of a column storing `T`, and the caller must
    /// hold a borrow of that column for the lifetime of the reference.
    #[inline]
    pub(crate) unsafe fn component_unchecked<T: Component>(&self, slot: SlotIndex, offset: usize) -> &T {
        // SAFETY: upheld by the caller.
        unsafe { &*(self.record_ptr(slot, offset) as *const T) }
    }

    /// Mutable reference to the `T` at `offset` in row `slot` through `&self`.
    ///
    /// # Safety
    /// `offset` must be the offset of a column storing `T`, the caller must
    /// hold an exclusive borrow of that column for the lifetime of the
    /// reference, and must not hand out two references to the same record.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn component_mut_unchecked<T: Component>(&self, slot: SlotIndex, offset: usize) -> &mut T {
        // SAFETY: upheld by the caller.
        unsafe { &mut *(self.record_ptr(slot, offset) as *mut T) }
    }

    /// Writes `value` into `entity`'s `T`.
    ///
    /// Runs the previous value's release hook, copies the new value in, then
    /// runs its acquire hook. Returns `false` if the entity or the component
    /// is not stored here.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T, effect: DirtyEffect) -> bool {
        let Some(slot) = self.slot_of(entity) else { return false; };
        let Some(column) = self.column_of_type(TypeId::of::<T>()) else { return false; };
        self.write_record(slot, column, bytemuck::bytes_of(&value), effect);
        true
    }

    /// Writes raw record bytes into `entity`'s `component_id`.
    ///
    /// ## Panics
    /// Panics if `bytes` does not match the record size.
    pub fn set_component_bytes(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        bytes: &[u8],
        effect: DirtyEffect,
    ) -> bool {
        let Some(slot) = self.slot_of(entity) else { return false; };
        let Some(column) = self.column_of(component_id) else { return false; };
        self.write_record(slot, column, bytes, effect);
        true
    }

    fn write_record(&mut self, slot: SlotIndex, column: usize, bytes: &[u8], effect: DirtyEffect) {
        let hooks = self.columns[column].hooks;
        let dirty_offset = self.columns[column].dirty_offset;
        let record = self.record_mut(slot, column);
        assert_eq!(record.len(), bytes.len(), "record size mismatch");

        (hooks.release)(record);
        record.copy_from_slice(bytes);
        if effect == DirtyEffect::Mark {
            record[dirty_offset] = 1;
        }
        (hooks.acquire)(record);
    }

    /// Raises the dirty byte of `entity`'s `component_id`.
    pub fn mark_dirty(&mut self, entity: Entity, component_id: ComponentID) -> bool {
        let Some(slot) = self.slot_of(entity) else { return false; };
        let Some(column) = self.column_of(component_id) else { return false; };
        let dirty_offset = self.columns[column].dirty_offset;
        self.record_mut(slot, column)[dirty_offset] = 1;
        true
    }

    /// Reads the dirty byte of `entity`'s `component_id`.
    #[track_caller]
    pub fn is_dirty(&self, entity: Entity, component_id: ComponentID) -> Option<bool> {
        let slot = self.slot_of(entity)?;
        let column = self.column_of(component_id)?;
        Some(self.shared_record(slot, column)[self.columns[column].dirty_offset] != 0)
    }

    // ── Structural operations ───────────────────────────────────────────────

    /// Binds `entity` to a free slot and populates default records.
    ///
    /// Returns `false` (and changes nothing) if the entity is already stored.
    pub fn add_entity(&mut self, entity: Entity) -> bool {
        debug_assert!(!entity.is_null(), "the sentinel entity cannot be stored");
        if self.contains(entity) {
            return false;
        }

        if self.len() == self.capacity {
            let grown = self.capacity * 2;
            tracing::debug!(archetype = %self.archetype, from = self.capacity, to = grown, "growing storage");
            let first_new_slot = self.capacity;
            self.resize(grown);
            self.free_pivot = first_new_slot;
        }

        let slot = self.next_free_slot();
        self.slots[slot] = entity;
        self.entity_index.insert(entity, slot);
        self.free_pivot = slot + 1;

        for column in 0..self.columns.len() {
            let defaults = Arc::clone(&self.columns[column].default_bytes);
            self.record_mut(slot, column).copy_from_slice(&defaults);
        }
        true
    }

    /// Pivot scan: resume from the last known free index, rescan from 0 only if needed.
    fn next_free_slot(&self) -> SlotIndex {
        let pivot = self.free_pivot.min(self.capacity);
        (pivot..self.capacity)
            .chain(0..pivot)
            .find(|&slot| self.slots[slot].is_null())
            .unwrap_or_else(|| unreachable!("a storage below capacity always has a free slot"))
    }

    /// Unbinds `entity`, running every component's release hook.
    ///
    /// An absent entity is logged and ignored. After removal the storage halves
    /// (compacting first) when at most a quarter of its slots are live and it
    /// is above [`MIN_CAPACITY`].
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        let Some(slot) = self.entity_index.remove(&entity) else {
            tracing::error!(archetype = %self.archetype, %entity, "remove_entity: entity is not stored here");
            return false;
        };

        for column in 0..self.columns.len() {
            let release = self.columns[column].hooks.release;
            release(self.record_mut(slot, column));
        }
        self.slots[slot] = Entity::NULL;
        self.free_pivot = self.free_pivot.min(slot);

        if self.len() * 4 <= self.capacity && self.capacity > MIN_CAPACITY {
            let shrunk = self.capacity / 2;
            tracing::debug!(archetype = %self.archetype, from = self.capacity, to = shrunk, live = self.len(), "shrinking storage");
            self.compact();
            self.resize(shrunk);
        }
        true
    }

    /// Moves live rows into the lowest slots.
    ///
    /// A front cursor looks for free slots, a back cursor for occupied ones;
    /// each pair is swapped until the cursors cross.
    fn compact(&mut self) {
        if self.capacity == 0 {
            return;
        }
        let mut front = 0usize;
        let mut back = self.capacity - 1;

        loop {
            while front < back && !self.slots[front].is_null() {
                front += 1;
            }
            while back > front && self.slots[back].is_null() {
                back -= 1;
            }
            if front >= back {
                break;
            }

            let entity = self.slots[back];
            // SAFETY: front != back, both rows lie inside the allocation and rows never overlap.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.record_ptr(back, 0) as *const u8,
                    self.record_ptr(front, 0),
                    self.stride,
                );
            }
            self.slots[front] = entity;
            self.slots[back] = Entity::NULL;
            self.entity_index.insert(entity, front);

            front += 1;
            back -= 1;
        }

        self.free_pivot = self.len();
        debug_assert!(self.slots[..self.len()].iter().all(|e| !e.is_null()));
    }

    /// Reallocates the buffer to `new_capacity` slots, copying the row prefix.
    ///
    /// ## Panics
    /// Panics if `new_capacity` cannot hold every live entity, or if a live
    /// row would be cut off (callers compact before shrinking).
    fn resize(&mut self, new_capacity: usize) {
        assert!(
            new_capacity >= self.len(),
            "storage of {} cannot shrink to {} slots with {} live entities",
            self.archetype,
            new_capacity,
            self.len()
        );
        assert!(
            self.slots[new_capacity.min(self.capacity)..].iter().all(|e| e.is_null()),
            "storage of {} must be compacted before shrinking",
            self.archetype
        );

        let new_buffer = Self::allocate(self.stride, self.align, new_capacity);
        let kept = self.capacity.min(new_capacity) * self.stride;
        // SAFETY: both buffers hold at least `kept` bytes and are distinct allocations.
        unsafe {
            ptr::copy_nonoverlapping(self.buffer.as_ptr(), new_buffer.as_ptr(), kept);
            alloc::dealloc(self.buffer.as_ptr(), Self::layout(self.stride, self.align, self.capacity));
        }

        self.buffer = new_buffer;
        self.capacity = new_capacity;
        self.slots.resize(new_capacity, Entity::NULL);
    }

    /// Starts a dirty-enumeration pass.
    ///
    /// Records are visited component by component; each raised flag is
    /// yielded once and cleared as it is yielded.
    pub fn dirty_components(&mut self) -> DirtyIter<'_> {
        DirtyIter { storage: self, column: 0, slot: 0 }
    }
}

impl Drop for ArchetypeStorage {
    fn drop(&mut self) {
        // SAFETY: the buffer was allocated with exactly this layout and is freed once.
        unsafe {
            alloc::dealloc(self.buffer.as_ptr(), Self::layout(self.stride, self.align, self.capacity));
        }
    }
}

impl std::fmt::Debug for ArchetypeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchetypeStorage")
            .field("archetype", &self.archetype)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("stride", &self.stride)
            .finish()
    }
}

/// Iterator returned by [`ArchetypeStorage::dirty_components`].
pub struct DirtyIter<'a> {
    storage: &'a mut ArchetypeStorage,
    column: usize,
    slot: SlotIndex,
}

impl<'a> Iterator for DirtyIter<'a> {
    type Item = DirtyRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.column < self.storage.columns.len() {
            let layout = &self.storage.columns[self.column];
            let (component_id, offset, size, dirty_offset) =
                (layout.component_id, layout.offset, layout.size, layout.dirty_offset);

            while self.slot < self.storage.capacity {
                let slot = self.slot;
                self.slot += 1;

                let entity = self.storage.slots[slot];
                if entity.is_null() {
                    continue;
                }

                let record = self.storage.record_ptr(slot, offset);
                // SAFETY: the record is inside the allocation. The iterator holds the
                // storage mutably for 'a and only ever writes dirty bytes of records it
                // has not yielded yet, so yielded slices are never written again.
                unsafe {
                    let flag = record.add(dirty_offset);
                    if *flag == 0 {
                        continue;
                    }
                    *flag = 0;
                    return Some(DirtyRecord {
                        entity,
                        component_id,
                        data: slice::from_raw_parts(record as *const u8, size),
                    });
                }
            }

            self.column += 1;
            self.slot = 0;
        }
        None
    }
}
