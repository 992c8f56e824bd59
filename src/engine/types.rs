//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental identifiers, signatures and access
//! descriptors** shared across the engine: component registration, archetype
//! storage, queries and the system scheduler.
//!
//! ## Design Philosophy
//!
//! - **Small copyable identifiers** for components, archetypes and systems.
//! - **Bitset-based signatures** for archetype matching and access tracking.
//! - **Explicit access declaration** so the scheduler can infer ordering.
//!
//! ## Archetype identity
//!
//! Archetypes are addressed by a three-part identifier mirroring the wire
//! representation used by replication collaborators:
//!
//! ```text
//! | mod_id: u16 | category_id: u16 | object_id: u16 |
//! ```
//!
//! ## Signatures
//!
//! A [`Signature`] is a fixed-size array of `u64` words with one bit per
//! [`ComponentID`]. Signatures are used both for archetype composition and for
//! the read/write sets in [`AccessSets`].
//!
//! This module contains **no unsafe code**.

use std::fmt;

use serde::{Deserialize, Serialize};


/// Identifier of a registered component type, chosen by the caller at registration.
pub type ComponentID = u16;

/// Per-archetype numeric entity identifier.
pub type EntityNumericId = u32;

/// Slot index inside an archetype storage.
pub type SlotIndex = usize;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 4096;

/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Smallest capacity an archetype storage ever holds.
pub const MIN_CAPACITY: usize = 16;

/// Largest component alignment the byte arena supports (its word size).
pub const MAX_COMPONENT_ALIGN: usize = std::mem::align_of::<u64>();

/// Three-part archetype identifier.
///
/// Equality and ordering are structural. The identifier is fixed when the
/// archetype is registered and never changes afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArchetypeId {
    /// Identifier of the content package that declared the archetype.
    pub mod_id: u16,
    /// Category within the package.
    pub category_id: u16,
    /// Object within the category.
    pub object_id: u16,
}

impl ArchetypeId {
    /// Creates an archetype identifier from its three parts.
    #[inline]
    pub const fn new(mod_id: u16, category_id: u16, object_id: u16) -> Self {
        Self { mod_id, category_id, object_id }
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.mod_id, self.category_id, self.object_id)
    }
}

/// Bitset representing a set of components.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self { components: [0; SIGNATURE_SIZE] }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iterate_over_components()).finish()
    }
}

#[inline]
const fn word_and_mask(component_id: ComponentID) -> (usize, u64) {
    let id = component_id as usize;
    (id / 64, 1u64 << (id % 64))
}

impl Signature {
    /// Adds `component_id`.
    ///
    /// ## Panics
    /// Panics if `component_id >= COMPONENT_CAP`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let (word, mask) = word_and_mask(component_id);
        self.components[word] |= mask;
    }

    /// Removes `component_id`. Ids beyond [`COMPONENT_CAP`] are ignored.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let (word, mask) = word_and_mask(component_id);
        if let Some(bits) = self.components.get_mut(word) {
            *bits &= !mask;
        }
    }

    /// Returns `true` if `component_id` is present. Ids beyond [`COMPONENT_CAP`] never are.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let (word, mask) = word_and_mask(component_id);
        self.components.get(word).is_some_and(|bits| bits & mask != 0)
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if no component of `signature` is present.
    #[inline]
    pub fn is_disjoint(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == 0)
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Adds every component of `other` to this signature.
    #[inline]
    pub fn union_with(&mut self, other: &Signature) {
        for (a, b) in self.components.iter_mut().zip(other.components.iter()) {
            *a |= *b;
        }
    }

    /// Component ids present, ascending.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components.iter().enumerate().flat_map(|(word, &bits)| {
            let mut remaining = bits;
            std::iter::from_fn(move || {
                (remaining != 0).then(|| {
                    let bit = remaining.trailing_zeros() as usize;
                    remaining &= remaining - 1;
                    (word * 64 + bit) as ComponentID
                })
            })
        })
    }
}

/// Signature holding exactly `component_ids`.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    component_ids.iter().fold(Signature::default(), |mut signature, &id| {
        signature.set(id);
        signature
    })
}

/// Access mode currently recorded for a component in the scheduler's access table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessMode {
    /// No system has touched the component yet this tick.
    #[default]
    None,
    /// Shared read access.
    Read,
    /// Exclusive write access.
    Write,
}

/// Declares the component access set of a system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read by the system.
    pub read: Signature,
    /// Components written by the system.
    pub write: Signature,
}

impl AccessSets {
    /// Records a read of `component_id`. A component already written stays a write.
    #[inline]
    pub fn add_read(&mut self, component_id: ComponentID) {
        if !self.write.has(component_id) {
            self.read.set(component_id);
        }
    }

    /// Records a write of `component_id`, upgrading any previous read.
    #[inline]
    pub fn add_write(&mut self, component_id: ComponentID) {
        self.read.clear(component_id);
        self.write.set(component_id);
    }

    /// Merges another access set into this one; writes win over reads.
    pub fn union_with(&mut self, other: &AccessSets) {
        self.write.union_with(&other.write);
        self.read.union_with(&other.read);
        for component_id in self.write.iterate_over_components().collect::<Vec<_>>() {
            self.read.clear(component_id);
        }
    }

    /// Returns `true` if nothing is read or written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}
