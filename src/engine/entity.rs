//! Entity identity and per-archetype numeric id allocation.
//!
//! An [`Entity`] is a plain value `{ archetype, id }`. Numeric ids are only
//! unique inside one archetype: two entities of different archetypes may
//! share the same number.
//!
//! ## Wire representation
//! ```text
//! | numeric id: u32 | mod_id: u16 | category_id: u16 | object_id: u16 |
//! ```
//! All fields little-endian, 10 bytes total.
//!
//! ## Id allocation
//! [`EntityIdAllocator`] hands out ids by scanning forward from a cursor. A
//! freed id moves the cursor back to itself, so create/destroy churn keeps
//! reusing the same low ids. The scan wraps to 0 once before reporting the id
//! space exhausted.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::engine::types::{ArchetypeId, EntityNumericId};


/// Numeric id reserved for the free-slot sentinel.
pub const NULL_ENTITY_ID: EntityNumericId = EntityNumericId::MAX;

/// Size of an encoded entity in bytes.
pub const ENTITY_WIRE_SIZE: usize = 10;

/// Entity handle: archetype plus per-archetype numeric id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Archetype the entity belongs to.
    pub archetype: ArchetypeId,
    /// Numeric id, unique within `archetype`.
    pub id: EntityNumericId,
}

impl Entity {
    /// Sentinel marking a free storage slot.
    pub const NULL: Entity = Entity {
        archetype: ArchetypeId::new(0, 0, 0),
        id: NULL_ENTITY_ID,
    };

    /// Creates an entity handle.
    #[inline]
    pub const fn new(archetype: ArchetypeId, id: EntityNumericId) -> Self {
        Self { archetype, id }
    }

    /// Returns `true` for the free-slot sentinel.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.id == NULL_ENTITY_ID
    }

    /// Encodes the entity into its 10-byte wire form.
    pub fn to_bytes(self) -> [u8; ENTITY_WIRE_SIZE] {
        let mut bytes = [0u8; ENTITY_WIRE_SIZE];
        bytes[0..4].copy_from_slice(&self.id.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.archetype.mod_id.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.archetype.category_id.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.archetype.object_id.to_le_bytes());
        bytes
    }

    /// Decodes an entity from its 10-byte wire form.
    pub fn from_bytes(bytes: [u8; ENTITY_WIRE_SIZE]) -> Self {
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Self {
            id: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            archetype: ArchetypeId::new(u16_at(4), u16_at(6), u16_at(8)),
        }
    }

    /// Writes the wire form.
    pub fn encode(self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Reads the wire form.
    pub fn decode(reader: &mut dyn Read) -> io::Result<Self> {
        let mut bytes = [0u8; ENTITY_WIRE_SIZE];
        reader.read_exact(&mut bytes)?;
        Ok(Self::from_bytes(bytes))
    }
}

impl Default for Entity {
    fn default() -> Self { Self::NULL }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Entity(null)");
        }
        write!(f, "Entity({}#{})", self.archetype, self.id)
    }
}

/// Allocates numeric ids for one archetype.
#[derive(Debug)]
pub struct EntityIdAllocator {
    live: HashSet<EntityNumericId>,
    cursor: EntityNumericId,
    limit: EntityNumericId,
}

impl EntityIdAllocator {
    /// Creates an allocator handing out ids in `0..limit`.
    ///
    /// `limit` is clamped so the sentinel id is never produced.
    pub fn new(limit: EntityNumericId) -> Self {
        Self {
            live: HashSet::new(),
            cursor: 0,
            limit: limit.min(NULL_ENTITY_ID),
        }
    }

    /// Number of ids currently in use.
    #[inline]
    pub fn live_count(&self) -> usize { self.live.len() }

    /// Returns `true` if `id` is in use.
    #[inline]
    pub fn is_live(&self, id: EntityNumericId) -> bool { self.live.contains(&id) }

    /// Reserves the next free id, or `None` if every id is in use.
    pub fn allocate(&mut self) -> Option<EntityNumericId> {
        if self.live.len() >= self.limit as usize {
            return None;
        }

        let id = (self.cursor..self.limit)
            .chain(0..self.cursor)
            .find(|candidate| !self.live.contains(candidate))?;

        self.live.insert(id);
        self.cursor = if id + 1 >= self.limit { 0 } else { id + 1 };
        Some(id)
    }

    /// Releases `id`. Returns `false` if it was not in use.
    pub fn free(&mut self, id: EntityNumericId) -> bool {
        if !self.live.remove(&id) {
            return false;
        }
        self.cursor = id;
        true
    }
}
