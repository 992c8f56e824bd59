//! # Commands
//!
//! Deferred structural mutations recorded while a tick is executing.
//!
//! ## Purpose
//! Systems only see the world through `&EntityManager` during their body, so
//! they cannot create or destroy entities directly. Instead they record a
//! [`Command`] with [`EntityManager::defer`]. The scheduler drains the queue
//! after the tick barrier, once the world is no longer executing, and before
//! any post-step runs.
//!
//! ## Invariants
//! - Commands are applied in the order they were recorded.
//! - A failing command is logged and skipped; it never aborts the rest of the queue.
//! - A faulted tick discards its queue unapplied.

use crate::engine::entity::Entity;
use crate::engine::error::EntityError;
use crate::engine::manager::{EntityManager, OwnerId};
use crate::engine::storage::DirtyEffect;
use crate::engine::types::{ArchetypeId, ComponentID};


/// A deferred world mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Creates an entity, optionally assigning an owner.
    Create {
        /// Archetype of the new entity.
        archetype: ArchetypeId,
        /// Owner to record; `None` leaves the entity system-owned.
        owner: Option<OwnerId>,
    },

    /// Destroys an entity.
    Destroy {
        /// Entity to remove from the world.
        entity: Entity,
    },

    /// Changes the owner of an entity.
    SetOwner {
        /// Target entity.
        entity: Entity,
        /// New owner.
        owner: OwnerId,
    },

    /// Overwrites one component record with raw bytes.
    SetComponent {
        /// Target entity.
        entity: Entity,
        /// Component to overwrite.
        component_id: ComponentID,
        /// Record bytes; must match the component size.
        bytes: Box<[u8]>,
        /// Whether the write raises the dirty byte.
        effect: DirtyEffect,
    },
}

/// Result of applying one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// An entity was created.
    Created(Entity),
    /// The command changed an existing entity.
    Applied,
    /// The target did not exist; nothing changed.
    Ignored,
}

impl Command {
    /// Applies the command to `world`.
    ///
    /// ## Panics
    /// Panics if `world` is executing a tick.
    pub fn apply(self, world: &mut EntityManager) -> Result<CommandOutcome, EntityError> {
        match self {
            Command::Create { archetype, owner } => {
                let entity = match owner {
                    Some(owner) => world.create_entity_owned(archetype, owner)?,
                    None => world.create_entity(archetype)?,
                };
                Ok(CommandOutcome::Created(entity))
            }
            Command::Destroy { entity } => Ok(if world.destroy_entity(entity) {
                CommandOutcome::Applied
            } else {
                CommandOutcome::Ignored
            }),
            Command::SetOwner { entity, owner } => {
                world.set_owner(entity, owner)?;
                Ok(CommandOutcome::Applied)
            }
            Command::SetComponent { entity, component_id, bytes, effect } => {
                world.set_component_bytes(entity, component_id, &bytes, effect)?;
                Ok(CommandOutcome::Applied)
            }
        }
    }
}
