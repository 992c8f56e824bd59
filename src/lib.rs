//! # Strata ECS
//!
//! Archetype-based Entity-Component-System runtime with a dependency-driven
//! parallel scheduler.
//!
//! ## Design Goals
//! - One dense byte arena per archetype, addressed by precomputed offsets
//! - Change tracking through a one-byte dirty flag located automatically
//! - Systems scheduled per tick from their declared component access
//! - Explicit registry context instead of process-wide state
//!
//! ## Quick tour
//! ```ignore
//! let mut builder = RegistryBuilder::new();
//! builder.register_component::<Position>(0)?;
//! builder.register_component::<Velocity>(1)?;
//! builder.register_archetype(ArchetypeId::new(0, 0, 1), &[0, 1])?;
//!
//! let mut world = EntityManager::new(builder.build(), EcsConfig::default());
//! let mut schedule = ScheduleBuilder::new(EcsConfig::default());
//! schedule.add_system(movement, SystemOptions::new());
//! let mut scheduler = schedule.build(&world)?;
//! scheduler.run_tick(&mut world)?;
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]
#![deny(dead_code)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::types::{
    AccessMode,
    AccessSets,
    ArchetypeId,
    ComponentID,
    EntityNumericId,
    Signature,
    MIN_CAPACITY,
};

pub use engine::error::{
    ConfigError,
    ECSError,
    ECSResult,
    EntityError,
    ExecutionError,
    RegistryError,
    ScheduleError,
};

pub use engine::config::EcsConfig;

pub use engine::component::{
    Component,
    ComponentRegistry,
    ComponentSerializer,
    RuntimeComponent,
};

pub use engine::archetype::{
    Archetype,
    Registry,
    RegistryBuilder,
};

pub use engine::borrow::ComponentRef;

pub use engine::storage::{
    ArchetypeStorage,
    DirtyEffect,
    DirtyRecord,
};

pub use engine::entity::{Entity, EntityIdAllocator};

pub use engine::manager::{
    EntityManager,
    LifecycleHook,
    OwnerId,
};

pub use engine::commands::{Command, CommandOutcome};

pub use engine::query::{Query, QueryBuilder, QueryItem};

pub use engine::systems::{FnSystem, System, SystemSetup};

pub use engine::scheduler::{
    ScheduleBuilder,
    Scheduler,
    SystemOptions,
    TickReport,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use strata_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ArchetypeId,
        Command,
        Component,
        DirtyEffect,
        EcsConfig,
        Entity,
        EntityManager,
        FnSystem,
        OwnerId,
        QueryBuilder,
        RegistryBuilder,
        ScheduleBuilder,
        System,
        SystemOptions,
        SystemSetup,
    };
}
