//! Error types for registration, entity lifecycle, scheduling and execution.
//!
//! This module declares focused, composable error types used across the
//! engine. Each error carries enough context to make failures actionable while
//! remaining cheap to pass around or convert into the aggregate [`ECSError`].
//!
//! ## Typical flow
//! Registration and schedule construction return [`RegistryError`] and
//! [`ScheduleError`]; entity operations return [`EntityError`]; a tick returns
//! [`ExecutionError`] when a system body faulted. Higher-level code uses `?` to
//! bubble any of them into [`ECSError`].
//!
//! ## Fatal vs. soft failures
//! Misconfiguration (duplicate registration, an undiscoverable dirty byte,
//! cross-group ordering, ...) is never silently accepted: it surfaces as an
//! `Err` from the builder that detected it. Programmer errors at runtime, such
//! as mutating the world during a tick, panic instead and have no variant here.
//!
//! ## Display vs. Debug
//! * `Display` (via `thiserror`) is short and suitable for logs.
//! * `Debug` (derived) retains full structure for diagnostics.

use thiserror::Error;

use crate::engine::entity::Entity;
use crate::engine::types::{ArchetypeId, ComponentID};


/// Failures while registering components or archetypes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The component id is already taken by another registration.
    #[error("component id {id} is already registered (existing: {existing})")]
    DuplicateComponent {
        /// Offending id.
        id: ComponentID,
        /// Name of the type already registered under `id`.
        existing: &'static str,
    },

    /// The Rust type is already registered under a different id.
    #[error("component type {name} is already registered as id {id}")]
    DuplicateComponentType {
        /// Rust type name.
        name: &'static str,
        /// Id it was first registered under.
        id: ComponentID,
    },

    /// Setting the dirty flag changed no byte of a zeroed record.
    #[error("component {name}: dirty flag does not change any byte of the record")]
    DirtyFlagNotFound {
        /// Rust type name.
        name: &'static str,
    },

    /// The component requires an alignment the byte arena cannot provide.
    #[error("component {name}: alignment {align} exceeds the supported maximum of {max}")]
    UnsupportedAlignment {
        /// Rust type name.
        name: &'static str,
        /// Alignment of the type.
        align: usize,
        /// Largest supported alignment.
        max: usize,
    },

    /// Zero-sized types have no room for a dirty byte.
    #[error("component {name} is zero-sized")]
    ZeroSized {
        /// Rust type name.
        name: &'static str,
    },

    /// A component id was referenced but never registered.
    #[error("component id {0} is not registered")]
    UnknownComponent(ComponentID),

    /// A Rust type was referenced but never registered.
    #[error("component type {0} is not registered")]
    UnregisteredType(&'static str),

    /// The archetype id is already registered.
    #[error("archetype {0} is already registered")]
    DuplicateArchetype(ArchetypeId),

    /// An archetype must contain at least one component.
    #[error("archetype {0} has no components")]
    EmptyArchetype(ArchetypeId),
}

/// Failures of entity lifecycle and component access operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// The archetype was never registered.
    #[error("archetype {0} is not registered")]
    UnknownArchetype(ArchetypeId),

    /// Every numeric id of the archetype is in use.
    #[error("numeric id space of archetype {0} is exhausted")]
    IdsExhausted(ArchetypeId),

    /// The entity does not exist.
    #[error("entity {0} does not exist")]
    NotFound(Entity),

    /// The entity's archetype does not contain the component.
    #[error("entity {entity} has no component {component_id}")]
    MissingComponent {
        /// Target entity.
        entity: Entity,
        /// Requested component.
        component_id: ComponentID,
    },

    /// Component bytes could not be decoded.
    #[error("failed to decode component {component_id} for entity {entity}")]
    DecodeFailed {
        /// Target entity.
        entity: Entity,
        /// Component being decoded.
        component_id: ComponentID,
    },

    /// Writing component bytes failed.
    #[error("failed to encode component {component_id}: {message}")]
    EncodeFailed {
        /// Component being encoded.
        component_id: ComponentID,
        /// Underlying I/O message.
        message: String,
    },
}

/// Failures while building a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Two systems or groups share a name.
    #[error("system name `{0}` is registered twice")]
    DuplicateSystem(String),

    /// An ordering or grouping declaration names an unregistered system.
    #[error("system `{system}` references unknown system `{reference}`")]
    UnknownSystem {
        /// Declaring system.
        system: String,
        /// Name that could not be resolved.
        reference: String,
    },

    /// A system was placed into something that is not a group.
    #[error("system `{system}` is placed in `{parent}`, which is not a group")]
    NotAGroup {
        /// Declaring system.
        system: String,
        /// Referenced parent.
        parent: String,
    },

    /// Ordering across different parent groups.
    #[error("system `{system}` orders itself against `{other}` in a different group")]
    CrossGroupOrdering {
        /// Declaring system.
        system: String,
        /// System in another group.
        other: String,
    },

    /// The explicit ordering declarations form a cycle.
    #[error("explicit ordering forms a cycle through: {0:?}")]
    Cycle(Vec<String>),

    /// A query could not be resolved during system setup.
    #[error("setup of system `{system}` failed: {source}")]
    Setup {
        /// System whose setup failed.
        system: String,
        /// Underlying registry error.
        #[source]
        source: RegistryError,
    },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Failures surfaced by a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// One or more system bodies panicked.
    #[error("systems panicked during the tick: {systems:?}")]
    SystemPanicked {
        /// Names of the faulted systems, in completion order.
        systems: Vec<String>,
    },
}

/// Failures while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),

    /// A field holds an unusable value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self { ConfigError::Parse(e.to_string()) }
}

/// Aggregate error for the whole engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ECSError {
    /// Registration failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Entity or component failure.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Schedule construction failure.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Tick execution failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience result alias for engine operations.
pub type ECSResult<T> = Result<T, ECSError>;
