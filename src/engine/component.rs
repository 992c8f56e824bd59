//! # Component Registry
//!
//! This module assigns caller-chosen `ComponentID` values to Rust component
//! types and captures everything archetype storage needs to handle records of
//! that type without knowing it statically.
//!
//! ## Purpose
//! For every registered type the registry records:
//! - the record size and alignment,
//! - the default record bytes (zeroed, then [`Component::populate_default_values`]),
//! - type-erased serialize / deserialize / resource hooks,
//! - the byte offset of the one-byte dirty flag.
//!
//! ## Dirty offset discovery
//! The dirty offset is never declared by hand. Registration builds two zeroed
//! records, raises the dirty flag on one of them and takes the first byte at
//! which they differ. A type whose flag does not change any byte is rejected
//! with [`RegistryError::DirtyFlagNotFound`]: such a component would silently
//! never be reported as changed.
//!
//! ## Invariants
//! - `ComponentID` values and Rust types map one-to-one.
//! - The registry is owned by a [`Registry`](crate::engine::archetype::Registry)
//!   context and is immutable once that context is built.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
    io::{self, Read, Write},
    marker::PhantomData,
    mem::{align_of, size_of},
    sync::Arc,
};

use bytemuck::Pod;

use crate::engine::entity::Entity;
use crate::engine::error::RegistryError;
use crate::engine::manager::EntityManager;
use crate::engine::types::{ComponentID, COMPONENT_CAP, MAX_COMPONENT_ALIGN};


/// Plain-data record stored in archetype storage.
///
/// Components are `Pod`: they are copied verbatim when storage grows,
/// shrinks or compacts, and their default value starts from all-zero bytes.
/// Each component carries a one-byte dirty flag somewhere in its layout.
///
/// # Example
/// ```
/// use strata_ecs::Component;
///
/// #[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Health {
///     value: f32,
///     max: f32,
///     dirty: u8,
///     _pad: [u8; 3],
/// }
///
/// impl Component for Health {
///     fn populate_default_values(&mut self) {
///         self.value = 100.0;
///         self.max = 100.0;
///     }
///     fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
///     fn is_dirty(&self) -> bool { self.dirty != 0 }
/// }
/// ```
pub trait Component: Pod + fmt::Debug + Send + Sync + 'static {
    /// Fills in default field values on a zeroed record.
    fn populate_default_values(&mut self) {}

    /// Raises or clears the dirty flag.
    fn set_dirty(&mut self, dirty: bool);

    /// Returns the dirty flag.
    fn is_dirty(&self) -> bool;

    /// Writes the record. The default writes the raw bytes.
    fn serialize(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(bytemuck::bytes_of(self))
    }

    /// Reads the record in place. Returns `false` on malformed input.
    fn deserialize(&mut self, reader: &mut dyn Read) -> bool {
        reader.read_exact(bytemuck::bytes_of_mut(self)).is_ok()
    }

    /// Called after a value is written into storage.
    ///
    /// Components that reference external allocations increase their
    /// reference count here.
    fn acquire_resources(&self) {}

    /// Called before a value is overwritten or its entity is removed.
    fn release_resources(&self) {}
}

/// Type-erased hooks over raw record bytes.
#[derive(Clone, Copy)]
pub struct ComponentHooks {
    /// Serializes a record.
    pub serialize: fn(&[u8], &mut dyn Write) -> io::Result<()>,
    /// Deserializes into a record, leaving it untouched on failure.
    pub deserialize: fn(&mut [u8], &mut dyn Read) -> bool,
    /// Resource-acquire hook.
    pub acquire: fn(&[u8]),
    /// Resource-release hook.
    pub release: fn(&[u8]),
    /// Debug rendering for diagnostics.
    pub describe: fn(&[u8]) -> String,
}

impl ComponentHooks {
    fn of<T: Component>() -> Self {
        Self {
            serialize: |bytes, writer| bytemuck::pod_read_unaligned::<T>(bytes).serialize(writer),
            deserialize: |bytes, reader| {
                let mut value = bytemuck::pod_read_unaligned::<T>(bytes);
                if !value.deserialize(reader) {
                    return false;
                }
                bytes.copy_from_slice(bytemuck::bytes_of(&value));
                true
            },
            acquire: |bytes| bytemuck::pod_read_unaligned::<T>(bytes).acquire_resources(),
            release: |bytes| bytemuck::pod_read_unaligned::<T>(bytes).release_resources(),
            describe: |bytes| format!("{:?}", bytemuck::pod_read_unaligned::<T>(bytes)),
        }
    }
}

impl fmt::Debug for ComponentHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ComponentHooks")
    }
}

/// Describes a registered component type.
#[derive(Clone, Debug)]
pub struct ComponentDesc {
    /// Runtime identifier assigned at registration.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the record in bytes.
    pub size: usize,

    /// Alignment of the record in bytes.
    pub align: usize,

    /// Offset of the dirty byte inside the record.
    pub dirty_offset: usize,

    /// Bytes of a default-populated record.
    pub default_bytes: Arc<[u8]>,

    /// Type-erased hooks.
    pub hooks: ComponentHooks,
}

impl ComponentDesc {
    /// Builds the descriptor for `T`, locating its dirty byte.
    pub fn of<T: Component>(component_id: ComponentID) -> Result<Self, RegistryError> {
        let name = type_name::<T>();
        if size_of::<T>() == 0 {
            return Err(RegistryError::ZeroSized { name });
        }
        if align_of::<T>() > MAX_COMPONENT_ALIGN {
            return Err(RegistryError::UnsupportedAlignment {
                name,
                align: align_of::<T>(),
                max: MAX_COMPONENT_ALIGN,
            });
        }

        let dirty_offset = locate_dirty_offset::<T>().ok_or(RegistryError::DirtyFlagNotFound { name })?;

        let mut default_value = T::zeroed();
        default_value.populate_default_values();

        Ok(Self {
            component_id,
            name,
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            dirty_offset,
            default_bytes: Arc::from(bytemuck::bytes_of(&default_value)),
            hooks: ComponentHooks::of::<T>(),
        })
    }
}

/// Finds the first byte that differs between a clean and a dirty zeroed record.
fn locate_dirty_offset<T: Component>() -> Option<usize> {
    let clean = T::zeroed();
    let mut dirty = T::zeroed();
    dirty.set_dirty(true);

    bytemuck::bytes_of(&clean)
        .iter()
        .zip(bytemuck::bytes_of(&dirty))
        .position(|(a, b)| a != b)
}

/// Diagnostic view of a raw component record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeComponent {
    /// Component id.
    pub component_id: ComponentID,
    /// Rust type name.
    pub name: &'static str,
    /// `Debug` rendering of the record.
    pub value: String,
    /// Whether the dirty byte is raised.
    pub dirty: bool,
}

/// External serializer that intercepts a component type's own hooks.
///
/// Serializers see the owning world and entity, which replication uses to
/// translate entity references or skip fields for particular peers.
pub trait ComponentSerializer<T: Component>: Send + Sync + 'static {
    /// Writes `value`, which belongs to `entity`.
    fn serialize(
        &self,
        world: &EntityManager,
        entity: Entity,
        value: &T,
        writer: &mut dyn Write,
    ) -> io::Result<()>;

    /// Reads into `value`. Returns `false` on malformed input.
    fn deserialize(
        &self,
        world: &EntityManager,
        entity: Entity,
        value: &mut T,
        reader: &mut dyn Read,
    ) -> bool;
}

/// Object-safe form of [`ComponentSerializer`] over raw record bytes.
pub trait ErasedSerializer: Send + Sync {
    /// See [`ComponentSerializer::serialize`].
    fn serialize(&self, world: &EntityManager, entity: Entity, record: &[u8], writer: &mut dyn Write) -> io::Result<()>;

    /// See [`ComponentSerializer::deserialize`].
    fn deserialize(&self, world: &EntityManager, entity: Entity, record: &mut [u8], reader: &mut dyn Read) -> bool;
}

struct SerializerAdapter<T, S> {
    inner: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component, S: ComponentSerializer<T>> ErasedSerializer for SerializerAdapter<T, S> {
    fn serialize(&self, world: &EntityManager, entity: Entity, record: &[u8], writer: &mut dyn Write) -> io::Result<()> {
        let value = bytemuck::pod_read_unaligned::<T>(record);
        self.inner.serialize(world, entity, &value, writer)
    }

    fn deserialize(&self, world: &EntityManager, entity: Entity, record: &mut [u8], reader: &mut dyn Read) -> bool {
        let mut value = bytemuck::pod_read_unaligned::<T>(record);
        if !self.inner.deserialize(world, entity, &mut value, reader) {
            return false;
        }
        record.copy_from_slice(bytemuck::bytes_of(&value));
        true
    }
}

/// Mapping between Rust component types and `ComponentID` values.
///
/// ## Design
/// - `by_type` maps `TypeId -> ComponentID`.
/// - `by_id` stores `ComponentDesc` indexed by `ComponentID`.
/// - `order` keeps registration order, which fixes record layout.
/// - `serializers` holds optional external serializers per id.
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<Option<ComponentDesc>>,
    order: Vec<ComponentID>,
    serializers: HashMap<ComponentID, Arc<dyn ErasedSerializer>>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self {
            by_type: HashMap::new(),
            by_id: vec![None; COMPONENT_CAP],
            order: Vec::new(),
            serializers: HashMap::new(),
        }
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.order)
            .field("serializers", &self.serializers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Registers `T` under `component_id`.
    ///
    /// ## Errors
    /// - the id or the type is already registered,
    /// - the dirty byte cannot be located,
    /// - the type is zero-sized or over-aligned.
    pub fn register<T: Component>(&mut self, component_id: ComponentID) -> Result<(), RegistryError> {
        if (component_id as usize) >= COMPONENT_CAP {
            return Err(RegistryError::UnknownComponent(component_id));
        }
        if let Some(existing) = &self.by_id[component_id as usize] {
            return Err(RegistryError::DuplicateComponent { id: component_id, existing: existing.name });
        }
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return Err(RegistryError::DuplicateComponentType { name: type_name::<T>(), id });
        }

        let desc = ComponentDesc::of::<T>(component_id)?;
        tracing::debug!(
            component_id,
            name = desc.name,
            size = desc.size,
            dirty_offset = desc.dirty_offset,
            "registered component"
        );

        self.by_type.insert(desc.type_id, component_id);
        self.by_id[component_id as usize] = Some(desc);
        self.order.push(component_id);
        Ok(())
    }

    /// Installs an external serializer for `T`, replacing any previous one.
    pub fn set_serializer<T, S>(&mut self, serializer: S) -> Result<(), RegistryError>
    where
        T: Component,
        S: ComponentSerializer<T>,
    {
        let component_id = self.require_id_of::<T>()?;
        self.serializers.insert(
            component_id,
            Arc::new(SerializerAdapter { inner: serializer, _marker: PhantomData }),
        );
        Ok(())
    }

    /// Returns the external serializer for `component_id`, if one is installed.
    pub fn serializer(&self, component_id: ComponentID) -> Option<&Arc<dyn ErasedSerializer>> {
        self.serializers.get(&component_id)
    }

    /// Returns the `ComponentID` for `T`, if registered.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the `ComponentID` for `T` or [`RegistryError::UnregisteredType`].
    pub fn require_id_of<T: 'static>(&self) -> Result<ComponentID, RegistryError> {
        self.id_of::<T>().ok_or(RegistryError::UnregisteredType(type_name::<T>()))
    }

    /// Returns the `ComponentID` registered for a runtime `TypeId`.
    pub fn id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the descriptor for `component_id`, if registered.
    pub fn description(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize).and_then(|o| o.as_ref())
    }

    /// Returns `true` if `component_id` is registered.
    pub fn is_registered(&self, component_id: ComponentID) -> bool {
        self.description(component_id).is_some()
    }

    /// Component ids in registration order.
    pub fn registration_order(&self) -> &[ComponentID] {
        &self.order
    }

    /// Position of `component_id` in registration order.
    pub fn registration_index(&self, component_id: ComponentID) -> Option<usize> {
        self.order.iter().position(|&id| id == component_id)
    }

    /// Returns the descriptor for `component_id`.
    ///
    /// ## Panics
    /// Panics if the id is not registered; asking for an unknown id is a programmer error.
    pub fn expect_description(&self, component_id: ComponentID) -> &ComponentDesc {
        match self.description(component_id) {
            Some(desc) => desc,
            None => panic!("component id {component_id} is not registered"),
        }
    }

    /// Record size of `component_id` in bytes.
    ///
    /// ## Panics
    /// Panics if the id is not registered.
    pub fn component_size(&self, component_id: ComponentID) -> usize {
        self.expect_description(component_id).size
    }

    /// Offset of the dirty byte inside a record of `component_id`.
    ///
    /// ## Panics
    /// Panics if the id is not registered.
    pub fn dirty_offset(&self, component_id: ComponentID) -> usize {
        self.expect_description(component_id).dirty_offset
    }

    /// Renders raw record bytes of `component_id` for debug views.
    ///
    /// ## Panics
    /// Panics if the id is not registered or `bytes` has the wrong length.
    pub fn cast_to_runtime_component(&self, component_id: ComponentID, bytes: &[u8]) -> RuntimeComponent {
        let desc = self.expect_description(component_id);
        assert_eq!(bytes.len(), desc.size, "record length does not match component {}", desc.name);
        RuntimeComponent {
            component_id,
            name: desc.name,
            value: (desc.hooks.describe)(bytes),
            dirty: bytes[desc.dirty_offset] != 0,
        }
    }
}
