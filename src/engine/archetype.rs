//! Archetype definitions and the registry context.
//!
//! An [`Archetype`] is an immutable, order-irrelevant set of component types
//! identified by an [`ArchetypeId`]. Each archetype defines exactly one record
//! layout in [`ArchetypeStorage`](crate::engine::storage::ArchetypeStorage).
//!
//! ## Registration boundary
//! Components and archetypes are declared on a [`RegistryBuilder`] and frozen
//! into a [`Registry`] by [`RegistryBuilder::build`]. The frozen registry is
//! shared (`Arc`) by the entity manager and queries; there is no way to
//! change an archetype's component set once storage exists.
//!
//! ```
//! # use strata_ecs::{ArchetypeId, Component, RegistryBuilder};
//! # #[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
//! # #[repr(C)]
//! # struct Position { x: f32, y: f32, dirty: u8, _pad: [u8; 3] }
//! # impl Component for Position {
//! #     fn set_dirty(&mut self, d: bool) { self.dirty = d as u8; }
//! #     fn is_dirty(&self) -> bool { self.dirty != 0 }
//! # }
//! let mut builder = RegistryBuilder::new();
//! builder.register_component::<Position>(0)?;
//! builder.register_archetype(ArchetypeId::new(1, 0, 0), &[0])?;
//! let registry = builder.build();
//! assert_eq!(registry.archetypes().count(), 1);
//! # Ok::<(), strata_ecs::RegistryError>(())
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::component::{Component, ComponentRegistry, ComponentSerializer};
use crate::engine::error::RegistryError;
use crate::engine::types::{build_signature, ArchetypeId, ComponentID, Signature};


/// Immutable component set of one entity layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Archetype {
    id: ArchetypeId,
    /// Component ids in component registration order.
    components: Vec<ComponentID>,
    signature: Signature,
}

impl Archetype {
    /// Archetype identifier.
    #[inline]
    pub fn id(&self) -> ArchetypeId { self.id }

    /// Component ids in layout order.
    #[inline]
    pub fn components(&self) -> &[ComponentID] { &self.components }

    /// Component set as a bitset.
    #[inline]
    pub fn signature(&self) -> &Signature { &self.signature }

    /// Returns `true` if the archetype contains `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool { self.signature.has(component_id) }
}

/// Collects component and archetype registrations before the world exists.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    components: ComponentRegistry,
    archetypes: BTreeMap<ArchetypeId, Archetype>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self { Self::default() }

    /// Registers component `T` under `component_id`.
    pub fn register_component<T: Component>(&mut self, component_id: ComponentID) -> Result<&mut Self, RegistryError> {
        self.components.register::<T>(component_id)?;
        Ok(self)
    }

    /// Installs an external serializer for `T`.
    pub fn register_serializer<T, S>(&mut self, serializer: S) -> Result<&mut Self, RegistryError>
    where
        T: Component,
        S: ComponentSerializer<T>,
    {
        self.components.set_serializer::<T, S>(serializer)?;
        Ok(self)
    }

    /// Registers an archetype over already-registered components.
    ///
    /// Duplicate ids in `components` collapse; the declaration order does not matter.
    pub fn register_archetype(
        &mut self,
        id: ArchetypeId,
        components: &[ComponentID],
    ) -> Result<&mut Self, RegistryError> {
        if self.archetypes.contains_key(&id) {
            return Err(RegistryError::DuplicateArchetype(id));
        }
        if components.is_empty() {
            return Err(RegistryError::EmptyArchetype(id));
        }
        if let Some(&unknown) = components.iter().find(|&&c| !self.components.is_registered(c)) {
            return Err(RegistryError::UnknownComponent(unknown));
        }

        let signature = build_signature(components);
        let mut ordered: Vec<ComponentID> = signature.iterate_over_components().collect();
        ordered.sort_by_key(|&c| self.components.registration_index(c));

        tracing::debug!(archetype = %id, components = ?ordered, "registered archetype");
        self.archetypes.insert(id, Archetype { id, components: ordered, signature });
        Ok(self)
    }

    /// Freezes the registrations into a shareable [`Registry`].
    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            components: self.components,
            archetypes: self.archetypes,
        })
    }
}

/// Frozen component and archetype metadata, shared by the whole world.
#[derive(Debug)]
pub struct Registry {
    components: ComponentRegistry,
    archetypes: BTreeMap<ArchetypeId, Archetype>,
}

impl Registry {
    /// Component metadata.
    #[inline]
    pub fn components(&self) -> &ComponentRegistry { &self.components }

    /// Looks up an archetype.
    #[inline]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> { self.archetypes.get(&id) }

    /// All archetypes in id order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> + '_ { self.archetypes.values() }

    /// Archetypes containing all of `required` and none of `excluded`.
    pub fn matching_archetypes<'a>(
        &'a self,
        required: &'a Signature,
        excluded: &'a Signature,
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        self.archetypes
            .values()
            .filter(move |a| a.signature.contains_all(required) && a.signature.is_disjoint(excluded))
    }
}
