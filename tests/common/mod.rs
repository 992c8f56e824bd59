#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};

use strata_ecs::{ArchetypeId, Component, EcsConfig, EntityManager, RegistryBuilder};

pub const AGENT: ArchetypeId = ArchetypeId::new(1, 0, 1);
pub const FIRM: ArchetypeId = ArchetypeId::new(1, 0, 2);
pub const MARKER: ArchetypeId = ArchetypeId::new(1, 1, 1);

pub const CASH: u16 = 0;
pub const HUNGER: u16 = 1;
pub const INVENTORY: u16 = 2;
pub const PRICE: u16 = 3;
pub const TAG: u16 = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Cash {
    pub value: f32,
    pub dirty: u8,
    pub _pad: [u8; 3],
}

impl Component for Cash {
    fn populate_default_values(&mut self) { self.value = 10.0; }
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Hunger {
    pub value: f32,
    pub dirty: u8,
    pub _pad: [u8; 3],
}

impl Component for Hunger {
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Inventory {
    pub units: f64,
    pub target: f64,
    pub dirty: u8,
    pub _pad: [u8; 7],
}

impl Component for Inventory {
    fn populate_default_values(&mut self) { self.target = 50.0; }
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Price {
    pub value: f32,
    pub dirty: u8,
    pub _pad: [u8; 3],
}

impl Component for Price {
    fn populate_default_values(&mut self) { self.value = 1.0; }
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Tag {
    pub dirty: u8,
}

impl Component for Tag {
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

/// Agents hold cash and hunger, firms hold cash, inventory and a price,
/// markers only carry a tag.
pub fn make_world(config: EcsConfig) -> EntityManager {
    let mut builder = RegistryBuilder::new();
    builder.register_component::<Cash>(CASH).unwrap();
    builder.register_component::<Hunger>(HUNGER).unwrap();
    builder.register_component::<Inventory>(INVENTORY).unwrap();
    builder.register_component::<Price>(PRICE).unwrap();
    builder.register_component::<Tag>(TAG).unwrap();
    builder.register_archetype(AGENT, &[CASH, HUNGER]).unwrap();
    builder.register_archetype(FIRM, &[CASH, INVENTORY, PRICE]).unwrap();
    builder.register_archetype(MARKER, &[TAG]).unwrap();
    EntityManager::new(builder.build(), config)
}

pub fn populate(world: &mut EntityManager, agents: usize, firms: usize) {
    for _ in 0..agents {
        world.create_entity(AGENT).unwrap();
    }
    for _ in 0..firms {
        world.create_entity(FIRM).unwrap();
    }
}
