#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};

use strata_ecs::{ArchetypeId, Component, EcsConfig, EntityManager, RegistryBuilder};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

pub const AGENT: ArchetypeId = ArchetypeId::new(0, 0, 1);

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub dirty: u8,
    pub _pad: [u8; 3],
}

impl Component for Position {
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Wealth {
    pub value: f32,
    pub dirty: u8,
    pub _pad: [u8; 3],
}

impl Component for Wealth {
    fn populate_default_values(&mut self) { self.value = 100.0; }
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Productivity {
    pub rate: f32,
    pub dirty: u8,
    pub _pad: [u8; 3],
}

impl Component for Productivity {
    fn populate_default_values(&mut self) { self.rate = 0.5; }
    fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
    fn is_dirty(&self) -> bool { self.dirty != 0 }
}

pub fn make_world(threads: usize) -> EntityManager {
    let mut builder = RegistryBuilder::new();
    builder.register_component::<Position>(0).unwrap();
    builder.register_component::<Wealth>(1).unwrap();
    builder.register_component::<Productivity>(2).unwrap();
    builder.register_archetype(AGENT, &[0, 1, 2]).unwrap();
    EntityManager::new(builder.build(), EcsConfig { worker_threads: threads, ..EcsConfig::default() })
}

pub fn populate(world: &mut EntityManager, agent_count: usize) {
    for _ in 0..agent_count {
        world.create_entity(AGENT).unwrap();
    }
}
