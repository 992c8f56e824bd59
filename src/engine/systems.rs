//! System abstractions.
//!
//! A **system** is a unit of logic that operates over the world. Systems:
//! - declare which components they read and write while being set up,
//! - are dispatched by the scheduler with a wait-set derived from those declarations,
//! - run their body on a worker thread with shared access to the world.
//!
//! ## Lifecycle per tick
//!
//! 1. [`System::is_active`] decides whether the system takes part in this tick.
//! 2. [`System::pre_step`] runs synchronously on the orchestrating thread, in dispatch order.
//! 3. [`System::run`] runs asynchronously once every handle in its wait-set completed.
//! 4. After the barrier, [`System::post_step`] runs synchronously with exclusive
//!    access to the world, again in dispatch order.
//!
//! ## Access declaration
//!
//! [`System::setup`] receives a [`SystemSetup`]. Queries built with
//! [`QueryBuilder::setup`](crate::engine::query::QueryBuilder::setup) register
//! their read and write sets there; systems touching components outside a
//! query declare them by hand with [`SystemSetup::declare_read`] and
//! [`SystemSetup::declare_write`].

use crate::engine::archetype::Registry;
use crate::engine::error::RegistryError;
use crate::engine::manager::EntityManager;
use crate::engine::query::{Query, QueryBuilder};
use crate::engine::types::{AccessSets, ComponentID};


/// A unit of executable logic operating on the world.
///
/// Systems must be `Send + Sync`: the body runs on a worker thread while the
/// scheduler keeps dispatching other systems.
pub trait System: Send + Sync {
    /// Unique name, used for ordering declarations and reports.
    fn name(&self) -> &str;

    /// Resolves queries and declares component access. Called once when the schedule is built.
    fn setup(&mut self, _setup: &mut SystemSetup<'_>) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Whether the system takes part in the current tick.
    fn is_active(&self, _world: &EntityManager) -> bool {
        true
    }

    /// Synchronous hook run on the orchestrating thread right before the body is launched.
    fn pre_step(&mut self, _world: &EntityManager) {}

    /// System body.
    fn run(&self, world: &EntityManager);

    /// Synchronous hook run after the tick barrier.
    fn post_step(&mut self, _world: &mut EntityManager) {}
}

/// Context handed to [`System::setup`].
#[derive(Debug)]
pub struct SystemSetup<'w> {
    world: &'w EntityManager,
    access: AccessSets,
}

impl<'w> SystemSetup<'w> {
    /// Starts an empty declaration against `world`.
    pub fn new(world: &'w EntityManager) -> Self {
        Self { world, access: AccessSets::default() }
    }

    /// World the system will run against.
    #[inline]
    pub fn world(&self) -> &'w EntityManager { self.world }

    /// Component and archetype metadata.
    #[inline]
    pub fn registry(&self) -> &'w Registry { self.world.registry() }

    /// Declares read-only access to `component_id`.
    ///
    /// ## Panics
    /// Panics if `component_id` is not registered.
    #[track_caller]
    pub fn declare_read(&mut self, component_id: ComponentID) {
        self.expect_registered(component_id);
        self.access.add_read(component_id);
    }

    /// Declares read-write access to `component_id`.
    ///
    /// ## Panics
    /// Panics if `component_id` is not registered.
    #[track_caller]
    pub fn declare_write(&mut self, component_id: ComponentID) {
        self.expect_registered(component_id);
        self.access.add_write(component_id);
    }

    #[track_caller]
    fn expect_registered(&self, component_id: ComponentID) {
        assert!(
            self.world.registry().components().is_registered(component_id),
            "component id {component_id} is not registered"
        );
    }

    /// Access declared so far.
    #[inline]
    pub fn access(&self) -> &AccessSets { &self.access }

    /// Consumes the context, returning the declared access.
    pub fn into_access(self) -> AccessSets { self.access }
}

/// A [`System`] backed by one query and a closure.
///
/// ```ignore
/// let gravity = FnSystem::new(
///     "gravity",
///     QueryBuilder::new().write::<Velocity>(),
///     |query, world| {
///         query.for_each(world, |mut item| {
///             item.write::<Velocity>().dy -= 9.81;
///         });
///     },
/// );
/// ```
pub struct FnSystem<F>
where
    F: Fn(&Query, &EntityManager) + Send + Sync + 'static,
{
    name: String,
    builder: QueryBuilder,
    query: Option<Query>,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&Query, &EntityManager) + Send + Sync + 'static,
{
    /// Creates a function-backed system over `query`.
    pub fn new(name: impl Into<String>, query: QueryBuilder, f: F) -> Self {
        Self { name: name.into(), builder: query, query: None, f }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&Query, &EntityManager) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, setup: &mut SystemSetup<'_>) -> Result<(), RegistryError> {
        self.query = Some(self.builder.clone().setup(setup)?);
        Ok(())
    }

    fn run(&self, world: &EntityManager) {
        if let Some(query) = &self.query {
            (self.f)(query, world);
        }
    }
}
