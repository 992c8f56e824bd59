//! System scheduling and execution.
//!
//! This module is responsible for:
//! * validating the system graph once, when the schedule is built,
//! * dispatching systems every tick with wait-sets derived from their access,
//! * running system bodies in parallel on a rayon pool,
//! * the tick barrier, deferred commands and post-steps.
//!
//! ## Building
//!
//! [`ScheduleBuilder`] collects systems and groups by name. [`ScheduleBuilder::build`]
//! runs every system's setup (queries register their access), resolves group
//! membership and `after` / `before` declarations, rejects ordering across
//! different parent groups, and sorts every group's children topologically.
//! The result is a flat dispatch order in which each group precedes its
//! children and each system follows its explicit predecessors.
//!
//! ## A tick
//!
//! 1. The access table starts empty: every component is `(None, completed)`.
//! 2. Systems are visited in dispatch order. An inactive system (or any
//!    member of an inactive group) is passed over and satisfies its dependents.
//! 3. A dispatched system waits on:
//!    * the last writer of every component it reads,
//!    * the last writer and every outstanding reader of every component it writes,
//!    * the handles of its explicit predecessors,
//!    * the gate of every enclosing group.
//! 4. Its pre-step runs on the calling thread, then its body is launched.
//! 5. The access table records the new handle.
//! 6. A group's gate is computed like a system's wait-set from the union of
//!    its children's access. Once its children are dispatched, a join over
//!    their handles becomes the group's completion handle, and the group's
//!    union access is recorded against it.
//! 7. The calling thread waits until every launched body finished, applies
//!    deferred commands, then runs post-steps in dispatch order.
//!
//! Systems with no declared or inferred relationship run in unspecified order.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

use crate::engine::config::EcsConfig;
use crate::engine::error::{ExecutionError, ScheduleError};
use crate::engine::job::{JobHandle, JobLog};
use crate::engine::manager::EntityManager;
use crate::engine::systems::{System, SystemSetup};
use crate::engine::types::{AccessMode, AccessSets, ComponentID};


/// Placement and ordering of a system or group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemOptions {
    /// Parent group; `None` places the system at the root.
    pub in_group: Option<String>,
    /// Systems that must complete before this one starts.
    pub after: Vec<String>,
    /// Systems that must not start before this one completes.
    pub before: Vec<String>,
}

impl SystemOptions {
    /// Root placement without ordering constraints.
    pub fn new() -> Self { Self::default() }

    /// Places the system inside group `group`.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.in_group = Some(group.into());
        self
    }

    /// Runs after `system`.
    pub fn after(mut self, system: impl Into<String>) -> Self {
        self.after.push(system.into());
        self
    }

    /// Runs before `system`.
    pub fn before(mut self, system: impl Into<String>) -> Self {
        self.before.push(system.into());
        self
    }
}

enum EntryKind {
    System(Box<dyn System>),
    Group,
}

struct Entry {
    name: String,
    kind: EntryKind,
    options: SystemOptions,
}

/// Collects systems and groups, then validates them into a [`Scheduler`].
pub struct ScheduleBuilder {
    config: EcsConfig,
    entries: Vec<Entry>,
}

impl Default for ScheduleBuilder {
    fn default() -> Self { Self::new(EcsConfig::default()) }
}

impl ScheduleBuilder {
    /// Creates an empty builder.
    pub fn new(config: EcsConfig) -> Self {
        Self { config, entries: Vec::new() }
    }

    /// Adds a system.
    pub fn add_system(&mut self, system: impl System + 'static, options: SystemOptions) -> &mut Self {
        self.add_boxed_system(Box::new(system), options)
    }

    /// Adds a boxed system.
    pub fn add_boxed_system(&mut self, system: Box<dyn System>, options: SystemOptions) -> &mut Self {
        let name = system.name().to_owned();
        self.entries.push(Entry { name, kind: EntryKind::System(system), options });
        self
    }

    /// Adds a group that other systems can be placed into.
    pub fn add_group(&mut self, name: impl Into<String>, options: SystemOptions) -> &mut Self {
        self.entries.push(Entry { name: name.into(), kind: EntryKind::Group, options });
        self
    }

    /// Validates the graph, runs system setup against `world` and builds the worker pool.
    pub fn build(self, world: &EntityManager) -> Result<Scheduler, ScheduleError> {
        let Self { config, entries } = self;

        let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(ScheduleError::DuplicateSystem(entry.name.clone()));
            }
        }
        let resolve = |system: &str, reference: &str| {
            index.get(reference).copied().ok_or_else(|| ScheduleError::UnknownSystem {
                system: system.to_owned(),
                reference: reference.to_owned(),
            })
        };

        let mut parents = Vec::with_capacity(entries.len());
        for entry in &entries {
            let parent = match &entry.options.in_group {
                None => None,
                Some(group) => {
                    let parent = resolve(&entry.name, group)?;
                    if !matches!(entries[parent].kind, EntryKind::Group) {
                        return Err(ScheduleError::NotAGroup {
                            system: entry.name.clone(),
                            parent: group.clone(),
                        });
                    }
                    Some(parent)
                }
            };
            parents.push(parent);
        }
        check_group_nesting(&entries, &parents)?;

        let mut after: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        for (i, entry) in entries.iter().enumerate() {
            let declared = entry.options.after.iter().map(|n| (n, false));
            let reversed = entry.options.before.iter().map(|n| (n, true));
            for (other_name, is_before) in declared.chain(reversed) {
                let other = resolve(&entry.name, other_name)?;
                if other == i {
                    return Err(ScheduleError::Cycle(vec![entry.name.clone()]));
                }
                if parents[other] != parents[i] {
                    return Err(ScheduleError::CrossGroupOrdering {
                        system: entry.name.clone(),
                        other: other_name.clone(),
                    });
                }
                let (node, predecessor) = if is_before { (other, i) } else { (i, other) };
                if !after[node].contains(&predecessor) {
                    after[node].push(predecessor);
                }
            }
        }

        let order = dispatch_order(&entries, &parents, &after)?;
        let mut position = vec![0usize; entries.len()];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }

        let mut slots: Vec<Option<Entry>> = entries.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for &i in &order {
            let Some(entry) = slots[i].take() else { continue; };
            let system = match entry.kind {
                EntryKind::Group => None,
                EntryKind::System(mut system) => {
                    let mut setup = SystemSetup::new(world);
                    system.setup(&mut setup).map_err(|source| ScheduleError::Setup {
                        system: entry.name.clone(),
                        source,
                    })?;
                    Some((system, setup.into_access()))
                }
            };
            let (system, access) = match system {
                Some((system, access)) => (Some(system), access),
                None => (None, AccessSets::default()),
            };
            nodes.push(Node {
                name: entry.name,
                parent: parents[i].map(|p| position[p]),
                after: after[i].iter().map(|&p| position[p]).collect(),
                access,
                enabled: true,
                system,
            });
        }

        // Children follow their group, so walking backwards folds every
        // subtree into its root before the root's own parent sees it.
        for i in (0..nodes.len()).rev() {
            if let Some(parent) = nodes[i].parent {
                let access = nodes[i].access;
                nodes[parent].access.union_with(&access);
            }
        }

        let prefix = config.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| ScheduleError::ThreadPool(e.to_string()))?;

        tracing::debug!(
            systems = nodes.iter().filter(|n| n.system.is_some()).count(),
            groups = nodes.iter().filter(|n| n.system.is_none()).count(),
            threads = pool.current_num_threads(),
            "schedule built"
        );

        Ok(Scheduler {
            nodes,
            pool,
            last_report: None,
        })
    }
}

/// Rejects group membership loops (a group nested inside itself).
fn check_group_nesting(entries: &[Entry], parents: &[Option<usize>]) -> Result<(), ScheduleError> {
    for start in 0..entries.len() {
        let mut seen = HashSet::new();
        let mut current = parents[start];
        while let Some(group) = current {
            if !seen.insert(group) {
                return Err(ScheduleError::Cycle(seen.into_iter().map(|g| entries[g].name.clone()).collect()));
            }
            current = parents[group];
        }
    }
    Ok(())
}

/// Flattens the group tree into dispatch order.
///
/// Siblings are sorted topologically by their explicit predecessors; ties keep
/// registration order. Each group is immediately followed by its subtree.
fn dispatch_order(
    entries: &[Entry],
    parents: &[Option<usize>],
    after: &[Vec<usize>],
) -> Result<Vec<usize>, ScheduleError> {
    let mut children: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
    for (i, &parent) in parents.iter().enumerate() {
        children.entry(parent).or_default().push(i);
    }

    let mut order = Vec::with_capacity(entries.len());
    let mut stack: Vec<usize> = sort_siblings(children.get(&None).map_or(&[][..], Vec::as_slice), entries, after)?;
    stack.reverse();

    while let Some(i) = stack.pop() {
        order.push(i);
        if let Some(kids) = children.get(&Some(i)) {
            let mut sorted = sort_siblings(kids, entries, after)?;
            sorted.reverse();
            stack.extend(sorted);
        }
    }
    Ok(order)
}

fn sort_siblings(siblings: &[usize], entries: &[Entry], after: &[Vec<usize>]) -> Result<Vec<usize>, ScheduleError> {
    let mut remaining: Vec<usize> = siblings.to_vec();
    let mut placed: HashSet<usize> = HashSet::with_capacity(siblings.len());
    let mut sorted = Vec::with_capacity(siblings.len());

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|&i| after[i].iter().all(|p| placed.contains(p)));
        let Some(at) = ready else {
            return Err(ScheduleError::Cycle(remaining.iter().map(|&i| entries[i].name.clone()).collect()));
        };
        let i = remaining.remove(at);
        placed.insert(i);
        sorted.push(i);
    }
    Ok(sorted)
}

/// One system or group in dispatch order.
struct Node {
    name: String,
    parent: Option<usize>,
    after: Vec<usize>,
    /// Own access for systems, union of descendants for groups.
    access: AccessSets,
    enabled: bool,
    /// `None` for groups.
    system: Option<Box<dyn System>>,
}

/// Per-component entry of the access table.
///
/// A read merges into an existing read, or replaces a write with
/// `(Read, [reader])` while keeping the write handle, so every later reader
/// still waits for the last writer. A write replaces the record and clears
/// the readers.
struct AccessRecord<'scope> {
    mode: AccessMode,
    write: Option<JobHandle<'scope>>,
    reads: Vec<JobHandle<'scope>>,
}

impl Default for AccessRecord<'_> {
    fn default() -> Self {
        Self { mode: AccessMode::None, write: None, reads: Vec::new() }
    }
}

#[derive(Default)]
struct AccessTable<'scope> {
    records: HashMap<ComponentID, AccessRecord<'scope>>,
}

impl<'scope> AccessTable<'scope> {
    fn wait_set(&self, access: &AccessSets, waits: &mut Vec<JobHandle<'scope>>) {
        for component_id in access.read.iterate_over_components() {
            if let Some(writer) = self.records.get(&component_id).and_then(|r| r.write.as_ref()) {
                push_unique(waits, writer);
            }
        }
        for component_id in access.write.iterate_over_components() {
            if let Some(record) = self.records.get(&component_id) {
                if let Some(writer) = &record.write {
                    push_unique(waits, writer);
                }
                for reader in &record.reads {
                    push_unique(waits, reader);
                }
            }
        }
    }

    fn record(&mut self, access: &AccessSets, handle: &JobHandle<'scope>) {
        for component_id in access.read.iterate_over_components() {
            let record = self.records.entry(component_id).or_default();
            if record.mode == AccessMode::Read {
                record.reads.push(handle.clone());
            } else {
                record.mode = AccessMode::Read;
                record.reads = vec![handle.clone()];
            }
        }
        for component_id in access.write.iterate_over_components() {
            let record = self.records.entry(component_id).or_default();
            record.mode = AccessMode::Write;
            record.write = Some(handle.clone());
            record.reads.clear();
        }
    }
}

fn push_unique<'scope>(waits: &mut Vec<JobHandle<'scope>>, handle: &JobHandle<'scope>) {
    if !waits.iter().any(|h| h.same(handle)) {
        waits.push(handle.clone());
    }
}

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Dispatched systems and groups, in dispatch order.
    pub dispatch_order: Vec<String>,
    /// For each dispatched system or group, the names of the handles it waited on.
    pub waits: HashMap<String, Vec<String>>,
    /// Systems and groups passed over because they were inactive or disabled.
    pub inactive: Vec<String>,
    /// Systems whose body was skipped because a prerequisite faulted.
    pub skipped: Vec<String>,
    /// Systems whose body panicked.
    pub panicked: Vec<String>,
}

impl TickReport {
    /// Names `system` waited on, or an empty slice if it was not dispatched.
    pub fn waits_of(&self, system: &str) -> &[String] {
        self.waits.get(system).map_or(&[], Vec::as_slice)
    }
}

/// Immutable view of one node used while the nodes themselves are lent out.
struct Shape {
    parent: Option<usize>,
    after: Vec<usize>,
    access: AccessSets,
    name: String,
    /// One past the last node of this node's subtree.
    subtree_end: usize,
}

impl Shape {
    fn of(nodes: &[Node]) -> Vec<Shape> {
        let mut shape: Vec<Shape> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| Shape {
                parent: n.parent,
                after: n.after.clone(),
                access: n.access,
                name: n.name.clone(),
                subtree_end: i + 1,
            })
            .collect();
        for i in (0..shape.len()).rev() {
            if let Some(parent) = shape[i].parent {
                shape[parent].subtree_end = shape[parent].subtree_end.max(shape[i].subtree_end);
            }
        }
        shape
    }
}

/// Open group while its children are being dispatched.
struct GroupFrame<'scope> {
    node: usize,
    gate: Vec<JobHandle<'scope>>,
    children: Vec<JobHandle<'scope>>,
}

/// Validated system graph plus the worker pool that runs it.
pub struct Scheduler {
    nodes: Vec<Node>,
    pool: ThreadPool,
    last_report: Option<TickReport>,
}

impl Scheduler {
    /// Names of systems and groups in dispatch order.
    pub fn dispatch_order(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Declared access of `name` (a group reports the union of its descendants).
    pub fn access_of(&self, name: &str) -> Option<&AccessSets> {
        self.nodes.iter().find(|n| n.name == name).map(|n| &n.access)
    }

    /// Enables or disables a system or group. Returns `false` for an unknown name.
    ///
    /// A disabled system behaves exactly like an inactive one.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.nodes.iter_mut().find(|n| n.name == name) {
            Some(node) => {
                node.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `name` exists and is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name && n.enabled)
    }

    /// Report of the most recent tick, including faulted ones.
    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    /// Runs one tick against `world`.
    ///
    /// ## Errors
    /// [`ExecutionError::SystemPanicked`] if any body panicked. In that case
    /// every launched body still finished, deferred commands were discarded
    /// and no post-step ran.
    pub fn run_tick(&mut self, world: &mut EntityManager) -> Result<TickReport, ExecutionError> {
        let _span = tracing::info_span!("tick", systems = self.nodes.len()).entered();

        world.begin_tick();
        let log = JobLog::default();
        let mut active = vec![false; self.nodes.len()];

        let dispatched = {
            let shared: &EntityManager = world;
            let nodes = &mut self.nodes;
            let pool = &self.pool;
            let log_ref = &log;
            let active_ref = &mut active;
            panic::catch_unwind(AssertUnwindSafe(move || {
                pool.in_place_scope(move |scope| dispatch(scope, nodes, shared, log_ref, active_ref))
            }))
        };
        world.end_tick();

        let mut report = match dispatched {
            Ok(report) => report,
            Err(payload) => panic::resume_unwind(payload),
        };
        report.skipped = log.skipped();
        report.panicked = log.panicked();

        if !report.panicked.is_empty() {
            world.discard_commands();
            let systems = report.panicked.clone();
            self.last_report = Some(report);
            return Err(ExecutionError::SystemPanicked { systems });
        }

        world.apply_commands();
        for (node, _) in self.nodes.iter_mut().zip(&active).filter(|(_, active)| **active) {
            if let Some(system) = node.system.as_mut() {
                system.post_step(world);
            }
        }

        self.last_report = Some(report.clone());
        Ok(report)
    }
}

/// Dispatch phase of a tick. Returns once every node was visited; the
/// enclosing scope provides the barrier.
fn dispatch<'scope>(
    scope: &Scope<'scope>,
    nodes: &'scope mut Vec<Node>,
    world: &'scope EntityManager,
    log: &'scope JobLog,
    active: &mut [bool],
) -> TickReport {
    let mut table = AccessTable::default();
    let mut handles: Vec<Option<JobHandle<'scope>>> = vec![None; nodes.len()];
    let mut frames: Vec<GroupFrame<'scope>> = Vec::new();
    let mut report = TickReport::default();

    // Shared copies of the graph shape, so the nodes themselves can be
    // handed out one by one below.
    let shape = Shape::of(nodes);

    for (i, node) in nodes.iter_mut().enumerate() {
        let Shape { parent, after, access, name, .. } = &shape[i];

        while frames.last().is_some_and(|f| i >= shape[f.node].subtree_end) {
            close_group(scope, &mut frames, &shape, &mut table, &mut handles, log);
        }

        let parent_active = parent.map_or(true, |p| active[p]);
        let is_active = parent_active
            && node.enabled
            && node.system.as_ref().map_or(true, |s| s.is_active(world));
        if !is_active {
            report.inactive.push(name.clone());
            continue;
        }
        active[i] = true;

        let mut waits = Vec::new();
        table.wait_set(access, &mut waits);
        for &predecessor in after {
            if let Some(handle) = &handles[predecessor] {
                push_unique(&mut waits, handle);
            }
        }
        for frame in &frames {
            for handle in &frame.gate {
                push_unique(&mut waits, handle);
            }
        }

        report.dispatch_order.push(name.clone());
        report.waits.insert(name.clone(), waits.iter().map(|h| h.name().to_owned()).collect());

        match node.system.as_mut() {
            None => {
                frames.push(GroupFrame { node: i, gate: waits, children: Vec::new() });
            }
            Some(system) => {
                system.pre_step(world);
                let system: &'scope dyn System = &**system;
                tracing::trace!(system = %name, waits = waits.len(), "dispatching");

                let span_name = name.clone();
                let handle = JobHandle::task(name.clone(), log, move || {
                    let _span = tracing::trace_span!("system", name = %span_name).entered();
                    system.run(world);
                });
                for prerequisite in &waits {
                    handle.depend_on(prerequisite);
                }
                table.record(access, &handle);
                handle.release(scope);

                if let Some(frame) = frames.last_mut() {
                    frame.children.push(handle.clone());
                }
                handles[i] = Some(handle);
            }
        }
    }

    while !frames.is_empty() {
        close_group(scope, &mut frames, &shape, &mut table, &mut handles, log);
    }
    report
}

fn close_group<'scope>(
    scope: &Scope<'scope>,
    frames: &mut Vec<GroupFrame<'scope>>,
    shape: &[Shape],
    table: &mut AccessTable<'scope>,
    handles: &mut [Option<JobHandle<'scope>>],
    log: &'scope JobLog,
) {
    let Some(frame) = frames.pop() else { return; };
    let Shape { access, name, .. } = &shape[frame.node];

    let join = JobHandle::join(name.clone(), log);
    for child in frame.children.iter().chain(&frame.gate) {
        join.depend_on(child);
    }
    table.record(access, &join);
    join.release(scope);

    if let Some(outer) = frames.last_mut() {
        outer.children.push(join.clone());
    }
    handles[frame.node] = Some(join);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::archetype::RegistryBuilder;
    use crate::engine::component::Component;
    use crate::engine::error::RegistryError;
    use crate::engine::types::ArchetypeId;
    use bytemuck::{Pod, Zeroable};

    macro_rules! component {
        ($name:ident) => {
            #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
            #[repr(C)]
            struct $name {
                value: u32,
                dirty: u8,
                _pad: [u8; 3],
            }

            impl Component for $name {
                fn set_dirty(&mut self, dirty: bool) { self.dirty = dirty as u8; }
                fn is_dirty(&self) -> bool { self.dirty != 0 }
            }
        };
    }

    component!(X);
    component!(Y);

    fn world() -> EntityManager {
        let mut builder = RegistryBuilder::new();
        builder.register_component::<X>(0).unwrap();
        builder.register_component::<Y>(1).unwrap();
        builder.register_archetype(ArchetypeId::new(0, 0, 1), &[0, 1]).unwrap();
        EntityManager::with_registry(builder.build())
    }

    /// Declares raw access and does nothing.
    struct Stub {
        name: &'static str,
        reads: Vec<ComponentID>,
        writes: Vec<ComponentID>,
        active: bool,
    }

    impl Stub {
        fn new(name: &'static str) -> Self {
            Self { name, reads: Vec::new(), writes: Vec::new(), active: true }
        }
        fn reads(mut self, id: ComponentID) -> Self { self.reads.push(id); self }
        fn writes(mut self, id: ComponentID) -> Self { self.writes.push(id); self }
        fn inactive(mut self) -> Self { self.active = false; self }
    }

    impl System for Stub {
        fn name(&self) -> &str { self.name }

        fn setup(&mut self, setup: &mut SystemSetup<'_>) -> Result<(), RegistryError> {
            self.reads.iter().for_each(|&c| setup.declare_read(c));
            self.writes.iter().for_each(|&c| setup.declare_write(c));
            Ok(())
        }

        fn is_active(&self, _: &EntityManager) -> bool { self.active }

        fn run(&self, _: &EntityManager) {}
    }

    fn single_thread() -> EcsConfig {
        EcsConfig { worker_threads: 1, ..EcsConfig::default() }
    }

    #[test]
    fn wait_sets_follow_component_access() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_system(Stub::new("A").writes(0), SystemOptions::new())
            .add_system(Stub::new("B").reads(0), SystemOptions::new())
            .add_system(Stub::new("C").writes(0), SystemOptions::new())
            .add_system(Stub::new("D").reads(1), SystemOptions::new());
        let mut scheduler = builder.build(&world).unwrap();

        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.dispatch_order, vec!["A", "B", "C", "D"]);
        assert!(report.waits_of("A").is_empty());
        assert_eq!(report.waits_of("B"), ["A"]);
        assert_eq!(report.waits_of("C"), ["A", "B"]);
        assert!(report.waits_of("D").is_empty());
    }

    #[test]
    fn every_reader_waits_for_the_last_writer() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_system(Stub::new("writer").writes(0), SystemOptions::new())
            .add_system(Stub::new("first").reads(0), SystemOptions::new())
            .add_system(Stub::new("second").reads(0), SystemOptions::new())
            .add_system(Stub::new("rewriter").writes(0), SystemOptions::new());
        let mut scheduler = builder.build(&world).unwrap();

        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.waits_of("second"), ["writer"]);
        assert_eq!(report.waits_of("rewriter"), ["writer", "first", "second"]);
    }

    #[test]
    fn explicit_ordering_reorders_and_waits() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_system(Stub::new("late"), SystemOptions::new().after("early"))
            .add_system(Stub::new("early"), SystemOptions::new())
            .add_system(Stub::new("first"), SystemOptions::new().before("early"));
        let mut scheduler = builder.build(&world).unwrap();

        assert_eq!(scheduler.dispatch_order().collect::<Vec<_>>(), vec!["first", "early", "late"]);
        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.waits_of("early"), ["first"]);
        assert_eq!(report.waits_of("late"), ["early"]);
    }

    #[test]
    fn inactive_predecessors_never_stall() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_system(Stub::new("sleeper").writes(0).inactive(), SystemOptions::new())
            .add_system(Stub::new("worker").reads(0), SystemOptions::new().after("sleeper"))
            .add_system(Stub::new("toggled").writes(1), SystemOptions::new())
            .add_system(Stub::new("reader").reads(1), SystemOptions::new());
        let mut scheduler = builder.build(&world).unwrap();
        assert!(scheduler.set_enabled("toggled", false));
        assert!(!scheduler.set_enabled("missing", false));

        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.dispatch_order, vec!["worker", "reader"]);
        assert_eq!(report.inactive, vec!["sleeper", "toggled"]);
        assert!(report.waits_of("worker").is_empty());
        assert!(report.waits_of("reader").is_empty());
    }

    #[test]
    fn groups_gate_children_and_publish_union_access() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_system(Stub::new("producer").writes(1), SystemOptions::new())
            .add_group("physics", SystemOptions::new())
            .add_system(Stub::new("integrate").writes(0), SystemOptions::new().in_group("physics"))
            .add_system(Stub::new("collide").reads(1), SystemOptions::new().in_group("physics"))
            .add_system(Stub::new("render").reads(0), SystemOptions::new());
        let mut scheduler = builder.build(&world).unwrap();

        let union = scheduler.access_of("physics").unwrap();
        assert!(union.write.has(0) && union.read.has(1));

        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.dispatch_order, vec!["producer", "physics", "integrate", "collide", "render"]);
        assert_eq!(report.waits_of("physics"), ["producer"]);
        // the group gate covers Y even though integrate only touches X
        assert_eq!(report.waits_of("integrate"), ["producer"]);
        assert_eq!(report.waits_of("render"), ["physics"]);
    }

    #[test]
    fn disabled_group_skips_its_children() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_group("ai", SystemOptions::new())
            .add_system(Stub::new("think").writes(0), SystemOptions::new().in_group("ai"))
            .add_system(Stub::new("act").reads(0), SystemOptions::new().after("ai"));
        let mut scheduler = builder.build(&world).unwrap();
        scheduler.set_enabled("ai", false);

        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.dispatch_order, vec!["act"]);
        assert_eq!(report.inactive, vec!["ai", "think"]);
    }

    #[test]
    fn nested_groups_join_inner_frames_before_outer_ones() {
        let mut world = world();
        let mut builder = ScheduleBuilder::new(single_thread());
        builder
            .add_system(Stub::new("reader").reads(0), SystemOptions::new().after("outer"))
            .add_group("outer", SystemOptions::new())
            .add_group("inner", SystemOptions::new().in_group("outer"))
            .add_system(Stub::new("writer").writes(0), SystemOptions::new().in_group("inner"))
            .add_system(Stub::new("sibling").reads(1), SystemOptions::new().in_group("outer").after("inner"));
        let mut scheduler = builder.build(&world).unwrap();

        let outer = scheduler.access_of("outer").unwrap();
        assert!(outer.write.has(0) && outer.read.has(1));

        let report = scheduler.run_tick(&mut world).unwrap();
        assert_eq!(report.dispatch_order, vec!["outer", "inner", "writer", "sibling", "reader"]);
        assert!(report.waits_of("inner").is_empty());
        assert!(report.waits_of("writer").is_empty());
        assert_eq!(report.waits_of("sibling"), ["inner"]);
        assert_eq!(report.waits_of("reader"), ["outer"]);
    }

    #[test]
    fn build_rejects_invalid_graphs() {
        let world = world();

        let mut duplicate = ScheduleBuilder::default();
        duplicate
            .add_system(Stub::new("A"), SystemOptions::new())
            .add_system(Stub::new("A"), SystemOptions::new());
        assert!(matches!(duplicate.build(&world), Err(ScheduleError::DuplicateSystem(n)) if n == "A"));

        let mut unknown = ScheduleBuilder::default();
        unknown.add_system(Stub::new("A"), SystemOptions::new().after("ghost"));
        assert!(matches!(unknown.build(&world), Err(ScheduleError::UnknownSystem { .. })));

        let mut not_group = ScheduleBuilder::default();
        not_group
            .add_system(Stub::new("A"), SystemOptions::new())
            .add_system(Stub::new("B"), SystemOptions::new().in_group("A"));
        assert!(matches!(not_group.build(&world), Err(ScheduleError::NotAGroup { .. })));

        let mut cycle = ScheduleBuilder::default();
        cycle
            .add_system(Stub::new("A"), SystemOptions::new().after("B"))
            .add_system(Stub::new("B"), SystemOptions::new().after("A"));
        assert!(matches!(cycle.build(&world), Err(ScheduleError::Cycle(_))));

        let mut cross = ScheduleBuilder::default();
        cross
            .add_group("g", SystemOptions::new())
            .add_system(Stub::new("inner"), SystemOptions::new().in_group("g"))
            .add_system(Stub::new("outer"), SystemOptions::new().after("inner"));
        assert_eq!(
            cross.build(&world).err(),
            Some(ScheduleError::CrossGroupOrdering { system: "outer".into(), other: "inner".into() })
        );
    }

    #[test]
    fn setup_errors_name_the_system() {
        struct Broken;
        impl System for Broken {
            fn name(&self) -> &str { "broken" }
            fn setup(&mut self, setup: &mut SystemSetup<'_>) -> Result<(), RegistryError> {
                setup.registry().components().require_id_of::<u64>().map(|_| ())
            }
            fn run(&self, _: &EntityManager) {}
        }

        let world = world();
        let mut builder = ScheduleBuilder::default();
        builder.add_system(Broken, SystemOptions::new());
        assert!(matches!(
            builder.build(&world),
            Err(ScheduleError::Setup { system, source: RegistryError::UnregisteredType(_) }) if system == "broken"
        ));
    }
}
