use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata_ecs::{
    Command, EcsConfig, EntityManager, ExecutionError, FnSystem, Query, QueryBuilder,
    RegistryError, ScheduleBuilder, System, SystemOptions, SystemSetup,
};

mod common;
use common::*;

fn pool(threads: usize) -> EcsConfig {
    EcsConfig { worker_threads: threads, ..EcsConfig::default() }
}

fn produce() -> impl System {
    FnSystem::new(
        "produce",
        QueryBuilder::new().write::<Inventory>(),
        |query: &Query, world: &EntityManager| {
            query.for_each(world, |mut item| {
                let inventory = item.write::<Inventory>();
                if inventory.units < inventory.target {
                    inventory.units += 1.0;
                }
            });
        },
    )
}

fn sell() -> impl System {
    FnSystem::new(
        "sell",
        QueryBuilder::new().read::<Inventory>().read::<Price>().write::<Cash>(),
        |query: &Query, world: &EntityManager| {
            query.for_each(world, |mut item| {
                let revenue = item.read::<Inventory>().units as f32 * item.read::<Price>().value;
                item.write::<Cash>().value += revenue;
            });
        },
    )
}

fn starve() -> impl System {
    FnSystem::new(
        "starve",
        QueryBuilder::new().write::<Hunger>(),
        |query: &Query, world: &EntityManager| {
            query.for_each(world, |mut item| {
                item.write::<Hunger>().value += 0.25;
            });
        },
    )
}

#[test]
fn systems_run_in_parallel_and_respect_access_order() {
    let mut world = make_world(EcsConfig::default());
    populate(&mut world, 64, 8);

    let mut builder = ScheduleBuilder::new(pool(4));
    builder
        .add_system(sell(), SystemOptions::new().after("produce"))
        .add_system(produce(), SystemOptions::new())
        .add_system(starve(), SystemOptions::new());
    let mut scheduler = builder.build(&world).unwrap();

    let order: Vec<&str> = scheduler.dispatch_order().collect();
    assert_eq!(order, vec!["produce", "sell", "starve"]);

    for _ in 0..3 {
        scheduler.run_tick(&mut world).unwrap();
    }

    let report = scheduler.last_report().unwrap();
    assert_eq!(report.waits_of("sell"), ["produce".to_owned()]);
    assert!(report.waits_of("starve").is_empty());

    for firm in world.entities_of(FIRM) {
        assert_eq!(world.get_component::<Inventory>(firm).unwrap().units, 3.0);
        // 10 + 1 + 2 + 3
        assert_eq!(world.get_component::<Cash>(firm).unwrap().value, 16.0);
    }
    for agent in world.entities_of(AGENT) {
        assert_eq!(world.get_component::<Hunger>(agent).unwrap().value, 0.75);
        assert_eq!(world.get_component::<Cash>(agent).unwrap().value, 10.0);
    }
}

#[test]
fn query_writes_are_visible_to_dirty_enumeration() {
    let mut world = make_world(EcsConfig::default());
    populate(&mut world, 4, 2);

    let mut builder = ScheduleBuilder::new(pool(2));
    builder.add_system(produce(), SystemOptions::new());
    let mut scheduler = builder.build(&world).unwrap();
    scheduler.run_tick(&mut world).unwrap();

    let mut dirty = Vec::new();
    world.drain_dirty(|record| {
        assert_eq!(record.read::<Inventory>().units, 1.0);
        dirty.push(record.entity);
    });
    dirty.sort();
    let mut firms: Vec<_> = world.entities_of(FIRM).collect();
    firms.sort();
    assert_eq!(dirty, firms);
}

/// Spawns one marker per tick through the command queue and observes the
/// result after the barrier.
#[derive(Default)]
struct Spawner {
    pre_steps: Arc<AtomicUsize>,
    markers_seen: Arc<AtomicUsize>,
}

impl System for Spawner {
    fn name(&self) -> &str { "spawner" }

    fn setup(&mut self, setup: &mut SystemSetup<'_>) -> Result<(), RegistryError> {
        let tag = setup.registry().components().require_id_of::<Tag>()?;
        setup.declare_write(tag);
        Ok(())
    }

    fn pre_step(&mut self, _: &EntityManager) {
        self.pre_steps.fetch_add(1, Ordering::SeqCst);
    }

    fn run(&self, world: &EntityManager) {
        world.defer(Command::Create { archetype: MARKER, owner: None });
    }

    fn post_step(&mut self, world: &mut EntityManager) {
        assert_eq!(world.pending_commands(), 0);
        self.markers_seen.store(world.entities_of(MARKER).count(), Ordering::SeqCst);
    }
}

#[test]
fn deferred_commands_land_before_post_steps() {
    let mut world = make_world(EcsConfig::default());
    let spawner = Spawner::default();
    let (pre_steps, seen) = (Arc::clone(&spawner.pre_steps), Arc::clone(&spawner.markers_seen));

    let mut builder = ScheduleBuilder::new(pool(2));
    builder.add_system(spawner, SystemOptions::new());
    let mut scheduler = builder.build(&world).unwrap();

    scheduler.run_tick(&mut world).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    scheduler.run_tick(&mut world).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(pre_steps.load(Ordering::SeqCst), 2);
    assert!(!world.is_executing());
}

/// Writes cash, panicking while `fail` is set.
struct Flaky {
    fail: Arc<AtomicBool>,
    post_steps: Arc<AtomicUsize>,
}

impl System for Flaky {
    fn name(&self) -> &str { "flaky" }

    fn setup(&mut self, setup: &mut SystemSetup<'_>) -> Result<(), RegistryError> {
        let cash = setup.registry().components().require_id_of::<Cash>()?;
        setup.declare_write(cash);
        Ok(())
    }

    fn run(&self, _: &EntityManager) {
        if self.fail.load(Ordering::SeqCst) {
            panic!("market crashed");
        }
    }

    fn post_step(&mut self, _: &mut EntityManager) {
        self.post_steps.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn a_panicking_system_fails_the_tick_and_poisons_dependents() {
    let mut world = make_world(EcsConfig::default());
    populate(&mut world, 2, 2);
    let fail = Arc::new(AtomicBool::new(true));
    let post_steps = Arc::new(AtomicUsize::new(0));

    let mut builder = ScheduleBuilder::new(pool(2));
    builder
        .add_system(
            Flaky { fail: Arc::clone(&fail), post_steps: Arc::clone(&post_steps) },
            SystemOptions::new(),
        )
        .add_system(sell(), SystemOptions::new())
        .add_system(Spawner::default(), SystemOptions::new());
    let mut scheduler = builder.build(&world).unwrap();

    let error = scheduler.run_tick(&mut world).unwrap_err();
    assert_eq!(error, ExecutionError::SystemPanicked { systems: vec!["flaky".to_owned()] });

    let report = scheduler.last_report().unwrap();
    assert_eq!(report.skipped, vec!["sell".to_owned()]);
    assert_eq!(post_steps.load(Ordering::SeqCst), 0);
    assert_eq!(world.pending_commands(), 0);
    assert_eq!(world.entities_of(MARKER).count(), 0);
    for firm in world.entities_of(FIRM) {
        assert_eq!(world.get_component::<Cash>(firm).unwrap().value, 10.0);
    }
    assert!(!world.is_executing());

    fail.store(false, Ordering::SeqCst);
    let report = scheduler.run_tick(&mut world).unwrap();
    assert!(report.panicked.is_empty() && report.skipped.is_empty());
    assert_eq!(post_steps.load(Ordering::SeqCst), 1);
    assert_eq!(world.entities_of(MARKER).count(), 1);
}

#[test]
fn groups_order_whole_phases() {
    let mut world = make_world(EcsConfig::default());
    populate(&mut world, 8, 4);

    let mut builder = ScheduleBuilder::new(pool(4));
    builder
        .add_group("market", SystemOptions::new().after("needs"))
        .add_group("needs", SystemOptions::new())
        .add_system(produce(), SystemOptions::new().in_group("market"))
        .add_system(sell(), SystemOptions::new().in_group("market").after("produce"))
        .add_system(starve(), SystemOptions::new().in_group("needs"));
    let mut scheduler = builder.build(&world).unwrap();

    let order: Vec<&str> = scheduler.dispatch_order().collect();
    assert_eq!(order, vec!["needs", "starve", "market", "produce", "sell"]);

    let market = scheduler.access_of("market").unwrap();
    let components = world.registry().components();
    let inventory = components.require_id_of::<Inventory>().unwrap();
    let cash = components.require_id_of::<Cash>().unwrap();
    assert!(market.write.has(inventory) && market.write.has(cash));

    let report = scheduler.run_tick(&mut world).unwrap();
    assert_eq!(report.waits_of("market"), ["needs".to_owned()]);
    assert!(report.waits_of("produce").contains(&"needs".to_owned()));

    scheduler.set_enabled("market", false);
    let report = scheduler.run_tick(&mut world).unwrap();
    assert_eq!(report.inactive, vec!["market", "produce", "sell"]);
    for firm in world.entities_of(FIRM) {
        assert_eq!(world.get_component::<Inventory>(firm).unwrap().units, 1.0);
    }
}

#[test]
fn nested_group_joins_hold_back_root_dependents() {
    let mut world = make_world(EcsConfig::default());
    populate(&mut world, 4, 4);
    let paid = Arc::new(AtomicBool::new(false));
    let audit_saw_pay = Arc::new(AtomicBool::new(false));
    let report_saw_pay = Arc::new(AtomicBool::new(false));

    let done = Arc::clone(&paid);
    let pay = FnSystem::new(
        "pay",
        QueryBuilder::new().write::<Cash>(),
        move |query: &Query, world: &EntityManager| {
            thread::sleep(Duration::from_millis(50));
            query.for_each(world, |mut item| item.write::<Cash>().value += 5.0);
            done.store(true, Ordering::SeqCst);
        },
    );
    let (done, saw) = (Arc::clone(&paid), Arc::clone(&audit_saw_pay));
    let audit = FnSystem::new(
        "audit",
        QueryBuilder::new().read::<Hunger>(),
        move |_: &Query, _: &EntityManager| saw.store(done.load(Ordering::SeqCst), Ordering::SeqCst),
    );
    let (done, saw) = (Arc::clone(&paid), Arc::clone(&report_saw_pay));
    let report = FnSystem::new(
        "report",
        QueryBuilder::new().read::<Cash>(),
        move |query: &Query, world: &EntityManager| {
            let mut settled = done.load(Ordering::SeqCst);
            query.for_each(world, |item| settled &= item.read::<Cash>().value == 15.0);
            saw.store(settled, Ordering::SeqCst);
        },
    );

    let mut builder = ScheduleBuilder::new(pool(4));
    builder
        .add_system(report, SystemOptions::new().after("economy"))
        .add_group("economy", SystemOptions::new())
        .add_group("payroll", SystemOptions::new().in_group("economy"))
        .add_system(pay, SystemOptions::new().in_group("payroll"))
        .add_system(audit, SystemOptions::new().in_group("economy").after("payroll"));
    let mut scheduler = builder.build(&world).unwrap();

    let tick = scheduler.run_tick(&mut world).unwrap();
    assert_eq!(tick.dispatch_order, vec!["economy", "payroll", "pay", "audit", "report"]);
    assert_eq!(tick.waits_of("audit"), ["payroll".to_owned()]);
    assert_eq!(tick.waits_of("report"), ["economy".to_owned()]);
    assert!(audit_saw_pay.load(Ordering::SeqCst));
    assert!(report_saw_pay.load(Ordering::SeqCst));
}
