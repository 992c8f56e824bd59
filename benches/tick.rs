use criterion::*;
use std::hint::black_box;

use strata_ecs::{EntityManager, FnSystem, Query, QueryBuilder, ScheduleBuilder, SystemOptions};

mod common;
use common::*;

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    group.bench_function("tick_2_systems_100k", |b| {
        b.iter_batched(
            || {
                let mut world = make_world(4);
                populate(&mut world, AGENTS_MED);

                let mut schedule = ScheduleBuilder::new(world.config().clone());

                // System 1: wealth += productivity
                schedule.add_system(
                    FnSystem::new(
                        "production",
                        QueryBuilder::new().read::<Productivity>().write::<Wealth>(),
                        |query: &Query, world: &EntityManager| {
                            query.for_each(world, |mut item| {
                                let rate = item.read::<Productivity>().rate;
                                item.write::<Wealth>().value += rate;
                            });
                        },
                    ),
                    SystemOptions::new(),
                );

                // System 2: position drift, independent of wealth
                schedule.add_system(
                    FnSystem::new(
                        "drift",
                        QueryBuilder::new().write::<Position>(),
                        |query: &Query, world: &EntityManager| {
                            query.for_each(world, |mut item| {
                                let position = item.write::<Position>();
                                position.x += 0.1;
                                position.y -= 0.1;
                            });
                        },
                    ),
                    SystemOptions::new(),
                );

                let scheduler = schedule.build(&world).unwrap();
                (world, scheduler)
            },
            |(mut world, mut scheduler)| {
                scheduler.run_tick(&mut world).unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
