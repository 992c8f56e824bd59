use criterion::*;
use std::hint::black_box;

use strata_ecs::DirtyEffect;

mod common;
use common::*;

fn storage_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage");

    group.bench_function("spawn_10k", |b| {
        b.iter_batched(
            || make_world(1),
            |mut world| {
                populate(&mut world, AGENTS_SMALL);
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("spawn_then_despawn_half_10k", |b| {
        b.iter_batched(
            || {
                let mut world = make_world(1);
                populate(&mut world, AGENTS_SMALL);
                world
            },
            |mut world| {
                let doomed: Vec<_> = world.entities_of(AGENT).step_by(2).collect();
                for entity in doomed {
                    world.destroy_entity(entity);
                }
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("set_and_drain_dirty_100k", |b| {
        b.iter_batched(
            || {
                let mut world = make_world(1);
                populate(&mut world, AGENTS_MED);
                let entities: Vec<_> = world.entities_of(AGENT).collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for (i, entity) in entities.iter().enumerate() {
                    let value = Wealth { value: i as f32, ..Wealth::default() };
                    world.set_component_with(*entity, value, DirtyEffect::Mark).unwrap();
                }
                let drained = world.drain_dirty(|record| {
                    black_box(record.data);
                });
                black_box(drained);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, storage_benchmark);
criterion_main!(benches);
