//! Spatial index and registry tick benchmarks.
//!
//! Measures the three hot paths of a busy world:
//!
//! - re-filing hotspots that drift a few blocks per tick,
//! - point queries against a populated index, and
//! - a full registry tick with every owner moving.
//!
//! Run with: `cargo bench --bench spatial_benchmarks`

use std::any::Any;
use std::sync::{Arc, Mutex};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use uuid::Uuid;

use ether_core::prelude::*;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Spot {
    center: BlockPos,
    radius: f32,
}

impl Hotspot for Spot {
    fn center(&self) -> BlockPos {
        self.center
    }
    fn radius(&self) -> f32 {
        self.radius
    }
}

struct Ward(Uuid);

impl Effect for Ward {
    fn id(&self) -> Uuid {
        self.0
    }
    fn effect_type(&self) -> EffectTypeId {
        EffectTypeId::parse("ether:ward").unwrap()
    }
    fn is_dead(&self) -> bool {
        false
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Walker {
    uuid: Uuid,
    pos: Mutex<Vec3>,
}

impl Actor for Walker {
    fn uuid(&self) -> Uuid {
        self.uuid
    }
    fn local_id(&self) -> i32 {
        self.uuid.as_u128() as i32
    }
    fn position(&self) -> Vec3 {
        *self.pos.lock().unwrap()
    }
    fn is_alive(&self) -> bool {
        true
    }
    fn find_effect(&self, _filter: EffectFilter<'_>) -> Option<Arc<dyn Effect>> {
        None
    }
}

struct Flatland;

impl WorldView for Flatland {
    fn is_authoritative(&self) -> bool {
        true
    }
    fn actor_by_uuid(&self, _uuid: Uuid) -> Option<Arc<dyn Actor>> {
        None
    }
    fn actor_by_local_id(&self, _local_id: i32) -> Option<Arc<dyn Actor>> {
        None
    }
}

fn random_pos(rng: &mut Pcg64, extent: i32) -> BlockPos {
    BlockPos::new(
        rng.gen_range(-extent..extent),
        rng.gen_range(0..256),
        rng.gen_range(-extent..extent),
    )
}

fn scattered_spots(count: usize, rng: &mut Pcg64) -> Vec<Spot> {
    (0..count)
        .map(|_| Spot {
            center: random_pos(rng, 2_000),
            radius: rng.gen_range(0.0..24.0),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_refile(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_refile");
    for &count in &[100usize, 1_000, 10_000] {
        let mut rng = Pcg64::seed_from_u64(0xE7E7);
        let mut spots = scattered_spots(count, &mut rng);
        let mut index = SpatialIndex::new(16);
        for (i, spot) in spots.iter().enumerate() {
            index.update(i, spot);
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for (i, spot) in spots.iter_mut().enumerate() {
                    spot.center = spot.center.offset(rng.gen_range(-2..=2), 0, rng.gen_range(-2..=2));
                    black_box(index.update(i, spot));
                }
            });
        });
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_query");
    for &count in &[100usize, 1_000, 10_000] {
        let mut rng = Pcg64::seed_from_u64(0x5EED);
        let spots = scattered_spots(count, &mut rng);
        let mut index = SpatialIndex::new(16);
        for (i, spot) in spots.iter().enumerate() {
            index.update(i, spot);
        }
        let probes: Vec<BlockPos> = (0..256).map(|_| random_pos(&mut rng, 2_000)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for probe in &probes {
                    black_box(index.get_state(*probe));
                }
            });
        });
    }
    group.finish();
}

fn bench_registry_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_tick");
    for &count in &[100usize, 1_000] {
        let mut rng = Pcg64::seed_from_u64(0x71C4);
        let world = Flatland;
        let registry = Registry::default();
        let mut walkers = Vec::with_capacity(count);
        let mut wards: Vec<Arc<dyn Effect>> = Vec::with_capacity(count);
        for i in 0..count {
            let start = random_pos(&mut rng, 1_000).center();
            let walker = Arc::new(Walker {
                uuid: Uuid::from_u128(i as u128 + 1),
                pos: Mutex::new(start),
            });
            let ward: Arc<dyn Effect> = Arc::new(Ward(Uuid::from_u128(i as u128 + 1_000_000)));
            let owner: Arc<dyn Actor> = walker.clone();
            registry.get_or_create(&world, &ward, &owner);
            walkers.push(walker);
            wards.push(ward);
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for walker in &walkers {
                    let mut pos = walker.pos.lock().unwrap();
                    *pos = *pos + Vec3::new(rng.gen_range(-1.5..1.5), 0.0, rng.gen_range(-1.5..1.5));
                }
                black_box(registry.tick(&world));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_refile, bench_query, bench_registry_tick);
criterion_main!(benches);
