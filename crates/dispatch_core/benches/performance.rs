//! Performance benchmarks for dispatch_core using Criterion.rs.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dispatch_core::config::{MatchingConfig, PricingConfig};
use dispatch_core::fleet::Fleet;
use dispatch_core::matching::{Availability, DriverMatcher};
use dispatch_core::model::{GeoPoint, VehicleClass};
use dispatch_core::pricing::PricingEngine;
use dispatch_core::test_helpers::{register_driver, weekday_noon};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PICKUP: GeoPoint = GeoPoint {
    lat: 52.52,
    lng: 13.405,
};

fn populated_fleet(drivers: usize) -> Arc<Fleet> {
    let fleet = Arc::new(Fleet::default());
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..drivers {
        let position = GeoPoint::new(
            PICKUP.lat + rng.gen_range(-0.2..0.2),
            PICKUP.lng + rng.gen_range(-0.3..0.3),
        );
        register_driver(&fleet, &format!("driver-{i}"), position, VehicleClass::Sedan);
    }
    fleet
}

fn bench_find_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_nearest");
    for drivers in [100, 1_000, 10_000] {
        let matcher = DriverMatcher::new(populated_fleet(drivers), MatchingConfig::default());
        group.bench_with_input(BenchmarkId::from_parameter(drivers), &matcher, |b, matcher| {
            b.iter(|| {
                black_box(
                    matcher
                        .find_nearest(black_box(PICKUP), 10_000.0, Availability::Available)
                        .ok(),
                )
            });
        });
    }
    group.finish();
}

fn bench_pricing(c: &mut Criterion) {
    let engine = PricingEngine::new(PricingConfig::default());
    let at = weekday_noon();
    c.bench_function("price", |b| {
        b.iter(|| {
            black_box(engine.price(
                black_box(12.3),
                VehicleClass::Van,
                black_box(17.0),
                at,
            ))
        });
    });
}

criterion_group!(benches, bench_find_nearest, bench_pricing);
criterion_main!(benches);
