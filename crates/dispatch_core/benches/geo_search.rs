use criterion::{black_box, criterion_group, criterion_main, Criterion};
use h3o::Resolution;
use uuid::Uuid;

use dispatch_core::entities::{GeoPoint, Tier};
use dispatch_core::spatial::DriverGeoIndex;

fn populated_index(drivers: usize) -> DriverGeoIndex {
    let index = DriverGeoIndex::new(Resolution::Eight);
    for i in 0..drivers {
        // Spread drivers over roughly 0.2° × 0.2° around Bengaluru.
        let lat = 12.87 + (i % 100) as f64 * 2e-3;
        let lng = 77.49 + (i / 100) as f64 * 2e-3;
        index
            .upsert(Tier::Standard, Uuid::new_v4(), GeoPoint::new(lat, lng))
            .expect("valid coordinates");
    }
    index
}

fn bench_search(c: &mut Criterion) {
    let origin = GeoPoint::new(12.9716, 77.5946);
    for drivers in [1_000, 10_000] {
        let index = populated_index(drivers);
        c.bench_function(&format!("search_radius_2km_{drivers}_drivers"), |b| {
            b.iter(|| {
                index
                    .search_by_radius(Tier::Standard, black_box(origin), 2.0, 20)
                    .expect("search")
            })
        });
        c.bench_function(&format!("search_radius_10km_{drivers}_drivers"), |b| {
            b.iter(|| {
                index
                    .search_by_radius(Tier::Standard, black_box(origin), 10.0, 20)
                    .expect("search")
            })
        });
    }
}

fn bench_upsert(c: &mut Criterion) {
    let index = populated_index(10_000);
    let driver = Uuid::new_v4();
    c.bench_function("upsert_hot_path", |b| {
        let mut step = 0u64;
        b.iter(|| {
            step += 1;
            let lat = 12.9716 + (step % 1000) as f64 * 1e-5;
            index
                .upsert(Tier::Standard, driver, GeoPoint::new(lat, 77.5946))
                .expect("valid coordinates")
        })
    });
}

criterion_group!(benches, bench_search, bench_upsert);
criterion_main!(benches);
