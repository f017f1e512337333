use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mhtrack_rs::{Measurement, Position, Tracker, TrackerParameters};
use rand::{rngs::StdRng, Rng, SeedableRng};

const FRAMES: usize = 200;
const DT: f64 = 0.05;

/* ----------------------------------------------------------------------------
 * Synthetic detections
 * ---------------------------------------------------------------------------- */

// targets on circles of different radii plus uniform clutter
fn synthetic_batches(num_targets: usize, seed: u64) -> Vec<Vec<Measurement>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let std = 0.03;
    (0..FRAMES)
        .map(|k| {
            let t = k as f64 * DT;
            let mut batch = Vec::with_capacity(num_targets + 1);
            for i in 0..num_targets {
                if !rng.gen_bool(0.9) {
                    continue;
                }
                let radius = 1.0 + i as f64;
                let phase = t * 0.5 + i as f64;
                let pos = Position::new(
                    radius * phase.cos() + rng.gen_range(-std..std),
                    radius * phase.sin() + rng.gen_range(-std..std),
                    0.0,
                );
                batch.push(Measurement::isotropic(pos, std, b'U', "world", t));
            }
            if rng.gen_bool(0.2) {
                let pos = Position::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0), 0.0);
                batch.push(Measurement::isotropic(pos, std, b'U', "world", t));
            }
            batch
        })
        .collect()
}

fn bench_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");
    for num_targets in [4, 16, 32] {
        let batches = synthetic_batches(num_targets, 42);
        group.bench_with_input(BenchmarkId::from_parameter(num_targets), &batches, |b, batches| {
            b.iter(|| {
                let mut tracker = Tracker::new(TrackerParameters::default()).unwrap();
                for batch in batches.iter() {
                    tracker.update(batch).unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_tracker
}
criterion_main!(benches);
