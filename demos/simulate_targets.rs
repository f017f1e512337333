//! Simulate a few noisy targets and print what the tracker makes of them.
//!
//! ```text
//! RUST_LOG=mhtrack_rs=trace cargo run --example simulate_targets
//! ```

use mhtrack_rs::{Measurement, Position, Tracker, TrackerParameters};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DT: f64 = 0.1;
const FRAMES: usize = 60;
const PICK_FRAME: usize = 30;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("simulate_targets=info,mhtrack_rs=debug")),
        )
        .init();

    let params = TrackerParameters::default()
        .with_born_time_threshold(0.5)
        .with_radius_around_picked(0.3);
    let mut tracker = Tracker::new(params)?;
    let mut rng = StdRng::seed_from_u64(7);
    let std = tracker.params().measurement_std;

    for k in 0..FRAMES {
        let t = k as f64 * DT;
        let mut truth = vec![
            // a box on a table, picked half way through
            (Position::new(0.5, 0.5, 0.8), b'r'),
            // someone walking past
            (Position::new(-2.0 + 0.4 * t, 1.5, 0.0), b'g'),
        ];
        if t > 2.0 {
            // enters late
            truth.push((Position::new(3.0, -1.0 + 0.2 * (t - 2.0), 0.0), b'b'));
        }
        if k >= PICK_FRAME {
            truth.remove(0);
        }

        let mut batch: Vec<Measurement> = Vec::new();
        for (pos, color) in &truth {
            if rng.gen_bool(0.85) {
                let noisy = pos + Position::from_fn(|_, _| rng.gen_range(-std..std));
                batch.push(Measurement::isotropic(noisy, std, *color, "world", t));
            }
        }
        if rng.gen_bool(0.1) {
            let clutter = Position::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), 0.0);
            batch.push(tracker.measurement_at(clutter, t));
        }
        if k == PICK_FRAME + 2 {
            // a ghost detection of the picked box
            batch.push(tracker.measurement_at(Position::new(0.52, 0.5, 0.8), t));
        }

        tracker.update_at(t, &batch)?;

        if k == PICK_FRAME {
            let removed = tracker.block_position(Position::new(0.5, 0.5, 0.8));
            info!(?removed, "box picked");
        }
    }

    for h in tracker.hypotheses() {
        info!(
            id = h.id,
            color = %(h.color as char),
            x = h.position.x,
            y = h.position.y,
            z = h.position.z,
            is_static = h.is_static,
            misdetection_rate = h.misdetection_rate,
            "hypothesis"
        );
    }

    let future = tracker.predict_future_default();
    println!("{}", serde_json::to_string_pretty(&future)?);
    println!("{}", serde_json::to_string_pretty(tracker.last_cycle())?);
    Ok(())
}
