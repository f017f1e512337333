use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TrackError;
use crate::measurement::{Measurement, Position, UNKNOWN_COLOR};
use crate::params::TrackerParameters;

use super::assoc::associate;
use super::hypothesis::{HypothesisFactory, HypothesisId, HypothesisSnapshot};
use super::kalman_filter::MotionModel;
use super::lifecycle;
use super::store::HypothesisStore;

/// Counters of the most recent cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    /// Cycle time
    pub time: f64,
    /// Measurements that survived validation
    pub measurements: usize,
    /// Measurements dropped by validation or frame check
    pub dropped: usize,
    pub matched: usize,
    pub skipped_corrections: usize,
    pub missed: usize,
    pub born: usize,
    pub suppressed_births: usize,
    pub refused_births: usize,
    pub pruned: usize,
    pub merged: usize,
    /// Hypotheses alive at the end of the cycle
    pub hypotheses: usize,
}

/// Multi-hypothesis tracker over 3D point detections.
///
/// Every measurement batch runs one full cycle: predict, associate,
/// correct/miss, birth, classify, prune, merge. The snapshot returned by the
/// accessors is refreshed only at the end of a cycle.
#[derive(Debug, Clone)]
pub struct Tracker {
    params: TrackerParameters,
    store: HypothesisStore,
    factory: HypothesisFactory,
    blocked_positions: Vec<Position>,
    current_time: Option<f64>,
    frame_count: usize,
    last_cycle: CycleSummary,
    snapshot: Vec<HypothesisSnapshot>,
}

impl Tracker {
    pub fn new(params: TrackerParameters) -> Result<Self, TrackError> {
        params.validate()?;
        Ok(Self {
            params,
            store: HypothesisStore::new(),
            factory: HypothesisFactory::new(MotionModel::default()),
            blocked_positions: Vec::new(),
            current_time: None,
            frame_count: 0,
            last_cycle: CycleSummary::default(),
            snapshot: Vec::new(),
        })
    }

    /// Motion model given to hypotheses born from now on.
    pub fn with_motion_model(self, motion_model: MotionModel) -> Self {
        Self {
            factory: self.factory.with_motion_model(motion_model),
            ..self
        }
    }

    /* -------------------------------------------------------------------------
     * Cycles
     * ------------------------------------------------------------------------- */

    /// Run one cycle at the latest timestamp of `measurements`.
    ///
    /// A batch in which nothing survives validation carries no usable time
    /// and leaves the hypotheses untouched.
    pub fn update(&mut self, measurements: &[Measurement]) -> Result<&[HypothesisSnapshot], TrackError> {
        let (valid, dropped) = self.filter_measurements(measurements);
        let now = valid.iter().map(|m| m.time).fold(f64::NEG_INFINITY, f64::max);
        if valid.is_empty() {
            self.last_cycle = CycleSummary {
                time: self.current_time.unwrap_or_default(),
                dropped,
                hypotheses: self.store.len(),
                ..Default::default()
            };
            return Ok(&self.snapshot);
        }
        self.run_cycle(now, valid, dropped)
    }

    /// Run one cycle at `now`. An empty batch marks every hypothesis as missed.
    pub fn update_at(
        &mut self,
        now: f64,
        measurements: &[Measurement],
    ) -> Result<&[HypothesisSnapshot], TrackError> {
        if !now.is_finite() {
            return Err(TrackError::InvalidMeasurement(format!(
                "cycle time is not finite ({})",
                now
            )));
        }
        let (valid, dropped) = self.filter_measurements(measurements);
        self.run_cycle(now, valid, dropped)
    }

    /// Roll every belief to `now` without a measurement batch.
    ///
    /// Nobody is marked as missed; classification, pruning and merging still run.
    pub fn predict_without_measurement(&mut self, now: f64) -> Result<&[HypothesisSnapshot], TrackError> {
        if !now.is_finite() {
            return Err(TrackError::InvalidMeasurement(format!(
                "prediction time is not finite ({})",
                now
            )));
        }
        let params = &self.params;
        self.store.iter_mut().for_each(|h| h.predict(now, params));

        let mut summary = CycleSummary {
            time: now,
            ..Default::default()
        };
        self.finish_cycle(now, &mut summary);
        Ok(&self.snapshot)
    }

    /// Snapshots of every hypothesis propagated `horizon` seconds past the
    /// current time. The tracker itself is not modified.
    pub fn predict_future(&self, horizon: f64) -> Vec<HypothesisSnapshot> {
        let target = self.current_time.unwrap_or_default() + horizon.max(0.0);
        self.store
            .iter()
            .map(|h| {
                let mut future = h.clone();
                future.predict(target, &self.params);
                future.snapshot()
            })
            .collect()
    }

    /// `predict_future` over the configured `future_time`.
    pub fn predict_future_default(&self) -> Vec<HypothesisSnapshot> {
        self.predict_future(self.params.future_time)
    }

    /// Drop every hypothesis, reset the id counter and the clock.
    ///
    /// Blocked positions are kept.
    pub fn reset(&mut self) {
        self.store.clear();
        self.factory.reset();
        self.current_time = None;
        self.frame_count = 0;
        self.last_cycle = CycleSummary::default();
        self.snapshot.clear();
    }

    /* -------------------------------------------------------------------------
     * Blocked positions
     * ------------------------------------------------------------------------- */

    /// Block births around a picked object and remove whatever is tracked there.
    pub fn block_position(&mut self, position: Position) -> Vec<HypothesisId> {
        let removed = lifecycle::remove_near(&mut self.store, &position, self.params.radius_around_picked);
        self.blocked_positions.push(position);
        if !removed.is_empty() {
            self.refresh_snapshot();
        }
        removed
    }

    pub fn set_blocked_positions(&mut self, positions: Vec<Position>) -> Vec<HypothesisId> {
        self.blocked_positions.clear();
        let mut removed: Vec<_> = positions
            .into_iter()
            .flat_map(|p| self.block_position(p))
            .collect();
        removed.sort_unstable();
        removed
    }

    pub fn clear_blocked_positions(&mut self) {
        self.blocked_positions.clear();
    }

    pub fn blocked_positions(&self) -> &[Position] {
        &self.blocked_positions
    }

    /* -------------------------------------------------------------------------
     * Accessors
     * ------------------------------------------------------------------------- */

    /// Hypotheses at the end of the last cycle, ascending by id.
    pub fn hypotheses(&self) -> &[HypothesisSnapshot] {
        &self.snapshot
    }

    pub fn hypothesis(&self, id: HypothesisId) -> Option<&HypothesisSnapshot> {
        self.snapshot
            .binary_search_by_key(&id, |h| h.id)
            .ok()
            .map(|i| &self.snapshot[i])
    }

    pub fn static_hypotheses(&self) -> impl Iterator<Item = &HypothesisSnapshot> {
        self.snapshot.iter().filter(|h| h.is_static)
    }

    pub fn dynamic_hypotheses(&self) -> impl Iterator<Item = &HypothesisSnapshot> {
        self.snapshot.iter().filter(|h| !h.is_static)
    }

    pub fn hypothesis_count(&self) -> usize {
        self.snapshot.len()
    }

    /// Number of completed measurement cycles.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn current_time(&self) -> Option<f64> {
        self.current_time
    }

    pub fn last_cycle(&self) -> &CycleSummary {
        &self.last_cycle
    }

    pub fn params(&self) -> &TrackerParameters {
        &self.params
    }

    pub fn motion_model(&self) -> MotionModel {
        self.factory.motion_model()
    }

    /// Measurement with the nominal noise in the world frame and unknown color.
    pub fn measurement_at(&self, pos: Position, time: f64) -> Measurement {
        Measurement::isotropic(
            pos,
            self.params.measurement_std,
            UNKNOWN_COLOR,
            self.params.world_frame.as_str(),
            time,
        )
    }

    /* -------------------------------------------------------------------------
     * Internal methods
     * ------------------------------------------------------------------------- */

    fn filter_measurements(&self, measurements: &[Measurement]) -> (Vec<Measurement>, usize) {
        let mut dropped = 0;
        let valid = measurements
            .iter()
            .enumerate()
            .filter(|(i, m)| {
                if let Err(e) = m.validate() {
                    warn!(measurement = i, error = %e, "measurement dropped");
                    dropped += 1;
                    return false;
                }
                if m.frame != self.params.world_frame {
                    warn!(
                        measurement = i,
                        frame = %m.frame,
                        world_frame = %self.params.world_frame,
                        "measurement dropped, unresolved frame"
                    );
                    dropped += 1;
                    return false;
                }
                true
            })
            .map(|(_, m)| m.clone())
            .collect();
        (valid, dropped)
    }

    fn run_cycle(
        &mut self,
        now: f64,
        measurements: Vec<Measurement>,
        dropped: usize,
    ) -> Result<&[HypothesisSnapshot], TrackError> {
        let params = &self.params;
        self.store.iter_mut().for_each(|h| h.predict(now, params));

        let ids = self.store.ids();
        let predictions: Vec<_> = ids
            .iter()
            .filter_map(|&id| self.store.get(id))
            .map(|h| h.filter().project())
            .collect();
        let assignment = associate(
            &predictions,
            &measurements,
            params.max_mahalanobis_distance,
            params.ambiguous_dist,
        )?;

        let corrections =
            lifecycle::apply_corrections(&mut self.store, &ids, &measurements, &assignment, params);
        lifecycle::mark_missed(&mut self.store, &corrections.missed, now, params);
        let births = lifecycle::spawn_hypotheses(
            &mut self.store,
            &mut self.factory,
            &measurements,
            &corrections.unexplained,
            &self.blocked_positions,
            params,
        );

        let mut summary = CycleSummary {
            time: now,
            measurements: measurements.len(),
            dropped,
            matched: corrections.corrected.len(),
            skipped_corrections: corrections.skipped,
            missed: corrections.missed.len(),
            born: births.born.len(),
            suppressed_births: births.suppressed,
            refused_births: births.refused,
            ..Default::default()
        };
        self.frame_count += 1;
        self.finish_cycle(now, &mut summary);
        Ok(&self.snapshot)
    }

    fn finish_cycle(&mut self, now: f64, summary: &mut CycleSummary) {
        lifecycle::classify(&mut self.store, &self.params);
        summary.pruned = lifecycle::prune(&mut self.store, now, &self.params).len();
        summary.merged = lifecycle::merge(&mut self.store, &self.params).len();
        summary.hypotheses = self.store.len();

        self.current_time = Some(self.current_time.map_or(now, |t| t.max(now)));
        self.refresh_snapshot();

        debug!(
            time = summary.time,
            measurements = summary.measurements,
            dropped = summary.dropped,
            matched = summary.matched,
            missed = summary.missed,
            born = summary.born,
            pruned = summary.pruned,
            merged = summary.merged,
            hypotheses = summary.hypotheses,
            "cycle finished"
        );
        self.last_cycle = summary.clone();
    }

    fn refresh_snapshot(&mut self) {
        self.snapshot = self.store.iter().map(|h| h.snapshot()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::PositionCov;
    use nearly_eq::assert_nearly_eq;

    fn tracker() -> Tracker {
        Tracker::new(TrackerParameters::default()).unwrap()
    }

    fn at(tracker: &Tracker, x: f64, y: f64, z: f64, time: f64) -> Measurement {
        tracker.measurement_at(Position::new(x, y, z), time)
    }

    // ==========================================================================
    // construction
    // ==========================================================================

    #[test]
    fn test_new_rejects_invalid_params() {
        let params = TrackerParameters::default().with_covariance_bounds(1.0, 0.5);
        assert!(matches!(Tracker::new(params), Err(TrackError::InvalidParameter(_))));
    }

    #[test]
    fn test_with_motion_model() {
        let tracker = tracker().with_motion_model(MotionModel::ConstantPosition);
        assert_eq!(tracker.motion_model(), MotionModel::ConstantPosition);
        assert!(tracker.hypotheses().is_empty());
    }

    #[test]
    fn test_measurement_at_uses_nominal_noise() {
        let tracker = tracker();
        let m = at(&tracker, 1.0, 2.0, 3.0, 4.0);
        assert_eq!(m.frame, "world");
        assert_eq!(m.color, UNKNOWN_COLOR);
        assert_nearly_eq!(m.cov[(2, 2)], 0.0009, 1e-12);
        assert_eq!(m.time, 4.0);
    }

    // ==========================================================================
    // scenarios
    // ==========================================================================

    #[test]
    fn test_birth_correct_prune() {
        let mut tracker = tracker();

        let m0 = at(&tracker, 0.0, 0.0, 0.0, 0.0);
        tracker.update(&[m0]).unwrap();
        assert_eq!(tracker.hypothesis_count(), 1);
        let h0 = &tracker.hypotheses()[0];
        assert_eq!(h0.id, 0);
        assert_eq!(h0.position, Position::zeros());
        assert_eq!(h0.velocity, Position::zeros());

        let m1 = at(&tracker, 1.0, 0.0, 0.0, 1.0);
        tracker.update(&[m1]).unwrap();
        assert_eq!(tracker.hypothesis_count(), 1);
        assert_eq!(tracker.last_cycle().matched, 1);
        let h0 = &tracker.hypotheses()[0];
        assert_eq!(h0.id, 0);
        assert!(h0.position.x > 0.0 && h0.position.x < 1.0);
        assert!(h0.velocity.x > 0.0);
        assert_nearly_eq!(h0.velocity.y, 0.0, 1e-12);

        // misses accumulate until the hypothesis turns spurious
        let mut t = 1.0;
        while tracker.hypothesis_count() > 0 {
            t += 0.1;
            tracker.update_at(t, &[]).unwrap();
            assert!(t < 3.5, "hypothesis never pruned");
        }
        assert_eq!(tracker.last_cycle().pruned, 1);
        assert!(t - 1.0 > tracker.params().born_time_threshold);
    }

    #[test]
    fn test_same_batch_duplicates_collapse() {
        let mut tracker = tracker();
        let batch = [at(&tracker, 0.0, 0.0, 0.0, 0.0), at(&tracker, 0.02, 0.0, 0.0, 0.0)];

        tracker.update(&batch).unwrap();

        assert_eq!(tracker.last_cycle().born, 2);
        assert_eq!(tracker.last_cycle().merged, 1);
        assert_eq!(tracker.hypothesis_count(), 1);
        assert_eq!(tracker.hypotheses()[0].id, 0);
    }

    #[test]
    fn test_two_targets_keep_their_ids() {
        let mut tracker = tracker();
        for k in 0..10 {
            let t = k as f64 * 0.1;
            let batch = [
                at(&tracker, 0.1 * k as f64, 0.0, 0.0, t),
                at(&tracker, 5.0, 0.1 * k as f64, 0.0, t),
            ];
            tracker.update(&batch).unwrap();
        }

        assert_eq!(tracker.hypothesis_count(), 2);
        let a = tracker.hypothesis(0).unwrap();
        let b = tracker.hypothesis(1).unwrap();
        assert!((a.position - Position::new(0.9, 0.0, 0.0)).norm() < 0.05);
        assert!((b.position - Position::new(5.0, 0.9, 0.0)).norm() < 0.05);
        assert_eq!(tracker.frame_count(), 10);
    }

    #[test]
    fn test_millimetre_noise_keeps_identity() {
        let params = TrackerParameters {
            measurement_std: 1e-3,
            ..TrackerParameters::default()
        }
        .with_position_noise(1e-4)
        .with_velocity_noise(1e-4)
        .with_covariance_bounds(1e-6, 10.0);
        let mut tracker = Tracker::new(params).unwrap();

        for k in 0..100 {
            let m = at(&tracker, 1.0, 2.0, 0.0, k as f64 * 0.1);
            tracker.update(&[m]).unwrap();
            assert_eq!(tracker.last_cycle().skipped_corrections, 0, "frame {}", k);
        }

        let hypotheses = tracker.hypotheses();
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].id, 0);
        assert_eq!(hypotheses[0].times_measured, 100);
    }

    #[test]
    fn test_young_hypothesis_survives_misses() {
        let mut tracker = tracker();
        tracker.update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0)]).unwrap();

        for k in 1..=40 {
            tracker.update_at(k as f64 * 0.01, &[]).unwrap();
            assert_eq!(tracker.hypothesis_count(), 1);
        }
        tracker.update_at(0.51, &[]).unwrap();
        assert_eq!(tracker.hypothesis_count(), 0);
    }

    // ==========================================================================
    // validation
    // ==========================================================================

    #[test]
    fn test_invalid_measurements_are_dropped() {
        let mut tracker = tracker();
        let mut bad_cov = at(&tracker, 1.0, 0.0, 0.0, 0.0);
        bad_cov.cov = PositionCov::identity() * -1.0;
        let mut nan = at(&tracker, 2.0, 0.0, 0.0, 0.0);
        nan.pos.x = f64::NAN;
        let mut other_frame = at(&tracker, 3.0, 0.0, 0.0, 0.0);
        other_frame.frame = "camera".to_string();
        let good = at(&tracker, 4.0, 0.0, 0.0, 0.0);

        tracker.update(&[bad_cov, nan, other_frame, good]).unwrap();

        assert_eq!(tracker.last_cycle().dropped, 3);
        assert_eq!(tracker.hypothesis_count(), 1);
        assert_eq!(tracker.hypotheses()[0].position.x, 4.0);
    }

    #[test]
    fn test_all_invalid_batch_leaves_hypotheses_untouched() {
        let mut tracker = tracker();
        tracker.update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0)]).unwrap();
        let before = tracker.hypotheses().to_vec();
        let mut bad = at(&tracker, 0.0, 0.0, 0.0, 1.0);
        bad.frame = "map".to_string();

        tracker.update(&[bad]).unwrap();

        assert_eq!(tracker.hypotheses(), before.as_slice());
        assert_eq!(tracker.last_cycle().dropped, 1);
        assert_eq!(tracker.frame_count(), 1);
    }

    #[test]
    fn test_update_at_rejects_non_finite_time() {
        let mut tracker = tracker();
        assert!(tracker.update_at(f64::NAN, &[]).is_err());
        assert!(tracker.predict_without_measurement(f64::INFINITY).is_err());
    }

    // ==========================================================================
    // prediction
    // ==========================================================================

    #[test]
    fn test_predict_without_measurement_does_not_mark_missed() {
        let mut tracker = tracker();
        tracker.update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0)]).unwrap();

        tracker.predict_without_measurement(0.3).unwrap();

        let h = &tracker.hypotheses()[0];
        assert_eq!(h.misdetection_rate, 0.0);
        assert!(h.covariance[(0, 0)] > tracker.params().init_cov);
        assert_eq!(tracker.current_time(), Some(0.3));
        assert_eq!(tracker.frame_count(), 1);
    }

    #[test]
    fn test_predict_future_leaves_state_alone() {
        let mut tracker = tracker();
        tracker.update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0)]).unwrap();
        tracker.update(&[at(&tracker, 1.0, 0.0, 0.0, 1.0)]).unwrap();
        let before = tracker.hypotheses().to_vec();

        let future = tracker.predict_future(2.0);

        assert_eq!(tracker.hypotheses(), before.as_slice());
        assert_eq!(future.len(), 1);
        assert!(future[0].position.x > before[0].position.x);
        assert!(future[0].covariance[(0, 0)] > before[0].covariance[(0, 0)]);
        assert_eq!(tracker.predict_future_default().len(), 1);
    }

    // ==========================================================================
    // blocking and reset
    // ==========================================================================

    #[test]
    fn test_block_position_removes_and_suppresses() {
        let mut tracker = tracker();
        tracker
            .update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0), at(&tracker, 5.0, 0.0, 0.0, 0.0)])
            .unwrap();

        let removed = tracker.block_position(Position::new(0.1, 0.0, 0.0));
        assert_eq!(removed, vec![0]);
        assert_eq!(tracker.hypothesis_count(), 1);

        tracker.update(&[at(&tracker, 0.05, 0.0, 0.0, 0.1)]).unwrap();
        assert_eq!(tracker.last_cycle().born, 0);
        assert_eq!(tracker.last_cycle().suppressed_births, 1);

        tracker.clear_blocked_positions();
        tracker.update(&[at(&tracker, 0.05, 0.0, 0.0, 0.2)]).unwrap();
        assert_eq!(tracker.last_cycle().born, 1);
    }

    #[test]
    fn test_set_blocked_positions() {
        let mut tracker = tracker();
        tracker
            .update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0), at(&tracker, 2.0, 0.0, 0.0, 0.0)])
            .unwrap();

        let removed = tracker.set_blocked_positions(vec![
            Position::new(2.0, 0.1, 0.0),
            Position::new(0.0, 0.0, 0.1),
        ]);

        assert_eq!(removed, vec![0, 1]);
        assert_eq!(tracker.blocked_positions().len(), 2);
        assert!(tracker.hypotheses().is_empty());
    }

    #[test]
    fn test_reset() {
        let mut tracker = tracker();
        tracker
            .update(&[at(&tracker, 0.0, 0.0, 0.0, 0.0), at(&tracker, 2.0, 0.0, 0.0, 0.0)])
            .unwrap();

        tracker.reset();
        assert!(tracker.hypotheses().is_empty());
        assert_eq!(tracker.current_time(), None);
        assert_eq!(tracker.frame_count(), 0);

        tracker.update(&[at(&tracker, 5.0, 0.0, 0.0, 10.0)]).unwrap();
        assert_eq!(tracker.hypotheses()[0].id, 0);
    }

    #[test]
    fn test_static_and_dynamic_views() {
        let mut tracker = tracker();
        for k in 0..10 {
            let t = k as f64 * 0.1;
            let batch = [at(&tracker, 0.0, 0.0, 0.0, t), at(&tracker, 5.0 + 0.1 * k as f64, 0.0, 0.0, t)];
            tracker.update(&batch).unwrap();
        }

        let statics: Vec<_> = tracker.static_hypotheses().map(|h| h.id).collect();
        let dynamics: Vec<_> = tracker.dynamic_hypotheses().map(|h| h.id).collect();
        assert_eq!(statics, vec![0]);
        assert_eq!(dynamics, vec![1]);
    }
}
