//! A single tracked object: one Kalman filter plus its survival bookkeeping.

use crate::error::TrackError;
use crate::measurement::{Measurement, Position};
use crate::params::TrackerParameters;
use serde::{Deserialize, Serialize};

use super::kalman_filter::{KalmanFilter, MotionModel, StateCov, StateMean};

pub type HypothesisId = u64;

/* -----------------------------------------------------------------------------
 * Hypothesis
 * ----------------------------------------------------------------------------- */

/// One tracked object.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    id: HypothesisId,
    kf: KalmanFilter,
    color: u8,
    /// Timestamp of the birth measurement
    born_time: f64,
    /// Time the belief has been predicted to
    last_update_time: f64,
    last_measurement_time: f64,
    detection_rate: f64,
    misdetection_rate: f64,
    times_measured: u64,
    is_static: bool,
    // once dynamic, never static again
    seen_dynamic: bool,
    first_position_in_track: Position,
    max_velocity_in_track: Position,
    /// Finite-difference velocity between the last two corrections
    velocity: Position,
    corrected_position: Position,
    // filter velocity right after the last correction, base of the decay
    reference_velocity: Position,
    latest_measurement: Measurement,
    previous_measurement: Option<Measurement>,
}

impl Hypothesis {
    pub fn new(
        id: HypothesisId,
        measurement: &Measurement,
        params: &TrackerParameters,
        motion_model: MotionModel,
    ) -> Self {
        let kf = KalmanFilter::new(measurement, params, motion_model);
        Self {
            id,
            color: measurement.color,
            born_time: measurement.time,
            last_update_time: measurement.time,
            last_measurement_time: measurement.time,
            detection_rate: 1.0,
            misdetection_rate: 0.0,
            times_measured: 1,
            is_static: true,
            seen_dynamic: false,
            first_position_in_track: measurement.pos,
            max_velocity_in_track: Position::zeros(),
            velocity: Position::zeros(),
            corrected_position: kf.position(),
            reference_velocity: Position::zeros(),
            latest_measurement: measurement.clone(),
            previous_measurement: None,
            kf,
        }
    }

    /// Roll the belief forward to `now`. Times in the past are ignored.
    pub fn predict(&mut self, now: f64, params: &TrackerParameters) {
        let dt = now - self.last_update_time;
        if dt > 0.0 {
            self.kf.predict(dt, &Position::zeros(), params);
            self.last_update_time = now;
        }
    }

    /// Fuse a matched measurement and record the hit.
    ///
    /// On `SingularInnovation` nothing is changed; the caller treats the
    /// hypothesis as missed for this cycle.
    pub fn correct(
        &mut self,
        measurement: &Measurement,
        params: &TrackerParameters,
    ) -> Result<(), TrackError> {
        self.kf.update(measurement)?;

        let position = self.kf.position();
        let dt = measurement.time - self.last_measurement_time;
        if dt > 0.0 {
            self.velocity = (position - self.corrected_position) / dt;
            if self.velocity.norm() > self.max_velocity_in_track.norm() {
                self.max_velocity_in_track = self.velocity;
            }
        }
        self.corrected_position = position;
        self.reference_velocity = self.kf.velocity();

        self.last_measurement_time = self.last_measurement_time.max(measurement.time);
        self.times_measured += 1;
        self.color = measurement.color;
        let previous = std::mem::replace(&mut self.latest_measurement, measurement.clone());
        self.previous_measurement = Some(previous);

        self.detected(params);
        Ok(())
    }

    fn detected(&mut self, params: &TrackerParameters) {
        let a = params.rate_smoothing;
        self.detection_rate = (1.0 - a) * self.detection_rate + a;
        self.misdetection_rate = (1.0 - a) * self.misdetection_rate;
    }

    /// Record a miss at `now` and fade the velocity out over the decay window.
    pub fn undetected(&mut self, now: f64, params: &TrackerParameters) {
        let a = params.rate_smoothing;
        self.detection_rate = (1.0 - a) * self.detection_rate;
        self.misdetection_rate = (1.0 - a) * self.misdetection_rate + a;

        let since = now - self.last_measurement_time;
        let window = params.velocity_decay_end - params.velocity_decay_start;
        let factor = ((params.velocity_decay_end - since) / window).clamp(0.0, 1.0);
        self.kf.set_velocity(&(self.reference_velocity * factor));
    }

    /// Update the static flag from the displacement and the fastest observed motion.
    pub fn verify_static(&mut self, params: &TrackerParameters) {
        if self.seen_dynamic {
            return;
        }
        let displacement = (self.kf.position() - self.first_position_in_track).norm();
        let still = displacement < params.static_distance_threshold
            && self.max_velocity_in_track.norm() < params.static_velocity_threshold;
        self.is_static = still;
        self.seen_dynamic = !still;
    }

    pub fn is_spurious(&self, now: f64, params: &TrackerParameters) -> bool {
        self.misdetection_rate > params.max_misdetection_rate
            || now - self.last_measurement_time > params.max_time_without_measurement
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.born_time
    }

    /// Spurious and past the young-track protection window.
    pub fn should_prune(&self, now: f64, params: &TrackerParameters) -> bool {
        self.age(now) > params.born_time_threshold && self.is_spurious(now, params)
    }

    pub fn id(&self) -> HypothesisId {
        self.id
    }

    pub fn position(&self) -> Position {
        self.kf.position()
    }

    pub fn state(&self) -> &StateMean {
        self.kf.state()
    }

    pub fn covariance(&self) -> &StateCov {
        self.kf.covariance()
    }

    pub fn filter(&self) -> &KalmanFilter {
        &self.kf
    }

    #[cfg(test)]
    pub(crate) fn filter_mut(&mut self) -> &mut KalmanFilter {
        &mut self.kf
    }

    pub fn velocity(&self) -> Position {
        self.velocity
    }

    pub fn color(&self) -> u8 {
        self.color
    }

    pub fn born_time(&self) -> f64 {
        self.born_time
    }

    pub fn last_measurement_time(&self) -> f64 {
        self.last_measurement_time
    }

    pub fn detection_rate(&self) -> f64 {
        self.detection_rate
    }

    pub fn misdetection_rate(&self) -> f64 {
        self.misdetection_rate
    }

    pub fn times_measured(&self) -> u64 {
        self.times_measured
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn latest_measurement(&self) -> &Measurement {
        &self.latest_measurement
    }

    pub fn previous_measurement(&self) -> Option<&Measurement> {
        self.previous_measurement.as_ref()
    }

    pub fn snapshot(&self) -> HypothesisSnapshot {
        HypothesisSnapshot {
            id: self.id,
            position: self.kf.position(),
            filter_velocity: self.kf.velocity(),
            velocity: self.velocity,
            covariance: *self.kf.covariance(),
            color: self.color,
            is_static: self.is_static,
            detection_rate: self.detection_rate,
            misdetection_rate: self.misdetection_rate,
            times_measured: self.times_measured,
            born_time: self.born_time,
            last_measurement_time: self.last_measurement_time,
            latest_measurement: self.latest_measurement.clone(),
        }
    }
}

/* -----------------------------------------------------------------------------
 * Snapshot
 * ----------------------------------------------------------------------------- */

/// Read-only copy of a hypothesis handed out to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSnapshot {
    pub id: HypothesisId,
    pub position: Position,
    /// Velocity part of the filter state
    pub filter_velocity: Position,
    /// Finite-difference velocity between the last two corrections
    pub velocity: Position,
    pub covariance: StateCov,
    pub color: u8,
    pub is_static: bool,
    pub detection_rate: f64,
    pub misdetection_rate: f64,
    pub times_measured: u64,
    pub born_time: f64,
    pub last_measurement_time: f64,
    pub latest_measurement: Measurement,
}

/* -----------------------------------------------------------------------------
 * Factory
 * ----------------------------------------------------------------------------- */

/// Hands out hypotheses with monotonically increasing ids.
#[derive(Debug, Clone, Default)]
pub struct HypothesisFactory {
    motion_model: MotionModel,
    next_id: HypothesisId,
}

impl HypothesisFactory {
    pub fn new(motion_model: MotionModel) -> Self {
        Self {
            motion_model,
            next_id: 0,
        }
    }

    pub fn with_motion_model(self, motion_model: MotionModel) -> Self {
        Self {
            motion_model,
            ..self
        }
    }

    pub fn create(&mut self, measurement: &Measurement, params: &TrackerParameters) -> Hypothesis {
        let id = self.next_id;
        self.next_id += 1;
        Hypothesis::new(id, measurement, params, self.motion_model)
    }

    pub fn motion_model(&self) -> MotionModel {
        self.motion_model
    }

    pub fn next_id(&self) -> HypothesisId {
        self.next_id
    }

    pub fn reset(&mut self) {
        self.next_id = 0;
    }
}
