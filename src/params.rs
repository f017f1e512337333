use crate::error::TrackError;
use serde::{Deserialize, Serialize};

/// Cost assigned to forbidden hypothesis/measurement pairs.
///
/// Kept finite so the padded cost matrix handed to the solver is always
/// well-posed. Every admissible squared gate distance must stay below it.
pub const FORBIDDEN_COST: f64 = 1e9;

/// Immutable tracker configuration.
///
/// Rates suffixed `_per_sec` are variance growth rates; distances are in the
/// units of the world frame and times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParameters {
    // Process noise
    pub cov_x_per_sec: f64,
    pub cov_y_per_sec: f64,
    pub cov_z_per_sec: f64,
    pub cov_vx_per_sec: f64,
    pub cov_vy_per_sec: f64,
    pub cov_vz_per_sec: f64,
    pub alpha_vx_vx_per_sec: f64,
    pub alpha_vx_vy_per_sec: f64,
    pub alpha_vy_vy_per_sec: f64,
    pub alpha_vz_vz_per_sec: f64,

    // State covariance bounds
    pub init_cov: f64,
    pub max_cov: f64,

    /// Nominal standard deviation of a detection's position
    pub measurement_std: f64,
    /// Unmatched detections this close to a matched hypothesis are duplicates
    pub ambiguous_dist: f64,

    // Association
    pub max_mahalanobis_distance: f64,

    // Lifecycle
    pub merge_close_hypotheses_distance: f64,
    /// Hypotheses younger than this are never pruned
    pub born_time_threshold: f64,
    pub radius_around_picked: f64,
    pub static_distance_threshold: f64,
    pub static_velocity_threshold: f64,
    /// Weight of the newest hit/miss in the detection rate averages
    pub rate_smoothing: f64,
    pub max_misdetection_rate: f64,
    pub max_time_without_measurement: f64,
    pub velocity_decay_start: f64,
    pub velocity_decay_end: f64,
    /// Default horizon for future predictions
    pub future_time: f64,

    pub world_frame: String,
    pub max_hypotheses: Option<usize>,
}

impl Default for TrackerParameters {
    fn default() -> Self {
        Self {
            cov_x_per_sec: 0.5,
            cov_y_per_sec: 0.5,
            cov_z_per_sec: 0.5,
            cov_vx_per_sec: 0.5,
            cov_vy_per_sec: 0.5,
            cov_vz_per_sec: 0.5,
            alpha_vx_vx_per_sec: 0.1,
            alpha_vx_vy_per_sec: 0.1,
            alpha_vy_vy_per_sec: 0.1,
            alpha_vz_vz_per_sec: 0.1,
            init_cov: 0.5,
            max_cov: 10.0,
            measurement_std: 0.03,
            ambiguous_dist: 0.05,
            max_mahalanobis_distance: 3.75,
            merge_close_hypotheses_distance: 0.1,
            born_time_threshold: 0.5,
            radius_around_picked: 0.3,
            static_distance_threshold: 0.25,
            static_velocity_threshold: 2.0,
            rate_smoothing: 0.1,
            max_misdetection_rate: 0.5,
            max_time_without_measurement: 2.0,
            velocity_decay_start: 1.0,
            velocity_decay_end: 3.0,
            future_time: 1.0,
            world_frame: "world".to_string(),
            max_hypotheses: None,
        }
    }
}

impl TrackerParameters {
    /// Set the per-second position variance growth on all three axes.
    pub fn with_position_noise(self, cov_per_sec: f64) -> Self {
        Self {
            cov_x_per_sec: cov_per_sec,
            cov_y_per_sec: cov_per_sec,
            cov_z_per_sec: cov_per_sec,
            ..self
        }
    }

    /// Set the per-second velocity variance growth on all three axes.
    pub fn with_velocity_noise(self, cov_per_sec: f64) -> Self {
        Self {
            cov_vx_per_sec: cov_per_sec,
            cov_vy_per_sec: cov_per_sec,
            cov_vz_per_sec: cov_per_sec,
            ..self
        }
    }

    /// Set the initial and maximum state variance.
    pub fn with_covariance_bounds(self, init_cov: f64, max_cov: f64) -> Self {
        Self {
            init_cov,
            max_cov,
            ..self
        }
    }

    pub fn with_gate(self, max_mahalanobis_distance: f64) -> Self {
        Self {
            max_mahalanobis_distance,
            ..self
        }
    }

    pub fn with_merge_distance(self, merge_close_hypotheses_distance: f64) -> Self {
        Self {
            merge_close_hypotheses_distance,
            ..self
        }
    }

    pub fn with_born_time_threshold(self, born_time_threshold: f64) -> Self {
        Self {
            born_time_threshold,
            ..self
        }
    }

    /// Set the spurious-track policy.
    ///
    /// # Arguments
    /// * `max_misdetection_rate` - Misdetection rate above which a track is spurious
    /// * `max_time_without_measurement` - Gap after which a track is spurious
    pub fn with_spurious_policy(
        self,
        max_misdetection_rate: f64,
        max_time_without_measurement: f64,
    ) -> Self {
        Self {
            max_misdetection_rate,
            max_time_without_measurement,
            ..self
        }
    }

    pub fn with_velocity_decay(self, start: f64, end: f64) -> Self {
        Self {
            velocity_decay_start: start,
            velocity_decay_end: end,
            ..self
        }
    }

    pub fn with_static_thresholds(self, distance: f64, velocity: f64) -> Self {
        Self {
            static_distance_threshold: distance,
            static_velocity_threshold: velocity,
            ..self
        }
    }

    pub fn with_ambiguous_dist(self, ambiguous_dist: f64) -> Self {
        Self {
            ambiguous_dist,
            ..self
        }
    }

    pub fn with_radius_around_picked(self, radius_around_picked: f64) -> Self {
        Self {
            radius_around_picked,
            ..self
        }
    }

    pub fn with_world_frame(self, world_frame: impl Into<String>) -> Self {
        Self {
            world_frame: world_frame.into(),
            ..self
        }
    }

    pub fn with_max_hypotheses(self, max_hypotheses: Option<usize>) -> Self {
        Self {
            max_hypotheses,
            ..self
        }
    }

    /// Check every field for range and consistency.
    pub fn validate(&self) -> Result<(), TrackError> {
        let non_negative = [
            ("cov_x_per_sec", self.cov_x_per_sec),
            ("cov_y_per_sec", self.cov_y_per_sec),
            ("cov_z_per_sec", self.cov_z_per_sec),
            ("cov_vx_per_sec", self.cov_vx_per_sec),
            ("cov_vy_per_sec", self.cov_vy_per_sec),
            ("cov_vz_per_sec", self.cov_vz_per_sec),
            ("alpha_vx_vx_per_sec", self.alpha_vx_vx_per_sec),
            ("alpha_vy_vy_per_sec", self.alpha_vy_vy_per_sec),
            ("alpha_vz_vz_per_sec", self.alpha_vz_vz_per_sec),
            ("measurement_std", self.measurement_std),
            ("ambiguous_dist", self.ambiguous_dist),
            ("merge_close_hypotheses_distance", self.merge_close_hypotheses_distance),
            ("born_time_threshold", self.born_time_threshold),
            ("radius_around_picked", self.radius_around_picked),
            ("static_distance_threshold", self.static_distance_threshold),
            ("static_velocity_threshold", self.static_velocity_threshold),
            ("max_time_without_measurement", self.max_time_without_measurement),
            ("velocity_decay_start", self.velocity_decay_start),
            ("future_time", self.future_time),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }

        if !self.alpha_vx_vy_per_sec.is_finite() {
            return Err(invalid(format!(
                "alpha_vx_vy_per_sec must be finite, got {}",
                self.alpha_vx_vy_per_sec
            )));
        }
        if !self.init_cov.is_finite() || self.init_cov <= 0.0 {
            return Err(invalid(format!(
                "init_cov must be positive, got {}",
                self.init_cov
            )));
        }
        if !self.max_cov.is_finite() || self.max_cov < self.init_cov {
            return Err(invalid(format!(
                "max_cov ({}) must be finite and at least init_cov ({})",
                self.max_cov, self.init_cov
            )));
        }

        let gate = self.max_mahalanobis_distance;
        if !gate.is_finite() || gate <= 0.0 || gate * gate >= FORBIDDEN_COST {
            return Err(invalid(format!(
                "max_mahalanobis_distance must be positive and its square below {:e}, got {}",
                FORBIDDEN_COST, gate
            )));
        }

        if !(0.0..=1.0).contains(&self.rate_smoothing) || self.rate_smoothing == 0.0 {
            return Err(invalid(format!(
                "rate_smoothing must be in (0, 1], got {}",
                self.rate_smoothing
            )));
        }
        if !(0.0..=1.0).contains(&self.max_misdetection_rate) {
            return Err(invalid(format!(
                "max_misdetection_rate must be in [0, 1], got {}",
                self.max_misdetection_rate
            )));
        }
        if !self.velocity_decay_end.is_finite()
            || self.velocity_decay_end <= self.velocity_decay_start
        {
            return Err(invalid(format!(
                "velocity_decay_end ({}) must be finite and greater than velocity_decay_start ({})",
                self.velocity_decay_end, self.velocity_decay_start
            )));
        }
        if self.world_frame.is_empty() {
            return Err(invalid("world_frame must not be empty".to_string()));
        }
        if self.max_hypotheses == Some(0) {
            return Err(invalid("max_hypotheses must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> TrackError {
    TrackError::InvalidParameter(message)
}
