use crate::error::TrackError;
use crate::measurement::{Measurement, Position, PositionCov};
use crate::params::TrackerParameters;
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

/* -----------------------------------------------------------------------------
 * Type aliases
 * ----------------------------------------------------------------------------- */
// 6x1: [px, py, pz, vx, vy, vz]
pub type StateMean = SVector<f64, 6>;
// 6x6
pub type StateCov = SMatrix<f64, 6, 6>;
// 3x6
type UpdateMat = SMatrix<f64, 3, 6>;

/* -----------------------------------------------------------------------------
 * Motion model
 * ----------------------------------------------------------------------------- */

/// Motion model a hypothesis is born with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionModel {
    /// Position integrates a slowly varying velocity.
    #[default]
    ConstantVelocity,
    /// Velocity is pinned to zero; only position uncertainty grows.
    ConstantPosition,
}

impl MotionModel {
    fn motion_mat(&self, dt: f64) -> StateCov {
        let mut motion_mat = StateCov::identity();
        if *self == MotionModel::ConstantVelocity {
            for i in 0..3 {
                motion_mat[(i, i + 3)] = dt;
            }
        }
        motion_mat
    }

    fn process_noise(
        &self,
        x: &StateMean,
        dt: f64,
        params: &TrackerParameters,
    ) -> StateCov {
        let mut q = StateCov::zeros();
        q[(0, 0)] = params.cov_x_per_sec * dt;
        q[(1, 1)] = params.cov_y_per_sec * dt;
        q[(2, 2)] = params.cov_z_per_sec * dt;
        if *self == MotionModel::ConstantPosition {
            return q;
        }

        // faster motion along an axis grows that axis' velocity uncertainty
        q[(3, 3)] = (params.cov_vx_per_sec + params.alpha_vx_vx_per_sec * x[3].abs()) * dt;
        q[(4, 4)] = (params.cov_vy_per_sec + params.alpha_vy_vy_per_sec * x[4].abs()) * dt;
        q[(5, 5)] = (params.cov_vz_per_sec + params.alpha_vz_vz_per_sec * x[5].abs()) * dt;

        // turns couple vx and vy; bounded so Q stays PSD
        let bound = (q[(3, 3)] * q[(4, 4)]).sqrt();
        let cross = (params.alpha_vx_vy_per_sec * dt).clamp(-bound, bound);
        q[(3, 4)] = cross;
        q[(4, 3)] = cross;
        q
    }
}

/* -----------------------------------------------------------------------------
 * Kalman Filter
 * ----------------------------------------------------------------------------- */

/// Linear Kalman filter over a 3D position/velocity state.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    update_mat: UpdateMat,
    x: StateMean,
    covariance: StateCov,
    motion_model: MotionModel,
}

impl KalmanFilter {
    pub fn new(
        measurement: &Measurement,
        params: &TrackerParameters,
        motion_model: MotionModel,
    ) -> Self {
        let mut update_mat = UpdateMat::zeros();
        update_mat[(0, 0)] = 1.0;
        update_mat[(1, 1)] = 1.0;
        update_mat[(2, 2)] = 1.0;

        let mut kf = Self {
            update_mat,
            x: StateMean::zeros(),
            covariance: StateCov::zeros(),
            motion_model,
        };
        kf.initialize(measurement, params);
        kf
    }

    /// Reset the belief to the measured position at rest.
    pub fn initialize(&mut self, measurement: &Measurement, params: &TrackerParameters) {
        self.x = StateMean::zeros();
        self.x.fixed_rows_mut::<3>(0).copy_from(&measurement.pos);
        self.covariance = StateCov::identity() * params.init_cov;
    }

    /// Roll the belief `dt` seconds forward.
    ///
    /// `control` is added to the position on top of the integrated velocity.
    /// A non-positive `dt` leaves the belief untouched.
    pub fn predict(&mut self, dt: f64, control: &Position, params: &TrackerParameters) {
        if !(dt > 0.0) {
            return;
        }

        let motion_mat = self.motion_model.motion_mat(dt);
        let motion_cov = self.motion_model.process_noise(&self.x, dt, params);

        self.x = motion_mat * self.x;
        let mut pos = self.x.fixed_rows_mut::<3>(0);
        pos += control;
        if self.motion_model == MotionModel::ConstantPosition {
            self.x.fixed_rows_mut::<3>(3).fill(0.0);
        }

        self.covariance = motion_mat * self.covariance * motion_mat.transpose() + motion_cov;
        self.clamp_covariance(params.max_cov);
    }

    /// Project the state into measurement space (position mean, HPHᵗ).
    pub fn project(&self) -> (Position, PositionCov) {
        let mean = self.update_mat * self.x;
        let covariance = self.update_mat * self.covariance * self.update_mat.transpose();
        (mean, covariance)
    }

    /// Fuse a position measurement into the belief.
    ///
    /// Fails with `SingularInnovation` and leaves the belief untouched when
    /// the innovation covariance is not positive definite.
    pub fn update(&mut self, measurement: &Measurement) -> Result<(), TrackError> {
        let (projected_mean, projected_cov) = self.project();
        let innovation_cov = projected_cov + measurement.cov;

        // same factorization the association gate uses
        let chol = innovation_cov
            .iter()
            .all(|v| v.is_finite())
            .then(|| innovation_cov.cholesky())
            .flatten()
            .ok_or_else(|| TrackError::SingularInnovation(innovation_cov.determinant()))?;

        // kalman_gain: 6x3, (S⁻¹ H P)ᵗ
        let kalman_gain = chol.solve(&(self.update_mat * self.covariance)).transpose();
        let innovation = measurement.pos - projected_mean;
        self.x += kalman_gain * innovation;
        if self.motion_model == MotionModel::ConstantPosition {
            self.x.fixed_rows_mut::<3>(3).fill(0.0);
        }

        let i_minus_kh = StateCov::identity() - kalman_gain * self.update_mat;
        let covariance = i_minus_kh * self.covariance;
        self.covariance = (covariance + covariance.transpose()) * 0.5;
        Ok(())
    }

    // Scale row/column i by sqrt(max_cov / P_ii) for every oversized P_ii.
    fn clamp_covariance(&mut self, max_cov: f64) {
        let scale = SVector::<f64, 6>::from_fn(|i, _| {
            let var = self.covariance[(i, i)];
            if var > max_cov {
                (max_cov / var).sqrt()
            } else {
                1.0
            }
        });
        for r in 0..6 {
            for c in 0..6 {
                self.covariance[(r, c)] *= scale[r] * scale[c];
            }
        }
        for i in 0..6 {
            if scale[i] < 1.0 {
                self.covariance[(i, i)] = max_cov;
            }
        }
    }

    pub fn state(&self) -> &StateMean {
        &self.x
    }

    pub fn covariance(&self) -> &StateCov {
        &self.covariance
    }

    pub fn position(&self) -> Position {
        self.x.fixed_rows::<3>(0).into_owned()
    }

    pub fn position_covariance(&self) -> PositionCov {
        self.covariance.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn velocity(&self) -> Position {
        self.x.fixed_rows::<3>(3).into_owned()
    }

    pub fn set_velocity(&mut self, velocity: &Position) {
        if self.motion_model == MotionModel::ConstantVelocity {
            self.x.fixed_rows_mut::<3>(3).copy_from(velocity);
        }
    }

    pub fn motion_model(&self) -> MotionModel {
        self.motion_model
    }

    #[cfg(test)]
    pub(crate) fn covariance_mut(&mut self) -> &mut StateCov {
        &mut self.covariance
    }
}
