use crate::error::TrackError;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/* -----------------------------------------------------------------------------
 * Type aliases
 * ----------------------------------------------------------------------------- */
// 3x1
pub type Position = Vector3<f64>;
// 3x3
pub type PositionCov = Matrix3<f64>;

/// Color tag used when the detector does not report one.
pub const UNKNOWN_COLOR: u8 = b'U';

const SYMMETRY_TOLERANCE: f64 = 1e-9;
const PSD_TOLERANCE: f64 = 1e-12;

/* -----------------------------------------------------------------------------
 * Measurement
 * ----------------------------------------------------------------------------- */

/// A single point detection, already transformed into a common frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Position of the detection
    pub pos: Position,
    /// Covariance of the position
    pub cov: PositionCov,
    /// Opaque color/class tag
    pub color: u8,
    /// Frame the position is expressed in
    pub frame: String,
    /// Timestamp in seconds
    pub time: f64,
}

impl Measurement {
    pub fn new(
        pos: Position,
        cov: PositionCov,
        color: u8,
        frame: impl Into<String>,
        time: f64,
    ) -> Self {
        Self {
            pos,
            cov,
            color,
            frame: frame.into(),
            time,
        }
    }

    /// Create a measurement with covariance `std² · I`.
    ///
    /// # Example
    /// ```
    /// use mhtrack_rs::measurement::{Measurement, Position};
    /// let m = Measurement::isotropic(Position::new(1.0, 2.0, 0.0), 0.03, b'r', "world", 0.5);
    /// assert!((m.cov[(0, 0)] - 0.0009).abs() < 1e-12);
    /// ```
    pub fn isotropic(
        pos: Position,
        std: f64,
        color: u8,
        frame: impl Into<String>,
        time: f64,
    ) -> Self {
        Self::new(pos, PositionCov::identity() * (std * std), color, frame, time)
    }

    /// Check that the position, timestamp and covariance are usable.
    ///
    /// The covariance must be finite, symmetric and positive semi-definite.
    pub fn validate(&self) -> Result<(), TrackError> {
        if !self.time.is_finite() {
            return Err(TrackError::InvalidMeasurement(format!(
                "timestamp is not finite ({})",
                self.time
            )));
        }
        if self.pos.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::InvalidMeasurement(format!(
                "position is not finite ({:?})",
                self.pos.as_slice()
            )));
        }
        if self.cov.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::InvalidMeasurement(
                "covariance contains non-finite entries".to_string(),
            ));
        }

        let scale = self.cov.amax().max(1.0);
        let asymmetry = (self.cov - self.cov.transpose()).amax();
        if asymmetry > SYMMETRY_TOLERANCE * scale {
            return Err(TrackError::InvalidMeasurement(format!(
                "covariance is not symmetric (max asymmetry {:e})",
                asymmetry
            )));
        }

        let min_eigenvalue = self.cov.symmetric_eigenvalues().min();
        if min_eigenvalue < -PSD_TOLERANCE * scale {
            return Err(TrackError::InvalidMeasurement(format!(
                "covariance is not positive semi-definite (min eigenvalue {:e})",
                min_eigenvalue
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;

    fn measurement(cov: PositionCov) -> Measurement {
        Measurement::new(Position::new(1.0, 2.0, 3.0), cov, b'r', "world", 0.0)
    }

    #[test]
    fn test_isotropic_covariance() {
        let m = Measurement::isotropic(
            Position::new(0.0, 0.0, 0.0),
            0.03,
            UNKNOWN_COLOR,
            "world",
            1.5,
        );

        for i in 0..3 {
            assert_nearly_eq!(m.cov[(i, i)], 0.0009, 1e-12);
        }
        assert_eq!(m.cov[(0, 1)], 0.0);
        assert_eq!(m.color, b'U');
        assert_eq!(m.frame, "world");
        assert!(m.is_valid());
    }

    #[test]
    fn test_zero_covariance_is_valid() {
        // PSD includes the degenerate zero matrix
        assert!(measurement(PositionCov::zeros()).is_valid());
    }

    #[test]
    fn test_correlated_covariance_is_valid() {
        #[rustfmt::skip]
        let cov = PositionCov::new(
            2.0, 1.0, 0.0,
            1.0, 2.0, 0.0,
            0.0, 0.0, 1.0,
        );
        assert!(measurement(cov).is_valid());
    }

    #[test]
    fn test_nan_covariance_rejected() {
        let mut cov = PositionCov::identity();
        cov[(1, 1)] = f64::NAN;
        let err = measurement(cov).validate().unwrap_err();
        assert!(matches!(err, TrackError::InvalidMeasurement(_)));
    }

    #[test]
    fn test_nan_position_rejected() {
        let mut m = measurement(PositionCov::identity());
        m.pos.x = f64::INFINITY;
        assert!(!m.is_valid());
    }

    #[test]
    fn test_nan_time_rejected() {
        let mut m = measurement(PositionCov::identity());
        m.time = f64::NAN;
        assert!(!m.is_valid());
    }

    #[test]
    fn test_asymmetric_covariance_rejected() {
        let mut cov = PositionCov::identity();
        cov[(0, 1)] = 0.5;
        assert!(!measurement(cov).is_valid());
    }

    #[test]
    fn test_indefinite_covariance_rejected() {
        #[rustfmt::skip]
        let cov = PositionCov::new(
            1.0, 2.0, 0.0,
            2.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        );
        // eigenvalues 3, -1, 1
        assert!(!measurement(cov).is_valid());
    }

    #[test]
    fn test_negative_variance_rejected() {
        let mut cov = PositionCov::identity();
        cov[(2, 2)] = -0.1;
        assert!(!measurement(cov).is_valid());
    }
}
