use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("invalid tracker parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),
    #[error("innovation covariance is not positive definite (det = {0:e})")]
    SingularInnovation(f64),
    #[error("assignment failed: {0}")]
    AssignmentError(String),
}
