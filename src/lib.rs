pub mod error;
pub mod measurement;
pub mod params;
pub mod tracker;

mod hungarian;

pub use error::TrackError;
pub use measurement::{Measurement, Position, PositionCov};
pub use params::TrackerParameters;
pub use tracker::{CycleSummary, HypothesisId, HypothesisSnapshot, MotionModel, Tracker};
