pub mod assoc;
pub mod hypothesis;
pub mod kalman_filter;
pub mod lifecycle;
mod store;
mod tracker;

pub use assoc::{associate, mahalanobis_batch, AssignmentResult};
pub use hypothesis::{Hypothesis, HypothesisFactory, HypothesisId, HypothesisSnapshot};
pub use kalman_filter::{KalmanFilter, MotionModel, StateCov, StateMean};
pub use store::HypothesisStore;
pub use tracker::{CycleSummary, Tracker};
