//! Association of predicted hypotheses with a measurement batch.
//!
//! Costs are squared Mahalanobis distances under the combined covariance of
//! the prediction and the measurement. Pairs outside the gate are replaced by
//! a large finite cost before solving, and dropped again after solving.
//! When a measurement is about as close to an older unmatched hypothesis as
//! to the one it was solved to, the older hypothesis takes it.

use crate::error::TrackError;
use crate::hungarian::hungarian;
use crate::measurement::{Measurement, Position, PositionCov};
use crate::params::FORBIDDEN_COST;
use nalgebra::DMatrix;

/// Squared Mahalanobis distance between a predicted position and a measurement.
///
/// Returns `None` when the combined covariance is not positive definite.
pub fn mahalanobis_squared(
    mean: &Position,
    covariance: &PositionCov,
    measurement: &Measurement,
) -> Option<f64> {
    let combined = covariance + measurement.cov;
    let innovation = measurement.pos - mean;
    let chol = combined.cholesky()?;
    let d2 = innovation.dot(&chol.solve(&innovation));
    d2.is_finite().then_some(d2)
}

/// Compute squared Mahalanobis distances between all predictions and measurements.
///
/// # Returns
/// A matrix of shape (num_predictions, num_measurements). Pairs whose
/// combined covariance is degenerate are set to `FORBIDDEN_COST`.
pub fn mahalanobis_batch(
    predictions: &[(Position, PositionCov)],
    measurements: &[Measurement],
) -> DMatrix<f64> {
    // H: num_hyps, M: num_meas
    let num_hyps = predictions.len();
    let num_meas = measurements.len();

    DMatrix::from_fn(num_hyps, num_meas, |i, j| {
        let (mean, cov) = &predictions[i];
        mahalanobis_squared(mean, cov, &measurements[j]).unwrap_or(FORBIDDEN_COST)
    })
}

/// Result of gated assignment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// Matched pairs as (hypothesis_index, measurement_index)
    pub matches: Vec<(usize, usize)>,
    /// Indices of unmatched hypotheses, ascending
    pub unmatched_hypotheses: Vec<usize>,
    /// Indices of unmatched measurements, ascending
    pub unmatched_measurements: Vec<usize>,
}

/// Solve the gated assignment for a precomputed cost matrix.
///
/// `cost` holds squared Mahalanobis distances; `gate` is the maximum
/// (non-squared) distance a matched pair may have.
pub fn gated_assignment(cost: &DMatrix<f64>, gate: f64) -> Result<AssignmentResult, TrackError> {
    let num_hyps = cost.nrows();
    let num_meas = cost.ncols();

    if num_hyps == 0 || num_meas == 0 {
        return Ok(AssignmentResult {
            matches: vec![],
            unmatched_hypotheses: (0..num_hyps).collect(),
            unmatched_measurements: (0..num_meas).collect(),
        });
    }

    let gate_squared = gate * gate;
    let admissible = |c: f64| c.is_finite() && c <= gate_squared;

    // square, padded with the forbidden cost
    let n = num_hyps.max(num_meas);
    let mut cost_vec: Vec<Vec<f64>> = vec![vec![FORBIDDEN_COST; n]; n];
    for i in 0..num_hyps {
        for j in 0..num_meas {
            if admissible(cost[(i, j)]) {
                cost_vec[i][j] = cost[(i, j)];
            }
        }
    }

    let mut x = vec![-1isize; n];
    let mut y = vec![-1isize; n];
    hungarian(&cost_vec, &mut x, &mut y)?;

    let mut matches = Vec::new();
    let mut hyp_matched = vec![false; num_hyps];
    let mut meas_matched = vec![false; num_meas];
    for (i, &j) in x.iter().enumerate().take(num_hyps) {
        if j < 0 {
            return Err(TrackError::AssignmentError(format!(
                "row {} left unassigned",
                i
            )));
        }
        let j = j as usize;
        // dummy columns and pairs outside the gate stay unmatched
        if j < num_meas && admissible(cost[(i, j)]) {
            matches.push((i, j));
            hyp_matched[i] = true;
            meas_matched[j] = true;
        }
    }

    Ok(AssignmentResult {
        matches,
        unmatched_hypotheses: (0..num_hyps).filter(|&i| !hyp_matched[i]).collect(),
        unmatched_measurements: (0..num_meas).filter(|&j| !meas_matched[j]).collect(),
    })
}

/// Hand a matched measurement to an older unmatched hypothesis when the two
/// candidates are within `ambiguous_dist` of each other in Euclidean distance
/// to the measurement.
///
/// Predictions are in ascending id order, so a lower index is an older
/// hypothesis. The older candidate must pass the gate itself.
pub fn prefer_older_on_ambiguity(
    result: &mut AssignmentResult,
    cost: &DMatrix<f64>,
    predictions: &[(Position, PositionCov)],
    measurements: &[Measurement],
    gate: f64,
    ambiguous_dist: f64,
) {
    let gate_squared = gate * gate;
    let mut swapped = false;

    for k in 0..result.matches.len() {
        let (i, j) = result.matches[k];
        let pos = &measurements[j].pos;
        let dist = (pos - predictions[i].0).norm();
        // unmatched_hypotheses is ascending: the first hit is the oldest
        let older = result.unmatched_hypotheses.iter().position(|&h| {
            h < i
                && cost[(h, j)].is_finite()
                && cost[(h, j)] <= gate_squared
                && ((pos - predictions[h].0).norm() - dist).abs() < ambiguous_dist
        });
        if let Some(slot) = older {
            let h = result.unmatched_hypotheses[slot];
            result.unmatched_hypotheses[slot] = i;
            result.matches[k] = (h, j);
            swapped = true;
        }
    }

    if swapped {
        result.matches.sort_unstable();
        result.unmatched_hypotheses.sort_unstable();
    }
}

/// Associate predicted hypotheses with one measurement batch.
///
/// # Arguments
/// * `predictions` - Projected (mean, position covariance) of every hypothesis, ascending id
/// * `measurements` - Validated measurements of one batch
/// * `gate` - Maximum Mahalanobis distance of an accepted pair
/// * `ambiguous_dist` - Distance difference under which the older hypothesis wins
///
/// # Returns
/// Matches plus unmatched indices; every hypothesis and every measurement
/// appears in exactly one of them.
pub fn associate(
    predictions: &[(Position, PositionCov)],
    measurements: &[Measurement],
    gate: f64,
    ambiguous_dist: f64,
) -> Result<AssignmentResult, TrackError> {
    let cost = mahalanobis_batch(predictions, measurements);
    let mut result = gated_assignment(&cost, gate)?;
    prefer_older_on_ambiguity(&mut result, &cost, predictions, measurements, gate, ambiguous_dist);
    Ok(result)
}
