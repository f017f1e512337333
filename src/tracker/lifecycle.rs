//! Per-cycle lifecycle steps applied to the hypothesis store.
//!
//! Order within a cycle: corrections, misses, births, classification,
//! pruning, merging.

use tracing::{trace, warn};

use crate::measurement::{Measurement, Position};
use crate::params::TrackerParameters;

use super::assoc::AssignmentResult;
use super::hypothesis::{HypothesisFactory, HypothesisId};
use super::store::HypothesisStore;

/* -----------------------------------------------------------------------------
 * Correction
 * ----------------------------------------------------------------------------- */

/// What came out of fusing the matched pairs of one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionOutcome {
    /// Hypotheses that absorbed a measurement
    pub corrected: Vec<HypothesisId>,
    /// Hypotheses to be marked undetected, ascending
    pub missed: Vec<HypothesisId>,
    /// Measurement indices left for birth, ascending
    pub unexplained: Vec<usize>,
    /// Matched pairs dropped because of a singular innovation covariance
    pub skipped: usize,
}

/// Fuse every matched pair.
///
/// `ids[i]` is the hypothesis behind row `i` of the assignment. A pair whose
/// correction fails falls back to a miss plus a birth candidate.
pub fn apply_corrections(
    store: &mut HypothesisStore,
    ids: &[HypothesisId],
    measurements: &[Measurement],
    assignment: &AssignmentResult,
    params: &TrackerParameters,
) -> CorrectionOutcome {
    let mut outcome = CorrectionOutcome {
        missed: assignment
            .unmatched_hypotheses
            .iter()
            .map(|&i| ids[i])
            .collect(),
        unexplained: assignment.unmatched_measurements.clone(),
        ..Default::default()
    };

    for &(i, j) in &assignment.matches {
        let id = ids[i];
        let Some(hypothesis) = store.get_mut(id) else {
            continue;
        };
        match hypothesis.correct(&measurements[j], params) {
            Ok(()) => outcome.corrected.push(id),
            Err(e) => {
                warn!(hypothesis = id, measurement = j, error = %e, "correction skipped");
                outcome.skipped += 1;
                outcome.missed.push(id);
                outcome.unexplained.push(j);
            }
        }
    }

    outcome.missed.sort_unstable();
    outcome.unexplained.sort_unstable();
    outcome
}

pub fn mark_missed(
    store: &mut HypothesisStore,
    missed: &[HypothesisId],
    now: f64,
    params: &TrackerParameters,
) {
    for &id in missed {
        if let Some(hypothesis) = store.get_mut(id) {
            hypothesis.undetected(now, params);
        }
    }
}

/* -----------------------------------------------------------------------------
 * Birth
 * ----------------------------------------------------------------------------- */

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BirthOutcome {
    pub born: Vec<HypothesisId>,
    /// Candidates explained by a blocked position or an existing hypothesis
    pub suppressed: usize,
    /// Candidates refused by the hypothesis ceiling
    pub refused: usize,
}

/// Spawn a hypothesis for every unexplained measurement that is not a ghost.
///
/// Candidates are checked against the hypotheses present before this step,
/// so two candidates of the same batch never block each other.
pub fn spawn_hypotheses(
    store: &mut HypothesisStore,
    factory: &mut HypothesisFactory,
    measurements: &[Measurement],
    candidates: &[usize],
    blocked: &[Position],
    params: &TrackerParameters,
) -> BirthOutcome {
    let existing: Vec<Position> = store.iter().map(|h| h.position()).collect();
    let within = |points: &[Position], p: &Position, radius: f64| {
        points.iter().any(|q| (q - p).norm() < radius)
    };

    let mut outcome = BirthOutcome::default();
    for &j in candidates {
        let measurement = &measurements[j];
        let pos = &measurement.pos;

        if within(blocked, pos, params.radius_around_picked) {
            trace!(measurement = j, "birth suppressed near blocked position");
            outcome.suppressed += 1;
            continue;
        }
        if within(existing.as_slice(), pos, params.merge_close_hypotheses_distance) {
            trace!(measurement = j, "birth suppressed near existing hypothesis");
            outcome.suppressed += 1;
            continue;
        }
        if let Some(max) = params.max_hypotheses {
            if store.len() >= max {
                warn!(measurement = j, max_hypotheses = max, "birth refused, hypothesis ceiling reached");
                outcome.refused += 1;
                continue;
            }
        }

        let hypothesis = factory.create(measurement, params);
        trace!(hypothesis = hypothesis.id(), x = pos.x, y = pos.y, z = pos.z, "hypothesis born");
        outcome.born.push(hypothesis.id());
        store.insert(hypothesis);
    }
    outcome
}

/* -----------------------------------------------------------------------------
 * Classification, pruning, merging
 * ----------------------------------------------------------------------------- */

pub fn classify(store: &mut HypothesisStore, params: &TrackerParameters) {
    store
        .iter_mut()
        .for_each(|hypothesis| hypothesis.verify_static(params));
}

/// Remove spurious hypotheses older than the protection window.
pub fn prune(store: &mut HypothesisStore, now: f64, params: &TrackerParameters) -> Vec<HypothesisId> {
    let pruned = store.retain(|h| !h.should_prune(now, params));
    for id in &pruned {
        trace!(hypothesis = id, "hypothesis pruned");
    }
    pruned
}

/// Collapse hypotheses closer than the merge distance; the lower id survives.
///
/// Returns (survivor, absorbed) pairs.
pub fn merge(store: &mut HypothesisStore, params: &TrackerParameters) -> Vec<(HypothesisId, HypothesisId)> {
    let ids = store.ids();
    let mut merged = Vec::new();

    for (k, &survivor) in ids.iter().enumerate() {
        let Some(anchor) = store.get(survivor).map(|h| h.position()) else {
            continue;
        };
        for &other in &ids[k + 1..] {
            let close = store
                .get(other)
                .is_some_and(|h| (h.position() - anchor).norm() < params.merge_close_hypotheses_distance);
            if close {
                store.remove(other);
                trace!(survivor, absorbed = other, "hypotheses merged");
                merged.push((survivor, other));
            }
        }
    }
    merged
}

/// Remove every hypothesis strictly within `radius` of `position`.
pub fn remove_near(store: &mut HypothesisStore, position: &Position, radius: f64) -> Vec<HypothesisId> {
    let removed = store.retain(|h| (h.position() - position).norm() >= radius);
    for id in &removed {
        trace!(hypothesis = id, "hypothesis removed near blocked position");
    }
    removed
}
