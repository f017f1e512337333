use crate::error::TrackError::{self, AssignmentError};

/* -----------------------------------------------------------------------------
 * hungarian.rs - Kuhn-Munkres minimum cost assignment, O(n^3)
 *
 * Shortest augmenting path formulation with row/column potentials. Rows and
 * columns are 1-indexed internally; index 0 is the virtual source column.
 * ----------------------------------------------------------------------------- */

struct Potentials {
    u: Vec<f64>,
    v: Vec<f64>,
    // p[j]: row currently assigned to column j (0 = none)
    p: Vec<usize>,
    // way[j]: previous column on the augmenting path to j
    way: Vec<usize>,
}

impl Potentials {
    fn new(n: usize) -> Self {
        Self {
            u: vec![0.0; n + 1],
            v: vec![0.0; n + 1],
            p: vec![0; n + 1],
            way: vec![0; n + 1],
        }
    }
}

fn validate_input(
    cost: &[Vec<f64>],
    x: &[isize],
    y: &[isize],
) -> Result<usize, TrackError> {
    let n = cost.len();
    if n == 0 {
        return Err(AssignmentError(
            "cost matrix must have at least one row".to_string(),
        ));
    }
    if let Some((i, row)) = cost.iter().enumerate().find(|(_, r)| r.len() != n) {
        return Err(AssignmentError(format!(
            "cost matrix must be square, but row {} has {} columns (expected {})",
            i,
            row.len(),
            n
        )));
    }
    if n != x.len() || n != y.len() {
        return Err(AssignmentError(format!(
            "cost.len() must be equal to x.len() and y.len(), but cost.len() = {}, x.len() = {}, y.len() = {}",
            n,
            x.len(),
            y.len()
        )));
    }
    if cost.iter().flatten().any(|c| !c.is_finite()) {
        return Err(AssignmentError(
            "cost matrix must only contain finite values".to_string(),
        ));
    }
    Ok(n)
}

// Grow the matching by one row along a shortest augmenting path.
fn augment_row(
    n: usize,
    cost: &[Vec<f64>],
    row: usize,
    pot: &mut Potentials,
) -> Result<(), TrackError> {
    let mut minv = vec![f64::INFINITY; n + 1];
    let mut used = vec![false; n + 1];
    pot.p[0] = row;
    let mut j0 = 0;

    loop {
        used[j0] = true;
        let i0 = pot.p[j0];
        let mut delta = f64::INFINITY;
        let mut j1 = 0;

        for j in 1..=n {
            if used[j] {
                continue;
            }
            let cur = cost[i0 - 1][j - 1] - pot.u[i0] - pot.v[j];
            if cur < minv[j] {
                minv[j] = cur;
                pot.way[j] = j0;
            }
            if minv[j] < delta {
                delta = minv[j];
                j1 = j;
            }
        }

        if j1 == 0 {
            return Err(AssignmentError(format!(
                "no augmenting path found for row {}",
                row - 1
            )));
        }

        for j in 0..=n {
            if used[j] {
                pot.u[pot.p[j]] += delta;
                pot.v[j] -= delta;
            } else {
                minv[j] -= delta;
            }
        }

        j0 = j1;
        if pot.p[j0] == 0 {
            break;
        }
    }

    // flip the path back to the source column
    loop {
        let j1 = pot.way[j0];
        pot.p[j0] = pot.p[j1];
        j0 = j1;
        if j0 == 0 {
            break;
        }
    }
    Ok(())
}

/// Solve the square linear assignment problem, minimizing total cost.
///
/// On success `x[i]` holds the column assigned to row `i`, `y[j]` the row
/// assigned to column `j`, and the total cost is returned.
pub(crate) fn hungarian(
    cost: &[Vec<f64>],
    x: &mut [isize],
    y: &mut [isize],
) -> Result<f64, TrackError> {
    let n = validate_input(cost, x, y)?;
    let mut pot = Potentials::new(n);

    for row in 1..=n {
        augment_row(n, cost, row, &mut pot)?;
    }

    x.fill(-1);
    y.fill(-1);
    for j in 1..=n {
        let i = pot.p[j];
        if i == 0 {
            return Err(AssignmentError(format!(
                "column {} left unassigned by a complete matching",
                j - 1
            )));
        }
        x[i - 1] = (j - 1) as isize;
        y[j - 1] = (i - 1) as isize;
    }

    let total = x
        .iter()
        .enumerate()
        .map(|(i, &j)| cost[i][j as usize])
        .sum();
    Ok(total)
}
