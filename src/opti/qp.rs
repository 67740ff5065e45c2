/*
    Pontos, trajectory optimization for vehicle motion primitives
    Copyright (C) 2024-onwards Pontos Contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use super::{OptimError, QpSubproblem, SparseRow};
use crate::linalg::{DMatrix, DVector};
use serde_derive::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Options for the active-set QP solver.
#[derive(Clone, Copy, Debug, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
pub struct QpOptions {
    /// Bound on the number of working-set changes.
    #[builder(default = 200)]
    pub max_iter: usize,
    /// Feasibility and multiplier-sign tolerance.
    #[builder(default = 1e-9)]
    pub tol: f64,
}

impl Default for QpOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Step and multiplier estimates of one QP solve.
#[derive(Clone, Debug)]
pub struct QpSolution {
    pub step: DVector<f64>,
    /// Multipliers of the equality rows, in row order.
    pub eq_multipliers: DVector<f64>,
    /// Multipliers of the active box bounds, as `(variable, µ ≥ 0)`.
    pub bound_multipliers: Vec<(usize, f64)>,
    /// Multipliers of the general inequality rows (zero when inactive).
    pub ineq_multipliers: Vec<f64>,
    /// Number of working-set changes used.
    pub iterations: usize,
}

impl QpSolution {
    /// Largest multiplier magnitude, used to steer the merit penalty.
    pub fn max_multiplier(&self) -> f64 {
        let eq = self
            .eq_multipliers
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let bd = self
            .bound_multipliers
            .iter()
            .fold(0.0_f64, |acc, (_, v)| acc.max(v.abs()));
        let iq = self
            .ineq_multipliers
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        eq.max(bd).max(iq)
    }
}

/// An inequality member of the working set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkItem {
    /// `d[j] = lower[j]`
    Lower(usize),
    /// `d[j] = upper[j]`
    Upper(usize),
    /// General row `k` held at its bound.
    Ineq(usize),
}

/// Solves the quadratic subproblem with a primal active-set iteration:
/// equality rows are always in the working set, violated inequalities are
/// added one at a time, and active inequalities with wrong-sign multipliers
/// are dropped, each cycle re-solving the bordered KKT system by LU.
///
/// This is appropriate for the small-to-medium problems multiple shooting
/// produces (a few hundred variables); the KKT matrix is formed directly from
/// the sparse rows, the full constraint Jacobian is never materialized.
pub fn solve_qp(qp: &QpSubproblem, opts: &QpOptions) -> Result<QpSolution, OptimError> {
    let n = qp.dim;
    let m_eq = qp.eq_rows.len();
    let h = qp.dense_hessian();
    let mut active: Vec<WorkItem> = Vec::new();

    for iteration in 0..opts.max_iter {
        let m = m_eq + active.len();
        let (d, nu) = match solve_kkt(&h, qp, &active) {
            Some(sol) => sol,
            None => {
                // A singular system with inequalities in the working set means
                // the linearized constraints conflict.
                if active.is_empty() {
                    return Err(OptimError::SingularKkt { active: m });
                } else {
                    return Err(OptimError::InfeasibleStep {
                        details: format!(
                            "inconsistent working set of {} rows at QP iteration {}",
                            m, iteration
                        ),
                    });
                }
            }
        };

        // Most violated inactive inequality, if any.
        let mut worst: Option<(WorkItem, f64)> = None;
        for j in 0..n {
            if qp.lower[j].is_finite() && !active.contains(&WorkItem::Lower(j)) {
                let v = qp.lower[j] - d[j];
                if v > opts.tol && worst.map_or(true, |(_, w)| v > w) {
                    worst = Some((WorkItem::Lower(j), v));
                }
            }
            if qp.upper[j].is_finite() && !active.contains(&WorkItem::Upper(j)) {
                let v = d[j] - qp.upper[j];
                if v > opts.tol && worst.map_or(true, |(_, w)| v > w) {
                    worst = Some((WorkItem::Upper(j), v));
                }
            }
        }
        for (k, row) in qp.ineq_rows.iter().enumerate() {
            if !active.contains(&WorkItem::Ineq(k)) {
                let v = row.rhs - row.dot(&d);
                if v > opts.tol && worst.map_or(true, |(_, w)| v > w) {
                    worst = Some((WorkItem::Ineq(k), v));
                }
            }
        }

        if let Some((item, _)) = worst {
            if m >= n {
                return Err(OptimError::InfeasibleStep {
                    details: "working set saturated with a violated constraint left".to_string(),
                });
            }
            active.push(item);
            continue;
        }

        // Feasible: drop the active inequality with the most negative
        // KKT-normalized multiplier, if any. With the convention
        // H·d + Aᵀν = −g, the normalized multiplier is µ = −ν for ≥-type
        // members (lower bounds, general rows) and µ = +ν for upper bounds.
        let mut drop_idx: Option<(usize, f64)> = None;
        for (pos, item) in active.iter().enumerate() {
            let v = nu[m_eq + pos];
            let mu = match item {
                WorkItem::Lower(_) | WorkItem::Ineq(_) => -v,
                WorkItem::Upper(_) => v,
            };
            if mu < -opts.tol && drop_idx.map_or(true, |(_, worst_mu)| mu < worst_mu) {
                drop_idx = Some((pos, mu));
            }
        }
        if let Some((pos, _)) = drop_idx {
            active.remove(pos);
            continue;
        }

        // Optimal for the current subproblem.
        let eq_multipliers = nu.rows(0, m_eq).into_owned();
        let mut bound_multipliers = Vec::new();
        let mut ineq_multipliers = vec![0.0; qp.ineq_rows.len()];
        for (pos, item) in active.iter().enumerate() {
            let v = nu[m_eq + pos];
            match item {
                WorkItem::Lower(j) => bound_multipliers.push((*j, -v)),
                WorkItem::Upper(j) => bound_multipliers.push((*j, v)),
                WorkItem::Ineq(k) => ineq_multipliers[*k] = -v,
            }
        }
        return Ok(QpSolution {
            step: d,
            eq_multipliers,
            bound_multipliers,
            ineq_multipliers,
            iterations: iteration + 1,
        });
    }

    Err(OptimError::InfeasibleStep {
        details: format!("active set did not settle in {} changes", opts.max_iter),
    })
}

/// Solves the bordered system `[H Aᵀ; A 0]·[d; ν] = [−g; b]` for the current
/// working set: LU first, then a pseudo-inverse rescue for consistent
/// rank-deficient systems. Returns `None` if the system has no solution.
fn solve_kkt(
    h: &DMatrix<f64>,
    qp: &QpSubproblem,
    active: &[WorkItem],
) -> Option<(DVector<f64>, DVector<f64>)> {
    let n = qp.dim;
    let m = qp.eq_rows.len() + active.len();
    let size = n + m;
    let mut kkt = DMatrix::zeros(size, size);
    kkt.view_mut((0, 0), (n, n)).copy_from(h);
    let mut rhs = DVector::zeros(size);
    rhs.rows_mut(0, n).copy_from(&(-&qp.grad));

    let mut fill_row = |k: usize, row: &SparseRow| {
        for (j, a) in &row.entries {
            kkt[(n + k, *j)] = *a;
            kkt[(*j, n + k)] = *a;
        }
        rhs[n + k] = row.rhs;
    };

    for (k, row) in qp.eq_rows.iter().enumerate() {
        fill_row(k, row);
    }
    for (pos, item) in active.iter().enumerate() {
        let k = qp.eq_rows.len() + pos;
        match item {
            WorkItem::Lower(j) => {
                kkt[(n + k, *j)] = 1.0;
                kkt[(*j, n + k)] = 1.0;
                rhs[n + k] = qp.lower[*j];
            }
            WorkItem::Upper(j) => {
                kkt[(n + k, *j)] = 1.0;
                kkt[(*j, n + k)] = 1.0;
                rhs[n + k] = qp.upper[*j];
            }
            WorkItem::Ineq(k_row) => {
                let row = &qp.ineq_rows[*k_row];
                for (j, a) in &row.entries {
                    kkt[(n + k, *j)] = *a;
                    kkt[(*j, n + k)] = *a;
                }
                rhs[n + k] = row.rhs;
            }
        }
    }

    // Redundant rows make the bordered matrix rank deficient while the
    // system still has solutions: with a pinned matching variable, the
    // matching row is exactly the difference of the two pins. Rescue those
    // with the minimum-norm pseudo-inverse solve, and keep it only if it
    // actually satisfies the system.
    let sol = match kkt.clone().lu().solve(&rhs) {
        Some(sol) => sol,
        None => {
            let inv_kkt = kkt.clone().pseudo_inverse(1e-10).ok()?;
            let sol = &inv_kkt * &rhs;
            let residual = (&kkt * &sol - &rhs).amax();
            if residual > 1e-7 * (1.0 + rhs.amax()) {
                return None;
            }
            sol
        }
    };
    Some((sol.rows(0, n).into_owned(), sol.rows(n, m).into_owned()))
}

#[cfg(test)]
mod ut_qp {
    use super::*;

    fn unconstrained(dim: usize, grad: &[f64]) -> QpSubproblem {
        QpSubproblem {
            dim,
            hessian: vec![super::super::HessianBlock {
                offset: 0,
                block: DMatrix::identity(dim, dim),
            }],
            regularization: 0.0,
            grad: DVector::from_column_slice(grad),
            eq_rows: Vec::new(),
            ineq_rows: Vec::new(),
            lower: DVector::from_element(dim, f64::NEG_INFINITY),
            upper: DVector::from_element(dim, f64::INFINITY),
        }
    }

    #[test]
    fn newton_step_without_constraints() {
        let qp = unconstrained(2, &[-1.0, -2.0]);
        let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
        assert!((sol.step[0] - 1.0).abs() < 1e-12);
        assert!((sol.step[1] - 2.0).abs() < 1e-12);
        assert!(sol.bound_multipliers.is_empty());
    }

    #[test]
    fn equality_row_binds() {
        let mut qp = unconstrained(2, &[-1.0, -1.0]);
        qp.eq_rows.push(SparseRow {
            entries: vec![(0, 1.0), (1, 1.0)],
            rhs: 1.0,
        });
        let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
        assert!((sol.step[0] - 0.5).abs() < 1e-12);
        assert!((sol.step[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn active_upper_bound_with_positive_multiplier() {
        let mut qp = unconstrained(2, &[-1.0, -1.0]);
        qp.upper[0] = 0.25;
        let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
        assert!((sol.step[0] - 0.25).abs() < 1e-12);
        assert!((sol.step[1] - 1.0).abs() < 1e-12);
        assert_eq!(sol.bound_multipliers.len(), 1);
        let (j, mu) = sol.bound_multipliers[0];
        assert_eq!(j, 0);
        assert!(mu > 0.0);
    }

    #[test]
    fn redundant_consistent_rows_are_rescued() {
        // Pinning both variables and also tying them with a difference row
        // makes one equality redundant; the step must still come out.
        let mut qp = unconstrained(2, &[0.0, 0.0]);
        qp.eq_rows.push(SparseRow {
            entries: vec![(0, 1.0)],
            rhs: 1.0,
        });
        qp.eq_rows.push(SparseRow {
            entries: vec![(1, 1.0)],
            rhs: 1.0,
        });
        qp.eq_rows.push(SparseRow {
            entries: vec![(0, 1.0), (1, -1.0)],
            rhs: 0.0,
        });
        let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
        assert!((sol.step[0] - 1.0).abs() < 1e-9);
        assert!((sol.step[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn redundant_inconsistent_rows_stay_singular() {
        let mut qp = unconstrained(2, &[0.0, 0.0]);
        qp.eq_rows.push(SparseRow {
            entries: vec![(0, 1.0)],
            rhs: 1.0,
        });
        qp.eq_rows.push(SparseRow {
            entries: vec![(0, 1.0)],
            rhs: 2.0,
        });
        let err = solve_qp(&qp, &QpOptions::default()).unwrap_err();
        assert!(matches!(err, OptimError::SingularKkt { .. }));
    }

    #[test]
    fn optimum_minimizes_the_model_on_the_row() {
        let mut qp = unconstrained(2, &[-1.0, -1.0]);
        qp.eq_rows.push(SparseRow {
            entries: vec![(0, 1.0), (1, 1.0)],
            rhs: 1.0,
        });
        let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
        // Any other point on the row has a strictly larger model value.
        let off_optimum = DVector::from_column_slice(&[0.9, 0.1]);
        assert!(qp.objective(&sol.step) < qp.objective(&off_optimum) - 1e-9);
    }

    #[test]
    fn conflicting_general_rows_are_infeasible() {
        let mut qp = unconstrained(1, &[0.0]);
        // d >= 1 and -d >= 0 cannot hold together.
        qp.ineq_rows.push(SparseRow {
            entries: vec![(0, 1.0)],
            rhs: 1.0,
        });
        qp.ineq_rows.push(SparseRow {
            entries: vec![(0, -1.0)],
            rhs: 0.0,
        });
        let err = solve_qp(&qp, &QpOptions::default()).unwrap_err();
        assert!(matches!(err, OptimError::InfeasibleStep { .. }));
    }

    #[test]
    fn inactive_bound_is_ignored() {
        let mut qp = unconstrained(1, &[-1.0]);
        qp.upper[0] = 10.0;
        qp.lower[0] = -10.0;
        let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
        assert!((sol.step[0] - 1.0).abs() < 1e-12);
        assert!(sol.bound_multipliers.is_empty());
        assert_eq!(sol.iterations, 1);
    }
}
