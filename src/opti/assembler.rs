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

use super::ShootingGrid;
use crate::linalg::{DMatrix, DVector};
use crate::ocp::{Constraint, OcpProblem, VarRef};
use crate::propagators::{ControlParametrization, StageSensitivity};

use std::ops::AddAssign;

/// One sparse row of a linearized constraint: column indices with their
/// coefficients, and the right-hand side for the step `d`.
#[derive(Clone, Debug)]
pub struct SparseRow {
    pub entries: Vec<(usize, f64)>,
    pub rhs: f64,
}

impl SparseRow {
    /// Evaluates `row · d`.
    pub fn dot(&self, d: &DVector<f64>) -> f64 {
        self.entries.iter().map(|(j, a)| a * d[*j]).sum()
    }
}

/// A dense sub-block of the (block diagonal) Hessian, anchored at `offset`.
#[derive(Clone, Debug)]
pub struct HessianBlock {
    pub offset: usize,
    pub block: DMatrix<f64>,
}

/// The quadratic subproblem of one outer iteration:
///
/// ```text
/// min ½·dᵀHd + gᵀd   s.t.   A_eq·d = b_eq,  A_in·d ≥ b_in,  lo ≤ d ≤ up
/// ```
///
/// The constraint Jacobian of the shooting structure is banded, so rows are
/// kept sparse (per-block column offsets) and the Hessian as diagonal blocks:
/// no dense matrix of the full problem is ever materialized here.
#[derive(Clone, Debug)]
pub struct QpSubproblem {
    pub dim: usize,
    pub hessian: Vec<HessianBlock>,
    /// Diagonal added to the Hessian so the KKT systems stay definite even
    /// when the cost only weights a subset of the variables.
    pub regularization: f64,
    pub grad: DVector<f64>,
    pub eq_rows: Vec<SparseRow>,
    /// General linear inequalities, `row · d ≥ rhs`.
    pub ineq_rows: Vec<SparseRow>,
    /// Box bounds on the step.
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

impl QpSubproblem {
    /// Materializes the Hessian (for the QP's KKT factorization only).
    pub fn dense_hessian(&self) -> DMatrix<f64> {
        let mut h = DMatrix::identity(self.dim, self.dim) * self.regularization;
        for hb in &self.hessian {
            let n = hb.block.nrows();
            for r in 0..n {
                for c in 0..n {
                    h[(hb.offset + r, hb.offset + c)] += hb.block[(r, c)];
                }
            }
        }
        h
    }

    /// Objective of the subproblem at a candidate step.
    pub fn objective(&self, d: &DVector<f64>) -> f64 {
        let h = self.dense_hessian();
        0.5 * (d.transpose() * &h * d)[(0, 0)] + self.grad.dot(d)
    }
}

/// Builds the quadratic approximation of the transcribed problem around the
/// current iterate, from the cost functional's own derivatives (Gauss--Newton,
/// no second derivatives of the dynamics) and the stage sensitivity blocks.
pub struct NlpAssembler<'a> {
    pub problem: &'a OcpProblem,
    pub grid: &'a ShootingGrid,
    pub regularization: f64,
}

impl<'a> NlpAssembler<'a> {
    pub fn new(problem: &'a OcpProblem, grid: &'a ShootingGrid, regularization: f64) -> Self {
        Self {
            problem,
            grid,
            regularization,
        }
    }

    /// Discretized cost at the iterate: rectangle-rule sum of the Lagrange
    /// integrand over the stages plus the Mayer term on the final state.
    pub fn cost(&self, z: &DVector<f64>) -> f64 {
        let dt = self.problem.horizon.dt();
        let n = self.grid.layout.intervals;
        let mut f = 0.0;
        for i in 0..n {
            let t = self.problem.horizon.node(i);
            let x = self.grid.state_at(z, i);
            let u = self.grid.control_at(z, i);
            f += dt * self.problem.cost.lagrange(t, &x, &u);
        }
        f + self.problem.cost.mayer(&self.grid.state_at(z, n))
    }

    /// ℓ1 and ℓ∞ norms of the constraint violations at the iterate: matching
    /// defects, boundary pins, and box bounds.
    pub fn violation_norms(&self, z: &DVector<f64>, sens: &[StageSensitivity]) -> (f64, f64) {
        let mut l1 = 0.0;
        let mut linf: f64 = 0.0;

        for v in self.grid.defects(z, sens).iter() {
            l1 += v.abs();
            linf = linf.max(v.abs());
        }

        for cstr in &self.problem.constraints {
            for i in self
                .grid
                .layout
                .attachment_range(cstr.attachment(), cstr.target())
            {
                let idx = self.grid.layout.var_index(i, cstr.target());
                let v = cstr.violation(z[idx]);
                l1 += v;
                linf = linf.max(v);
            }
        }

        (l1, linf)
    }

    /// Builds the QP around `z` given the stage sensitivities evaluated there.
    pub fn assemble(&self, z: &DVector<f64>, sens: &[StageSensitivity]) -> QpSubproblem {
        let layout = self.grid.layout;
        let (nx, nu, n) = (layout.nx, layout.nu, layout.intervals);
        let dim = layout.dim();
        let dt = self.problem.horizon.dt();
        let linear_ctrl = matches!(
            self.grid.propagator().opts.parametrization,
            ControlParametrization::PiecewiseLinear
        );

        // Cost gradient and Gauss--Newton Hessian blocks.
        let mut grad = DVector::zeros(dim);
        let mut hessian = Vec::with_capacity(2 * n + 1);
        for i in 0..n {
            let t = self.problem.horizon.node(i);
            let x = self.grid.state_at(z, i);
            let u = self.grid.control_at(z, i);
            let (gx, gu) = self.problem.cost.lagrange_gradient(t, &x, &u);
            let (hx, hu) = self.problem.cost.lagrange_hessian(t, &x, &u);
            let xoff = layout.state_offset(i);
            let uoff = layout.control_offset(i);
            grad.rows_mut(xoff, nx).add_assign(dt * gx);
            grad.rows_mut(uoff, nu).add_assign(dt * gu);
            hessian.push(HessianBlock {
                offset: xoff,
                block: dt * hx,
            });
            hessian.push(HessianBlock {
                offset: uoff,
                block: dt * hu,
            });
        }
        let xf = self.grid.state_at(z, n);
        let xoff_f = layout.state_offset(n);
        grad.rows_mut(xoff_f, nx)
            .add_assign(self.problem.cost.mayer_gradient(&xf));
        hessian.push(HessianBlock {
            offset: xoff_f,
            block: self.problem.cost.mayer_hessian(&xf),
        });

        // Matching constraints: Φ_i·dx_i + Ψ_i·du − dx_{i+1} = −defect_i,
        // one banded block row per stage.
        let defects = self.grid.defects(z, sens);
        let mut eq_rows = Vec::with_capacity(n * nx + 8);
        for (i, s) in sens.iter().enumerate() {
            let xoff = layout.state_offset(i);
            let uoff = layout.control_offset(i);
            let x1off = layout.state_offset(i + 1);
            let split_ctrl = linear_ctrl && i + 1 < n;
            for r in 0..nx {
                let mut entries = Vec::with_capacity(nx + 2 * nu + 1);
                for j in 0..nx {
                    entries.push((xoff + j, s.stm_x[(r, j)]));
                }
                for j in 0..nu {
                    let a = if split_ctrl {
                        s.stm_u0[(r, j)]
                    } else {
                        s.stm_u0[(r, j)] + s.stm_u1[(r, j)]
                    };
                    entries.push((uoff + j, a));
                }
                if split_ctrl {
                    let u1off = layout.control_offset(i + 1);
                    for j in 0..nu {
                        entries.push((u1off + j, s.stm_u1[(r, j)]));
                    }
                }
                entries.push((x1off + r, -1.0));
                eq_rows.push(SparseRow {
                    entries,
                    rhs: -defects[i * nx + r],
                });
            }
        }

        // Boundary and path pins: single-entry rows.
        for cstr in &self.problem.constraints {
            if let Constraint::Pin { value, .. } = cstr {
                for i in self
                    .grid
                    .layout
                    .attachment_range(cstr.attachment(), cstr.target())
                {
                    let idx = layout.var_index(i, cstr.target());
                    eq_rows.push(SparseRow {
                        entries: vec![(idx, 1.0)],
                        rhs: *value - z[idx],
                    });
                }
            }
        }

        // Box bounds on the step, shifted by the iterate.
        let mut lower = DVector::from_element(dim, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(dim, f64::INFINITY);
        for j in 0..nx {
            self.apply_box(z, VarRef::State(j), &mut lower, &mut upper);
        }
        for j in 0..nu {
            self.apply_box(z, VarRef::Control(j), &mut lower, &mut upper);
        }

        QpSubproblem {
            dim,
            hessian,
            regularization: self.regularization,
            grad,
            eq_rows,
            ineq_rows: Vec::new(),
            lower,
            upper,
        }
    }

    fn apply_box(
        &self,
        z: &DVector<f64>,
        target: VarRef,
        lower: &mut DVector<f64>,
        upper: &mut DVector<f64>,
    ) {
        let (lo, up) = self.problem.box_bound(target);
        if lo.is_none() && up.is_none() {
            return;
        }
        for i in self
            .grid
            .layout
            .attachment_range(crate::ocp::Attachment::Path, target)
        {
            let idx = self.grid.layout.var_index(i, target);
            if let Some(lo) = lo {
                lower[idx] = lower[idx].max(lo - z[idx]);
            }
            if let Some(up) = up {
                upper[idx] = upper[idx].min(up - z[idx]);
            }
        }
    }
}

#[cfg(test)]
mod ut_assembler {
    use super::*;
    use crate::dynamics::ShipSteering;
    use crate::ocp::{Attachment, Constraint, Horizon, OcpProblem, QuadraticCost};
    use crate::propagators::{PropOpts, Propagator, RK4Fixed};
    use std::sync::Arc;

    #[test]
    fn banded_structure_and_rhs() {
        let dynamics = Arc::new(ShipSteering::default());
        let problem = OcpProblem::new(
            dynamics.clone(),
            Horizon::new(0.0, 4.0, 4).unwrap(),
            Arc::new(QuadraticCost::lagrange_only(
                &[0.0, 0.0, 0.0, 10.0, 0.0],
                &[0.0, 1.0],
            )),
            vec![Constraint::pin(Attachment::AtStart, VarRef::State(0), 0.0)],
        )
        .unwrap();
        let prop = Propagator::new::<RK4Fixed>(dynamics, PropOpts::default());
        let grid = ShootingGrid::new(&problem, prop);
        let assembler = NlpAssembler::new(&problem, &grid, 1e-6);

        let z = grid.initial_guess(&problem);
        let sens = grid.eval_stages(&z).unwrap();
        let qp = assembler.assemble(&z, &sens);

        // 4 stages of 5 matching rows plus one pin.
        assert_eq!(qp.eq_rows.len(), 21);
        // Each matching row only touches its own stage band: x_i, u_i, x_{i+1}.
        let row = &qp.eq_rows[0];
        let band_end = grid.layout.state_offset(1) + grid.layout.nx;
        assert!(row.entries.iter().all(|(j, _)| *j < band_end));
        // The linearization of the dynamics defect is exact in rhs: it equals
        // the negative defect at the iterate.
        let defects = grid.defects(&z, &sens);
        assert!((row.rhs + defects[0]).abs() < 1e-12);
    }
}
