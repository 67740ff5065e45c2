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

use super::OptimError;
use crate::linalg::DVector;
use crate::ocp::{Attachment, OcpProblem, VarRef};
use crate::propagators::{ControlParametrization, Propagator, StageSensitivity};
use rayon::prelude::*;

/// Index map of the multiple-shooting decision vector
/// `z = [x_0, u_0, x_1, u_1, ..., u_{N-1}, x_N]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    pub nx: usize,
    pub nu: usize,
    /// Number of shooting intervals N.
    pub intervals: usize,
}

impl GridLayout {
    /// Total decision-vector dimension `(N+1)·nx + N·nu`.
    pub fn dim(&self) -> usize {
        (self.intervals + 1) * self.nx + self.intervals * self.nu
    }

    /// Offset of the state at grid node `i`, for `i` in `0..=N`.
    pub fn state_offset(&self, i: usize) -> usize {
        i * (self.nx + self.nu)
    }

    /// Offset of the control of interval `i`, for `i` in `0..N`.
    pub fn control_offset(&self, i: usize) -> usize {
        i * (self.nx + self.nu) + self.nx
    }

    /// Flat index of a variable reference at node (state) or interval (control) `i`.
    pub fn var_index(&self, i: usize, target: VarRef) -> usize {
        match target {
            VarRef::State(j) => self.state_offset(i) + j,
            VarRef::Control(j) => self.control_offset(i) + j,
        }
    }

    /// Grid indices a constraint attachment expands to, for its target kind.
    pub fn attachment_range(&self, at: Attachment, target: VarRef) -> Vec<usize> {
        let last_ctrl = self.intervals - 1;
        match (at, target) {
            (Attachment::AtStart, _) => vec![0],
            (Attachment::AtEnd, VarRef::State(_)) => vec![self.intervals],
            (Attachment::AtEnd, VarRef::Control(_)) => vec![last_ctrl],
            (Attachment::Path, VarRef::State(_)) => (0..=self.intervals).collect(),
            (Attachment::Path, VarRef::Control(_)) => (0..self.intervals).collect(),
        }
    }
}

/// One shooting interval descriptor.
#[derive(Clone, Copy, Debug)]
pub struct Stage {
    pub index: usize,
    pub t0: f64,
    pub dt: f64,
}

/// The shooting discretizer: N stages over the horizon, each owning its local
/// start state and interval control inside the shared decision vector, and the
/// matching (continuity) defects tying adjacent stages together.
pub struct ShootingGrid {
    pub layout: GridLayout,
    pub stages: Vec<Stage>,
    prop: Propagator,
}

impl ShootingGrid {
    pub fn new(problem: &OcpProblem, prop: Propagator) -> Self {
        let layout = GridLayout {
            nx: problem.state_dim(),
            nu: problem.control_dim(),
            intervals: problem.horizon.intervals(),
        };
        let dt = problem.horizon.dt();
        let stages = (0..layout.intervals)
            .map(|index| Stage {
                index,
                t0: problem.horizon.node(index),
                dt,
            })
            .collect();
        Self {
            layout,
            stages,
            prop,
        }
    }

    pub fn propagator(&self) -> &Propagator {
        &self.prop
    }

    /// The state at node `i` of the iterate, as a view copy.
    pub fn state_at(&self, z: &DVector<f64>, i: usize) -> DVector<f64> {
        z.rows(self.layout.state_offset(i), self.layout.nx).into_owned()
    }

    /// The control of interval `i` of the iterate.
    pub fn control_at(&self, z: &DVector<f64>, i: usize) -> DVector<f64> {
        z.rows(self.layout.control_offset(i), self.layout.nu).into_owned()
    }

    /// The two control endpoints seen by stage `i`: for piecewise-constant
    /// parametrization both are the interval control; for piecewise-linear,
    /// the second is the next interval's control (held on the last interval).
    pub fn stage_controls(&self, z: &DVector<f64>, i: usize) -> (DVector<f64>, DVector<f64>) {
        let u0 = self.control_at(z, i);
        let u1 = match self.prop.opts.parametrization {
            ControlParametrization::PiecewiseConstant => u0.clone(),
            ControlParametrization::PiecewiseLinear => {
                if i + 1 < self.layout.intervals {
                    self.control_at(z, i + 1)
                } else {
                    u0.clone()
                }
            }
        };
        (u0, u1)
    }

    /// Evaluates every stage at the current iterate, producing the end states
    /// and sensitivity blocks. Stages are independent given the iterate, so
    /// they are mapped in parallel and joined here before assembly.
    pub fn eval_stages(&self, z: &DVector<f64>) -> Result<Vec<StageSensitivity>, OptimError> {
        self.stages
            .par_iter()
            .map(|stage| {
                let x0 = self.state_at(z, stage.index);
                let (u0, u1) = self.stage_controls(z, stage.index);
                self.prop
                    .propagate_stage(stage.t0, stage.dt, &x0, &u0, &u1)
                    .map_err(|source| OptimError::StagePropagation {
                        stage: stage.index,
                        source,
                    })
            })
            .collect()
    }

    /// Matching defects `F_i(x_i, u_i) − x_{i+1}`, stacked per stage (length N·nx).
    pub fn defects(&self, z: &DVector<f64>, sens: &[StageSensitivity]) -> DVector<f64> {
        let nx = self.layout.nx;
        let mut c = DVector::zeros(self.layout.intervals * nx);
        for (i, s) in sens.iter().enumerate() {
            let x_next = self.state_at(z, i + 1);
            c.rows_mut(i * nx, nx).copy_from(&(&s.xf - x_next));
        }
        c
    }

    /// Builds the default initial guess: states linearly interpolated between
    /// their AT_START and AT_END pins (held constant when only one end is
    /// pinned, zero otherwise), controls set to their boundary pins, and
    /// everything clipped into its box bounds.
    pub fn initial_guess(&self, problem: &OcpProblem) -> DVector<f64> {
        let n = self.layout.intervals;
        let mut z = DVector::zeros(self.layout.dim());

        for j in 0..self.layout.nx {
            let target = VarRef::State(j);
            let v0 = problem.pin_value(Attachment::AtStart, target);
            let v1 = problem.pin_value(Attachment::AtEnd, target);
            for i in 0..=n {
                let theta = i as f64 / n as f64;
                let val = match (v0, v1) {
                    (Some(a), Some(b)) => a + theta * (b - a),
                    (Some(a), None) => a,
                    (None, Some(b)) => b,
                    (None, None) => 0.0,
                };
                z[self.layout.var_index(i, target)] = val;
            }
        }

        for j in 0..self.layout.nu {
            let target = VarRef::Control(j);
            if let Some(v) = problem.pin_value(Attachment::AtStart, target) {
                z[self.layout.var_index(0, target)] = v;
            }
            if let Some(v) = problem.pin_value(Attachment::AtEnd, target) {
                z[self.layout.var_index(n - 1, target)] = v;
            }
        }

        self.clip_into_bounds(problem, &mut z);
        z
    }

    /// Clips each variable of the iterate into its merged box bound.
    pub fn clip_into_bounds(&self, problem: &OcpProblem, z: &mut DVector<f64>) {
        for j in 0..self.layout.nx {
            let target = VarRef::State(j);
            let (lo, up) = problem.box_bound(target);
            for i in 0..=self.layout.intervals {
                let idx = self.layout.var_index(i, target);
                z[idx] = clip(z[idx], lo, up);
            }
        }
        for j in 0..self.layout.nu {
            let target = VarRef::Control(j);
            let (lo, up) = problem.box_bound(target);
            for i in 0..self.layout.intervals {
                let idx = self.layout.var_index(i, target);
                z[idx] = clip(z[idx], lo, up);
            }
        }
    }
}

fn clip(v: f64, lo: Option<f64>, up: Option<f64>) -> f64 {
    let v = match lo {
        Some(lo) if v < lo => lo,
        _ => v,
    };
    match up {
        Some(up) if v > up => up,
        _ => v,
    }
}
