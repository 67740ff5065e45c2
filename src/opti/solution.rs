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

use super::{ShootingGrid, SolverStatus};
use crate::linalg::DVector;
use crate::ocp::OcpProblem;
use crate::propagators::PropagationError;

use std::fmt;

/// The optimized trajectory: state samples at the shooting nodes, one control
/// per interval, and the diagnostics of the solve that produced it.
#[derive(Clone, Debug)]
pub struct OcpSolution {
    /// State samples `(t_i, x_i)` at the N+1 shooting nodes.
    pub states: Vec<(f64, DVector<f64>)>,
    /// Control samples `(t_i, u_i)` over the N intervals.
    pub controls: Vec<(f64, DVector<f64>)>,
    pub status: SolverStatus,
    /// Discretized cost at the final iterate.
    pub cost: f64,
    /// Infinity norm of the constraint violations at the final iterate.
    pub feasibility: f64,
    /// Infinity norm of the last accepted step.
    pub optimality: f64,
    /// Outer iterations performed.
    pub iterations: usize,
}

impl OcpSolution {
    /// Splits a decision vector into node/interval samples and attaches the
    /// solve diagnostics.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_iterate(
        problem: &OcpProblem,
        grid: &ShootingGrid,
        z: &DVector<f64>,
        status: SolverStatus,
        cost: f64,
        feasibility: f64,
        optimality: f64,
        iterations: usize,
    ) -> Self {
        let n = grid.layout.intervals;
        let states = (0..=n)
            .map(|i| (problem.horizon.node(i), grid.state_at(z, i)))
            .collect();
        let controls = (0..n)
            .map(|i| (problem.horizon.node(i), grid.control_at(z, i)))
            .collect();
        Self {
            states,
            controls,
            status,
            cost,
            feasibility,
            optimality,
            iterations,
        }
    }

    pub fn initial_state(&self) -> &DVector<f64> {
        &self.states[0].1
    }

    pub fn final_state(&self) -> &DVector<f64> {
        &self.states[self.states.len() - 1].1
    }

    /// Re-integrates the trajectory through the grid's propagator and samples
    /// it `substeps` times per interval, for plotting or export at a finer
    /// resolution than the shooting nodes. The state is reset to the node
    /// value at each interval start, so the samples honor the multiple
    /// shooting structure rather than accumulating drift.
    pub fn resample(
        &self,
        grid: &ShootingGrid,
        substeps: usize,
    ) -> Result<Vec<(f64, DVector<f64>)>, PropagationError> {
        let mut samples = Vec::with_capacity(self.controls.len() * substeps + 1);
        samples.push(self.states[0].clone());
        for (i, stage) in grid.stages.iter().enumerate() {
            let (_, x0) = &self.states[i];
            let u0 = &self.controls[i].1;
            // Under a piecewise-linear parametrization the interval ramps
            // toward the next interval's control.
            let u1 = self.controls.get(i + 1).map_or(u0, |(_, u)| u);
            let dense = grid
                .propagator()
                .propagate_dense(stage.t0, stage.dt, x0, u0, u1, substeps)?;
            // The dense batch repeats the interval start, skip it.
            samples.extend(dense.into_iter().skip(1));
        }
        Ok(samples)
    }
}

impl fmt::Display for OcpSolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} after {} iteration(s): cost = {:.6e}, feasibility = {:.3e}, last step = {:.3e}",
            self.status, self.iterations, self.cost, self.feasibility, self.optimality
        )
    }
}
