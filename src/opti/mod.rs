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

use snafu::prelude::*;
use std::fmt;

use crate::propagators::PropagationError;

mod shooting;
pub use shooting::*;
mod assembler;
pub use assembler::*;
mod qp;
pub use qp::*;
mod sqp;
pub use sqp::*;
mod solution;
pub use solution::*;

/// Optimization errors. Note that hitting the iteration budget is *not* an
/// error: it is reported as [SolverStatus::MaxIterationsReached] on the
/// solution itself.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OptimError {
    /// The linearized subproblem has no feasible point.
    #[snafu(display("linearized subproblem infeasible ({details})"))]
    InfeasibleStep { details: String },
    /// The KKT system of the subproblem is singular.
    #[snafu(display("singular KKT system with {active} active constraints"))]
    SingularKkt { active: usize },
    /// A stage propagation failed while evaluating the iterate.
    #[snafu(display("stage {stage} propagation failed: {source}"))]
    StagePropagation {
        stage: usize,
        source: PropagationError,
    },
}

/// Terminal status of a solve.
#[derive(Clone, Debug, PartialEq)]
pub enum SolverStatus {
    /// Step norm and constraint violation both below tolerance.
    Converged,
    /// Iteration budget exhausted: a soft stop, the best iterate is reported
    /// along with its feasibility and optimality residuals.
    MaxIterationsReached,
    /// No usable trajectory; the reason is diagnostic, not machine-readable.
    Failed { reason: String },
}

impl SolverStatus {
    /// Whether the trajectory attached to this status is dynamically
    /// consistent enough to be consumed (callers should still inspect the
    /// feasibility residual).
    pub fn is_usable(&self) -> bool {
        !matches!(self, SolverStatus::Failed { .. })
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverStatus::Converged => write!(f, "Converged"),
            SolverStatus::MaxIterationsReached => write!(f, "MaxIterationsReached"),
            SolverStatus::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}
