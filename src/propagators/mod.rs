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

// Re-Export
mod rk_methods;
pub use rk_methods::*;
mod propagator;
pub use propagator::*;

use crate::dynamics::DynamicsError;

/// Stores the details of the previous stage propagation. Access as `sens.details`.
#[derive(Copy, Clone, Debug)]
pub struct IntegrationDetails {
    /// Micro-step size used, in seconds.
    pub step: f64,
    /// Number of equations-of-motion evaluations.
    pub evals: usize,
}

impl fmt::Display for IntegrationDetails {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "IntegrationDetails {{step: {:.6} s, evals: {}}}",
            self.step, self.evals
        )
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PropagationError {
    #[snafu(display("encountered a dynamics error {source}"))]
    Dynamics { source: DynamicsError },
    #[snafu(display("stage of duration {dt} s cannot be split into {substeps} micro-steps"))]
    InvalidSubsteps { dt: f64, substeps: usize },
}
