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

use crate::dynamics::DynamicsError;
use crate::io::ConfigError;
use crate::ocp::ProblemError;
use crate::opti::OptimError;
use crate::propagators::PropagationError;

/// Top level error enum, each module defines its own and they are wrapped here.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PontosError {
    #[snafu(display("problem definition rejected: {source}"), context(false))]
    Problem { source: ProblemError },
    #[snafu(display("dynamics evaluation failed: {source}"), context(false))]
    Dynamics { source: DynamicsError },
    #[snafu(display("propagation failed: {source}"), context(false))]
    Propagation { source: PropagationError },
    #[snafu(display("optimization failed: {source}"), context(false))]
    Optim { source: OptimError },
    #[snafu(display("configuration issue: {source}"), context(false))]
    Config { source: ConfigError },
}
