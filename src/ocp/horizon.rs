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

use super::ProblemError;
use serde_derive::{Deserialize, Serialize};

use std::fmt;

/// Immutable descriptor of the optimization horizon: `[t0, tf]` split into
/// `intervals` shooting intervals of equal duration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Horizon {
    t0: f64,
    tf: f64,
    intervals: usize,
}

impl Horizon {
    /// Builds a horizon, rejecting non-positive durations and empty grids.
    pub fn new(t0: f64, tf: f64, intervals: usize) -> Result<Self, ProblemError> {
        if intervals == 0 || !(tf - t0).is_finite() || tf <= t0 {
            return Err(ProblemError::InvalidHorizon { t0, tf, intervals });
        }
        Ok(Self { t0, tf, intervals })
    }

    pub fn start(&self) -> f64 {
        self.t0
    }

    pub fn end(&self) -> f64 {
        self.tf
    }

    pub fn duration(&self) -> f64 {
        self.tf - self.t0
    }

    /// Number of shooting intervals N.
    pub fn intervals(&self) -> usize {
        self.intervals
    }

    /// Duration of one shooting interval.
    pub fn dt(&self) -> f64 {
        self.duration() / self.intervals as f64
    }

    /// Epoch of grid node `i` for `i` in `0..=N`.
    pub fn node(&self, i: usize) -> f64 {
        self.t0 + i as f64 * self.dt()
    }

    /// The N+1 grid node epochs.
    pub fn nodes(&self) -> Vec<f64> {
        (0..=self.intervals).map(|i| self.node(i)).collect()
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Horizon [{} s, {} s] with {} intervals of {:.3} s",
            self.t0,
            self.tf,
            self.intervals,
            self.dt()
        )
    }
}
