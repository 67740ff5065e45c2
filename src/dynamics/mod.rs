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

use crate::linalg::{DMatrix, DVector};
use snafu::Snafu;

/// Ship steering dynamics for planar motion primitives.
pub mod ship;
pub use self::ship::*;

/// A trait for models with equations of motion that can be integrated and differentiated.
///
/// The engine treats an implementation as an opaque differentiable callable: it must be
/// deterministic and side-effect-free, so that stage evaluations can run concurrently.
/// Time is expressed in seconds relative to the start of the horizon.
pub trait Dynamics: Send + Sync {
    /// Dimension of the differential state vector.
    fn state_dim(&self) -> usize;

    /// Dimension of the control vector.
    fn control_dim(&self) -> usize;

    /// Defines the equations of motion: returns dx/dt at `(t, x, u)`.
    ///
    /// If the dynamics are undefined at the query point (division singularity,
    /// domain error), this must return a [DynamicsError::NumericFault] rather
    /// than a non-finite vector.
    fn eom(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, DynamicsError>;

    /// Defines the partial derivatives of the equations of motion: returns
    /// `(∂f/∂x, ∂f/∂u)` at `(t, x, u)`, with shapes `nx × nx` and `nx × nu`.
    ///
    /// These Jacobians drive the variational (sensitivity) equations inside the
    /// integrator, which is all the derivative information the transcription
    /// needs: no second derivatives of the dynamics are ever requested.
    fn jacobians(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), DynamicsError>;
}

/// Checks that a derivative vector is finite, turning NaN/inf into a fault at `t`.
pub(crate) fn ensure_finite(t: f64, dxdt: DVector<f64>) -> Result<DVector<f64>, DynamicsError> {
    if dxdt.iter().all(|v| v.is_finite()) {
        Ok(dxdt)
    } else {
        Err(DynamicsError::NumericFault {
            t,
            details: "non-finite derivative".to_string(),
        })
    }
}

/// Dynamical model errors.
#[derive(Clone, Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DynamicsError {
    /// The dynamics are undefined or blew up at a query point.
    #[snafu(display("dynamics undefined at t = {t} s: {details}"))]
    NumericFault { t: f64, details: String },
    /// State or control vector does not match the model's dimensions.
    #[snafu(display("dimension mismatch: expected {expected}, got {got}"))]
    DimensionMismatch { expected: usize, got: usize },
}
