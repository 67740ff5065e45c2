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

use super::{ensure_finite, Dynamics, DynamicsError};
use crate::linalg::{DMatrix, DVector};
use serde_derive::{Deserialize, Serialize};

use std::fmt;

/// Planar ship steering model.
///
/// State (5): `[x, y, psi, r, w]` -- north/east position, yaw angle, yaw rate,
/// and surge speed. Control (2): `[delta, a]` -- rudder deflection and
/// longitudinal acceleration. Equations of motion (model (4.6) of
/// "Optimization-based Solutions to Constrained Trajectory-tracking and
/// Path-following Problems"):
///
/// ```text
/// ẋ   = w·cos(ψ) − L·w·r·sin(ψ)
/// ẏ   = w·sin(ψ) + L·w·r·cos(ψ)
/// ψ̇   = r
/// ṙ   = (−r + K·δ) / τ
/// ẇ   = a
/// ```
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShipSteering {
    /// Lever arm between the pivot point and the reference point, in meters.
    pub lever_arm: f64,
    /// Rudder-to-yaw-rate control gain.
    pub control_gain: f64,
    /// Yaw rate time constant, in seconds.
    pub time_constant: f64,
}

impl ShipSteering {
    /// Index of the north position in the state vector.
    pub const X: usize = 0;
    /// Index of the east position in the state vector.
    pub const Y: usize = 1;
    /// Index of the yaw angle in the state vector.
    pub const YAW: usize = 2;
    /// Index of the yaw rate in the state vector.
    pub const YAW_RATE: usize = 3;
    /// Index of the surge speed in the state vector.
    pub const SPEED: usize = 4;
    /// Index of the rudder deflection in the control vector.
    pub const RUDDER: usize = 0;
    /// Index of the longitudinal acceleration in the control vector.
    pub const ACCEL: usize = 1;

    pub fn new(lever_arm: f64, control_gain: f64, time_constant: f64) -> Self {
        Self {
            lever_arm,
            control_gain,
            time_constant,
        }
    }
}

impl Default for ShipSteering {
    /// Unit lever arm, gain and time constant, as in the reference model.
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

impl Dynamics for ShipSteering {
    fn state_dim(&self) -> usize {
        5
    }

    fn control_dim(&self) -> usize {
        2
    }

    fn eom(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, DynamicsError> {
        let (psi, r, w) = (x[Self::YAW], x[Self::YAW_RATE], x[Self::SPEED]);
        let (delta, accel) = (u[Self::RUDDER], u[Self::ACCEL]);
        let (l, k, tau) = (self.lever_arm, self.control_gain, self.time_constant);

        let dxdt = DVector::from_column_slice(&[
            w * psi.cos() - l * w * r * psi.sin(),
            w * psi.sin() + l * w * r * psi.cos(),
            r,
            (-r + k * delta) / tau,
            accel,
        ]);

        ensure_finite(t, dxdt)
    }

    fn jacobians(
        &self,
        _t: f64,
        x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), DynamicsError> {
        let (psi, r, w) = (x[Self::YAW], x[Self::YAW_RATE], x[Self::SPEED]);
        let (l, k, tau) = (self.lever_arm, self.control_gain, self.time_constant);
        let (sp, cp) = psi.sin_cos();

        let mut fx = DMatrix::zeros(5, 5);
        fx[(Self::X, Self::YAW)] = -w * sp - l * w * r * cp;
        fx[(Self::X, Self::YAW_RATE)] = -l * w * sp;
        fx[(Self::X, Self::SPEED)] = cp - l * r * sp;
        fx[(Self::Y, Self::YAW)] = w * cp - l * w * r * sp;
        fx[(Self::Y, Self::YAW_RATE)] = l * w * cp;
        fx[(Self::Y, Self::SPEED)] = sp + l * r * cp;
        fx[(Self::YAW, Self::YAW_RATE)] = 1.0;
        fx[(Self::YAW_RATE, Self::YAW_RATE)] = -1.0 / tau;

        let mut fu = DMatrix::zeros(5, 2);
        fu[(Self::YAW_RATE, Self::RUDDER)] = k / tau;
        fu[(Self::SPEED, Self::ACCEL)] = 1.0;

        Ok((fx, fu))
    }
}

impl fmt::Display for ShipSteering {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ShipSteering {{ L: {}, K: {}, tau: {} s }}",
            self.lever_arm, self.control_gain, self.time_constant
        )
    }
}
