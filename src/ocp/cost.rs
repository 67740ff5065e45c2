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
use serde_derive::{Deserialize, Serialize};

/// An additively separable cost functional: a Lagrange (running) term
/// integrated over the horizon, optionally plus a Mayer (terminal) term.
///
/// The SQP driver only uses values, gradients and the Gauss--Newton Hessian
/// blocks of the integrand, so the functional must be twice continuously
/// differentiable near the optimum but never needs to expose second
/// derivatives of anything else.
pub trait CostFunction: Send + Sync {
    /// Running cost integrand value at `(t, x, u)`.
    fn lagrange(&self, t: f64, x: &DVector<f64>, u: &DVector<f64>) -> f64;

    /// Gradient of the integrand: `(∂l/∂x, ∂l/∂u)`.
    fn lagrange_gradient(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>);

    /// Gauss--Newton Hessian blocks of the integrand: `(∂²l/∂x², ∂²l/∂u²)`.
    fn lagrange_hessian(
        &self,
        t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>);

    /// Terminal cost on the final state, zero unless overridden.
    fn mayer(&self, _xf: &DVector<f64>) -> f64 {
        0.0
    }

    /// Gradient of the terminal cost.
    fn mayer_gradient(&self, xf: &DVector<f64>) -> DVector<f64> {
        DVector::zeros(xf.len())
    }

    /// Gauss--Newton Hessian of the terminal cost.
    fn mayer_hessian(&self, xf: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(xf.len(), xf.len())
    }
}

/// Diagonally weighted quadratic cost, the common case for motion primitives:
/// `l(t, x, u) = Σ q_i·x_i² + Σ r_j·u_j²`, plus an optional diagonal terminal
/// term `Σ p_i·x_i²`.
///
/// For instance `∫ (10·r² + a²) dt` for the ship model is
/// `QuadraticCost::lagrange_only(&[0., 0., 0., 10., 0.], &[0., 1.])`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuadraticCost {
    pub state_weights: DVector<f64>,
    pub control_weights: DVector<f64>,
    pub terminal_weights: Option<DVector<f64>>,
}

impl QuadraticCost {
    pub fn lagrange_only(state_weights: &[f64], control_weights: &[f64]) -> Self {
        Self {
            state_weights: DVector::from_column_slice(state_weights),
            control_weights: DVector::from_column_slice(control_weights),
            terminal_weights: None,
        }
    }

    pub fn with_terminal(mut self, terminal_weights: &[f64]) -> Self {
        self.terminal_weights = Some(DVector::from_column_slice(terminal_weights));
        self
    }
}

impl CostFunction for QuadraticCost {
    fn lagrange(&self, _t: f64, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        let sx: f64 = x
            .iter()
            .zip(self.state_weights.iter())
            .map(|(xi, qi)| qi * xi * xi)
            .sum();
        let su: f64 = u
            .iter()
            .zip(self.control_weights.iter())
            .map(|(ui, ri)| ri * ui * ui)
            .sum();
        sx + su
    }

    fn lagrange_gradient(
        &self,
        _t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> (DVector<f64>, DVector<f64>) {
        let gx = DVector::from_iterator(
            x.len(),
            x.iter()
                .zip(self.state_weights.iter())
                .map(|(xi, qi)| 2.0 * qi * xi),
        );
        let gu = DVector::from_iterator(
            u.len(),
            u.iter()
                .zip(self.control_weights.iter())
                .map(|(ui, ri)| 2.0 * ri * ui),
        );
        (gx, gu)
    }

    fn lagrange_hessian(
        &self,
        _t: f64,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut hx = DMatrix::zeros(x.len(), x.len());
        for (i, qi) in self.state_weights.iter().enumerate() {
            hx[(i, i)] = 2.0 * qi;
        }
        let mut hu = DMatrix::zeros(u.len(), u.len());
        for (j, rj) in self.control_weights.iter().enumerate() {
            hu[(j, j)] = 2.0 * rj;
        }
        (hx, hu)
    }

    fn mayer(&self, xf: &DVector<f64>) -> f64 {
        match &self.terminal_weights {
            Some(p) => xf
                .iter()
                .zip(p.iter())
                .map(|(xi, pi)| pi * xi * xi)
                .sum(),
            None => 0.0,
        }
    }

    fn mayer_gradient(&self, xf: &DVector<f64>) -> DVector<f64> {
        match &self.terminal_weights {
            Some(p) => DVector::from_iterator(
                xf.len(),
                xf.iter().zip(p.iter()).map(|(xi, pi)| 2.0 * pi * xi),
            ),
            None => DVector::zeros(xf.len()),
        }
    }

    fn mayer_hessian(&self, xf: &DVector<f64>) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(xf.len(), xf.len());
        if let Some(p) = &self.terminal_weights {
            for (i, pi) in p.iter().enumerate() {
                h[(i, i)] = 2.0 * pi;
            }
        }
        h
    }
}
