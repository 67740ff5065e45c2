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

use super::{DynamicsSnafu, IntegrationDetails, PropagationError, RK};
use crate::dynamics::Dynamics;
use crate::linalg::{DMatrix, DVector};
use serde_derive::{Deserialize, Serialize};
use snafu::ResultExt;
use typed_builder::TypedBuilder;

use std::sync::Arc;

/// How the control vector varies across one shooting interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlParametrization {
    /// The control is held at its interval value for the whole interval.
    #[default]
    PiecewiseConstant,
    /// The control ramps linearly from this interval's value to the next
    /// interval's value (the last interval is held constant).
    PiecewiseLinear,
}

/// PropOpts stores the integrator options: the number of micro-steps each
/// shooting interval is subdivided into, and the control parametrization.
#[derive(Clone, Copy, Debug, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
pub struct PropOpts {
    /// Number of fixed micro-steps per shooting interval. More micro-steps
    /// tighten the defect of the transcription at linear cost.
    #[builder(default = 10)]
    pub substeps: usize,
    #[builder(default)]
    pub parametrization: ControlParametrization,
}

impl Default for PropOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The transfer block of one stage propagation: the end state and the
/// sensitivities of the end state with respect to the stage inputs.
///
/// For a piecewise-linear control the sensitivity is split between the two
/// interpolation endpoints (`stm_u0`, `stm_u1`); for a piecewise-constant
/// control everything accumulates in `stm_u0` and `stm_u1` is zero.
#[derive(Clone, Debug)]
pub struct StageSensitivity {
    /// State at the end of the interval.
    pub xf: DVector<f64>,
    /// ∂xf/∂x0, the state transition matrix over the interval (nx × nx).
    pub stm_x: DMatrix<f64>,
    /// ∂xf/∂u at the interval start (nx × nu).
    pub stm_u0: DMatrix<f64>,
    /// ∂xf/∂u at the interval end, non-zero only for piecewise-linear control (nx × nu).
    pub stm_u1: DMatrix<f64>,
    pub details: IntegrationDetails,
}

/// A Propagator advances a set of dynamics over one shooting interval with a
/// fixed-step explicit Runge Kutta scheme, propagating the first-order
/// variational equations alongside the state:
///
/// ```text
/// Φ̇ = J(t)·Φ,       Φ(t0) = I       (sensitivity to the start state)
/// Ψ̇ = J(t)·Ψ + c·B(t),  Ψ(t0) = 0   (sensitivity to the interval control)
/// ```
///
/// where J = ∂f/∂x and B = ∂f/∂u are supplied by the [Dynamics] model.
/// Deterministic given identical inputs; a dynamics fault is propagated
/// upward without internal retry (retry policy belongs to the SQP driver).
#[derive(Clone)]
pub struct Propagator {
    pub dynamics: Arc<dyn Dynamics>,
    pub opts: PropOpts,
    order: u8,
    stages: usize,
    a_coeffs: &'static [f64],
    b_coeffs: &'static [f64],
}

impl Propagator {
    /// Each propagator must be initialized with `new` which stores the Butcher tableau.
    pub fn new<T: RK>(dynamics: Arc<dyn Dynamics>, opts: PropOpts) -> Self {
        Self {
            dynamics,
            opts,
            stages: T::STAGES,
            order: T::ORDER,
            a_coeffs: T::A_COEFFS,
            b_coeffs: T::B_COEFFS,
        }
    }

    /// A classical RK4 propagator (the default) with custom options.
    pub fn rk4(dynamics: Arc<dyn Dynamics>, opts: PropOpts) -> Self {
        Self::new::<super::RK4Fixed>(dynamics, opts)
    }

    /// A default propagator: classical RK4 with the default options.
    pub fn default(dynamics: Arc<dyn Dynamics>) -> Self {
        Self::rk4(dynamics, PropOpts::default())
    }

    /// Order of the underlying scheme.
    pub fn order(&self) -> u8 {
        self.order
    }

    /// Integrates one shooting interval `[t0, t0 + dt]` from `x0`, with the
    /// control interpolated between `u0` and `u1` per the configured
    /// parametrization, and returns the end state with its sensitivities.
    pub fn propagate_stage(
        &self,
        t0: f64,
        dt: f64,
        x0: &DVector<f64>,
        u0: &DVector<f64>,
        u1: &DVector<f64>,
    ) -> Result<StageSensitivity, PropagationError> {
        let substeps = self.opts.substeps;
        if substeps == 0 || !dt.is_finite() || dt <= 0.0 {
            return Err(PropagationError::InvalidSubsteps { dt, substeps });
        }
        let nx = self.dynamics.state_dim();
        let nu = self.dynamics.control_dim();
        let h = dt / substeps as f64;

        let mut x = x0.clone();
        let mut phi = DMatrix::<f64>::identity(nx, nx);
        let mut psi0 = DMatrix::<f64>::zeros(nx, nu);
        let mut psi1 = DMatrix::<f64>::zeros(nx, nu);
        let mut evals = 0_usize;

        // Scratch for the RK stages of the state and of the variational matrices.
        let mut k = vec![DVector::<f64>::zeros(nx); self.stages];
        let mut k_phi = vec![DMatrix::<f64>::zeros(nx, nx); self.stages];
        let mut k_psi0 = vec![DMatrix::<f64>::zeros(nx, nu); self.stages];
        let mut k_psi1 = vec![DMatrix::<f64>::zeros(nx, nu); self.stages];

        for step in 0..substeps {
            let t_base = t0 + step as f64 * h;
            let mut a_idx = 0_usize;
            for i in 0..self.stages {
                // c_i = \sum_j a_ij for a consistent tableau.
                let mut ci = 0.0;
                let mut xs = x.clone();
                let mut phis = phi.clone();
                let mut psi0s = psi0.clone();
                let mut psi1s = psi1.clone();
                if i > 0 {
                    for j in 0..i {
                        let a_ij = self.a_coeffs[a_idx];
                        ci += a_ij;
                        xs += h * a_ij * &k[j];
                        phis += h * a_ij * &k_phi[j];
                        psi0s += h * a_ij * &k_psi0[j];
                        psi1s += h * a_ij * &k_psi1[j];
                        a_idx += 1;
                    }
                }
                let ts = t_base + ci * h;
                // Fraction of the full interval elapsed at this RK stage point.
                let theta = (ts - t0) / dt;
                let (w0, w1) = match self.opts.parametrization {
                    ControlParametrization::PiecewiseConstant => (1.0, 0.0),
                    ControlParametrization::PiecewiseLinear => (1.0 - theta, theta),
                };
                let us = w0 * u0 + w1 * u1;

                let f = self.dynamics.eom(ts, &xs, &us).context(DynamicsSnafu)?;
                let (jac_x, jac_u) = self
                    .dynamics
                    .jacobians(ts, &xs, &us)
                    .context(DynamicsSnafu)?;
                evals += 1;

                k[i] = f;
                k_phi[i] = &jac_x * &phis;
                k_psi0[i] = &jac_x * &psi0s + w0 * &jac_u;
                k_psi1[i] = &jac_x * &psi1s + w1 * &jac_u;
            }

            for i in 0..self.stages {
                let b_i = self.b_coeffs[i];
                x += h * b_i * &k[i];
                phi += h * b_i * &k_phi[i];
                psi0 += h * b_i * &k_psi0[i];
                psi1 += h * b_i * &k_psi1[i];
            }
        }

        Ok(StageSensitivity {
            xf: x,
            stm_x: phi,
            stm_u0: psi0,
            stm_u1: psi1,
            details: IntegrationDetails { step: h, evals },
        })
    }

    /// Integrates one interval and returns the micro-step samples `(t, x)`,
    /// without sensitivity propagation. `substeps` overrides the configured
    /// micro-step count, which lets the solution extractor re-integrate at a
    /// finer resolution.
    pub fn propagate_dense(
        &self,
        t0: f64,
        dt: f64,
        x0: &DVector<f64>,
        u0: &DVector<f64>,
        u1: &DVector<f64>,
        substeps: usize,
    ) -> Result<Vec<(f64, DVector<f64>)>, PropagationError> {
        if substeps == 0 || !dt.is_finite() || dt <= 0.0 {
            return Err(PropagationError::InvalidSubsteps { dt, substeps });
        }
        let nx = self.dynamics.state_dim();
        let h = dt / substeps as f64;
        let mut x = x0.clone();
        let mut samples = Vec::with_capacity(substeps + 1);
        samples.push((t0, x.clone()));

        let mut k = vec![DVector::<f64>::zeros(nx); self.stages];

        for step in 0..substeps {
            let t_base = t0 + step as f64 * h;
            let mut a_idx = 0_usize;
            for i in 0..self.stages {
                let mut ci = 0.0;
                let mut xs = x.clone();
                if i > 0 {
                    for j in 0..i {
                        let a_ij = self.a_coeffs[a_idx];
                        ci += a_ij;
                        xs += h * a_ij * &k[j];
                        a_idx += 1;
                    }
                }
                let ts = t_base + ci * h;
                let theta = (ts - t0) / dt;
                let (w0, w1) = match self.opts.parametrization {
                    ControlParametrization::PiecewiseConstant => (1.0, 0.0),
                    ControlParametrization::PiecewiseLinear => (1.0 - theta, theta),
                };
                let us = w0 * u0 + w1 * u1;
                k[i] = self.dynamics.eom(ts, &xs, &us).context(DynamicsSnafu)?;
            }
            for i in 0..self.stages {
                x += h * self.b_coeffs[i] * &k[i];
            }
            samples.push((t_base + h, x.clone()));
        }

        Ok(samples)
    }
}
