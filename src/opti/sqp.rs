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

use super::{
    solve_qp, NlpAssembler, OcpSolution, OptimError, QpOptions, ShootingGrid, SolverStatus,
};
use crate::linalg::DVector;
use crate::ocp::OcpProblem;
use crate::propagators::{PropOpts, Propagator, StageSensitivity};
use crate::PontosError;
use serde_derive::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SolverOpts stores the outer-loop options: iteration budget, convergence
/// tolerances, line-search and fault-retry limits, and the nested integrator
/// and QP options.
#[derive(Clone, Copy, Debug, TypedBuilder, Serialize, Deserialize)]
#[builder(doc)]
pub struct SolverOpts {
    /// Maximum number of outer SQP iterations. Hitting it is a soft stop.
    #[builder(default = 50)]
    pub max_iterations: usize,
    /// Convergence tolerance on the step infinity norm.
    #[builder(default = 1e-6)]
    pub step_tol: f64,
    /// Convergence tolerance on the constraint violation infinity norm.
    #[builder(default = 1e-6)]
    pub feas_tol: f64,
    /// Armijo sufficient-decrease coefficient of the merit line search.
    #[builder(default = 1e-4)]
    pub armijo_c1: f64,
    /// Bound on the backtracking halvings per line search.
    #[builder(default = 20)]
    pub max_backtracks: usize,
    /// Bound on the step-size reductions granted after a NumericFault before
    /// the solve is declared failed.
    #[builder(default = 8)]
    pub fault_retries: usize,
    /// Diagonal Hessian regularization of the Gauss--Newton model.
    #[builder(default = 1e-6)]
    pub hessian_reg: f64,
    #[builder(default)]
    pub qp: QpOptions,
    #[builder(default)]
    pub prop: PropOpts,
}

impl Default for SolverOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The outer loop as an explicit state machine, so that cancellation and
/// partial failure are first-class outcomes rather than ad hoc early returns.
#[derive(Clone, Debug, PartialEq)]
enum SqpState {
    Initializing,
    Iterating,
    Converged,
    Failed(String),
}

enum LineSearchOutcome {
    Accepted {
        alpha: f64,
        z: DVector<f64>,
        sens: Vec<StageSensitivity>,
    },
    NoDescent,
    FaultBudgetExhausted(String),
}

/// The SQP driver: repeatedly discretizes, assembles and solves the quadratic
/// subproblem, globalizes with an ℓ1 merit line search, and updates the
/// trajectory iterate until convergence, iteration budget, failure, or
/// cooperative cancellation.
pub struct SqpDriver {
    pub problem: OcpProblem,
    pub opts: SolverOpts,
    grid: ShootingGrid,
    cancel: Option<Arc<AtomicBool>>,
}

impl SqpDriver {
    /// Sets up the driver with a classical RK4 stage propagator over the
    /// problem's dynamics.
    pub fn new(problem: OcpProblem, opts: SolverOpts) -> Self {
        let prop = Propagator::rk4(problem.dynamics.clone(), opts.prop);
        let grid = ShootingGrid::new(&problem, prop);
        Self {
            problem,
            opts,
            grid,
            cancel: None,
        }
    }

    /// Sets up the driver with a custom stage propagator (scheme and options).
    pub fn with_propagator(problem: OcpProblem, opts: SolverOpts, prop: Propagator) -> Self {
        let grid = ShootingGrid::new(&problem, prop);
        Self {
            problem,
            opts,
            grid,
            cancel: None,
        }
    }

    /// Registers a cooperative cancellation flag, checked between outer
    /// iterations. A cancelled solve returns the best iterate found with a
    /// Failed status.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn grid(&self) -> &ShootingGrid {
        &self.grid
    }

    /// Solves from the default initial guess (boundary-pin interpolation).
    pub fn solve(&self) -> Result<OcpSolution, PontosError> {
        let z0 = self.grid.initial_guess(&self.problem);
        self.solve_from(z0)
    }

    /// Solves from a user-supplied warm start.
    pub fn solve_from(&self, mut z: DVector<f64>) -> Result<OcpSolution, PontosError> {
        let assembler = NlpAssembler::new(&self.problem, &self.grid, self.opts.hessian_reg);
        self.grid.clip_into_bounds(&self.problem, &mut z);

        // Without a single valid stage evaluation there is no iterate to
        // report, so this error is terminal rather than a Failed status.
        let mut sens = self
            .grid
            .eval_stages(&z)
            .map_err(|source| PontosError::Optim { source })?;
        let mut state = SqpState::Initializing;

        let mut merit_nu = 1.0_f64;
        let mut faults_left = self.opts.fault_retries;
        let mut iterations = 0_usize;
        let mut last_step_inf = f64::INFINITY;

        for it in 0..self.opts.max_iterations {
            iterations = it + 1;

            if self
                .cancel
                .as_ref()
                .is_some_and(|f| f.load(Ordering::Relaxed))
            {
                warn!("solve cancelled at outer iteration {it}");
                state = SqpState::Failed("cancelled by caller".to_string());
                break;
            }

            let qp = assembler.assemble(&z, &sens);
            let qp_sol = match solve_qp(&qp, &self.opts.qp) {
                Ok(sol) => sol,
                Err(OptimError::InfeasibleStep { details }) => {
                    warn!("QP infeasible at iteration {it} ({details}), entering restoration");
                    let mut relaxed = qp.clone();
                    relaxed.ineq_rows.clear();
                    relaxed.lower.fill(f64::NEG_INFINITY);
                    relaxed.upper.fill(f64::INFINITY);
                    match solve_qp(&relaxed, &self.opts.qp) {
                        Ok(sol) => sol,
                        Err(e) => {
                            error!("restoration failed at iteration {it}: {e}");
                            state = SqpState::Failed(format!("restoration failed: {e}"));
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("QP solve failed at iteration {it}: {e}");
                    state = SqpState::Failed(format!("QP solve failed: {e}"));
                    break;
                }
            };
            if state == SqpState::Initializing {
                // The first subproblem solved: the loop is properly underway.
                state = SqpState::Iterating;
            }

            let (viol_l1, viol_inf) = assembler.violation_norms(&z, &sens);
            let step_inf = qp_sol.step.amax();
            if step_inf <= self.opts.step_tol && viol_inf <= self.opts.feas_tol {
                last_step_inf = step_inf;
                state = SqpState::Converged;
                break;
            }

            // Keep the merit penalty above the multiplier magnitudes so that
            // the QP direction is a descent direction for the merit function.
            merit_nu = merit_nu.max(1.5 * qp_sol.max_multiplier() + 1e-3);

            let cost_0 = assembler.cost(&z);
            let phi_0 = cost_0 + merit_nu * viol_l1;
            let dir_deriv = qp.grad.dot(&qp_sol.step) - merit_nu * viol_l1;

            match self.line_search(
                &assembler,
                &z,
                &qp_sol.step,
                phi_0,
                dir_deriv,
                merit_nu,
                &mut faults_left,
            ) {
                LineSearchOutcome::Accepted {
                    alpha,
                    z: z_new,
                    sens: sens_new,
                } => {
                    info!(
                        "SQP iteration #{it}\tcost = {cost_0:.6}\tviolation = {viol_inf:.3e}\tstep = {step_inf:.3e}\talpha = {alpha:.3}"
                    );
                    z = z_new;
                    sens = sens_new;
                    last_step_inf = alpha * step_inf;
                    let (_, viol_new) = assembler.violation_norms(&z, &sens);
                    if last_step_inf <= self.opts.step_tol && viol_new <= self.opts.feas_tol {
                        state = SqpState::Converged;
                        break;
                    }
                }
                LineSearchOutcome::NoDescent => {
                    if viol_inf <= self.opts.feas_tol {
                        // Feasible and no merit descent left: accept as converged.
                        info!("no merit descent from a feasible iterate, stopping");
                        state = SqpState::Converged;
                    } else {
                        state = SqpState::Failed(
                            "line search found no acceptable step".to_string(),
                        );
                    }
                    break;
                }
                LineSearchOutcome::FaultBudgetExhausted(details) => {
                    error!("persistent dynamics faults: {details}");
                    state = SqpState::Failed(format!("persistent numeric faults: {details}"));
                    break;
                }
            }
        }

        if matches!(state, SqpState::Initializing | SqpState::Iterating) {
            info!(
                "iteration budget of {} reached, reporting best iterate",
                self.opts.max_iterations
            );
        }

        let status = match state {
            SqpState::Converged => SolverStatus::Converged,
            SqpState::Failed(reason) => SolverStatus::Failed { reason },
            SqpState::Initializing | SqpState::Iterating => SolverStatus::MaxIterationsReached,
        };

        let cost = assembler.cost(&z);
        let (_, feasibility) = assembler.violation_norms(&z, &sens);
        Ok(OcpSolution::from_iterate(
            &self.problem,
            &self.grid,
            &z,
            status,
            cost,
            feasibility,
            last_step_inf,
            iterations,
        ))
    }

    /// Backtracking line search on the ℓ1 merit function. A NumericFault at a
    /// trial point consumes a fault retry and halves the step like a merit
    /// rejection would.
    #[allow(clippy::too_many_arguments)]
    fn line_search(
        &self,
        assembler: &NlpAssembler,
        z: &DVector<f64>,
        d: &DVector<f64>,
        phi_0: f64,
        dir_deriv: f64,
        merit_nu: f64,
        faults_left: &mut usize,
    ) -> LineSearchOutcome {
        let mut alpha = 1.0_f64;
        let mut best: Option<(f64, f64, DVector<f64>, Vec<StageSensitivity>)> = None;

        for _ in 0..self.opts.max_backtracks {
            let z_trial = z + alpha * d;
            let sens_trial = match self.grid.eval_stages(&z_trial) {
                Ok(s) => s,
                Err(e) => {
                    if *faults_left == 0 {
                        return LineSearchOutcome::FaultBudgetExhausted(e.to_string());
                    }
                    *faults_left -= 1;
                    warn!("dynamics fault at alpha = {alpha:.4} ({e}), halving step");
                    alpha *= 0.5;
                    continue;
                }
            };
            let (l1, _) = assembler.violation_norms(&z_trial, &sens_trial);
            let phi = assembler.cost(&z_trial) + merit_nu * l1;

            if phi <= phi_0 + self.opts.armijo_c1 * alpha * dir_deriv.min(0.0) {
                return LineSearchOutcome::Accepted {
                    alpha,
                    z: z_trial,
                    sens: sens_trial,
                };
            }
            if best.as_ref().map_or(true, |(b_phi, ..)| phi < *b_phi) {
                best = Some((phi, alpha, z_trial, sens_trial));
            }
            alpha *= 0.5;
        }

        // No sufficient decrease: settle for plain decrease if any trial
        // improved the merit at all.
        match best {
            Some((phi, alpha, z_trial, sens_trial)) if phi < phi_0 => {
                warn!("line search fell back to plain merit decrease at alpha = {alpha:.4}");
                LineSearchOutcome::Accepted {
                    alpha,
                    z: z_trial,
                    sens: sens_trial,
                }
            }
            _ => LineSearchOutcome::NoDescent,
        }
    }
}

#[cfg(test)]
mod ut_sqp {
    use super::*;
    use crate::dynamics::{Dynamics, DynamicsError};
    use crate::linalg::DMatrix;
    use crate::ocp::{Attachment, Constraint, Horizon, OcpProblem, QuadraticCost, VarRef};

    /// `dx/dt = 0`: the state never moves, whatever the control does.
    #[derive(Debug)]
    struct Frozen {
        nx: usize,
        nu: usize,
    }

    impl Dynamics for Frozen {
        fn state_dim(&self) -> usize {
            self.nx
        }

        fn control_dim(&self) -> usize {
            self.nu
        }

        fn eom(
            &self,
            _t: f64,
            x: &DVector<f64>,
            _u: &DVector<f64>,
        ) -> Result<DVector<f64>, DynamicsError> {
            Ok(DVector::zeros(x.len()))
        }

        fn jacobians(
            &self,
            _t: f64,
            _x: &DVector<f64>,
            _u: &DVector<f64>,
        ) -> Result<(DMatrix<f64>, DMatrix<f64>), DynamicsError> {
            Ok((DMatrix::zeros(self.nx, self.nx), DMatrix::zeros(self.nx, self.nu)))
        }
    }

    fn frozen_problem() -> OcpProblem {
        OcpProblem::new(
            Arc::new(Frozen { nx: 1, nu: 1 }),
            Horizon::new(0.0, 1.0, 1).unwrap(),
            Arc::new(QuadraticCost::lagrange_only(&[0.0], &[1.0])),
            vec![
                Constraint::pin(Attachment::AtStart, VarRef::State(0), 2.0),
                Constraint::pin(Attachment::AtEnd, VarRef::State(0), 2.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn frozen_single_interval_converges_in_one_iteration() {
        let driver = SqpDriver::new(frozen_problem(), SolverOpts::default());
        let sol = driver.solve().unwrap();
        assert_eq!(sol.status, SolverStatus::Converged);
        assert_eq!(sol.iterations, 1);
        assert!((sol.states[0].1[0] - 2.0).abs() < 1e-12);
        assert!((sol.states[1].1[0] - 2.0).abs() < 1e-12);
        assert!(sol.feasibility < 1e-12);
    }

    #[test]
    fn cancellation_reports_failed_with_best_iterate() {
        let flag = Arc::new(AtomicBool::new(true));
        let driver =
            SqpDriver::new(frozen_problem(), SolverOpts::default()).with_cancellation(flag);
        let sol = driver.solve().unwrap();
        assert!(matches!(sol.status, SolverStatus::Failed { .. }));
        assert!(!sol.status.is_usable());
        // The iterate is still reported.
        assert_eq!(sol.states.len(), 2);
    }
}
