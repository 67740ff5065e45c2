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

extern crate nalgebra as na;
extern crate pretty_env_logger;

use na::DVector;
use pontos::dynamics::ShipSteering;
use pontos::prelude::*;
use pontos::propagators::{PropOpts, RK2Fixed};

use std::sync::Arc;

fn turning_ship_point() -> (DVector<f64>, DVector<f64>) {
    let x0 = DVector::from_vec(vec![1.0, -2.0, 0.3, 0.1, 3.0]);
    let u0 = DVector::from_vec(vec![0.2, 0.5]);
    (x0, u0)
}

/// Compares the propagated state transition matrix against a central finite
/// difference of the stage flow, column by column.
#[test]
fn state_sensitivity_matches_finite_differences() {
    let _ = pretty_env_logger::try_init();

    let ship = Arc::new(ShipSteering::default());
    let prop = Propagator::rk4(ship.clone(), PropOpts::builder().substeps(50).build());
    let (x0, u0) = turning_ship_point();
    let dt = 1.0;

    let nominal = prop.propagate_stage(0.0, dt, &x0, &u0, &u0).unwrap();

    let pert = 1e-6;
    for col in 0..5 {
        let mut fwd = x0.clone();
        let mut bwd = x0.clone();
        fwd[col] += pert;
        bwd[col] -= pert;
        let xf_fwd = prop.propagate_stage(0.0, dt, &fwd, &u0, &u0).unwrap().xf;
        let xf_bwd = prop.propagate_stage(0.0, dt, &bwd, &u0, &u0).unwrap().xf;
        let fd_col = (xf_fwd - xf_bwd) / (2.0 * pert);
        for row in 0..5 {
            let delta = (nominal.stm_x[(row, col)] - fd_col[row]).abs();
            assert!(
                delta < 1e-6,
                "STM state column {col} row {row} off by {delta:.3e}"
            );
        }
    }
}

/// Same cross-check for the control sensitivity under a piecewise-constant
/// parametrization: perturbing the interval control must match the
/// propagated control transition matrix.
#[test]
fn control_sensitivity_matches_finite_differences() {
    let _ = pretty_env_logger::try_init();

    let ship = Arc::new(ShipSteering::default());
    let prop = Propagator::rk4(ship.clone(), PropOpts::builder().substeps(50).build());
    let (x0, u0) = turning_ship_point();
    let dt = 1.0;

    let nominal = prop.propagate_stage(0.0, dt, &x0, &u0, &u0).unwrap();

    let pert = 1e-6;
    for col in 0..2 {
        let mut fwd = u0.clone();
        let mut bwd = u0.clone();
        fwd[col] += pert;
        bwd[col] -= pert;
        let xf_fwd = prop.propagate_stage(0.0, dt, &x0, &fwd, &fwd).unwrap().xf;
        let xf_bwd = prop.propagate_stage(0.0, dt, &x0, &bwd, &bwd).unwrap().xf;
        let fd_col = (xf_fwd - xf_bwd) / (2.0 * pert);
        for row in 0..5 {
            let delta = (nominal.stm_u0[(row, col)] - fd_col[row]).abs();
            assert!(
                delta < 1e-6,
                "STM control column {col} row {row} off by {delta:.3e}"
            );
        }
    }
}

/// Under a piecewise-linear parametrization, perturbing the interval-start
/// and interval-end controls must match the split sensitivities.
#[test]
fn split_control_sensitivity_matches_finite_differences() {
    let ship = Arc::new(ShipSteering::default());
    let opts = PropOpts::builder()
        .substeps(50)
        .parametrization(ControlParametrization::PiecewiseLinear)
        .build();
    let prop = Propagator::rk4(ship.clone(), opts);
    let (x0, u0) = turning_ship_point();
    let u1 = DVector::from_vec(vec![-0.1, 0.8]);
    let dt = 1.0;

    let nominal = prop.propagate_stage(0.0, dt, &x0, &u0, &u1).unwrap();

    let pert = 1e-6;
    // Interval-start control.
    for col in 0..2 {
        let mut fwd = u0.clone();
        let mut bwd = u0.clone();
        fwd[col] += pert;
        bwd[col] -= pert;
        let xf_fwd = prop.propagate_stage(0.0, dt, &x0, &fwd, &u1).unwrap().xf;
        let xf_bwd = prop.propagate_stage(0.0, dt, &x0, &bwd, &u1).unwrap().xf;
        let fd_col = (xf_fwd - xf_bwd) / (2.0 * pert);
        for row in 0..5 {
            assert!((nominal.stm_u0[(row, col)] - fd_col[row]).abs() < 1e-6);
        }
    }
    // Interval-end control.
    for col in 0..2 {
        let mut fwd = u1.clone();
        let mut bwd = u1.clone();
        fwd[col] += pert;
        bwd[col] -= pert;
        let xf_fwd = prop.propagate_stage(0.0, dt, &x0, &u0, &fwd).unwrap().xf;
        let xf_bwd = prop.propagate_stage(0.0, dt, &x0, &u0, &bwd).unwrap().xf;
        let fd_col = (xf_fwd - xf_bwd) / (2.0 * pert);
        for row in 0..5 {
            assert!((nominal.stm_u1[(row, col)] - fd_col[row]).abs() < 1e-6);
        }
    }
}

/// Halving the micro-step of the fourth order scheme must shrink the error
/// roughly sixteen-fold. The reference is a very fine integration.
#[test]
fn rk4_shows_fourth_order_convergence() {
    let ship = Arc::new(ShipSteering::default());
    let (x0, u0) = turning_ship_point();
    let dt = 2.0;

    let fine = Propagator::rk4(ship.clone(), PropOpts::builder().substeps(2000).build());
    assert_eq!(fine.order(), 4);
    let reference = fine.propagate_stage(0.0, dt, &x0, &u0, &u0).unwrap().xf;

    let mut errors = Vec::new();
    for substeps in [4_usize, 8, 16] {
        let xf = Propagator::rk4(ship.clone(), PropOpts::builder().substeps(substeps).build())
            .propagate_stage(0.0, dt, &x0, &u0, &u0)
            .unwrap()
            .xf;
        errors.push((&xf - &reference).amax());
    }

    // Expect approximately 2^order, with generous slack for the nonlinearity.
    let floor = 2.0_f64.powi(fine.order() as i32) / 2.0;
    for pair in errors.windows(2) {
        let ratio = pair[0] / pair[1];
        assert!(
            ratio > floor,
            "convergence ratio {ratio:.2} below fourth order"
        );
    }
}

/// A second order scheme over the same grid must be less accurate than the
/// fourth order one.
#[test]
fn rk2_is_less_accurate_than_rk4() {
    let ship = Arc::new(ShipSteering::default());
    let (x0, u0) = turning_ship_point();
    let dt = 2.0;

    let reference = Propagator::rk4(ship.clone(), PropOpts::builder().substeps(2000).build())
        .propagate_stage(0.0, dt, &x0, &u0, &u0)
        .unwrap()
        .xf;

    let opts = PropOpts::builder().substeps(8).build();
    let rk2 = Propagator::new::<RK2Fixed>(ship.clone(), opts)
        .propagate_stage(0.0, dt, &x0, &u0, &u0)
        .unwrap()
        .xf;
    let rk4 = Propagator::rk4(ship.clone(), opts)
        .propagate_stage(0.0, dt, &x0, &u0, &u0)
        .unwrap()
        .xf;

    assert!((&rk2 - &reference).amax() > (&rk4 - &reference).amax());
}

/// Two identical propagations must agree bit for bit.
#[test]
fn propagation_is_deterministic() {
    let ship = Arc::new(ShipSteering::default());
    let prop = Propagator::default(ship.clone());
    let (x0, u0) = turning_ship_point();

    let a = prop.propagate_stage(0.0, 1.0, &x0, &u0, &u0).unwrap();
    let b = prop.propagate_stage(0.0, 1.0, &x0, &u0, &u0).unwrap();
    assert_eq!(a.xf, b.xf);
    assert_eq!(a.stm_x, b.stm_x);
    assert_eq!(a.stm_u0, b.stm_u0);
}

/// The RK3/8 rule must agree with the classical rule to integration accuracy.
#[test]
fn rk38_matches_rk4_closely() {
    let ship = Arc::new(ShipSteering::default());
    let (x0, u0) = turning_ship_point();
    let opts = PropOpts::builder().substeps(100).build();

    let classical = Propagator::rk4(ship.clone(), opts)
        .propagate_stage(0.0, 2.0, &x0, &u0, &u0)
        .unwrap()
        .xf;
    let three_eighth = Propagator::new::<RK38Fixed>(ship.clone(), opts)
        .propagate_stage(0.0, 2.0, &x0, &u0, &u0)
        .unwrap()
        .xf;

    assert!((&classical - &three_eighth).amax() < 1e-9);
}

/// Dense sampling ends where the sensitivity propagation ends.
#[test]
fn dense_samples_are_consistent_with_stage_endpoint() {
    let ship = Arc::new(ShipSteering::default());
    let opts = PropOpts::builder().substeps(10).build();
    let prop = Propagator::rk4(ship.clone(), opts);
    let (x0, u0) = turning_ship_point();

    let stage = prop.propagate_stage(0.0, 1.0, &x0, &u0, &u0).unwrap();
    let dense = prop.propagate_dense(0.0, 1.0, &x0, &u0, &u0, 10).unwrap();

    assert_eq!(dense.len(), 11);
    let (t_last, x_last) = dense.last().unwrap();
    assert!((t_last - 1.0).abs() < 1e-12);
    assert!((x_last - &stage.xf).amax() < 1e-12);
}
