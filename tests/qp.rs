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

use na::{DMatrix, DVector};
use pontos::opti::{solve_qp, HessianBlock, QpOptions, QpSubproblem};
use rstest::rstest;

/// An identity-Hessian subproblem with free bounds and no general rows.
fn identity_qp(grad: Vec<f64>) -> QpSubproblem {
    let dim = grad.len();
    QpSubproblem {
        dim,
        hessian: vec![HessianBlock {
            offset: 0,
            block: DMatrix::identity(dim, dim),
        }],
        regularization: 0.0,
        grad: DVector::from_vec(grad),
        eq_rows: Vec::new(),
        ineq_rows: Vec::new(),
        lower: DVector::from_element(dim, f64::NEG_INFINITY),
        upper: DVector::from_element(dim, f64::INFINITY),
    }
}

/// With an identity Hessian, free bounds, and a single sum constraint
/// `1^T d = b`, the minimizer is the projection `d = -g + ((b + 1^T g)/n) 1`.
#[rstest]
#[case(vec![1.0, 2.0], 0.0)]
#[case(vec![1.0, 2.0], 3.0)]
#[case(vec![-4.0, 0.5, 2.5], 1.0)]
fn equality_projection_is_analytic(#[case] grad: Vec<f64>, #[case] b: f64) {
    let dim = grad.len();
    let mut qp = identity_qp(grad.clone());
    qp.eq_rows.push(pontos::opti::SparseRow {
        entries: (0..dim).map(|j| (j, 1.0)).collect(),
        rhs: b,
    });

    let sol = solve_qp(&qp, &QpOptions::default()).unwrap();

    let g_sum: f64 = grad.iter().sum();
    let shift = (b + g_sum) / dim as f64;
    for j in 0..dim {
        let expected = -grad[j] + shift;
        assert!(
            (sol.step[j] - expected).abs() < 1e-10,
            "component {j}: got {}, expected {expected}",
            sol.step[j]
        );
    }
    // The constraint must hold exactly.
    let achieved: f64 = sol.step.iter().sum();
    assert!((achieved - b).abs() < 1e-10);
}

/// With an identity Hessian the box-constrained minimizer is a clamp of the
/// unconstrained step.
#[rstest]
#[case(vec![2.0, -3.0], -1.0, 1.0)]
#[case(vec![0.5, -0.25], -1.0, 1.0)]
#[case(vec![10.0, 10.0], -0.1, 0.1)]
fn box_constrained_step_is_a_clamp(#[case] grad: Vec<f64>, #[case] lo: f64, #[case] up: f64) {
    let dim = grad.len();
    let mut qp = identity_qp(grad.clone());
    qp.lower = DVector::from_element(dim, lo);
    qp.upper = DVector::from_element(dim, up);

    let sol = solve_qp(&qp, &QpOptions::default()).unwrap();

    for j in 0..dim {
        let expected = (-grad[j]).clamp(lo, up);
        assert!(
            (sol.step[j] - expected).abs() < 1e-10,
            "component {j}: got {}, expected {expected}",
            sol.step[j]
        );
    }
    // Working-set multipliers of active bounds must be nonnegative.
    for (idx, mu) in &sol.bound_multipliers {
        assert!(*mu >= -1e-12, "bound multiplier at {idx} is negative: {mu}");
    }
}

/// An inactive inequality must not perturb the Newton step, an active one
/// must bind with a nonnegative multiplier.
#[test]
fn inequality_binds_only_when_violated() {
    // Unconstrained step is d = (1, 1).
    let mut qp = identity_qp(vec![-1.0, -1.0]);
    // d_0 + d_1 >= 0 is slack at the optimum.
    qp.ineq_rows.push(pontos::opti::SparseRow {
        entries: vec![(0, 1.0), (1, 1.0)],
        rhs: 0.0,
    });
    let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
    assert!((sol.step[0] - 1.0).abs() < 1e-10);
    assert!((sol.step[1] - 1.0).abs() < 1e-10);
    assert!(sol.ineq_multipliers.iter().all(|mu| mu.abs() < 1e-12));

    // d_0 + d_1 >= 3 cuts the optimum off: the minimizer moves to the
    // boundary, split evenly by symmetry.
    let mut qp = identity_qp(vec![-1.0, -1.0]);
    qp.ineq_rows.push(pontos::opti::SparseRow {
        entries: vec![(0, 1.0), (1, 1.0)],
        rhs: 3.0,
    });
    let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
    assert!((sol.step[0] - 1.5).abs() < 1e-10);
    assert!((sol.step[1] - 1.5).abs() < 1e-10);
    assert!(sol.ineq_multipliers.iter().any(|mu| *mu > 1e-10));
}

/// The split-block Hessian layout must behave like its dense equivalent.
#[test]
fn block_hessian_matches_dense_equivalent() {
    let qp = QpSubproblem {
        dim: 4,
        hessian: vec![
            HessianBlock {
                offset: 0,
                block: DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 3.0])),
            },
            HessianBlock {
                offset: 2,
                block: DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 5.0])),
            },
        ],
        regularization: 0.0,
        grad: DVector::from_vec(vec![2.0, 3.0, 4.0, 5.0]),
        eq_rows: Vec::new(),
        ineq_rows: Vec::new(),
        lower: DVector::from_element(4, f64::NEG_INFINITY),
        upper: DVector::from_element(4, f64::INFINITY),
    };

    let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
    // d = -H^{-1} g = (-1, -1, -1, -1).
    for j in 0..4 {
        assert!((sol.step[j] + 1.0).abs() < 1e-10);
    }
}

/// Regularization alone must make a rank-deficient model solvable.
#[test]
fn regularization_rescues_a_singular_hessian() {
    let qp = QpSubproblem {
        dim: 2,
        hessian: Vec::new(),
        regularization: 1e-6,
        grad: DVector::from_vec(vec![1.0, 0.0]),
        eq_rows: vec![pontos::opti::SparseRow {
            entries: vec![(0, 1.0)],
            rhs: 0.5,
        }],
        ineq_rows: Vec::new(),
        lower: DVector::from_element(2, f64::NEG_INFINITY),
        upper: DVector::from_element(2, f64::INFINITY),
    };

    let sol = solve_qp(&qp, &QpOptions::default()).unwrap();
    // The constrained coordinate follows the row, the free one has no
    // gradient pull and stays put.
    assert!((sol.step[0] - 0.5).abs() < 1e-9);
    assert!(sol.step[1].abs() < 1e-9);
}

/// Contradictory general rows cannot be satisfied simultaneously.
#[test]
fn contradictory_rows_report_infeasible() {
    let mut qp = identity_qp(vec![0.0]);
    qp.ineq_rows.push(pontos::opti::SparseRow {
        entries: vec![(0, 1.0)],
        rhs: 1.0,
    });
    qp.ineq_rows.push(pontos::opti::SparseRow {
        entries: vec![(0, -1.0)],
        rhs: 1.0,
    });

    let err = solve_qp(&qp, &QpOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        pontos::opti::OptimError::InfeasibleStep { .. }
    ));
}
