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

use super::{Attachment, Constraint, CostFunction, Horizon, VarRef};
use crate::dynamics::Dynamics;
use snafu::Snafu;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Construction-time rejection of a malformed problem: every variant here is
/// reported before any iteration begins.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProblemError {
    #[snafu(display("invalid horizon: t0 = {t0}, tf = {tf}, intervals = {intervals}"))]
    InvalidHorizon { t0: f64, tf: f64, intervals: usize },
    #[snafu(display("constraint targets {target} but the model has {dim} {what}"))]
    IndexOutOfRange {
        target: String,
        what: &'static str,
        dim: usize,
    },
    #[snafu(display(
        "{target} pinned to both {first} and {second} at the same attachment point"
    ))]
    ContradictoryPin {
        target: String,
        first: f64,
        second: f64,
    },
    #[snafu(display("bound on {target} is inverted: lower {lower} > upper {upper}"))]
    InvertedBound {
        target: String,
        lower: f64,
        upper: f64,
    },
    #[snafu(display("bound on {target} has neither a lower nor an upper value"))]
    EmptyBound { target: String },
    #[snafu(display("{target} pinned to {value}, outside its bound [{lower}, {upper}]"))]
    PinOutsideBound {
        target: String,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[snafu(display("the dynamics model has a zero-dimension {what} vector"))]
    ZeroDimension { what: &'static str },
    #[snafu(display("constraint {value} is not finite"))]
    NonFiniteValue { value: f64 },
}

/// A fully validated optimal control problem: dynamics, horizon, cost
/// functional and constraint set. Immutable once built -- the SQP driver
/// reads it, never mutates it.
#[derive(Clone)]
pub struct OcpProblem {
    pub dynamics: Arc<dyn Dynamics>,
    pub horizon: Horizon,
    pub cost: Arc<dyn CostFunction>,
    pub constraints: Vec<Constraint>,
}

// Derive is unavailable over the trait-object fields.
impl fmt::Debug for OcpProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OcpProblem")
            .field("state_dim", &self.dynamics.state_dim())
            .field("control_dim", &self.dynamics.control_dim())
            .field("horizon", &self.horizon)
            .field("constraints", &self.constraints)
            .finish()
    }
}

impl OcpProblem {
    /// Builds and validates the problem. Dimension mismatches, contradictory
    /// fixed boundary values, inverted or empty bounds, and non-finite
    /// constraint data are all rejected here, never at iteration time.
    pub fn new(
        dynamics: Arc<dyn Dynamics>,
        horizon: Horizon,
        cost: Arc<dyn CostFunction>,
        constraints: Vec<Constraint>,
    ) -> Result<Self, ProblemError> {
        let nx = dynamics.state_dim();
        let nu = dynamics.control_dim();
        if nx == 0 {
            return Err(ProblemError::ZeroDimension { what: "state" });
        }
        if nu == 0 {
            return Err(ProblemError::ZeroDimension { what: "control" });
        }

        let mut pins: HashMap<(Attachment, VarRef), f64> = HashMap::new();
        let mut boxes: HashMap<VarRef, (Option<f64>, Option<f64>)> = HashMap::new();

        for cstr in &constraints {
            let target = cstr.target();
            let (idx, dim, what) = match target {
                VarRef::State(i) => (i, nx, "states"),
                VarRef::Control(i) => (i, nu, "controls"),
            };
            if idx >= dim {
                return Err(ProblemError::IndexOutOfRange {
                    target: target.to_string(),
                    what,
                    dim,
                });
            }

            match cstr {
                Constraint::Pin { at, value, .. } => {
                    if !value.is_finite() {
                        return Err(ProblemError::NonFiniteValue { value: *value });
                    }
                    if let Some(prev) = pins.insert((*at, target), *value) {
                        if prev != *value {
                            return Err(ProblemError::ContradictoryPin {
                                target: target.to_string(),
                                first: prev,
                                second: *value,
                            });
                        }
                    }
                }
                Constraint::Bound { lower, upper, .. } => {
                    if lower.is_none() && upper.is_none() {
                        return Err(ProblemError::EmptyBound {
                            target: target.to_string(),
                        });
                    }
                    for side in [lower, upper].into_iter().flatten() {
                        if !side.is_finite() {
                            return Err(ProblemError::NonFiniteValue { value: *side });
                        }
                    }
                    if let (Some(lo), Some(up)) = (lower, upper) {
                        if lo > up {
                            return Err(ProblemError::InvertedBound {
                                target: target.to_string(),
                                lower: *lo,
                                upper: *up,
                            });
                        }
                    }
                    // Tightest box per target, pins are checked against it below.
                    let entry = boxes.entry(target).or_insert((None, None));
                    entry.0 = match (entry.0, lower) {
                        (Some(a), Some(b)) => Some(a.max(*b)),
                        (a, b) => b.or(a),
                    };
                    entry.1 = match (entry.1, upper) {
                        (Some(a), Some(b)) => Some(a.min(*b)),
                        (a, b) => b.or(a),
                    };
                }
            }
        }

        for ((_, target), value) in &pins {
            if let Some((lower, upper)) = boxes.get(target) {
                let lo = lower.unwrap_or(f64::NEG_INFINITY);
                let up = upper.unwrap_or(f64::INFINITY);
                if *value < lo || *value > up {
                    return Err(ProblemError::PinOutsideBound {
                        target: target.to_string(),
                        value: *value,
                        lower: lo,
                        upper: up,
                    });
                }
            }
        }

        Ok(Self {
            dynamics,
            horizon,
            cost,
            constraints,
        })
    }

    pub fn state_dim(&self) -> usize {
        self.dynamics.state_dim()
    }

    pub fn control_dim(&self) -> usize {
        self.dynamics.control_dim()
    }

    /// The pin value on `target` at `at`, if any (deduplicated at construction).
    pub fn pin_value(&self, at: Attachment, target: VarRef) -> Option<f64> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Pin {
                at: a,
                target: t,
                value,
            } if *a == at && *t == target => Some(*value),
            _ => None,
        })
    }

    /// The tightest merged box bound on `target`, `(lower, upper)`.
    pub fn box_bound(&self, target: VarRef) -> (Option<f64>, Option<f64>) {
        let mut lo: Option<f64> = None;
        let mut up: Option<f64> = None;
        for c in &self.constraints {
            if let Constraint::Bound {
                target: t,
                lower,
                upper,
            } = c
            {
                if *t == target {
                    lo = match (lo, lower) {
                        (Some(a), Some(b)) => Some(a.max(*b)),
                        (a, b) => b.or(a),
                    };
                    up = match (up, upper) {
                        (Some(a), Some(b)) => Some(a.min(*b)),
                        (a, b) => b.or(a),
                    };
                }
            }
        }
        (lo, up)
    }
}

impl fmt::Display for OcpProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "OCP {{ {}, nx: {}, nu: {}, {} constraints }}",
            self.horizon,
            self.state_dim(),
            self.control_dim(),
            self.constraints.len()
        )
    }
}
