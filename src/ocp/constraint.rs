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

use serde_derive::{Deserialize, Serialize};

use std::fmt;

/// Which component of the decision variables a constraint binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarRef {
    /// A differential state component, by index.
    State(usize),
    /// A control component, by index.
    Control(usize),
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VarRef::State(i) => write!(f, "x[{i}]"),
            VarRef::Control(i) => write!(f, "u[{i}]"),
        }
    }
}

/// Where along the horizon a constraint is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attachment {
    /// Binds the first grid node (stage 0 start, or interval 0 for a control).
    AtStart,
    /// Binds the last grid node (stage N-1 end, or interval N-1 for a control).
    AtEnd,
    /// Binds every grid node (every interval for a control).
    Path,
}

/// Equality or inequality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Equality,
    Inequality,
}

/// A constraint on the transcribed problem, as a tagged variant with a uniform
/// shape: the assembler only ever asks for the kind, the attachment, and the
/// target, never for a concrete subtype.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Equality pin `target == value` at the given attachment point.
    Pin {
        at: Attachment,
        target: VarRef,
        value: f64,
    },
    /// Box bound `lower <= target <= upper` along the whole path. Either side
    /// may be open.
    Bound {
        target: VarRef,
        lower: Option<f64>,
        upper: Option<f64>,
    },
}

impl Constraint {
    /// An equality pin, e.g. `Constraint::pin(Attachment::AtEnd, VarRef::State(0), 50.0)`.
    pub fn pin(at: Attachment, target: VarRef, value: f64) -> Self {
        Self::Pin { at, target, value }
    }

    /// A two-sided path bound.
    pub fn bound(target: VarRef, lower: f64, upper: f64) -> Self {
        Self::Bound {
            target,
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    /// A one-sided lower path bound, e.g. `a >= 0`.
    pub fn lower_bound(target: VarRef, lower: f64) -> Self {
        Self::Bound {
            target,
            lower: Some(lower),
            upper: None,
        }
    }

    /// A one-sided upper path bound.
    pub fn upper_bound(target: VarRef, upper: f64) -> Self {
        Self::Bound {
            target,
            lower: None,
            upper: Some(upper),
        }
    }

    /// A symmetric path bound `|target| <= mag`, e.g. a rudder deflection limit.
    pub fn symmetric_bound(target: VarRef, mag: f64) -> Self {
        Self::bound(target, -mag, mag)
    }

    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::Pin { .. } => ConstraintKind::Equality,
            Constraint::Bound { .. } => ConstraintKind::Inequality,
        }
    }

    pub fn attachment(&self) -> Attachment {
        match self {
            Constraint::Pin { at, .. } => *at,
            Constraint::Bound { .. } => Attachment::Path,
        }
    }

    pub fn target(&self) -> VarRef {
        match self {
            Constraint::Pin { target, .. } => *target,
            Constraint::Bound { target, .. } => *target,
        }
    }

    /// Signed violation of this constraint for a sampled value of its target:
    /// zero when satisfied, positive magnitude otherwise.
    pub fn violation(&self, value: f64) -> f64 {
        match self {
            Constraint::Pin { value: v, .. } => (value - v).abs(),
            Constraint::Bound { lower, upper, .. } => {
                let below = lower.map_or(0.0, |lo| (lo - value).max(0.0));
                let above = upper.map_or(0.0, |up| (value - up).max(0.0));
                below + above
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constraint::Pin { at, target, value } => {
                write!(f, "{target} == {value} ({at:?})")
            }
            Constraint::Bound {
                target,
                lower,
                upper,
            } => match (lower, upper) {
                (Some(lo), Some(up)) => write!(f, "{lo} <= {target} <= {up}"),
                (Some(lo), None) => write!(f, "{target} >= {lo}"),
                (None, Some(up)) => write!(f, "{target} <= {up}"),
                (None, None) => write!(f, "{target} unbounded"),
            },
        }
    }
}

#[cfg(test)]
mod ut_constraint {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn violation_measures() {
        let pin = Constraint::pin(Attachment::AtEnd, VarRef::State(0), 50.0);
        assert_abs_diff_eq!(pin.violation(50.0), 0.0);
        assert_abs_diff_eq!(pin.violation(48.5), 1.5);

        let bound = Constraint::symmetric_bound(VarRef::Control(0), 0.5);
        assert_abs_diff_eq!(bound.violation(0.2), 0.0);
        assert_abs_diff_eq!(bound.violation(-0.7), 0.2, epsilon = 1e-12);

        let one_sided = Constraint::lower_bound(VarRef::Control(1), 0.0);
        assert_abs_diff_eq!(one_sided.violation(5.0), 0.0);
        assert_abs_diff_eq!(one_sided.violation(-0.25), 0.25);
    }

    #[test]
    fn kinds_and_attachments() {
        let pin = Constraint::pin(Attachment::AtStart, VarRef::State(2), 0.0);
        assert_eq!(pin.kind(), ConstraintKind::Equality);
        assert_eq!(pin.attachment(), Attachment::AtStart);

        let bound = Constraint::upper_bound(VarRef::State(4), 15.0);
        assert_eq!(bound.kind(), ConstraintKind::Inequality);
        assert_eq!(bound.attachment(), Attachment::Path);
    }
}
