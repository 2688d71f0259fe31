use std::collections::HashMap;

use p3_field::Field;

use crate::{
    expr::Expr,
    schema::{ModuleId, RegisterId},
};

/// Fill direction of a computed register during trace expansion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// Describes how the values of one or more computed registers are produced
/// when a trace is expanded. Assignments are owned by their module and are
/// not prover-enforced; constraints are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assignment<F> {
    /// Evaluates `expr` on every row. With a single target the value lands
    /// there directly; with several, the value is decomposed into
    /// consecutive chunks of the targets' widths, least significant first.
    Computed {
        expr: Expr<F>,
        direction: Direction,
        module: ModuleId,
        targets: Vec<RegisterId>,
    },
    /// Opaque computation performed by the trace expander under a well-known
    /// name (for example `"inverse"`).
    Native {
        function: String,
        targets: Vec<RegisterId>,
        sources: Vec<RegisterId>,
    },
    /// Fills the targets with a sorted permutation of the source rows,
    /// ordered lexicographically under the per-column signs.
    SortedPermutation {
        targets: Vec<RegisterId>,
        signs: Vec<bool>,
        sources: Vec<RegisterId>,
    },
}

impl<F> Assignment<F> {
    pub fn targets(&self) -> &[RegisterId] {
        match self {
            Assignment::Computed { targets, .. }
            | Assignment::Native { targets, .. }
            | Assignment::SortedPermutation { targets, .. } => targets,
        }
    }
}

impl<F: Field> Assignment<F> {
    /// Replaces matching labelled constants in the computed expression.
    pub fn substitute(&self, bindings: &HashMap<String, F>) -> Self {
        match self {
            Assignment::Computed {
                expr,
                direction,
                module,
                targets,
            } => Assignment::Computed {
                expr: expr.substitute(bindings),
                direction: *direction,
                module: *module,
                targets: targets.clone(),
            },
            other => other.clone(),
        }
    }
}
