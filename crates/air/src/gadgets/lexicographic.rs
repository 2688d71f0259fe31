//! The lexicographic sorting gadget. For successive participating rows it
//! introduces one boolean "differs here" marker per compared column and a
//! delta column holding the difference at the first differing column. The
//! markers locate the first difference, a range constraint forces the delta
//! to move in the configured direction, and with `strict` a difference must
//! exist on every transition.

use airlift_mir::{
    Assignment, Direction, Domain, Expr, RegisterAccess, SortedConstraint,
};
use p3_field::PrimeField;

use crate::{
    lower::{column_of, Lowerer},
    schema::{AirConstraint, AirRange, AirTerm, ColumnAccess},
};

impl<F: PrimeField> Lowerer<'_, F> {
    pub(crate) fn lower_sorted(&mut self, constraint: &SortedConstraint) {
        let columns = constraint.sources.len();
        assert!(columns > 0, "sorted constraint without columns");

        // The signed difference of column i across the transition, oriented
        // so that "in order" means nonnegative.
        let diff_expr = |i: usize| -> Expr<F> {
            let access = &constraint.sources[i];
            let current = Expr::access(*access);
            let next = Expr::access(access.at_shift(access.shift + 1));
            if constraint.signs[i] {
                Expr::sub(vec![next, current])
            } else {
                Expr::sub(vec![current, next])
            }
        };
        let diff_term = |i: usize| -> AirTerm<F> {
            let access = &constraint.sources[i];
            let current = AirTerm::column(column_of(access));
            let next = AirTerm::column(column_of(access).at_shift(access.shift + 1));
            if constraint.signs[i] {
                AirTerm::sub(vec![next, current])
            } else {
                AirTerm::sub(vec![current, next])
            }
        };

        // Fresh columns: one marker per compared column, one delta.
        let markers: Vec<_> = (0..columns)
            .map(|_| self.fresh_register("diff", 1))
            .collect();
        let delta = self.fresh_register("delta", constraint.bitwidth);
        for marker in &markers {
            self.widths.record_computed(*marker, 1);
        }
        self.widths.record_computed(delta, constraint.bitwidth);

        // Marker assignments: marker i is 1 exactly when i is the first
        // column whose values differ across the transition.
        for (i, marker) in markers.iter().enumerate() {
            let mut factors = vec![Expr::norm(diff_expr(i))];
            for j in 0..i {
                factors.push(Expr::sub(vec![Expr::one(), Expr::norm(diff_expr(j))]));
            }
            self.module.assignments.push(Assignment::Computed {
                expr: Expr::product(factors),
                direction: Direction::Forward,
                module: constraint.module,
                targets: vec![*marker],
            });
        }

        // Delta assignment: the difference at the marked column, less one
        // when strictness demands progress. With a selector the value is
        // gated to 0 on non-participating transitions so its range check
        // stays satisfiable there.
        let marked_difference = Expr::sum(
            (0..columns)
                .map(|i| {
                    Expr::product(vec![
                        Expr::access(RegisterAccess::new(markers[i], 1)),
                        diff_expr(i),
                    ])
                })
                .collect(),
        );
        let base = if constraint.strict {
            Expr::sub(vec![marked_difference, Expr::one()])
        } else {
            marked_difference
        };
        let delta_expr = match &constraint.selector {
            None => base,
            Some(selector) => Expr::product(vec![
                Expr::access(*selector),
                Expr::access(selector.at_shift(selector.shift + 1)),
                base,
            ]),
        };
        self.module.assignments.push(Assignment::Computed {
            expr: delta_expr,
            direction: Direction::Forward,
            module: constraint.module,
            targets: vec![delta],
        });

        // Gate: with a selector, only transitions between two selected rows
        // are constrained.
        let gate = constraint.selector.as_ref().map(|selector| {
            AirTerm::product(vec![
                AirTerm::column(column_of(selector)),
                AirTerm::column(column_of(selector).at_shift(selector.shift + 1)),
            ])
        });
        let gated = |term: AirTerm<F>| match &gate {
            None => term,
            Some(gate) => AirTerm::product(vec![gate.clone(), term]),
        };

        // Markers are boolean and at most one fires.
        for marker in &markers {
            let m = AirTerm::column(ColumnAccess::new(*marker));
            self.push_vanishing(
                "bool",
                Domain::All,
                AirTerm::sub(vec![AirTerm::product(vec![m.clone(), m.clone()]), m]),
            );
        }
        let marker_sum = AirTerm::sum(
            markers
                .iter()
                .map(|m| AirTerm::column(ColumnAccess::new(*m)))
                .collect(),
        );
        self.push_vanishing(
            "marker-sum",
            Domain::All,
            AirTerm::product(vec![
                marker_sum.clone(),
                AirTerm::sub(vec![marker_sum.clone(), AirTerm::one()]),
            ]),
        );

        // Columns before the first difference agree across the transition.
        let mut prefix = Vec::new();
        for (i, marker) in markers.iter().enumerate() {
            prefix.push(AirTerm::column(ColumnAccess::new(*marker)));
            let unmarked = AirTerm::sub(vec![AirTerm::one(), AirTerm::sum(prefix.clone())]);
            let difference = diff_term(i);
            self.push_vanishing(
                "prefix",
                Domain::All,
                gated(AirTerm::product(vec![unmarked, difference])),
            );
        }

        // The delta column equals the marked difference, less one under
        // strictness (so equal neighbours force the unsatisfiable
        // `delta = -1`), and its range bound forces the right direction.
        // The marked difference reads the next row, which scopes the
        // constraint to transitions.
        let marked_difference_term = AirTerm::sum(
            (0..columns)
                .map(|i| {
                    let m = AirTerm::column(ColumnAccess::new(markers[i]));
                    AirTerm::product(vec![m, diff_term(i)])
                })
                .collect(),
        );
        let mut link = vec![
            marked_difference_term,
            AirTerm::column(ColumnAccess::new(delta)),
        ];
        if constraint.strict {
            link.push(AirTerm::one());
        }
        self.push_vanishing("delta", Domain::All, gated(AirTerm::sub(link)));
        self.module.constraints.push(AirConstraint::Range(AirRange {
            handle: constraint.handle.clone(),
            module: constraint.module,
            access: ColumnAccess::new(delta),
            bitwidth: constraint.bitwidth,
        }));
    }
}
