//! The bitwidth gadget: a range bound at or below the primitive limit is
//! one AIR range constraint; a wider bound decomposes the register into
//! computed pieces, each primitively range-checked, plus one vanishing
//! constraint tying the pieces back to the source column.

use airlift_mir::{
    field, limbs::limb_widths, Assignment, Direction, Domain, Expr, RangeConstraint,
};
use p3_field::PrimeField;

use crate::{
    lower::{column_of, Lowerer},
    schema::{AirConstraint, AirRange, AirTerm, ColumnAccess},
};

impl<F: PrimeField> Lowerer<'_, F> {
    pub(crate) fn lower_range(&mut self, constraint: &RangeConstraint) {
        for (access, bitwidth) in constraint.sources.iter().zip(&constraint.bitwidths) {
            if *bitwidth == 0 {
                continue;
            }
            if *bitwidth <= self.config.max_range_constraint {
                self.module.constraints.push(AirConstraint::Range(AirRange {
                    handle: constraint.handle.clone(),
                    module: constraint.module,
                    access: column_of(access),
                    bitwidth: *bitwidth,
                }));
                continue;
            }

            // Decompose into pieces of at most the primitive width.
            let piece_widths = limb_widths(*bitwidth, self.config.max_range_constraint);
            let pieces: Vec<_> = piece_widths
                .iter()
                .map(|width| self.fresh_register("part", *width))
                .collect();
            self.module.assignments.push(Assignment::Computed {
                expr: Expr::access(*access),
                direction: Direction::Forward,
                module: constraint.module,
                targets: pieces.clone(),
            });
            let mut weighted = Vec::with_capacity(pieces.len());
            let mut offset = 0usize;
            for (piece, width) in pieces.iter().zip(&piece_widths) {
                self.widths.record_computed(*piece, *width);
                self.module.constraints.push(AirConstraint::Range(AirRange {
                    handle: constraint.handle.clone(),
                    module: constraint.module,
                    access: ColumnAccess::new(*piece),
                    bitwidth: *width,
                }));
                weighted.push(AirTerm::product(vec![
                    AirTerm::Constant(field::two_pow_n::<F>(offset)),
                    AirTerm::column(ColumnAccess::new(*piece).at_shift(access.shift)),
                ]));
                offset += width;
            }
            // The pieces reassemble the source column.
            self.push_vanishing(
                "recompose",
                Domain::All,
                AirTerm::sub(vec![
                    AirTerm::sum(weighted),
                    AirTerm::column(column_of(access)),
                ]),
            );
        }
    }
}
