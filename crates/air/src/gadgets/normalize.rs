//! The normalise gadget: compiles `Norm(x)` by introducing a fresh computed
//! inverse column and the constraint `x * (x * inv - 1) = 0`, returning the
//! boolean term `x * inv`.

use airlift_mir::{Assignment, Direction, Domain, Expr, RegisterAccess};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use p3_field::{Field, PrimeField};

use crate::{
    lower::Lowerer,
    schema::{AirTerm, ColumnAccess},
};

impl<F: PrimeField> Lowerer<'_, F> {
    /// A term equal to 0 when `x = 0` and to 1 otherwise.
    ///
    /// Optimisations (level 1): a term already in `{0,1}` is its own
    /// normalisation; a term in `{-1,0,1}` normalises to its square. When
    /// the whole term sits at one nonzero shift, the shift is factored out
    /// first so the inverse column is shared across shifted uses.
    pub(crate) fn norm_term(&mut self, x: AirTerm<F>) -> AirTerm<F> {
        if self.config.shift_normalisation {
            if let Some((lo, hi)) = x.shift_range() {
                if lo == hi && lo != 0 {
                    let rebased = self.norm_term(x.apply_shift(-lo));
                    return rebased.apply_shift(lo);
                }
            }
        }
        if self.config.inverse_elimination_level >= 1 {
            let range = x.value_range(&self.widths);
            if range.is_boolean() {
                return x;
            }
            if range.is_sign() {
                return AirTerm::product(vec![x.clone(), x]);
            }
        }
        if let Some(cached) = self.norm_cache_get(&x) {
            return cached;
        }
        let inverse = self.fresh_register("inv", self.bandwidth);
        // Lowering runs after concretization, so the column can be filled by
        // the field-specific Fermat inverse x^(p-2) (which maps 0 to 0, as
        // the constraint needs). Fields wider than 64 bits fall back to an
        // opaque native computation.
        let assignment = match inverse_exponent::<F>() {
            Some(exponent) => Assignment::Computed {
                expr: Expr::exp(self.term_to_expr(&x), exponent),
                direction: Direction::Forward,
                module: self.module_id,
                targets: vec![inverse],
            },
            None => Assignment::Native {
                function: "inverse".to_string(),
                targets: vec![inverse],
                sources: x.registers_read(),
            },
        };
        self.module.assignments.push(assignment);
        let inverse_column = AirTerm::column(ColumnAccess::new(inverse));
        // x * (x * inv - 1) = 0: inv is exact on nonzero rows and free on
        // zero rows, where x * inv = 0.
        self.push_vanishing(
            "norm",
            Domain::All,
            AirTerm::product(vec![
                x.clone(),
                AirTerm::sub(vec![
                    AirTerm::product(vec![x.clone(), inverse_column.clone()]),
                    AirTerm::one(),
                ]),
            ]),
        );
        let normalised = AirTerm::product(vec![x.clone(), inverse_column]);
        self.norm_cache_put(x, normalised.clone());
        normalised
    }

    /// Rebuilds an AIR term as a MIR expression, resolving column widths
    /// against the module's register table. Used for gadget assignments.
    pub(crate) fn term_to_expr(&self, term: &AirTerm<F>) -> Expr<F> {
        match term {
            AirTerm::Constant(c) => Expr::constant(*c),
            AirTerm::Column(access) => {
                let width = self.module.register(access.register).width;
                Expr::access(RegisterAccess {
                    register: access.register,
                    bitwidth: width,
                    mask: access.mask.unwrap_or(width),
                    shift: access.shift,
                })
            }
            AirTerm::Sum(ts) => Expr::sum(ts.iter().map(|t| self.term_to_expr(t)).collect()),
            AirTerm::Sub(ts) => Expr::sub(ts.iter().map(|t| self.term_to_expr(t)).collect()),
            AirTerm::Product(ts) => {
                Expr::product(ts.iter().map(|t| self.term_to_expr(t)).collect())
            }
        }
    }
}

/// `p - 2` when it fits the exponent range of `Exp`.
fn inverse_exponent<F: Field>() -> Option<u64> {
    (F::order() - BigUint::from(2u32)).to_u64()
}
