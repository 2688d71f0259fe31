//! Splitting a polynomial equation `P = 0` into a little-endian sequence of
//! digit equations over 2-adic coefficient boundaries.
//!
//! At each boundary `b` the low digit satisfies `low = 2^b * k` for the
//! outgoing carry `k` whenever the whole equation holds. A carry interval of
//! `{0}` cuts for free; otherwise a fresh unsigned carry register is
//! allocated (negative carries are offset-shifted) and filled by the ring
//! computation `offset - high`, which equals the true carry on every
//! satisfying row and uses no field-specific constants, so it survives
//! concretization. The conjunction of the digit equations is equivalent to
//! `P = 0` on any row where registers obey their widths: the digits
//! telescope back to `P`.

use airlift_mir::{
    field,
    poly::{AccessKey, Poly},
    Expr, FieldConfig, Logical, ValueRange,
};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use p3_field::PrimeField;

use crate::vanishing::SplitContext;

/// One digit equation, already rendered as `lhs = rhs` with both sides
/// nonnegative.
pub(crate) struct Digit<F> {
    pub lhs: Expr<F>,
    pub rhs: Expr<F>,
}

/// Splits `poly = 0` into digit equations, allocating carries through
/// `context` under the given path condition.
pub(crate) fn split<F: PrimeField>(
    poly: Poly,
    config: &FieldConfig,
    context: &mut SplitContext<F>,
    path: &Option<Logical<F>>,
) -> Vec<Digit<F>> {
    let mut digits = Vec::new();
    let mut current = poly;
    loop {
        if current.is_zero() {
            break;
        }
        // Normalise out the common power of two.
        let common = current.min_valuation().unwrap_or(0);
        if common > 0 {
            current = current.divide_pow2(common);
        }
        let boundary = match current.next_valuation_above(0) {
            None => {
                // A single digit remains.
                check_bandwidth(&current.value_range(&context.widths[..]), config);
                digits.push(render(&current));
                break;
            }
            Some(boundary) => boundary,
        };
        let (low, high) = current.partition_at(boundary);
        let low_range = low.value_range(&context.widths[..]);
        let (carry_lo, carry_hi) = low_range.carry_interval(boundary as usize);
        if carry_lo.is_zero() && carry_hi.is_zero() {
            // The carry vanishes on every well-typed row: a free cut.
            check_bandwidth(&low_range, config);
            digits.push(render(&low));
            current = high;
            continue;
        }
        // Shift the carry to be unsigned: k' = k + offset >= 0.
        let offset = if carry_lo.is_negative() {
            -&carry_lo
        } else {
            BigInt::zero()
        };
        let carry_max = &carry_hi + &offset;
        let width = field::bits(carry_max.magnitude()).max(1);
        // On satisfying rows high + k' - offset = 0, so the carry column is
        // filled with offset - high.
        let computation: Expr<F> = Poly::constant(offset.clone()).sub(&high).to_expr();
        let carry = context.allocate_carry(width, computation, path);

        // Digit equation: low + 2^boundary * offset = 2^boundary * k'.
        let carry_key = AccessKey {
            register: carry,
            bitwidth: width,
            mask: width,
            shift: 0,
        };
        let carry_poly = Poly::var(carry_key);
        let weight = BigInt::from(1) << boundary;
        let digit = low
            .add(&Poly::constant(&offset * &weight))
            .sub(&carry_poly.scale(&weight));
        check_bandwidth(&digit.value_range(&context.widths[..]), config);
        digits.push(render(&digit));

        // Remaining equation: high + k' - offset = 0.
        current = high.add(&carry_poly).sub(&Poly::constant(offset));
    }
    digits
}

fn render<F: PrimeField>(poly: &Poly) -> Digit<F> {
    let (lhs, rhs) = poly.to_equation_sides::<F>();
    Digit {
        lhs,
        rhs: rhs.unwrap_or_else(Expr::zero),
    }
}

fn check_bandwidth(range: &ValueRange, config: &FieldConfig) {
    let needed = range
        .magnitude_bits()
        .expect("digit equation over unbounded registers");
    assert!(
        needed <= config.bandwidth,
        "incompatible bitwidths ({needed} vs {})",
        config.bandwidth
    );
}
