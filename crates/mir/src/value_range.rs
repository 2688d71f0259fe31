use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::schema::RegisterId;

/// Source of declared (or effective) register widths for range analysis.
/// `None` means the register is unbounded at this layer.
pub trait RegisterWidths {
    fn width(&self, register: RegisterId) -> Option<usize>;
}

/// Widths read straight from a slice; handy in tests and gadgets.
impl RegisterWidths for [usize] {
    fn width(&self, register: RegisterId) -> Option<usize> {
        self.get(register.0).copied()
    }
}

/// A closed integer interval over-approximating the values a term can take.
/// A missing bound means the interval is unbounded in that direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueRange {
    pub lo: Option<BigInt>,
    pub hi: Option<BigInt>,
}

impl ValueRange {
    pub const UNBOUNDED: ValueRange = ValueRange { lo: None, hi: None };

    pub fn new(lo: BigInt, hi: BigInt) -> Self {
        debug_assert!(lo <= hi);
        Self {
            lo: Some(lo),
            hi: Some(hi),
        }
    }

    pub fn exact(value: BigInt) -> Self {
        Self::new(value.clone(), value)
    }

    /// `[0, 2^width - 1]`, the range of an unsigned `width`-bit register.
    pub fn bits(width: usize) -> Self {
        Self::new(
            BigInt::zero(),
            BigInt::from((BigUint::one() << width) - BigUint::one()),
        )
    }

    pub fn add(&self, other: &Self) -> Self {
        Self {
            lo: add_bounds(&self.lo, &other.lo),
            hi: add_bounds(&self.hi, &other.hi),
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self {
            lo: add_bounds(&self.lo, &other.hi.as_ref().map(|b| -b)),
            hi: add_bounds(&self.hi, &other.lo.as_ref().map(|b| -b)),
        }
    }

    pub fn neg(&self) -> Self {
        Self {
            lo: self.hi.as_ref().map(|b| -b),
            hi: self.lo.as_ref().map(|b| -b),
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        if self.is_exact_zero() || other.is_exact_zero() {
            return Self::exact(BigInt::zero());
        }
        match (&self.lo, &self.hi, &other.lo, &other.hi) {
            (Some(a), Some(b), Some(c), Some(d)) => {
                let products = [a * c, a * d, b * c, b * d];
                Self::new(
                    products.iter().min().unwrap().clone(),
                    products.iter().max().unwrap().clone(),
                )
            }
            _ => Self::UNBOUNDED,
        }
    }

    pub fn exp(&self, power: u64) -> Self {
        if power == 0 {
            return Self::exact(BigInt::one());
        }
        let mut out = self.clone();
        for _ in 1..power {
            out = out.mul(self);
        }
        out
    }

    /// Scales by a signed constant.
    pub fn scale(&self, factor: &BigInt) -> Self {
        self.mul(&Self::exact(factor.clone()))
    }

    /// Smallest interval containing both operands.
    pub fn union(&self, other: &Self) -> Self {
        let lo = match (&self.lo, &other.lo) {
            (Some(a), Some(b)) => Some(a.min(b).clone()),
            _ => None,
        };
        let hi = match (&self.hi, &other.hi) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            _ => None,
        };
        Self { lo, hi }
    }

    pub fn contains(&self, other: &Self) -> bool {
        let lo_ok = match (&self.lo, &other.lo) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a <= b,
        };
        let hi_ok = match (&self.hi, &other.hi) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a >= b,
        };
        lo_ok && hi_ok
    }

    pub fn contains_value(&self, value: &BigInt) -> bool {
        self.lo.as_ref().map_or(true, |lo| lo <= value)
            && self.hi.as_ref().map_or(true, |hi| hi >= value)
    }

    pub fn is_exact_zero(&self) -> bool {
        self.lo.as_ref().is_some_and(|b| b.is_zero())
            && self.hi.as_ref().is_some_and(|b| b.is_zero())
    }

    pub fn is_nonnegative(&self) -> bool {
        self.lo.as_ref().is_some_and(|b| !b.is_negative())
    }

    pub fn is_nonpositive(&self) -> bool {
        self.hi.as_ref().is_some_and(|b| !b.is_positive())
    }

    /// `true` when the interval is contained in `{0, 1}`.
    pub fn is_boolean(&self) -> bool {
        ValueRange::new(BigInt::zero(), BigInt::one()).contains(self)
    }

    /// `true` when the interval is contained in `{-1, 0, 1}`.
    pub fn is_sign(&self) -> bool {
        ValueRange::new(-BigInt::one(), BigInt::one()).contains(self)
    }

    /// Largest absolute value in the interval, if bounded.
    pub fn max_magnitude(&self) -> Option<BigUint> {
        let (lo, hi) = (self.lo.as_ref()?, self.hi.as_ref()?);
        Some(lo.magnitude().max(hi.magnitude()).clone())
    }

    /// Bits needed to hold the largest magnitude, if bounded.
    pub fn magnitude_bits(&self) -> Option<usize> {
        self.max_magnitude().map(|m| crate::field::bits(&m))
    }

    /// Whether every value of the interval evaluates without wrap-around in
    /// `bandwidth` bits.
    pub fn fits_bits(&self, bandwidth: usize) -> bool {
        self.magnitude_bits()
            .is_some_and(|needed| needed <= bandwidth)
    }

    /// The interval of `value / 2^shift` (exact division of interval ends,
    /// rounded inwards). Used to bound carries. Requires bounded operands.
    pub fn carry_interval(&self, shift: usize) -> (BigInt, BigInt) {
        let base = BigInt::from(BigUint::one() << shift);
        let lo = self
            .lo
            .as_ref()
            .expect("carry interval of unbounded range")
            .div_ceil(&base);
        let hi = self
            .hi
            .as_ref()
            .expect("carry interval of unbounded range")
            .div_floor(&base);
        (lo, hi)
    }
}

fn add_bounds(a: &Option<BigInt>, b: &Option<BigInt>) -> Option<BigInt> {
    Some(a.as_ref()? + b.as_ref()?)
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;
    use test_case::test_case;

    use super::*;

    #[test]
    fn bits_interval() {
        let r = ValueRange::bits(16);
        assert_eq!(r.hi, Some(BigInt::from(65535)));
        assert!(r.is_nonnegative());
        assert_eq!(r.magnitude_bits(), Some(16));
    }

    #[test]
    fn sub_flips_bounds() {
        let a = ValueRange::bits(8);
        let d = a.sub(&a);
        assert_eq!(d.lo, Some(BigInt::from(-255)));
        assert_eq!(d.hi, Some(BigInt::from(255)));
        assert!(!d.is_nonnegative());
    }

    #[test]
    fn mul_takes_extreme_products() {
        let a = ValueRange::new(BigInt::from(-2), BigInt::from(3));
        let b = ValueRange::new(BigInt::from(-5), BigInt::from(7));
        let m = a.mul(&b);
        assert_eq!(m.lo, Some(BigInt::from(-14)));
        assert_eq!(m.hi, Some(BigInt::from(21)));
    }

    #[test]
    fn mul_by_unbounded_stays_unbounded() {
        let a = ValueRange::bits(4);
        assert_eq!(a.mul(&ValueRange::UNBOUNDED), ValueRange::UNBOUNDED);
        let zero = ValueRange::exact(BigInt::zero());
        assert_eq!(zero.mul(&ValueRange::UNBOUNDED), zero);
    }

    #[test_case(0, 1, 1 ; "zeroth power is one")]
    #[test_case(1, -15, 15 ; "first power is identity")]
    #[test_case(2, -225, 225 ; "square bound")]
    fn exp_bounds(power: u64, lo: i64, hi: i64) {
        let a = ValueRange::new(BigInt::from(-15), BigInt::from(15));
        let e = a.exp(power);
        assert_eq!(e, ValueRange::new(BigInt::from(lo), BigInt::from(hi)));
    }

    #[test]
    fn carry_interval_rounds_inwards() {
        // [-65535, 131070] / 2^16 -> [0, 1]
        let r = ValueRange::new(BigInt::from(-65535), BigInt::from(131070));
        assert_eq!(r.carry_interval(16), (BigInt::from(0), BigInt::from(1)));
        // [-65536, 65535] / 2^16 -> [-1, 0]
        let r = ValueRange::new(BigInt::from(-65536), BigInt::from(65535));
        assert_eq!(r.carry_interval(16), (BigInt::from(-1), BigInt::from(0)));
    }
}
