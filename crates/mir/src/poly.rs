use std::collections::BTreeMap;

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Signed, Zero};
use p3_field::PrimeField;

use crate::{
    expr::{Expr, RegisterAccess},
    field,
    schema::RegisterId,
    value_range::{RegisterWidths, ValueRange},
};

/// Identifier of a polynomial variable: one masked, shifted column read.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessKey {
    pub register: RegisterId,
    pub bitwidth: usize,
    pub mask: usize,
    pub shift: i32,
}

impl From<RegisterAccess> for AccessKey {
    fn from(access: RegisterAccess) -> Self {
        Self {
            register: access.register,
            bitwidth: access.bitwidth,
            mask: access.mask,
            shift: access.shift,
        }
    }
}

impl AccessKey {
    pub fn to_access(self) -> RegisterAccess {
        RegisterAccess {
            register: self.register,
            bitwidth: self.bitwidth,
            mask: self.mask,
            shift: self.shift,
        }
    }

    fn range(&self, widths: &impl RegisterWidths) -> ValueRange {
        match widths.width(self.register) {
            Some(w) => ValueRange::bits(self.mask.min(w)),
            None => ValueRange::bits(self.mask),
        }
    }
}

/// Sorted `(variable, exponent)` pairs; exponents are at least 1.
pub type Vars = Vec<(AccessKey, u32)>;

/// A multivariate polynomial with signed integer coefficients. Field
/// constants enter through their signed canonical value, so subtraction
/// keeps magnitudes small instead of wrapping to near the field order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Poly {
    terms: BTreeMap<Vars, BigInt>,
}

/// Largest exponent unfolded when converting `Exp` terms to polynomials.
const MAX_EXP_EXPANSION: u64 = 8;

impl Poly {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: BigInt) -> Self {
        let mut poly = Self::zero();
        poly.accumulate(Vec::new(), value);
        poly
    }

    pub fn var(key: AccessKey) -> Self {
        let mut poly = Self::zero();
        poly.accumulate(vec![(key, 1)], BigInt::one());
        poly
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn num_monomials(&self) -> usize {
        self.terms.len()
    }

    pub fn monomials(&self) -> impl Iterator<Item = (&Vars, &BigInt)> {
        self.terms.iter()
    }

    fn accumulate(&mut self, vars: Vars, coefficient: BigInt) {
        if coefficient.is_zero() {
            return;
        }
        let entry = self.terms.entry(vars);
        match entry {
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(coefficient);
            }
            std::collections::btree_map::Entry::Occupied(mut o) => {
                *o.get_mut() += coefficient;
                if o.get().is_zero() {
                    o.remove();
                }
            }
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (vars, coefficient) in &other.terms {
            out.accumulate(vars.clone(), coefficient.clone());
        }
        out
    }

    pub fn sub(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (vars, coefficient) in &other.terms {
            out.accumulate(vars.clone(), -coefficient);
        }
        out
    }

    pub fn neg(&self) -> Self {
        Self {
            terms: self.terms.iter().map(|(v, c)| (v.clone(), -c)).collect(),
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        let mut out = Self::zero();
        for (vars_a, coeff_a) in &self.terms {
            for (vars_b, coeff_b) in &other.terms {
                out.accumulate(merge_vars(vars_a, vars_b), coeff_a * coeff_b);
            }
        }
        out
    }

    pub fn scale(&self, factor: &BigInt) -> Self {
        if factor.is_zero() {
            return Self::zero();
        }
        Self {
            terms: self
                .terms
                .iter()
                .map(|(v, c)| (v.clone(), c * factor))
                .collect(),
        }
    }

    /// Smallest 2-adic valuation across the coefficients, if any monomial
    /// exists.
    pub fn min_valuation(&self) -> Option<u64> {
        self.terms
            .values()
            .map(|c| c.trailing_zeros().expect("zero coefficient stored"))
            .min()
    }

    /// Smallest 2-adic valuation strictly above `floor`, if one exists.
    pub fn next_valuation_above(&self, floor: u64) -> Option<u64> {
        self.terms
            .values()
            .map(|c| c.trailing_zeros().expect("zero coefficient stored"))
            .filter(|v| *v > floor)
            .min()
    }

    /// Divides every coefficient by `2^bits`; they must all be divisible.
    pub fn divide_pow2(&self, bits: u64) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .map(|(v, c)| {
                    debug_assert!(c.trailing_zeros().unwrap() >= bits);
                    (v.clone(), c >> bits)
                })
                .collect(),
        }
    }

    /// Splits at bit position `bits`: returns `(low, high)` with
    /// `self = low + 2^bits * high`, where `low` keeps the coefficients of
    /// 2-adic valuation below `bits` unchanged and `high` holds the rest,
    /// divided by `2^bits`.
    pub fn partition_at(&self, bits: u64) -> (Self, Self) {
        let mut low = Self::zero();
        let mut high = Self::zero();
        for (vars, coefficient) in &self.terms {
            if coefficient.trailing_zeros().unwrap() < bits {
                low.accumulate(vars.clone(), coefficient.clone());
            } else {
                high.accumulate(vars.clone(), coefficient >> bits);
            }
        }
        (low, high)
    }

    pub fn value_range(&self, widths: &impl RegisterWidths) -> ValueRange {
        let mut out = ValueRange::exact(BigInt::zero());
        for (vars, coefficient) in &self.terms {
            let mut term = ValueRange::exact(coefficient.clone());
            for (key, power) in vars {
                term = term.mul(&key.range(widths).exp(*power as u64));
            }
            out = out.add(&term);
        }
        out
    }

    /// Converts an arithmetic term to its polynomial view. Returns `None`
    /// for terms with no polynomial meaning (`Norm`, `IfZero`, compound
    /// casts, oversized exponents).
    pub fn from_expr<F: PrimeField>(expr: &Expr<F>) -> Option<Self> {
        match expr {
            Expr::Constant(c) | Expr::Labelled(_, c) => {
                Some(Self::constant(field::signed_canonical(c)))
            }
            Expr::Access(access) => {
                if access.is_used() {
                    Some(Self::var((*access).into()))
                } else {
                    Some(Self::zero())
                }
            }
            Expr::Vector(limbs) => {
                let mut out = Self::zero();
                let mut offset = 0usize;
                for limb in limbs {
                    let weight = BigInt::from(BigUint::one() << offset);
                    out = out.add(&Self::var((*limb).into()).scale(&weight));
                    offset += limb.read_width();
                }
                Some(out)
            }
            Expr::Sum(ts) => {
                let mut out = Self::zero();
                for t in ts {
                    out = out.add(&Self::from_expr(t)?);
                }
                Some(out)
            }
            Expr::Sub(ts) => {
                let mut iter = ts.iter();
                let mut out = Self::from_expr(iter.next()?)?;
                for t in iter {
                    out = out.sub(&Self::from_expr(t)?);
                }
                Some(out)
            }
            Expr::Product(ts) => {
                let mut out = Self::constant(BigInt::one());
                for t in ts {
                    out = out.mul(&Self::from_expr(t)?);
                }
                Some(out)
            }
            Expr::Exp(t, k) => {
                if *k > MAX_EXP_EXPANSION {
                    return None;
                }
                let base = Self::from_expr(t)?;
                let mut out = Self::constant(BigInt::one());
                for _ in 0..*k {
                    out = out.mul(&base);
                }
                Some(out)
            }
            Expr::Cast(..) | Expr::Norm(_) | Expr::IfZero(..) => None,
        }
    }

    /// Reconstructs an arithmetic term: positive monomials minus negative
    /// ones, in the map's deterministic order.
    pub fn to_expr<F: PrimeField>(&self) -> Expr<F> {
        let (lhs, rhs) = self.to_equation_sides::<F>();
        match rhs {
            None => lhs,
            Some(rhs) => Expr::sub(vec![lhs, rhs]),
        }
    }

    /// The two sides of the equation `self = 0` with all coefficients
    /// nonnegative: `(positive part, negated negative part)`.
    pub fn to_equation_sides<F: PrimeField>(&self) -> (Expr<F>, Option<Expr<F>>) {
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        for (vars, coefficient) in &self.terms {
            if coefficient.is_negative() {
                negative.push(monomial_expr::<F>(&-coefficient, vars));
            } else {
                positive.push(monomial_expr::<F>(coefficient, vars));
            }
        }
        let lhs = Expr::sum(positive);
        if negative.is_empty() {
            (lhs, None)
        } else {
            (lhs, Some(Expr::sum(negative)))
        }
    }

    /// Reconstruction with common-factor extraction: the variable occurring
    /// in the most monomials (at least two) is factored out and both the
    /// factor and the remainder recurse.
    pub fn to_expr_factored<F: PrimeField>(&self) -> Expr<F> {
        if self.num_monomials() < 2 {
            return self.to_expr();
        }
        let mut counts: BTreeMap<AccessKey, usize> = BTreeMap::new();
        for (vars, _) in &self.terms {
            for (key, _) in vars {
                *counts.entry(*key).or_default() += 1;
            }
        }
        let best = counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .filter(|(_, count)| *count >= 2);
        let (var, _) = match best {
            Some(best) => best,
            None => return self.to_expr(),
        };
        let mut factored = Self::zero();
        let mut remainder = Self::zero();
        for (vars, coefficient) in &self.terms {
            match divide_once(vars, &var) {
                Some(reduced) => factored.accumulate(reduced, coefficient.clone()),
                None => remainder.accumulate(vars.clone(), coefficient.clone()),
            }
        }
        let product = Expr::product(vec![
            Expr::access(var.to_access()),
            factored.to_expr_factored::<F>(),
        ]);
        if remainder.is_zero() {
            product
        } else {
            Expr::sum(vec![product, remainder.to_expr_factored::<F>()])
        }
    }
}

fn monomial_expr<F: PrimeField>(coefficient: &BigInt, vars: &Vars) -> Expr<F> {
    debug_assert!(!coefficient.is_negative());
    let mut factors = Vec::with_capacity(vars.len() + 1);
    if !coefficient.is_one() || vars.is_empty() {
        factors.push(Expr::constant(field::from_biguint::<F>(
            coefficient.magnitude(),
        )));
    }
    for (key, power) in vars {
        factors.push(Expr::exp(Expr::access(key.to_access()), *power as u64));
    }
    Expr::product(factors)
}

fn merge_vars(a: &Vars, b: &Vars) -> Vars {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push((a[i].0, a[i].1 + b[j].1));
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Removes one power of `var` from the monomial, or `None` if absent.
fn divide_once(vars: &Vars, var: &AccessKey) -> Option<Vars> {
    let position = vars.iter().position(|(key, _)| key == var)?;
    let mut out = vars.clone();
    if out[position].1 > 1 {
        out[position].1 -= 1;
    } else {
        out.remove(position);
    }
    Some(out)
}
