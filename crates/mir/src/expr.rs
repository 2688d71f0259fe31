use std::{collections::HashMap, fmt};

use p3_field::{Field, FieldAlgebra, PrimeField};

use crate::{
    field,
    logical::Logical,
    schema::RegisterId,
    value_range::{RegisterWidths, ValueRange},
};

/// A read of column `register` at row `current + shift`.
///
/// `bitwidth` is the declared width of the register; `mask <= bitwidth` is
/// the width actually read (masking is how `Cast` is realised on columns).
/// An access to [RegisterId::UNUSED] signals "no source" and always reads 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterAccess {
    pub register: RegisterId,
    pub bitwidth: usize,
    pub mask: usize,
    pub shift: i32,
}

impl RegisterAccess {
    pub fn new(register: RegisterId, bitwidth: usize) -> Self {
        Self {
            register,
            bitwidth,
            mask: bitwidth,
            shift: 0,
        }
    }

    pub fn masked(register: RegisterId, bitwidth: usize, mask: usize) -> Self {
        debug_assert!(mask <= bitwidth);
        Self {
            register,
            bitwidth,
            mask,
            shift: 0,
        }
    }

    pub fn unused() -> Self {
        Self::new(RegisterId::UNUSED, 0)
    }

    pub fn is_used(&self) -> bool {
        self.register.is_used()
    }

    pub fn at_shift(mut self, shift: i32) -> Self {
        self.shift = shift;
        self
    }

    /// The number of bits an evaluation of this access can occupy.
    pub fn read_width(&self) -> usize {
        self.mask.min(self.bitwidth)
    }
}

/// Arithmetic terms over a field `F`. Construction goes through the smart
/// constructors below, which keep terms in canonical form: nested sums and
/// products are flattened and constants coalesced.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr<F> {
    Constant(F),
    /// A named constant whose value may be re-bound by [Expr::substitute]
    /// before lowering; unsubstituted labels propagate as opaque constants.
    Labelled(String, F),
    Access(RegisterAccess),
    /// The unsigned integer `sum_i limb_i * 2^(sum_{j<i} read_width(limb_j))`,
    /// least-significant limb first.
    Vector(Vec<RegisterAccess>),
    Sum(Vec<Expr<F>>),
    /// `terms[0] - terms[1] - terms[2] - ...`
    Sub(Vec<Expr<F>>),
    Product(Vec<Expr<F>>),
    Exp(Box<Expr<F>>, u64),
    /// Keeps the low `usize` bits of the operand.
    Cast(Box<Expr<F>>, usize),
    /// 0 if the operand is 0, else 1.
    Norm(Box<Expr<F>>),
    /// Value of the first branch when the condition holds, of the second
    /// otherwise; an absent branch evaluates to 0.
    IfZero(
        Box<Logical<F>>,
        Option<Box<Expr<F>>>,
        Option<Box<Expr<F>>>,
    ),
}

impl<F: Field> Expr<F> {
    pub fn zero() -> Self {
        Expr::Constant(F::ZERO)
    }

    pub fn one() -> Self {
        Expr::Constant(F::ONE)
    }

    pub fn constant(value: F) -> Self {
        Expr::Constant(value)
    }

    pub fn labelled(name: impl Into<String>, value: F) -> Self {
        Expr::Labelled(name.into(), value)
    }

    pub fn access(access: RegisterAccess) -> Self {
        Expr::Access(access)
    }

    /// A vector access; collapses to a plain access when only one limb is
    /// present and its mask spans it entirely.
    pub fn vector(limbs: Vec<RegisterAccess>) -> Self {
        assert!(!limbs.is_empty(), "empty vector access");
        if limbs.len() == 1 {
            Expr::Access(limbs[0])
        } else {
            Expr::Vector(limbs)
        }
    }

    pub fn sum(terms: Vec<Expr<F>>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        let mut constant = F::ZERO;
        for term in terms {
            match term {
                Expr::Sum(inner) => {
                    for t in inner {
                        match t {
                            Expr::Constant(c) => constant += c,
                            other => flat.push(other),
                        }
                    }
                }
                Expr::Constant(c) => constant += c,
                other => flat.push(other),
            }
        }
        if constant != F::ZERO || flat.is_empty() {
            flat.push(Expr::Constant(constant));
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Expr::Sum(flat)
        }
    }

    /// `terms[0] - terms[1] - ...`. The subtrahends commute, so constant
    /// subtrahends coalesce into one trailing constant.
    pub fn sub(terms: Vec<Expr<F>>) -> Self {
        let mut iter = terms.into_iter();
        let head = match iter.next() {
            Some(h) => h,
            None => return Expr::zero(),
        };
        let mut flat = Vec::new();
        let mut constant = F::ZERO;
        let mut push_tail = |term: Expr<F>, flat: &mut Vec<Expr<F>>, constant: &mut F| match term {
            Expr::Constant(c) => *constant += c,
            other => flat.push(other),
        };
        // A subtracted head of a nested subtraction flattens.
        let head = match head {
            Expr::Sub(mut inner) => {
                let h = inner.remove(0);
                for t in inner {
                    push_tail(t, &mut flat, &mut constant);
                }
                h
            }
            other => other,
        };
        for term in iter {
            push_tail(term, &mut flat, &mut constant);
        }
        match head {
            Expr::Constant(h) if flat.is_empty() => return Expr::Constant(h - constant),
            h => {
                if constant != F::ZERO {
                    flat.push(Expr::Constant(constant));
                }
                if flat.is_empty() {
                    h
                } else {
                    let mut terms = vec![h];
                    terms.extend(flat);
                    Expr::Sub(terms)
                }
            }
        }
    }

    pub fn product(factors: Vec<Expr<F>>) -> Self {
        let mut flat = Vec::with_capacity(factors.len());
        let mut constant = F::ONE;
        for factor in factors {
            match factor {
                Expr::Product(inner) => {
                    for t in inner {
                        match t {
                            Expr::Constant(c) => constant *= c,
                            other => flat.push(other),
                        }
                    }
                }
                Expr::Constant(c) => constant *= c,
                other => flat.push(other),
            }
        }
        if constant == F::ZERO {
            return Expr::zero();
        }
        if constant != F::ONE || flat.is_empty() {
            flat.insert(0, Expr::Constant(constant));
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Expr::Product(flat)
        }
    }

    pub fn exp(base: Expr<F>, power: u64) -> Self {
        match (base, power) {
            (_, 0) => Expr::one(),
            (base, 1) => base,
            (Expr::Constant(c), k) => Expr::Constant(c.exp_u64(k)),
            (base, k) => Expr::Exp(Box::new(base), k),
        }
    }

    pub fn cast(term: Expr<F>, width: usize) -> Self {
        match term {
            // Masking a column read narrows its mask.
            Expr::Access(access) => Expr::Access(RegisterAccess {
                mask: access.mask.min(width),
                ..access
            }),
            Expr::Cast(inner, w) => Expr::Cast(inner, w.min(width)),
            other => Expr::Cast(Box::new(other), width),
        }
    }

    pub fn norm(term: Expr<F>) -> Self {
        match term {
            Expr::Constant(c) => {
                if c.is_zero() {
                    Expr::zero()
                } else {
                    Expr::one()
                }
            }
            Expr::Norm(inner) => Expr::Norm(inner),
            other => Expr::Norm(Box::new(other)),
        }
    }

    pub fn if_zero(
        condition: Logical<F>,
        if_true: Option<Expr<F>>,
        if_false: Option<Expr<F>>,
    ) -> Self {
        assert!(
            if_true.is_some() || if_false.is_some(),
            "IfZero needs at least one branch"
        );
        Expr::IfZero(
            Box::new(condition),
            if_true.map(Box::new),
            if_false.map(Box::new),
        )
    }

    pub fn as_constant(&self) -> Option<&F> {
        match self {
            Expr::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_access(&self) -> Option<&RegisterAccess> {
        match self {
            Expr::Access(access) => Some(access),
            _ => None,
        }
    }

    pub fn is_zero_constant(&self) -> bool {
        matches!(self, Expr::Constant(c) if c.is_zero())
    }

    /// Shifts every register access in the term by `shift` rows.
    pub fn apply_shift(&self, shift: i32) -> Self {
        if shift == 0 {
            return self.clone();
        }
        match self {
            Expr::Constant(_) | Expr::Labelled(..) => self.clone(),
            Expr::Access(a) => Expr::Access(a.at_shift(a.shift + shift)),
            Expr::Vector(limbs) => {
                Expr::Vector(limbs.iter().map(|a| a.at_shift(a.shift + shift)).collect())
            }
            Expr::Sum(ts) => Expr::Sum(ts.iter().map(|t| t.apply_shift(shift)).collect()),
            Expr::Sub(ts) => Expr::Sub(ts.iter().map(|t| t.apply_shift(shift)).collect()),
            Expr::Product(ts) => Expr::Product(ts.iter().map(|t| t.apply_shift(shift)).collect()),
            Expr::Exp(t, k) => Expr::Exp(Box::new(t.apply_shift(shift)), *k),
            Expr::Cast(t, w) => Expr::Cast(Box::new(t.apply_shift(shift)), *w),
            Expr::Norm(t) => Expr::Norm(Box::new(t.apply_shift(shift))),
            Expr::IfZero(c, t, f) => Expr::IfZero(
                Box::new(c.apply_shift(shift)),
                t.as_ref().map(|t| Box::new(t.apply_shift(shift))),
                f.as_ref().map(|f| Box::new(f.apply_shift(shift))),
            ),
        }
    }

    /// The `(min, max)` shift of any access in the term, or `None` when the
    /// term reads no register.
    pub fn shift_range(&self) -> Option<(i32, i32)> {
        match self {
            Expr::Constant(_) | Expr::Labelled(..) => None,
            Expr::Access(a) => Some((a.shift, a.shift)),
            Expr::Vector(limbs) => combine_shifts(limbs.iter().map(|a| Some((a.shift, a.shift)))),
            Expr::Sum(ts) | Expr::Sub(ts) | Expr::Product(ts) => {
                combine_shifts(ts.iter().map(|t| t.shift_range()))
            }
            Expr::Exp(t, _) | Expr::Cast(t, _) | Expr::Norm(t) => t.shift_range(),
            Expr::IfZero(c, t, f) => combine_shifts(
                [
                    c.shift_range(),
                    t.as_ref().and_then(|t| t.shift_range()),
                    f.as_ref().and_then(|f| f.shift_range()),
                ]
                .into_iter(),
            ),
        }
    }

    /// Replaces matching labelled constants with concrete values.
    pub fn substitute(&self, bindings: &HashMap<String, F>) -> Self {
        match self {
            Expr::Labelled(name, value) => match bindings.get(name) {
                Some(bound) => Expr::Constant(*bound),
                None => Expr::Labelled(name.clone(), *value),
            },
            Expr::Constant(_) | Expr::Access(_) | Expr::Vector(_) => self.clone(),
            Expr::Sum(ts) => Expr::sum(ts.iter().map(|t| t.substitute(bindings)).collect()),
            Expr::Sub(ts) => Expr::sub(ts.iter().map(|t| t.substitute(bindings)).collect()),
            Expr::Product(ts) => Expr::product(ts.iter().map(|t| t.substitute(bindings)).collect()),
            Expr::Exp(t, k) => Expr::exp(t.substitute(bindings), *k),
            Expr::Cast(t, w) => Expr::cast(t.substitute(bindings), *w),
            Expr::Norm(t) => Expr::norm(t.substitute(bindings)),
            Expr::IfZero(c, t, f) => Expr::if_zero(
                c.substitute(bindings),
                t.as_ref().map(|t| t.substitute(bindings)),
                f.as_ref().map(|f| f.substitute(bindings)),
            ),
        }
    }

    /// Collects every register access in evaluation order.
    pub fn collect_accesses(&self, out: &mut Vec<RegisterAccess>) {
        match self {
            Expr::Constant(_) | Expr::Labelled(..) => {}
            Expr::Access(a) => out.push(*a),
            Expr::Vector(limbs) => out.extend(limbs.iter().copied()),
            Expr::Sum(ts) | Expr::Sub(ts) | Expr::Product(ts) => {
                for t in ts {
                    t.collect_accesses(out);
                }
            }
            Expr::Exp(t, _) | Expr::Cast(t, _) | Expr::Norm(t) => t.collect_accesses(out),
            Expr::IfZero(c, t, f) => {
                c.collect_accesses(out);
                if let Some(t) = t {
                    t.collect_accesses(out);
                }
                if let Some(f) = f {
                    f.collect_accesses(out);
                }
            }
        }
    }

    /// The distinct registers read, in first-read order.
    pub fn registers_read(&self) -> Vec<RegisterId> {
        let mut accesses = Vec::new();
        self.collect_accesses(&mut accesses);
        let mut out = Vec::new();
        for access in accesses {
            if access.is_used() && !out.contains(&access.register) {
                out.push(access.register);
            }
        }
        out
    }

    pub fn node_count(&self) -> usize {
        match self {
            Expr::Constant(_) | Expr::Labelled(..) | Expr::Access(_) => 1,
            Expr::Vector(limbs) => 1 + limbs.len(),
            Expr::Sum(ts) | Expr::Sub(ts) | Expr::Product(ts) => {
                1 + ts.iter().map(Expr::node_count).sum::<usize>()
            }
            Expr::Exp(t, _) | Expr::Cast(t, _) | Expr::Norm(t) => 1 + t.node_count(),
            Expr::IfZero(c, t, f) => {
                1 + c.node_count()
                    + t.as_ref().map_or(0, |t| t.node_count())
                    + f.as_ref().map_or(0, |f| f.node_count())
            }
        }
    }
}

impl<F: PrimeField> Expr<F> {
    /// An integer interval over-approximating the term's value on any row
    /// where registers obey the given widths.
    pub fn value_range(&self, widths: &impl RegisterWidths) -> ValueRange {
        match self {
            Expr::Constant(c) | Expr::Labelled(_, c) => {
                ValueRange::exact(field::signed_canonical(c))
            }
            Expr::Access(a) => access_range(a, widths),
            Expr::Vector(limbs) => {
                let total: usize = limbs.iter().map(RegisterAccess::read_width).sum();
                ValueRange::bits(total)
            }
            Expr::Sum(ts) => ts
                .iter()
                .map(|t| t.value_range(widths))
                .fold(ValueRange::exact(0.into()), |acc, r| acc.add(&r)),
            Expr::Sub(ts) => {
                let mut iter = ts.iter();
                let head = iter
                    .next()
                    .map(|t| t.value_range(widths))
                    .unwrap_or(ValueRange::exact(0.into()));
                iter.fold(head, |acc, t| acc.sub(&t.value_range(widths)))
            }
            Expr::Product(ts) => ts
                .iter()
                .map(|t| t.value_range(widths))
                .fold(ValueRange::exact(1.into()), |acc, r| acc.mul(&r)),
            Expr::Exp(t, k) => t.value_range(widths).exp(*k),
            Expr::Cast(t, w) => {
                let inner = t.value_range(widths);
                if ValueRange::bits(*w).contains(&inner) {
                    inner
                } else {
                    ValueRange::bits(*w)
                }
            }
            Expr::Norm(_) => ValueRange::bits(1),
            Expr::IfZero(_, t, f) => {
                let branch = |b: &Option<Box<Expr<F>>>| {
                    b.as_ref()
                        .map(|b| b.value_range(widths))
                        .unwrap_or(ValueRange::exact(0.into()))
                };
                branch(t).union(&branch(f))
            }
        }
    }

    /// Constant-folds and applies the algebraic identities `x*1 = x`,
    /// `x+0 = x`, `x-x = 0`. With `keep_casts == false`, casts of constants
    /// fold away too.
    pub fn simplify(&self, keep_casts: bool) -> Self {
        match self {
            Expr::Constant(_) | Expr::Labelled(..) | Expr::Access(_) | Expr::Vector(_) => {
                self.clone()
            }
            Expr::Sum(ts) => Expr::sum(ts.iter().map(|t| t.simplify(keep_casts)).collect()),
            Expr::Sub(ts) => {
                let terms: Vec<_> = ts.iter().map(|t| t.simplify(keep_casts)).collect();
                // x - x = 0 (and generally, drop subtrahends equal to the
                // head while one is available).
                if let Some((head, tail)) = terms.split_first() {
                    if tail.len() == 1 && tail[0] == *head {
                        return Expr::zero();
                    }
                }
                Expr::sub(terms)
            }
            Expr::Product(ts) => Expr::product(ts.iter().map(|t| t.simplify(keep_casts)).collect()),
            Expr::Exp(t, k) => Expr::exp(t.simplify(keep_casts), *k),
            Expr::Cast(t, w) => {
                let inner = t.simplify(keep_casts);
                match inner {
                    Expr::Constant(c) if !keep_casts => Expr::Constant(field::mask_value(&c, *w)),
                    inner => Expr::cast(inner, *w),
                }
            }
            Expr::Norm(t) => Expr::norm(t.simplify(keep_casts)),
            Expr::IfZero(c, t, f) => {
                let cond = c.simplify(keep_casts);
                let t = t.as_ref().map(|t| t.simplify(keep_casts));
                let f = f.as_ref().map(|f| f.simplify(keep_casts));
                if cond.is_tautology() {
                    return t.unwrap_or_else(Expr::zero);
                }
                if cond.is_contradiction() {
                    return f.unwrap_or_else(Expr::zero);
                }
                Expr::if_zero(cond, t, f)
            }
        }
    }
}

fn access_range(access: &RegisterAccess, widths: &impl RegisterWidths) -> ValueRange {
    if !access.is_used() {
        return ValueRange::exact(0.into());
    }
    let declared = widths.width(access.register);
    match declared {
        Some(w) => ValueRange::bits(access.mask.min(w)),
        None => ValueRange::bits(access.mask),
    }
}

fn combine_shifts(ranges: impl Iterator<Item = Option<(i32, i32)>>) -> Option<(i32, i32)> {
    ranges
        .flatten()
        .reduce(|(lo_a, hi_a), (lo_b, hi_b)| (lo_a.min(lo_b), hi_a.max(hi_b)))
}

impl<F: Field> std::ops::Add for Expr<F> {
    type Output = Expr<F>;

    fn add(self, rhs: Self) -> Self::Output {
        Expr::sum(vec![self, rhs])
    }
}

impl<F: Field> std::ops::Sub for Expr<F> {
    type Output = Expr<F>;

    fn sub(self, rhs: Self) -> Self::Output {
        Expr::sub(vec![self, rhs])
    }
}

impl<F: Field> std::ops::Mul for Expr<F> {
    type Output = Expr<F>;

    fn mul(self, rhs: Self) -> Self::Output {
        Expr::product(vec![self, rhs])
    }
}

impl fmt::Display for RegisterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_used() {
            return write!(f, "_");
        }
        write!(f, "r{}", self.register.0)?;
        if self.mask < self.bitwidth {
            write!(f, ":u{}", self.mask)?;
        }
        if self.shift != 0 {
            write!(f, "@{:+}", self.shift)?;
        }
        Ok(())
    }
}

impl<F: Field> fmt::Display for Expr<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(
            f: &mut fmt::Formatter<'_>,
            terms: &[T],
            sep: &str,
        ) -> fmt::Result {
            for (i, t) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, "{sep}")?;
                }
                write!(f, "{t}")?;
            }
            Ok(())
        }
        match self {
            Expr::Constant(c) => write!(f, "{c}"),
            Expr::Labelled(name, _) => write!(f, "{name}"),
            Expr::Access(a) => write!(f, "{a}"),
            Expr::Vector(limbs) => {
                write!(f, "(")?;
                join(f, limbs, " :: ")?;
                write!(f, ")")
            }
            Expr::Sum(ts) => {
                write!(f, "(")?;
                join(f, ts, " + ")?;
                write!(f, ")")
            }
            Expr::Sub(ts) => {
                write!(f, "(")?;
                join(f, ts, " - ")?;
                write!(f, ")")
            }
            Expr::Product(ts) => join(f, ts, " * "),
            Expr::Exp(t, k) => write!(f, "({t})^{k}"),
            Expr::Cast(t, w) => write!(f, "cast({t}, u{w})"),
            Expr::Norm(t) => write!(f, "norm({t})"),
            Expr::IfZero(c, t, ff) => {
                write!(f, "(if {c}")?;
                if let Some(t) = t {
                    write!(f, " {t}")?;
                }
                if let Some(ff) = ff {
                    write!(f, " {ff}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use p3_baby_bear::BabyBear;
    use p3_field::FieldAlgebra;

    use super::*;

    type E = Expr<BabyBear>;

    fn acc(id: usize, width: usize) -> RegisterAccess {
        RegisterAccess::new(RegisterId(id), width)
    }

    #[test]
    fn sum_flattens_and_folds() {
        let e = E::sum(vec![
            E::access(acc(0, 8)),
            E::sum(vec![E::constant(BabyBear::TWO), E::access(acc(1, 8))]),
            E::constant(BabyBear::ONE),
        ]);
        match e {
            Expr::Sum(ts) => {
                assert_eq!(ts.len(), 3);
                assert_eq!(ts[2], E::constant(BabyBear::from_canonical_u32(3)));
            }
            other => panic!("expected flattened sum, got {other}"),
        }
    }

    #[test]
    fn sum_of_constants_is_constant() {
        let e = E::sum(vec![E::one(), E::one()]);
        assert_eq!(e, E::constant(BabyBear::TWO));
    }

    #[test]
    fn product_by_zero_collapses() {
        let e = E::product(vec![E::access(acc(0, 8)), E::zero()]);
        assert_eq!(e, E::zero());
    }

    #[test]
    fn product_drops_unit() {
        let e = E::product(vec![E::one(), E::access(acc(0, 8))]);
        assert_eq!(e, E::access(acc(0, 8)));
    }

    #[test]
    fn sub_folds_constant_tail() {
        let e = E::sub(vec![E::access(acc(0, 8)), E::one(), E::one()]);
        match e {
            Expr::Sub(ts) => {
                assert_eq!(ts.len(), 2);
                assert_eq!(ts[1], E::constant(BabyBear::TWO));
            }
            other => panic!("expected subtraction, got {other}"),
        }
    }

    #[test]
    fn cast_narrows_access_mask() {
        let e = E::cast(E::access(acc(0, 32)), 16);
        assert_eq!(e, E::access(RegisterAccess::masked(RegisterId(0), 32, 16)));
    }

    #[test]
    fn simplify_cancels_self_subtraction() {
        let x = E::access(acc(0, 8));
        let e = Expr::Sub(vec![x.clone(), x]);
        assert_eq!(e.simplify(false), E::zero());
    }

    #[test]
    fn shift_propagates() {
        let e = E::sum(vec![E::access(acc(0, 8)), E::access(acc(1, 8))]);
        let shifted = e.apply_shift(1);
        assert_eq!(shifted.shift_range(), Some((1, 1)));
        assert_eq!(e.shift_range(), Some((0, 0)));
    }

    #[test]
    fn value_range_of_masked_access() {
        let widths = vec![32usize];
        let e = E::access(RegisterAccess::masked(RegisterId(0), 32, 16));
        assert_eq!(e.value_range(&widths[..]), ValueRange::bits(16));
    }

    #[test]
    fn value_range_monotone_under_simplify() {
        let widths = vec![8usize, 8];
        let x = E::access(acc(0, 8));
        let e = Expr::Sub(vec![x.clone(), x]);
        let simplified = e.simplify(false);
        assert!(e
            .value_range(&widths[..])
            .contains(&simplified.value_range(&widths[..])));
    }

    #[test]
    fn substitute_binds_labels() {
        let e = E::labelled("N", BabyBear::ZERO);
        let mut bindings = HashMap::new();
        bindings.insert("N".to_string(), BabyBear::from_canonical_u32(7));
        assert_eq!(
            e.substitute(&bindings),
            E::constant(BabyBear::from_canonical_u32(7))
        );
    }
}
