use std::{collections::HashMap, fmt};

use p3_field::{Field, PrimeField};

use crate::expr::{Expr, RegisterAccess};

/// Logical terms over a field `F`: the property language of vanishing and
/// assertion constraints.
///
/// The empty conjunct is the tautology and the empty disjunct the
/// contradiction; the canonical constructors collapse single-element
/// connectives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Logical<F> {
    Equal(Box<Expr<F>>, Box<Expr<F>>),
    NotEqual(Box<Expr<F>>, Box<Expr<F>>),
    /// `lhs < rhs` when strict, `lhs <= rhs` otherwise, comparing canonical
    /// unsigned values.
    Inequality {
        strict: bool,
        lhs: Box<Expr<F>>,
        rhs: Box<Expr<F>>,
    },
    Conjunct(Vec<Logical<F>>),
    Disjunct(Vec<Logical<F>>),
    Negate(Box<Logical<F>>),
    /// When the condition holds the first branch must hold, otherwise the
    /// second; an absent branch is vacuously true.
    Ite(
        Box<Logical<F>>,
        Option<Box<Logical<F>>>,
        Option<Box<Logical<F>>>,
    ),
}

impl<F: Field> Logical<F> {
    pub fn tautology() -> Self {
        Logical::Conjunct(Vec::new())
    }

    pub fn contradiction() -> Self {
        Logical::Disjunct(Vec::new())
    }

    pub fn is_tautology(&self) -> bool {
        matches!(self, Logical::Conjunct(ts) if ts.is_empty())
    }

    pub fn is_contradiction(&self) -> bool {
        matches!(self, Logical::Disjunct(ts) if ts.is_empty())
    }

    pub fn equal(lhs: Expr<F>, rhs: Expr<F>) -> Self {
        Logical::Equal(Box::new(lhs), Box::new(rhs))
    }

    /// `expr = 0`.
    pub fn vanishes(expr: Expr<F>) -> Self {
        Logical::equal(expr, Expr::zero())
    }

    pub fn not_equal(lhs: Expr<F>, rhs: Expr<F>) -> Self {
        Logical::NotEqual(Box::new(lhs), Box::new(rhs))
    }

    pub fn inequality(strict: bool, lhs: Expr<F>, rhs: Expr<F>) -> Self {
        Logical::Inequality {
            strict,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn conjunct(terms: Vec<Logical<F>>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Logical::Conjunct(inner) => flat.extend(inner),
                other if other.is_tautology() => {}
                other => flat.push(other),
            }
        }
        if flat.iter().any(Logical::is_contradiction) {
            return Logical::contradiction();
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Logical::Conjunct(flat)
        }
    }

    pub fn disjunct(terms: Vec<Logical<F>>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Logical::Disjunct(inner) => flat.extend(inner),
                other if other.is_contradiction() => {}
                other => flat.push(other),
            }
        }
        if flat.iter().any(Logical::is_tautology) {
            return Logical::tautology();
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            Logical::Disjunct(flat)
        }
    }

    pub fn ite(
        condition: Logical<F>,
        if_true: Option<Logical<F>>,
        if_false: Option<Logical<F>>,
    ) -> Self {
        match (if_true, if_false) {
            (None, None) => Logical::tautology(),
            (t, f) => Logical::Ite(Box::new(condition), t.map(Box::new), f.map(Box::new)),
        }
    }

    /// Logical negation with the connectives pushed inwards: `!Equal` becomes
    /// `NotEqual`, `!Conjunct` a disjunct of negations, and so on. `Ite` is
    /// first unfolded into its two guarded disjuncts.
    pub fn negate(&self) -> Self {
        match self {
            Logical::Equal(a, b) => Logical::NotEqual(a.clone(), b.clone()),
            Logical::NotEqual(a, b) => Logical::Equal(a.clone(), b.clone()),
            Logical::Inequality { strict, lhs, rhs } => Logical::Inequality {
                strict: !strict,
                lhs: rhs.clone(),
                rhs: lhs.clone(),
            },
            Logical::Conjunct(ts) => Logical::disjunct(ts.iter().map(Logical::negate).collect()),
            Logical::Disjunct(ts) => Logical::conjunct(ts.iter().map(Logical::negate).collect()),
            Logical::Negate(t) => (**t).clone(),
            Logical::Ite(..) => self.unfold_ite().negate(),
        }
    }

    /// Rewrites `Ite(c, t, f)` as `(!c or t) and (c or f)`, dropping absent
    /// branches.
    pub fn unfold_ite(&self) -> Self {
        match self {
            Logical::Ite(c, t, f) => {
                let mut parts = Vec::new();
                if let Some(t) = t {
                    parts.push(Logical::disjunct(vec![c.negate(), (**t).clone()]));
                }
                if let Some(f) = f {
                    parts.push(Logical::disjunct(vec![(**c).clone(), (**f).clone()]));
                }
                Logical::conjunct(parts)
            }
            other => other.clone(),
        }
    }

    pub fn apply_shift(&self, shift: i32) -> Self {
        if shift == 0 {
            return self.clone();
        }
        self.map_exprs(&|e| e.apply_shift(shift))
    }

    pub fn substitute(&self, bindings: &HashMap<String, F>) -> Self {
        self.map_exprs(&|e| e.substitute(bindings))
    }

    /// Rebuilds the tree with `f` applied to every arithmetic leaf.
    pub fn map_exprs(&self, f: &impl Fn(&Expr<F>) -> Expr<F>) -> Self {
        match self {
            Logical::Equal(a, b) => Logical::equal(f(a), f(b)),
            Logical::NotEqual(a, b) => Logical::not_equal(f(a), f(b)),
            Logical::Inequality { strict, lhs, rhs } => {
                Logical::inequality(*strict, f(lhs), f(rhs))
            }
            Logical::Conjunct(ts) => Logical::Conjunct(ts.iter().map(|t| t.map_exprs(f)).collect()),
            Logical::Disjunct(ts) => Logical::Disjunct(ts.iter().map(|t| t.map_exprs(f)).collect()),
            Logical::Negate(t) => Logical::Negate(Box::new(t.map_exprs(f))),
            Logical::Ite(c, t, ff) => Logical::Ite(
                Box::new(c.map_exprs(f)),
                t.as_ref().map(|t| Box::new(t.map_exprs(f))),
                ff.as_ref().map(|ff| Box::new(ff.map_exprs(f))),
            ),
        }
    }

    pub fn shift_range(&self) -> Option<(i32, i32)> {
        let mut out = None;
        self.for_each_expr(&mut |e| {
            if let Some((lo, hi)) = e.shift_range() {
                out = match out {
                    None => Some((lo, hi)),
                    Some((a, b)) => Some((a.min(lo), b.max(hi))),
                };
            }
        });
        out
    }

    pub fn collect_accesses(&self, out: &mut Vec<RegisterAccess>) {
        self.for_each_expr(&mut |e| e.collect_accesses(out));
    }

    pub fn for_each_expr(&self, f: &mut impl FnMut(&Expr<F>)) {
        match self {
            Logical::Equal(a, b) | Logical::NotEqual(a, b) => {
                f(a);
                f(b);
            }
            Logical::Inequality { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Logical::Conjunct(ts) | Logical::Disjunct(ts) => {
                for t in ts {
                    t.for_each_expr(f);
                }
            }
            Logical::Negate(t) => t.for_each_expr(f),
            Logical::Ite(c, t, ff) => {
                c.for_each_expr(f);
                if let Some(t) = t {
                    t.for_each_expr(f);
                }
                if let Some(ff) = ff {
                    ff.for_each_expr(f);
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            Logical::Equal(a, b) | Logical::NotEqual(a, b) => 1 + a.node_count() + b.node_count(),
            Logical::Inequality { lhs, rhs, .. } => 1 + lhs.node_count() + rhs.node_count(),
            Logical::Conjunct(ts) | Logical::Disjunct(ts) => {
                1 + ts.iter().map(Logical::node_count).sum::<usize>()
            }
            Logical::Negate(t) => 1 + t.node_count(),
            Logical::Ite(c, t, f) => {
                1 + c.node_count()
                    + t.as_ref().map_or(0, |t| t.node_count())
                    + f.as_ref().map_or(0, |f| f.node_count())
            }
        }
    }
}

impl<F: PrimeField> Logical<F> {
    /// Simplifies every arithmetic leaf and collapses decided comparisons.
    pub fn simplify(&self, keep_casts: bool) -> Self {
        match self {
            Logical::Equal(a, b) => {
                let (a, b) = (a.simplify(keep_casts), b.simplify(keep_casts));
                match (a.as_constant(), b.as_constant()) {
                    (Some(x), Some(y)) if x == y => Logical::tautology(),
                    (Some(x), Some(y)) if x != y => Logical::contradiction(),
                    _ => Logical::equal(a, b),
                }
            }
            Logical::NotEqual(a, b) => {
                let (a, b) = (a.simplify(keep_casts), b.simplify(keep_casts));
                match (a.as_constant(), b.as_constant()) {
                    (Some(x), Some(y)) if x != y => Logical::tautology(),
                    (Some(x), Some(y)) if x == y => Logical::contradiction(),
                    _ => Logical::not_equal(a, b),
                }
            }
            Logical::Inequality { strict, lhs, rhs } => {
                Logical::inequality(*strict, lhs.simplify(keep_casts), rhs.simplify(keep_casts))
            }
            Logical::Conjunct(ts) => {
                Logical::conjunct(ts.iter().map(|t| t.simplify(keep_casts)).collect())
            }
            Logical::Disjunct(ts) => {
                Logical::disjunct(ts.iter().map(|t| t.simplify(keep_casts)).collect())
            }
            Logical::Negate(t) => t.simplify(keep_casts).negate(),
            Logical::Ite(c, t, f) => {
                let cond = c.simplify(keep_casts);
                if cond.is_tautology() {
                    return t
                        .as_ref()
                        .map(|t| t.simplify(keep_casts))
                        .unwrap_or_else(Logical::tautology);
                }
                if cond.is_contradiction() {
                    return f
                        .as_ref()
                        .map(|f| f.simplify(keep_casts))
                        .unwrap_or_else(Logical::tautology);
                }
                Logical::ite(
                    cond,
                    t.as_ref().map(|t| t.simplify(keep_casts)),
                    f.as_ref().map(|f| f.simplify(keep_casts)),
                )
            }
        }
    }
}

impl<F: Field> fmt::Display for Logical<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logical::Equal(a, b) => write!(f, "{a} = {b}"),
            Logical::NotEqual(a, b) => write!(f, "{a} != {b}"),
            Logical::Inequality { strict, lhs, rhs } => {
                write!(f, "{lhs} {} {rhs}", if *strict { "<" } else { "<=" })
            }
            Logical::Conjunct(ts) if ts.is_empty() => write!(f, "true"),
            Logical::Disjunct(ts) if ts.is_empty() => write!(f, "false"),
            Logical::Conjunct(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " /\\ ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Logical::Disjunct(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " \\/ ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Logical::Negate(t) => write!(f, "!({t})"),
            Logical::Ite(c, t, ff) => {
                write!(f, "(if {c}")?;
                if let Some(t) = t {
                    write!(f, " then {t}")?;
                }
                if let Some(ff) = ff {
                    write!(f, " else {ff}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use p3_baby_bear::BabyBear;

    use super::*;
    use crate::schema::RegisterId;

    type E = Expr<BabyBear>;
    type L = Logical<BabyBear>;

    fn x() -> E {
        E::access(RegisterAccess::new(RegisterId(0), 8))
    }

    fn y() -> E {
        E::access(RegisterAccess::new(RegisterId(1), 8))
    }

    #[test]
    fn negation_pushes_through_connectives() {
        let l = L::conjunct(vec![L::equal(x(), y()), L::not_equal(x(), E::zero())]);
        let n = l.negate();
        assert_eq!(
            n,
            L::disjunct(vec![L::not_equal(x(), y()), L::equal(x(), E::zero())])
        );
    }

    #[test]
    fn negation_flips_inequalities() {
        let l = L::inequality(true, x(), y());
        assert_eq!(l.negate(), L::inequality(false, y(), x()));
    }

    #[test]
    fn ite_unfolds_to_guarded_disjuncts() {
        let cond = L::equal(x(), E::zero());
        let l = L::ite(
            cond.clone(),
            Some(L::equal(x(), y())),
            Some(L::not_equal(x(), y())),
        );
        let unfolded = l.unfold_ite();
        assert_eq!(
            unfolded,
            L::conjunct(vec![
                L::disjunct(vec![cond.negate(), L::equal(x(), y())]),
                L::disjunct(vec![cond, L::not_equal(x(), y())]),
            ])
        );
    }

    #[test]
    fn simplify_decides_constant_comparisons() {
        let l = L::equal(E::one(), E::one());
        assert!(l.simplify(false).is_tautology());
        let l = L::equal(E::one(), E::zero());
        assert!(l.simplify(false).is_contradiction());
    }

    #[test]
    fn conjunct_collapses_singleton() {
        let l = L::conjunct(vec![L::equal(x(), y())]);
        assert_eq!(l, L::equal(x(), y()));
    }

    #[test]
    fn disjunct_with_tautology_is_true() {
        let l = L::disjunct(vec![L::equal(x(), y()), L::tautology()]);
        assert!(l.is_tautology());
    }
}
