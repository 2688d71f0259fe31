//! The vanishing rewrite: limb substitution plus equation splitting, with a
//! path condition threaded explicitly through `Ite` branches so that carry
//! registers allocated inside a branch are defined as 0 on rows where the
//! branch is inactive.

use airlift_mir::{
    poly::Poly, Allocator, ContextualAllocator, Expr, FieldConfig, Logical, RegisterId,
    RegisterLimbsMap, VanishingConstraint,
};
use p3_field::PrimeField;

use crate::{equation, expr};

/// Shared state of one module's constraint rewrites: the allocator plus the
/// width table covering both the limb registers and the carries allocated so
/// far (carry ids continue the register id sequence, so a plain vector
/// indexed by id works as the width oracle).
pub(crate) struct SplitContext<F> {
    allocator: Allocator<F>,
    pub(crate) widths: Vec<usize>,
}

impl<F: PrimeField> SplitContext<F> {
    pub(crate) fn new(allocator: Allocator<F>, widths: Vec<usize>) -> Self {
        Self { allocator, widths }
    }

    pub(crate) fn allocate_carry(
        &mut self,
        width: usize,
        computation: Expr<F>,
        path: &Option<Logical<F>>,
    ) -> RegisterId {
        let mut contextual = ContextualAllocator::with_path(&mut self.allocator, path.clone());
        let id = contextual.allocate_with("k", width, computation);
        self.widths.push(width);
        id
    }

    pub(crate) fn into_allocator(self) -> Allocator<F> {
        self.allocator
    }
}

/// Rewrites one vanishing (or assertion) constraint.
pub(crate) fn subdivide_vanishing<F: PrimeField>(
    constraint: &VanishingConstraint<F>,
    map: &RegisterLimbsMap,
    config: &FieldConfig,
    context: &mut SplitContext<F>,
) -> VanishingConstraint<F> {
    let (target, hoisted) = rewrite(&constraint.property, map, config, context, &None);
    let property = Logical::conjunct(vec![hoisted, target]).simplify(true);
    VanishingConstraint {
        handle: constraint.handle.clone(),
        module: constraint.module,
        domain: constraint.domain,
        property,
    }
}

/// Returns `(target, context)`: the rewritten property mirroring the source
/// structure, and equations that must hold unconditionally (hoisted out of
/// `Ite` conditions).
fn rewrite<F: PrimeField>(
    logical: &Logical<F>,
    map: &RegisterLimbsMap,
    config: &FieldConfig,
    context: &mut SplitContext<F>,
    path: &Option<Logical<F>>,
) -> (Logical<F>, Logical<F>) {
    match logical {
        Logical::Equal(a, b) => (
            split_atom(a, b, false, map, config, context, path),
            Logical::tautology(),
        ),
        Logical::NotEqual(a, b) => (
            split_atom(a, b, true, map, config, context, path),
            Logical::tautology(),
        ),
        Logical::Inequality { strict, lhs, rhs } => (
            // No ordering over digits: inequalities keep their shape under
            // plain limb substitution.
            Logical::inequality(
                *strict,
                expr::subdivide_expr(lhs, map),
                expr::subdivide_expr(rhs, map),
            ),
            Logical::tautology(),
        ),
        Logical::Conjunct(ts) => {
            let mut targets = Vec::with_capacity(ts.len());
            let mut hoisted = Vec::new();
            for t in ts {
                let (target, ctx) = rewrite(t, map, config, context, path);
                targets.push(target);
                hoisted.push(ctx);
            }
            (Logical::conjunct(targets), Logical::conjunct(hoisted))
        }
        Logical::Disjunct(ts) => {
            let mut targets = Vec::with_capacity(ts.len());
            let mut hoisted = Vec::new();
            for t in ts {
                let (target, ctx) = rewrite(t, map, config, context, path);
                targets.push(target);
                hoisted.push(ctx);
            }
            (Logical::disjunct(targets), Logical::conjunct(hoisted))
        }
        Logical::Negate(t) => rewrite(&t.negate(), map, config, context, path),
        Logical::Ite(c, t, f) => {
            let (condition, condition_ctx) = rewrite(c, map, config, context, path);
            let mut hoisted = vec![condition_ctx];
            let if_true = t.as_ref().map(|t| {
                let extended = extend_path(path, condition.clone());
                let (target, ctx) = rewrite(t, map, config, context, &extended);
                hoisted.push(ctx);
                target
            });
            let if_false = f.as_ref().map(|f| {
                let extended = extend_path(path, condition.negate());
                let (target, ctx) = rewrite(f, map, config, context, &extended);
                hoisted.push(ctx);
                target
            });
            (
                Logical::ite(condition, if_true, if_false),
                Logical::conjunct(hoisted),
            )
        }
    }
}

fn extend_path<F: PrimeField>(
    path: &Option<Logical<F>>,
    condition: Logical<F>,
) -> Option<Logical<F>> {
    Some(match path {
        None => condition,
        Some(existing) => Logical::conjunct(vec![existing.clone(), condition]),
    })
}

/// Rewrites one `Equal`/`NotEqual` atom. Atoms reading only unsplit
/// registers get plain limb substitution, which keeps subdivision
/// idempotent; everything else goes through the polynomial digit split.
fn split_atom<F: PrimeField>(
    a: &Expr<F>,
    b: &Expr<F>,
    negated: bool,
    map: &RegisterLimbsMap,
    config: &FieldConfig,
    context: &mut SplitContext<F>,
    path: &Option<Logical<F>>,
) -> Logical<F> {
    let atom = |a: Expr<F>, b: Expr<F>| {
        if negated {
            Logical::not_equal(a, b)
        } else {
            Logical::equal(a, b)
        }
    };
    // Atoms reading only unsplit registers still need the limb-id renaming,
    // but skip the digit split; this keeps subdivision idempotent.
    let split_needed = expr::splits_any(a, map) || expr::splits_any(b, map);
    let a = expr::subdivide_expr(a, map);
    let b = expr::subdivide_expr(b, map);
    if !split_needed {
        return atom(a, b);
    }
    let (pa, pb) = match (Poly::from_expr(&a), Poly::from_expr(&b)) {
        (Some(pa), Some(pb)) => (pa, pb),
        // Non-polynomial atoms (Norm, IfZero inside) are substituted only.
        _ => return atom(a, b),
    };
    let digits = equation::split(pa.sub(&pb), config, context, path);
    if digits.is_empty() {
        // Both sides cancelled: the atom is decided.
        return if negated {
            Logical::contradiction()
        } else {
            Logical::tautology()
        };
    }
    let parts: Vec<Logical<F>> = digits
        .into_iter()
        .map(|digit| atom(digit.lhs, digit.rhs))
        .collect();
    if negated {
        // At least one digit differs.
        Logical::disjunct(parts)
    } else {
        Logical::conjunct(parts)
    }
}
