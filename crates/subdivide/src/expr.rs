//! Limb substitution over terms: every register access becomes the
//! concatenation of accesses to its limbs, masked to the portion of the
//! original read each limb covers.

use airlift_mir::{Expr, Logical, RegisterAccess, RegisterLimbsMap};
use p3_field::PrimeField;

/// The limb accesses replacing `access`, least significant first. Limbs
/// beyond the masked portion of the read are dropped.
pub(crate) fn access_limbs(
    access: &RegisterAccess,
    map: &RegisterLimbsMap,
) -> Vec<RegisterAccess> {
    if !access.is_used() {
        return vec![*access];
    }
    let mut remaining = access.read_width();
    let mut out = Vec::new();
    for limb_id in map.limb_ids(access.register) {
        if remaining == 0 {
            break;
        }
        let width = map.limb(*limb_id).width;
        let mask = width.min(remaining);
        out.push(RegisterAccess {
            register: *limb_id,
            bitwidth: width,
            mask,
            shift: access.shift,
        });
        remaining -= mask;
    }
    out
}

/// Whether the map splits any register the term reads.
pub(crate) fn splits_any<F: PrimeField>(expr: &Expr<F>, map: &RegisterLimbsMap) -> bool {
    let mut accesses = Vec::new();
    expr.collect_accesses(&mut accesses);
    accesses
        .iter()
        .any(|a| a.is_used() && map.limb_ids(a.register).len() > 1)
}

pub(crate) fn subdivide_expr<F: PrimeField>(expr: &Expr<F>, map: &RegisterLimbsMap) -> Expr<F> {
    match expr {
        Expr::Constant(_) | Expr::Labelled(..) => expr.clone(),
        Expr::Access(access) => {
            let limbs = access_limbs(access, map);
            if limbs.is_empty() {
                Expr::zero()
            } else {
                Expr::vector(limbs)
            }
        }
        Expr::Vector(limbs) => {
            let flattened: Vec<RegisterAccess> = limbs
                .iter()
                .flat_map(|access| access_limbs(access, map))
                .collect();
            assert!(!flattened.is_empty(), "vector access split to nothing");
            Expr::vector(flattened)
        }
        Expr::Sum(ts) => Expr::sum(ts.iter().map(|t| subdivide_expr(t, map)).collect()),
        Expr::Sub(ts) => Expr::sub(ts.iter().map(|t| subdivide_expr(t, map)).collect()),
        Expr::Product(ts) => Expr::product(ts.iter().map(|t| subdivide_expr(t, map)).collect()),
        Expr::Exp(t, k) => Expr::exp(subdivide_expr(t, map), *k),
        Expr::Cast(t, w) => Expr::cast(subdivide_expr(t, map), *w),
        Expr::Norm(t) => Expr::norm(subdivide_expr(t, map)),
        Expr::IfZero(c, t, f) => Expr::if_zero(
            subdivide_logical(c, map),
            t.as_ref().map(|t| subdivide_expr(t, map)),
            f.as_ref().map(|f| subdivide_expr(f, map)),
        ),
    }
}

/// Limb substitution without equation splitting; used for lookup selectors,
/// assignment expressions and inequality atoms.
pub(crate) fn subdivide_logical<F: PrimeField>(
    logical: &Logical<F>,
    map: &RegisterLimbsMap,
) -> Logical<F> {
    logical.map_exprs(&|e| subdivide_expr(e, map))
}
