//! Lookup subdivision: compute the per-column geometry, align every vector's
//! limbs against it, and pad short columns with the module's ZERO register.

use airlift_mir::{
    limbs::limb_widths, Expr, LimbsMap, LookupConstraint, LookupVector, ModuleId, RegisterAccess,
    RegisterId, Schema,
};
use itertools::Itertools;
use p3_field::PrimeField;

/// Per-module cache of the ZERO padding register.
#[derive(Clone, Debug)]
pub struct ZeroRegisters {
    cache: Vec<Option<RegisterId>>,
}

impl ZeroRegisters {
    pub fn new(num_modules: usize) -> Self {
        Self {
            cache: vec![None; num_modules],
        }
    }

    pub fn get(&self, module: ModuleId) -> Option<RegisterId> {
        self.cache[module.0]
    }

    pub(crate) fn put(&mut self, module: ModuleId, id: RegisterId) {
        self.cache[module.0] = Some(id);
    }
}

/// The per-column schedule of limb widths accommodating the widest source or
/// target in that column.
struct Geometry {
    columns: Vec<Vec<usize>>,
}

pub(crate) fn subdivide_lookup<F: PrimeField>(
    constraint: &LookupConstraint<F>,
    limbs: &LimbsMap,
    zero: &mut ZeroRegisters,
    target: &mut Schema<F>,
) -> LookupConstraint<F> {
    // Substitute limbs everywhere first; geometry is computed on the
    // subdivided terms.
    let targets: Vec<LookupVector<F>> = constraint
        .targets
        .iter()
        .map(|v| substitute_vector(v, limbs, &constraint.handle))
        .collect();
    let sources: Vec<LookupVector<F>> = constraint
        .sources
        .iter()
        .map(|v| substitute_vector(v, limbs, &constraint.handle))
        .collect();

    let geometry = compute_geometry(targets.iter().chain(&sources), limbs, target);

    LookupConstraint {
        handle: constraint.handle.clone(),
        targets: targets
            .iter()
            .map(|v| align_vector(v, &geometry, limbs, zero, target))
            .collect(),
        sources: sources
            .iter()
            .map(|v| align_vector(v, &geometry, limbs, zero, target))
            .collect(),
    }
}

fn substitute_vector<F: PrimeField>(
    vector: &LookupVector<F>,
    limbs: &LimbsMap,
    handle: &airlift_mir::Handle,
) -> LookupVector<F> {
    let map = limbs.module(vector.module);
    let selector = vector.selector.as_ref().map(|selector| {
        let substituted = crate::expr::subdivide_expr(selector, map);
        assert!(
            !matches!(substituted, Expr::Vector(_)),
            "lookup {handle:?}: selector splits into multiple limbs"
        );
        substituted
    });
    LookupVector {
        module: vector.module,
        selector,
        terms: vector
            .terms
            .iter()
            .map(|t| crate::expr::subdivide_expr(t, map))
            .collect(),
    }
}

fn compute_geometry<'a, F: PrimeField + 'a>(
    vectors: impl Iterator<Item = &'a LookupVector<F>> + Clone,
    limbs: &LimbsMap,
    target: &Schema<F>,
) -> Geometry {
    let arity = vectors
        .clone()
        .map(|v| v.terms.len())
        .all_equal_value()
        .expect("lookup vectors disagree on arity");
    let mut columns = Vec::with_capacity(arity);
    for column in 0..arity {
        let mut width = 0usize;
        for vector in vectors.clone() {
            let term = &vector.terms[column];
            let range = term.value_range(target.module(vector.module));
            assert!(range.is_nonnegative(), "signed lookup encountered");
            width = width.max(range.magnitude_bits().expect("unbounded lookup term"));
        }
        columns.push(limb_widths(width, limbs.field.max_register_width));
    }
    Geometry { columns }
}

fn align_vector<F: PrimeField>(
    vector: &LookupVector<F>,
    geometry: &Geometry,
    limbs: &LimbsMap,
    zero: &mut ZeroRegisters,
    target: &mut Schema<F>,
) -> LookupVector<F> {
    let mut terms = Vec::new();
    for (column, term) in vector.terms.iter().enumerate() {
        let schedule = &geometry.columns[column];
        match term {
            Expr::Vector(parts) => {
                // Every limb but the last must fill its geometry slot
                // exactly; the last may undershoot.
                assert!(
                    parts.len() <= schedule.len(),
                    "irregular lookup detected (u{} v u{})",
                    parts.iter().map(RegisterAccess::read_width).sum::<usize>(),
                    schedule.iter().sum::<usize>()
                );
                for (index, part) in parts.iter().enumerate() {
                    if index + 1 < parts.len() {
                        assert!(
                            part.read_width() == schedule[index],
                            "irregular lookup detected (u{} v u{})",
                            part.read_width(),
                            schedule[index]
                        );
                    } else {
                        assert!(
                            part.read_width() <= schedule[index],
                            "irregular lookup detected (u{} v u{})",
                            part.read_width(),
                            schedule[index]
                        );
                    }
                    terms.push(Expr::access(*part));
                }
                pad(&mut terms, schedule.len() - parts.len(), vector.module, zero, target);
            }
            other => {
                let range = other.value_range(target.module(vector.module));
                let bits = range.magnitude_bits().expect("unbounded lookup term");
                assert!(
                    bits <= limbs.field.bandwidth,
                    "irregular lookup detected (u{bits} v u{})",
                    limbs.field.bandwidth
                );
                terms.push(other.clone());
                pad(&mut terms, schedule.len() - 1, vector.module, zero, target);
            }
        }
    }
    LookupVector {
        module: vector.module,
        selector: vector.selector.clone(),
        terms,
    }
}

fn pad<F: PrimeField>(
    terms: &mut Vec<Expr<F>>,
    count: usize,
    module: ModuleId,
    zero: &mut ZeroRegisters,
    target: &mut Schema<F>,
) {
    if count == 0 {
        return;
    }
    let register = crate::zero_register(zero, module, target);
    for _ in 0..count {
        terms.push(Expr::access(RegisterAccess::new(register, 1)));
    }
}
