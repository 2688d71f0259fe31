//! Subdivision of the structural constraint kinds and of assignments. The
//! rules are per-kind: ranges distribute their bitwidth over the limbs,
//! sorted constraints expand most-significant-first so lexicographic order
//! is preserved, permutations expand pairwise, interleavings register-wise.

use airlift_mir::{
    Assignment, InterleavingConstraint, LimbsMap, PermutationConstraint, RangeConstraint,
    RegisterAccess, RegisterId, RegisterLimbsMap, SortedConstraint,
};
use itertools::zip_eq;
use p3_field::PrimeField;

use crate::expr;

pub(crate) fn subdivide_range(c: &RangeConstraint, map: &RegisterLimbsMap) -> RangeConstraint {
    let mut sources = Vec::new();
    let mut bitwidths = Vec::new();
    for (access, bitwidth) in zip_eq(&c.sources, &c.bitwidths) {
        let limbs = expr::access_limbs(access, map);
        // Low limbs saturate first; the fragments are emitted most
        // significant first and 0-width fragments are dropped.
        let mut remaining = *bitwidth;
        let mut fragments = Vec::new();
        for limb in limbs {
            let fragment = remaining.min(limb.read_width());
            remaining -= fragment;
            if fragment > 0 {
                fragments.push((limb, fragment));
            }
        }
        for (limb, fragment) in fragments.into_iter().rev() {
            sources.push(limb);
            bitwidths.push(fragment);
        }
    }
    RangeConstraint {
        handle: c.handle.clone(),
        module: c.module,
        sources,
        bitwidths,
    }
}

pub(crate) fn subdivide_sorted(c: &SortedConstraint, map: &RegisterLimbsMap) -> SortedConstraint {
    let mut sources = Vec::new();
    let mut signs = Vec::new();
    let mut bitwidth = 0usize;
    for (access, sign) in zip_eq(&c.sources, &c.signs) {
        // Most significant limb first, so tuple comparison order survives.
        for limb in expr::access_limbs(access, map).into_iter().rev() {
            bitwidth = bitwidth.max(limb.read_width());
            sources.push(limb);
            signs.push(*sign);
        }
    }
    let selector = c.selector.as_ref().map(|selector| {
        let limbs = expr::access_limbs(selector, map);
        assert!(
            limbs.len() == 1,
            "sorted constraint {:?}: selector splits into multiple limbs",
            c.handle
        );
        limbs[0]
    });
    SortedConstraint {
        handle: c.handle.clone(),
        module: c.module,
        bitwidth,
        selector,
        sources,
        signs,
        strict: c.strict,
    }
}

pub(crate) fn subdivide_permutation(
    c: &PermutationConstraint,
    map: &RegisterLimbsMap,
) -> PermutationConstraint {
    let mut targets = Vec::new();
    let mut sources = Vec::new();
    for (target, source) in zip_eq(&c.targets, &c.sources) {
        let target_limbs = map.limb_ids(*target);
        let source_limbs = map.limb_ids(*source);
        assert!(
            target_limbs.len() == source_limbs.len(),
            "irregular permutation constraint"
        );
        targets.extend_from_slice(target_limbs);
        sources.extend_from_slice(source_limbs);
    }
    PermutationConstraint {
        handle: c.handle.clone(),
        module: c.module,
        targets,
        sources,
    }
}

pub(crate) fn subdivide_interleaving(
    c: &InterleavingConstraint,
    limbs: &LimbsMap,
) -> InterleavingConstraint {
    let split = |module, accesses: &[RegisterAccess]| {
        accesses
            .iter()
            .flat_map(|access| expr::access_limbs(access, limbs.module(module)))
            .collect::<Vec<_>>()
    };
    InterleavingConstraint {
        handle: c.handle.clone(),
        target_module: c.target_module,
        source_module: c.source_module,
        target: split(c.target_module, &c.target),
        sources: c
            .sources
            .iter()
            .map(|source| split(c.source_module, source))
            .collect(),
    }
}

pub(crate) fn subdivide_assignment<F: PrimeField>(
    assignment: &Assignment<F>,
    map: &RegisterLimbsMap,
) -> Assignment<F> {
    let flatten = |ids: &[RegisterId]| {
        ids.iter()
            .flat_map(|id| map.limb_ids(*id).iter().copied())
            .collect::<Vec<_>>()
    };
    match assignment {
        Assignment::Computed {
            expr: computation,
            direction,
            module,
            targets,
        } => Assignment::Computed {
            expr: expr::subdivide_expr(computation, map),
            direction: *direction,
            module: *module,
            targets: flatten(targets),
        },
        Assignment::Native {
            function,
            targets,
            sources,
        } => Assignment::Native {
            function: function.clone(),
            targets: flatten(targets),
            sources: flatten(sources),
        },
        Assignment::SortedPermutation {
            targets,
            signs,
            sources,
        } => {
            // Most significant limb first, replicating the sign, so the
            // sorted order of the expanded tuples matches the original.
            let mut out_targets = Vec::new();
            let mut out_sources = Vec::new();
            let mut out_signs = Vec::new();
            for ((target, source), sign) in zip_eq(zip_eq(targets, sources), signs) {
                let target_limbs = map.limb_ids(*target);
                let source_limbs = map.limb_ids(*source);
                assert!(
                    target_limbs.len() == source_limbs.len(),
                    "irregular permutation constraint"
                );
                for (t, s) in target_limbs.iter().rev().zip(source_limbs.iter().rev()) {
                    out_targets.push(*t);
                    out_sources.push(*s);
                    out_signs.push(*sign);
                }
            }
            Assignment::SortedPermutation {
                targets: out_targets,
                signs: out_signs,
                sources: out_sources,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use airlift_mir::{Expr, FieldConfig, Handle, LimbsMap, Module, ModuleId, Register, Schema};
    use p3_baby_bear::BabyBear;

    use super::*;

    fn setup(widths: &[usize], max: usize) -> (Schema<BabyBear>, LimbsMap) {
        let mut schema = Schema::<BabyBear>::new();
        let mut module = Module::new("m");
        for (i, w) in widths.iter().enumerate() {
            module.add_register(Register::input(format!("r{i}"), *w));
        }
        schema.add_module(module);
        let map = LimbsMap::build(FieldConfig::new("test", 64, max), &schema);
        (schema, map)
    }

    #[test]
    fn range_distributes_low_limbs_first() {
        let (_, map) = setup(&[32], 16);
        let c = RangeConstraint {
            handle: Handle::new("r"),
            module: ModuleId(0),
            sources: vec![RegisterAccess::new(RegisterId(0), 32)],
            bitwidths: vec![20],
        };
        let out = subdivide_range(&c, map.module(ModuleId(0)));
        // Fragments most significant first: 4 bits on the high limb, 16 on
        // the low.
        assert_eq!(out.bitwidths, vec![4, 16]);
        assert_eq!(out.sources[0].register, RegisterId(1));
        assert_eq!(out.sources[1].register, RegisterId(0));
    }

    #[test]
    fn zero_width_range_is_dropped() {
        let (_, map) = setup(&[16], 16);
        let c = RangeConstraint {
            handle: Handle::new("r"),
            module: ModuleId(0),
            sources: vec![RegisterAccess::new(RegisterId(0), 16)],
            bitwidths: vec![0],
        };
        let out = subdivide_range(&c, map.module(ModuleId(0)));
        assert!(out.sources.is_empty());
        assert!(out.bitwidths.is_empty());
    }

    #[test]
    fn sorted_expands_most_significant_first() {
        let (_, map) = setup(&[32], 16);
        let c = SortedConstraint {
            handle: Handle::new("s"),
            module: ModuleId(0),
            bitwidth: 32,
            selector: None,
            sources: vec![RegisterAccess::new(RegisterId(0), 32)],
            signs: vec![true],
            strict: true,
        };
        let out = subdivide_sorted(&c, map.module(ModuleId(0)));
        assert_eq!(out.sources.len(), 2);
        // High limb compared first.
        assert_eq!(out.sources[0].register, RegisterId(1));
        assert_eq!(out.sources[1].register, RegisterId(0));
        assert_eq!(out.signs, vec![true, true]);
        assert_eq!(out.bitwidth, 16);
        assert!(out.strict);
    }

    #[test]
    #[should_panic(expected = "irregular permutation constraint")]
    fn mismatched_permutation_is_fatal() {
        let (_, map) = setup(&[32, 16], 16);
        let c = PermutationConstraint {
            handle: Handle::new("p"),
            module: ModuleId(0),
            targets: vec![RegisterId(0)],
            sources: vec![RegisterId(1)],
        };
        subdivide_permutation(&c, map.module(ModuleId(0)));
    }

    #[test]
    fn permutation_expands_pairwise() {
        let (_, map) = setup(&[32, 32], 16);
        let c = PermutationConstraint {
            handle: Handle::new("p"),
            module: ModuleId(0),
            targets: vec![RegisterId(0)],
            sources: vec![RegisterId(1)],
        };
        let out = subdivide_permutation(&c, map.module(ModuleId(0)));
        assert_eq!(out.targets.len(), 2);
        assert_eq!(out.sources.len(), 2);
    }

    #[test]
    fn computed_assignment_targets_expand() {
        let (_, map) = setup(&[32, 16], 16);
        let a = Assignment::Computed {
            expr: Expr::access(RegisterAccess::new(RegisterId(1), 16)),
            direction: airlift_mir::Direction::Forward,
            module: ModuleId(0),
            targets: vec![RegisterId(0)],
        };
        match subdivide_assignment(&a, map.module(ModuleId(0))) {
            Assignment::Computed { targets, .. } => {
                assert_eq!(targets.len(), 2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn sorted_permutation_replicates_signs_ms_first() {
        let (_, map) = setup(&[32, 32], 16);
        let a = Assignment::<BabyBear>::SortedPermutation {
            targets: vec![RegisterId(0)],
            signs: vec![false],
            sources: vec![RegisterId(1)],
        };
        match subdivide_assignment(&a, map.module(ModuleId(0))) {
            Assignment::SortedPermutation {
                targets,
                signs,
                sources,
            } => {
                // MS limb of r0 is RegisterId(1); of r1 is RegisterId(3).
                assert_eq!(targets, vec![RegisterId(1), RegisterId(0)]);
                assert_eq!(sources, vec![RegisterId(3), RegisterId(2)]);
                assert_eq!(signs, vec![false, false]);
            }
            _ => unreachable!(),
        }
    }
}
