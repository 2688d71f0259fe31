//! Schema subdivision: rewrites a schema under a limb map and field
//! configuration so that every register fits the configured maximum limb
//! width and every constraint stays sound under the configured bandwidth.
//!
//! The rewrite allocates a fresh output schema. Per module: the register
//! table becomes the limb table, assignments and constraints are rewritten
//! in insertion order, and carry registers allocated along the way are
//! flushed at the end. Lookups are rewritten after the flush because their
//! zero padding may touch other modules' register tables.

use airlift_mir::{
    Allocator, Constraint, Expr, LimbsMap, Module, ModuleId, Register, RegisterId, RegisterKind,
    Schema, VanishingConstraint,
};
use p3_field::PrimeField;
use tracing::debug;

mod constraints;
mod equation;
mod expr;
mod lookup;
mod vanishing;

pub use lookup::ZeroRegisters;

/// A module whose registers are defined outside the schema being subdivided;
/// passed through with identity splitting.
#[derive(Clone, Debug)]
pub struct ExternModule {
    pub name: String,
    pub registers: Vec<Register>,
}

/// Knobs of the subdivision pass.
#[derive(Clone, Debug)]
pub struct SubdivideOptions {
    /// When a rewritten constraint grows past this multiple of its source
    /// size, an advisory debug log is emitted.
    pub explosion_factor: usize,
}

impl Default for SubdivideOptions {
    fn default() -> Self {
        Self {
            explosion_factor: 10,
        }
    }
}

/// Rewrites `schema` under `limbs`, appending `externs` as pass-through
/// modules. The limb map must have been built against `schema` with the same
/// field configuration.
pub fn subdivide<F: PrimeField>(
    limbs: &LimbsMap,
    externs: &[ExternModule],
    schema: &Schema<F>,
) -> Schema<F> {
    subdivide_with(limbs, externs, schema, &SubdivideOptions::default())
}

pub fn subdivide_with<F: PrimeField>(
    limbs: &LimbsMap,
    externs: &[ExternModule],
    schema: &Schema<F>,
    options: &SubdivideOptions,
) -> Schema<F> {
    assert_eq!(
        limbs.num_modules(),
        schema.modules().len(),
        "limb map does not cover the schema"
    );
    let mut limbs = limbs.clone();

    // Module initialization: limb register tables plus non-register
    // metadata, then the extern modules.
    let mut target = Schema::new();
    for (index, module) in schema.modules().iter().enumerate() {
        let id = ModuleId(index);
        let mut out = Module::like(module);
        for register in limbs.target_registers(id, module) {
            out.add_register(register);
        }
        target.add_module(out);
    }
    for ext in externs {
        limbs.push_extern(&ext.registers);
        let mut out = Module::new(ext.name.clone());
        out.is_synthetic = true;
        for register in &ext.registers {
            out.add_register(register.clone());
        }
        target.add_module(out);
    }

    let mut zero = ZeroRegisters::new(target.modules().len());

    for (index, module) in schema.modules().iter().enumerate() {
        let id = ModuleId(index);
        let map = limbs.module(id);

        // Assignment rewriting.
        for assignment in &module.assignments {
            let rewritten = constraints::subdivide_assignment(assignment, map);
            target.module_mut(id).push_assignment(rewritten);
        }

        // Constraint rewriting. Lookups are deferred past the allocator
        // flush; their padding may grow other modules.
        let mut context = vanishing::SplitContext::new(
            Allocator::for_module(target.module(id)),
            target
                .module(id)
                .registers()
                .iter()
                .map(|r| r.width)
                .collect(),
        );
        let mut lookups = Vec::new();
        for constraint in &module.constraints {
            let before = constraint.node_count();
            match constraint {
                Constraint::Lookup(lookup) => {
                    lookups.push(lookup.clone());
                    continue;
                }
                Constraint::Vanishing(c) => {
                    let rewritten = vanishing::subdivide_vanishing(c, map, &limbs.field, &mut context);
                    advise_explosion(before, &rewritten, options);
                    target.module_mut(id).push_constraint(Constraint::Vanishing(rewritten));
                }
                Constraint::Assertion(c) => {
                    let rewritten = vanishing::subdivide_vanishing(c, map, &limbs.field, &mut context);
                    advise_explosion(before, &rewritten, options);
                    target.module_mut(id).push_constraint(Constraint::Assertion(rewritten));
                }
                Constraint::Range(c) => {
                    target
                        .module_mut(id)
                        .push_constraint(Constraint::Range(constraints::subdivide_range(c, map)));
                }
                Constraint::Sorted(c) => {
                    target
                        .module_mut(id)
                        .push_constraint(Constraint::Sorted(constraints::subdivide_sorted(c, map)));
                }
                Constraint::Permutation(c) => {
                    target.module_mut(id).push_constraint(Constraint::Permutation(
                        constraints::subdivide_permutation(c, map),
                    ));
                }
                Constraint::Interleaving(c) => {
                    target.module_mut(id).push_constraint(Constraint::Interleaving(
                        constraints::subdivide_interleaving(c, &limbs),
                    ));
                }
            }
        }

        // Flush carries into the module.
        context.into_allocator().flush(id, target.module_mut(id));

        for lookup in lookups {
            let rewritten = lookup::subdivide_lookup(&lookup, &limbs, &mut zero, &mut target);
            target
                .module_mut(id)
                .push_constraint(Constraint::Lookup(rewritten));
        }
    }

    target
}

/// Creates (or returns) the module's ZERO register: a computed register
/// pinned to 0 by a dedicated vanishing constraint.
pub(crate) fn zero_register<F: PrimeField>(
    zero: &mut ZeroRegisters,
    module: ModuleId,
    schema: &mut Schema<F>,
) -> RegisterId {
    if let Some(id) = zero.get(module) {
        return id;
    }
    let owner = schema.module_mut(module);
    let id = owner.add_register(Register::new("zero$0", 1, RegisterKind::Zero));
    owner.push_assignment(airlift_mir::Assignment::Computed {
        expr: Expr::zero(),
        direction: airlift_mir::Direction::Forward,
        module,
        targets: vec![id],
    });
    owner.push_constraint(Constraint::Vanishing(VanishingConstraint {
        handle: airlift_mir::Handle::new(format!("{}$zero", owner.name)),
        module,
        domain: airlift_mir::Domain::All,
        property: airlift_mir::Logical::vanishes(Expr::access(
            airlift_mir::RegisterAccess::new(id, 1),
        )),
    }));
    zero.put(module, id);
    id
}

fn advise_explosion<F: PrimeField>(
    before: usize,
    rewritten: &VanishingConstraint<F>,
    options: &SubdivideOptions,
) {
    let after = rewritten.property.node_count();
    if before > 0 && after > before.saturating_mul(options.explosion_factor) {
        debug!(
            handle = %rewritten.handle,
            before,
            after,
            "exploding constraint: subdivision grew the property tree"
        );
    }
}
