//! Rebuilding a schema against a different field element type. Constants
//! travel as 32-byte big-endian canonical values and are reduced mod the
//! target field order; everything else is structural.

use p3_field::PrimeField;

use crate::{
    assignment::Assignment,
    constraint::{
        Constraint, InterleavingConstraint, LookupConstraint, LookupVector, PermutationConstraint,
        RangeConstraint, SortedConstraint, VanishingConstraint,
    },
    expr::Expr,
    field,
    logical::Logical,
    schema::{Module, Register, Schema},
};

/// Re-interprets `schema` over the field `F2`.
pub fn concretize<F1: PrimeField, F2: PrimeField>(schema: &Schema<F1>) -> Schema<F2> {
    let mut out = Schema::new();
    for module in schema.modules() {
        let mut target: Module<F2> = Module::new(module.name.clone());
        target.allow_padding = module.allow_padding;
        target.is_public = module.is_public;
        target.is_synthetic = module.is_synthetic;
        target.length_keys = module.length_keys.clone();
        for register in module.registers() {
            target.add_register(Register::new(
                register.name.clone(),
                register.width,
                register.kind,
            ));
        }
        for assignment in &module.assignments {
            target.push_assignment(concretize_assignment(assignment));
        }
        for constraint in &module.constraints {
            target.push_constraint(concretize_constraint(constraint));
        }
        out.add_module(target);
    }
    out
}

fn value<F1: PrimeField, F2: PrimeField>(x: &F1) -> F2 {
    field::from_be_bytes_32(&field::to_be_bytes_32(x))
}

fn concretize_expr<F1: PrimeField, F2: PrimeField>(expr: &Expr<F1>) -> Expr<F2> {
    match expr {
        Expr::Constant(c) => Expr::Constant(value(c)),
        Expr::Labelled(name, c) => Expr::Labelled(name.clone(), value(c)),
        Expr::Access(a) => Expr::Access(*a),
        Expr::Vector(limbs) => Expr::Vector(limbs.clone()),
        Expr::Sum(ts) => Expr::Sum(ts.iter().map(concretize_expr).collect()),
        Expr::Sub(ts) => Expr::Sub(ts.iter().map(concretize_expr).collect()),
        Expr::Product(ts) => Expr::Product(ts.iter().map(concretize_expr).collect()),
        Expr::Exp(t, k) => Expr::Exp(Box::new(concretize_expr(t)), *k),
        Expr::Cast(t, w) => Expr::Cast(Box::new(concretize_expr(t)), *w),
        Expr::Norm(t) => Expr::Norm(Box::new(concretize_expr(t))),
        Expr::IfZero(c, t, f) => Expr::IfZero(
            Box::new(concretize_logical(c)),
            t.as_ref().map(|t| Box::new(concretize_expr(t))),
            f.as_ref().map(|f| Box::new(concretize_expr(f))),
        ),
    }
}

fn concretize_logical<F1: PrimeField, F2: PrimeField>(logical: &Logical<F1>) -> Logical<F2> {
    match logical {
        Logical::Equal(a, b) => Logical::Equal(
            Box::new(concretize_expr(a)),
            Box::new(concretize_expr(b)),
        ),
        Logical::NotEqual(a, b) => Logical::NotEqual(
            Box::new(concretize_expr(a)),
            Box::new(concretize_expr(b)),
        ),
        Logical::Inequality { strict, lhs, rhs } => Logical::Inequality {
            strict: *strict,
            lhs: Box::new(concretize_expr(lhs)),
            rhs: Box::new(concretize_expr(rhs)),
        },
        Logical::Conjunct(ts) => Logical::Conjunct(ts.iter().map(concretize_logical).collect()),
        Logical::Disjunct(ts) => Logical::Disjunct(ts.iter().map(concretize_logical).collect()),
        Logical::Negate(t) => Logical::Negate(Box::new(concretize_logical(t))),
        Logical::Ite(c, t, f) => Logical::Ite(
            Box::new(concretize_logical(c)),
            t.as_ref().map(|t| Box::new(concretize_logical(t))),
            f.as_ref().map(|f| Box::new(concretize_logical(f))),
        ),
    }
}

fn concretize_assignment<F1: PrimeField, F2: PrimeField>(
    assignment: &Assignment<F1>,
) -> Assignment<F2> {
    match assignment {
        Assignment::Computed {
            expr,
            direction,
            module,
            targets,
        } => Assignment::Computed {
            expr: concretize_expr(expr),
            direction: *direction,
            module: *module,
            targets: targets.clone(),
        },
        Assignment::Native {
            function,
            targets,
            sources,
        } => Assignment::Native {
            function: function.clone(),
            targets: targets.clone(),
            sources: sources.clone(),
        },
        Assignment::SortedPermutation {
            targets,
            signs,
            sources,
        } => Assignment::SortedPermutation {
            targets: targets.clone(),
            signs: signs.clone(),
            sources: sources.clone(),
        },
    }
}

fn concretize_constraint<F1: PrimeField, F2: PrimeField>(
    constraint: &Constraint<F1>,
) -> Constraint<F2> {
    match constraint {
        Constraint::Vanishing(c) => Constraint::Vanishing(concretize_vanishing(c)),
        Constraint::Assertion(c) => Constraint::Assertion(concretize_vanishing(c)),
        Constraint::Range(c) => Constraint::Range(RangeConstraint {
            handle: c.handle.clone(),
            module: c.module,
            sources: c.sources.clone(),
            bitwidths: c.bitwidths.clone(),
        }),
        Constraint::Sorted(c) => Constraint::Sorted(SortedConstraint {
            handle: c.handle.clone(),
            module: c.module,
            bitwidth: c.bitwidth,
            selector: c.selector,
            sources: c.sources.clone(),
            signs: c.signs.clone(),
            strict: c.strict,
        }),
        Constraint::Permutation(c) => Constraint::Permutation(PermutationConstraint {
            handle: c.handle.clone(),
            module: c.module,
            targets: c.targets.clone(),
            sources: c.sources.clone(),
        }),
        Constraint::Interleaving(c) => Constraint::Interleaving(InterleavingConstraint {
            handle: c.handle.clone(),
            target_module: c.target_module,
            source_module: c.source_module,
            target: c.target.clone(),
            sources: c.sources.clone(),
        }),
        Constraint::Lookup(c) => Constraint::Lookup(LookupConstraint {
            handle: c.handle.clone(),
            targets: c.targets.iter().map(concretize_vector).collect(),
            sources: c.sources.iter().map(concretize_vector).collect(),
        }),
    }
}

fn concretize_vanishing<F1: PrimeField, F2: PrimeField>(
    c: &VanishingConstraint<F1>,
) -> VanishingConstraint<F2> {
    VanishingConstraint {
        handle: c.handle.clone(),
        module: c.module,
        domain: c.domain,
        property: concretize_logical(&c.property),
    }
}

fn concretize_vector<F1: PrimeField, F2: PrimeField>(v: &LookupVector<F1>) -> LookupVector<F2> {
    LookupVector {
        module: v.module,
        selector: v.selector.as_ref().map(concretize_expr),
        terms: v.terms.iter().map(concretize_expr).collect(),
    }
}
