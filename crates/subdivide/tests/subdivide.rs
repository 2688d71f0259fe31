//! End-to-end subdivision scenarios: register splitting, carry allocation,
//! lookup padding, conditional carries, and the semantic-preservation and
//! idempotence properties.

use airlift_mir::{
    accepts, expand_trace, Assignment, Constraint, Domain, Expr, FieldConfig, Handle, LimbsMap,
    Logical, LookupConstraint, LookupVector, Module, ModuleId, Register, RegisterAccess,
    RegisterId, RegisterKind, Schema, VanishingConstraint, VecTrace,
};
use airlift_subdivide::subdivide;
use p3_baby_bear::BabyBear;
use p3_field::FieldAlgebra;
use rand::{rngs::StdRng, Rng, SeedableRng};

type F = BabyBear;
type E = Expr<F>;
type L = Logical<F>;

fn f(x: u64) -> F {
    F::from_canonical_u64(x)
}

fn vanishing(module: ModuleId, name: &str, property: L) -> Constraint<F> {
    Constraint::Vanishing(VanishingConstraint {
        handle: Handle::new(name),
        module,
        domain: Domain::All,
        property,
    })
}

/// Scenario: `x = y` over two u32 registers, bandwidth 64, max width 16.
/// Splits into limb-wise equalities with no carries.
#[test]
fn simple_equality_splits_limbwise() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 32));
    let y = module.add_register(Register::input("y", 32));
    module.push_constraint(vanishing(
        ModuleId(0),
        "x-eq-y",
        L::equal(
            E::access(RegisterAccess::new(x, 32)),
            E::access(RegisterAccess::new(y, 32)),
        ),
    ));
    schema.add_module(module);

    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);

    let module = out.module(ModuleId(0));
    let names: Vec<&str> = module.registers().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["x'0", "x'1", "y'0", "y'1"]);
    assert!(module.registers().iter().all(|r| r.width == 16));

    match &module.constraints[0] {
        Constraint::Vanishing(c) => {
            let expected = L::conjunct(vec![
                L::equal(
                    E::access(RegisterAccess::new(RegisterId(0), 16)),
                    E::access(RegisterAccess::new(RegisterId(2), 16)),
                ),
                L::equal(
                    E::access(RegisterAccess::new(RegisterId(1), 16)),
                    E::access(RegisterAccess::new(RegisterId(3), 16)),
                ),
            ]);
            assert_eq!(c.property, expected);
        }
        other => panic!("expected vanishing, got {other:?}"),
    }
    // No carries were needed.
    assert_eq!(module.num_registers(), 4);
    assert!(module.assignments.is_empty());
}

fn overflow_schema() -> Schema<F> {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let a = module.add_register(Register::input("a", 16));
    let b = module.add_register(Register::input("b", 16));
    let c = module.add_register(Register::input("c", 17));
    module.push_constraint(vanishing(
        ModuleId(0),
        "a-plus-b",
        L::equal(
            E::sum(vec![
                E::access(RegisterAccess::new(a, 16)),
                E::access(RegisterAccess::new(b, 16)),
            ]),
            E::access(RegisterAccess::new(c, 17)),
        ),
    ));
    schema.add_module(module);
    schema
}

/// Scenario: `a + b = c` with `c: u17`, bandwidth 20, max width 16. The
/// equation splits into two digit equations linked by a fresh carry.
#[test]
fn equality_with_overflow_allocates_carry() {
    let schema = overflow_schema();
    let limbs = LimbsMap::build(FieldConfig::new("t", 20, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);

    let module = out.module(ModuleId(0));
    let names: Vec<&str> = module.registers().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c'0", "c'1", "k$0"]);
    assert_eq!(module.register(RegisterId(4)).width, 1);
    assert_eq!(module.register(RegisterId(4)).kind, RegisterKind::Computed);

    let a = E::access(RegisterAccess::new(RegisterId(0), 16));
    let b = E::access(RegisterAccess::new(RegisterId(1), 16));
    let c0 = E::access(RegisterAccess::new(RegisterId(2), 16));
    let c1 = E::access(RegisterAccess::new(RegisterId(3), 1));
    let k = E::access(RegisterAccess::new(RegisterId(4), 1));
    match &module.constraints[0] {
        Constraint::Vanishing(constraint) => {
            let expected = L::conjunct(vec![
                L::equal(
                    E::sum(vec![a, b]),
                    E::sum(vec![c0, E::product(vec![E::constant(f(1 << 16)), k.clone()])]),
                ),
                L::equal(k, c1),
            ]);
            assert_eq!(constraint.property, expected);
        }
        other => panic!("expected vanishing, got {other:?}"),
    }
    // The carry is a computed register with a generating assignment.
    assert_eq!(module.assignments.len(), 1);
    match &module.assignments[0] {
        Assignment::Computed { targets, .. } => assert_eq!(targets, &vec![RegisterId(4)]),
        other => panic!("expected computed assignment, got {other:?}"),
    }
}

/// Invariant: on traces where every register obeys its width, the source and
/// subdivided schemas accept exactly the same rows.
#[test]
fn subdivision_preserves_semantics_on_well_typed_traces() {
    let schema = overflow_schema();
    let limbs = LimbsMap::build(FieldConfig::new("t", 20, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);

    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..50 {
        let a: u64 = rng.gen_range(0..1 << 16);
        let b: u64 = rng.gen_range(0..1 << 16);
        // Half the samples satisfy the constraint, half are random.
        let c: u64 = if rng.gen_bool(0.5) {
            a + b
        } else {
            rng.gen_range(0..1 << 17)
        };

        let mut source_trace = VecTrace::for_schema(&schema, &[1]);
        source_trace.set(ModuleId(0), RegisterId(0), 0, f(a));
        source_trace.set(ModuleId(0), RegisterId(1), 0, f(b));
        source_trace.set(ModuleId(0), RegisterId(2), 0, f(c));
        let source_ok = schema
            .module(ModuleId(0))
            .constraints
            .iter()
            .all(|constraint| accepts(constraint, &source_trace, &schema).1.is_none());

        let mut target_trace = VecTrace::for_schema(&out, &[1]);
        target_trace.set(ModuleId(0), RegisterId(0), 0, f(a));
        target_trace.set(ModuleId(0), RegisterId(1), 0, f(b));
        target_trace.set(ModuleId(0), RegisterId(2), 0, f(c & 0xffff));
        target_trace.set(ModuleId(0), RegisterId(3), 0, f(c >> 16));
        expand_trace(&out, &mut target_trace);
        let target_ok = out
            .module(ModuleId(0))
            .constraints
            .iter()
            .all(|constraint| accepts(constraint, &target_trace, &out).1.is_none());

        assert_eq!(source_ok, target_ok, "divergence at a={a} b={b} c={c}");
        assert_eq!(source_ok, a + b == c);
    }
}

/// Invariant: subdividing a second time with the identity limb map is a
/// no-op.
#[test]
fn subdivision_is_idempotent() {
    let schema = overflow_schema();
    let config = FieldConfig::new("t", 20, 16);
    let limbs = LimbsMap::build(config.clone(), &schema);
    let once = subdivide(&limbs, &[], &schema);

    let identity = LimbsMap::identity(config, &once);
    let twice = subdivide(&identity, &[], &once);

    assert_eq!(once.modules().len(), twice.modules().len());
    for (a, b) in once.modules().iter().zip(twice.modules()) {
        assert_eq!(a.registers(), b.registers());
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.constraints, b.constraints);
    }
}

/// A four-limb equality splits into four digit equations, all free cuts.
#[test]
fn wide_equality_splits_at_every_boundary() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 64));
    let y = module.add_register(Register::input("y", 64));
    module.push_constraint(vanishing(
        ModuleId(0),
        "wide",
        L::equal(
            E::access(RegisterAccess::new(x, 64)),
            E::access(RegisterAccess::new(y, 64)),
        ),
    ));
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 20, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);
    let module = out.module(ModuleId(0));
    assert_eq!(module.num_registers(), 8, "no carries for pure equality");
    match &module.constraints[0] {
        Constraint::Vanishing(c) => match &c.property {
            Logical::Conjunct(parts) => {
                assert_eq!(parts.len(), 4);
                assert!(parts.iter().all(|p| matches!(p, Logical::Equal(..))));
            }
            other => panic!("expected limbwise conjunction, got {other}"),
        },
        other => panic!("expected vanishing, got {other:?}"),
    }
}

/// The disequality rewrite stays equivalent on expanded traces: some digit
/// differs exactly when the original sides differ.
#[test]
fn disequality_split_preserves_semantics() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let a = module.add_register(Register::input("a", 16));
    let b = module.add_register(Register::input("b", 16));
    let c = module.add_register(Register::input("c", 17));
    module.push_constraint(vanishing(
        ModuleId(0),
        "differs",
        L::not_equal(
            E::sum(vec![
                E::access(RegisterAccess::new(a, 16)),
                E::access(RegisterAccess::new(b, 16)),
            ]),
            E::access(RegisterAccess::new(c, 17)),
        ),
    ));
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 20, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);

    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..50 {
        let a: u64 = rng.gen_range(0..1 << 16);
        let b: u64 = rng.gen_range(0..1 << 16);
        let c: u64 = if rng.gen_bool(0.5) {
            a + b
        } else {
            rng.gen_range(0..1 << 17)
        };
        let mut trace = VecTrace::for_schema(&out, &[1]);
        trace.set(ModuleId(0), RegisterId(0), 0, f(a));
        trace.set(ModuleId(0), RegisterId(1), 0, f(b));
        trace.set(ModuleId(0), RegisterId(2), 0, f(c & 0xffff));
        trace.set(ModuleId(0), RegisterId(3), 0, f(c >> 16));
        expand_trace(&out, &mut trace);
        let ok = out
            .module(ModuleId(0))
            .constraints
            .iter()
            .all(|constraint| accepts(constraint, &trace, &out).1.is_none());
        assert_eq!(ok, a + b != c, "divergence at a={a} b={b} c={c}");
    }
}

/// Boundary: a register exactly at the maximum width stays a single limb.
#[test]
fn exact_width_register_stays_whole() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    module.add_register(Register::input("x", 16));
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);
    let module = out.module(ModuleId(0));
    assert_eq!(module.num_registers(), 1);
    assert_eq!(module.register(RegisterId(0)).name, "x");
    assert_eq!(module.register(RegisterId(0)).width, 16);
}

/// Scenario: a u256 source column looked up in a u128 target column under
/// max width 128. The source splits in two; the target pads with the
/// module's ZERO register.
#[test]
fn lookup_padding_uses_zero_register() {
    let mut schema = Schema::<F>::new();
    let mut source_module = Module::new("S");
    let x = source_module.add_register(Register::input("X", 256));
    let source_id = schema.add_module(source_module);
    let mut target_module = Module::new("T");
    let y = target_module.add_register(Register::input("Y", 128));
    let target_id = schema.add_module(target_module);
    schema.module_mut(source_id).push_constraint(Constraint::Lookup(LookupConstraint {
        handle: Handle::new("xy"),
        targets: vec![LookupVector::new(
            target_id,
            vec![E::access(RegisterAccess::new(y, 128))],
        )],
        sources: vec![LookupVector::new(
            source_id,
            vec![E::access(RegisterAccess::new(x, 256))],
        )],
    }));

    let limbs = LimbsMap::build(FieldConfig::new("t", 256, 128), &schema);
    let out = subdivide(&limbs, &[], &schema);

    // The source module has the two X limbs; the target grew a ZERO register.
    assert_eq!(out.module(source_id).num_registers(), 2);
    let target = out.module(target_id);
    assert_eq!(target.num_registers(), 2);
    assert_eq!(target.register(RegisterId(1)).kind, RegisterKind::Zero);

    let lookup = out
        .module(source_id)
        .constraints
        .iter()
        .find_map(|c| match c {
            Constraint::Lookup(l) => Some(l),
            _ => None,
        })
        .expect("lookup survived");
    // Source columns: (X'0, X'1); target columns: (Y, zero).
    assert_eq!(lookup.sources[0].terms.len(), 2);
    assert_eq!(lookup.targets[0].terms.len(), 2);
    assert_eq!(
        lookup.targets[0].terms[1],
        E::access(RegisterAccess::new(RegisterId(1), 1))
    );
    // The zero register is pinned by a vanishing constraint.
    assert!(target.constraints.iter().any(|c| matches!(c, Constraint::Vanishing(_))));
    // And filled by a constant-0 assignment.
    assert!(matches!(
        &target.assignments[0],
        Assignment::Computed { expr, .. } if expr.is_zero_constant()
    ));
}

/// Boundary: an arity-1 lookup with both sides a fitting single register is
/// forwarded unchanged.
#[test]
fn fitting_lookup_is_forwarded() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 8));
    let y = module.add_register(Register::input("y", 8));
    module.push_constraint(Constraint::Lookup(LookupConstraint {
        handle: Handle::new("xy"),
        targets: vec![LookupVector::new(
            ModuleId(0),
            vec![E::access(RegisterAccess::new(y, 8))],
        )],
        sources: vec![LookupVector::new(
            ModuleId(0),
            vec![E::access(RegisterAccess::new(x, 8))],
        )],
    }));
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);
    let module = out.module(ModuleId(0));
    assert_eq!(module.num_registers(), 2);
    match &module.constraints[0] {
        Constraint::Lookup(l) => {
            assert_eq!(l.sources[0].terms, vec![E::access(RegisterAccess::new(x, 8))]);
            assert_eq!(l.targets[0].terms, vec![E::access(RegisterAccess::new(y, 8))]);
        }
        other => panic!("expected lookup, got {other:?}"),
    }
}

/// Computed assignments rewrite register-wise: the expression reads limbs
/// and the targets expand to their limb sequence, so expansion fills the
/// same values as the original schema.
#[test]
fn computed_assignments_survive_subdivision() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 32));
    let y = module.add_register(Register::computed("y", 32));
    module.push_assignment(Assignment::Computed {
        expr: E::sum(vec![E::access(RegisterAccess::new(x, 32)), E::one()]),
        direction: airlift_mir::Direction::Forward,
        module: ModuleId(0),
        targets: vec![y],
    });
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);

    // y expands to its two limbs, filled by chunking the computed value.
    let value: u64 = 0x1_2345;
    let mut trace = VecTrace::for_schema(&out, &[1]);
    trace.set(ModuleId(0), RegisterId(0), 0, f(value & 0xffff));
    trace.set(ModuleId(0), RegisterId(1), 0, f(value >> 16));
    expand_trace(&out, &mut trace);
    let expected = value + 1;
    assert_eq!(trace.column(ModuleId(0), RegisterId(2))[0], f(expected & 0xffff));
    assert_eq!(trace.column(ModuleId(0), RegisterId(3))[0], f(expected >> 16));
}

/// Extern modules pass through with identity splitting and can be lookup
/// targets.
#[test]
fn extern_modules_pass_through() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 8));
    module.push_constraint(Constraint::Lookup(LookupConstraint {
        handle: Handle::new("ext"),
        targets: vec![LookupVector::new(
            ModuleId(1),
            vec![E::access(RegisterAccess::new(RegisterId(0), 8))],
        )],
        sources: vec![LookupVector::new(
            ModuleId(0),
            vec![E::access(RegisterAccess::new(x, 8))],
        )],
    }));
    schema.add_module(module);

    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    let externs = vec![airlift_subdivide::ExternModule {
        name: "bytes".to_string(),
        registers: vec![Register::input("value", 8)],
    }];
    let out = subdivide(&limbs, &externs, &schema);
    assert_eq!(out.modules().len(), 2);
    let ext = out.module(ModuleId(1));
    assert_eq!(ext.name, "bytes");
    assert!(ext.is_synthetic);
    assert_eq!(ext.register(RegisterId(0)).name, "value");
    // The lookup survives with both sides intact.
    assert!(matches!(
        &out.module(ModuleId(0)).constraints[0],
        Constraint::Lookup(l) if l.targets[0].module == ModuleId(1)
    ));
}

/// Interleavings split register-wise on both sides.
#[test]
fn interleaving_splits_register_wise() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let t = module.add_register(Register::computed("t", 32));
    let s0 = module.add_register(Register::input("s0", 32));
    let s1 = module.add_register(Register::input("s1", 32));
    module.push_constraint(Constraint::Interleaving(
        airlift_mir::InterleavingConstraint {
            handle: Handle::new("mix"),
            target_module: ModuleId(0),
            source_module: ModuleId(0),
            target: vec![RegisterAccess::new(t, 32)],
            sources: vec![
                vec![RegisterAccess::new(s0, 32)],
                vec![RegisterAccess::new(s1, 32)],
            ],
        },
    ));
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);
    match &out.module(ModuleId(0)).constraints[0] {
        Constraint::Interleaving(c) => {
            assert_eq!(c.target.len(), 2);
            assert!(c.sources.iter().all(|s| s.len() == 2));
        }
        other => panic!("expected interleaving, got {other:?}"),
    }
}

/// A signed lookup term (possible negative values) is rejected.
#[test]
#[should_panic(expected = "signed lookup encountered")]
fn signed_lookup_is_fatal() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 32));
    let y = module.add_register(Register::input("y", 32));
    module.push_constraint(Constraint::Lookup(LookupConstraint {
        handle: Handle::new("neg"),
        targets: vec![LookupVector::new(
            ModuleId(0),
            vec![E::access(RegisterAccess::new(y, 32))],
        )],
        sources: vec![LookupVector::new(
            ModuleId(0),
            vec![E::sub(vec![
                E::access(RegisterAccess::new(x, 32)),
                E::access(RegisterAccess::new(y, 32)),
            ])],
        )],
    }));
    schema.add_module(module);
    let limbs = LimbsMap::build(FieldConfig::new("t", 64, 16), &schema);
    subdivide(&limbs, &[], &schema);
}

/// Scenario: carries allocated inside `Ite` branches are guarded by their
/// path condition, so each carry is 0 on rows where its branch is inactive.
#[test]
fn conditional_carries_are_path_guarded() {
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let s = module.add_register(Register::input("s", 1));
    let a = module.add_register(Register::input("a", 16));
    let b = module.add_register(Register::input("b", 16));
    let c = module.add_register(Register::input("c", 17));
    let d = module.add_register(Register::input("d", 17));
    let cond = L::equal(E::access(RegisterAccess::new(s, 1)), E::zero());
    let sum = E::sum(vec![
        E::access(RegisterAccess::new(a, 16)),
        E::access(RegisterAccess::new(b, 16)),
    ]);
    module.push_constraint(vanishing(
        ModuleId(0),
        "cond-sum",
        L::ite(
            cond.clone(),
            Some(L::equal(sum.clone(), E::access(RegisterAccess::new(c, 17)))),
            Some(L::equal(sum, E::access(RegisterAccess::new(d, 17)))),
        ),
    ));
    schema.add_module(module);

    let limbs = LimbsMap::build(FieldConfig::new("t", 20, 16), &schema);
    let out = subdivide(&limbs, &[], &schema);
    let module = out.module(ModuleId(0));

    // Two carries, one per branch.
    let carries: Vec<_> = module
        .registers()
        .iter()
        .enumerate()
        .filter(|(_, r)| r.name.starts_with("k$"))
        .map(|(i, _)| RegisterId(i))
        .collect();
    assert_eq!(carries.len(), 2);

    let guarded: Vec<&L> = module
        .assignments
        .iter()
        .map(|assignment| match assignment {
            Assignment::Computed { expr, .. } => match expr {
                Expr::IfZero(path, value, zero_branch) => {
                    assert!(value.is_some());
                    assert_eq!(
                        zero_branch.as_deref(),
                        Some(&E::zero()),
                        "inactive branch must pin the carry to 0"
                    );
                    path.as_ref()
                }
                other => panic!("carry computation is unguarded: {other}"),
            },
            other => panic!("expected computed assignment, got {other:?}"),
        })
        .collect();
    assert_eq!(guarded.len(), 2);
    // First carry guarded by the condition, second by its negation.
    assert_eq!(guarded[0], &cond);
    assert_eq!(guarded[1], &cond.negate());
}
