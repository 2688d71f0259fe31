//! The full compilation pipeline: subdivide over a wide field, concretize
//! to the target field, lower to AIR, and evaluate traces end to end.

use std::collections::HashMap;

use airlift_air::{accepts_air, expand_air_trace, lower_to_air, trace_for, OptimisationConfig};
use airlift_mir::{
    concretize, Constraint, Domain, Expr, FieldConfig, Handle, LimbsMap, Logical, Module,
    ModuleId, Register, RegisterAccess, RegisterId, Schema, VanishingConstraint,
};
use airlift_subdivide::subdivide;
use p3_baby_bear::BabyBear;
use p3_field::FieldAlgebra;
use p3_goldilocks::Goldilocks;

fn vanishing<F>(name: &str, property: Logical<F>) -> Constraint<F> {
    Constraint::Vanishing(VanishingConstraint {
        handle: Handle::new(name),
        module: ModuleId(0),
        domain: Domain::All,
        property,
    })
}

/// Subdivide over Goldilocks, concretize to BabyBear, lower, and check
/// acceptance of good and bad traces.
#[test]
fn subdivide_concretize_lower_accepts() {
    type Wide = Goldilocks;
    let mut schema = Schema::<Wide>::new();
    let mut module = Module::new("M");
    let a = module.add_register(Register::input("a", 16));
    let b = module.add_register(Register::input("b", 16));
    let c = module.add_register(Register::input("c", 17));
    module.push_constraint(vanishing(
        "sum",
        Logical::equal(
            Expr::sum(vec![
                Expr::access(RegisterAccess::new(a, 16)),
                Expr::access(RegisterAccess::new(b, 16)),
            ]),
            Expr::access(RegisterAccess::new(c, 17)),
        ),
    ));
    schema.add_module(module);

    let limbs = LimbsMap::build(FieldConfig::new("babybear", 20, 16), &schema);
    let subdivided = subdivide(&limbs, &[], &schema);
    let concrete: Schema<BabyBear> = concretize(&subdivided);
    let air = lower_to_air(&concrete, 20, &OptimisationConfig::default());

    let run = |a_value: u64, b_value: u64, c_value: u64| -> bool {
        let mut trace = trace_for(&air, &[1]);
        trace.set(ModuleId(0), RegisterId(0), 0, BabyBear::from_canonical_u64(a_value));
        trace.set(ModuleId(0), RegisterId(1), 0, BabyBear::from_canonical_u64(b_value));
        trace.set(
            ModuleId(0),
            RegisterId(2),
            0,
            BabyBear::from_canonical_u64(c_value & 0xffff),
        );
        trace.set(
            ModuleId(0),
            RegisterId(3),
            0,
            BabyBear::from_canonical_u64(c_value >> 16),
        );
        expand_air_trace(&air, &mut trace);
        air.module(ModuleId(0))
            .constraints
            .iter()
            .all(|c| accepts_air(c, &trace, &air).1.is_none())
    };
    assert!(run(70, 5, 75));
    assert!(run(0xffff, 0xffff, 0x1fffe));
    assert!(!run(70, 5, 76));
    assert!(!run(0xffff, 1, 0));
}

/// Labelled constants bind late: the same schema lowers differently under
/// different bindings, and unbound labels propagate as opaque constants.
#[test]
fn labelled_constants_bind_before_lowering() {
    type F = BabyBear;
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 8));
    module.push_constraint(vanishing(
        "pinned",
        Logical::equal(
            Expr::access(RegisterAccess::new(x, 8)),
            Expr::labelled("PIN", F::ZERO),
        ),
    ));
    schema.add_module(module);

    let mut bindings = HashMap::new();
    bindings.insert("PIN".to_string(), F::from_canonical_u32(9));
    let bound = schema.substitute(&bindings);

    let air = lower_to_air(&bound, 64, &OptimisationConfig::default());
    let run = |value: u32| -> bool {
        let mut trace = trace_for(&air, &[1]);
        trace.set(ModuleId(0), RegisterId(0), 0, F::from_canonical_u32(value));
        air.module(ModuleId(0))
            .constraints
            .iter()
            .all(|c| accepts_air(c, &trace, &air).1.is_none())
    };
    assert!(run(9));
    assert!(!run(3));

    // Unbound: the label's default value (0) is used.
    let air = lower_to_air(&schema, 64, &OptimisationConfig::default());
    let mut trace = trace_for(&air, &[1]);
    trace.set(ModuleId(0), RegisterId(0), 0, F::ZERO);
    assert!(air
        .module(ModuleId(0))
        .constraints
        .iter()
        .all(|c| accepts_air(c, &trace, &air).1.is_none()));
}

/// A schema mixing every constraint kind compiles end to end and accepts a
/// consistent trace.
#[test]
fn mixed_schema_compiles_end_to_end() {
    type F = BabyBear;
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let x = module.add_register(Register::input("x", 32));
    let y = module.add_register(Register::input("y", 32));
    let t = module.add_register(Register::input("t", 32));
    module.push_constraint(Constraint::Range(airlift_mir::RangeConstraint {
        handle: Handle::new("x-small"),
        module: ModuleId(0),
        sources: vec![RegisterAccess::new(x, 32)],
        bitwidths: vec![20],
    }));
    module.push_constraint(Constraint::Sorted(airlift_mir::SortedConstraint {
        handle: Handle::new("x-ordered"),
        module: ModuleId(0),
        bitwidth: 32,
        selector: None,
        sources: vec![RegisterAccess::new(x, 32)],
        signs: vec![true],
        strict: false,
    }));
    module.push_constraint(vanishing(
        "y-tracks-x",
        Logical::equal(
            Expr::access(RegisterAccess::new(y, 32)),
            Expr::access(RegisterAccess::new(x, 32)),
        ),
    ));
    module.push_constraint(Constraint::Lookup(airlift_mir::LookupConstraint {
        handle: Handle::new("x-in-t"),
        targets: vec![airlift_mir::LookupVector::new(
            ModuleId(0),
            vec![Expr::access(RegisterAccess::new(t, 32))],
        )],
        sources: vec![airlift_mir::LookupVector::new(
            ModuleId(0),
            vec![Expr::access(RegisterAccess::new(x, 32))],
        )],
    }));
    schema.add_module(module);
    schema.validate();

    let limbs = LimbsMap::build(FieldConfig::new("t", 20, 16), &schema);
    let subdivided = subdivide(&limbs, &[], &schema);
    let air = lower_to_air(&subdivided, 20, &OptimisationConfig::default());

    let rows: [u64; 3] = [5, 70000, 70001];
    let mut trace = trace_for(&air, &[3]);
    for (row, value) in rows.iter().enumerate() {
        for (register, v) in [(0, value & 0xffff), (1, value >> 16)] {
            // x and y share values; t mirrors x so the lookup is satisfied.
            trace.set(ModuleId(0), RegisterId(register), row, BabyBear::from_canonical_u64(v));
            trace.set(ModuleId(0), RegisterId(register + 2), row, BabyBear::from_canonical_u64(v));
            trace.set(ModuleId(0), RegisterId(register + 4), row, BabyBear::from_canonical_u64(v));
        }
    }
    expand_air_trace(&air, &mut trace);
    for constraint in &air.module(ModuleId(0)).constraints {
        let (_, failure) = accepts_air(constraint, &trace, &air);
        assert_eq!(failure, None, "unexpected failure in {:?}", constraint.handle());
    }

    // Violating the range (x too wide) breaks exactly the range side.
    let mut bad = trace_for(&air, &[3]);
    for (row, value) in [5u64, 70000, 1 << 21].iter().enumerate() {
        for (register, v) in [(0, value & 0xffff), (1, value >> 16)] {
            bad.set(ModuleId(0), RegisterId(register), row, BabyBear::from_canonical_u64(v));
            bad.set(ModuleId(0), RegisterId(register + 2), row, BabyBear::from_canonical_u64(v));
            bad.set(ModuleId(0), RegisterId(register + 4), row, BabyBear::from_canonical_u64(v));
        }
    }
    expand_air_trace(&air, &mut bad);
    assert!(air
        .module(ModuleId(0))
        .constraints
        .iter()
        .any(|c| accepts_air(c, &bad, &air).1.is_some()));
}

/// `IfZero`, `Exp`, `Cast` and `VectorAccess` lower to pure AIR arithmetic
/// with the documented semantics.
#[test]
fn term_lowering_preserves_evaluation() {
    type F = BabyBear;
    let mut schema = Schema::<F>::new();
    let mut module = Module::new("M");
    let s = module.add_register(Register::input("s", 1));
    let x = module.add_register(Register::input("x", 8));
    let y = module.add_register(Register::input("y", 8));
    let out = module.add_register(Register::input("out", 16));
    let s_access = Expr::access(RegisterAccess::new(s, 1));
    let x_access = Expr::access(RegisterAccess::new(x, 8));
    let y_access = Expr::access(RegisterAccess::new(y, 8));

    // out = if s = 0 then x^2 else (y truncated to 4 bits)
    module.push_constraint(vanishing(
        "select",
        Logical::equal(
            Expr::if_zero(
                Logical::equal(s_access, Expr::zero()),
                Some(Expr::exp(x_access, 2)),
                Some(Expr::cast(y_access, 4)),
            ),
            Expr::access(RegisterAccess::new(out, 16)),
        ),
    ));
    // And out reassembles from the (x, s) vector when both are small; this
    // exercises the weighted limb sum.
    module.push_constraint(vanishing(
        "vector",
        Logical::equal(
            Expr::vector(vec![
                RegisterAccess::new(x, 8),
                RegisterAccess::new(s, 1),
            ]),
            Expr::sum(vec![
                Expr::access(RegisterAccess::new(x, 8)),
                Expr::product(vec![
                    Expr::constant(F::from_canonical_u32(256)),
                    Expr::access(RegisterAccess::new(s, 1)),
                ]),
            ]),
        ),
    ));
    schema.add_module(module);

    let air = lower_to_air(&schema, 24, &OptimisationConfig::default());
    let run = |s_value: u32, x_value: u32, y_value: u32, out_value: u32| -> bool {
        let mut trace = trace_for(&air, &[1]);
        trace.set(ModuleId(0), RegisterId(0), 0, F::from_canonical_u32(s_value));
        trace.set(ModuleId(0), RegisterId(1), 0, F::from_canonical_u32(x_value));
        trace.set(ModuleId(0), RegisterId(2), 0, F::from_canonical_u32(y_value));
        trace.set(ModuleId(0), RegisterId(3), 0, F::from_canonical_u32(out_value));
        expand_air_trace(&air, &mut trace);
        air.module(ModuleId(0))
            .constraints
            .iter()
            .all(|c| accepts_air(c, &trace, &air).1.is_none())
    };
    // s = 0 selects the square.
    assert!(run(0, 12, 0xff, 144));
    assert!(!run(0, 12, 0xff, 145));
    // s = 1 selects the truncated y: 0xff & 0xf = 0xf.
    assert!(run(1, 12, 0xff, 0xf));
    assert!(!run(1, 12, 0xff, 0xff));
}
