//! Randomised properties of the term algebra: evaluation stays inside the
//! computed value range, simplification only narrows ranges and never
//! changes evaluation, and the polynomial view round-trips evaluation for
//! the arithmetic fragment.

use airlift_mir::{
    field,
    poly::Poly,
    trace::eval_expr,
    Expr, Module, ModuleId, Register, RegisterAccess, RegisterId, Schema, VecTrace,
};
use num_bigint::BigInt;
use p3_baby_bear::BabyBear;
use p3_field::FieldAlgebra;
use rand::{rngs::StdRng, Rng, SeedableRng};

type F = BabyBear;
type E = Expr<F>;

const WIDTHS: [usize; 3] = [8, 8, 4];

fn schema() -> Schema<F> {
    let mut schema = Schema::new();
    let mut module = Module::new("m");
    for (i, width) in WIDTHS.iter().enumerate() {
        module.add_register(Register::input(format!("r{i}"), *width));
    }
    schema.add_module(module);
    schema
}

fn random_trace(rng: &mut StdRng, schema: &Schema<F>) -> VecTrace<F> {
    let mut trace = VecTrace::for_schema(schema, &[1]);
    for (i, width) in WIDTHS.iter().enumerate() {
        let value = rng.gen_range(0..1u64 << width);
        trace.set(ModuleId(0), RegisterId(i), 0, F::from_canonical_u64(value));
    }
    trace
}

/// A random term from the arithmetic fragment (no Norm/IfZero/Cast/Exp).
fn random_arithmetic(rng: &mut StdRng, depth: usize) -> E {
    if depth == 0 {
        return match rng.gen_range(0..3) {
            0 => E::constant(F::from_canonical_u32(rng.gen_range(0..16))),
            _ => {
                let register = rng.gen_range(0..WIDTHS.len());
                E::access(RegisterAccess::new(RegisterId(register), WIDTHS[register]))
            }
        };
    }
    let arity = rng.gen_range(2..4);
    let children: Vec<E> = (0..arity)
        .map(|_| random_arithmetic(rng, depth - 1))
        .collect();
    match rng.gen_range(0..3) {
        0 => E::sum(children),
        1 => E::sub(children),
        _ => E::product(children),
    }
}

/// A random term over the full grammar handled by value-range analysis.
fn random_term(rng: &mut StdRng, depth: usize) -> E {
    if depth == 0 || rng.gen_bool(0.3) {
        return random_arithmetic(rng, depth.min(1));
    }
    match rng.gen_range(0..5) {
        0 => E::cast(random_term(rng, depth - 1), rng.gen_range(1..9)),
        1 => E::norm(random_term(rng, depth - 1)),
        2 => E::exp(random_term(rng, depth - 1), rng.gen_range(0..3)),
        _ => random_arithmetic(rng, depth),
    }
}

fn signed_eval(expr: &E, trace: &VecTrace<F>) -> BigInt {
    field::signed_canonical(&eval_expr(expr, ModuleId(0), 0, trace))
}

#[test]
fn evaluation_stays_in_the_computed_range() {
    let schema = schema();
    let module = schema.module(ModuleId(0));
    let mut rng = StdRng::seed_from_u64(7);
    let mut checked = 0;
    for _ in 0..500 {
        let expr = random_term(&mut rng, 3);
        let range = expr.value_range(module);
        // Stay below half the field order so the signed reading is exact.
        match range.magnitude_bits() {
            Some(bits) if bits < 29 => {}
            _ => continue,
        }
        let trace = random_trace(&mut rng, &schema);
        let value = signed_eval(&expr, &trace);
        assert!(
            range.contains_value(&value),
            "value {value} escapes {range:?} for {expr}"
        );
        checked += 1;
    }
    assert!(checked > 100, "generator starved the property");
}

#[test]
fn simplification_narrows_ranges_and_preserves_evaluation() {
    let schema = schema();
    let module = schema.module(ModuleId(0));
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..500 {
        let expr = random_term(&mut rng, 3);
        let simplified = expr.simplify(false);
        assert!(
            expr.value_range(module)
                .contains(&simplified.value_range(module)),
            "simplify widened the range of {expr}"
        );
        let trace = random_trace(&mut rng, &schema);
        assert_eq!(
            eval_expr(&expr, ModuleId(0), 0, &trace),
            eval_expr(&simplified, ModuleId(0), 0, &trace),
            "simplify changed the value of {expr}"
        );
    }
}

#[test]
fn polynomial_view_round_trips_evaluation() {
    let schema = schema();
    let mut rng = StdRng::seed_from_u64(13);
    let mut checked = 0;
    for _ in 0..500 {
        let expr = random_arithmetic(&mut rng, 3);
        let Some(poly) = Poly::from_expr(&expr) else {
            continue;
        };
        let back: E = poly.to_expr();
        let factored: E = poly.to_expr_factored();
        let trace = random_trace(&mut rng, &schema);
        let reference = eval_expr(&expr, ModuleId(0), 0, &trace);
        assert_eq!(
            reference,
            eval_expr(&back, ModuleId(0), 0, &trace),
            "round trip changed the value of {expr}"
        );
        assert_eq!(
            reference,
            eval_expr(&factored, ModuleId(0), 0, &trace),
            "factoring changed the value of {expr}"
        );
        checked += 1;
    }
    assert!(checked > 100, "generator starved the property");
}

#[test]
fn shifting_commutes_with_evaluation() {
    let schema = schema();
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..200 {
        let expr = random_arithmetic(&mut rng, 2);
        let shifted = expr.apply_shift(1);
        // Build a two-row trace; the shifted term at row 0 sees row 1.
        let mut trace = VecTrace::for_schema(&schema, &[2]);
        for (i, width) in WIDTHS.iter().enumerate() {
            for row in 0..2 {
                let value = rng.gen_range(0..1u64 << width);
                trace.set(ModuleId(0), RegisterId(i), row, F::from_canonical_u64(value));
            }
        }
        assert_eq!(
            eval_expr(&shifted, ModuleId(0), 0, &trace),
            eval_expr(&expr, ModuleId(0), 1, &trace),
        );
    }
}
