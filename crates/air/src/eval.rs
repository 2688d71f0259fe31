//! Evaluation of AIR constraints against traces: the AIR analogue of the
//! MIR `accepts` tester, plus trace expansion over AIR modules. Used for
//! debugging and for the lowering-soundness tests.

use airlift_mir::{
    field,
    trace::{eval_expr, eval_logical},
    Assignment, Coverage, Direction, Domain, Failure, ModuleId, RegisterId, Trace, VecTrace,
};
use num_bigint::BigUint;
use num_traits::One;
use p3_field::{Field, FieldAlgebra, PrimeField};
use std::collections::HashSet;

use crate::schema::{
    AirColumnVector, AirConstraint, AirSchema, AirTerm, AirVanishing, ColumnAccess,
};

/// Evaluates an AIR term at `row` of `module`. The caller must have checked
/// that every shifted access stays inside the trace.
pub fn eval_term<F: PrimeField>(
    term: &AirTerm<F>,
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
) -> F {
    match term {
        AirTerm::Constant(c) => *c,
        AirTerm::Column(access) => eval_column(access, module, row, trace),
        AirTerm::Sum(ts) => ts
            .iter()
            .map(|t| eval_term(t, module, row, trace))
            .fold(F::ZERO, |a, b| a + b),
        AirTerm::Sub(ts) => {
            let mut iter = ts.iter();
            let head = iter
                .next()
                .map(|t| eval_term(t, module, row, trace))
                .unwrap_or(F::ZERO);
            iter.fold(head, |a, t| a - eval_term(t, module, row, trace))
        }
        AirTerm::Product(ts) => ts
            .iter()
            .map(|t| eval_term(t, module, row, trace))
            .fold(F::ONE, |a, b| a * b),
    }
}

fn eval_column<F: PrimeField>(
    access: &ColumnAccess,
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
) -> F {
    let shifted = row as isize + access.shift as isize;
    debug_assert!(shifted >= 0 && (shifted as usize) < trace.height(module));
    let value = trace.get(module, access.register, shifted as usize);
    match access.mask {
        Some(mask) => field::mask_value(&value, mask),
        None => value,
    }
}

/// Evaluates one AIR constraint against a trace; mirrors the MIR tester.
pub fn accepts_air<F: PrimeField>(
    constraint: &AirConstraint<F>,
    trace: &impl Trace<F>,
    schema: &AirSchema<F>,
) -> (Coverage, Option<Failure<F>>) {
    match constraint {
        AirConstraint::Vanishing(c) => accepts_vanishing(c, trace),
        AirConstraint::Assertion(c) => {
            let height = trace.height(c.module);
            let mut coverage = Coverage::empty(height);
            let (lo, hi) = c.property.shift_range().unwrap_or((0, 0));
            for row in rows_of(c.domain, height) {
                if !shifts_fit(row, lo, hi, height) {
                    continue;
                }
                coverage.set(row);
                if !eval_logical(&c.property, c.module, row, trace) {
                    let failure = Failure {
                        handle: c.handle.clone(),
                        row,
                        values: None,
                    };
                    return (coverage, Some(failure));
                }
            }
            (coverage, None)
        }
        AirConstraint::Range(c) => {
            let height = trace.height(c.module);
            let mut coverage = Coverage::empty(height);
            let bound = BigUint::one() << c.bitwidth;
            for row in 0..height {
                if !shifts_fit(row, c.access.shift, c.access.shift, height) {
                    continue;
                }
                coverage.set(row);
                let value = eval_column(&c.access, c.module, row, trace);
                if value.as_canonical_biguint() >= bound {
                    let failure = Failure {
                        handle: c.handle.clone(),
                        row,
                        values: Some(vec![value]),
                    };
                    return (coverage, Some(failure));
                }
            }
            (coverage, None)
        }
        AirConstraint::Lookup(c) => {
            let mut table: HashSet<Vec<BigUint>> = HashSet::new();
            for vector in &c.targets {
                for_each_selected_row(vector, trace, |_, tuple| {
                    table.insert(tuple);
                    None::<Failure<F>>
                });
            }
            let coverage_len = c
                .sources
                .first()
                .map(|v| trace.height(v.module))
                .unwrap_or(0);
            let mut coverage = Coverage::empty(coverage_len);
            for (index, vector) in c.sources.iter().enumerate() {
                let violation = for_each_selected_row(vector, trace, |row, tuple| {
                    if index == 0 {
                        coverage.set(row);
                    }
                    if table.contains(&tuple) {
                        None
                    } else {
                        Some(Failure {
                            handle: c.handle.clone(),
                            row,
                            values: Some(
                                tuple.iter().map(|v| field::from_biguint(v)).collect(),
                            ),
                        })
                    }
                });
                if violation.is_some() {
                    return (coverage, violation);
                }
            }
            (coverage, None)
        }
        AirConstraint::Permutation(c) => {
            let height = trace.height(c.module);
            let mut coverage = Coverage::empty(height);
            for row in 0..height {
                coverage.set(row);
            }
            let collect = |ids: &[RegisterId]| {
                let mut rows: Vec<Vec<BigUint>> = (0..height)
                    .map(|row| {
                        ids.iter()
                            .map(|id| trace.get(c.module, *id, row).as_canonical_biguint())
                            .collect()
                    })
                    .collect();
                rows.sort();
                rows
            };
            let failure = (collect(&c.targets) != collect(&c.sources)).then(|| Failure {
                handle: c.handle.clone(),
                row: 0,
                values: None,
            });
            (coverage, failure)
        }
        AirConstraint::Interleaving(c) => {
            let height = trace.height(c.target_module);
            let arity = c.sources.len();
            let mut coverage = Coverage::empty(height);
            for row in 0..height {
                coverage.set(row);
                let source = &c.sources[row % arity];
                let expected =
                    eval_column_vector(source, c.source_module, row / arity, trace, schema);
                let actual = eval_column_vector(&c.target, c.target_module, row, trace, schema);
                if expected != actual {
                    let failure = Failure {
                        handle: c.handle.clone(),
                        row,
                        values: Some(vec![actual, expected]),
                    };
                    return (coverage, Some(failure));
                }
            }
            (coverage, None)
        }
    }
}

fn accepts_vanishing<F: PrimeField>(
    c: &AirVanishing<F>,
    trace: &impl Trace<F>,
) -> (Coverage, Option<Failure<F>>) {
    let height = trace.height(c.module);
    let mut coverage = Coverage::empty(height);
    let (lo, hi) = c.term.shift_range().unwrap_or((0, 0));
    for row in rows_of(c.domain, height) {
        if !shifts_fit(row, lo, hi, height) {
            continue;
        }
        coverage.set(row);
        let value = eval_term(&c.term, c.module, row, trace);
        if !value.is_zero() {
            let failure = Failure {
                handle: c.handle.clone(),
                row,
                values: Some(vec![value]),
            };
            return (coverage, Some(failure));
        }
    }
    (coverage, None)
}

fn rows_of(domain: Domain, height: usize) -> Vec<usize> {
    match domain {
        Domain::All => (0..height).collect(),
        Domain::At(k) => {
            let row = if k < 0 { height as isize + k } else { k };
            if row < 0 || row >= height as isize {
                Vec::new()
            } else {
                vec![row as usize]
            }
        }
    }
}

fn shifts_fit(row: usize, lo: i32, hi: i32, height: usize) -> bool {
    let first = row as isize + lo as isize;
    let last = row as isize + hi as isize;
    first >= 0 && last < height as isize
}

fn for_each_selected_row<F: PrimeField, R>(
    vector: &AirColumnVector,
    trace: &impl Trace<F>,
    mut body: impl FnMut(usize, Vec<BigUint>) -> Option<R>,
) -> Option<R> {
    let height = trace.height(vector.module);
    let shifts = vector
        .columns
        .iter()
        .chain(vector.selector.as_ref())
        .map(|c| c.shift)
        .fold(None, |acc: Option<(i32, i32)>, s| match acc {
            None => Some((s, s)),
            Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
        });
    let (lo, hi) = shifts.unwrap_or((0, 0));
    for row in 0..height {
        if !shifts_fit(row, lo, hi, height) {
            continue;
        }
        if let Some(selector) = &vector.selector {
            if eval_column(selector, vector.module, row, trace).is_zero() {
                continue;
            }
        }
        let tuple = vector
            .columns
            .iter()
            .map(|c| eval_column(c, vector.module, row, trace).as_canonical_biguint())
            .collect();
        if let Some(out) = body(row, tuple) {
            return Some(out);
        }
    }
    None
}

fn eval_column_vector<F: PrimeField>(
    columns: &[ColumnAccess],
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
    schema: &AirSchema<F>,
) -> F {
    let mut acc = F::ZERO;
    let mut offset = 0usize;
    for column in columns {
        acc += eval_column(column, module, row, trace) * field::two_pow_n::<F>(offset);
        let width = column
            .mask
            .unwrap_or(schema.module(module).register(column.register).width);
        offset += width;
    }
    acc
}

/// A zero-filled trace shaped after an AIR schema.
pub fn trace_for<F: Field>(schema: &AirSchema<F>, heights: &[usize]) -> VecTrace<F> {
    let registers: Vec<usize> = schema.modules().iter().map(|m| m.num_registers()).collect();
    VecTrace::with_shape(&registers, heights)
}

/// Fills the computed columns of an AIR trace by running the module
/// assignments in order; intended for tests.
pub fn expand_air_trace<F: PrimeField>(schema: &AirSchema<F>, trace: &mut VecTrace<F>) {
    for (module_index, module) in schema.modules().iter().enumerate() {
        let module_id = ModuleId(module_index);
        let height = trace.height(module_id);
        tracing::trace!(
            module = %module.name,
            assignments = module.assignments.len(),
            "expanding computed columns"
        );
        for assignment in &module.assignments {
            match assignment {
                Assignment::Computed {
                    expr,
                    direction,
                    targets,
                    ..
                } => {
                    let rows: Vec<usize> = match direction {
                        Direction::Forward => (0..height).collect(),
                        Direction::Backward => (0..height).rev().collect(),
                    };
                    let (lo, hi) = expr.shift_range().unwrap_or((0, 0));
                    for row in rows {
                        if !shifts_fit(row, lo, hi, height) {
                            continue;
                        }
                        let value = eval_expr(expr, module_id, row, trace);
                        if targets.len() == 1 {
                            trace.set(module_id, targets[0], row, value);
                        } else {
                            let mut remaining = value.as_canonical_biguint();
                            for target in targets {
                                let width = module.register(*target).width;
                                let mask = (BigUint::one() << width) - BigUint::one();
                                trace.set(
                                    module_id,
                                    *target,
                                    row,
                                    field::from_biguint(&(&remaining & &mask)),
                                );
                                remaining >>= width;
                            }
                        }
                    }
                }
                Assignment::Native {
                    function,
                    targets,
                    sources,
                } => match function.as_str() {
                    "inverse" => {
                        assert_eq!(targets.len(), 1);
                        assert_eq!(sources.len(), 1, "inverse of a compound term");
                        for row in 0..height {
                            let value = trace.get(module_id, sources[0], row);
                            let inverse = value.try_inverse().unwrap_or(F::ZERO);
                            trace.set(module_id, targets[0], row, inverse);
                        }
                    }
                    other => panic!("unknown native computation {other:?}"),
                },
                Assignment::SortedPermutation {
                    targets,
                    signs,
                    sources,
                } => {
                    let mut rows: Vec<Vec<F>> = (0..height)
                        .map(|row| {
                            sources
                                .iter()
                                .map(|id| trace.get(module_id, *id, row))
                                .collect()
                        })
                        .collect();
                    rows.sort_by(|a, b| {
                        for ((a, b), sign) in a.iter().zip(b).zip(signs) {
                            let ordering =
                                a.as_canonical_biguint().cmp(&b.as_canonical_biguint());
                            let ordering = if *sign { ordering } else { ordering.reverse() };
                            if ordering != std::cmp::Ordering::Equal {
                                return ordering;
                            }
                        }
                        std::cmp::Ordering::Equal
                    });
                    for (row, tuple) in rows.iter().enumerate() {
                        for (target, value) in targets.iter().zip(tuple) {
                            trace.set(module_id, *target, row, *value);
                        }
                    }
                }
            }
        }
    }
}
