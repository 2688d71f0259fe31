use std::collections::HashSet;

use num_bigint::BigUint;
use num_traits::One;
use p3_field::{Field, FieldAlgebra, PrimeField};

use crate::{
    assignment::{Assignment, Direction},
    constraint::{Constraint, Domain, Handle, LookupVector, VanishingConstraint},
    expr::{Expr, RegisterAccess},
    field,
    logical::Logical,
    schema::{ModuleId, RegisterId, Schema},
};

/// Read-only access to a trace: one column per register per module.
pub trait Trace<F> {
    fn height(&self, module: ModuleId) -> usize;
    fn get(&self, module: ModuleId, register: RegisterId, row: usize) -> F;
}

/// The rows of a module a constraint evaluation actually visited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coverage {
    bits: Vec<u64>,
    len: usize,
}

impl Coverage {
    pub fn empty(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
            len,
        }
    }

    pub fn set(&mut self, row: usize) {
        debug_assert!(row < self.len);
        self.bits[row / 64] |= 1 << (row % 64);
    }

    pub fn get(&self, row: usize) -> bool {
        row < self.len && self.bits[row / 64] & (1 << (row % 64)) != 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// A constraint violation found while evaluating a trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure<F> {
    pub handle: Handle,
    pub row: usize,
    /// The offending tuple, when the constraint has one.
    pub values: Option<Vec<F>>,
}

/// A dense in-memory trace, used by tests and by the `accepts` tester.
#[derive(Clone, Debug)]
pub struct VecTrace<F> {
    columns: Vec<Vec<Vec<F>>>,
    heights: Vec<usize>,
}

impl<F: Field> VecTrace<F> {
    /// A zero-filled trace with the given number of registers and height per
    /// module.
    pub fn with_shape(registers: &[usize], heights: &[usize]) -> Self {
        assert_eq!(registers.len(), heights.len());
        let columns = registers
            .iter()
            .zip(heights)
            .map(|(num_registers, height)| vec![vec![F::ZERO; *height]; *num_registers])
            .collect();
        Self {
            columns,
            heights: heights.to_vec(),
        }
    }

    /// A zero-filled trace shaped after `schema`, one height per module.
    pub fn for_schema(schema: &Schema<F>, heights: &[usize]) -> Self {
        assert_eq!(schema.modules().len(), heights.len());
        let columns = schema
            .modules()
            .iter()
            .zip(heights)
            .map(|(module, height)| vec![vec![F::ZERO; *height]; module.num_registers()])
            .collect();
        Self {
            columns,
            heights: heights.to_vec(),
        }
    }

    pub fn set(&mut self, module: ModuleId, register: RegisterId, row: usize, value: F) {
        self.columns[module.0][register.0][row] = value;
    }

    pub fn set_column(&mut self, module: ModuleId, register: RegisterId, values: Vec<F>) {
        assert_eq!(values.len(), self.heights[module.0]);
        self.columns[module.0][register.0] = values;
    }

    pub fn column(&self, module: ModuleId, register: RegisterId) -> &[F] {
        &self.columns[module.0][register.0]
    }
}

impl<F: Field> Trace<F> for VecTrace<F> {
    fn height(&self, module: ModuleId) -> usize {
        self.heights[module.0]
    }

    fn get(&self, module: ModuleId, register: RegisterId, row: usize) -> F {
        self.columns[module.0][register.0][row]
    }
}

/// Evaluates an arithmetic term at `row` of `module`. The caller must have
/// checked that every shifted access stays inside the trace.
pub fn eval_expr<F: PrimeField>(
    expr: &Expr<F>,
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
) -> F {
    match expr {
        Expr::Constant(c) | Expr::Labelled(_, c) => *c,
        Expr::Access(access) => eval_access(access, module, row, trace),
        Expr::Vector(limbs) => {
            let mut acc = F::ZERO;
            let mut offset = 0usize;
            for limb in limbs {
                let value = eval_access(limb, module, row, trace);
                acc += value * field::two_pow_n::<F>(offset);
                offset += limb.read_width();
            }
            acc
        }
        Expr::Sum(ts) => ts
            .iter()
            .map(|t| eval_expr(t, module, row, trace))
            .fold(F::ZERO, |a, b| a + b),
        Expr::Sub(ts) => {
            let mut iter = ts.iter();
            let head = iter
                .next()
                .map(|t| eval_expr(t, module, row, trace))
                .unwrap_or(F::ZERO);
            iter.fold(head, |a, t| a - eval_expr(t, module, row, trace))
        }
        Expr::Product(ts) => ts
            .iter()
            .map(|t| eval_expr(t, module, row, trace))
            .fold(F::ONE, |a, b| a * b),
        Expr::Exp(t, k) => eval_expr(t, module, row, trace).exp_u64(*k),
        Expr::Cast(t, w) => field::mask_value(&eval_expr(t, module, row, trace), *w),
        Expr::Norm(t) => {
            if eval_expr(t, module, row, trace).is_zero() {
                F::ZERO
            } else {
                F::ONE
            }
        }
        Expr::IfZero(c, t, f) => {
            let branch = if eval_logical(c, module, row, trace) {
                t
            } else {
                f
            };
            branch
                .as_ref()
                .map(|b| eval_expr(b, module, row, trace))
                .unwrap_or(F::ZERO)
        }
    }
}

fn eval_access<F: PrimeField>(
    access: &RegisterAccess,
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
) -> F {
    if !access.is_used() {
        return F::ZERO;
    }
    let shifted = row as isize + access.shift as isize;
    debug_assert!(shifted >= 0 && (shifted as usize) < trace.height(module));
    let value = trace.get(module, access.register, shifted as usize);
    if access.mask < access.bitwidth {
        field::mask_value(&value, access.mask)
    } else {
        value
    }
}

/// Evaluates a logical term at `row` of `module`.
pub fn eval_logical<F: PrimeField>(
    logical: &Logical<F>,
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
) -> bool {
    match logical {
        Logical::Equal(a, b) => eval_expr(a, module, row, trace) == eval_expr(b, module, row, trace),
        Logical::NotEqual(a, b) => {
            eval_expr(a, module, row, trace) != eval_expr(b, module, row, trace)
        }
        Logical::Inequality { strict, lhs, rhs } => {
            let lhs = eval_expr(lhs, module, row, trace).as_canonical_biguint();
            let rhs = eval_expr(rhs, module, row, trace).as_canonical_biguint();
            if *strict {
                lhs < rhs
            } else {
                lhs <= rhs
            }
        }
        Logical::Conjunct(ts) => ts.iter().all(|t| eval_logical(t, module, row, trace)),
        Logical::Disjunct(ts) => ts.iter().any(|t| eval_logical(t, module, row, trace)),
        Logical::Negate(t) => !eval_logical(t, module, row, trace),
        Logical::Ite(c, t, f) => {
            let branch = if eval_logical(c, module, row, trace) {
                t
            } else {
                f
            };
            branch
                .as_ref()
                .map(|b| eval_logical(b, module, row, trace))
                .unwrap_or(true)
        }
    }
}

/// Evaluates one constraint against a trace. Returns the rows visited and
/// the first violation, if any. For lookups the coverage refers to the rows
/// of the first source vector's module.
pub fn accepts<F: PrimeField>(
    constraint: &Constraint<F>,
    trace: &impl Trace<F>,
    schema: &Schema<F>,
) -> (Coverage, Option<Failure<F>>) {
    constraint.validate(schema);
    match constraint {
        Constraint::Vanishing(c) | Constraint::Assertion(c) => accepts_vanishing(c, trace),
        Constraint::Range(c) => {
            let height = trace.height(c.module);
            let mut coverage = Coverage::empty(height);
            for row in 0..height {
                for (access, bitwidth) in c.sources.iter().zip(&c.bitwidths) {
                    if !row_in_bounds(row, access.shift, height) {
                        continue;
                    }
                    coverage.set(row);
                    let value = eval_access(access, c.module, row, trace);
                    let bound = BigUint::one() << *bitwidth;
                    if value.as_canonical_biguint() >= bound {
                        return (
                            coverage,
                            Some(Failure {
                                handle: c.handle.clone(),
                                row,
                                values: Some(vec![value]),
                            }),
                        );
                    }
                }
            }
            (coverage, None)
        }
        Constraint::Sorted(c) => {
            let height = trace.height(c.module);
            let mut coverage = Coverage::empty(height);
            let mut previous: Option<Vec<F>> = None;
            for row in 0..height {
                let participates = match &c.selector {
                    None => true,
                    Some(selector) => !eval_access(selector, c.module, row, trace).is_zero(),
                };
                if !participates {
                    continue;
                }
                coverage.set(row);
                let tuple: Vec<F> = c
                    .sources
                    .iter()
                    .map(|access| eval_access(access, c.module, row, trace))
                    .collect();
                if let Some(previous) = &previous {
                    if !ordered(previous, &tuple, &c.signs, c.strict) {
                        return (
                            coverage,
                            Some(Failure {
                                handle: c.handle.clone(),
                                row,
                                values: Some(tuple),
                            }),
                        );
                    }
                }
                previous = Some(tuple);
            }
            (coverage, None)
        }
        Constraint::Permutation(c) => {
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
            if collect(&c.targets) != collect(&c.sources) {
                let failure = Failure {
                    handle: c.handle.clone(),
                    row: 0,
                    values: None,
                };
                return (coverage, Some(failure));
            }
            (coverage, None)
        }
        Constraint::Interleaving(c) => {
            let height = trace.height(c.target_module);
            let arity = c.sources.len();
            let mut coverage = Coverage::empty(height);
            for row in 0..height {
                coverage.set(row);
                let source = &c.sources[row % arity];
                let expected = eval_vector(source, c.source_module, row / arity, trace);
                let actual = eval_vector(&c.target, c.target_module, row, trace);
                if expected != actual {
                    return (
                        coverage,
                        Some(Failure {
                            handle: c.handle.clone(),
                            row,
                            values: Some(vec![actual, expected]),
                        }),
                    );
                }
            }
            (coverage, None)
        }
        Constraint::Lookup(c) => accepts_lookup(c, trace),
    }
}

fn accepts_vanishing<F: PrimeField>(
    c: &VanishingConstraint<F>,
    trace: &impl Trace<F>,
) -> (Coverage, Option<Failure<F>>) {
    let height = trace.height(c.module);
    let mut coverage = Coverage::empty(height);
    let (shift_lo, shift_hi) = c.property.shift_range().unwrap_or((0, 0));
    let rows: Vec<usize> = match c.domain {
        Domain::All => (0..height).collect(),
        Domain::At(k) => {
            let row = if k < 0 { height as isize + k } else { k };
            if row < 0 || row >= height as isize {
                return (coverage, None);
            }
            vec![row as usize]
        }
    };
    for row in rows {
        let lo = row as isize + shift_lo as isize;
        let hi = row as isize + shift_hi as isize;
        if lo < 0 || hi >= height as isize {
            continue;
        }
        coverage.set(row);
        if !eval_logical(&c.property, c.module, row, trace) {
            return (
                coverage,
                Some(Failure {
                    handle: c.handle.clone(),
                    row,
                    values: None,
                }),
            );
        }
    }
    (coverage, None)
}

fn accepts_lookup<F: PrimeField>(
    c: &crate::constraint::LookupConstraint<F>,
    trace: &impl Trace<F>,
) -> (Coverage, Option<Failure<F>>) {
    let mut table: HashSet<Vec<BigUint>> = HashSet::new();
    for vector in &c.targets {
        for_each_selected_row(vector, trace, |row| {
            let tuple = tuple_values(vector, row, trace);
            table.insert(tuple);
            None::<()>
        });
    }
    let coverage_len = c
        .sources
        .first()
        .map(|v| trace.height(v.module))
        .unwrap_or(0);
    let mut coverage = Coverage::empty(coverage_len);
    for (index, vector) in c.sources.iter().enumerate() {
        let violation = for_each_selected_row(vector, trace, |row| {
            if index == 0 {
                coverage.set(row);
            }
            let tuple = tuple_values(vector, row, trace);
            if table.contains(&tuple) {
                None
            } else {
                Some(Failure {
                    handle: c.handle.clone(),
                    row,
                    values: Some(
                        vector
                            .terms
                            .iter()
                            .map(|t| eval_expr(t, vector.module, row, trace))
                            .collect(),
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

fn for_each_selected_row<F: PrimeField, R>(
    vector: &LookupVector<F>,
    trace: &impl Trace<F>,
    mut body: impl FnMut(usize) -> Option<R>,
) -> Option<R> {
    let height = trace.height(vector.module);
    let shifts = vector
        .terms
        .iter()
        .filter_map(Expr::shift_range)
        .chain(vector.selector.as_ref().and_then(Expr::shift_range))
        .reduce(|(a, b), (c, d)| (a.min(c), b.max(d)));
    let (shift_lo, shift_hi) = shifts.unwrap_or((0, 0));
    for row in 0..height {
        let lo = row as isize + shift_lo as isize;
        let hi = row as isize + shift_hi as isize;
        if lo < 0 || hi >= height as isize {
            continue;
        }
        let selected = match &vector.selector {
            None => true,
            Some(selector) => !eval_expr(selector, vector.module, row, trace).is_zero(),
        };
        if !selected {
            continue;
        }
        if let Some(out) = body(row) {
            return Some(out);
        }
    }
    None
}

fn tuple_values<F: PrimeField>(
    vector: &LookupVector<F>,
    row: usize,
    trace: &impl Trace<F>,
) -> Vec<BigUint> {
    vector
        .terms
        .iter()
        .map(|t| eval_expr(t, vector.module, row, trace).as_canonical_biguint())
        .collect()
}

fn eval_vector<F: PrimeField>(
    accesses: &[RegisterAccess],
    module: ModuleId,
    row: usize,
    trace: &impl Trace<F>,
) -> F {
    let mut acc = F::ZERO;
    let mut offset = 0usize;
    for access in accesses {
        acc += eval_access(access, module, row, trace) * field::two_pow_n::<F>(offset);
        offset += access.read_width();
    }
    acc
}

fn row_in_bounds(row: usize, shift: i32, height: usize) -> bool {
    let shifted = row as isize + shift as isize;
    shifted >= 0 && (shifted as usize) < height
}

fn ordered<F: PrimeField>(previous: &[F], current: &[F], signs: &[bool], strict: bool) -> bool {
    for ((p, c), sign) in previous.iter().zip(current).zip(signs) {
        let (p, c) = (p.as_canonical_biguint(), c.as_canonical_biguint());
        let (lesser, greater) = if *sign { (p, c) } else { (c, p) };
        if lesser < greater {
            return true;
        }
        if lesser > greater {
            return false;
        }
    }
    !strict
}

/// Fills the computed columns of a trace whose input columns are already
/// populated, by running the schema's assignments in order. Intended for
/// tests; a production trace expander lives outside the core.
pub fn expand_trace<F: PrimeField>(schema: &Schema<F>, trace: &mut VecTrace<F>) {
    for (module_index, module) in schema.modules().iter().enumerate() {
        let module_id = ModuleId(module_index);
        let height = trace.heights[module_index];
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
                    let (shift_lo, shift_hi) = expr.shift_range().unwrap_or((0, 0));
                    for row in rows {
                        let lo = row as isize + shift_lo as isize;
                        let hi = row as isize + shift_hi as isize;
                        if lo < 0 || hi >= height as isize {
                            continue;
                        }
                        let value = eval_expr(expr, module_id, row, trace);
                        write_decomposed(trace, module_id, targets, module, row, value);
                    }
                }
                Assignment::Native {
                    function,
                    targets,
                    sources,
                } => match function.as_str() {
                    "inverse" => {
                        assert_eq!(targets.len(), 1);
                        assert_eq!(sources.len(), 1);
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
                    rows.sort_by(|a, b| compare_tuples(a, b, signs));
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

fn compare_tuples<F: PrimeField>(a: &[F], b: &[F], signs: &[bool]) -> std::cmp::Ordering {
    for ((a, b), sign) in a.iter().zip(b).zip(signs) {
        let ordering = a.as_canonical_biguint().cmp(&b.as_canonical_biguint());
        let ordering = if *sign { ordering } else { ordering.reverse() };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

fn write_decomposed<F: PrimeField>(
    trace: &mut VecTrace<F>,
    module_id: ModuleId,
    targets: &[RegisterId],
    module: &crate::schema::Module<F>,
    row: usize,
    value: F,
) {
    if targets.len() == 1 {
        trace.set(module_id, targets[0], row, value);
        return;
    }
    let mut remaining = value.as_canonical_biguint();
    for target in targets {
        let width = module.register(*target).width;
        let mask = (BigUint::one() << width) - BigUint::one();
        let chunk = &remaining & &mask;
        trace.set(module_id, *target, row, field::from_biguint(&chunk));
        remaining >>= width;
    }
}
