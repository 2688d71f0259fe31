//! The arithmetic intermediate representation: terms are sums, products,
//! subtractions, constants and column accesses; constraints are the
//! primitive vanishing/range/lookup/permutation/interleaving forms plus
//! non-prover assertions.

use std::collections::HashMap;

use airlift_mir::{
    Assignment, Domain, Handle, Logical, Module, ModuleId, Register, RegisterId, RegisterWidths,
    ValueRange,
};
use p3_field::{Field, FieldAlgebra, PrimeField};

use airlift_mir::field;

/// A read of a column at `current + shift`, optionally masked to its low
/// `mask` bits. Without a mask the read is bounded only by whatever range
/// constraints the schema imposes on the register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnAccess {
    pub register: RegisterId,
    pub shift: i32,
    pub mask: Option<usize>,
}

impl ColumnAccess {
    pub fn new(register: RegisterId) -> Self {
        Self {
            register,
            shift: 0,
            mask: None,
        }
    }

    pub fn at_shift(mut self, shift: i32) -> Self {
        self.shift = shift;
        self
    }

    pub fn masked(mut self, mask: usize) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// AIR arithmetic: the only term forms the back end accepts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AirTerm<F> {
    Constant(F),
    Column(ColumnAccess),
    Sum(Vec<AirTerm<F>>),
    /// `terms[0] - terms[1] - ...`
    Sub(Vec<AirTerm<F>>),
    Product(Vec<AirTerm<F>>),
}

impl<F: Field> AirTerm<F> {
    pub fn zero() -> Self {
        AirTerm::Constant(F::ZERO)
    }

    pub fn one() -> Self {
        AirTerm::Constant(F::ONE)
    }

    pub fn column(access: ColumnAccess) -> Self {
        AirTerm::Column(access)
    }

    pub fn sum(terms: Vec<AirTerm<F>>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        let mut constant = F::ZERO;
        for term in terms {
            match term {
                AirTerm::Sum(inner) => {
                    for t in inner {
                        match t {
                            AirTerm::Constant(c) => constant += c,
                            other => flat.push(other),
                        }
                    }
                }
                AirTerm::Constant(c) => constant += c,
                other => flat.push(other),
            }
        }
        if constant != F::ZERO || flat.is_empty() {
            flat.push(AirTerm::Constant(constant));
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            AirTerm::Sum(flat)
        }
    }

    pub fn sub(terms: Vec<AirTerm<F>>) -> Self {
        let mut iter = terms.into_iter();
        let head = match iter.next() {
            Some(head) => head,
            None => return AirTerm::zero(),
        };
        let mut tail = Vec::new();
        let mut constant = F::ZERO;
        for term in iter {
            match term {
                AirTerm::Constant(c) => constant += c,
                other => tail.push(other),
            }
        }
        match head {
            AirTerm::Constant(h) if tail.is_empty() => AirTerm::Constant(h - constant),
            head => {
                if constant != F::ZERO {
                    tail.push(AirTerm::Constant(constant));
                }
                if tail.is_empty() {
                    head
                } else {
                    let mut terms = vec![head];
                    terms.extend(tail);
                    AirTerm::Sub(terms)
                }
            }
        }
    }

    pub fn product(factors: Vec<AirTerm<F>>) -> Self {
        let mut flat = Vec::with_capacity(factors.len());
        let mut constant = F::ONE;
        for factor in factors {
            match factor {
                AirTerm::Product(inner) => {
                    for t in inner {
                        match t {
                            AirTerm::Constant(c) => constant *= c,
                            other => flat.push(other),
                        }
                    }
                }
                AirTerm::Constant(c) => constant *= c,
                other => flat.push(other),
            }
        }
        if constant == F::ZERO {
            return AirTerm::zero();
        }
        if constant != F::ONE || flat.is_empty() {
            flat.insert(0, AirTerm::Constant(constant));
        }
        if flat.len() == 1 {
            flat.pop().unwrap()
        } else {
            AirTerm::Product(flat)
        }
    }

    pub fn apply_shift(&self, shift: i32) -> Self {
        if shift == 0 {
            return self.clone();
        }
        match self {
            AirTerm::Constant(_) => self.clone(),
            AirTerm::Column(access) => AirTerm::Column(access.at_shift(access.shift + shift)),
            AirTerm::Sum(ts) => AirTerm::Sum(ts.iter().map(|t| t.apply_shift(shift)).collect()),
            AirTerm::Sub(ts) => AirTerm::Sub(ts.iter().map(|t| t.apply_shift(shift)).collect()),
            AirTerm::Product(ts) => {
                AirTerm::Product(ts.iter().map(|t| t.apply_shift(shift)).collect())
            }
        }
    }

    pub fn shift_range(&self) -> Option<(i32, i32)> {
        match self {
            AirTerm::Constant(_) => None,
            AirTerm::Column(access) => Some((access.shift, access.shift)),
            AirTerm::Sum(ts) | AirTerm::Sub(ts) | AirTerm::Product(ts) => ts
                .iter()
                .filter_map(AirTerm::shift_range)
                .reduce(|(a, b), (c, d)| (a.min(c), b.max(d))),
        }
    }

    pub fn registers_read(&self) -> Vec<RegisterId> {
        let mut out = Vec::new();
        self.collect_registers(&mut out);
        out
    }

    fn collect_registers(&self, out: &mut Vec<RegisterId>) {
        match self {
            AirTerm::Constant(_) => {}
            AirTerm::Column(access) => {
                if !out.contains(&access.register) {
                    out.push(access.register);
                }
            }
            AirTerm::Sum(ts) | AirTerm::Sub(ts) | AirTerm::Product(ts) => {
                for t in ts {
                    t.collect_registers(out);
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            AirTerm::Constant(_) | AirTerm::Column(_) => 1,
            AirTerm::Sum(ts) | AirTerm::Sub(ts) | AirTerm::Product(ts) => {
                1 + ts.iter().map(AirTerm::node_count).sum::<usize>()
            }
        }
    }
}

impl<F: PrimeField> AirTerm<F> {
    /// Interval of the term under the given (range-constraint derived)
    /// register widths.
    pub fn value_range(&self, widths: &impl RegisterWidths) -> ValueRange {
        match self {
            AirTerm::Constant(c) => ValueRange::exact(field::signed_canonical(c)),
            AirTerm::Column(access) => {
                let enforced = widths.width(access.register);
                match (enforced, access.mask) {
                    (Some(w), Some(m)) => ValueRange::bits(w.min(m)),
                    (Some(w), None) => ValueRange::bits(w),
                    (None, Some(m)) => ValueRange::bits(m),
                    (None, None) => ValueRange::UNBOUNDED,
                }
            }
            AirTerm::Sum(ts) => ts
                .iter()
                .map(|t| t.value_range(widths))
                .fold(ValueRange::exact(0.into()), |a, b| a.add(&b)),
            AirTerm::Sub(ts) => {
                let mut iter = ts.iter();
                let head = iter
                    .next()
                    .map(|t| t.value_range(widths))
                    .unwrap_or(ValueRange::exact(0.into()));
                iter.fold(head, |a, t| a.sub(&t.value_range(widths)))
            }
            AirTerm::Product(ts) => ts
                .iter()
                .map(|t| t.value_range(widths))
                .fold(ValueRange::exact(1.into()), |a, b| a.mul(&b)),
        }
    }
}

impl<F: Field> std::fmt::Display for AirTerm<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join<F: Field>(
            f: &mut std::fmt::Formatter<'_>,
            ts: &[AirTerm<F>],
            sep: &str,
        ) -> std::fmt::Result {
            for (i, t) in ts.iter().enumerate() {
                if i > 0 {
                    write!(f, "{sep}")?;
                }
                write!(f, "{t}")?;
            }
            Ok(())
        }
        match self {
            AirTerm::Constant(c) => write!(f, "{c}"),
            AirTerm::Column(a) => {
                write!(f, "c{}", a.register.0)?;
                if let Some(m) = a.mask {
                    write!(f, ":u{m}")?;
                }
                if a.shift != 0 {
                    write!(f, "@{:+}", a.shift)?;
                }
                Ok(())
            }
            AirTerm::Sum(ts) => {
                write!(f, "(")?;
                join(f, ts, " + ")?;
                write!(f, ")")
            }
            AirTerm::Sub(ts) => {
                write!(f, "(")?;
                join(f, ts, " - ")?;
                write!(f, ")")
            }
            AirTerm::Product(ts) => join(f, ts, " * "),
        }
    }
}

/// One side of an AIR lookup: plain columns, optionally selector-gated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirColumnVector {
    pub module: ModuleId,
    pub selector: Option<ColumnAccess>,
    pub columns: Vec<ColumnAccess>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirVanishing<F> {
    pub handle: Handle,
    pub module: ModuleId,
    pub domain: Domain,
    /// Must evaluate to 0.
    pub term: AirTerm<F>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirRange {
    pub handle: Handle,
    pub module: ModuleId,
    pub access: ColumnAccess,
    pub bitwidth: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirAssertion<F> {
    pub handle: Handle,
    pub module: ModuleId,
    pub domain: Domain,
    /// Assertions are never prover-enforced; the logical form survives.
    pub property: Logical<F>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirLookup {
    pub handle: Handle,
    pub targets: Vec<AirColumnVector>,
    pub sources: Vec<AirColumnVector>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirPermutation {
    pub handle: Handle,
    pub module: ModuleId,
    pub targets: Vec<RegisterId>,
    pub sources: Vec<RegisterId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AirInterleaving {
    pub handle: Handle,
    pub target_module: ModuleId,
    pub source_module: ModuleId,
    pub target: Vec<ColumnAccess>,
    pub sources: Vec<Vec<ColumnAccess>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AirConstraint<F> {
    Vanishing(AirVanishing<F>),
    Assertion(AirAssertion<F>),
    Range(AirRange),
    Lookup(AirLookup),
    Permutation(AirPermutation),
    Interleaving(AirInterleaving),
}

impl<F> AirConstraint<F> {
    pub fn handle(&self) -> &Handle {
        match self {
            AirConstraint::Vanishing(c) => &c.handle,
            AirConstraint::Assertion(c) => &c.handle,
            AirConstraint::Range(c) => &c.handle,
            AirConstraint::Lookup(c) => &c.handle,
            AirConstraint::Permutation(c) => &c.handle,
            AirConstraint::Interleaving(c) => &c.handle,
        }
    }
}

/// An AIR module: the register table (source registers plus the computed
/// columns the gadgets introduced), the trace-expansion assignments, and the
/// primitive constraints.
#[derive(Clone, Debug)]
pub struct AirModule<F> {
    pub name: String,
    registers: Vec<Register>,
    pub assignments: Vec<Assignment<F>>,
    pub constraints: Vec<AirConstraint<F>>,
    pub allow_padding: bool,
    pub is_public: bool,
    pub is_synthetic: bool,
    pub length_keys: Vec<String>,
}

impl<F: Field> AirModule<F> {
    pub fn from_module(module: &Module<F>) -> Self {
        Self {
            name: module.name.clone(),
            registers: module.registers().to_vec(),
            assignments: module.assignments.clone(),
            constraints: Vec::new(),
            allow_padding: module.allow_padding,
            is_public: module.is_public,
            is_synthetic: module.is_synthetic,
            length_keys: module.length_keys.clone(),
        }
    }

    pub fn add_register(&mut self, register: Register) -> RegisterId {
        let id = RegisterId(self.registers.len());
        self.registers.push(register);
        id
    }

    pub fn register(&self, id: RegisterId) -> &Register {
        &self.registers[id.0]
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }
}

#[derive(Clone, Debug, Default)]
pub struct AirSchema<F> {
    modules: Vec<AirModule<F>>,
}

impl<F: Field> AirSchema<F> {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn add_module(&mut self, module: AirModule<F>) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(module);
        id
    }

    pub fn module(&self, id: ModuleId) -> &AirModule<F> {
        &self.modules[id.0]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut AirModule<F> {
        &mut self.modules[id.0]
    }

    pub fn modules(&self) -> &[AirModule<F>] {
        &self.modules
    }
}

/// Register widths as enforced by range constraints: a register with no
/// range constraint is unbounded at the AIR layer, whatever its declared
/// width says.
#[derive(Clone, Debug, Default)]
pub struct EnforcedWidths {
    widths: HashMap<RegisterId, usize>,
}

impl EnforcedWidths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one range constraint's bound. A register bounded twice is a
    /// duplicate range constraint.
    pub fn record(&mut self, register: RegisterId, bitwidth: usize) {
        let previous = self.widths.insert(register, bitwidth);
        assert!(
            previous.is_none(),
            "duplicate range constraint detected"
        );
    }

    /// Widens the table with a width known by construction (computed gadget
    /// columns).
    pub fn record_computed(&mut self, register: RegisterId, bitwidth: usize) {
        self.widths.insert(register, bitwidth);
    }
}

impl RegisterWidths for EnforcedWidths {
    fn width(&self, register: RegisterId) -> Option<usize> {
        self.widths.get(&register).copied()
    }
}
