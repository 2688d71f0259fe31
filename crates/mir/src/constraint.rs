use std::{collections::HashMap, fmt};

use p3_field::Field;

use crate::{
    expr::{Expr, RegisterAccess},
    logical::Logical,
    schema::{ModuleId, RegisterId, Schema},
};

/// Stable, human-readable identifier of a constraint; carried through every
/// rewrite and reported on evaluation failures.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub String);

impl Handle {
    pub fn new(name: impl Into<String>) -> Self {
        Handle(name.into())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row domain of a vanishing constraint: every row, or a single row
/// (negative indices count from the end of the trace).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    All,
    At(isize),
}

/// One side of a lookup: a tuple of terms per row of `module`, optionally
/// gated by a selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupVector<F> {
    pub module: ModuleId,
    pub selector: Option<Expr<F>>,
    pub terms: Vec<Expr<F>>,
}

impl<F> LookupVector<F> {
    pub fn new(module: ModuleId, terms: Vec<Expr<F>>) -> Self {
        Self {
            module,
            selector: None,
            terms,
        }
    }

    pub fn with_selector(module: ModuleId, selector: Expr<F>, terms: Vec<Expr<F>>) -> Self {
        Self {
            module,
            selector: Some(selector),
            terms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VanishingConstraint<F> {
    pub handle: Handle,
    pub module: ModuleId,
    pub domain: Domain,
    pub property: Logical<F>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeConstraint {
    pub handle: Handle,
    pub module: ModuleId,
    pub sources: Vec<RegisterAccess>,
    pub bitwidths: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortedConstraint {
    pub handle: Handle,
    pub module: ModuleId,
    /// Width bound on every compared column.
    pub bitwidth: usize,
    pub selector: Option<RegisterAccess>,
    pub sources: Vec<RegisterAccess>,
    /// Per column: `true` sorts ascending.
    pub signs: Vec<bool>,
    pub strict: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermutationConstraint {
    pub handle: Handle,
    pub module: ModuleId,
    pub targets: Vec<RegisterId>,
    pub sources: Vec<RegisterId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterleavingConstraint {
    pub handle: Handle,
    pub target_module: ModuleId,
    pub source_module: ModuleId,
    pub target: Vec<RegisterAccess>,
    pub sources: Vec<Vec<RegisterAccess>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupConstraint<F> {
    pub handle: Handle,
    pub targets: Vec<LookupVector<F>>,
    pub sources: Vec<LookupVector<F>>,
}

/// The constraint kinds of the mid-level representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint<F> {
    /// The property must hold on the domain; enforced by the prover.
    Vanishing(VanishingConstraint<F>),
    /// Same shape as [Constraint::Vanishing] but never prover-enforced.
    Assertion(VanishingConstraint<F>),
    /// Each source reads below `2^bitwidth`.
    Range(RangeConstraint),
    /// Lexicographic order on the source tuples of successive rows.
    Sorted(SortedConstraint),
    /// Target columns are a row-permutation of source columns.
    Permutation(PermutationConstraint),
    /// The target column interleaves the source columns row-wise.
    Interleaving(InterleavingConstraint),
    /// Every source tuple occurs among the target tuples.
    Lookup(LookupConstraint<F>),
}

impl<F: Field> Constraint<F> {
    pub fn handle(&self) -> &Handle {
        match self {
            Constraint::Vanishing(c) | Constraint::Assertion(c) => &c.handle,
            Constraint::Range(c) => &c.handle,
            Constraint::Sorted(c) => &c.handle,
            Constraint::Permutation(c) => &c.handle,
            Constraint::Interleaving(c) => &c.handle,
            Constraint::Lookup(c) => &c.handle,
        }
    }

    /// Tree size, used by the exploding-constraint advisory.
    pub fn node_count(&self) -> usize {
        match self {
            Constraint::Vanishing(c) | Constraint::Assertion(c) => c.property.node_count(),
            Constraint::Range(c) => c.sources.len(),
            Constraint::Sorted(c) => c.sources.len(),
            Constraint::Permutation(c) => c.sources.len() + c.targets.len(),
            Constraint::Interleaving(c) => {
                c.target.len() + c.sources.iter().map(Vec::len).sum::<usize>()
            }
            Constraint::Lookup(c) => c
                .targets
                .iter()
                .chain(&c.sources)
                .map(|v| {
                    v.terms.iter().map(Expr::node_count).sum::<usize>()
                        + v.selector.as_ref().map_or(0, Expr::node_count)
                })
                .sum(),
        }
    }

    /// Replaces matching labelled constants throughout the constraint.
    /// Constraints without arithmetic terms are returned unchanged.
    pub fn substitute(&self, bindings: &HashMap<String, F>) -> Self {
        match self {
            Constraint::Vanishing(c) => Constraint::Vanishing(VanishingConstraint {
                property: c.property.substitute(bindings),
                ..c.clone()
            }),
            Constraint::Assertion(c) => Constraint::Assertion(VanishingConstraint {
                property: c.property.substitute(bindings),
                ..c.clone()
            }),
            Constraint::Lookup(c) => {
                let vector = |v: &LookupVector<F>| LookupVector {
                    module: v.module,
                    selector: v.selector.as_ref().map(|s| s.substitute(bindings)),
                    terms: v.terms.iter().map(|t| t.substitute(bindings)).collect(),
                };
                Constraint::Lookup(LookupConstraint {
                    handle: c.handle.clone(),
                    targets: c.targets.iter().map(vector).collect(),
                    sources: c.sources.iter().map(vector).collect(),
                })
            }
            Constraint::Range(_)
            | Constraint::Sorted(_)
            | Constraint::Permutation(_)
            | Constraint::Interleaving(_) => self.clone(),
        }
    }

    /// Structural well-formedness against the owning schema; violations are
    /// programming errors in the schema producer.
    pub(crate) fn validate(&self, schema: &Schema<F>) {
        let check_access = |module: ModuleId, access: &RegisterAccess| {
            if !access.is_used() {
                return;
            }
            let owner = schema.module(module);
            assert!(
                access.register.0 < owner.num_registers(),
                "constraint {:?} reads register {} outside module {:?}",
                self.handle(),
                access.register.0,
                owner.name
            );
            assert!(
                access.mask <= access.bitwidth,
                "constraint {:?}: mask {} exceeds declared width {}",
                self.handle(),
                access.mask,
                access.bitwidth
            );
        };
        match self {
            Constraint::Vanishing(c) | Constraint::Assertion(c) => {
                let mut accesses = Vec::new();
                c.property.collect_accesses(&mut accesses);
                for access in &accesses {
                    check_access(c.module, access);
                }
            }
            Constraint::Range(c) => {
                assert_eq!(
                    c.sources.len(),
                    c.bitwidths.len(),
                    "range constraint {:?}: source/bitwidth arity mismatch",
                    c.handle
                );
                for access in &c.sources {
                    check_access(c.module, access);
                }
            }
            Constraint::Sorted(c) => {
                assert_eq!(
                    c.sources.len(),
                    c.signs.len(),
                    "sorted constraint {:?}: source/sign arity mismatch",
                    c.handle
                );
                for access in &c.sources {
                    check_access(c.module, access);
                }
            }
            Constraint::Permutation(c) => {
                for id in c.targets.iter().chain(&c.sources) {
                    assert!(
                        id.0 < schema.module(c.module).num_registers(),
                        "permutation {:?} names register {} outside its module",
                        c.handle,
                        id.0
                    );
                }
            }
            Constraint::Interleaving(c) => {
                for access in &c.target {
                    check_access(c.target_module, access);
                }
                for source in &c.sources {
                    for access in source {
                        check_access(c.source_module, access);
                    }
                }
            }
            Constraint::Lookup(c) => {
                let arity = c
                    .targets
                    .first()
                    .map(|v| v.terms.len())
                    .expect("lookup without targets");
                for vector in c.targets.iter().chain(&c.sources) {
                    assert_eq!(
                        vector.terms.len(),
                        arity,
                        "lookup {:?}: vector arity mismatch",
                        c.handle
                    );
                    let mut accesses = Vec::new();
                    for term in &vector.terms {
                        term.collect_accesses(&mut accesses);
                    }
                    if let Some(selector) = &vector.selector {
                        selector.collect_accesses(&mut accesses);
                    }
                    for access in &accesses {
                        check_access(vector.module, access);
                    }
                }
            }
        }
    }
}
