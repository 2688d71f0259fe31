//! Module-by-module lowering of a subdivided schema to AIR.
//!
//! Logical forms are first normalised (`Ite` unfolded into guarded
//! disjuncts, negations pushed to the atoms), then flattened to "zero
//! terms": arithmetic terms that must each vanish. A conjunct emits one
//! constraint per zero term, with adjacent nonnegative terms packed into a
//! single sum while the running interval fits the bandwidth. A disjunct
//! multiplies its constituents out (conjunction of cross products), with
//! register-access disequalities grouped into bandwidth-sized sum packets
//! first.

use std::collections::HashMap;

use airlift_mir::{
    Constraint, Domain, Expr, Handle, Logical, Module, ModuleId, Register, RegisterAccess,
    RegisterId, RegisterKind, Schema, ValueRange, VanishingConstraint,
};
use p3_field::PrimeField;

use crate::{
    config::OptimisationConfig,
    schema::{
        AirAssertion, AirColumnVector, AirConstraint, AirInterleaving, AirLookup, AirModule,
        AirPermutation, AirSchema, AirTerm, AirVanishing, ColumnAccess, EnforcedWidths,
    },
};

/// Lowers a subdivided schema to AIR under the given field bandwidth.
pub fn lower_to_air<F: PrimeField>(
    schema: &Schema<F>,
    bandwidth: usize,
    config: &OptimisationConfig,
) -> AirSchema<F> {
    let mut out = AirSchema::new();
    for (index, module) in schema.modules().iter().enumerate() {
        let lowerer = Lowerer::new(ModuleId(index), module, bandwidth, config);
        out.add_module(lowerer.run(module));
    }
    out
}

pub(crate) struct Lowerer<'a, F> {
    pub(crate) module_id: ModuleId,
    pub(crate) module: AirModule<F>,
    pub(crate) widths: EnforcedWidths,
    pub(crate) bandwidth: usize,
    pub(crate) config: &'a OptimisationConfig,
    pub(crate) handle: Handle,
    norm_cache: HashMap<AirTerm<F>, AirTerm<F>>,
    counters: HashMap<String, usize>,
}

impl<'a, F: PrimeField> Lowerer<'a, F> {
    pub(crate) fn new(
        module_id: ModuleId,
        module: &Module<F>,
        bandwidth: usize,
        config: &'a OptimisationConfig,
    ) -> Self {
        // True bitwidths come from the range constraints; a register never
        // range-constrained is unbounded at this layer.
        let mut widths = EnforcedWidths::new();
        for constraint in &module.constraints {
            if let Constraint::Range(range) = constraint {
                for (access, bitwidth) in range.sources.iter().zip(&range.bitwidths) {
                    widths.record(access.register, *bitwidth);
                }
            }
        }
        Self {
            module_id,
            module: AirModule::from_module(module),
            widths,
            bandwidth,
            config,
            handle: Handle::new("?"),
            norm_cache: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    fn run(mut self, module: &Module<F>) -> AirModule<F> {
        for constraint in &module.constraints {
            self.handle = constraint.handle().clone();
            match constraint {
                Constraint::Vanishing(c) => self.lower_vanishing(c),
                Constraint::Assertion(c) => {
                    let assertion = AirAssertion {
                        handle: c.handle.clone(),
                        module: c.module,
                        domain: c.domain,
                        property: c.property.clone(),
                    };
                    self.module.constraints.push(AirConstraint::Assertion(assertion));
                }
                Constraint::Range(c) => self.lower_range(c),
                Constraint::Sorted(c) => self.lower_sorted(c),
                Constraint::Permutation(c) => {
                    self.module
                        .constraints
                        .push(AirConstraint::Permutation(AirPermutation {
                            handle: c.handle.clone(),
                            module: c.module,
                            targets: c.targets.clone(),
                            sources: c.sources.clone(),
                        }));
                }
                Constraint::Interleaving(c) => {
                    self.module
                        .constraints
                        .push(AirConstraint::Interleaving(AirInterleaving {
                            handle: c.handle.clone(),
                            target_module: c.target_module,
                            source_module: c.source_module,
                            target: c.target.iter().map(column_of).collect(),
                            sources: c
                                .sources
                                .iter()
                                .map(|s| s.iter().map(column_of).collect())
                                .collect(),
                        }));
                }
                Constraint::Lookup(c) => {
                    let vector = |v: &airlift_mir::LookupVector<F>| AirColumnVector {
                        module: v.module,
                        selector: v.selector.as_ref().map(|s| expect_column(s, &c.handle)),
                        columns: v.terms.iter().map(|t| expect_column(t, &c.handle)).collect(),
                    };
                    self.module.constraints.push(AirConstraint::Lookup(AirLookup {
                        handle: c.handle.clone(),
                        targets: c.targets.iter().map(vector).collect(),
                        sources: c.sources.iter().map(vector).collect(),
                    }));
                }
            }
        }
        self.module
    }

    pub(crate) fn norm_cache_get(&self, key: &AirTerm<F>) -> Option<AirTerm<F>> {
        self.norm_cache.get(key).cloned()
    }

    pub(crate) fn norm_cache_put(&mut self, key: AirTerm<F>, value: AirTerm<F>) {
        self.norm_cache.insert(key, value);
    }

    pub(crate) fn fresh_register(&mut self, prefix: &str, width: usize) -> RegisterId {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}${counter}");
        *counter += 1;
        self.module
            .add_register(Register::new(name, width, RegisterKind::Computed))
    }

    pub(crate) fn push_vanishing(&mut self, suffix: &str, domain: Domain, term: AirTerm<F>) {
        let handle = if suffix.is_empty() {
            self.handle.clone()
        } else {
            Handle::new(format!("{}${suffix}", self.handle))
        };
        self.module
            .constraints
            .push(AirConstraint::Vanishing(AirVanishing {
                handle,
                module: self.module_id,
                domain,
                term,
            }));
    }

    fn lower_vanishing(&mut self, c: &VanishingConstraint<F>) {
        let normalized = normalize(&c.property.simplify(false));
        let terms = self.flatten(&normalized);
        self.emit_packed(c.domain, terms);
    }

    /// Flattens a normalised logical into zero terms with conjunct
    /// semantics: the property holds iff every returned term is 0.
    pub(crate) fn flatten(&mut self, logical: &Logical<F>) -> Vec<AirTerm<F>> {
        match logical {
            Logical::Conjunct(ts) => {
                let mut out = Vec::new();
                for t in ts {
                    out.extend(self.flatten(t));
                }
                out
            }
            Logical::Disjunct(ts) => self.flatten_disjunct(ts),
            Logical::Equal(a, b) => {
                let (a, b) = (self.lower_expr(a), self.lower_expr(b));
                vec![AirTerm::sub(vec![a, b])]
            }
            Logical::NotEqual(a, b) => {
                let difference = {
                    let (a, b) = (self.lower_expr(a), self.lower_expr(b));
                    AirTerm::sub(vec![a, b])
                };
                let normalised = self.norm_term(difference);
                vec![AirTerm::sub(vec![AirTerm::one(), normalised])]
            }
            Logical::Inequality { .. } => panic!("inequalities cannot be lowered to AIR"),
            Logical::Negate(_) | Logical::Ite(..) => {
                unreachable!("negations and conditionals are unfolded before flattening")
            }
        }
    }

    /// A disjunct becomes the cross product of its constituents' zero
    /// terms. Register-access disequalities are first grouped into packets
    /// summable within the bandwidth: `a != 0 or b != 0` holds iff
    /// `a + b != 0` when both are nonnegative and the sum cannot wrap.
    fn flatten_disjunct(&mut self, ts: &[Logical<F>]) -> Vec<AirTerm<F>> {
        let mut access_packets: Vec<(Vec<AirTerm<F>>, ValueRange)> = Vec::new();
        let mut alternatives: Vec<Vec<AirTerm<F>>> = Vec::new();
        for t in ts {
            match self.as_access_disequality(t) {
                Some(column) => {
                    let range = column.value_range(&self.widths);
                    let fits = |packet: &(Vec<AirTerm<F>>, ValueRange)| {
                        packet.1.add(&range).fits_bits(self.bandwidth)
                    };
                    match access_packets.last_mut().filter(|p| fits(p)) {
                        Some(packet) => {
                            packet.1 = packet.1.add(&range);
                            packet.0.push(column);
                        }
                        None => access_packets.push((vec![column], range)),
                    }
                }
                None => alternatives.push(self.flatten(t)),
            }
        }
        for (packet, _) in access_packets {
            let sum = AirTerm::sum(packet);
            let normalised = self.norm_term(sum);
            alternatives.push(vec![AirTerm::sub(vec![AirTerm::one(), normalised])]);
        }
        // Cross product: the disjunction holds iff for every choice of one
        // zero term per alternative, the product vanishes.
        let mut products: Vec<Vec<AirTerm<F>>> = vec![Vec::new()];
        for alternative in alternatives {
            let mut next = Vec::with_capacity(products.len() * alternative.len());
            for existing in &products {
                for term in &alternative {
                    let mut combo = existing.clone();
                    combo.push(term.clone());
                    next.push(combo);
                }
            }
            products = next;
        }
        products
            .into_iter()
            .map(|combo| AirTerm::product(combo))
            .collect()
    }

    /// Matches `e != 0` (either orientation) where `e` is a register access
    /// whose range is nonnegative and bounded.
    fn as_access_disequality(&mut self, logical: &Logical<F>) -> Option<AirTerm<F>> {
        let access = match logical {
            Logical::NotEqual(a, b) if b.is_zero_constant() => a.as_access()?,
            Logical::NotEqual(a, b) if a.is_zero_constant() => b.as_access()?,
            _ => return None,
        };
        let column = AirTerm::column(column_of(access));
        column
            .value_range(&self.widths)
            .magnitude_bits()
            .map(|_| column)
    }

    /// Emits the zero terms as vanishing constraints, packing adjacent
    /// nonnegative terms into one sum while the running interval fits the
    /// bandwidth (greedy, left to right).
    fn emit_packed(&mut self, domain: Domain, terms: Vec<AirTerm<F>>) {
        let mut packet: Vec<AirTerm<F>> = Vec::new();
        let mut packet_range = ValueRange::exact(0.into());
        let mut flush = |lowerer: &mut Self, packet: &mut Vec<AirTerm<F>>| {
            if packet.is_empty() {
                return;
            }
            let term = AirTerm::sum(std::mem::take(packet));
            lowerer.push_vanishing("", domain, term);
        };
        for term in terms {
            let range = term.value_range(&self.widths);
            let packable = range.is_nonnegative()
                && packet_range.add(&range).fits_bits(self.bandwidth);
            if packable {
                packet_range = packet_range.add(&range);
                packet.push(term);
            } else {
                flush(self, &mut packet);
                packet_range = ValueRange::exact(0.into());
                // A term that cannot even start a packet stands alone.
                if range.is_nonnegative() && range.fits_bits(self.bandwidth) {
                    packet_range = range;
                    packet.push(term);
                } else {
                    self.push_vanishing("", domain, term);
                }
            }
        }
        flush(self, &mut packet);
    }

    /// Lowers an arithmetic term. `Add/Sub/Mul/Constant/RegisterAccess` map
    /// directly; `Exp` unfolds, `Cast` masks, `Norm` and `IfZero` go through
    /// the normalise gadget, `VectorAccess` becomes a weighted limb sum.
    pub(crate) fn lower_expr(&mut self, expr: &Expr<F>) -> AirTerm<F> {
        match expr {
            Expr::Constant(c) | Expr::Labelled(_, c) => AirTerm::Constant(*c),
            Expr::Access(access) => {
                if access.is_used() {
                    AirTerm::column(column_of(access))
                } else {
                    AirTerm::zero()
                }
            }
            Expr::Vector(limbs) => {
                let mut parts = Vec::with_capacity(limbs.len());
                let mut offset = 0usize;
                for limb in limbs {
                    let weight: F = airlift_mir::field::two_pow_n(offset);
                    parts.push(AirTerm::product(vec![
                        AirTerm::Constant(weight),
                        AirTerm::column(column_of(limb)),
                    ]));
                    offset += limb.read_width();
                }
                AirTerm::sum(parts)
            }
            Expr::Sum(ts) => AirTerm::sum(ts.iter().map(|t| self.lower_expr(t)).collect()),
            Expr::Sub(ts) => AirTerm::sub(ts.iter().map(|t| self.lower_expr(t)).collect()),
            Expr::Product(ts) => AirTerm::product(ts.iter().map(|t| self.lower_expr(t)).collect()),
            Expr::Exp(t, k) => {
                let base = self.lower_expr(t);
                AirTerm::product(vec![base; *k as usize])
            }
            Expr::Cast(t, w) => {
                let inner = self.lower_expr(t);
                match inner {
                    AirTerm::Column(access) => {
                        let mask = access.mask.map_or(*w, |m| m.min(*w));
                        AirTerm::Column(access.masked(mask))
                    }
                    other => {
                        let range = other.value_range(&self.widths);
                        assert!(
                            ValueRange::bits(*w).contains(&range),
                            "cannot mask a compound term to u{w} at AIR"
                        );
                        other
                    }
                }
            }
            Expr::Norm(t) => {
                let term = self.lower_expr(t);
                self.norm_term(term)
            }
            Expr::IfZero(c, t, f) => self.lower_if_zero(c, t.as_deref(), f.as_deref()),
        }
    }

    /// `IfZero(c, t, f)` compiles to `(1 - Norm(e)) * t + Norm(e) * f` for a
    /// selector `e` that is 0 exactly when the condition holds. When the
    /// flattened condition is a single boolean term the pair uses it
    /// directly and no inverse column is introduced.
    fn lower_if_zero(
        &mut self,
        condition: &Logical<F>,
        if_true: Option<&Expr<F>>,
        if_false: Option<&Expr<F>>,
    ) -> AirTerm<F> {
        let normalized = normalize(condition);
        let zero_terms = self.flatten(&normalized);
        let selector = if zero_terms.len() == 1 {
            zero_terms.into_iter().next().unwrap()
        } else {
            // All terms must vanish: sum their normalised (boolean) forms.
            let norms: Vec<AirTerm<F>> = zero_terms
                .into_iter()
                .map(|t| self.norm_term(t))
                .collect();
            AirTerm::sum(norms)
        };
        let switch = self.norm_term(selector);
        let mut parts = Vec::new();
        if let Some(t) = if_true {
            let value = self.lower_expr(t);
            parts.push(AirTerm::product(vec![
                AirTerm::sub(vec![AirTerm::one(), switch.clone()]),
                value,
            ]));
        }
        if let Some(f) = if_false {
            let value = self.lower_expr(f);
            parts.push(AirTerm::product(vec![switch, value]));
        }
        AirTerm::sum(parts)
    }
}

/// Unfolds `Ite` into guarded disjuncts and pushes negations down to the
/// atoms, leaving only conjuncts, disjuncts and comparisons.
pub(crate) fn normalize<F: PrimeField>(logical: &Logical<F>) -> Logical<F> {
    match logical {
        Logical::Ite(..) => normalize(&logical.unfold_ite()),
        Logical::Negate(t) => normalize(&t.negate()),
        Logical::Conjunct(ts) => Logical::conjunct(ts.iter().map(normalize).collect()),
        Logical::Disjunct(ts) => Logical::disjunct(ts.iter().map(normalize).collect()),
        Logical::Equal(..) | Logical::NotEqual(..) | Logical::Inequality { .. } => logical.clone(),
    }
}

pub(crate) fn column_of(access: &RegisterAccess) -> ColumnAccess {
    ColumnAccess {
        register: access.register,
        shift: access.shift,
        mask: (access.mask < access.bitwidth).then_some(access.mask),
    }
}

fn expect_column<F: PrimeField>(term: &Expr<F>, handle: &Handle) -> ColumnAccess {
    match term {
        Expr::Access(access) => column_of(access),
        other => panic!("lookup {handle:?}: term {other} is not a column access"),
    }
}
