//! S-expression printer for AIR nodes, with register names resolved against
//! the AIR schema. The arithmetic forms mirror the MIR printer's surface.

use airlift_mir::{Domain, ModuleId, RegisterKind};
use itertools::Itertools;
use p3_field::PrimeField;

use crate::schema::{
    AirColumnVector, AirConstraint, AirSchema, AirTerm, ColumnAccess,
};

pub struct Printer<'a, F> {
    schema: &'a AirSchema<F>,
}

impl<'a, F: PrimeField> Printer<'a, F> {
    pub fn new(schema: &'a AirSchema<F>) -> Self {
        Self { schema }
    }

    fn column(&self, module: ModuleId, access: &ColumnAccess) -> String {
        let mut out = self
            .schema
            .module(module)
            .register(access.register)
            .name
            .clone();
        if let Some(mask) = access.mask {
            out = format!("(mask {out} {mask})");
        }
        if access.shift != 0 {
            out = format!("(shift {out} {})", access.shift);
        }
        out
    }

    pub fn term(&self, module: ModuleId, term: &AirTerm<F>) -> String {
        match term {
            AirTerm::Constant(c) => format!("{}", c.as_canonical_biguint()),
            AirTerm::Column(access) => self.column(module, access),
            AirTerm::Sum(ts) => self.variadic(module, "+", ts),
            AirTerm::Sub(ts) => self.variadic(module, "-", ts),
            AirTerm::Product(ts) => self.variadic(module, "*", ts),
        }
    }

    fn variadic(&self, module: ModuleId, op: &str, terms: &[AirTerm<F>]) -> String {
        format!(
            "({op} {})",
            terms.iter().map(|t| self.term(module, t)).join(" ")
        )
    }

    pub fn constraint(&self, constraint: &AirConstraint<F>) -> String {
        match constraint {
            AirConstraint::Vanishing(c) => format!(
                "(vanish {:?}{} {})",
                c.handle.0,
                domain(&c.domain),
                self.term(c.module, &c.term)
            ),
            AirConstraint::Assertion(c) => format!(
                "(assert {:?}{} ...)",
                c.handle.0,
                domain(&c.domain)
            ),
            AirConstraint::Range(c) => format!(
                "(in-range {:?} ({} {}))",
                c.handle.0,
                self.column(c.module, &c.access),
                c.bitwidth
            ),
            AirConstraint::Lookup(c) => format!(
                "(lookup {:?} (targets {}) (sources {}))",
                c.handle.0,
                c.targets.iter().map(|v| self.vector(v)).join(" "),
                c.sources.iter().map(|v| self.vector(v)).join(" ")
            ),
            AirConstraint::Permutation(c) => {
                let name = |id: &airlift_mir::RegisterId| {
                    self.schema.module(c.module).register(*id).name.clone()
                };
                format!(
                    "(permutation {:?} ({}) ({}))",
                    c.handle.0,
                    c.targets.iter().map(name).join(" "),
                    c.sources.iter().map(name).join(" ")
                )
            }
            AirConstraint::Interleaving(c) => format!(
                "(interleave {:?} ({}) {})",
                c.handle.0,
                c.target
                    .iter()
                    .map(|a| self.column(c.target_module, a))
                    .join(" "),
                c.sources
                    .iter()
                    .map(|source| format!(
                        "({})",
                        source
                            .iter()
                            .map(|a| self.column(c.source_module, a))
                            .join(" ")
                    ))
                    .join(" ")
            ),
        }
    }

    fn vector(&self, vector: &AirColumnVector) -> String {
        let module_name = &self.schema.module(vector.module).name;
        let columns = vector
            .columns
            .iter()
            .map(|c| self.column(vector.module, c))
            .join(" ");
        match &vector.selector {
            None => format!("({module_name} {columns})"),
            Some(selector) => format!(
                "({module_name} :selector {} {columns})",
                self.column(vector.module, selector)
            ),
        }
    }

    pub fn module(&self, id: ModuleId) -> String {
        let module = self.schema.module(id);
        let mut out = format!("(module {:?}\n", module.name);
        for register in module.registers() {
            out.push_str(&format!(
                "  (register {:?} u{} {})\n",
                register.name,
                register.width,
                kind(register.kind)
            ));
        }
        for constraint in &module.constraints {
            out.push_str(&format!("  {}\n", self.constraint(constraint)));
        }
        out.push(')');
        out
    }

    pub fn schema(&self) -> String {
        (0..self.schema.modules().len())
            .map(|index| self.module(ModuleId(index)))
            .join("\n")
    }
}

fn domain(domain: &Domain) -> String {
    match domain {
        Domain::All => String::new(),
        Domain::At(k) => format!(" :domain {k}"),
    }
}

fn kind(kind: RegisterKind) -> &'static str {
    match kind {
        RegisterKind::Input => "input",
        RegisterKind::Output => "output",
        RegisterKind::Computed => "computed",
        RegisterKind::Zero => "zero",
    }
}
