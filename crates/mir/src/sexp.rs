//! S-expression pretty printer for every IR node. The printed forms use the
//! surface syntax the parser understands, so anything in the supported
//! subset round-trips.

use itertools::Itertools;
use p3_field::PrimeField;

use crate::{
    assignment::Assignment,
    constraint::{Constraint, Domain, LookupVector},
    expr::{Expr, RegisterAccess},
    logical::Logical,
    schema::{Module, ModuleId, RegisterKind, Schema},
};

/// Prints IR nodes with register names resolved against a schema.
pub struct Printer<'a, F> {
    schema: &'a Schema<F>,
}

impl<'a, F: PrimeField> Printer<'a, F> {
    pub fn new(schema: &'a Schema<F>) -> Self {
        Self { schema }
    }

    fn reg(&self, module: ModuleId, access: &RegisterAccess) -> String {
        if !access.is_used() {
            return "_".to_string();
        }
        let name = &self.schema.module(module).register(access.register).name;
        let mut out = name.clone();
        if access.mask < access.bitwidth {
            out = format!("(mask {out} {})", access.mask);
        }
        if access.shift != 0 {
            out = format!("(shift {out} {})", access.shift);
        }
        out
    }

    pub fn expr(&self, module: ModuleId, expr: &Expr<F>) -> String {
        match expr {
            Expr::Constant(c) => format!("{}", c.as_canonical_biguint()),
            Expr::Labelled(name, value) => {
                format!("(const {name} {})", value.as_canonical_biguint())
            }
            Expr::Access(access) => self.reg(module, access),
            Expr::Vector(limbs) => format!(
                "(concat {})",
                limbs.iter().map(|l| self.reg(module, l)).join(" ")
            ),
            Expr::Sum(ts) => self.variadic(module, "+", ts),
            Expr::Sub(ts) => self.variadic(module, "-", ts),
            Expr::Product(ts) => self.variadic(module, "*", ts),
            Expr::Exp(t, k) => format!("(^ {} {k})", self.expr(module, t)),
            Expr::Cast(t, w) => format!("(cast {} {w})", self.expr(module, t)),
            Expr::Norm(t) => format!("(norm {})", self.expr(module, t)),
            Expr::IfZero(c, t, f) => {
                let mut out = format!("(if-zero {}", self.logical(module, c));
                if let Some(t) = t {
                    out.push_str(&format!(" {}", self.expr(module, t)));
                }
                if let Some(f) = f {
                    out.push_str(&format!(" {}", self.expr(module, f)));
                }
                out.push(')');
                out
            }
        }
    }

    fn variadic(&self, module: ModuleId, op: &str, terms: &[Expr<F>]) -> String {
        format!(
            "({op} {})",
            terms.iter().map(|t| self.expr(module, t)).join(" ")
        )
    }

    pub fn logical(&self, module: ModuleId, logical: &Logical<F>) -> String {
        match logical {
            Logical::Equal(a, b) => {
                format!("(= {} {})", self.expr(module, a), self.expr(module, b))
            }
            Logical::NotEqual(a, b) => {
                format!("(!= {} {})", self.expr(module, a), self.expr(module, b))
            }
            Logical::Inequality { strict, lhs, rhs } => format!(
                "({} {} {})",
                if *strict { "<" } else { "<=" },
                self.expr(module, lhs),
                self.expr(module, rhs)
            ),
            Logical::Conjunct(ts) if ts.is_empty() => "(and)".to_string(),
            Logical::Disjunct(ts) if ts.is_empty() => "(or)".to_string(),
            Logical::Conjunct(ts) => format!(
                "(and {})",
                ts.iter().map(|t| self.logical(module, t)).join(" ")
            ),
            Logical::Disjunct(ts) => format!(
                "(or {})",
                ts.iter().map(|t| self.logical(module, t)).join(" ")
            ),
            Logical::Negate(t) => format!("(not {})", self.logical(module, t)),
            Logical::Ite(c, t, f) => {
                let mut out = format!("(if {}", self.logical(module, c));
                if let Some(t) = t {
                    out.push_str(&format!(" {}", self.logical(module, t)));
                }
                if let Some(f) = f {
                    out.push_str(&format!(" {}", self.logical(module, f)));
                }
                out.push(')');
                out
            }
        }
    }

    pub fn constraint(&self, constraint: &Constraint<F>) -> String {
        match constraint {
            Constraint::Vanishing(c) => format!(
                "(vanish {:?}{} {})",
                c.handle.0,
                domain(&c.domain),
                self.logical(c.module, &c.property)
            ),
            Constraint::Assertion(c) => format!(
                "(assert {:?}{} {})",
                c.handle.0,
                domain(&c.domain),
                self.logical(c.module, &c.property)
            ),
            Constraint::Range(c) => format!(
                "(in-range {:?} {})",
                c.handle.0,
                c.sources
                    .iter()
                    .zip(&c.bitwidths)
                    .map(|(s, w)| format!("({} {w})", self.reg(c.module, s)))
                    .join(" ")
            ),
            Constraint::Sorted(c) => {
                let columns = c
                    .sources
                    .iter()
                    .zip(&c.signs)
                    .map(|(s, sign)| {
                        format!(
                            "({} {})",
                            self.reg(c.module, s),
                            if *sign { "asc" } else { "desc" }
                        )
                    })
                    .join(" ");
                let selector = c
                    .selector
                    .as_ref()
                    .map(|s| format!(" :selector {}", self.reg(c.module, s)))
                    .unwrap_or_default();
                format!(
                    "(sorted {:?} {} {columns}{selector}{})",
                    c.handle.0,
                    c.bitwidth,
                    if c.strict { " :strict" } else { "" }
                )
            }
            Constraint::Permutation(c) => {
                let name = |id: &crate::schema::RegisterId| {
                    self.schema.module(c.module).register(*id).name.clone()
                };
                format!(
                    "(permutation {:?} ({}) ({}))",
                    c.handle.0,
                    c.targets.iter().map(name).join(" "),
                    c.sources.iter().map(name).join(" ")
                )
            }
            Constraint::Interleaving(c) => format!(
                "(interleave {:?} ({}) {})",
                c.handle.0,
                c.target
                    .iter()
                    .map(|a| self.reg(c.target_module, a))
                    .join(" "),
                c.sources
                    .iter()
                    .map(|source| format!(
                        "({})",
                        source
                            .iter()
                            .map(|a| self.reg(c.source_module, a))
                            .join(" ")
                    ))
                    .join(" ")
            ),
            Constraint::Lookup(c) => format!(
                "(lookup {:?} (targets {}) (sources {}))",
                c.handle.0,
                c.targets.iter().map(|v| self.vector(v)).join(" "),
                c.sources.iter().map(|v| self.vector(v)).join(" ")
            ),
        }
    }

    fn vector(&self, vector: &LookupVector<F>) -> String {
        let module_name = &self.schema.module(vector.module).name;
        let terms = vector
            .terms
            .iter()
            .map(|t| self.expr(vector.module, t))
            .join(" ");
        match &vector.selector {
            None => format!("({module_name} {terms})"),
            Some(selector) => format!(
                "({module_name} :selector {} {terms})",
                self.expr(vector.module, selector)
            ),
        }
    }

    pub fn assignment(&self, assignment: &Assignment<F>) -> String {
        match assignment {
            Assignment::Computed {
                expr,
                module,
                targets,
                ..
            } => {
                let names = targets
                    .iter()
                    .map(|t| self.schema.module(*module).register(*t).name.clone())
                    .join(" ");
                format!("(compute ({names}) {})", self.expr(*module, expr))
            }
            Assignment::Native {
                function,
                targets,
                sources,
            } => format!(
                "(native {function} ({}) ({}))",
                targets.iter().map(|t| t.0.to_string()).join(" "),
                sources.iter().map(|s| s.0.to_string()).join(" ")
            ),
            Assignment::SortedPermutation {
                targets, sources, ..
            } => format!(
                "(sorted-permutation ({}) ({}))",
                targets.iter().map(|t| t.0.to_string()).join(" "),
                sources.iter().map(|s| s.0.to_string()).join(" ")
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
        for assignment in &module.assignments {
            out.push_str(&format!("  {}\n", self.assignment(assignment)));
        }
        for constraint in &module.constraints {
            out.push_str(&format!("  {}\n", self.constraint(constraint)));
        }
        out.push(')');
        out
    }

    pub fn schema(&self) -> String {
        self.schema
            .module_ids()
            .map(|id| self.module(id))
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
