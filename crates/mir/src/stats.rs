//! Size statistics over schemas, used by the exploding-constraint advisory
//! and for debugging rewrite passes.

use std::fmt;

use p3_field::Field;

use crate::{
    constraint::Constraint,
    schema::{Module, Schema},
};

/// Per-module size summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleStats {
    pub registers: usize,
    pub assignments: usize,
    pub constraints: usize,
    /// Total tree size over all constraints.
    pub constraint_nodes: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaStats {
    pub modules: Vec<(String, ModuleStats)>,
}

impl SchemaStats {
    pub fn of<F: Field>(schema: &Schema<F>) -> Self {
        Self {
            modules: schema
                .modules()
                .iter()
                .map(|module| (module.name.clone(), ModuleStats::of(module)))
                .collect(),
        }
    }

    pub fn total_constraint_nodes(&self) -> usize {
        self.modules.iter().map(|(_, m)| m.constraint_nodes).sum()
    }

    pub fn total_registers(&self) -> usize {
        self.modules.iter().map(|(_, m)| m.registers).sum()
    }
}

impl ModuleStats {
    pub fn of<F: Field>(module: &Module<F>) -> Self {
        Self {
            registers: module.num_registers(),
            assignments: module.assignments.len(),
            constraints: module.constraints.len(),
            constraint_nodes: module
                .constraints
                .iter()
                .map(Constraint::node_count)
                .sum(),
        }
    }
}

impl fmt::Display for SchemaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, stats) in &self.modules {
            writeln!(
                f,
                "{name}: {} registers, {} assignments, {} constraints ({} nodes)",
                stats.registers, stats.assignments, stats.constraints, stats.constraint_nodes
            )?;
        }
        Ok(())
    }
}
