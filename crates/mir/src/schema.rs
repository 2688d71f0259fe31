use std::collections::HashMap;

use p3_field::Field;
use serde::{Deserialize, Serialize};

use crate::{
    assignment::Assignment,
    constraint::Constraint,
    value_range::RegisterWidths,
};

/// Index of a module inside a [Schema].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub usize);

/// Index of a register inside its owning module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegisterId(pub usize);

impl RegisterId {
    /// Sentinel for accesses with no backing register (optional lookup
    /// selectors).
    pub const UNUSED: RegisterId = RegisterId(usize::MAX);

    pub fn is_used(&self) -> bool {
        *self != Self::UNUSED
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    Input,
    Output,
    Computed,
    /// A computed register pinned to 0 on every row; used to pad lookups.
    Zero,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub width: usize,
    pub kind: RegisterKind,
}

impl Register {
    pub fn new(name: impl Into<String>, width: usize, kind: RegisterKind) -> Self {
        Self {
            name: name.into(),
            width,
            kind,
        }
    }

    pub fn input(name: impl Into<String>, width: usize) -> Self {
        Self::new(name, width, RegisterKind::Input)
    }

    pub fn computed(name: impl Into<String>, width: usize) -> Self {
        Self::new(name, width, RegisterKind::Computed)
    }
}

/// A module owns an ordered register table plus append-only assignment and
/// constraint lists. Registers are referred to by index; the table order is
/// the declaration order and is never permuted.
#[derive(Clone, Debug)]
pub struct Module<F> {
    pub name: String,
    registers: Vec<Register>,
    name_index: HashMap<String, RegisterId>,
    pub assignments: Vec<Assignment<F>>,
    pub constraints: Vec<Constraint<F>>,
    pub allow_padding: bool,
    pub is_public: bool,
    pub is_synthetic: bool,
    /// Opaque trace-length metadata, forwarded through every pass.
    pub length_keys: Vec<String>,
}

impl<F: Field> Module<F> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registers: Vec::new(),
            name_index: HashMap::new(),
            assignments: Vec::new(),
            constraints: Vec::new(),
            allow_padding: false,
            is_public: false,
            is_synthetic: false,
            length_keys: Vec::new(),
        }
    }

    /// Copies the non-register attributes of `other` onto a fresh module.
    pub fn like(other: &Module<F>) -> Self {
        let mut module = Self::new(other.name.clone());
        module.allow_padding = other.allow_padding;
        module.is_public = other.is_public;
        module.is_synthetic = other.is_synthetic;
        module.length_keys = other.length_keys.clone();
        module
    }

    pub fn add_register(&mut self, register: Register) -> RegisterId {
        let id = RegisterId(self.registers.len());
        let previous = self.name_index.insert(register.name.clone(), id);
        assert!(
            previous.is_none(),
            "duplicate register name {:?} in module {:?}",
            register.name,
            self.name
        );
        self.registers.push(register);
        id
    }

    pub fn register(&self, id: RegisterId) -> &Register {
        &self.registers[id.0]
    }

    pub fn register_by_name(&self, name: &str) -> Option<RegisterId> {
        self.name_index.get(name).copied()
    }

    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }

    pub fn push_assignment(&mut self, assignment: Assignment<F>) {
        self.assignments.push(assignment);
    }

    pub fn push_constraint(&mut self, constraint: Constraint<F>) {
        self.constraints.push(constraint);
    }
}

impl<F> RegisterWidths for Module<F> {
    fn width(&self, register: RegisterId) -> Option<usize> {
        self.registers.get(register.0).map(|r| r.width)
    }
}

/// An ordered list of modules. Module identifiers are indices into the list;
/// cross-module references always go through `(ModuleId, RegisterId)`, never
/// through pointers.
#[derive(Clone, Debug, Default)]
pub struct Schema<F> {
    modules: Vec<Module<F>>,
}

impl<F: Field> Schema<F> {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn add_module(&mut self, module: Module<F>) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(module);
        id
    }

    pub fn module(&self, id: ModuleId) -> &Module<F> {
        &self.modules[id.0]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module<F> {
        &mut self.modules[id.0]
    }

    pub fn modules(&self) -> &[Module<F>] {
        &self.modules
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> {
        (0..self.modules.len()).map(ModuleId)
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(ModuleId)
    }

    /// Binds labelled constants across every module. Unmatched labels keep
    /// propagating as opaque constants.
    pub fn substitute(&self, bindings: &HashMap<String, F>) -> Self {
        let mut out = self.clone();
        for module in &mut out.modules {
            for assignment in &mut module.assignments {
                *assignment = assignment.substitute(bindings);
            }
            for constraint in &mut module.constraints {
                *constraint = constraint.substitute(bindings);
            }
        }
        out
    }

    /// Checks the structural invariants every well-formed input schema obeys:
    /// register ids in range, mask widths bounded by declared widths, arity
    /// agreement on lookups and ranges. Violations are programming errors in
    /// the producer of the schema.
    pub fn validate(&self) {
        for module in &self.modules {
            for constraint in &module.constraints {
                constraint.validate(self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use p3_baby_bear::BabyBear;

    use super::*;

    #[test]
    fn register_table_is_ordered() {
        let mut module = Module::<BabyBear>::new("m");
        let a = module.add_register(Register::input("a", 8));
        let b = module.add_register(Register::computed("b", 16));
        assert_eq!(a, RegisterId(0));
        assert_eq!(b, RegisterId(1));
        assert_eq!(module.register(b).width, 16);
        assert_eq!(module.register_by_name("a"), Some(a));
        assert_eq!(module.register_by_name("c"), None);
    }

    #[test]
    #[should_panic(expected = "duplicate register name")]
    fn duplicate_names_are_rejected() {
        let mut module = Module::<BabyBear>::new("m");
        module.add_register(Register::input("a", 8));
        module.add_register(Register::input("a", 8));
    }

    #[test]
    fn unused_register_id() {
        assert!(!RegisterId::UNUSED.is_used());
        assert!(RegisterId(0).is_used());
    }
}
