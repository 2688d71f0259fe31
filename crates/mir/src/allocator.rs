use std::collections::HashMap;

use p3_field::Field;

use crate::{
    assignment::{Assignment, Direction},
    expr::Expr,
    logical::Logical,
    schema::{Module, ModuleId, Register, RegisterId, RegisterKind},
};

/// A register allocated but not yet flushed into its module.
#[derive(Clone, Debug)]
pub struct AllocatedRegister {
    pub name: String,
    pub width: usize,
}

/// Allocates fresh computed registers for one module while its constraints
/// are being rewritten. Allocation is speculative: [Allocator::reset] undoes
/// everything past a checkpoint. On completion the allocator is flushed and
/// the registers plus their generating assignments land in the module.
///
/// Names follow `"{prefix}${index}"` with a per-prefix counter that is never
/// rolled back, so names stay unique for the lifetime of the module rewrite.
#[derive(Clone, Debug)]
pub struct Allocator<F> {
    base: usize,
    pending: Vec<AllocatedRegister>,
    computations: Vec<(Vec<RegisterId>, Expr<F>)>,
    counters: HashMap<String, usize>,
}

impl<F: Field> Allocator<F> {
    /// `base` is the number of registers already present in the module.
    pub fn new(base: usize) -> Self {
        Self {
            base,
            pending: Vec::new(),
            computations: Vec::new(),
            counters: HashMap::new(),
        }
    }

    pub fn for_module(module: &Module<F>) -> Self {
        Self::new(module.num_registers())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn next_name(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}${counter}");
        *counter += 1;
        name
    }

    /// Allocates one register with no generating computation.
    pub fn allocate(&mut self, prefix: &str, width: usize) -> RegisterId {
        let name = self.next_name(prefix);
        let id = RegisterId(self.base + self.pending.len());
        self.pending.push(AllocatedRegister { name, width });
        id
    }

    /// Allocates one register filled by `computation` on every row.
    pub fn allocate_with(&mut self, prefix: &str, width: usize, computation: Expr<F>) -> RegisterId {
        let id = self.allocate(prefix, width);
        self.computations.push((vec![id], computation));
        id
    }

    /// Allocates a group of registers filled jointly from one computation:
    /// the value is decomposed into chunks of the given widths, least
    /// significant first.
    pub fn allocate_with_n(
        &mut self,
        prefix: &str,
        widths: &[usize],
        computation: Expr<F>,
    ) -> Vec<RegisterId> {
        let ids: Vec<RegisterId> = widths.iter().map(|w| self.allocate(prefix, *w)).collect();
        self.computations.push((ids.clone(), computation));
        ids
    }

    /// Drops every allocation past the first `keep`, undoing speculation.
    /// Name counters are left untouched.
    pub fn reset(&mut self, keep: usize) {
        assert!(keep <= self.pending.len());
        self.pending.truncate(keep);
        let limit = self.base + keep;
        self.computations
            .retain(|(ids, _)| ids.iter().all(|id| id.0 < limit));
    }

    /// The `(targets, computation)` pairs describing how each allocated
    /// register is filled.
    pub fn assignments(&self) -> &[(Vec<RegisterId>, Expr<F>)] {
        &self.computations
    }

    /// Appends the allocated registers and their assignments to `module`
    /// (which must be the module this allocator was created against).
    pub fn flush(self, module_id: ModuleId, module: &mut Module<F>) {
        assert_eq!(
            module.num_registers(),
            self.base,
            "allocator flushed into a module that grew underneath it"
        );
        for pending in self.pending {
            module.add_register(Register::new(
                pending.name,
                pending.width,
                RegisterKind::Computed,
            ));
        }
        for (targets, expr) in self.computations {
            module.push_assignment(Assignment::Computed {
                expr,
                direction: Direction::Forward,
                module: module_id,
                targets,
            });
        }
    }
}

/// An allocator view carrying the path condition of the enclosing rewrite.
/// Computations allocated under a live path condition are wrapped in
/// `IfZero(path, value, 0)`, so registers introduced inside a conditional
/// branch are defined as 0 on rows where the branch is inactive.
pub struct ContextualAllocator<'a, F> {
    inner: &'a mut Allocator<F>,
    path: Option<Logical<F>>,
}

impl<'a, F: Field> ContextualAllocator<'a, F> {
    pub fn new(inner: &'a mut Allocator<F>) -> Self {
        Self { inner, path: None }
    }

    pub fn with_path(inner: &'a mut Allocator<F>, path: Option<Logical<F>>) -> Self {
        Self { inner, path }
    }

    pub fn path(&self) -> Option<&Logical<F>> {
        self.path.as_ref()
    }

    /// The path condition extended with one more branch condition.
    pub fn extended_path(&self, condition: Logical<F>) -> Option<Logical<F>> {
        Some(match &self.path {
            None => condition,
            Some(existing) => Logical::conjunct(vec![existing.clone(), condition]),
        })
    }

    /// A reborrowed view with the same underlying allocator and a new path.
    pub fn descend(&mut self, path: Option<Logical<F>>) -> ContextualAllocator<'_, F> {
        ContextualAllocator {
            inner: self.inner,
            path,
        }
    }

    fn conditionalise(&self, computation: Expr<F>) -> Expr<F> {
        match &self.path {
            None => computation,
            Some(path) => Expr::if_zero(path.clone(), Some(computation), Some(Expr::zero())),
        }
    }

    pub fn checkpoint(&self) -> usize {
        self.inner.len()
    }

    pub fn reset(&mut self, keep: usize) {
        self.inner.reset(keep);
    }

    pub fn allocate_with(&mut self, prefix: &str, width: usize, computation: Expr<F>) -> RegisterId {
        let computation = self.conditionalise(computation);
        self.inner.allocate_with(prefix, width, computation)
    }

    pub fn allocate_with_n(
        &mut self,
        prefix: &str,
        widths: &[usize],
        computation: Expr<F>,
    ) -> Vec<RegisterId> {
        let computation = self.conditionalise(computation);
        self.inner.allocate_with_n(prefix, widths, computation)
    }
}

#[cfg(test)]
mod tests {
    use p3_baby_bear::BabyBear;

    use super::*;
    use crate::expr::RegisterAccess;

    type E = Expr<BabyBear>;

    #[test]
    fn names_and_ids_are_sequential() {
        let mut allocator = Allocator::<BabyBear>::new(3);
        let a = allocator.allocate("k", 1);
        let b = allocator.allocate("k", 2);
        let c = allocator.allocate("inv", 8);
        assert_eq!(a, RegisterId(3));
        assert_eq!(b, RegisterId(4));
        assert_eq!(c, RegisterId(5));
        assert_eq!(allocator.pending[0].name, "k$0");
        assert_eq!(allocator.pending[1].name, "k$1");
        assert_eq!(allocator.pending[2].name, "inv$0");
    }

    #[test]
    fn reset_undoes_speculation_but_keeps_names_unique() {
        let mut allocator = Allocator::<BabyBear>::new(0);
        allocator.allocate_with("k", 1, E::zero());
        let checkpoint = allocator.len();
        allocator.allocate_with("k", 1, E::one());
        allocator.reset(checkpoint);
        assert_eq!(allocator.len(), 1);
        assert_eq!(allocator.assignments().len(), 1);
        let fresh = allocator.allocate("k", 1);
        assert_eq!(fresh, RegisterId(1));
        assert_eq!(allocator.pending[1].name, "k$2");
    }

    #[test]
    fn flush_appends_registers_and_assignments() {
        let mut module = Module::<BabyBear>::new("m");
        module.add_register(Register::input("x", 8));
        let mut allocator = Allocator::for_module(&module);
        let id = allocator.allocate_with("k", 1, E::zero());
        allocator.flush(ModuleId(0), &mut module);
        assert_eq!(module.num_registers(), 2);
        assert_eq!(module.register(id).name, "k$0");
        assert_eq!(module.register(id).kind, RegisterKind::Computed);
        assert_eq!(module.assignments.len(), 1);
    }

    #[test]
    fn contextual_allocation_guards_computations() {
        let mut allocator = Allocator::<BabyBear>::new(0);
        let path = Logical::equal(
            E::access(RegisterAccess::new(RegisterId(0), 1)),
            E::zero(),
        );
        let mut contextual =
            ContextualAllocator::with_path(&mut allocator, Some(path.clone()));
        contextual.allocate_with("k", 1, E::one());
        let (_, computation) = &allocator.assignments()[0];
        assert_eq!(
            *computation,
            E::if_zero(path, Some(E::one()), Some(E::zero()))
        );
    }
}
