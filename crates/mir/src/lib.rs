//! Mid-level intermediate representation for arithmetic-circuit constraint
//! systems: modules, registers, assignments and typed constraints over a
//! prime field, together with the term algebra the rest of the compiler is
//! built on.
//!
//! The crate is organised bottom-up:
//! - [expr] / [logical]: the two mutually recursive term languages;
//! - [value_range]: integer interval analysis over terms;
//! - [poly]: the multivariate-polynomial view of arithmetic terms;
//! - [schema]: modules, registers and whole schemas;
//! - [constraint] / [assignment]: the constraint and assignment kinds;
//! - [allocator]: scoped allocation of fresh computed registers;
//! - [limbs]: the register-to-limb maps driving subdivision;
//! - [trace]: trace stores, constraint evaluation and test-oriented
//!   trace expansion;
//! - [sexp]: an s-expression pretty printer for every IR node;
//! - [concretize]: rebuilding a schema over a different element type.

pub mod allocator;
pub mod assignment;
pub mod concretize;
pub mod constraint;
pub mod expr;
pub mod field;
pub mod limbs;
pub mod logical;
pub mod poly;
pub mod schema;
pub mod sexp;
pub mod stats;
pub mod trace;
pub mod value_range;

pub use allocator::{AllocatedRegister, Allocator, ContextualAllocator};
pub use assignment::{Assignment, Direction};
pub use concretize::concretize;
pub use constraint::{
    Constraint, Domain, Handle, InterleavingConstraint, LookupConstraint, LookupVector,
    PermutationConstraint, RangeConstraint, SortedConstraint, VanishingConstraint,
};
pub use expr::{Expr, RegisterAccess};
pub use field::FieldConfig;
pub use limbs::{Limb, LimbsMap, RegisterLimbsMap};
pub use logical::Logical;
pub use schema::{Module, ModuleId, Register, RegisterId, RegisterKind, Schema};
pub use stats::{ModuleStats, SchemaStats};
pub use trace::{accepts, expand_trace, Coverage, Failure, Trace, VecTrace};
pub use value_range::{RegisterWidths, ValueRange};
