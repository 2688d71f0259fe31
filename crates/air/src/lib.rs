//! Lowering of subdivided MIR schemas to AIR: a restricted form whose terms
//! are sums, products, subtractions, constants and column accesses, and
//! whose constraints are primitive vanishing/range/lookup/permutation/
//! interleaving forms. Non-arithmetic primitives compile away into gadgets
//! that introduce computed columns.

pub mod config;
pub mod eval;
mod gadgets;
mod lower;
pub mod schema;
pub mod sexp;

pub use config::OptimisationConfig;
pub use eval::{accepts_air, eval_term, expand_air_trace, trace_for};
pub use lower::lower_to_air;
pub use schema::{
    AirAssertion, AirColumnVector, AirConstraint, AirInterleaving, AirLookup, AirModule,
    AirPermutation, AirRange, AirSchema, AirTerm, AirVanishing, ColumnAccess, EnforcedWidths,
};
