//! Gadgets: fixed patterns of computed columns and primitive constraints
//! implementing the higher-level primitives (normalise, bitwidth
//! decomposition, lexicographic sorting).

mod bitwidth;
mod lexicographic;
mod normalize;
