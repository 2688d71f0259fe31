use serde::{Deserialize, Serialize};

/// Knobs of the AIR lowering pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisationConfig {
    /// 0 disables the inverse-column eliminations; 1 lets terms whose range
    /// is contained in `{0,1}` or `{-1,0,1}` normalise without an inverse
    /// column.
    pub inverse_elimination_level: u8,
    /// Largest width emitted as a primitive range constraint; wider ranges
    /// decompose through computed columns.
    pub max_range_constraint: usize,
    /// Factor a common shift out of normalised terms so the inverse column
    /// is shared across shifted uses.
    pub shift_normalisation: bool,
}

impl Default for OptimisationConfig {
    fn default() -> Self {
        Self {
            inverse_elimination_level: 1,
            max_range_constraint: 16,
            shift_normalisation: true,
        }
    }
}
