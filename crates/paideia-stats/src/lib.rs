pub mod anova;
pub mod describe;
pub mod special;

pub use anova::{run_anova, AnovaError, EffectRow, Factor, FactorialAnova};
