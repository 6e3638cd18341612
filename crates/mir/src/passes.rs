//! Analyses and optimization passes over a `MirGraph`.

pub mod dominance;
pub mod gvn;
