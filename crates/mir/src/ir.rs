//! Defines the MIR structure.

pub mod field;
pub mod graph;
pub mod opcode;

pub use field::*;
pub use graph::*;
pub use opcode::*;
