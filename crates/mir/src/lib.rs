pub mod builder;
pub mod flags;
pub mod formatter;
pub mod ir;
pub mod parser;
pub mod passes;
pub mod validation;

pub use ir::{BasicBlockId, Mir, MirGraph, MirId, Opcode, OptFlags, SsaReg};
pub use passes::gvn::{CheckStats, DiscoveringGvn, GvnError, ModifiableGvn, run_gvn};
