//! MIR validation passes.
//!
//! These passes are not intended to provide diagnostics
//! directly to users. Instead, they assert the structural
//! invariants value numbering relies on. They are used for
//! testing and sanity checks.

use crate::ir::MirGraph;
use std::{fmt::Display, panic::Location};

pub mod cfg_integrity;
pub mod ssa;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String, pub &'static Location<'static>);

impl ValidationError {
    #[track_caller]
    pub fn new(msg: impl Display) -> Self {
        Self(msg.to_string(), Location::caller())
    }
}

/// Runs every validation pass over `graph`.
pub fn validate(graph: &MirGraph) -> Result<(), ValidationError> {
    cfg_integrity::verify_cfg_integrity(graph)?;
    ssa::verify_ssa(graph)?;
    Ok(())
}
