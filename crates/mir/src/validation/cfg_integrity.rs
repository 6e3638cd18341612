use crate::{
    ir::{MirGraph, Opcode},
    validation::ValidationError,
};

/// Verifies the block structure of `graph`:
/// * successor and predecessor lists mirror each other,
/// * terminators only appear as the last instruction in a block,
///   and a block without one falls through to at most one successor,
/// * phis come first in their block and have one input per
///   predecessor.
pub fn verify_cfg_integrity(graph: &MirGraph) -> Result<(), ValidationError> {
    for (block, data) in &graph.blocks {
        let name = graph.block_name(block);

        for &succ in &data.successors {
            let Some(succ_data) = graph.blocks.get(succ) else {
                return Err(ValidationError::new(format_args!(
                    "{name} has a dangling successor {succ:?}"
                )));
            };
            if !succ_data.predecessors.contains(&block) {
                return Err(ValidationError::new(format_args!(
                    "{name} is missing from the predecessors of {}",
                    graph.block_name(succ)
                )));
            }
        }
        for &pred in &data.predecessors {
            if !graph.blocks.get(pred).is_some_and(|p| p.successors.contains(&block)) {
                return Err(ValidationError::new(format_args!(
                    "{name} lists {pred:?} as a predecessor without a matching edge"
                )));
            }
        }

        let Some((&last, rest)) = data.mirs.split_last() else {
            return Err(ValidationError::new(format_args!(
                "basic block {name} cannot be empty"
            )));
        };
        if rest.iter().any(|&mir| graph.mirs[mir].opcode.is_terminator()) {
            return Err(ValidationError::new(format_args!(
                "terminators can only appear as the last instruction in {name}"
            )));
        }
        if !graph.mirs[last].opcode.is_terminator() && data.successors.len() > 1 {
            return Err(ValidationError::new(format_args!(
                "{name} has several successors but does not end in a terminator"
            )));
        }

        let mut seen_non_phi = false;
        for &mir_id in &data.mirs {
            let mir = &graph.mirs[mir_id];
            if mir.opcode != Opcode::Phi {
                seen_non_phi = true;
                continue;
            }
            if seen_non_phi {
                return Err(ValidationError::new(format_args!(
                    "phi {mir_id:?} in {name} follows a non-phi instruction"
                )));
            }
            let incoming = mir.phi_incoming();
            if incoming.len() != mir.ssa.uses.len() || incoming.len() != data.predecessors.len() {
                return Err(ValidationError::new(format_args!(
                    "phi {mir_id:?} in {name} has {} inputs but the block has {} predecessors",
                    mir.ssa.uses.len(),
                    data.predecessors.len()
                )));
            }
            if let Some(stray) = incoming.iter().find(|b| !data.predecessors.contains(b)) {
                return Err(ValidationError::new(format_args!(
                    "phi {mir_id:?} in {name} names {} which is not a predecessor",
                    graph.block_name(*stray)
                )));
            }
        }
    }

    Ok(())
}
