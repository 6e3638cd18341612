use crate::{
    ir::{BasicBlockId, MirGraph, MirId, Opcode, SsaReg},
    passes::dominance::DominanceInfo,
    validation::ValidationError,
};
use cranelift_entity::SecondaryMap;

/// Verifies that every SSA register is defined at most once and
/// that every use in a reachable block is dominated by the definition.
/// Phi inputs must be available at the end of their incoming block.
/// Registers with no definition are live on method entry.
pub fn verify_ssa(graph: &MirGraph) -> Result<(), ValidationError> {
    let mut defs: SecondaryMap<SsaReg, Option<(BasicBlockId, MirId)>> = SecondaryMap::new();
    for (block, data) in &graph.blocks {
        for &mir in &data.mirs {
            for &def in &graph.mirs[mir].ssa.defs {
                if let Some((other_block, _)) = defs[def] {
                    return Err(ValidationError::new(format_args!(
                        "{def:?} is defined in both {} and {}",
                        graph.block_name(other_block),
                        graph.block_name(block)
                    )));
                }
                defs[def] = Some((block, mir));
            }
        }
    }

    let dominance = DominanceInfo::compute(graph);
    for &block in dominance.reverse_post_order() {
        let data = &graph.blocks[block];
        for (position, &mir_id) in data.mirs.iter().enumerate() {
            let mir = &graph.mirs[mir_id];
            for (i, &used) in mir.ssa.uses.iter().enumerate() {
                let Some((def_block, def_mir)) = defs[used] else {
                    continue;
                };
                let available = if mir.opcode == Opcode::Phi {
                    let Some(&incoming) = mir.phi_incoming().get(i) else {
                        continue;
                    };
                    !dominance.is_reachable(incoming) || dominance.dominates(def_block, incoming)
                } else if def_block == block {
                    data.mirs[..position].contains(&def_mir)
                } else {
                    dominance.dominates(def_block, block)
                };
                if !available {
                    return Err(ValidationError::new(format_args!(
                        "use of {used:?} by {mir_id:?} in {} is not dominated by its definition",
                        graph.block_name(block)
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MirBuilder;

    fn v(n: u32) -> SsaReg {
        SsaReg::from_u32(n)
    }

    #[test]
    fn rejects_double_definition() {
        let mut b = MirBuilder::new("f");
        b.instr().constant(Opcode::Const4, v(0), 1);
        b.instr().constant(Opcode::Const4, v(0), 2);
        b.instr().return_(Opcode::ReturnVoid, None);
        let graph = b.finish();

        let err = verify_ssa(&graph).unwrap_err();
        assert!(err.0.contains("defined in both"), "{err}");
    }

    #[test]
    fn rejects_use_from_sibling_branch() {
        let mut b = MirBuilder::new("f");
        let left = b.create_block();
        let right = b.create_block();
        b.instr().branch(Opcode::IfEqz, &[v(0)], left, right);
        b.switch_to_block(left);
        b.instr().constant(Opcode::Const4, v(1), 1);
        b.instr().return_(Opcode::ReturnVoid, None);
        b.switch_to_block(right);
        b.instr().return_(Opcode::Return, Some(v(1)));
        let graph = b.finish();

        let err = verify_ssa(&graph).unwrap_err();
        assert!(err.0.contains("not dominated"), "{err}");
    }

    #[test]
    fn accepts_loop_carried_phi() {
        let mut b = MirBuilder::new("f");
        let entry = b.entry_block();
        let header = b.create_block();
        let exit = b.create_block();
        b.instr().constant(Opcode::Const4, v(1), 0);
        b.instr().goto(header);
        b.switch_to_block(header);
        b.instr().phi(v(2), &[(entry, v(1)), (header, v(3))]);
        b.instr().binop_lit(Opcode::AddIntLit8, v(3), v(2), 1);
        b.instr().branch(Opcode::IfEqz, &[v(3)], exit, header);
        b.switch_to_block(exit);
        b.instr().return_(Opcode::Return, Some(v(3)));
        let graph = b.finish();

        assert!(verify_ssa(&graph).is_ok());
        assert!(crate::validation::validate(&graph).is_ok());
    }
}
