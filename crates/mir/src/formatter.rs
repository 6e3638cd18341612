use crate::ir::{
    BasicBlockId, FieldInfo, FieldInfoId, LiteralKind, Mir, MirGraph, MirMeta, Opcode, OptFlags,
    SsaReg,
};
use cranelift_entity::{EntityRef, EntitySet};
use tern_core::sexpr::{SExpr, int, list, symbol};

/// Text names of the optimization flags, in output order.
pub(crate) const FLAG_NAMES: [(&str, OptFlags); 2] = [
    ("ignore-null-check", OptFlags::IGNORE_NULL_CHECK),
    ("ignore-range-check", OptFlags::IGNORE_RANGE_CHECK),
];

/// Converts a MIR graph to an S-expression.
///
/// The output can be read back with [`crate::parser::parse_mir`].
pub fn format_graph(graph: &MirGraph) -> SExpr {
    Formatter { graph }.format_all()
}

struct Formatter<'a> {
    graph: &'a MirGraph,
}

impl Formatter<'_> {
    fn format_all(&self) -> SExpr {
        let mut items = vec![symbol("graph"), symbol(self.graph.name.clone())];

        for (id, info) in &self.graph.ifields {
            items.push(self.format_field("ifield", id, info));
        }
        for (id, info) in &self.graph.sfields {
            items.push(self.format_field("sfield", id, info));
        }

        let declared = self.declared_wide_regs();
        if !declared.is_empty() {
            let mut wide = vec![symbol("wide")];
            wide.extend(declared.into_iter().map(format_reg));
            items.push(list(wide));
        }

        for block in self.graph.blocks.keys() {
            items.push(self.format_block(block));
        }

        list(items)
    }

    fn format_field(&self, kind: &str, id: FieldInfoId, info: &FieldInfo) -> SExpr {
        let mut items = vec![symbol(kind), format_field_name(id)];
        match info.declaring_file {
            None => items.push(symbol("unresolved")),
            Some(file) => {
                items.push(list([symbol("file"), int(file.index() as i64)]));
                items.push(list([
                    symbol("idx"),
                    int(i64::from(info.declaring_field_idx)),
                ]));
                if info.is_volatile {
                    items.push(symbol("volatile"));
                }
            }
        }
        list(items)
    }

    /// Used wide registers whose width is not implied by their
    /// definition, i.e. wide registers live on method entry.
    fn declared_wide_regs(&self) -> Vec<SsaReg> {
        let mut implied = EntitySet::<SsaReg>::new();
        for mir in self.graph.mirs.values() {
            if mir.opcode.defines_wide() || mir.opcode == Opcode::Phi {
                for &def in &mir.ssa.defs {
                    implied.insert(def);
                }
            }
        }
        let mut declared: Vec<SsaReg> = self
            .graph
            .mirs
            .values()
            .flat_map(|mir| mir.ssa.uses.iter().copied())
            .filter(|&reg| self.graph.is_wide(reg) && !implied.contains(reg))
            .collect();
        declared.sort();
        declared.dedup();
        declared
    }

    fn format_block(&self, block: BasicBlockId) -> SExpr {
        let data = &self.graph.blocks[block];
        let mut items = vec![symbol("block"), symbol(self.graph.block_name(block))];

        if !data.successors.is_empty() {
            let mut succ = vec![symbol("succ")];
            succ.extend(
                data.successors
                    .iter()
                    .map(|&s| symbol(self.graph.block_name(s))),
            );
            items.push(list(succ));
        }

        for &mir in &data.mirs {
            items.push(self.format_mir(&self.graph.mirs[mir]));
        }

        list(items)
    }

    fn format_mir(&self, mir: &Mir) -> SExpr {
        let mut items = vec![symbol(mir.opcode.name())];

        if !mir.ssa.defs.is_empty() {
            let mut defs = vec![symbol("def")];
            defs.extend(mir.ssa.defs.iter().copied().map(format_reg));
            items.push(list(defs));
        }
        if !mir.ssa.uses.is_empty() {
            let mut uses = vec![symbol("use")];
            uses.extend(mir.ssa.uses.iter().copied().map(format_reg));
            items.push(list(uses));
        }

        match mir.opcode.literal_kind() {
            LiteralKind::None => {}
            LiteralKind::B => items.push(list([symbol("lit"), int(i64::from(mir.v_b as i32))])),
            LiteralKind::Wide => items.push(list([symbol("lit"), int(mir.v_b_wide as i64)])),
            LiteralKind::C => items.push(list([symbol("lit"), int(i64::from(mir.v_c as i32))])),
        }

        match &mir.meta {
            MirMeta::None => {}
            MirMeta::IField(id) | MirMeta::SField(id) => {
                items.push(list([symbol("field"), format_field_name(*id)]));
            }
            MirMeta::PhiIncoming(blocks) => {
                let mut incoming = vec![symbol("incoming")];
                incoming.extend(blocks.iter().map(|&b| symbol(self.graph.block_name(b))));
                items.push(list(incoming));
            }
        }

        if !mir.optimization_flags.is_empty() {
            let mut flags = vec![symbol("flags")];
            flags.extend(
                FLAG_NAMES
                    .iter()
                    .filter(|(_, flag)| mir.optimization_flags.contains(*flag))
                    .map(|(name, _)| symbol(*name)),
            );
            items.push(list(flags));
        }

        list(items)
    }
}

fn format_reg(reg: SsaReg) -> SExpr {
    symbol(format!("v{}", reg.as_u32()))
}

fn format_field_name(id: FieldInfoId) -> SExpr {
    symbol(format!("f{}", id.index()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::MirBuilder, ir::DexFileId};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn v(n: u32) -> SsaReg {
        SsaReg::from_u32(n)
    }

    #[test]
    fn formats_blocks_and_annotations() {
        let mut b = MirBuilder::new("example");
        let f = b.ifield(FieldInfo::resolved(DexFileId::new(0), 7));
        let exit = b.create_named_block("exit");
        b.declare_wide(v(3));
        b.instr().constant(Opcode::Const4, v(0), -2);
        let load = b.instr().iget(Opcode::Iget, v(2), v(1), f);
        b.instr().goto(exit);
        b.switch_to_block(exit);
        b.instr().return_(Opcode::ReturnWide, Some(v(3)));
        let mut graph = b.finish();
        graph.mirs[load].optimization_flags = OptFlags::IGNORE_NULL_CHECK;

        assert_eq!(
            format_graph(&graph).to_string(),
            indoc! {"
                (graph example
                    (ifield f0
                        (file 0)
                        (idx 7))
                    (wide v3)
                    (block b0
                        (succ exit)
                        (const/4
                            (def v0)
                            (lit -2))
                        (iget
                            (def v2)
                            (use v1)
                            (field f0)
                            (flags ignore-null-check))
                        (goto))
                    (block exit
                        (return-wide
                            (use v3))))
            "}
        );
    }
}
