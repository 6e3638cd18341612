use crate::ir::{FieldInfo, FieldInfoId, Opcode};
use bitflags::bitflags;
use compact_str::{CompactString, format_compact};
use cranelift_entity::{EntityRef, EntitySet, PrimaryMap};
use smallvec::SmallVec;
use tern_core::{entity_ref, entity_ref_16bit};

entity_ref_16bit! {
    pub struct BasicBlockId;
}

entity_ref! {
    pub struct MirId;
}

entity_ref! {
    /// An SSA register name. Each register is defined at most once;
    /// registers without a definition are live on method entry.
    pub struct SsaReg;
}

impl SsaReg {
    pub fn from_u32(x: u32) -> Self {
        Self(x)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Per-instruction facts for code generation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptFlags: u16 {
        /// The instruction's object operand is known to be non-null.
        const IGNORE_NULL_CHECK = 1 << 0;
        /// The instruction's array index is known to be in bounds.
        const IGNORE_RANGE_CHECK = 1 << 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsaRep {
    pub uses: SmallVec<[SsaReg; 4]>,
    pub defs: SmallVec<[SsaReg; 2]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MirMeta {
    #[default]
    None,
    IField(FieldInfoId),
    SField(FieldInfoId),
    /// Incoming block for each use of a phi, in use order.
    PhiIncoming(SmallVec<[BasicBlockId; 4]>),
}

/// One decoded bytecode instruction plus its SSA form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mir {
    pub opcode: Opcode,
    pub v_b: u32,
    pub v_b_wide: u64,
    pub v_c: u32,
    /// Bytecode offset; only used for diagnostics.
    pub offset: u32,
    pub optimization_flags: OptFlags,
    pub ssa: SsaRep,
    pub meta: MirMeta,
}

impl Mir {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            v_b: 0,
            v_b_wide: 0,
            v_c: 0,
            offset: 0,
            optimization_flags: OptFlags::empty(),
            ssa: SsaRep::default(),
            meta: MirMeta::None,
        }
    }

    pub fn def(&self) -> Option<SsaReg> {
        self.ssa.defs.first().copied()
    }

    pub fn phi_incoming(&self) -> &[BasicBlockId] {
        match &self.meta {
            MirMeta::PhiIncoming(blocks) => blocks,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicBlock {
    /// Optional name, for debugging and testing.
    pub name: Option<CompactString>,
    /// Instructions in execution order; phis come first.
    pub mirs: Vec<MirId>,
    /// Taken target first, then the fall-through or switch targets.
    pub successors: SmallVec<[BasicBlockId; 2]>,
    /// Filled in by `MirGraph::compute_predecessors`.
    pub predecessors: SmallVec<[BasicBlockId; 4]>,
    /// Filled in by dominance analysis; `None` for the entry block
    /// and unreachable blocks.
    pub i_dom: Option<BasicBlockId>,
}

/// SSA-form control-flow graph of one method.
#[derive(Debug, Clone)]
pub struct MirGraph {
    pub name: CompactString,
    pub blocks: PrimaryMap<BasicBlockId, BasicBlock>,
    pub mirs: PrimaryMap<MirId, Mir>,
    pub entry_block: BasicBlockId,
    pub ifields: PrimaryMap<FieldInfoId, FieldInfo>,
    pub sfields: PrimaryMap<FieldInfoId, FieldInfo>,
    /// SSA registers holding 64-bit values.
    pub wide_regs: EntitySet<SsaReg>,
}

impl MirGraph {
    pub fn new(name: impl Into<CompactString>) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry_block = blocks.push(BasicBlock::default());
        Self {
            name: name.into(),
            blocks,
            mirs: PrimaryMap::new(),
            entry_block,
            ifields: PrimaryMap::new(),
            sfields: PrimaryMap::new(),
            wide_regs: EntitySet::new(),
        }
    }

    pub fn is_wide(&self, reg: SsaReg) -> bool {
        self.wide_regs.contains(reg)
    }

    pub fn block_name(&self, block: BasicBlockId) -> CompactString {
        match &self.blocks[block].name {
            Some(name) => name.clone(),
            None => format_compact!("b{}", block.index()),
        }
    }

    /// Field annotation of a field access instruction.
    pub fn field_info(&self, mir: &Mir) -> Option<&FieldInfo> {
        match mir.meta {
            MirMeta::IField(id) => self.ifields.get(id),
            MirMeta::SField(id) => self.sfields.get(id),
            _ => None,
        }
    }

    /// The instruction following `mir` in `block`, if any.
    pub fn next_in_block(&self, block: BasicBlockId, mir: MirId) -> Option<MirId> {
        let mirs = &self.blocks[block].mirs;
        let pos = mirs.iter().position(|&m| m == mir)?;
        mirs.get(pos + 1).copied()
    }

    pub fn visit_block_successors(&self, block: BasicBlockId, visit: impl FnMut(BasicBlockId)) {
        self.blocks[block].successors.iter().copied().for_each(visit)
    }

    pub fn is_block_edge(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        self.blocks[a].successors.contains(&b)
    }

    /// Rebuilds every block's predecessor list from the successor lists.
    /// Predecessors appear in block order.
    pub fn compute_predecessors(&mut self) {
        for block in self.blocks.values_mut() {
            block.predecessors.clear();
        }
        let edges: Vec<(BasicBlockId, BasicBlockId)> = self
            .blocks
            .iter()
            .flat_map(|(from, data)| data.successors.iter().map(move |&to| (from, to)))
            .collect();
        for (from, to) in edges {
            if !self.blocks[to].predecessors.contains(&from) {
                self.blocks[to].predecessors.push(from);
            }
        }
    }

    /// Marks phi definitions wide when any incoming register is wide.
    /// Iterates to a fixed point so phi-of-phi chains are covered.
    pub fn propagate_phi_wideness(&mut self) {
        loop {
            let mut changed = false;
            for mir in self.mirs.values() {
                if mir.opcode != Opcode::Phi {
                    continue;
                }
                let Some(def) = mir.def() else { continue };
                if !self.wide_regs.contains(def)
                    && mir.ssa.uses.iter().any(|&u| self.wide_regs.contains(u))
                {
                    self.wide_regs.insert(def);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessors_follow_successors() {
        let mut graph = MirGraph::new("f");
        let b1 = graph.blocks.push(BasicBlock::default());
        let b2 = graph.blocks.push(BasicBlock::default());
        let entry = graph.entry_block;
        graph.blocks[entry].successors.extend([b1, b2]);
        graph.blocks[b1].successors.push(b2);
        graph.compute_predecessors();

        assert!(graph.blocks[entry].predecessors.is_empty());
        assert_eq!(graph.blocks[b1].predecessors.as_slice(), &[entry]);
        assert_eq!(graph.blocks[b2].predecessors.as_slice(), &[entry, b1]);
        assert!(graph.is_block_edge(b1, b2));
        assert!(!graph.is_block_edge(b2, b1));
    }

    #[test]
    fn default_block_names() {
        let mut graph = MirGraph::new("f");
        let b1 = graph.blocks.push(BasicBlock {
            name: Some("exit".into()),
            ..Default::default()
        });
        assert_eq!(graph.block_name(graph.entry_block), "b0");
        assert_eq!(graph.block_name(b1), "exit");
    }
}
