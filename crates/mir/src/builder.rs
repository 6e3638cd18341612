use crate::{
    ir::{
        BasicBlock, BasicBlockId, FieldInfo, FieldInfoId, Mir, MirGraph, MirId, MirMeta, Opcode,
        SsaReg,
    },
    passes::dominance::DominanceInfo,
};
use compact_str::CompactString;
use smallvec::SmallVec;

/// Builder API for a `MirGraph`.
///
/// Terminators wire the current block's successor edges;
/// `finish` derives predecessors and dominators.
pub struct MirBuilder {
    graph: MirGraph,
    current_block: BasicBlockId,
    next_offset: u32,
}

impl MirBuilder {
    pub fn new(name: impl Into<CompactString>) -> Self {
        let graph = MirGraph::new(name);
        let current_block = graph.entry_block;
        Self {
            graph,
            current_block,
            next_offset: 0,
        }
    }

    pub fn entry_block(&self) -> BasicBlockId {
        self.graph.entry_block
    }

    pub fn current_block(&self) -> BasicBlockId {
        self.current_block
    }

    pub fn create_block(&mut self) -> BasicBlockId {
        self.graph.blocks.push(BasicBlock::default())
    }

    pub fn create_named_block(&mut self, name: impl Into<CompactString>) -> BasicBlockId {
        self.graph.blocks.push(BasicBlock {
            name: Some(name.into()),
            ..Default::default()
        })
    }

    pub fn set_block_name(&mut self, block: BasicBlockId, name: impl Into<CompactString>) {
        self.graph.blocks[block].name = Some(name.into());
    }

    pub fn switch_to_block(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    /// Adds a control-flow edge that is not implied by a terminator,
    /// e.g. a fall-through into the next block.
    pub fn add_edge(&mut self, from: BasicBlockId, to: BasicBlockId) {
        let successors = &mut self.graph.blocks[from].successors;
        if !successors.contains(&to) {
            successors.push(to);
        }
    }

    /// Declares an entry-live register as holding a wide value.
    pub fn declare_wide(&mut self, reg: SsaReg) {
        self.graph.wide_regs.insert(reg);
    }

    pub fn ifield(&mut self, info: FieldInfo) -> FieldInfoId {
        self.graph.ifields.push(info)
    }

    pub fn sfield(&mut self, info: FieldInfo) -> FieldInfoId {
        self.graph.sfields.push(info)
    }

    pub fn instr(&mut self) -> MirInstrBuilder<'_> {
        MirInstrBuilder {
            graph: &mut self.graph,
            block: self.current_block,
            next_offset: &mut self.next_offset,
        }
    }

    /// Finishes the graph without running any analysis.
    pub fn finish_raw(self) -> MirGraph {
        self.graph
    }

    pub fn finish(mut self) -> MirGraph {
        self.graph.compute_predecessors();
        self.graph.propagate_phi_wideness();
        DominanceInfo::compute(&self.graph).store_immediate_dominators(&mut self.graph);
        self.graph
    }
}

pub struct MirInstrBuilder<'a> {
    graph: &'a mut MirGraph,
    block: BasicBlockId,
    next_offset: &'a mut u32,
}

impl MirInstrBuilder<'_> {
    /// Appends a fully formed instruction to the current block.
    pub fn push(self, mut mir: Mir) -> MirId {
        mir.offset = *self.next_offset;
        *self.next_offset += 1;
        if mir.opcode.defines_wide() {
            for &def in &mir.ssa.defs {
                self.graph.wide_regs.insert(def);
            }
        }
        let id = self.graph.mirs.push(mir);
        self.graph.blocks[self.block].mirs.push(id);
        id
    }

    fn simple(self, opcode: Opcode, defs: &[SsaReg], uses: &[SsaReg]) -> MirId {
        let mut mir = Mir::new(opcode);
        mir.ssa.defs.extend_from_slice(defs);
        mir.ssa.uses.extend_from_slice(uses);
        self.push(mir)
    }

    fn add_successors(&mut self, targets: &[BasicBlockId]) {
        for &target in targets {
            let successors = &mut self.graph.blocks[self.block].successors;
            if !successors.contains(&target) {
                successors.push(target);
            }
        }
    }

    /// Narrow constant (`const`, `const/4`, `const/16`, `const/high16`)
    /// or short wide constant (`const-wide/16`, `const-wide/32`,
    /// `const-wide/high16`). For the `high16` forms `literal` holds the
    /// upper 16 bits.
    pub fn constant(self, opcode: Opcode, dst: SsaReg, literal: i32) -> MirId {
        let mut mir = Mir::new(opcode);
        mir.v_b = literal as u32;
        mir.ssa.defs.push(dst);
        self.push(mir)
    }

    pub fn const_wide(self, dst: SsaReg, literal: i64) -> MirId {
        let mut mir = Mir::new(Opcode::ConstWide);
        mir.v_b_wide = literal as u64;
        mir.ssa.defs.push(dst);
        self.push(mir)
    }

    pub fn const_string(self, dst: SsaReg, string_idx: u32) -> MirId {
        let mut mir = Mir::new(Opcode::ConstString);
        mir.v_b = string_idx;
        mir.ssa.defs.push(dst);
        self.push(mir)
    }

    pub fn const_class(self, dst: SsaReg, type_idx: u32) -> MirId {
        let mut mir = Mir::new(Opcode::ConstClass);
        mir.v_b = type_idx;
        mir.ssa.defs.push(dst);
        self.push(mir)
    }

    /// `move`, `move-wide` or `move-object`.
    pub fn move_(self, opcode: Opcode, dst: SsaReg, src: SsaReg) -> MirId {
        self.simple(opcode, &[dst], &[src])
    }

    /// `move-result*`, `move-exception`, `new-instance`.
    pub fn def_only(self, opcode: Opcode, dst: SsaReg) -> MirId {
        self.simple(opcode, &[dst], &[])
    }

    pub fn new_instance(self, dst: SsaReg) -> MirId {
        self.simple(Opcode::NewInstance, &[dst], &[])
    }

    pub fn new_array(self, dst: SsaReg, length: SsaReg) -> MirId {
        self.simple(Opcode::NewArray, &[dst], &[length])
    }

    pub fn filled_new_array(self, args: &[SsaReg]) -> MirId {
        self.simple(Opcode::FilledNewArray, &[], args)
    }

    pub fn unop(self, opcode: Opcode, dst: SsaReg, src: SsaReg) -> MirId {
        self.simple(opcode, &[dst], &[src])
    }

    pub fn binop(self, opcode: Opcode, dst: SsaReg, lhs: SsaReg, rhs: SsaReg) -> MirId {
        self.simple(opcode, &[dst], &[lhs, rhs])
    }

    /// Arithmetic with a literal operand (`add-int/lit8` and friends).
    pub fn binop_lit(self, opcode: Opcode, dst: SsaReg, src: SsaReg, literal: i32) -> MirId {
        let mut mir = Mir::new(opcode);
        mir.v_c = literal as u32;
        mir.ssa.defs.push(dst);
        mir.ssa.uses.push(src);
        self.push(mir)
    }

    pub fn instance_of(self, dst: SsaReg, obj: SsaReg) -> MirId {
        self.simple(Opcode::InstanceOf, &[dst], &[obj])
    }

    pub fn array_length(self, dst: SsaReg, array: SsaReg) -> MirId {
        self.simple(Opcode::ArrayLength, &[dst], &[array])
    }

    pub fn aget(self, opcode: Opcode, dst: SsaReg, array: SsaReg, index: SsaReg) -> MirId {
        debug_assert!(opcode.is_aget());
        self.simple(opcode, &[dst], &[array, index])
    }

    pub fn aput(self, opcode: Opcode, value: SsaReg, array: SsaReg, index: SsaReg) -> MirId {
        debug_assert!(opcode.is_aput());
        self.simple(opcode, &[], &[value, array, index])
    }

    pub fn iget(self, opcode: Opcode, dst: SsaReg, base: SsaReg, field: FieldInfoId) -> MirId {
        debug_assert!(opcode.is_iget());
        let mut mir = Mir::new(opcode);
        mir.ssa.defs.push(dst);
        mir.ssa.uses.push(base);
        mir.meta = MirMeta::IField(field);
        self.push(mir)
    }

    pub fn iput(self, opcode: Opcode, value: SsaReg, base: SsaReg, field: FieldInfoId) -> MirId {
        debug_assert!(opcode.is_iput());
        let mut mir = Mir::new(opcode);
        mir.ssa.uses.extend([value, base]);
        mir.meta = MirMeta::IField(field);
        self.push(mir)
    }

    pub fn sget(self, opcode: Opcode, dst: SsaReg, field: FieldInfoId) -> MirId {
        debug_assert!(opcode.is_sget());
        let mut mir = Mir::new(opcode);
        mir.ssa.defs.push(dst);
        mir.meta = MirMeta::SField(field);
        self.push(mir)
    }

    pub fn sput(self, opcode: Opcode, value: SsaReg, field: FieldInfoId) -> MirId {
        debug_assert!(opcode.is_sput());
        let mut mir = Mir::new(opcode);
        mir.ssa.uses.push(value);
        mir.meta = MirMeta::SField(field);
        self.push(mir)
    }

    /// Invoke with the receiver (if any) as the first argument.
    pub fn invoke(self, opcode: Opcode, args: &[SsaReg]) -> MirId {
        debug_assert!(opcode.is_invoke());
        self.simple(opcode, &[], args)
    }

    /// Instruction without definitions, e.g. `monitor-enter` or `check-cast`.
    pub fn effect(self, opcode: Opcode, uses: &[SsaReg]) -> MirId {
        self.simple(opcode, &[], uses)
    }

    pub fn phi(self, dst: SsaReg, incoming: &[(BasicBlockId, SsaReg)]) -> MirId {
        let mut mir = Mir::new(Opcode::Phi);
        mir.ssa.defs.push(dst);
        mir.ssa.uses.extend(incoming.iter().map(|&(_, reg)| reg));
        mir.meta = MirMeta::PhiIncoming(incoming.iter().map(|&(block, _)| block).collect());
        self.push(mir)
    }

    pub fn goto(mut self, target: BasicBlockId) -> MirId {
        self.add_successors(&[target]);
        self.simple(Opcode::Goto, &[], &[])
    }

    /// Conditional branch; `operands` holds one register for the
    /// `if-*z` forms and two otherwise.
    pub fn branch(
        mut self,
        opcode: Opcode,
        operands: &[SsaReg],
        taken: BasicBlockId,
        fall_through: BasicBlockId,
    ) -> MirId {
        debug_assert!(opcode.is_conditional_branch());
        self.add_successors(&[taken, fall_through]);
        self.simple(opcode, &[], operands)
    }

    pub fn switch(
        mut self,
        opcode: Opcode,
        operand: SsaReg,
        targets: &[BasicBlockId],
    ) -> MirId {
        self.add_successors(targets);
        self.simple(opcode, &[], &[operand])
    }

    pub fn return_(self, opcode: Opcode, value: Option<SsaReg>) -> MirId {
        debug_assert!(opcode.is_return());
        let uses: SmallVec<[SsaReg; 1]> = value.into_iter().collect();
        self.simple(opcode, &[], &uses)
    }

    pub fn throw(self, exception: SsaReg) -> MirId {
        self.simple(Opcode::Throw, &[], &[exception])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DexFileId;
    use cranelift_entity::EntityRef;

    fn v(n: u32) -> SsaReg {
        SsaReg::from_u32(n)
    }

    #[test]
    fn builds_diamond() {
        let mut b = MirBuilder::new("diamond");
        let entry = b.entry_block();
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_named_block("join");

        b.instr().constant(Opcode::Const4, v(0), 1);
        b.instr().branch(Opcode::IfEqz, &[v(0)], left, right);
        b.switch_to_block(left);
        b.instr().constant(Opcode::Const4, v(1), 2);
        b.instr().goto(join);
        b.switch_to_block(right);
        b.instr().constant(Opcode::Const4, v(4), 2);
        b.instr().const_wide(v(2), 3);
        b.instr().goto(join);
        b.switch_to_block(join);
        b.instr().phi(v(3), &[(left, v(1)), (right, v(4))]);
        b.instr().return_(Opcode::ReturnVoid, None);

        let graph = b.finish();
        assert_eq!(graph.blocks[entry].successors.as_slice(), &[left, right]);
        assert_eq!(graph.blocks[join].predecessors.as_slice(), &[left, right]);
        assert_eq!(graph.blocks[join].i_dom, Some(entry));
        assert!(graph.is_wide(v(2)));
        assert!(!graph.is_wide(v(3)));
        assert_eq!(graph.mirs.len(), 9);
    }

    #[test]
    fn records_field_annotations() {
        let mut b = MirBuilder::new("fields");
        let f = b.ifield(FieldInfo::resolved(DexFileId::new(0), 7));
        let mir = b.instr().iget(Opcode::IgetWide, v(1), v(0), f);
        let graph = b.finish();

        let info = graph.field_info(&graph.mirs[mir]).unwrap();
        assert_eq!(info.declaring_field_idx, 7);
        assert!(graph.is_wide(v(1)));
    }
}
