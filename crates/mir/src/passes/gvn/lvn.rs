//! Value numbering of the instructions of one basic block.

use super::{
    GvnShared, NO_VALUE, ValueName, key_op,
    memory::{MemoryKey, MemoryVersions},
    value_table::ValueTable,
};
use crate::ir::{AccessType, BasicBlockId, Mir, MirGraph, MirId, Opcode, OptFlags, SsaReg};
use bumpalo::Bump;
use cranelift_entity::EntityRef;
use tern_core::HashSet;

/// Facts about values and memory that hold at a program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LvnState<'a> {
    /// Values known to be non-null.
    pub null_checked: HashSet<ValueName, &'a Bump>,
    /// Values referring to an object with no other live reference.
    pub unique: HashSet<ValueName, &'a Bump>,
    /// `(ARRAY_REF, array, index, NO_VALUE)` keys of accesses
    /// already bounds-checked.
    pub range_checked: HashSet<u64, &'a Bump>,
    pub memory: MemoryVersions<'a>,
}

impl<'a> LvnState<'a> {
    /// State on method entry.
    pub fn new_in(arena: &'a Bump) -> Self {
        Self {
            null_checked: HashSet::new_in(arena),
            unique: HashSet::new_in(arena),
            range_checked: HashSet::new_in(arena),
            memory: MemoryVersions::new_in(arena),
        }
    }

    /// State about which nothing is known.
    pub fn unknown_in(arena: &'a Bump, merge_version: ValueName) -> Self {
        Self {
            memory: MemoryVersions::reset_in(arena, merge_version),
            ..Self::new_in(arena)
        }
    }

    /// State at a join of several forward edges.
    pub fn merge(arena: &'a Bump, states: &[&Self], merge_version: ValueName) -> Self {
        let memories: Vec<&MemoryVersions<'a>> = states.iter().map(|s| &s.memory).collect();
        Self {
            null_checked: intersect(arena, states, |s| &s.null_checked),
            unique: intersect(arena, states, |s| &s.unique),
            range_checked: intersect(arena, states, |s| &s.range_checked),
            memory: MemoryVersions::merge(arena, &memories, merge_version),
        }
    }

    /// State at a loop header, given the states of the forward edges
    /// into it. Checks done before the loop stay valid; uniqueness and
    /// memory contents may be changed by the loop body.
    pub fn loop_entry(arena: &'a Bump, forward: &[&Self], merge_version: ValueName) -> Self {
        Self {
            null_checked: intersect(arena, forward, |s| &s.null_checked),
            range_checked: intersect(arena, forward, |s| &s.range_checked),
            ..Self::unknown_in(arena, merge_version)
        }
    }
}

fn intersect<'a, T: Copy + Eq + std::hash::Hash>(
    arena: &'a Bump,
    states: &[&LvnState<'a>],
    set: impl for<'s> Fn(&'s LvnState<'a>) -> &'s HashSet<T, &'a Bump>,
) -> HashSet<T, &'a Bump> {
    let mut result = HashSet::new_in(arena);
    if let Some((&first, rest)) = states.split_first() {
        result.extend(
            set(first)
                .iter()
                .copied()
                .filter(|x| rest.iter().all(|&s| set(s).contains(x))),
        );
    }
    result
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FieldAccess {
    /// Dense field id.
    Resolved(u16),
    Volatile,
    Unresolved,
}

/// What numbering one instruction produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Outcome {
    /// Value name of the definition, or `NO_VALUE`.
    pub value: ValueName,
    /// Checks found redundant.
    pub flags: OptFlags,
}

pub(crate) struct LocalValueNumbering<'s, 'a> {
    shared: &'s mut GvnShared<'a>,
    graph: &'s MirGraph,
    block: BasicBlockId,
    state: LvnState<'a>,
}

impl<'s, 'a> LocalValueNumbering<'s, 'a> {
    pub fn new(
        shared: &'s mut GvnShared<'a>,
        graph: &'s MirGraph,
        block: BasicBlockId,
        state: LvnState<'a>,
    ) -> Self {
        Self {
            shared,
            graph,
            block,
            state,
        }
    }

    pub fn into_state(self) -> LvnState<'a> {
        self.state
    }

    fn table(&mut self) -> &mut ValueTable<'a> {
        &mut self.shared.value_table
    }

    fn lookup(&mut self, op: u16, operand1: u16, operand2: u16, modifier: u16) -> ValueName {
        self.shared
            .value_table
            .lookup_or_create(op, operand1, operand2, modifier)
    }

    /// Value name of an SSA register; registers not yet defined
    /// get an opaque value of their own.
    pub fn operand_value(&mut self, reg: SsaReg) -> ValueName {
        let wide = self.graph.is_wide(reg);
        let known = if wide {
            self.shared.sreg_wide_values.get(&reg)
        } else {
            self.shared.sreg_values.get(&reg)
        };
        if let Some(&value) = known {
            return value;
        }
        let raw = reg.as_u32();
        let value = self.lookup(key_op::NO_VALUE, raw as u16, (raw >> 16) as u16, NO_VALUE);
        self.set_operand_value(reg, value);
        value
    }

    pub fn set_operand_value(&mut self, reg: SsaReg, value: ValueName) {
        let map = if self.graph.is_wide(reg) {
            &mut self.shared.sreg_wide_values
        } else {
            &mut self.shared.sreg_values
        };
        let previous = map.insert(reg, value);
        debug_assert!(
            previous.is_none_or(|previous| previous == value) || !self.shared.good(),
            "{reg:?} renumbered from {previous:?} to {value}"
        );
    }

    /// A version for a write (or volatile read) performed by `mir`.
    /// Keyed on the instruction so that renumbering the block yields
    /// the same name.
    fn instruction_version(&mut self, mir: MirId, kind: u16) -> ValueName {
        let raw = mir.index() as u32;
        self.lookup(key_op::MEMORY_VERSION, raw as u16, (raw >> 16) as u16, kind)
    }

    fn classify_field(&mut self, mir: &Mir) -> FieldAccess {
        let graph = self.graph;
        let Some(info) = graph.field_info(mir) else {
            return FieldAccess::Unresolved;
        };
        match info.declaring_file {
            None => FieldAccess::Unresolved,
            Some(_) if info.is_volatile => FieldAccess::Volatile,
            Some(file) => {
                FieldAccess::Resolved(self.shared.field_id(file, info.declaring_field_idx))
            }
        }
    }

    fn is_unique(&self, value: ValueName) -> bool {
        self.state.unique.contains(&value)
    }

    fn handle_null_check(&mut self, value: ValueName, flags: &mut OptFlags) {
        self.shared.stats.record_null_check();
        if self.state.null_checked.contains(&value) {
            tracing::trace!(block = ?self.block, value, "redundant null check");
            self.shared.stats.record_null_check_eliminated();
            *flags |= OptFlags::IGNORE_NULL_CHECK;
        } else {
            self.state.null_checked.insert(value);
        }
    }

    fn handle_range_check(&mut self, array: ValueName, index: ValueName, flags: &mut OptFlags) {
        self.shared.stats.record_range_check();
        let key = ValueTable::build_key(key_op::ARRAY_REF, array, index, NO_VALUE);
        if self.state.range_checked.contains(&key) {
            tracing::trace!(block = ?self.block, array, index, "redundant range check");
            self.shared.stats.record_range_check_eliminated();
            *flags |= OptFlags::IGNORE_RANGE_CHECK;
        } else {
            self.state.range_checked.insert(key);
        }
    }

    /// The stored reference escapes into the heap.
    fn handle_put_object(&mut self, mir: &Mir) {
        let value = self.operand_value(mir.ssa.uses[0]);
        self.state.unique.remove(&value);
    }

    fn mark_unique_non_null(&mut self, def: SsaReg) -> ValueName {
        let value = self.operand_value(def);
        self.state.null_checked.insert(value);
        self.state.unique.insert(value);
        value
    }

    /// A callee may retain or publish any argument.
    fn make_args_non_unique(&mut self, mir: &Mir) {
        for &arg in &mir.ssa.uses {
            let value = self.operand_value(arg);
            self.state.unique.remove(&value);
        }
    }

    fn define(&mut self, mir: &Mir, value: ValueName) -> ValueName {
        if let Some(def) = mir.def() {
            self.set_operand_value(def, value);
        }
        value
    }

    fn narrow_constant(&mut self, literal: u32) -> ValueName {
        self.lookup(
            Opcode::Const as u16,
            literal as u16,
            (literal >> 16) as u16,
            0,
        )
    }

    fn wide_constant(&mut self, low: (u16, u16), high: (u16, u16)) -> ValueName {
        let low = self.lookup(Opcode::Const as u16, low.0, low.1, 1);
        let high = self.lookup(Opcode::Const as u16, high.0, high.1, 2);
        self.lookup(Opcode::ConstWide as u16, low, high, 3)
    }

    /// Counts a store of a value the location is already known to hold.
    fn note_redundant_store(
        &mut self,
        op: u16,
        operand1: u16,
        operand2: u16,
        version: ValueName,
        stored: ValueName,
    ) {
        if self
            .shared
            .value_table
            .has_value(op, operand1, operand2, version, stored)
        {
            self.shared.stats.record_redundant_store();
        }
    }

    /// Numbers a phi. With `fold` set, a phi whose inputs from
    /// reachable predecessors all carry one value gets that value.
    pub fn process_phi(
        &mut self,
        mir_id: MirId,
        reachable: impl Fn(BasicBlockId) -> bool,
        fold: bool,
    ) -> Outcome {
        let graph = self.graph;
        let mir = &graph.mirs[mir_id];
        let none = Outcome {
            value: NO_VALUE,
            flags: OptFlags::empty(),
        };
        let Some(def) = mir.def() else {
            return none;
        };

        let mut common = None;
        if fold {
            for (&reg, &pred) in mir.ssa.uses.iter().zip(mir.phi_incoming()) {
                if !reachable(pred) {
                    continue;
                }
                let value = self.operand_value(reg);
                match common {
                    None => common = Some(value),
                    Some(seen) if seen != value => {
                        common = None;
                        break;
                    }
                    Some(_) => {}
                }
            }
        }

        let value = match common {
            Some(value) => value,
            None => {
                let raw = def.as_u32();
                self.lookup(
                    key_op::PHI,
                    self.block.index() as u16,
                    raw as u16,
                    (raw >> 16) as u16,
                )
            }
        };
        self.set_operand_value(def, value);
        Outcome { value, ..none }
    }

    /// Numbers one instruction.
    pub fn process(&mut self, mir_id: MirId) -> Outcome {
        let graph = self.graph;
        let mir = &graph.mirs[mir_id];
        let mut flags = OptFlags::empty();
        let op = mir.opcode;

        let value = match op {
            Opcode::Nop
            | Opcode::ReturnVoid
            | Opcode::Return
            | Opcode::ReturnWide
            | Opcode::ReturnObject
            | Opcode::MonitorEnter
            | Opcode::MonitorExit
            | Opcode::Goto
            | Opcode::PackedSwitch
            | Opcode::SparseSwitch
            | Opcode::CheckCast
            | Opcode::Throw
            | Opcode::FillArrayData
            | Opcode::Phi => NO_VALUE,
            op if op.is_conditional_branch() => NO_VALUE,

            Opcode::InvokeStatic
            | Opcode::InvokeVirtual
            | Opcode::InvokeSuper
            | Opcode::InvokeDirect
            | Opcode::InvokeInterface => {
                if op.has_receiver()
                    && let Some(&receiver) = mir.ssa.uses.first()
                {
                    let receiver = self.operand_value(receiver);
                    self.handle_null_check(receiver, &mut flags);
                }
                let version = self.instruction_version(mir_id, 0);
                self.state.memory.advance_global(version);
                self.make_args_non_unique(mir);
                NO_VALUE
            }

            Opcode::FilledNewArray => {
                if let Some(next) = graph.next_in_block(self.block, mir_id)
                    && graph.mirs[next].opcode == Opcode::MoveResultObject
                    && let Some(def) = graph.mirs[next].def()
                {
                    // Numbered here; the move-result picks the name up.
                    self.mark_unique_non_null(def);
                }
                self.make_args_non_unique(mir);
                NO_VALUE
            }

            Opcode::MoveException
            | Opcode::NewInstance
            | Opcode::NewArray
            | Opcode::ConstString
            | Opcode::ConstClass => match mir.def() {
                Some(def) => self.mark_unique_non_null(def),
                None => NO_VALUE,
            },

            // Opaque result, unique to the defining register.
            Opcode::MoveResult
            | Opcode::MoveResultWide
            | Opcode::MoveResultObject
            | Opcode::InstanceOf => match mir.def() {
                Some(def) => self.operand_value(def),
                None => NO_VALUE,
            },

            Opcode::Move | Opcode::MoveWide | Opcode::MoveObject => {
                let value = self.operand_value(mir.ssa.uses[0]);
                self.define(mir, value)
            }

            Opcode::Const4 | Opcode::Const16 | Opcode::Const => {
                let value = self.narrow_constant(mir.v_b);
                self.define(mir, value)
            }
            Opcode::ConstHigh16 => {
                let value = self.lookup(Opcode::Const as u16, 0, mir.v_b as u16, 0);
                self.define(mir, value)
            }
            Opcode::ConstWide16 | Opcode::ConstWide32 => {
                let low = (mir.v_b as u16, (mir.v_b >> 16) as u16);
                let high = if (mir.v_b as i32) < 0 {
                    (0xffff, 0xffff)
                } else {
                    (0, 0)
                };
                let value = self.wide_constant(low, high);
                self.define(mir, value)
            }
            Opcode::ConstWide => {
                let bits = mir.v_b_wide;
                let low = (bits as u16, (bits >> 16) as u16);
                let high = ((bits >> 32) as u16, (bits >> 48) as u16);
                let value = self.wide_constant(low, high);
                self.define(mir, value)
            }
            Opcode::ConstWideHigh16 => {
                let value = self.wide_constant((0, 0), (0, mir.v_b as u16));
                self.define(mir, value)
            }

            Opcode::ArrayLength => {
                let array = self.operand_value(mir.ssa.uses[0]);
                self.handle_null_check(array, &mut flags);
                let value = self.lookup(op as u16, array, NO_VALUE, NO_VALUE);
                self.define(mir, value)
            }

            op if op.is_unary_arithmetic() => {
                let operand = self.operand_value(mir.ssa.uses[0]);
                let value = self.lookup(op as u16, operand, NO_VALUE, NO_VALUE);
                self.define(mir, value)
            }

            op if op.is_binary_arithmetic() => {
                let lhs = self.operand_value(mir.ssa.uses[0]);
                let rhs = self.operand_value(mir.ssa.uses[1]);
                let value = self.lookup(op as u16, lhs, rhs, NO_VALUE);
                self.define(mir, value)
            }

            op if op.is_unary_lit() => {
                let lhs = self.operand_value(mir.ssa.uses[0]);
                let rhs = self.narrow_constant(mir.v_c);
                let value = self.lookup(op as u16, lhs, rhs, NO_VALUE);
                self.define(mir, value)
            }

            op if op.is_aget() => self.handle_aget(mir, &mut flags),
            op if op.is_aput() => {
                if op == Opcode::AputObject {
                    self.handle_put_object(mir);
                }
                self.handle_aput(mir_id, mir, &mut flags);
                NO_VALUE
            }
            op if op.is_iget() => self.handle_iget(mir_id, mir, &mut flags),
            op if op.is_iput() => {
                if op == Opcode::IputObject {
                    self.handle_put_object(mir);
                }
                self.handle_iput(mir_id, mir, &mut flags);
                NO_VALUE
            }
            op if op.is_sget() => self.handle_sget(mir_id, mir),
            op if op.is_sput() => {
                if op == Opcode::SputObject {
                    self.handle_put_object(mir);
                }
                self.handle_sput(mir_id, mir);
                NO_VALUE
            }

            _ => {
                // Anything else defining a value is opaque.
                match mir.def() {
                    Some(def) => self.operand_value(def),
                    None => NO_VALUE,
                }
            }
        };

        Outcome { value, flags }
    }

    fn access_type(mir: &Mir) -> AccessType {
        mir.opcode.access_type().unwrap_or(AccessType::Normal)
    }

    fn handle_aget(&mut self, mir: &Mir, flags: &mut OptFlags) -> ValueName {
        let array = self.operand_value(mir.ssa.uses[0]);
        self.handle_null_check(array, flags);
        let index = self.operand_value(mir.ssa.uses[1]);
        self.handle_range_check(array, index, flags);

        let key = MemoryKey::new(array, NO_VALUE, Self::access_type(mir));
        let version = self.state.memory.get_version(key, self.is_unique(array));
        let value = self.lookup(key_op::ARRAY_REF, array, index, version);
        self.define(mir, value)
    }

    fn handle_aput(&mut self, mir_id: MirId, mir: &Mir, flags: &mut OptFlags) {
        let stored = self.operand_value(mir.ssa.uses[0]);
        let array = self.operand_value(mir.ssa.uses[1]);
        self.handle_null_check(array, flags);
        let index = self.operand_value(mir.ssa.uses[2]);
        self.handle_range_check(array, index, flags);

        let key = MemoryKey::new(array, NO_VALUE, Self::access_type(mir));
        let unique = self.is_unique(array);
        let current = self.state.memory.get_version(key, unique);
        self.note_redundant_store(key_op::ARRAY_REF, array, index, current, stored);

        let version = self.instruction_version(mir_id, 0);
        let version = self.state.memory.advance_version(key, unique, version);
        // A following load of the same element yields the stored value.
        self.table()
            .store_exact(key_op::ARRAY_REF, array, index, version, stored);
    }

    fn handle_iget(&mut self, mir_id: MirId, mir: &Mir, flags: &mut OptFlags) -> ValueName {
        let base = self.operand_value(mir.ssa.uses[0]);
        self.handle_null_check(base, flags);
        let access = Self::access_type(mir);

        let value = match self.classify_field(mir) {
            FieldAccess::Resolved(field) => {
                let key = MemoryKey::new(base, field, access);
                let version = self
                    .state
                    .memory
                    .get_version(key, self.is_unique(base))
                    .max(self.state.memory.unresolved_ifield_version(access));
                self.lookup(Opcode::Iget as u16, base, field, version)
            }
            // Volatile or unresolved: never reuse an earlier load.
            FieldAccess::Volatile | FieldAccess::Unresolved => {
                let version = self.instruction_version(mir_id, 0);
                self.lookup(Opcode::Iget as u16, base, 0, version)
            }
        };
        self.define(mir, value)
    }

    fn handle_iput(&mut self, mir_id: MirId, mir: &Mir, flags: &mut OptFlags) {
        let stored = self.operand_value(mir.ssa.uses[0]);
        let base = self.operand_value(mir.ssa.uses[1]);
        self.handle_null_check(base, flags);
        let access = Self::access_type(mir);

        match self.classify_field(mir) {
            FieldAccess::Resolved(field) => {
                let key = MemoryKey::new(base, field, access);
                let unique = self.is_unique(base);
                let current = self
                    .state
                    .memory
                    .get_version(key, unique)
                    .max(self.state.memory.unresolved_ifield_version(access));
                self.note_redundant_store(Opcode::Iget as u16, base, field, current, stored);

                let version = self.instruction_version(mir_id, 0);
                let version = self.state.memory.advance_version(key, unique, version);
                self.table()
                    .store_exact(Opcode::Iget as u16, base, field, version, stored);
            }
            FieldAccess::Unresolved => {
                // Aliases every field of the same type.
                let version = self.instruction_version(mir_id, 0);
                self.state
                    .memory
                    .set_unresolved_ifield_version(access, version);
            }
            // Resolved volatile fields never alias non-volatile ones,
            // and their loads always get fresh versions.
            FieldAccess::Volatile => {}
        }
    }

    fn handle_sget(&mut self, mir_id: MirId, mir: &Mir) -> ValueName {
        let access = Self::access_type(mir);
        let value = match self.classify_field(mir) {
            FieldAccess::Resolved(field) => {
                let key = MemoryKey::new(NO_VALUE, field, access);
                let version = self
                    .state
                    .memory
                    .get_version(key, false)
                    .max(self.state.memory.unresolved_sfield_version(access));
                self.lookup(Opcode::Sget as u16, NO_VALUE, field, version)
            }
            FieldAccess::Volatile | FieldAccess::Unresolved => {
                let version = self.instruction_version(mir_id, 0);
                self.lookup(Opcode::Sget as u16, NO_VALUE, 0, version)
            }
        };
        self.define(mir, value)
    }

    fn handle_sput(&mut self, mir_id: MirId, mir: &Mir) {
        let stored = self.operand_value(mir.ssa.uses[0]);
        let access = Self::access_type(mir);

        match self.classify_field(mir) {
            FieldAccess::Resolved(field) => {
                let key = MemoryKey::new(NO_VALUE, field, access);
                let current = self
                    .state
                    .memory
                    .get_version(key, false)
                    .max(self.state.memory.unresolved_sfield_version(access));
                self.note_redundant_store(Opcode::Sget as u16, NO_VALUE, field, current, stored);

                let version = self.instruction_version(mir_id, 0);
                let version = self.state.memory.advance_version(key, false, version);
                self.table()
                    .store_exact(Opcode::Sget as u16, NO_VALUE, field, version, stored);
            }
            FieldAccess::Unresolved => {
                let version = self.instruction_version(mir_id, 0);
                self.state
                    .memory
                    .set_unresolved_sfield_version(access, version);
            }
            FieldAccess::Volatile => {}
        }
    }
}
