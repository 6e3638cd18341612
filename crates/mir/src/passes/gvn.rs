//! Global value numbering.
//!
//! Numbering runs in two phases. [`DiscoveringGvn`] numbers every
//! reachable block once, in reverse postorder, without touching
//! the graph. [`DiscoveringGvn::finalize`]
//! then checks that the value-name space did not overflow and hands out
//! a [`ModifiableGvn`], which renumbers each block once more and records
//! the redundant null and range checks in the instructions' flags.

mod lvn;
mod memory;
mod stats;
mod value_table;

pub use memory::{MemoryKey, MemoryVersions};
pub use stats::CheckStats;
pub use tern_core::constants::mir::NO_VALUE;
pub use value_table::ValueTable;

use crate::{
    flags,
    ir::{BasicBlockId, DexFileId, MirGraph, MirId, Opcode, OptFlags, SsaReg},
    passes::dominance::DominanceInfo,
};
use bumpalo::Bump;
use cranelift_entity::{EntityRef, SecondaryMap};
use lvn::{LocalValueNumbering, LvnState, Outcome};
use smallvec::SmallVec;
use stats::StatsCollector;
use tern_core::{HashMap, IndexSet};

/// Name of an equivalence class of computed values.
pub type ValueName = u16;

/// Operations used in value-table keys that are not bytecode opcodes.
/// They sit above the highest `Opcode` discriminant.
pub(crate) mod key_op {
    /// Opaque per-register values.
    pub const NO_VALUE: u16 = super::NO_VALUE;
    pub const ARRAY_REF: u16 = 0xff00;
    pub const MEMORY_VERSION: u16 = 0xff01;
    pub const MERGE_VERSION: u16 = 0xff02;
    pub const PHI: u16 = 0xff03;
}

#[derive(Debug, thiserror::Error)]
pub enum GvnError {
    #[error("value numbering exhausted the value-name space ({allocated} names allocated)")]
    ValueNameOverflow { allocated: u32 },
}

/// Numbering state shared by all blocks of one method.
pub(crate) struct GvnShared<'a> {
    arena: &'a Bump,
    pub value_table: ValueTable<'a>,
    pub sreg_values: HashMap<SsaReg, ValueName, &'a Bump>,
    pub sreg_wide_values: HashMap<SsaReg, ValueName, &'a Bump>,
    field_ids: IndexSet<(DexFileId, u32)>,
    pub stats: StatsCollector,
}

impl<'a> GvnShared<'a> {
    fn new(arena: &'a Bump) -> Self {
        Self {
            arena,
            value_table: ValueTable::new_in(arena),
            sreg_values: HashMap::new_in(arena),
            sreg_wide_values: HashMap::new_in(arena),
            field_ids: IndexSet::default(),
            stats: StatsCollector::default(),
        }
    }

    /// Dense id of a resolved field, assigned on first use.
    pub fn field_id(&mut self, file: DexFileId, field_idx: u32) -> u16 {
        let (id, _) = self.field_ids.insert_full((file, field_idx));
        // Ids past the value-name range make `good()` false.
        id as u16
    }

    fn good(&self) -> bool {
        self.value_table.is_good() && self.field_ids.len() < usize::from(NO_VALUE)
    }
}

/// Machinery common to both phases.
struct GvnCore<'a> {
    shared: GvnShared<'a>,
    dominance: DominanceInfo,
    /// End state of each block processed so far.
    end_states: SecondaryMap<BasicBlockId, Option<LvnState<'a>>>,
}

/// How a block's predecessors relate to it.
struct Predecessors {
    /// Reachable predecessors earlier in reverse postorder.
    forward: SmallVec<[BasicBlockId; 4]>,
    /// Some predecessor is a loop back edge.
    back_edge: bool,
    /// Some predecessor reaches the block without going through a
    /// dominator (irreducible flow).
    irreducible: bool,
}

impl<'a> GvnCore<'a> {
    fn new(graph: &MirGraph, arena: &'a Bump) -> Self {
        Self {
            shared: GvnShared::new(arena),
            dominance: DominanceInfo::compute(graph),
            end_states: SecondaryMap::new(),
        }
    }

    fn classify_predecessors(&self, graph: &MirGraph, block: BasicBlockId) -> Predecessors {
        let index = self.dominance.rpo_index(block);
        let mut preds = Predecessors {
            forward: SmallVec::new(),
            back_edge: false,
            irreducible: false,
        };
        for &pred in &graph.blocks[block].predecessors {
            let Some(pred_index) = self.dominance.rpo_index(pred) else {
                continue;
            };
            if Some(pred_index) < index {
                preds.forward.push(pred);
            } else if self.dominance.dominates(block, pred) {
                preds.back_edge = true;
            } else {
                preds.irreducible = true;
            }
        }
        preds
    }

    fn value_of(&self, graph: &MirGraph, reg: SsaReg) -> Option<ValueName> {
        let values = if graph.is_wide(reg) {
            &self.shared.sreg_wide_values
        } else {
            &self.shared.sreg_values
        };
        values.get(&reg).copied()
    }

    fn merge_version(&mut self, block: BasicBlockId) -> ValueName {
        self.shared
            .value_table
            .lookup_or_create(key_op::MERGE_VERSION, block.index() as u16, 0, 0)
    }

    /// The state at the start of `block`. Depends only on the end
    /// states of forward predecessors, so it is stable across passes.
    fn entry_state(&mut self, preds: &Predecessors, block: BasicBlockId) -> LvnState<'a> {
        let arena = self.shared.arena;
        let straight_line = !preds.back_edge && !preds.irreducible;
        if straight_line && preds.forward.is_empty() {
            return LvnState::new_in(arena);
        }
        if straight_line
            && let [single] = preds.forward.as_slice()
            && let Some(state) = &self.end_states[*single]
        {
            return state.clone();
        }

        let merge_version = self.merge_version(block);
        let forward: SmallVec<[&LvnState<'a>; 4]> = preds
            .forward
            .iter()
            .filter_map(|&pred| self.end_states[pred].as_ref())
            .collect();
        if preds.irreducible || forward.is_empty() || forward.len() != preds.forward.len() {
            LvnState::unknown_in(arena, merge_version)
        } else if preds.back_edge {
            LvnState::loop_entry(arena, &forward, merge_version)
        } else {
            LvnState::merge(arena, &forward, merge_version)
        }
    }

    /// Numbers the instructions of `block`, reporting each outcome.
    fn number_block(
        &mut self,
        graph: &MirGraph,
        block: BasicBlockId,
        mut on_outcome: impl FnMut(MirId, Outcome),
    ) -> LvnState<'a> {
        let preds = self.classify_predecessors(graph, block);
        let state = self.entry_state(&preds, block);
        // Loop-carried inputs are not known yet.
        let fold_phis = !preds.back_edge && !preds.irreducible;
        let dominance = &self.dominance;

        let mut lvn = LocalValueNumbering::new(&mut self.shared, graph, block, state);
        for &mir_id in &graph.blocks[block].mirs {
            let outcome = if graph.mirs[mir_id].opcode == Opcode::Phi {
                lvn.process_phi(mir_id, |pred| dominance.is_reachable(pred), fold_phis)
            } else {
                lvn.process(mir_id)
            };
            on_outcome(mir_id, outcome);
        }
        lvn.into_state()
    }
}

/// The discovery phase: numbers blocks without modifying the graph.
pub struct DiscoveringGvn<'a> {
    core: GvnCore<'a>,
    discovered_flags: SecondaryMap<MirId, OptFlags>,
}

impl<'a> DiscoveringGvn<'a> {
    pub fn new(graph: &MirGraph, arena: &'a Bump) -> Self {
        Self {
            core: GvnCore::new(graph, arena),
            discovered_flags: SecondaryMap::new(),
        }
    }

    /// Blocks in processing order; unreachable blocks are absent.
    pub fn reverse_post_order(&self) -> &[BasicBlockId] {
        self.core.dominance.reverse_post_order()
    }

    /// Numbers `block`, returning whether its end state differs from
    /// the one recorded for it by an earlier pass.
    pub fn process_basic_block(&mut self, graph: &MirGraph, block: BasicBlockId) -> bool {
        let discovered = &mut self.discovered_flags;
        let end_state = self.core.number_block(graph, block, |mir, outcome| {
            discovered[mir] = outcome.flags;
        });
        let changed = self.core.end_states[block].as_ref() != Some(&end_state);
        self.core.end_states[block] = Some(end_state);
        changed
    }

    /// Runs discovery over all reachable blocks, each exactly once.
    ///
    /// Entry states depend only on forward predecessors, which come
    /// earlier in reverse postorder, so one pass reaches the fixpoint.
    pub fn run(&mut self, graph: &MirGraph) {
        let order = self.reverse_post_order().to_vec();
        for block in order {
            self.process_basic_block(graph, block);
            if !self.good() {
                break;
            }
        }
    }

    /// Value name assigned to `reg`, if it has been numbered.
    pub fn value_of(&self, graph: &MirGraph, reg: SsaReg) -> Option<ValueName> {
        self.core.value_of(graph, reg)
    }

    /// Whether the value-name space has not overflowed.
    pub fn good(&self) -> bool {
        self.core.shared.good()
    }

    /// Ends discovery. Fails if numbering overflowed, in which case
    /// the results must be discarded.
    pub fn finalize(self) -> Result<ModifiableGvn<'a>, GvnError> {
        let mut core = self.core;
        if !core.shared.good() {
            let allocated = core.shared.value_table.last_value();
            tracing::debug!(allocated, "value-name space exhausted, discarding numbering");
            return Err(GvnError::ValueNameOverflow { allocated });
        }
        core.shared.value_table.forbid_new_values();
        core.shared.stats.enable();
        // Rewrite recomputes every block's state from its predecessors.
        core.end_states.clear();
        Ok(ModifiableGvn {
            core,
            discovered_flags: self.discovered_flags,
        })
    }
}

/// The rewrite phase: numbers each block once more and records
/// redundant checks in the graph.
pub struct ModifiableGvn<'a> {
    core: GvnCore<'a>,
    discovered_flags: SecondaryMap<MirId, OptFlags>,
}

impl<'a> ModifiableGvn<'a> {
    pub fn reverse_post_order(&self) -> &[BasicBlockId] {
        self.core.dominance.reverse_post_order()
    }

    /// Always true; a `ModifiableGvn` only exists for good numberings.
    pub fn can_modify(&self) -> bool {
        self.core.shared.good()
    }

    /// Renumbers `block` and sets the flags of its redundant checks.
    /// Returns whether any instruction's flags changed.
    pub fn process_basic_block(&mut self, graph: &mut MirGraph, block: BasicBlockId) -> bool {
        let mut found = Vec::new();
        let end_state = self.core.number_block(graph, block, |mir, outcome| {
            found.push((mir, outcome.flags));
        });
        self.core.end_states[block] = Some(end_state);

        let mut changed = false;
        for (mir_id, flags) in found {
            debug_assert_eq!(
                flags, self.discovered_flags[mir_id],
                "rewrite found different redundant checks than discovery for {mir_id:?}"
            );
            let mir = &mut graph.mirs[mir_id];
            if !mir.optimization_flags.contains(flags) {
                mir.optimization_flags |= flags;
                changed = true;
            }
        }
        changed
    }

    pub fn value_of(&self, graph: &MirGraph, reg: SsaReg) -> Option<ValueName> {
        self.core.value_of(graph, reg)
    }

    /// Checks seen and eliminated so far by this phase.
    pub fn stats(&self) -> CheckStats {
        self.core.shared.stats.stats()
    }
}

/// Runs both phases of value numbering over `graph`.
///
/// On overflow the graph is left untouched and the error is returned;
/// callers should carry on without the optimization.
pub fn run_gvn(graph: &mut MirGraph, arena: &Bump) -> Result<CheckStats, GvnError> {
    let _span = tracing::debug_span!("gvn", graph = %graph.name).entered();

    let mut discovery = DiscoveringGvn::new(graph, arena);
    discovery.run(graph);
    let mut rewrite = discovery.finalize()?;

    if flags::gvn_rewrite_disabled() {
        tracing::debug!("rewrite disabled");
        return Ok(CheckStats::default());
    }

    let order = rewrite.reverse_post_order().to_vec();
    for block in order {
        rewrite.process_basic_block(graph, block);
    }
    let stats = rewrite.stats();
    tracing::debug!(
        null_checks = stats.null_checks,
        null_checks_eliminated = stats.null_checks_eliminated,
        range_checks = stats.range_checks,
        range_checks_eliminated = stats.range_checks_eliminated,
        redundant_stores = stats.redundant_stores,
        "gvn finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests;
