//! Reverse postorder and dominator tree over a `MirGraph`.

use crate::ir::{BasicBlockId, MirGraph};
use cranelift_entity::{EntitySet, SecondaryMap};

/// Block ordering and dominance facts for the blocks
/// reachable from the entry block.
#[derive(Debug, Clone)]
pub struct DominanceInfo {
    rpo: Vec<BasicBlockId>,
    /// Position of each reachable block in `rpo`.
    rpo_index: SecondaryMap<BasicBlockId, Option<u32>>,
    idom: SecondaryMap<BasicBlockId, Option<BasicBlockId>>,
}

impl DominanceInfo {
    pub fn compute(graph: &MirGraph) -> Self {
        let rpo = reverse_post_order(graph);
        let mut rpo_index = SecondaryMap::new();
        for (i, &block) in rpo.iter().enumerate() {
            rpo_index[block] = Some(i as u32);
        }

        let mut info = Self {
            rpo,
            rpo_index,
            idom: SecondaryMap::new(),
        };
        info.compute_idoms(graph);
        info
    }

    /// Iterative intersection over the reverse postorder
    /// (Cooper, Harvey and Kennedy).
    fn compute_idoms(&mut self, graph: &MirGraph) {
        let Some(&entry) = self.rpo.first() else {
            return;
        };
        // The entry block is its own dominator while iterating;
        // reset to `None` at the end.
        self.idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &self.rpo[1..] {
                let mut new_idom: Option<BasicBlockId> = None;
                for &pred in &graph.blocks[block].predecessors {
                    if self.idom[pred].is_none() {
                        // Unprocessed or unreachable.
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(pred, current),
                    });
                }
                if new_idom.is_some() && self.idom[block] != new_idom {
                    self.idom[block] = new_idom;
                    changed = true;
                }
            }
        }

        self.idom[entry] = None;
    }

    fn intersect(&self, mut a: BasicBlockId, mut b: BasicBlockId) -> BasicBlockId {
        let index = |block: BasicBlockId| self.rpo_index[block].unwrap_or(u32::MAX);
        while a != b {
            while index(a) > index(b) {
                a = self.idom_during_construction(a);
            }
            while index(b) > index(a) {
                b = self.idom_during_construction(b);
            }
        }
        a
    }

    fn idom_during_construction(&self, block: BasicBlockId) -> BasicBlockId {
        self.idom[block].unwrap_or(block)
    }

    /// Reachable blocks in reverse postorder; the entry block comes first.
    pub fn reverse_post_order(&self) -> &[BasicBlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: BasicBlockId) -> bool {
        self.rpo_index[block].is_some()
    }

    pub fn rpo_index(&self, block: BasicBlockId) -> Option<u32> {
        self.rpo_index[block]
    }

    pub fn idom(&self, block: BasicBlockId) -> Option<BasicBlockId> {
        self.idom[block]
    }

    /// Whether every path from the entry block to `b` passes through `a`.
    /// Every reachable block dominates itself.
    pub fn dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom[current] {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Copies the immediate dominators into the graph's blocks.
    pub fn store_immediate_dominators(&self, graph: &mut MirGraph) {
        for (block, data) in graph.blocks.iter_mut() {
            data.i_dom = self.idom[block];
        }
    }
}

fn reverse_post_order(graph: &MirGraph) -> Vec<BasicBlockId> {
    let mut post_order = Vec::with_capacity(graph.blocks.len());
    let mut visited = EntitySet::<BasicBlockId>::new();
    // (block, index of the next successor to visit)
    let mut stack = vec![(graph.entry_block, 0usize)];
    visited.insert(graph.entry_block);

    while let Some((block, next_succ)) = stack.last_mut() {
        let block = *block;
        let successors = &graph.blocks[block].successors;
        if let Some(&succ) = successors.get(*next_succ) {
            *next_succ += 1;
            if !visited.contains(succ) {
                visited.insert(succ);
                stack.push((succ, 0));
            }
        } else {
            post_order.push(block);
            stack.pop();
        }
    }

    post_order.reverse();
    post_order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::MirBuilder, ir::Opcode, ir::SsaReg};

    fn v(n: u32) -> SsaReg {
        SsaReg::from_u32(n)
    }

    /// entry -> header -> body -> header, header -> exit,
    /// plus an unreachable block.
    fn loop_graph() -> (MirGraph, [BasicBlockId; 5]) {
        let mut b = MirBuilder::new("loop");
        let entry = b.entry_block();
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        let dead = b.create_block();

        b.instr().goto(header);
        b.switch_to_block(header);
        b.instr().branch(Opcode::IfEqz, &[v(0)], exit, body);
        b.switch_to_block(body);
        b.instr().goto(header);
        b.switch_to_block(exit);
        b.instr().return_(Opcode::ReturnVoid, None);
        b.switch_to_block(dead);
        b.instr().goto(exit);

        (b.finish(), [entry, header, body, exit, dead])
    }

    #[test]
    fn rpo_visits_dominators_first() {
        let (graph, [entry, header, body, exit, dead]) = loop_graph();
        let info = DominanceInfo::compute(&graph);
        let rpo = info.reverse_post_order();

        assert_eq!(rpo[0], entry);
        assert_eq!(rpo[1], header);
        assert_eq!(rpo.len(), 4);
        assert!(rpo.contains(&body));
        assert!(rpo.contains(&exit));
        assert!(!info.is_reachable(dead));
    }

    #[test]
    fn immediate_dominators() {
        let (graph, [entry, header, body, exit, dead]) = loop_graph();
        let info = DominanceInfo::compute(&graph);

        assert_eq!(info.idom(entry), None);
        assert_eq!(info.idom(header), Some(entry));
        assert_eq!(info.idom(body), Some(header));
        assert_eq!(info.idom(exit), Some(header));
        assert_eq!(info.idom(dead), None);
        assert_eq!(graph.blocks[body].i_dom, Some(header));

        assert!(info.dominates(header, body));
        assert!(info.dominates(body, body));
        assert!(!info.dominates(body, exit));
        assert!(!info.dominates(dead, exit));
    }

    #[test]
    fn diamond_join_is_dominated_by_entry() {
        let mut b = MirBuilder::new("diamond");
        let entry = b.entry_block();
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        b.instr().branch(Opcode::IfEqz, &[v(0)], left, right);
        b.switch_to_block(left);
        b.instr().goto(join);
        b.switch_to_block(right);
        b.instr().goto(join);
        b.switch_to_block(join);
        b.instr().return_(Opcode::ReturnVoid, None);
        let graph = b.finish();

        let info = DominanceInfo::compute(&graph);
        assert_eq!(info.idom(join), Some(entry));
        assert!(!info.dominates(left, join));
        assert_eq!(*info.reverse_post_order().last().unwrap(), join);
    }
}
