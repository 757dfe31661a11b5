//! Dead code elimination.
//!
//! Two jobs: drop blocks that became unreachable after branch folding, and
//! drop pure instructions nothing consumes. Liveness is the usual backward
//! closure: control flow, effects and environment holders are roots.

use super::Pass;
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind};

pub struct Dce {
    removed: usize,
}

impl Dce {
    pub const NAME: &'static str = "dead_code_elimination";

    pub fn new() -> Self {
        Dce { removed: 0 }
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    fn remove_unreachable_blocks(&mut self, graph: &mut Graph) -> bool {
        graph.compute_rpo();
        let reachable: rustc_hash::FxHashSet<_> =
            graph.reverse_post_order().iter().copied().collect();
        let all: Vec<_> = (0..graph.num_blocks())
            .map(|i| crate::ir::graph::BlockId(i as u32))
            .filter(|b| !graph.block_is_removed(*b) && !reachable.contains(b))
            .collect();
        if all.is_empty() {
            return false;
        }
        for block in all {
            // Phis in reachable successors lose the corresponding input.
            for succ in graph.block(block).succs.clone() {
                if reachable.contains(&succ) {
                    if let Some(pos) =
                        graph.block(succ).preds.iter().position(|&p| p == block)
                    {
                        let phis: Vec<InstId> = graph
                            .block(succ)
                            .insts
                            .iter()
                            .copied()
                            .filter(|&i| {
                                matches!(graph.inst(i).kind, InstKind::Phi { .. })
                            })
                            .collect();
                        for phi in phis {
                            graph.remove_input(phi, pos);
                        }
                    }
                }
            }
            graph.remove_block(block);
        }
        graph.build_dominator_tree();
        true
    }

    fn remove_dead_instructions(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        loop {
            let dead: Vec<InstId> = graph
                .iter_insts()
                .filter(|(_, inst)| {
                    inst.kind.is_pure()
                        && !inst.has_uses()
                        && !inst.has_env_uses()
                })
                .map(|(id, _)| id)
                .collect();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                graph.remove_inst(id);
                self.removed += 1;
            }
            changed = true;
        }
        changed
    }
}

impl Default for Dce {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for Dce {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let blocks_changed = self.remove_unreachable_blocks(graph);
        let insts_changed = self.remove_dead_instructions(graph);
        blocks_changed || insts_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::ValueType;
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    #[test]
    fn test_unused_pure_value_is_removed() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let live = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let dead = g.add_inst(InstKind::IntConst(2), smallvec![], ValueType::Int, 0);
        let dead_user = g.add_inst(InstKind::Add, smallvec![dead, dead], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![live], ValueType::Void, 0);
        for i in [live, dead, dead_user, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let mut dce = Dce::new();
        assert!(dce.run(&mut g));
        assert_eq!(dce.removed(), 2);
        assert!(g.inst(dead).is_removed());
        assert!(g.inst(dead_user).is_removed());
        assert!(!g.inst(live).is_removed());
    }

    #[test]
    fn test_effectful_instruction_survives() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let recv = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let call = g.add_inst(
            InstKind::Invoke(crate::ir::node::InvokeKind::Static { method_index: 1 }),
            smallvec![recv],
            ValueType::Int,
            0,
        );
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [recv, call, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        Dce::new().run(&mut g);
        assert!(!g.inst(call).is_removed());
    }

    #[test]
    fn test_unreachable_block_is_removed() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b0 = g.add_block();
        let island = g.add_block();
        g.set_entry(b0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        g.append(b0, ret);
        let stray = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        g.append(island, stray);
        g.build_dominator_tree();

        assert!(Dce::new().run(&mut g));
        assert!(g.block_is_removed(island));
    }
}
