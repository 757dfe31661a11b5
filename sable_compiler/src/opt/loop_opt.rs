//! Loop optimization: deletion of loops with no observable work.
//!
//! A loop qualifies when its body is a single block computing nothing but
//! the induction update, and none of the header phis are consumed outside
//! the loop. The loop then collapses to a fall-through from preheader to
//! exit. Anything less regular is left alone; this pass prefers doing
//! nothing over doing surgery it cannot prove safe.

use super::induction::InductionAnalysisResult;
use super::{AnalysisCell, Pass};
use crate::ir::graph::{BlockId, Graph, LoopId};
use crate::ir::node::{InstId, InstKind};

pub struct LoopOptimization {
    induction: AnalysisCell<InductionAnalysisResult>,
    deleted: usize,
}

impl LoopOptimization {
    pub const NAME: &'static str = "loop_optimization";

    pub fn new(induction: AnalysisCell<InductionAnalysisResult>) -> Self {
        LoopOptimization { induction, deleted: 0 }
    }

    pub fn deleted(&self) -> usize {
        self.deleted
    }

    /// The loop's single in-loop successor of the header and its single
    /// exit block, for the shape header -> {body, exit}, body -> header.
    fn simple_shape(graph: &Graph, loop_id: LoopId) -> Option<(BlockId, BlockId)> {
        let info = graph.loop_info(loop_id);
        if info.blocks.len() != 2 || info.back_edges.len() != 1 {
            return None;
        }
        let header = info.header;
        let succs = &graph.block(header).succs;
        if succs.len() != 2 {
            return None;
        }
        let (body, exit) = if info.contains(succs[0]) && !info.contains(succs[1]) {
            (succs[0], succs[1])
        } else if info.contains(succs[1]) && !info.contains(succs[0]) {
            (succs[1], succs[0])
        } else {
            return None;
        };
        if graph.block(body).succs != vec![header] {
            return None;
        }
        Some((body, exit))
    }

    fn is_dead_loop(&self, graph: &Graph, loop_id: LoopId, body: BlockId) -> bool {
        let info = graph.loop_info(loop_id);
        let header = info.header;
        let in_loop = |id: InstId| {
            let b = graph.inst(id).block;
            b == header || b == body
        };

        // Header: phis, an optional suspend check, a condition and the
        // branch. Body: pure updates and the back-edge goto. Nothing may
        // throw, touch memory, or be observed outside the loop.
        for &block in &[header, body] {
            for &inst in &graph.block(block).insts {
                let node = graph.inst(inst);
                match node.kind {
                    InstKind::Phi { .. }
                    | InstKind::SuspendCheck
                    | InstKind::Goto
                    | InstKind::If
                    | InstKind::Condition(_)
                    | InstKind::IntConst(_) => {}
                    ref kind if kind.is_pure() => {}
                    _ => return false,
                }
                if node.uses().iter().any(|u| !in_loop(u.user)) {
                    return false;
                }
                // Values captured by environments outside the loop keep it
                // alive.
                if node.env_uses().iter().any(|&holder| !in_loop(holder)) {
                    return false;
                }
            }
        }
        // The loop must actually advance, otherwise deleting it changes
        // termination behavior.
        self.induction
            .with(|ind| !ind.loop_inductions(loop_id.0 as usize).is_empty())
            .unwrap_or(false)
    }

    fn delete_loop(&mut self, graph: &mut Graph, loop_id: LoopId, body: BlockId, exit: BlockId) {
        let header = graph.loop_info(loop_id).header;

        // Sever in-loop consumption so removal order does not matter.
        let doomed: Vec<InstId> = graph
            .block(header)
            .insts
            .iter()
            .chain(graph.block(body).insts.iter())
            .copied()
            .collect();
        for &inst in &doomed {
            graph.inst_mut(inst).uses.clear();
        }
        for &inst in &doomed {
            if !graph.inst(inst).is_removed() {
                graph.detach(inst);
                graph.remove_inst(inst);
            }
        }

        graph.disconnect(header, body);
        graph.disconnect(body, header);
        graph.disconnect(header, exit);
        let preds = graph.block(header).preds.clone();
        for pred in preds {
            graph.disconnect(pred, header);
            graph.connect(pred, exit);
        }
        graph.remove_block(body);
        graph.remove_block(header);
        graph.build_dominator_tree();
        self.deleted += 1;
        log::trace!("deleted empty loop headed by {header}");
    }
}

impl Pass for LoopOptimization {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        // Loop metadata is rebuilt after each deletion; restart the scan.
        'restart: loop {
            for index in 0..graph.loops().len() {
                let loop_id = LoopId(index as u32);
                let Some((body, exit)) = Self::simple_shape(graph, loop_id) else {
                    continue;
                };
                if !self.is_dead_loop(graph, loop_id, body) {
                    continue;
                }
                self.delete_loop(graph, loop_id, body, exit);
                changed = true;
                continue 'restart;
            }
            break;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::induction::tests::counting_loop;
    use crate::opt::induction::InductionVarAnalysis;

    #[test]
    fn test_empty_counting_loop_is_deleted() {
        let (mut g, _phi) = counting_loop();
        let cell = AnalysisCell::new();
        cell.publish(InductionVarAnalysis::compute(&g));
        let mut pass = LoopOptimization::new(cell);
        assert!(pass.run(&mut g));
        assert_eq!(pass.deleted(), 1);
        assert!(!g.has_loops());
    }

    #[test]
    fn test_loop_with_outside_use_is_kept() {
        use crate::ir::node::{InstKind, ValueType};
        use smallvec::smallvec;
        let (mut g, phi) = counting_loop();
        // Make the exit return the phi: the loop result is observable.
        let exit_ret = g
            .iter_insts()
            .find(|(_, i)| matches!(i.kind, InstKind::ReturnVoid))
            .map(|(id, _)| id)
            .expect("exit return");
        let exit_block = g.inst(exit_ret).block;
        g.inst_mut(exit_ret).uses.clear();
        g.remove_inst(exit_ret);
        let ret = g.add_inst(InstKind::Return, smallvec![phi], ValueType::Void, 0);
        g.append(exit_block, ret);

        let cell = AnalysisCell::new();
        cell.publish(InductionVarAnalysis::compute(&g));
        let mut pass = LoopOptimization::new(cell);
        assert!(!pass.run(&mut g));
        assert!(g.has_loops());
    }
}
