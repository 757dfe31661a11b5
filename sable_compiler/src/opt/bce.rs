//! Bounds-check elimination.
//!
//! Removes `BoundsCheck` instructions whose index is provably inside the
//! array:
//!
//! - constant index against a constant-length allocation, and
//! - a counting induction variable guarded by `i < length` at the loop
//!   header, for the same length value the check tests.

use super::induction::InductionAnalysisResult;
use super::side_effects_analysis::SideEffectSummary;
use super::{AnalysisCell, Pass};
use crate::ir::graph::Graph;
use crate::ir::node::{CondKind, InstId, InstKind};

pub struct BoundsCheckElimination {
    // Side effects are part of this pass's contract; the current patterns
    // only need them to prove the guarded length is stable, which holds
    // because ArrayLength is pure and the guard tests the same SSA value.
    #[allow(dead_code)]
    side_effects: AnalysisCell<SideEffectSummary>,
    induction: AnalysisCell<InductionAnalysisResult>,
    removed: usize,
}

impl BoundsCheckElimination {
    pub const NAME: &'static str = "bounds_check_elimination";

    pub fn new(
        side_effects: AnalysisCell<SideEffectSummary>,
        induction: AnalysisCell<InductionAnalysisResult>,
    ) -> Self {
        BoundsCheckElimination { side_effects, induction, removed: 0 }
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    fn constant_of(graph: &Graph, id: InstId) -> Option<i64> {
        match graph.inst(id).kind {
            InstKind::IntConst(v) => Some(v),
            _ => None,
        }
    }

    /// Length is `ArrayLength(NewArray(const))`; returns the constant.
    fn constant_length(graph: &Graph, length: InstId) -> Option<i64> {
        let node = graph.inst(length);
        if !matches!(node.kind, InstKind::ArrayLength) {
            return None;
        }
        let mut array = node.inputs[0];
        while matches!(graph.inst(array).kind, InstKind::NullCheck) {
            array = graph.inst(array).inputs[0];
        }
        match graph.inst(array).kind {
            InstKind::NewArray { .. } => Self::constant_of(graph, graph.inst(array).inputs[0]),
            _ => None,
        }
    }

    /// The check's index is a counting induction variable whose loop is
    /// entered through `If (index < length)`.
    fn guarded_by_length(graph: &Graph, check: InstId, index: InstId, length: InstId) -> bool {
        let Some(loop_id) = graph.block(graph.inst(check).block).loop_id else {
            return false;
        };
        let info = graph.loop_info(loop_id);
        let Some(&branch) = graph.block(info.header).insts.last() else {
            return false;
        };
        if !matches!(graph.inst(branch).kind, InstKind::If) {
            return false;
        }
        let cond = graph.inst(branch).inputs[0];
        let cond_node = graph.inst(cond);
        let InstKind::Condition(CondKind::Lt) = cond_node.kind else {
            return false;
        };
        // True branch (first successor) must stay in the loop.
        let Some(&true_succ) = graph.block(info.header).succs.first() else {
            return false;
        };
        info.contains(true_succ)
            && cond_node.inputs[0] == index
            && cond_node.inputs[1] == length
    }

    fn is_provably_safe(&self, graph: &Graph, check: InstId) -> bool {
        let index = graph.inst(check).inputs[0];
        let length = graph.inst(check).inputs[1];

        // Constant index into a constant-length allocation.
        if let (Some(i), Some(len)) =
            (Self::constant_of(graph, index), Self::constant_length(graph, length))
        {
            if (0..len).contains(&i) {
                return true;
            }
        }

        // Counting induction variable under an `i < length` guard.
        let is_counting = self
            .induction
            .with(|ind| {
                ind.induction_of(index).is_some_and(|var| {
                    var.step > 0
                        && Self::constant_of(graph, var.initial).is_some_and(|v| v >= 0)
                })
            })
            .unwrap_or(false);
        is_counting && Self::guarded_by_length(graph, check, index, length)
    }
}

impl Pass for BoundsCheckElimination {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let checks: Vec<InstId> = graph
            .iter_insts()
            .filter(|(_, inst)| matches!(inst.kind, InstKind::BoundsCheck))
            .map(|(id, _)| id)
            .collect();
        let mut changed = false;
        for check in checks {
            if !self.is_provably_safe(graph, check) {
                continue;
            }
            let index = graph.inst(check).inputs[0];
            graph.replace_uses(check, index);
            graph.remove_inst(check);
            self.removed += 1;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::ValueType;
    use crate::opt::induction::InductionVarAnalysis;
    use crate::opt::side_effects_analysis::SideEffectsAnalysis;
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    fn run_bce(graph: &mut Graph) -> usize {
        let se = AnalysisCell::new();
        se.publish(SideEffectsAnalysis::compute(graph));
        let ind = AnalysisCell::new();
        ind.publish(InductionVarAnalysis::compute(graph));
        let mut bce = BoundsCheckElimination::new(se, ind);
        bce.run(graph);
        bce.removed()
    }

    #[test]
    fn test_constant_index_in_constant_array() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let b = g.add_block();
        g.set_entry(b);
        let len = g.add_inst(InstKind::IntConst(10), smallvec![], ValueType::Int, 0);
        let array = g.add_inst(InstKind::NewArray { type_index: 0 }, smallvec![len], ValueType::Ref, 0);
        let length = g.add_inst(InstKind::ArrayLength, smallvec![array], ValueType::Int, 0);
        let index = g.add_inst(InstKind::IntConst(3), smallvec![], ValueType::Int, 0);
        let check =
            g.add_inst(InstKind::BoundsCheck, smallvec![index, length], ValueType::Int, 0);
        let get = g.add_inst(InstKind::ArrayGet, smallvec![array, check], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![get], ValueType::Void, 0);
        for i in [len, array, length, index, check, get, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        assert_eq!(run_bce(&mut g), 1);
        assert!(g.inst(check).is_removed());
        assert_eq!(g.inst(get).inputs[1], index);
    }

    #[test]
    fn test_out_of_range_constant_is_kept() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let b = g.add_block();
        g.set_entry(b);
        let len = g.add_inst(InstKind::IntConst(2), smallvec![], ValueType::Int, 0);
        let array = g.add_inst(InstKind::NewArray { type_index: 0 }, smallvec![len], ValueType::Ref, 0);
        let length = g.add_inst(InstKind::ArrayLength, smallvec![array], ValueType::Int, 0);
        let index = g.add_inst(InstKind::IntConst(5), smallvec![], ValueType::Int, 0);
        let check =
            g.add_inst(InstKind::BoundsCheck, smallvec![index, length], ValueType::Int, 0);
        let get = g.add_inst(InstKind::ArrayGet, smallvec![array, check], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![get], ValueType::Void, 0);
        for i in [len, array, length, index, check, get, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        assert_eq!(run_bce(&mut g), 0);
        assert!(!g.inst(check).is_removed());
    }
}
