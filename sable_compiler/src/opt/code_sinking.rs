//! Code sinking.
//!
//! Moves a pure computation with exactly one consumer into the consumer's
//! block when that block is strictly dominated by the current one and not
//! in a deeper loop. Shrinks live ranges ahead of register allocation.

use super::Pass;
use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::{InstId, InstKind};

pub struct CodeSinking {
    sunk: usize,
}

impl CodeSinking {
    pub const NAME: &'static str = "code_sinking";

    pub fn new() -> Self {
        CodeSinking { sunk: 0 }
    }

    pub fn sunk(&self) -> usize {
        self.sunk
    }

    fn loop_depth(graph: &Graph, block: BlockId) -> usize {
        graph
            .loops()
            .iter()
            .filter(|info| info.contains(block))
            .count()
    }

    fn can_sink(graph: &Graph, id: InstId) -> Option<InstId> {
        let inst = graph.inst(id);
        if !inst.kind.is_pure() || matches!(inst.kind, InstKind::IntConst(_)) {
            return None;
        }
        if !inst.has_only_one_use() {
            return None;
        }
        let user = inst.uses()[0].user;
        // A phi consumes the value on the predecessor edge, not in its own
        // block; sinking there would break dominance.
        if matches!(graph.inst(user).kind, InstKind::Phi { .. }) {
            return None;
        }
        let from = inst.block;
        let to = graph.inst(user).block;
        if from == to || !graph.dominates(from, to) {
            return None;
        }
        if Self::loop_depth(graph, to) > Self::loop_depth(graph, from) {
            return None;
        }
        Some(user)
    }
}

impl Default for CodeSinking {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for CodeSinking {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        // Post order so a sunk chain cascades within one run.
        let order: Vec<BlockId> = graph.reverse_post_order().iter().rev().copied().collect();
        for block in order {
            let insts: Vec<InstId> = graph.block(block).insts.clone();
            for id in insts.into_iter().rev() {
                if graph.inst(id).is_removed() {
                    continue;
                }
                let Some(user) = Self::can_sink(graph, id) else {
                    continue;
                };
                graph.detach(id);
                graph.insert_before(user, id);
                self.sunk += 1;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{CondKind, ValueType};
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    /// `x * y` computed up front but only consumed on one branch arm.
    #[test]
    fn test_single_use_value_sinks_to_its_branch() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let b0 = g.add_block();
        let then_block = g.add_block();
        let else_block = g.add_block();
        g.set_entry(b0);
        g.connect(b0, then_block);
        g.connect(b0, else_block);

        let x = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Int, 0);
        let y = g.add_inst(InstKind::Param(1), smallvec![], ValueType::Int, 0);
        let product = g.add_inst(InstKind::Mul, smallvec![x, y], ValueType::Int, 0);
        let cond =
            g.add_inst(InstKind::Condition(CondKind::Eq), smallvec![x, y], ValueType::Int, 0);
        let branch = g.add_inst(InstKind::If, smallvec![cond], ValueType::Void, 0);
        for i in [x, y, product, cond, branch] {
            g.append(b0, i);
        }

        let ret_then = g.add_inst(InstKind::Return, smallvec![product], ValueType::Void, 0);
        g.append(then_block, ret_then);
        let ret_else = g.add_inst(InstKind::Return, smallvec![x], ValueType::Void, 0);
        g.append(else_block, ret_else);
        g.build_dominator_tree();

        let mut pass = CodeSinking::new();
        assert!(pass.run(&mut g));
        assert_eq!(pass.sunk(), 1);
        assert_eq!(g.inst(product).block, then_block);
        let position_ok = g.block(then_block).insts == vec![product, ret_then];
        assert!(position_ok);
    }

    #[test]
    fn test_multi_use_value_stays() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let b0 = g.add_block();
        let b1 = g.add_block();
        g.set_entry(b0);
        g.connect(b0, b1);

        let x = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Int, 0);
        let double = g.add_inst(InstKind::Add, smallvec![x, x], ValueType::Int, 0);
        let quad = g.add_inst(InstKind::Add, smallvec![double, double], ValueType::Int, 0);
        let goto = g.add_inst(InstKind::Goto, smallvec![], ValueType::Void, 0);
        for i in [x, double, quad, goto] {
            g.append(b0, i);
        }
        let ret = g.add_inst(InstKind::Return, smallvec![quad], ValueType::Void, 0);
        g.append(b1, ret);
        g.build_dominator_tree();

        let mut pass = CodeSinking::new();
        pass.run(&mut g);
        assert_eq!(g.inst(double).block, b0, "two uses, must not sink");
        assert_eq!(g.inst(quad).block, b1, "single use may sink");
    }
}
