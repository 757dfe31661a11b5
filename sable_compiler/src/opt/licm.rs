//! Loop-invariant code motion.
//!
//! Hoists instructions whose operands are defined outside the loop into
//! the preheader. Pure computations hoist unconditionally; resolved
//! non-volatile loads hoist only when the loop writes nothing they read.
//! Anything that can throw stays put, so no deopt environment needs to be
//! rebuilt.

use super::side_effects_analysis::SideEffectSummary;
use super::{AnalysisCell, Pass};
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind};

pub struct Licm {
    side_effects: AnalysisCell<SideEffectSummary>,
    hoisted: usize,
}

impl Licm {
    pub const NAME: &'static str = "licm";

    pub fn new(side_effects: AnalysisCell<SideEffectSummary>) -> Self {
        Licm { side_effects, hoisted: 0 }
    }

    pub fn hoisted(&self) -> usize {
        self.hoisted
    }
}

impl Pass for Licm {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        for loop_index in 0..graph.loops().len() {
            let loop_id = crate::ir::graph::LoopId(loop_index as u32);
            let Some(preheader) = graph.loop_preheader(loop_id) else {
                continue;
            };
            let loop_effects = self
                .side_effects
                .with(|se| se.loop_effects(loop_index))
                .unwrap_or_else(crate::ir::side_effects::SideEffects::all_reads_and_writes);

            // Walk loop blocks in RPO so operand hoisting cascades within
            // one run.
            let blocks: Vec<_> = graph
                .reverse_post_order()
                .iter()
                .copied()
                .filter(|b| graph.loop_info(loop_id).contains(*b))
                .collect();
            for block in blocks {
                for id in graph.block(block).insts.clone() {
                    if graph.inst(id).is_removed() {
                        continue;
                    }
                    if !self.is_hoistable(graph, id, loop_id, loop_effects) {
                        continue;
                    }
                    graph.move_before_terminator(id, preheader);
                    self.hoisted += 1;
                    changed = true;
                }
            }
        }
        changed
    }
}

impl Licm {
    fn is_hoistable(
        &self,
        graph: &Graph,
        id: InstId,
        loop_id: crate::ir::graph::LoopId,
        loop_effects: crate::ir::side_effects::SideEffects,
    ) -> bool {
        let inst = graph.inst(id);
        if inst.can_throw() || inst.env.is_some() {
            return false;
        }
        let movable = match inst.kind {
            InstKind::Phi { .. }
            | InstKind::Param(_)
            | InstKind::SuspendCheck
            | InstKind::IntConst(_) => false,
            InstKind::FieldGet(f) => {
                f.offset.is_some()
                    && !f.is_volatile
                    && !inst.side_effects().may_depend_on(loop_effects)
            }
            InstKind::ArrayGet => !inst.side_effects().may_depend_on(loop_effects),
            ref kind => kind.is_pure(),
        };
        if !movable {
            return false;
        }
        // Every operand must come from outside the loop.
        inst.inputs.iter().all(|&input| {
            let block = graph.inst(input).block;
            !graph.loop_info(loop_id).contains(block)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::ValueType;
    use crate::opt::side_effects_analysis::SideEffectsAnalysis;
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    /// preheader(B1) -> header(B2) <-> body(B3), header -> exit(B4). The
    /// body computes `p0 * p1` from loop-invariant operands.
    #[test]
    fn test_invariant_multiply_is_hoisted() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let pre = g.add_block();
        let header = g.add_block();
        let body = g.add_block();
        let exit = g.add_block();
        g.set_entry(pre);
        g.connect(pre, header);
        g.connect(header, body);
        g.connect(body, header);
        g.connect(header, exit);

        let p0 = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Int, 0);
        let p1 = g.add_inst(InstKind::Param(1), smallvec![], ValueType::Int, 0);
        let goto_pre = g.add_inst(InstKind::Goto, smallvec![], ValueType::Void, 0);
        for i in [p0, p1, goto_pre] {
            g.append(pre, i);
        }

        let cond = g.add_inst(
            InstKind::Condition(crate::ir::node::CondKind::Ne),
            smallvec![p0, p1],
            ValueType::Int,
            0,
        );
        let branch = g.add_inst(InstKind::If, smallvec![cond], ValueType::Void, 0);
        g.append(header, cond);
        g.append(header, branch);

        let product = g.add_inst(InstKind::Mul, smallvec![p0, p1], ValueType::Int, 0);
        let back = g.add_inst(InstKind::Goto, smallvec![], ValueType::Void, 0);
        g.append(body, product);
        g.append(body, back);

        let ret = g.add_inst(InstKind::Return, smallvec![product], ValueType::Void, 0);
        g.append(exit, ret);

        g.build_dominator_tree();
        assert!(g.has_loops());

        let cell = AnalysisCell::new();
        cell.publish(SideEffectsAnalysis::compute(&g));
        let mut licm = Licm::new(cell);
        assert!(licm.run(&mut g));
        assert_eq!(licm.hoisted(), 1);
        assert_eq!(g.inst(product).block, pre);
    }

    /// A load from a field the loop also stores must stay in the loop.
    #[test]
    fn test_clobbered_load_is_not_hoisted() {
        use crate::ir::node::FieldAccess;
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let pre = g.add_block();
        let header = g.add_block();
        let body = g.add_block();
        let exit = g.add_block();
        g.set_entry(pre);
        g.connect(pre, header);
        g.connect(header, body);
        g.connect(body, header);
        g.connect(header, exit);

        let access = FieldAccess {
            field_index: 3,
            offset: Some(16),
            is_volatile: false,
            is_static: false,
        };
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let goto_pre = g.add_inst(InstKind::Goto, smallvec![], ValueType::Void, 0);
        g.append(pre, obj);
        g.append(pre, goto_pre);

        let load = g.add_inst(InstKind::FieldGet(access), smallvec![obj], ValueType::Int, 0);
        let cond = g.add_inst(
            InstKind::Condition(crate::ir::node::CondKind::Ne),
            smallvec![load, load],
            ValueType::Int,
            0,
        );
        let branch = g.add_inst(InstKind::If, smallvec![cond], ValueType::Void, 0);
        for i in [load, cond, branch] {
            g.append(header, i);
        }

        let store = g.add_inst(
            InstKind::FieldSet(access),
            smallvec![obj, load],
            ValueType::Void,
            0,
        );
        let back = g.add_inst(InstKind::Goto, smallvec![], ValueType::Void, 0);
        g.append(body, store);
        g.append(body, back);

        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        g.append(exit, ret);

        g.build_dominator_tree();
        let cell = AnalysisCell::new();
        cell.publish(SideEffectsAnalysis::compute(&g));
        let mut licm = Licm::new(cell);
        licm.run(&mut g);
        assert_eq!(g.inst(load).block, header, "load must not leave the loop");
    }
}
