//! Global value numbering.
//!
//! Dominator-scoped: each block starts from the value set of its immediate
//! dominator. Pure computations are numbered by (kind, inputs); resolved
//! non-volatile loads are numbered by location and killed whenever an
//! instruction's writes may reach what they read. At control-flow merges
//! and loop headers the inherited loads are dropped against the blocks (or
//! the whole loop) that may have written in between.

use super::side_effects_analysis::SideEffectSummary;
use super::{AnalysisCell, Pass};
use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::{InstId, InstKind};
use crate::ir::side_effects::SideEffects;
use rustc_hash::FxHashMap;

/// Numbering key: operation plus operand identities.
#[derive(Clone, PartialEq, Eq, Hash)]
struct ValueKey {
    kind: InstKind,
    inputs: Vec<u32>,
}

impl ValueKey {
    fn of(graph: &Graph, id: InstId) -> ValueKey {
        let inst = graph.inst(id);
        ValueKey {
            kind: inst.kind,
            inputs: inst.inputs.iter().map(|i| i.0).collect(),
        }
    }
}

pub struct Gvn {
    side_effects: AnalysisCell<SideEffectSummary>,
    deduplicated: usize,
}

impl Gvn {
    pub const NAME: &'static str = "gvn";

    pub fn new(side_effects: AnalysisCell<SideEffectSummary>) -> Self {
        Gvn { side_effects, deduplicated: 0 }
    }

    pub fn deduplicated(&self) -> usize {
        self.deduplicated
    }

    /// Loads eligible for numbering: resolved, non-volatile.
    fn is_numberable_load(inst: &crate::ir::node::Inst) -> bool {
        match inst.kind {
            InstKind::FieldGet(f) => f.offset.is_some() && !f.is_volatile,
            InstKind::ArrayGet => true,
            _ => false,
        }
    }

    fn is_numberable(inst: &crate::ir::node::Inst) -> bool {
        inst.kind.is_pure() || Self::is_numberable_load(inst)
    }
}

impl Pass for Gvn {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        let order: Vec<BlockId> = graph.reverse_post_order().to_vec();
        let mut sets: FxHashMap<BlockId, FxHashMap<ValueKey, InstId>> = FxHashMap::default();

        for block in order {
            let mut set = match graph.block(block).dominator {
                Some(idom) => sets.get(&idom).cloned().unwrap_or_default(),
                None => FxHashMap::default(),
            };

            // Drop inherited loads that paths between the dominator and
            // this block, or a surrounding loop iteration, may have
            // clobbered.
            let kill: SideEffects = if let Some(loop_id) = graph.block(block).loop_id {
                if graph.loop_info(loop_id).header == block {
                    self.side_effects
                        .with(|se| se.loop_effects(loop_id.0 as usize))
                        .unwrap_or_else(SideEffects::all_reads_and_writes)
                } else if graph.block(block).preds.len() > 1 {
                    SideEffects::all_reads_and_writes()
                } else {
                    SideEffects::empty()
                }
            } else if graph.block(block).preds.len() > 1 {
                SideEffects::all_reads_and_writes()
            } else {
                SideEffects::empty()
            };
            if kill.does_any_write() {
                set.retain(|key, _| {
                    let load_effects = key.kind.side_effects();
                    !load_effects.may_depend_on(kill)
                });
            }

            for id in graph.block(block).insts.clone() {
                if graph.inst(id).is_removed() {
                    continue;
                }

                let write_effects = graph.inst(id).side_effects();
                if write_effects.does_any_write() {
                    set.retain(|key, _| !key.kind.side_effects().may_depend_on(write_effects));
                }

                if !Self::is_numberable(graph.inst(id)) {
                    continue;
                }
                let key = ValueKey::of(graph, id);
                match set.get(&key) {
                    Some(&canonical) if canonical != id => {
                        graph.replace_uses(id, canonical);
                        graph.remove_inst(id);
                        self.deduplicated += 1;
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        set.insert(key, id);
                    }
                }
            }

            sets.insert(block, set);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::ValueType;
    use crate::opt::side_effects_analysis::SideEffectsAnalysis;
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    fn run_gvn(graph: &mut Graph) -> (bool, usize) {
        let cell = AnalysisCell::new();
        cell.publish(SideEffectsAnalysis::compute(graph));
        let mut gvn = Gvn::new(cell);
        let changed = gvn.run(graph);
        (changed, gvn.deduplicated())
    }

    #[test]
    fn test_redundant_add_is_deduplicated() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let p0 = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Int, 0);
        let p1 = g.add_inst(InstKind::Param(1), smallvec![], ValueType::Int, 0);
        let sum1 = g.add_inst(InstKind::Add, smallvec![p0, p1], ValueType::Int, 0);
        let sum2 = g.add_inst(InstKind::Add, smallvec![p0, p1], ValueType::Int, 0);
        let product = g.add_inst(InstKind::Mul, smallvec![sum1, sum2], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![product], ValueType::Void, 0);
        for i in [p0, p1, sum1, sum2, product, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let (changed, dedup) = run_gvn(&mut g);
        assert!(changed);
        assert_eq!(dedup, 1);
        assert_eq!(g.inst(product).inputs[0], g.inst(product).inputs[1]);
    }

    #[test]
    fn test_load_not_reused_across_clobbering_store() {
        use crate::ir::node::FieldAccess;
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let access = FieldAccess {
            field_index: 1,
            offset: Some(8),
            is_volatile: false,
            is_static: false,
        };
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let load1 = g.add_inst(InstKind::FieldGet(access), smallvec![obj], ValueType::Int, 0);
        let store =
            g.add_inst(InstKind::FieldSet(access), smallvec![obj, load1], ValueType::Void, 0);
        let load2 = g.add_inst(InstKind::FieldGet(access), smallvec![obj], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![load2], ValueType::Void, 0);
        for i in [obj, load1, store, load2, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let (_, dedup) = run_gvn(&mut g);
        assert_eq!(dedup, 0, "store must kill the load's value number");
        assert!(!g.inst(load2).is_removed());
    }

    #[test]
    fn test_load_reused_without_intervening_store() {
        use crate::ir::node::FieldAccess;
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let access = FieldAccess {
            field_index: 1,
            offset: Some(8),
            is_volatile: false,
            is_static: false,
        };
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let load1 = g.add_inst(InstKind::FieldGet(access), smallvec![obj], ValueType::Int, 0);
        let load2 = g.add_inst(InstKind::FieldGet(access), smallvec![obj], ValueType::Int, 0);
        let sum = g.add_inst(InstKind::Add, smallvec![load1, load2], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![sum], ValueType::Void, 0);
        for i in [obj, load1, load2, sum, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let (changed, dedup) = run_gvn(&mut g);
        assert!(changed);
        assert_eq!(dedup, 1);
        assert_eq!(g.inst(sum).inputs[1], load1);
    }
}
