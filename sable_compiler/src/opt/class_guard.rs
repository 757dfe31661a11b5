//! Redundant class-guard elimination.
//!
//! A `ClassGuard` devirtualization check dominated by an identical guard
//! on the same receiver can never fire; remove it. Guards only ever
//! deoptimize, so removal needs no use rewriting.

use super::Pass;
use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::{InstId, InstKind};
use rustc_hash::{FxHashMap, FxHashSet};

pub struct ClassGuardElimination {
    removed: usize,
}

impl ClassGuardElimination {
    pub const NAME: &'static str = "class_guard_elimination";

    pub fn new() -> Self {
        ClassGuardElimination { removed: 0 }
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    fn receiver(graph: &Graph, guard: InstId) -> InstId {
        let mut base = graph.inst(guard).inputs[0];
        while matches!(graph.inst(base).kind, InstKind::NullCheck) {
            base = graph.inst(base).inputs[0];
        }
        base
    }
}

impl Default for ClassGuardElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for ClassGuardElimination {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        let order = graph.reverse_post_order().to_vec();
        let mut seen: FxHashMap<BlockId, FxHashSet<(InstId, u16)>> = FxHashMap::default();

        for block in order {
            let mut set = match graph.block(block).dominator {
                Some(idom) => seen.get(&idom).cloned().unwrap_or_default(),
                None => FxHashSet::default(),
            };
            for id in graph.block(block).insts.clone() {
                let InstKind::ClassGuard { type_index } = graph.inst(id).kind else {
                    continue;
                };
                let key = (Self::receiver(graph, id), type_index);
                if set.contains(&key) {
                    graph.inst_mut(id).uses.clear();
                    graph.remove_inst(id);
                    self.removed += 1;
                    changed = true;
                } else {
                    set.insert(key);
                }
            }
            seen.insert(block, set);
        }
        changed
    }
}
