//! Constructor-fence redundancy elimination.
//!
//! Two fences over the same object with no publication between them are
//! one fence too many: the later fence already orders every write the
//! earlier one would. Runs after code sinking so fences are not split
//! apart again.

use super::Pass;
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind};
use rustc_hash::FxHashMap;

pub struct ConstructorFenceElimination {
    removed: usize,
}

impl ConstructorFenceElimination {
    pub const NAME: &'static str = "constructor_fence_elimination";

    pub fn new() -> Self {
        ConstructorFenceElimination { removed: 0 }
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    /// An instruction that may let another thread observe the object:
    /// a call, a monitor operation, or any reference store.
    fn publishes(graph: &Graph, id: InstId) -> bool {
        let inst = graph.inst(id);
        match inst.kind {
            InstKind::Invoke(_) | InstKind::MonitorOp { .. } | InstKind::Throw => true,
            InstKind::FieldSet(_) | InstKind::ArraySet => true,
            _ => inst.is_control_flow(),
        }
    }
}

impl Default for ConstructorFenceElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for ConstructorFenceElimination {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        let order = graph.reverse_post_order().to_vec();
        for block in order {
            // Pending fence per fenced object since the last publication.
            let mut pending: FxHashMap<InstId, InstId> = FxHashMap::default();
            for id in graph.block(block).insts.clone() {
                if graph.inst(id).is_removed() {
                    continue;
                }
                if let InstKind::ConstructorFence = graph.inst(id).kind {
                    let object = graph.inst(id).inputs[0];
                    if let Some(&previous) = pending.get(&object) {
                        graph.inst_mut(previous).uses.clear();
                        graph.remove_inst(previous);
                        self.removed += 1;
                        changed = true;
                    }
                    pending.insert(object, id);
                } else if Self::publishes(graph, id) {
                    pending.clear();
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::ValueType;
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    fn new_object(g: &mut Graph, b: crate::ir::graph::BlockId) -> (InstId, InstId) {
        let object =
            g.add_inst(InstKind::NewInstance { type_index: 1 }, smallvec![], ValueType::Ref, 0);
        g.append(b, object);
        let fence =
            g.add_inst(InstKind::ConstructorFence, smallvec![object], ValueType::Void, 0);
        g.append(b, fence);
        (object, fence)
    }

    #[test]
    fn test_adjacent_fences_merge() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let (object, fence1) = new_object(&mut g, b);
        let fence2 =
            g.add_inst(InstKind::ConstructorFence, smallvec![object], ValueType::Void, 0);
        g.append(b, fence2);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        g.append(b, ret);
        g.build_dominator_tree();

        let mut pass = ConstructorFenceElimination::new();
        assert!(pass.run(&mut g));
        assert!(g.inst(fence1).is_removed());
        assert!(!g.inst(fence2).is_removed());
    }

    #[test]
    fn test_publication_keeps_both_fences() {
        use crate::ir::node::FieldAccess;
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let (object, fence1) = new_object(&mut g, b);
        // Store the object somewhere another thread can see it.
        let target = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        g.append(b, target);
        let publish = g.add_inst(
            InstKind::FieldSet(FieldAccess {
                field_index: 0,
                offset: Some(8),
                is_volatile: false,
                is_static: false,
            }),
            smallvec![target, object],
            ValueType::Void,
            0,
        );
        g.append(b, publish);
        let fence2 =
            g.add_inst(InstKind::ConstructorFence, smallvec![object], ValueType::Void, 0);
        g.append(b, fence2);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        g.append(b, ret);
        g.build_dominator_tree();

        assert!(!ConstructorFenceElimination::new().run(&mut g));
        assert!(!g.inst(fence1).is_removed());
        assert!(!g.inst(fence2).is_removed());
    }
}
