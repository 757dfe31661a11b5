//! Critical-path list scheduling inside basic blocks.
//!
//! Each schedulable block gets a scheduling graph built in reverse
//! instruction order: data edges from def-use, ordering-only edges for
//! barriers, side effects, exceptions and environments. Selection then
//! repeatedly pops the ready node closest to the block exit, so the final
//! program order front-loads long dependency chains.
//!
//! Blocks inside try/catch regions are never touched: a handler may
//! observe the order of writes and implicit throws. Blocks containing any
//! instruction outside the schedulable allow-list are skipped wholesale.

pub mod latency;

use crate::config::InstructionSet;
use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::{Inst, InstId, InstKind};
use crate::opt::lsa::{HeapLocations, LoadStoreAnalysis};
use latency::latency_of;
use rustc_hash::FxHashMap;

// =============================================================================
// Scheduling graph
// =============================================================================

/// Index of a node within one block's scheduling graph.
type NodeIndex = usize;

/// One instruction wrapped with its scheduling state.
struct SchedulingNode {
    inst: InstId,
    latency: u32,
    internal_latency: u32,
    /// Dependency-weighted distance to the end of the block. Grows
    /// monotonically while successors are scheduled.
    critical_path: u32,
    is_barrier: bool,
    /// True def-use producers of this node.
    data_predecessors: Vec<NodeIndex>,
    /// Ordering-only producers: barriers, side effects, environments.
    other_predecessors: Vec<NodeIndex>,
    num_unscheduled_successors: u32,
}

impl SchedulingNode {
    fn has_unscheduled_successors(&self) -> bool {
        self.num_unscheduled_successors != 0
    }

    fn maybe_update_critical_path(&mut self, other_path: u32) {
        self.critical_path = self.critical_path.max(other_path);
    }
}

/// Dependency graph over one block, built back to front.
struct SchedulingGraph<'a> {
    graph: &'a Graph,
    heap: &'a HeapLocations,
    nodes: Vec<SchedulingNode>,
    node_of: FxHashMap<InstId, NodeIndex>,
    contains_barrier: bool,
}

impl<'a> SchedulingGraph<'a> {
    fn new(graph: &'a Graph, heap: &'a HeapLocations) -> Self {
        SchedulingGraph {
            graph,
            heap,
            nodes: Vec::new(),
            node_of: FxHashMap::default(),
            contains_barrier: false,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node_for(&self, inst: InstId) -> Option<NodeIndex> {
        self.node_of.get(&inst).copied()
    }

    /// Add a node for `inst` and wire every dependency it has on the
    /// instructions after it (which already have nodes).
    fn add_node(
        &mut self,
        inst: InstId,
        is_barrier: bool,
        instruction_set: InstructionSet,
    ) -> NodeIndex {
        let cost = latency_of(instruction_set, &self.graph.inst(inst).kind);
        let index = self.nodes.len();
        self.nodes.push(SchedulingNode {
            inst,
            latency: cost.latency,
            internal_latency: cost.internal_latency,
            critical_path: 0,
            is_barrier,
            data_predecessors: Vec::new(),
            other_predecessors: Vec::new(),
            num_unscheduled_successors: 0,
        });
        self.node_of.insert(inst, index);
        self.contains_barrier |= is_barrier;
        self.add_dependencies(index, is_barrier);
        index
    }

    fn add_data_dependency(&mut self, node: Option<NodeIndex>, dependency: NodeIndex) {
        // A missing node is an instruction out of scheduling range (in
        // another block); no edge is needed.
        let Some(node) = node else {
            return;
        };
        self.nodes[node].data_predecessors.push(dependency);
        self.nodes[dependency].num_unscheduled_successors += 1;
    }

    fn add_other_dependency(&mut self, node: Option<NodeIndex>, dependency: NodeIndex) {
        let Some(node) = node else {
            return;
        };
        if self.nodes[node].other_predecessors.contains(&dependency) {
            return;
        }
        self.nodes[node].other_predecessors.push(dependency);
        self.nodes[dependency].num_unscheduled_successors += 1;
    }

    fn add_dependencies(&mut self, node: NodeIndex, is_barrier: bool) {
        let graph = self.graph;
        let inst_id = self.nodes[node].inst;
        let inst = graph.inst(inst_id);
        let followers = following(graph, inst_id);

        // Define-use dependencies.
        for u in inst.uses() {
            self.add_data_dependency(self.node_for(u.user), node);
        }

        // Scheduling barrier dependencies. A barrier depends on the
        // instructions after it, and instructions before a barrier depend
        // on it. Dependencies beyond the next barrier are implied
        // transitively, so the walk stops there.
        if self.contains_barrier {
            for &other in &followers {
                let other_node = self.node_for(other);
                let other_is_barrier =
                    other_node.is_some_and(|n| self.nodes[n].is_barrier);
                if is_barrier || other_is_barrier {
                    self.add_other_dependency(other_node, node);
                }
                if other_is_barrier {
                    break;
                }
            }
        }

        // Side effect dependencies, with chain compression: an explicit
        // edge is skipped when the target already depends transitively on
        // a better candidate seen in between.
        if !inst.side_effects().does_nothing() || inst.can_throw() {
            let mut chain_candidate: Option<InstId> = None;
            for &other in &followers {
                let Some(other_node) = self.node_for(other) else {
                    continue;
                };
                if self.nodes[other_node].is_barrier {
                    // The barrier already carries an ordering edge on us.
                    break;
                }
                if self.has_side_effect_dependency(other, inst_id) {
                    let skip = chain_candidate
                        .is_some_and(|c| self.has_side_effect_dependency(other, c));
                    if !skip {
                        self.add_other_dependency(Some(other_node), node);
                    }
                    let better = match chain_candidate {
                        None => true,
                        Some(c) => {
                            is_better_chain_candidate(graph.inst(other), graph.inst(c))
                        }
                    };
                    if better {
                        chain_candidate = Some(other);
                    }
                }
            }
        }

        // Environment dependencies: a deopt snapshot must observe the
        // pre-motion value. A barrier already fences everything after it.
        if !is_barrier {
            for &holder in inst.env_uses() {
                self.add_other_dependency(self.node_for(holder), node);
            }
        }
    }

    // =========================================================================
    // Side-effect dependency analysis
    // =========================================================================

    fn has_side_effect_dependency(&self, later: InstId, earlier: InstId) -> bool {
        self.has_memory_dependency(later, earlier)
            || has_exception_dependency(self.graph.inst(later), self.graph.inst(earlier))
    }

    fn has_memory_dependency(&self, a: InstId, b: InstId) -> bool {
        let (ia, ib) = (self.graph.inst(a), self.graph.inst(b));
        if !has_reordering_dependency(ia, ib) {
            return false;
        }
        if self.heap.is_empty() {
            // Without heap locations there is no way to disambiguate;
            // assume a dependency.
            return true;
        }
        let (a_array, b_array) = (is_array_access(ia), is_array_access(ib));
        let (a_field, b_field) = (is_field_access(ia), is_field_access(ib));
        if a_array && b_array {
            return self.heap.may_alias(self.heap.location_of(a), self.heap.location_of(b));
        }
        if a_field && b_field {
            if is_unresolved_field_access(ia) || is_unresolved_field_access(ib) {
                return true;
            }
            return self.heap.may_alias(self.heap.location_of(a), self.heap.location_of(b));
        }
        // Accesses of different kinds do not alias.
        if (a_array && b_field) || (a_field && b_array) {
            return false;
        }
        // Anything else (calls, allocations) stays conservative.
        true
    }
}

/// Instructions after `inst` in its block, in order.
fn following(graph: &Graph, inst: InstId) -> Vec<InstId> {
    let block = graph.inst(inst).block;
    let insts = &graph.block(block).insts;
    let pos = insts.iter().position(|&i| i == inst).unwrap_or(insts.len());
    insts.iter().skip(pos + 1).copied().collect()
}

fn is_array_access(inst: &Inst) -> bool {
    matches!(inst.kind, InstKind::ArrayGet | InstKind::ArraySet)
}

fn is_field_access(inst: &Inst) -> bool {
    matches!(inst.kind, InstKind::FieldGet(_) | InstKind::FieldSet(_))
}

fn is_unresolved_field_access(inst: &Inst) -> bool {
    match inst.kind {
        InstKind::FieldGet(f) | InstKind::FieldSet(f) => f.offset.is_none(),
        _ => false,
    }
}

fn has_reordering_dependency(a: &Inst, b: &Inst) -> bool {
    let (ea, eb) = (a.side_effects(), b.side_effects());
    // Read after write, write after read, write after write.
    ea.may_depend_on(eb) || eb.may_depend_on(ea) || (ea.does_any_write() && eb.does_any_write())
}

fn has_exception_dependency(later: &Inst, earlier: &Inst) -> bool {
    if later.can_throw() && earlier.side_effects().does_any_write() {
        return true;
    }
    if later.side_effects().does_any_write() && earlier.can_throw() {
        return true;
    }
    later.can_throw() && earlier.can_throw()
}

/// Whether `new` is more likely than `old` to collect further dependencies,
/// making it the better transitive anchor for chain compression.
fn is_better_chain_candidate(new: &Inst, old: &Inst) -> bool {
    if !new.side_effects().includes(old.side_effects()) {
        return false;
    }
    if old.side_effects().includes(new.side_effects()) {
        // Same effects; prefer a stronger throw.
        new.can_throw() && !old.can_throw()
    } else {
        new.can_throw() || !old.can_throw()
    }
}

// =============================================================================
// Candidate selection
// =============================================================================

/// Critical-path selector with the materialized-condition preference.
struct CriticalPathSelector {
    prev_select: Option<InstId>,
}

impl CriticalPathSelector {
    fn new() -> Self {
        CriticalPathSelector { prev_select: None }
    }

    fn pop_highest_priority(
        &mut self,
        candidates: &mut Vec<NodeIndex>,
        sched: &SchedulingGraph<'_>,
    ) -> NodeIndex {
        debug_assert!(!candidates.is_empty());
        let selected = match self.select_materialized_condition(candidates, sched) {
            Some(node) => node,
            None => {
                let mut select = 0;
                for i in 1..candidates.len() {
                    if Self::higher_priority(
                        &sched.nodes[candidates[i]],
                        &sched.nodes[candidates[select]],
                    ) {
                        select = i;
                    }
                }
                candidates.swap_remove(select)
            }
        };
        self.prev_select = Some(sched.nodes[selected].inst);
        selected
    }

    /// True when `check` should be scheduled before `candidate`. Smaller
    /// critical path first; on a tie the smaller latency goes now, so the
    /// expensive work lands earlier in program order.
    fn higher_priority(check: &SchedulingNode, candidate: &SchedulingNode) -> bool {
        if check.critical_path != candidate.critical_path {
            check.critical_path < candidate.critical_path
        } else {
            check.latency < candidate.latency
        }
    }

    /// A materialized condition feeding the just-scheduled branch/select
    /// must be emitted right next to it, regardless of critical path.
    fn select_materialized_condition(
        &self,
        candidates: &mut Vec<NodeIndex>,
        sched: &SchedulingGraph<'_>,
    ) -> Option<NodeIndex> {
        let prev = self.prev_select?;
        let prev_inst = sched.graph.inst(prev);
        let condition = match prev_inst.kind {
            InstKind::If => prev_inst.inputs[0],
            InstKind::Select => *prev_inst.inputs.get(2)?,
            _ => return None,
        };
        if !matches!(sched.graph.inst(condition).kind, InstKind::Condition(_)) {
            return None;
        }
        if !sched.graph.inst(condition).has_only_one_use() {
            return None;
        }
        let node = sched.node_for(condition)?;
        let pos = candidates.iter().position(|&c| c == node)?;
        debug_assert!(!sched.nodes[node].has_unscheduled_successors());
        Some(candidates.swap_remove(pos))
    }
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct Scheduler {
    instruction_set: InstructionSet,
    /// Only reorder blocks that belong to a loop.
    only_optimize_loop_blocks: bool,
}

impl Scheduler {
    pub fn new(instruction_set: InstructionSet) -> Self {
        Scheduler { instruction_set, only_optimize_loop_blocks: false }
    }

    pub fn set_only_optimize_loop_blocks(&mut self, value: bool) {
        self.only_optimize_loop_blocks = value;
    }

    /// Schedule every eligible block of the graph.
    pub fn run(&self, graph: &mut Graph) {
        // Heap locations are computed here rather than consumed from a
        // pipeline cell, so scheduling can decide when the analysis is
        // worth running at all.
        let heap = if !self.only_optimize_loop_blocks || graph.has_loops() {
            LoadStoreAnalysis::compute(graph)
        } else {
            HeapLocations::default()
        };
        let order: Vec<BlockId> = graph.reverse_post_order().to_vec();
        for block in order {
            if self.is_schedulable_block(graph, block) {
                self.schedule_block(graph, block, &heap);
            }
        }
    }

    fn schedule_block(&self, graph: &mut Graph, block: BlockId, heap: &HeapLocations) {
        let all: Vec<InstId> = graph.block(block).insts.clone();
        // Phis stay pinned at the block head; they model control-flow
        // merges, not computation, and consumers treat them like values
        // from another block.
        let phi_count = all
            .iter()
            .take_while(|&&inst| matches!(graph.inst(inst).kind, InstKind::Phi { .. }))
            .count();
        let (phis, insts) = all.split_at(phi_count);

        let mut sched = SchedulingGraph::new(graph, heap);
        for &inst in insts.iter().rev() {
            let is_barrier = is_scheduling_barrier(&graph.inst(inst).kind);
            sched.add_node(inst, is_barrier, self.instruction_set);
        }
        if sched.len() <= 1 {
            return;
        }

        // Initial candidates: no unscheduled successors, critical path
        // seeded with their own latency.
        let mut candidates: Vec<NodeIndex> = Vec::new();
        for index in 0..sched.nodes.len() {
            if !sched.nodes[index].has_unscheduled_successors() {
                let latency = sched.nodes[index].latency;
                sched.nodes[index].maybe_update_critical_path(latency);
                candidates.push(index);
            }
        }

        let mut selector = CriticalPathSelector::new();
        let mut scheduled: Vec<InstId> = Vec::with_capacity(insts.len());
        while !candidates.is_empty() {
            let node = selector.pop_highest_priority(&mut candidates, &sched);
            let path_to_node = sched.nodes[node].critical_path;

            for i in 0..sched.nodes[node].data_predecessors.len() {
                let pred = sched.nodes[node].data_predecessors[i];
                let update = path_to_node
                    + sched.nodes[pred].internal_latency
                    + sched.nodes[pred].latency;
                sched.nodes[pred].maybe_update_critical_path(update);
                sched.nodes[pred].num_unscheduled_successors -= 1;
                if !sched.nodes[pred].has_unscheduled_successors() {
                    candidates.push(pred);
                }
            }
            for i in 0..sched.nodes[node].other_predecessors.len() {
                // Ordering-only edges exist for correctness; they do not
                // feed the critical path.
                let pred = sched.nodes[node].other_predecessors[i];
                sched.nodes[pred].num_unscheduled_successors -= 1;
                if !sched.nodes[pred].has_unscheduled_successors() {
                    candidates.push(pred);
                }
            }

            scheduled.push(sched.nodes[node].inst);
        }
        debug_assert_eq!(scheduled.len(), insts.len());

        // Nodes were selected exit-first; reverse into program order,
        // behind the pinned phis.
        scheduled.reverse();
        let mut order = phis.to_vec();
        order.extend(scheduled);
        graph.block_mut(block).insts = order;
    }

    fn is_schedulable_block(&self, graph: &Graph, block: BlockId) -> bool {
        if self.only_optimize_loop_blocks && graph.block(block).loop_id.is_none() {
            return false;
        }
        // A handler may have assumptions on the instruction order of its
        // try block; never reorder across exception edges.
        if graph.block(block).is_in_try_catch() {
            return false;
        }
        graph
            .block(block)
            .insts
            .iter()
            .all(|&inst| is_schedulable(&graph.inst(inst).kind))
    }
}

/// The allow-list of instructions safe to reorder. Exhaustive over
/// `InstKind`, so a new instruction kind fails to compile until someone
/// decides its scheduling story.
fn is_schedulable(kind: &InstKind) -> bool {
    match kind {
        InstKind::IntConst(_)
        | InstKind::Param(_)
        | InstKind::Phi { .. }
        | InstKind::Neg
        | InstKind::Not
        | InstKind::Add
        | InstKind::Sub
        | InstKind::Mul
        | InstKind::Div
        | InstKind::Rem
        | InstKind::And
        | InstKind::Or
        | InstKind::Xor
        | InstKind::Shl
        | InstKind::Shr
        | InstKind::UShr
        | InstKind::Compare
        | InstKind::Condition(_)
        | InstKind::Select
        | InstKind::MulAdd
        | InstKind::TypeConversion
        | InstKind::Goto
        | InstKind::If
        | InstKind::Return
        | InstKind::ReturnVoid
        | InstKind::TryBoundary { .. }
        | InstKind::SuspendCheck
        | InstKind::NullCheck
        | InstKind::DivZeroCheck
        | InstKind::BoundsCheck
        | InstKind::ArrayGet
        | InstKind::ArraySet
        | InstKind::ArrayLength
        | InstKind::NewInstance { .. }
        | InstKind::NewArray { .. }
        | InstKind::LoadString { .. }
        | InstKind::InstanceOf { .. }
        | InstKind::CheckCast { .. }
        | InstKind::Invoke(_) => true,

        InstKind::FieldGet(f) | InstKind::FieldSet(f) => !f.is_volatile,

        // Explicitly excluded: ordering-sensitive beyond what the
        // dependency graph models.
        InstKind::Throw
        | InstKind::LoadClass { .. }
        | InstKind::ConstructorFence
        | InstKind::ClassGuard { .. }
        | InstKind::Deoptimize
        | InstKind::MonitorOp { .. } => false,
    }
}

/// Barriers pin everything around them: control flow (codegen relies on
/// terminator position), parameters (calling convention) and suspend
/// checks (goto emission relies on their position).
fn is_scheduling_barrier(kind: &InstKind) -> bool {
    kind.is_control_flow() || matches!(kind, InstKind::Param(_) | InstKind::SuspendCheck)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{CondKind, FieldAccess, ValueType};
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    fn graph_with_block() -> (Graph, BlockId) {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 8);
        let b = g.add_block();
        g.set_entry(b);
        (g, b)
    }

    fn positions(graph: &Graph, block: BlockId) -> FxHashMap<InstId, usize> {
        graph
            .block(block)
            .insts
            .iter()
            .enumerate()
            .map(|(i, &inst)| (inst, i))
            .collect()
    }

    fn field(offset: u32) -> FieldAccess {
        FieldAccess { field_index: 0, offset: Some(offset), is_volatile: false, is_static: false }
    }

    #[test]
    fn test_data_order_is_topological() {
        let (mut g, b) = graph_with_block();
        let c1 = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let c2 = g.add_inst(InstKind::IntConst(2), smallvec![], ValueType::Int, 0);
        let sum = g.add_inst(InstKind::Add, smallvec![c1, c2], ValueType::Int, 0);
        let double = g.add_inst(InstKind::Add, smallvec![sum, sum], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![double], ValueType::Void, 0);
        for i in [c1, c2, sum, double, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        let pos = positions(&g, b);
        assert!(pos[&c1] < pos[&sum]);
        assert!(pos[&c2] < pos[&sum]);
        assert!(pos[&sum] < pos[&double]);
        assert!(pos[&double] < pos[&ret]);
        assert_eq!(pos[&ret], 4, "terminator stays last");
    }

    #[test]
    fn test_aliasing_store_load_order_is_preserved() {
        let (mut g, b) = graph_with_block();
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let value = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let store =
            g.add_inst(InstKind::FieldSet(field(8)), smallvec![obj, value], ValueType::Void, 0);
        let load = g.add_inst(InstKind::FieldGet(field(8)), smallvec![obj], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![load], ValueType::Void, 0);
        for i in [obj, value, store, load, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        let pos = positions(&g, b);
        assert!(pos[&store] < pos[&load], "load may not move above the aliasing store");
    }

    #[test]
    fn test_disjoint_fields_may_reorder_but_stay_sound() {
        let (mut g, b) = graph_with_block();
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let v = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let store1 =
            g.add_inst(InstKind::FieldSet(field(8)), smallvec![obj, v], ValueType::Void, 0);
        let store2 =
            g.add_inst(InstKind::FieldSet(field(16)), smallvec![obj, v], ValueType::Void, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [obj, v, store1, store2, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        // Both stores still precede the return and follow their inputs.
        let pos = positions(&g, b);
        assert!(pos[&obj] < pos[&store1] && pos[&obj] < pos[&store2]);
        assert!(pos[&store1] < pos[&ret] && pos[&store2] < pos[&ret]);
    }

    #[test]
    fn test_try_catch_block_is_skipped() {
        let (mut g, b) = graph_with_block();
        g.block_mut(b).try_catch = Some(crate::ir::graph::TryCatchKind::InTry);
        let c1 = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let c2 = g.add_inst(InstKind::IntConst(2), smallvec![], ValueType::Int, 0);
        let sum = g.add_inst(InstKind::Add, smallvec![c2, c1], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::Return, smallvec![sum], ValueType::Void, 0);
        for i in [c1, c2, sum, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let before = g.block(b).insts.clone();
        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        assert_eq!(g.block(b).insts, before);
    }

    #[test]
    fn test_block_with_monitor_op_is_skipped() {
        let (mut g, b) = graph_with_block();
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let enter =
            g.add_inst(InstKind::MonitorOp { is_enter: true }, smallvec![obj], ValueType::Void, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [obj, enter, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let before = g.block(b).insts.clone();
        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        assert_eq!(g.block(b).insts, before);
    }

    #[test]
    fn test_environment_use_pins_value_before_holder() {
        let (mut g, b) = graph_with_block();
        let v = g.add_inst(InstKind::IntConst(3), smallvec![], ValueType::Int, 0);
        let len = g.add_inst(InstKind::IntConst(10), smallvec![], ValueType::Int, 0);
        let arr = g.add_inst(InstKind::NewArray { type_index: 0 }, smallvec![len], ValueType::Ref, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [v, len, arr, ret] {
            g.append(b, i);
        }
        g.set_environment(
            arr,
            crate::ir::node::Environment { pc: 0, vregs: vec![v] },
        );
        g.build_dominator_tree();

        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        let pos = positions(&g, b);
        assert!(pos[&v] < pos[&arr], "deopt snapshot must observe the pre-motion value");
    }

    #[test]
    fn test_materialized_condition_is_adjacent_to_branch() {
        let (mut g, b) = graph_with_block();
        let x = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Int, 0);
        let y = g.add_inst(InstKind::Param(1), smallvec![], ValueType::Int, 0);
        // Some expensive unrelated work the selector would otherwise put
        // right before the branch.
        let m1 = g.add_inst(InstKind::Mul, smallvec![x, y], ValueType::Int, 0);
        let m2 = g.add_inst(InstKind::Mul, smallvec![m1, y], ValueType::Int, 0);
        let cond =
            g.add_inst(InstKind::Condition(CondKind::Lt), smallvec![m2, x], ValueType::Int, 0);
        let branch = g.add_inst(InstKind::If, smallvec![cond], ValueType::Void, 0);
        for i in [x, y, m1, m2, cond, branch] {
            g.append(b, i);
        }
        let succ_a = g.add_block();
        let succ_b = g.add_block();
        g.connect(b, succ_a);
        g.connect(b, succ_b);
        for s in [succ_a, succ_b] {
            let r = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
            g.append(s, r);
        }
        g.build_dominator_tree();

        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        let pos = positions(&g, b);
        assert_eq!(
            pos[&cond] + 1,
            pos[&branch],
            "condition must be emitted immediately before its branch"
        );
    }

    #[test]
    fn test_fifty_independent_chains_schedule_topologically() {
        let (mut g, b) = graph_with_block();
        let mut all = Vec::new();
        let mut pairs = Vec::new();
        for i in 0..25 {
            let c = g.add_inst(InstKind::IntConst(i), smallvec![], ValueType::Int, 0);
            let n = g.add_inst(InstKind::Neg, smallvec![c], ValueType::Int, 0);
            all.push(c);
            all.push(n);
            pairs.push((c, n));
        }
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for &i in &all {
            g.append(b, i);
        }
        g.append(b, ret);
        g.build_dominator_tree();

        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        let pos = positions(&g, b);
        for (c, n) in pairs {
            assert!(pos[&c] < pos[&n]);
        }
        assert_eq!(pos[&ret], 50);
    }

    #[test]
    fn test_single_instruction_block_is_untouched() {
        let (mut g, b) = graph_with_block();
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        g.append(b, ret);
        g.build_dominator_tree();
        Scheduler::new(InstructionSet::Arm64).run(&mut g);
        assert_eq!(g.block(b).insts, vec![ret]);
    }
}
