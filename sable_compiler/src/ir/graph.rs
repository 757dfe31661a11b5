//! The method graph: instruction slab, basic blocks, dominator tree and
//! loop metadata.
//!
//! All cross-references are slab indices, so the graph has no interior
//! pointers and drops in one piece. Mutation helpers keep use lists and
//! edge lists consistent; passes are expected to go through them.

use crate::ir::node::{Environment, Inst, InstId, InstKind, Use, ValueType};
use rustc_hash::FxHashSet;
use sable_bytecode::MethodRef;
use smallvec::SmallVec;
use std::fmt;

/// Index of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const INVALID: BlockId = BlockId(u32::MAX);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Index of a natural loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct LoopId(pub u32);

/// Relationship of a block to exception regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryCatchKind {
    /// Inside a try region.
    InTry,
    /// Entry block of a catch handler.
    Handler,
}

/// A basic block: ordered instructions (terminator last) plus CFG edges.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub insts: Vec<InstId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Immediate dominator; `None` for the entry block.
    pub dominator: Option<BlockId>,
    /// Innermost loop this block belongs to.
    pub loop_id: Option<LoopId>,
    pub try_catch: Option<TryCatchKind>,
    pub(crate) removed: bool,
}

impl Block {
    pub fn terminator(&self) -> Option<InstId> {
        self.insts.last().copied()
    }

    pub fn is_in_try_catch(&self) -> bool {
        self.try_catch.is_some()
    }
}

/// A natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub header: BlockId,
    pub blocks: FxHashSet<BlockId>,
    pub back_edges: Vec<BlockId>,
}

impl LoopInfo {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// The per-method graph.
pub struct Graph {
    insts: Vec<Inst>,
    blocks: Vec<Block>,
    entry: BlockId,
    rpo: Vec<BlockId>,
    loops: Vec<LoopInfo>,
    method: MethodRef,
    registers_size: u16,
    has_try_catch: bool,
}

impl Graph {
    pub fn new(method: MethodRef, registers_size: u16) -> Graph {
        Graph {
            insts: Vec::new(),
            blocks: Vec::new(),
            entry: BlockId::INVALID,
            rpo: Vec::new(),
            loops: Vec::new(),
            method,
            registers_size,
            has_try_catch: false,
        }
    }

    pub fn method(&self) -> MethodRef {
        self.method
    }

    pub fn registers_size(&self) -> u16 {
        self.registers_size
    }

    pub fn has_try_catch(&self) -> bool {
        self.has_try_catch
    }

    pub fn set_has_try_catch(&mut self, value: bool) {
        self.has_try_catch = value;
    }

    pub fn has_loops(&self) -> bool {
        !self.loops.is_empty()
    }

    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    pub fn loop_info(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id.0 as usize]
    }

    // =========================================================================
    // Blocks and edges
    // =========================================================================

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block;
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn connect(&mut self, pred: BlockId, succ: BlockId) {
        self.blocks[pred.index()].succs.push(succ);
        self.blocks[succ.index()].preds.push(pred);
    }

    pub fn disconnect(&mut self, pred: BlockId, succ: BlockId) {
        self.blocks[pred.index()].succs.retain(|&b| b != succ);
        self.blocks[succ.index()].preds.retain(|&b| b != pred);
    }

    /// Blocks in reverse post order. Valid after `build_dominator_tree`
    /// (or an explicit `compute_rpo`) until the CFG shape changes.
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn compute_rpo(&mut self) {
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        // Iterative post-order DFS.
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited[self.entry.index()] = true;
        while let Some(&(block, next_child)) = stack.last() {
            match self.blocks[block.index()].succs.get(next_child).copied() {
                Some(succ) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    if !visited[succ.index()] {
                        visited[succ.index()] = true;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    post.push(block);
                    stack.pop();
                }
            }
        }
        post.reverse();
        self.rpo = post;
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    /// Create an unattached instruction and register its input uses.
    pub fn add_inst(
        &mut self,
        kind: InstKind,
        inputs: SmallVec<[InstId; 2]>,
        value_type: ValueType,
        pc: u32,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        for (index, &input) in inputs.iter().enumerate() {
            self.insts[input.index()].uses.push(Use { user: id, index });
        }
        self.insts.push(Inst {
            kind,
            inputs,
            value_type,
            block: BlockId::INVALID,
            pc,
            env: None,
            uses: Vec::new(),
            env_uses: Vec::new(),
            removed: false,
        });
        id
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    /// Total slab size, counting removed instructions.
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Live instructions, in slab order.
    pub fn iter_insts(&self) -> impl Iterator<Item = (InstId, &Inst)> {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, inst)| !inst.removed)
            .map(|(i, inst)| (InstId(i as u32), inst))
    }

    /// Append to the end of a block (after any existing terminator; block
    /// construction appends the terminator last by convention).
    pub fn append(&mut self, block: BlockId, inst: InstId) {
        self.insts[inst.index()].block = block;
        self.blocks[block.index()].insts.push(inst);
    }

    /// Insert `inst` immediately before `before` in its block.
    pub fn insert_before(&mut self, before: InstId, inst: InstId) {
        let block = self.insts[before.index()].block;
        let pos = self.blocks[block.index()]
            .insts
            .iter()
            .position(|&i| i == before)
            .expect("instruction not found in its block");
        self.insts[inst.index()].block = block;
        self.blocks[block.index()].insts.insert(pos, inst);
    }

    /// Detach `inst` from its block without touching its uses.
    pub fn detach(&mut self, inst: InstId) {
        let block = self.insts[inst.index()].block;
        self.blocks[block.index()].insts.retain(|&i| i != inst);
        self.insts[inst.index()].block = BlockId::INVALID;
    }

    /// Move `inst` to the end of `block`, before the terminator.
    pub fn move_before_terminator(&mut self, inst: InstId, block: BlockId) {
        self.detach(inst);
        let term_pos = self.blocks[block.index()].insts.len().saturating_sub(1);
        self.insts[inst.index()].block = block;
        self.blocks[block.index()].insts.insert(term_pos, inst);
    }

    /// Attach a deopt environment, registering env uses on the referenced
    /// values.
    pub fn set_environment(&mut self, inst: InstId, env: Environment) {
        for &vreg in &env.vregs {
            if vreg.is_valid() {
                let holders = &mut self.insts[vreg.index()].env_uses;
                if !holders.contains(&inst) {
                    holders.push(inst);
                }
            }
        }
        self.insts[inst.index()].env = Some(env);
    }

    /// Rewrite every value use and environment slot of `old` to `new`.
    pub fn replace_uses(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.insts[old.index()].uses);
        for u in &uses {
            self.insts[u.user.index()].inputs[u.index] = new;
        }
        self.insts[new.index()].uses.extend(uses);

        let env_uses = std::mem::take(&mut self.insts[old.index()].env_uses);
        for &holder in &env_uses {
            if let Some(env) = self.insts[holder.index()].env.as_mut() {
                for slot in env.vregs.iter_mut() {
                    if *slot == old {
                        *slot = new;
                    }
                }
            }
            let holders = &mut self.insts[new.index()].env_uses;
            if !holders.contains(&holder) {
                holders.push(holder);
            }
        }
    }

    /// Append an operand to `user` (phi input patching), keeping use lists
    /// consistent.
    pub fn add_input(&mut self, user: InstId, input: InstId) {
        let index = self.insts[user.index()].inputs.len();
        self.insts[user.index()].inputs.push(input);
        self.insts[input.index()].uses.push(Use { user, index });
    }

    /// Remove one operand of `user` (phi input pruning), shifting the use
    /// records of the operands that follow it.
    pub fn remove_input(&mut self, user: InstId, index: usize) {
        let input = self.insts[user.index()].inputs.remove(index);
        self.insts[input.index()]
            .uses
            .retain(|u| !(u.user == user && u.index == index));
        let remaining = self.insts[user.index()].inputs.clone();
        for (new_index, &shifted) in remaining.iter().enumerate().skip(index) {
            for u in self.insts[shifted.index()].uses.iter_mut() {
                if u.user == user && u.index == new_index + 1 {
                    u.index = new_index;
                }
            }
        }
    }

    /// Replace one operand of `user`, keeping use lists consistent.
    pub fn replace_input(&mut self, user: InstId, index: usize, new: InstId) {
        let old = self.insts[user.index()].inputs[index];
        if old == new {
            return;
        }
        self.insts[old.index()]
            .uses
            .retain(|u| !(u.user == user && u.index == index));
        self.insts[user.index()].inputs[index] = new;
        self.insts[new.index()].uses.push(Use { user, index });
    }

    /// Remove an instruction with no remaining uses from the graph.
    pub fn remove_inst(&mut self, id: InstId) {
        debug_assert!(!self.insts[id.index()].has_uses(), "removing a used instruction");
        let inputs: SmallVec<[InstId; 2]> = self.insts[id.index()].inputs.clone();
        for (index, input) in inputs.into_iter().enumerate() {
            self.insts[input.index()]
                .uses
                .retain(|u| !(u.user == id && u.index == index));
        }
        if let Some(env) = self.insts[id.index()].env.take() {
            for vreg in env.vregs {
                if vreg.is_valid() {
                    self.insts[vreg.index()].env_uses.retain(|&h| h != id);
                }
            }
        }
        let block = self.insts[id.index()].block;
        if block != BlockId::INVALID {
            self.blocks[block.index()].insts.retain(|&i| i != id);
        }
        self.insts[id.index()].removed = true;
    }

    /// Remove an unreachable block and all its instructions.
    pub fn remove_block(&mut self, id: BlockId) {
        let insts = std::mem::take(&mut self.blocks[id.index()].insts);
        // Sever use edges first so removal order inside the block does not
        // matter.
        for &inst in &insts {
            self.insts[inst.index()].uses.retain(|u| {
                !insts.contains(&u.user)
            });
        }
        for inst in insts {
            if self.insts[inst.index()].has_uses() {
                // A value flowing out of an unreachable block can only be
                // consumed by a phi in a reachable block; the caller fixes
                // those up before removal.
                self.insts[inst.index()].uses.clear();
            }
            self.insts[inst.index()].block = BlockId::INVALID;
            self.remove_inst(inst);
        }
        let preds = self.blocks[id.index()].preds.clone();
        let succs = self.blocks[id.index()].succs.clone();
        for pred in preds {
            self.disconnect(pred, id);
        }
        for succ in succs {
            self.disconnect(id, succ);
        }
        self.blocks[id.index()].removed = true;
    }

    pub fn block_is_removed(&self, id: BlockId) -> bool {
        self.blocks[id.index()].removed
    }

    // =========================================================================
    // Dominators and loops
    // =========================================================================

    /// Compute RPO, the dominator tree and loop metadata.
    pub fn build_dominator_tree(&mut self) {
        self.compute_rpo();

        let mut rpo_index = vec![usize::MAX; self.blocks.len()];
        for (i, &block) in self.rpo.iter().enumerate() {
            rpo_index[block.index()] = i;
        }

        // Iterative dominator computation over RPO.
        for block in &mut self.blocks {
            block.dominator = None;
        }
        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let preds: SmallVec<[BlockId; 4]> = self.blocks[block.index()]
                    .preds
                    .iter()
                    .copied()
                    .filter(|p| {
                        rpo_index[p.index()] != usize::MAX
                            && (*p == self.entry || self.blocks[p.index()].dominator.is_some())
                    })
                    .collect();
                let Some(&first) = preds.first() else {
                    continue;
                };
                let mut idom = first;
                for &pred in preds.iter().skip(1) {
                    idom = self.intersect(idom, pred, &rpo_index);
                }
                if self.blocks[block.index()].dominator != Some(idom) {
                    self.blocks[block.index()].dominator = Some(idom);
                    changed = true;
                }
            }
        }

        self.detect_loops();
    }

    fn intersect(&self, mut a: BlockId, mut b: BlockId, rpo_index: &[usize]) -> BlockId {
        while a != b {
            while rpo_index[a.index()] > rpo_index[b.index()] {
                a = self.blocks[a.index()].dominator.unwrap_or(self.entry);
            }
            while rpo_index[b.index()] > rpo_index[a.index()] {
                b = self.blocks[b.index()].dominator.unwrap_or(self.entry);
            }
        }
        a
    }

    /// Whether `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.blocks[current.index()].dominator {
                Some(idom) => current = idom,
                None => return false,
            }
        }
    }

    fn detect_loops(&mut self) {
        self.loops.clear();
        for block in &mut self.blocks {
            block.loop_id = None;
        }

        let rpo = self.rpo.clone();
        for &block in &rpo {
            for &succ in &self.blocks[block.index()].succs.clone() {
                if self.dominates(succ, block) {
                    // succ is a loop header with back edge from block.
                    self.add_back_edge(succ, block);
                }
            }
        }

        // Assign innermost loops: later-discovered loops with smaller
        // bodies win.
        let loops = self.loops.clone();
        for (i, l) in loops.iter().enumerate() {
            for &b in &l.blocks {
                match self.blocks[b.index()].loop_id {
                    None => self.blocks[b.index()].loop_id = Some(LoopId(i as u32)),
                    Some(prev) => {
                        if l.blocks.len() < self.loops[prev.0 as usize].blocks.len() {
                            self.blocks[b.index()].loop_id = Some(LoopId(i as u32));
                        }
                    }
                }
            }
        }
    }

    fn add_back_edge(&mut self, header: BlockId, tail: BlockId) {
        if let Some(existing) = self.loops.iter_mut().find(|l| l.header == header) {
            existing.back_edges.push(tail);
            let blocks = Self::collect_loop_body(&self.blocks, header, tail);
            existing.blocks.extend(blocks);
            return;
        }
        let mut blocks = Self::collect_loop_body(&self.blocks, header, tail);
        blocks.insert(header);
        self.loops.push(LoopInfo { header, blocks, back_edges: vec![tail] });
    }

    /// Blocks backward-reachable from `tail` without passing `header`.
    fn collect_loop_body(
        blocks: &[Block],
        header: BlockId,
        tail: BlockId,
    ) -> FxHashSet<BlockId> {
        let mut body = FxHashSet::default();
        body.insert(header);
        let mut worklist = vec![tail];
        while let Some(block) = worklist.pop() {
            if body.insert(block) {
                worklist.extend(blocks[block.index()].preds.iter().copied());
            }
        }
        body
    }

    /// The preheader of a loop: the unique out-of-loop predecessor of the
    /// header, when there is exactly one.
    pub fn loop_preheader(&self, loop_id: LoopId) -> Option<BlockId> {
        let info = &self.loops[loop_id.0 as usize];
        let mut outside = self.blocks[info.header.index()]
            .preds
            .iter()
            .copied()
            .filter(|p| !info.contains(*p));
        let first = outside.next()?;
        if outside.next().is_some() {
            return None;
        }
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::InvokeKind;
    use sable_bytecode::SourceFileId;
    use smallvec::smallvec;

    fn graph() -> Graph {
        Graph::new(MethodRef::new(SourceFileId(0), 0), 4)
    }

    /// Diamond: B0 -> {B1, B2} -> B3.
    fn diamond() -> (Graph, [BlockId; 4]) {
        let mut g = graph();
        let b0 = g.add_block();
        let b1 = g.add_block();
        let b2 = g.add_block();
        let b3 = g.add_block();
        g.set_entry(b0);
        g.connect(b0, b1);
        g.connect(b0, b2);
        g.connect(b1, b3);
        g.connect(b2, b3);
        g.build_dominator_tree();
        (g, [b0, b1, b2, b3])
    }

    #[test]
    fn test_diamond_dominators() {
        let (g, [b0, b1, b2, b3]) = diamond();
        assert_eq!(g.block(b1).dominator, Some(b0));
        assert_eq!(g.block(b2).dominator, Some(b0));
        assert_eq!(g.block(b3).dominator, Some(b0));
        assert!(g.dominates(b0, b3));
        assert!(!g.dominates(b1, b3));
    }

    #[test]
    fn test_rpo_starts_at_entry() {
        let (g, [b0, _, _, b3]) = diamond();
        let rpo = g.reverse_post_order();
        assert_eq!(rpo.first(), Some(&b0));
        assert_eq!(rpo.last(), Some(&b3));
    }

    #[test]
    fn test_loop_detection() {
        let mut g = graph();
        let b0 = g.add_block();
        let header = g.add_block();
        let body = g.add_block();
        let exit = g.add_block();
        g.set_entry(b0);
        g.connect(b0, header);
        g.connect(header, body);
        g.connect(body, header);
        g.connect(header, exit);
        g.build_dominator_tree();

        assert_eq!(g.loops().len(), 1);
        let l = &g.loops()[0];
        assert_eq!(l.header, header);
        assert!(l.contains(body));
        assert!(!l.contains(exit));
        assert_eq!(g.loop_preheader(LoopId(0)), Some(b0));
    }

    #[test]
    fn test_uses_are_tracked() {
        let mut g = graph();
        let b0 = g.add_block();
        g.set_entry(b0);
        let a = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let b = g.add_inst(InstKind::IntConst(2), smallvec![], ValueType::Int, 0);
        let sum = g.add_inst(InstKind::Add, smallvec![a, b], ValueType::Int, 0);
        g.append(b0, a);
        g.append(b0, b);
        g.append(b0, sum);

        assert_eq!(g.inst(a).uses().len(), 1);
        assert_eq!(g.inst(a).uses()[0].user, sum);

        let c = g.add_inst(InstKind::IntConst(3), smallvec![], ValueType::Int, 0);
        g.append(b0, c);
        g.replace_uses(a, c);
        assert!(!g.inst(a).has_uses());
        assert_eq!(g.inst(sum).inputs[0], c);

        g.remove_inst(a);
        assert!(g.inst(a).is_removed());
    }

    #[test]
    fn test_environment_uses() {
        let mut g = graph();
        let b0 = g.add_block();
        g.set_entry(b0);
        let v = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let call = g.add_inst(
            InstKind::Invoke(InvokeKind::Static { method_index: 0 }),
            smallvec![],
            ValueType::Int,
            2,
        );
        g.append(b0, v);
        g.append(b0, call);
        g.set_environment(call, Environment { pc: 2, vregs: vec![v, InstId::INVALID] });

        assert_eq!(g.inst(v).env_uses(), &[call]);
        assert!(!g.inst(v).has_only_one_use());
    }
}
