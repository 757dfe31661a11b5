//! Graph consistency checker.
//!
//! Walks the whole graph after a pass and collects violations: dangling
//! uses, operands that do not dominate their users, malformed phis,
//! asymmetric edges, misplaced terminators. Any error means a defect in
//! the compiler itself, not in the input.

use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::{InstId, InstKind};

pub struct GraphChecker<'a> {
    graph: &'a Graph,
    errors: Vec<String>,
}

impl<'a> GraphChecker<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        GraphChecker { graph, errors: Vec::new() }
    }

    /// Check the whole graph, returning the list of violations.
    pub fn run(mut self) -> Vec<String> {
        let rpo: Vec<BlockId> = self.graph.reverse_post_order().to_vec();
        for &block in &rpo {
            self.check_block(block);
        }
        for (id, _) in self.graph.iter_insts() {
            self.check_instruction(id);
        }
        self.errors
    }

    fn check_block(&mut self, block: BlockId) {
        let data = self.graph.block(block);

        for &succ in &data.succs {
            if !self.graph.block(succ).preds.contains(&block) {
                self.errors.push(format!(
                    "{block} lists successor {succ} which does not list it as predecessor"
                ));
            }
        }
        for &pred in &data.preds {
            if !self.graph.block(pred).succs.contains(&block) {
                self.errors.push(format!(
                    "{block} lists predecessor {pred} which does not list it as successor"
                ));
            }
        }

        let mut seen_terminator = false;
        for &inst in &data.insts {
            let node = self.graph.inst(inst);
            if node.is_removed() {
                self.errors.push(format!("{block} contains removed instruction {inst}"));
                continue;
            }
            if node.block != block {
                self.errors.push(format!(
                    "{inst} ({}) listed in {block} but claims block {}",
                    node.kind.debug_name(),
                    node.block
                ));
            }
            if seen_terminator {
                self.errors.push(format!(
                    "{inst} ({}) appears after the terminator of {block}",
                    node.kind.debug_name()
                ));
            }
            if node.is_control_flow() {
                seen_terminator = true;
            }
        }
        if !data.insts.is_empty() && !seen_terminator {
            self.errors.push(format!("{block} has no terminator"));
        }
    }

    fn check_instruction(&mut self, id: InstId) {
        let inst = self.graph.inst(id);

        if inst.block == BlockId::INVALID {
            self.errors.push(format!(
                "{id} ({}) is live but not attached to a block",
                inst.kind.debug_name()
            ));
            return;
        }

        // Every input lists this instruction as a user, and (for non-phis)
        // its definition dominates this one.
        for (index, &input) in inst.inputs.iter().enumerate() {
            let producer = self.graph.inst(input);
            if producer.is_removed() {
                self.errors.push(format!(
                    "{id} ({}) input {index} is the removed instruction {input}",
                    inst.kind.debug_name()
                ));
                continue;
            }
            let recorded = producer
                .uses()
                .iter()
                .any(|u| u.user == id && u.index == index);
            if !recorded {
                self.errors.push(format!(
                    "{id} ({}) uses {input} which does not record the use",
                    inst.kind.debug_name()
                ));
            }
            if let InstKind::Phi { .. } = inst.kind {
                // Phi inputs are checked per predecessor edge below.
            } else if !self.defines_before(input, id) {
                self.errors.push(format!(
                    "{input} does not dominate its user {id} ({})",
                    inst.kind.debug_name()
                ));
            }
        }

        for u in inst.uses() {
            let user = self.graph.inst(u.user);
            if user.is_removed() {
                self.errors.push(format!(
                    "{id} ({}) has a dangling use by removed {user_id}",
                    inst.kind.debug_name(),
                    user_id = u.user
                ));
                continue;
            }
            if user.inputs.get(u.index) != Some(&id) {
                self.errors.push(format!(
                    "{id} records use by {} at operand {} which holds something else",
                    u.user, u.index
                ));
            }
        }

        if let InstKind::Phi { .. } = inst.kind {
            let preds = self.graph.block(inst.block).preds.len();
            if inst.inputs.len() != preds {
                self.errors.push(format!(
                    "phi {id} has {} inputs for {} predecessors",
                    inst.inputs.len(),
                    preds
                ));
            }
        }
    }

    /// Whether `def`'s position dominates `user`'s position.
    fn defines_before(&self, def: InstId, user: InstId) -> bool {
        let def_block = self.graph.inst(def).block;
        let user_block = self.graph.inst(user).block;
        if def_block == BlockId::INVALID || user_block == BlockId::INVALID {
            return false;
        }
        if def_block == user_block {
            let insts = &self.graph.block(def_block).insts;
            let def_pos = insts.iter().position(|&i| i == def);
            let user_pos = insts.iter().position(|&i| i == user);
            match (def_pos, user_pos) {
                (Some(d), Some(u)) => d < u,
                _ => false,
            }
        } else {
            self.graph.dominates(def_block, user_block)
        }
    }
}
