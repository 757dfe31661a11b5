//! Architecture-specific peephole passes.
//!
//! Selected purely by target instruction set; see the pipeline's arch
//! step. arm64 has a fused multiply-add, so `a * b + c` with a
//! single-use multiply collapses into one instruction there.

use super::Pass;
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind, ValueType};
use smallvec::smallvec;

pub struct Arm64InstructionSimplifier {
    fused: usize,
}

impl Arm64InstructionSimplifier {
    pub const NAME: &'static str = "instruction_simplifier_arm64";

    pub fn new() -> Self {
        Arm64InstructionSimplifier { fused: 0 }
    }

    pub fn fused(&self) -> usize {
        self.fused
    }

    /// `Add(Mul(a, b), c)` or `Add(c, Mul(a, b))` with a single-use
    /// multiply; returns (a, b, c).
    fn madd_operands(graph: &Graph, add: InstId) -> Option<(InstId, InstId, InstId, InstId)> {
        let inst = graph.inst(add);
        if !matches!(inst.kind, InstKind::Add) {
            return None;
        }
        for (mul_pos, other_pos) in [(0usize, 1usize), (1, 0)] {
            let mul = inst.inputs[mul_pos];
            let other = inst.inputs[other_pos];
            let mul_inst = graph.inst(mul);
            if matches!(mul_inst.kind, InstKind::Mul) && mul_inst.has_only_one_use() {
                return Some((mul, mul_inst.inputs[0], mul_inst.inputs[1], other));
            }
        }
        None
    }
}

impl Default for Arm64InstructionSimplifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for Arm64InstructionSimplifier {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        let order = graph.reverse_post_order().to_vec();
        for block in order {
            for id in graph.block(block).insts.clone() {
                if graph.inst(id).is_removed() {
                    continue;
                }
                let Some((mul, a, b, c)) = Self::madd_operands(graph, id) else {
                    continue;
                };
                let pc = graph.inst(id).pc;
                let fused =
                    graph.add_inst(InstKind::MulAdd, smallvec![a, b, c], ValueType::Int, pc);
                graph.insert_before(id, fused);
                graph.replace_uses(id, fused);
                graph.remove_inst(id);
                graph.remove_inst(mul);
                self.fused += 1;
                changed = true;
            }
        }
        changed
    }
}
