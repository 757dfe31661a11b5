//! Instruction simplification: constant folding and algebraic identities.

use super::Pass;
use crate::ir::graph::Graph;
use crate::ir::node::{CondKind, InstId, InstKind, ValueType};
use smallvec::smallvec;

/// Constant folding and algebraic simplification pass.
pub struct Simplify {
    simplifications: usize,
}

impl Simplify {
    pub const NAME: &'static str = "instruction_simplifier";

    pub fn new() -> Self {
        Simplify { simplifications: 0 }
    }

    pub fn simplifications(&self) -> usize {
        self.simplifications
    }

    fn as_const(graph: &Graph, id: InstId) -> Option<i64> {
        match graph.inst(id).kind {
            InstKind::IntConst(value) => Some(value),
            _ => None,
        }
    }

    fn fold_binary(kind: &InstKind, lhs: i64, rhs: i64) -> Option<i64> {
        Some(match kind {
            InstKind::Add => lhs.wrapping_add(rhs),
            InstKind::Sub => lhs.wrapping_sub(rhs),
            InstKind::Mul => lhs.wrapping_mul(rhs),
            InstKind::And => lhs & rhs,
            InstKind::Or => lhs | rhs,
            InstKind::Xor => lhs ^ rhs,
            InstKind::Shl => lhs.wrapping_shl(rhs as u32 & 31),
            InstKind::Shr => lhs.wrapping_shr(rhs as u32 & 31),
            InstKind::UShr => ((lhs as u64).wrapping_shr(rhs as u32 & 31)) as i64,
            InstKind::Compare => (lhs - rhs).signum(),
            InstKind::Condition(cond) => {
                let holds = match cond {
                    CondKind::Eq => lhs == rhs,
                    CondKind::Ne => lhs != rhs,
                    CondKind::Lt => lhs < rhs,
                    CondKind::Ge => lhs >= rhs,
                    CondKind::Gt => lhs > rhs,
                    CondKind::Le => lhs <= rhs,
                };
                holds as i64
            }
            _ => return None,
        })
    }

    /// An existing operand the instruction reduces to, if any.
    fn identity(graph: &Graph, id: InstId) -> Option<InstId> {
        let inst = graph.inst(id);
        let input = |i: usize| inst.inputs[i];
        let constant = |i: usize| Self::as_const(graph, inst.inputs[i]);
        match inst.kind {
            InstKind::Add => match (constant(0), constant(1)) {
                (_, Some(0)) => Some(input(0)),
                (Some(0), _) => Some(input(1)),
                _ => None,
            },
            InstKind::Sub if constant(1) == Some(0) => Some(input(0)),
            InstKind::Mul => match (constant(0), constant(1)) {
                (_, Some(1)) => Some(input(0)),
                (Some(1), _) => Some(input(1)),
                _ => None,
            },
            InstKind::And | InstKind::Or if input(0) == input(1) => Some(input(0)),
            InstKind::Shl | InstKind::Shr | InstKind::UShr if constant(1) == Some(0) => {
                Some(input(0))
            }
            // --x == x, !!x == x
            InstKind::Neg => match graph.inst(input(0)).kind {
                InstKind::Neg => Some(graph.inst(input(0)).inputs[0]),
                _ => None,
            },
            InstKind::Not => match graph.inst(input(0)).kind {
                InstKind::Not => Some(graph.inst(input(0)).inputs[0]),
                _ => None,
            },
            // select(c, x, x) == x
            InstKind::Select if input(0) == input(1) => Some(input(0)),
            _ => None,
        }
    }

    /// A constant the instruction always evaluates to, if any.
    fn annihilator(graph: &Graph, id: InstId) -> Option<i64> {
        let inst = graph.inst(id);
        let constant = |i: usize| Self::as_const(graph, inst.inputs[i]);
        match inst.kind {
            InstKind::Mul if constant(0) == Some(0) || constant(1) == Some(0) => Some(0),
            InstKind::Sub | InstKind::Xor if inst.inputs[0] == inst.inputs[1] => Some(0),
            _ => None,
        }
    }
}

impl Default for Simplify {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for Simplify {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut changed = false;
        let order = graph.reverse_post_order().to_vec();
        for block in order {
            let insts = graph.block(block).insts.clone();
            for id in insts {
                if graph.inst(id).is_removed() || !graph.inst(id).has_uses() {
                    continue;
                }

                // Fold constant operands.
                if graph.inst(id).inputs.len() == 2 {
                    let lhs = Self::as_const(graph, graph.inst(id).inputs[0]);
                    let rhs = Self::as_const(graph, graph.inst(id).inputs[1]);
                    if let (Some(l), Some(r)) = (lhs, rhs) {
                        if let Some(value) = Self::fold_binary(&graph.inst(id).kind, l, r) {
                            let pc = graph.inst(id).pc;
                            let folded = graph.add_inst(
                                InstKind::IntConst(value),
                                smallvec![],
                                ValueType::Int,
                                pc,
                            );
                            graph.insert_before(id, folded);
                            graph.replace_uses(id, folded);
                            graph.remove_inst(id);
                            self.simplifications += 1;
                            changed = true;
                            continue;
                        }
                    }
                }
                if graph.inst(id).inputs.len() == 1 {
                    if let (InstKind::Neg, Some(v)) =
                        (graph.inst(id).kind, Self::as_const(graph, graph.inst(id).inputs[0]))
                    {
                        let pc = graph.inst(id).pc;
                        let folded = graph.add_inst(
                            InstKind::IntConst(v.wrapping_neg()),
                            smallvec![],
                            ValueType::Int,
                            pc,
                        );
                        graph.insert_before(id, folded);
                        graph.replace_uses(id, folded);
                        graph.remove_inst(id);
                        self.simplifications += 1;
                        changed = true;
                        continue;
                    }
                }

                // Algebraic identities.
                if let Some(replacement) = Self::identity(graph, id) {
                    graph.replace_uses(id, replacement);
                    graph.remove_inst(id);
                    self.simplifications += 1;
                    changed = true;
                    continue;
                }
                if let Some(value) = Self::annihilator(graph, id) {
                    let pc = graph.inst(id).pc;
                    let folded =
                        graph.add_inst(InstKind::IntConst(value), smallvec![], ValueType::Int, pc);
                    graph.insert_before(id, folded);
                    graph.replace_uses(id, folded);
                    graph.remove_inst(id);
                    self.simplifications += 1;
                    changed = true;
                }
            }
        }
        changed
    }
}
