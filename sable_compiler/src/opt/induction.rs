//! Basic induction-variable detection.
//!
//! Finds loop-header phis of the shape `phi = [initial, phi +/- constant]`
//! and publishes them for bounds-check elimination and loop optimization.

use super::{AnalysisCell, Pass};
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind};
use rustc_hash::FxHashMap;

/// One basic induction variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InductionVar {
    pub phi: InstId,
    pub initial: InstId,
    /// The phi input that advances the variable each iteration.
    pub update: InstId,
    pub step: i64,
}

/// Induction variables per loop.
#[derive(Debug, Default, Clone)]
pub struct InductionAnalysisResult {
    by_loop: Vec<Vec<InductionVar>>,
    by_phi: FxHashMap<InstId, InductionVar>,
}

impl InductionAnalysisResult {
    pub fn loop_inductions(&self, loop_index: usize) -> &[InductionVar] {
        self.by_loop.get(loop_index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn induction_of(&self, phi: InstId) -> Option<&InductionVar> {
        self.by_phi.get(&phi)
    }
}

pub struct InductionVarAnalysis {
    result: AnalysisCell<InductionAnalysisResult>,
}

impl InductionVarAnalysis {
    pub const NAME: &'static str = "induction_var_analysis";

    pub fn new(result: AnalysisCell<InductionAnalysisResult>) -> Self {
        InductionVarAnalysis { result }
    }

    pub fn compute(graph: &Graph) -> InductionAnalysisResult {
        let mut result = InductionAnalysisResult::default();
        for info in graph.loops() {
            let mut vars = Vec::new();
            for &inst in &graph.block(info.header).insts {
                let node = graph.inst(inst);
                if !matches!(node.kind, InstKind::Phi { .. }) || node.inputs.len() != 2 {
                    continue;
                }
                // One input comes from outside the loop, the other is the
                // in-loop update.
                let classify = |id: InstId| info.contains(graph.inst(id).block);
                let (initial, update) = match (classify(node.inputs[0]), classify(node.inputs[1]))
                {
                    (false, true) => (node.inputs[0], node.inputs[1]),
                    (true, false) => (node.inputs[1], node.inputs[0]),
                    _ => continue,
                };
                let Some(step) = Self::step_of(graph, inst, update) else {
                    continue;
                };
                let var = InductionVar { phi: inst, initial, update, step };
                vars.push(var);
                result.by_phi.insert(inst, var);
            }
            result.by_loop.push(vars);
        }
        result
    }

    /// The constant step of `update` relative to `phi`, when `update` is
    /// `phi + c` or `phi - c`.
    fn step_of(graph: &Graph, phi: InstId, update: InstId) -> Option<i64> {
        let node = graph.inst(update);
        let constant = |id: InstId| match graph.inst(id).kind {
            InstKind::IntConst(v) => Some(v),
            _ => None,
        };
        match node.kind {
            InstKind::Add => {
                if node.inputs[0] == phi {
                    constant(node.inputs[1])
                } else if node.inputs[1] == phi {
                    constant(node.inputs[0])
                } else {
                    None
                }
            }
            InstKind::Sub if node.inputs[0] == phi => constant(node.inputs[1]).map(|c| -c),
            _ => None,
        }
    }
}

impl Pass for InductionVarAnalysis {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        self.result.publish(Self::compute(graph));
        false
    }
}
