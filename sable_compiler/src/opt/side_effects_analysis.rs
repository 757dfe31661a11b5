//! Side-effect aggregation per block and per loop.
//!
//! Consumed by value numbering, loop-invariant code motion and bounds-check
//! elimination; the results are published through an [`AnalysisCell`] held
//! by those passes.

use super::{AnalysisCell, Pass};
use crate::ir::graph::{BlockId, Graph};
use crate::ir::side_effects::SideEffects;
use rustc_hash::FxHashMap;

/// Aggregated effects for one graph.
#[derive(Debug, Default, Clone)]
pub struct SideEffectSummary {
    block_effects: FxHashMap<BlockId, SideEffects>,
    /// Indexed by `LoopId`.
    loop_effects: Vec<SideEffects>,
}

impl SideEffectSummary {
    pub fn block_effects(&self, block: BlockId) -> SideEffects {
        self.block_effects.get(&block).copied().unwrap_or_default()
    }

    pub fn loop_effects(&self, loop_index: usize) -> SideEffects {
        self.loop_effects.get(loop_index).copied().unwrap_or_default()
    }
}

pub struct SideEffectsAnalysis {
    result: AnalysisCell<SideEffectSummary>,
}

impl SideEffectsAnalysis {
    pub const NAME: &'static str = "side_effects";

    pub fn new(result: AnalysisCell<SideEffectSummary>) -> Self {
        SideEffectsAnalysis { result }
    }

    pub fn compute(graph: &Graph) -> SideEffectSummary {
        let mut summary = SideEffectSummary::default();
        for &block in graph.reverse_post_order() {
            let mut effects = SideEffects::empty();
            for &inst in &graph.block(block).insts {
                effects |= graph.inst(inst).side_effects();
            }
            summary.block_effects.insert(block, effects);
        }
        summary.loop_effects = graph
            .loops()
            .iter()
            .map(|info| {
                let mut effects = SideEffects::empty();
                for &block in &info.blocks {
                    effects |= summary.block_effects(block);
                }
                effects
            })
            .collect();
        summary
    }
}

impl Pass for SideEffectsAnalysis {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        self.result.publish(Self::compute(graph));
        // Analyses never modify the graph.
        false
    }
}
