//! Load/store elimination.
//!
//! Block-local forwarding over the collected heap locations: a load whose
//! location holds a known value (from an earlier store or load) is
//! replaced; a store overwritten by a later store to the same location,
//! with nothing in between that could read or throw, is removed.

use super::lsa::HeapLocations;
use super::side_effects_analysis::SideEffectSummary;
use super::{AnalysisCell, Pass};
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind};
use rustc_hash::FxHashMap;

pub struct LoadStoreElimination {
    // The side-effect summary is the pass's contract with the pipeline;
    // the block-local scan derives kill information from the instructions
    // directly.
    #[allow(dead_code)]
    side_effects: AnalysisCell<SideEffectSummary>,
    alias: AnalysisCell<HeapLocations>,
    eliminated: usize,
}

impl LoadStoreElimination {
    pub const NAME: &'static str = "load_store_elimination";

    pub fn new(
        side_effects: AnalysisCell<SideEffectSummary>,
        alias: AnalysisCell<HeapLocations>,
    ) -> Self {
        LoadStoreElimination { side_effects, alias, eliminated: 0 }
    }

    pub fn eliminated(&self) -> usize {
        self.eliminated
    }

    fn run_with(&mut self, graph: &mut Graph, locations: &HeapLocations) -> bool {
        if locations.is_empty() {
            return false;
        }
        let mut changed = false;
        let order = graph.reverse_post_order().to_vec();
        for block in order {
            // Known value at each location, and the store that last wrote
            // it with no observer since.
            let mut known: FxHashMap<usize, InstId> = FxHashMap::default();
            let mut dead_candidate: FxHashMap<usize, InstId> = FxHashMap::default();

            for id in graph.block(block).insts.clone() {
                if graph.inst(id).is_removed() {
                    continue;
                }
                let kind = graph.inst(id).kind;
                match kind {
                    InstKind::FieldGet(f) if f.is_volatile => {
                        known.clear();
                        dead_candidate.clear();
                    }
                    InstKind::FieldGet(_) | InstKind::ArrayGet => {
                        let loc = locations.location_of(id);
                        if loc == HeapLocations::NOT_FOUND {
                            known.clear();
                            dead_candidate.clear();
                            continue;
                        }
                        // Reading a location keeps earlier stores to any
                        // aliasing location alive.
                        dead_candidate.retain(|&l, _| !locations.may_alias(l, loc));
                        if let Some(&value) = known.get(&loc) {
                            if graph.inst(value).value_type == graph.inst(id).value_type {
                                graph.replace_uses(id, value);
                                graph.remove_inst(id);
                                self.eliminated += 1;
                                changed = true;
                                continue;
                            }
                        }
                        known.insert(loc, id);
                    }
                    InstKind::FieldSet(f) => {
                        let loc = locations.location_of(id);
                        if loc == HeapLocations::NOT_FOUND || f.is_volatile {
                            known.clear();
                            dead_candidate.clear();
                            continue;
                        }
                        if let Some(&previous) = dead_candidate.get(&loc) {
                            graph.inst_mut(previous).uses.clear();
                            graph.remove_inst(previous);
                            self.eliminated += 1;
                            changed = true;
                        }
                        known.retain(|&l, _| l == loc || !locations.may_alias(l, loc));
                        let value = *graph.inst(id).inputs.last().unwrap_or(&id);
                        known.insert(loc, value);
                        dead_candidate.insert(loc, id);
                    }
                    InstKind::ArraySet => {
                        let loc = locations.location_of(id);
                        if loc == HeapLocations::NOT_FOUND {
                            known.clear();
                            dead_candidate.clear();
                            continue;
                        }
                        if let Some(&previous) = dead_candidate.get(&loc) {
                            graph.inst_mut(previous).uses.clear();
                            graph.remove_inst(previous);
                            self.eliminated += 1;
                            changed = true;
                        }
                        known.retain(|&l, _| l == loc || !locations.may_alias(l, loc));
                        let value = *graph.inst(id).inputs.last().unwrap_or(&id);
                        known.insert(loc, value);
                        dead_candidate.insert(loc, id);
                    }
                    _ => {
                        let inst = graph.inst(id);
                        // An instruction that can observe the heap (throw
                        // into a handler, call out, read) pins pending
                        // stores; an opaque write invalidates knowledge.
                        if inst.can_throw()
                            || inst.side_effects().does_any_read()
                            || matches!(kind, InstKind::Invoke(_) | InstKind::MonitorOp { .. })
                        {
                            dead_candidate.clear();
                        }
                        if inst.side_effects().does_any_write() {
                            known.clear();
                            dead_candidate.clear();
                        }
                    }
                }
            }
        }
        changed
    }
}

impl Pass for LoadStoreElimination {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let Some(locations) = self.alias.with(Clone::clone) else {
            return false;
        };
        self.run_with(graph, &locations)
    }
}
