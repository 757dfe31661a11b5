//! Step 5 of graph building: type the phis and clean them up.
//!
//! Types propagate through phis to a fixed point. Phis whose inputs all
//! agree (ignoring self-references) collapse into the unique value; phis
//! with no remaining consumers are dropped. A phi that still carries
//! conflicting types into an array access cannot be compiled.

use crate::error::CompileError;
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind, ValueType};

pub struct SsaFinisher;

impl SsaFinisher {
    pub fn run(graph: &mut Graph) -> Result<(), CompileError> {
        Self::propagate_types(graph);
        Self::remove_redundant_phis(graph);
        Self::remove_dead_phis(graph);
        Self::check_array_typing(graph)
    }

    fn propagate_types(graph: &mut Graph) {
        let mut changed = true;
        while changed {
            changed = false;
            let phis: Vec<InstId> = graph
                .iter_insts()
                .filter(|(_, i)| matches!(i.kind, InstKind::Phi { .. }))
                .map(|(id, _)| id)
                .collect();
            for phi in phis {
                let mut merged = ValueType::Unknown;
                for &input in graph.inst(phi).inputs.iter() {
                    if input == phi {
                        continue;
                    }
                    merged = merged.merge(graph.inst(input).value_type);
                }
                if graph.inst(phi).value_type != merged {
                    graph.inst_mut(phi).value_type = merged;
                    changed = true;
                }
            }
        }
    }

    fn remove_redundant_phis(graph: &mut Graph) {
        let mut changed = true;
        while changed {
            changed = false;
            let phis: Vec<InstId> = graph
                .iter_insts()
                .filter(|(_, i)| matches!(i.kind, InstKind::Phi { .. }))
                .map(|(id, _)| id)
                .collect();
            for phi in phis {
                if graph.inst(phi).is_removed() {
                    continue;
                }
                let mut unique = InstId::INVALID;
                let mut redundant = true;
                for &input in graph.inst(phi).inputs.iter() {
                    if input == phi {
                        continue;
                    }
                    if unique.is_valid() && unique != input {
                        redundant = false;
                        break;
                    }
                    unique = input;
                }
                if redundant && unique.is_valid() {
                    graph.replace_uses(phi, unique);
                    graph.remove_inst(phi);
                    changed = true;
                }
            }
        }
    }

    fn remove_dead_phis(graph: &mut Graph) {
        let phis: Vec<InstId> = graph
            .iter_insts()
            .filter(|(_, i)| matches!(i.kind, InstKind::Phi { .. }))
            .map(|(id, _)| id)
            .collect();

        // A phi is live when a non-phi instruction or an environment holds
        // it; liveness propagates through phi-to-phi uses. Mutually
        // recursive phis with no other consumers stay dead.
        let mut live: rustc_hash::FxHashSet<InstId> = rustc_hash::FxHashSet::default();
        let mut worklist = Vec::new();
        for &phi in &phis {
            let inst = graph.inst(phi);
            let used_outside_phis = inst
                .uses()
                .iter()
                .any(|u| !matches!(graph.inst(u.user).kind, InstKind::Phi { .. }));
            if used_outside_phis || inst.has_env_uses() {
                live.insert(phi);
                worklist.push(phi);
            }
        }
        while let Some(phi) = worklist.pop() {
            for &input in graph.inst(phi).inputs.clone().iter() {
                if input != phi
                    && matches!(graph.inst(input).kind, InstKind::Phi { .. })
                    && live.insert(input)
                {
                    worklist.push(input);
                }
            }
        }

        for &phi in &phis {
            if live.contains(&phi) || graph.inst(phi).is_removed() {
                continue;
            }
            // Remaining uses can only come from other dead phis.
            graph.inst_mut(phi).uses.clear();
            graph.remove_inst(phi);
        }
    }

    fn check_array_typing(graph: &Graph) -> Result<(), CompileError> {
        for (_, inst) in graph.iter_insts() {
            if matches!(inst.kind, InstKind::ArrayGet | InstKind::ArraySet) {
                let array = inst.inputs[0];
                if graph.inst(array).value_type == ValueType::Conflict {
                    return Err(CompileError::AmbiguousArrayOp);
                }
            }
        }
        Ok(())
    }
}
