//! Method inlining.
//!
//! Budgeted by `inline_max_code_units`; a zero budget means the pass is
//! never even registered. Candidates come from the driver's
//! [`CalleeProvider`]; only small, single-block, non-throwing callees are
//! grafted, which keeps environments and exception edges untouched in the
//! caller. Inlining is deliberately conservative: a rejected candidate is
//! simply a call that stays a call.

use super::Pass;
use crate::capabilities::{CalleeProvider, Resolver};
use crate::config::CompilerConfig;
use crate::ir::builder::GraphBuilder;
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind, InvokeKind};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

pub struct Inliner<'a> {
    config: &'a CompilerConfig,
    resolver: &'a dyn Resolver,
    callee_provider: Option<&'a dyn CalleeProvider>,
    /// Code units grafted so far; counts against the budget.
    inlined_code_units: usize,
    inlined: usize,
}

impl<'a> Inliner<'a> {
    pub const NAME: &'static str = "inliner";

    pub fn new(
        config: &'a CompilerConfig,
        resolver: &'a dyn Resolver,
        callee_provider: Option<&'a dyn CalleeProvider>,
    ) -> Self {
        Inliner {
            config,
            resolver,
            callee_provider,
            inlined_code_units: 0,
            inlined: 0,
        }
    }

    pub fn inlined(&self) -> usize {
        self.inlined
    }

    /// The callee's single value-producing block, when its whole body is
    /// params, pure computation and one `Return`/`ReturnVoid`.
    fn graftable_body(callee: &Graph) -> Option<Vec<InstId>> {
        let mut body = None;
        for &block in callee.reverse_post_order() {
            if block == callee.entry() {
                continue;
            }
            if body.is_some() {
                return None;
            }
            body = Some(block);
        }
        let body = body?;
        let insts = &callee.block(body).insts;
        for &inst in insts {
            match callee.inst(inst).kind {
                InstKind::Return | InstKind::ReturnVoid => {}
                ref kind if kind.is_pure() => {}
                _ => return None,
            }
        }
        Some(insts.clone())
    }

    fn try_inline(&mut self, graph: &mut Graph, call: InstId) -> bool {
        let InstKind::Invoke(InvokeKind::Static { method_index }) = graph.inst(call).kind else {
            return false;
        };
        let Some(provider) = self.callee_provider else {
            return false;
        };
        let Some(unit) = provider.callee(method_index) else {
            // Resolution miss: the site stays a slow call.
            return false;
        };
        let code_units = unit.code_len();
        if unit.has_try_catch()
            || self.inlined_code_units + code_units > self.config.inline_max_code_units
        {
            return false;
        }

        let callee = match GraphBuilder::new(&unit, self.config, self.resolver).build() {
            Ok(callee) => callee,
            Err(_) => return false,
        };
        let Some(body) = Self::graftable_body(&callee) else {
            return false;
        };

        // Map callee params to call arguments, then clone the body in
        // order right before the call site.
        let mut mapping: FxHashMap<InstId, InstId> = FxHashMap::default();
        for (id, inst) in callee.iter_insts() {
            if let InstKind::Param(index) = inst.kind {
                let Some(&arg) = graph.inst(call).inputs.get(index as usize) else {
                    return false;
                };
                mapping.insert(id, arg);
            }
        }

        let mut returned = InstId::INVALID;
        for inst in body {
            let node = callee.inst(inst);
            match node.kind {
                InstKind::Return => {
                    returned = mapping.get(&node.inputs[0]).copied().unwrap_or(InstId::INVALID);
                }
                InstKind::ReturnVoid => {}
                kind => {
                    let inputs: Option<SmallVec<[InstId; 2]>> = node
                        .inputs
                        .iter()
                        .map(|i| mapping.get(i).copied())
                        .collect();
                    let Some(inputs) = inputs else {
                        return false;
                    };
                    let pc = graph.inst(call).pc;
                    let clone = graph.add_inst(kind, inputs, node.value_type, pc);
                    graph.insert_before(call, clone);
                    mapping.insert(inst, clone);
                }
            }
        }

        if graph.inst(call).has_uses() {
            if !returned.is_valid() {
                return false;
            }
            graph.replace_uses(call, returned);
        }
        graph.remove_inst(call);
        self.inlined_code_units += code_units;
        self.inlined += 1;
        log::debug!("inlined m{method_index} ({code_units} code units)");
        true
    }
}

impl<'a> Pass for Inliner<'a> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        if !self.config.inlining_enabled() {
            return false;
        }
        let calls: Vec<InstId> = graph
            .iter_insts()
            .filter(|(_, inst)| {
                matches!(inst.kind, InstKind::Invoke(InvokeKind::Static { .. }))
            })
            .map(|(id, _)| id)
            .collect();
        let mut changed = false;
        for call in calls {
            if self.try_inline(graph, call) {
                changed = true;
            }
        }
        changed
    }
}
