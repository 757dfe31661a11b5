//! Pipeline orchestration.
//!
//! Runs the default dependency-ordered pass sequence, or an explicit
//! driver-supplied pass list built through the name-keyed factory. In
//! verification mode the graph checker runs after every pass and any
//! violation is fatal for the compilation unit, carrying the pass name.

use super::arch::Arm64InstructionSimplifier;
use super::bce::BoundsCheckElimination;
use super::class_guard::ClassGuardElimination;
use super::code_sinking::CodeSinking;
use super::ctor_fence::ConstructorFenceElimination;
use super::dce::Dce;
use super::gvn::Gvn;
use super::induction::InductionVarAnalysis;
use super::inliner::Inliner;
use super::licm::Licm;
use super::loop_opt::LoopOptimization;
use super::lsa::LoadStoreAnalysis;
use super::lse::LoadStoreElimination;
use super::side_effects_analysis::SideEffectsAnalysis;
use super::simplify::Simplify;
use super::{build_pass, AnalysisCell, Pass, PassContext, RecentAnalyses};
use crate::config::InstructionSet;
use crate::error::CompileError;
use crate::ir::checker::GraphChecker;
use crate::ir::graph::Graph;
use crate::scheduler::Scheduler;

/// Run the optimization pipeline over a built graph.
pub fn run_optimizations(graph: &mut Graph, ctx: &PassContext<'_>) -> Result<(), CompileError> {
    if let Some(pass_names) = &ctx.config.passes_to_run {
        // Build everything first so a bad name aborts before any pass has
        // mutated the graph.
        let mut recent = RecentAnalyses::default();
        let mut passes = Vec::with_capacity(pass_names.len());
        for name in pass_names {
            passes.push(build_pass(name, ctx, &mut recent)?);
        }
        for pass in &mut passes {
            run_pass(graph, pass.as_mut(), ctx)?;
        }
        return Ok(());
    }

    run_default_optimizations(graph, ctx)?;
    run_arch_optimizations(graph, ctx)
}

fn run_default_optimizations(
    graph: &mut Graph,
    ctx: &PassContext<'_>,
) -> Result<(), CompileError> {
    // Early canonicalization.
    run_pass(graph, &mut Simplify::new(), ctx)?;
    run_pass(graph, &mut Dce::new(), ctx)?;

    // Inlining, gated entirely by the budget.
    if ctx.config.inlining_enabled() {
        let mut inliner = Inliner::new(ctx.config, ctx.resolver, ctx.callee_provider);
        run_pass(graph, &mut inliner, ctx)?;
    }

    // Second canonicalization round over the inlined body.
    run_pass(graph, &mut Simplify::new(), ctx)?;
    run_pass(graph, &mut Dce::new(), ctx)?;

    // Side effects feed GVN, LICM and BCE; induction feeds BCE and the
    // loop transform.
    let side_effects1 = AnalysisCell::new();
    run_pass(graph, &mut SideEffectsAnalysis::new(side_effects1.clone()), ctx)?;
    run_pass(graph, &mut Gvn::new(side_effects1.clone()), ctx)?;
    run_pass(graph, &mut Licm::new(side_effects1.clone()), ctx)?;
    let induction = AnalysisCell::new();
    run_pass(graph, &mut InductionVarAnalysis::new(induction.clone()), ctx)?;
    run_pass(
        graph,
        &mut BoundsCheckElimination::new(side_effects1.clone(), induction.clone()),
        ctx,
    )?;
    run_pass(graph, &mut LoopOptimization::new(induction), ctx)?;
    run_pass(graph, &mut Simplify::new(), ctx)?;

    // A fresh side-effect instance plus alias analysis feed load/store
    // elimination.
    let side_effects2 = AnalysisCell::new();
    run_pass(graph, &mut SideEffectsAnalysis::new(side_effects2.clone()), ctx)?;
    let alias = AnalysisCell::new();
    run_pass(graph, &mut LoadStoreAnalysis::new(alias.clone()), ctx)?;
    run_pass(graph, &mut LoadStoreElimination::new(side_effects2, alias), ctx)?;

    run_pass(graph, &mut ClassGuardElimination::new(), ctx)?;
    run_pass(graph, &mut Dce::new(), ctx)?;
    run_pass(graph, &mut CodeSinking::new(), ctx)?;
    // After sinking, so a fence is not split from its object again.
    run_pass(graph, &mut ConstructorFenceElimination::new(), ctx)?;
    Ok(())
}

/// Architecture-specific passes, selected purely by instruction set.
fn run_arch_optimizations(graph: &mut Graph, ctx: &PassContext<'_>) -> Result<(), CompileError> {
    match ctx.config.instruction_set {
        InstructionSet::Arm64 => {
            run_pass(graph, &mut Arm64InstructionSimplifier::new(), ctx)?;
            let side_effects = AnalysisCell::new();
            run_pass(graph, &mut SideEffectsAnalysis::new(side_effects.clone()), ctx)?;
            run_pass(graph, &mut Gvn::new(side_effects), ctx)?;
            Scheduler::new(InstructionSet::Arm64).run(graph);
            verify(graph, "instruction_scheduler", ctx)
        }
        InstructionSet::X8664 => {
            let side_effects = AnalysisCell::new();
            run_pass(graph, &mut SideEffectsAnalysis::new(side_effects.clone()), ctx)?;
            run_pass(graph, &mut Gvn::new(side_effects), ctx)
        }
        InstructionSet::Generic => Ok(()),
    }
}

fn run_pass(
    graph: &mut Graph,
    pass: &mut (dyn Pass + '_),
    ctx: &PassContext<'_>,
) -> Result<(), CompileError> {
    let changed = pass.run(graph);
    log::trace!("pass {} {}", pass.name(), if changed { "changed the graph" } else { "no-op" });
    if changed {
        verify(graph, pass.name(), ctx)?;
    }
    Ok(())
}

fn verify(graph: &Graph, pass: &str, ctx: &PassContext<'_>) -> Result<(), CompileError> {
    if !ctx.config.verify_graph {
        return Ok(());
    }
    let errors = GraphChecker::new(graph).run();
    if errors.is_empty() {
        return Ok(());
    }
    log::error!("graph invariant violated after {pass}: {}", errors.join("; "));
    Err(CompileError::InvariantViolation {
        pass: pass.to_string(),
        detail: errors.join("; "),
    })
}
