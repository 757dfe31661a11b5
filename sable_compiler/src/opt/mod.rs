//! Optimization passes over the graph IR.
//!
//! Passes implement [`Pass`] and mutate the graph in place; a pass that
//! cannot make progress is a no-op, never an error. Analyses publish their
//! results through [`AnalysisCell`]s that consumer passes receive at
//! construction time, so the "requires the most recent instance of
//! analysis X" coupling is an explicit constructor parameter.
//!
//! [`build_pass`] is the name-keyed factory used when the driver overrides
//! the default pipeline with an explicit pass list. It threads the most
//! recent analysis instances exactly as encountered and fails fast on an
//! unknown name or a transform whose analysis never ran.

pub mod arch;
pub mod bce;
pub mod class_guard;
pub mod code_sinking;
pub mod ctor_fence;
pub mod dce;
pub mod gvn;
pub mod induction;
pub mod inliner;
pub mod licm;
pub mod loop_opt;
pub mod lsa;
pub mod lse;
pub mod pipeline;
pub mod side_effects_analysis;
pub mod simplify;

use crate::capabilities::{CalleeProvider, Resolver};
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::ir::graph::Graph;
use std::cell::RefCell;
use std::rc::Rc;

pub use induction::InductionAnalysisResult;
pub use lsa::HeapLocations;
pub use side_effects_analysis::SideEffectSummary;

/// A single optimization pass.
pub trait Pass {
    /// Name of this pass, for diagnostics and the pass-list override.
    fn name(&self) -> &'static str;

    /// Run the pass. Returns true if the graph was modified.
    fn run(&mut self, graph: &mut Graph) -> bool;
}

/// Shared slot an analysis pass fills and later passes read. One cell per
/// analysis instance; re-running the analysis refreshes the slot.
pub struct AnalysisCell<T>(Rc<RefCell<Option<T>>>);

impl<T> AnalysisCell<T> {
    pub fn new() -> Self {
        AnalysisCell(Rc::new(RefCell::new(None)))
    }

    pub fn publish(&self, value: T) {
        *self.0.borrow_mut() = Some(value);
    }

    /// Read the published result, if the analysis has run.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.0.borrow().as_ref().map(f)
    }

    pub fn is_published(&self) -> bool {
        self.0.borrow().is_some()
    }
}

impl<T> Clone for AnalysisCell<T> {
    fn clone(&self) -> Self {
        AnalysisCell(Rc::clone(&self.0))
    }
}

impl<T> Default for AnalysisCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a pass constructor may need from the surrounding compilation.
pub struct PassContext<'a> {
    pub config: &'a CompilerConfig,
    pub resolver: &'a dyn Resolver,
    pub callee_provider: Option<&'a dyn CalleeProvider>,
}

/// Most-recent analysis instances while walking a pass-name list.
#[derive(Default)]
pub struct RecentAnalyses {
    pub side_effects: Option<AnalysisCell<SideEffectSummary>>,
    pub induction: Option<AnalysisCell<InductionAnalysisResult>>,
    pub alias: Option<AnalysisCell<HeapLocations>>,
}

/// Strip an instance suffix ("dead_code_elimination$final") down to the
/// optimization name.
fn optimization_name(pass_name: &str) -> &str {
    pass_name.split('$').next().unwrap_or(pass_name)
}

/// Build one pass by name, threading the most recent analyses.
pub fn build_pass<'a>(
    pass_name: &str,
    ctx: &PassContext<'a>,
    recent: &mut RecentAnalyses,
) -> Result<Box<dyn Pass + 'a>, CompileError> {
    let name = optimization_name(pass_name);
    let pass: Box<dyn Pass + 'a> = match name {
        simplify::Simplify::NAME => Box::new(simplify::Simplify::new()),
        dce::Dce::NAME => Box::new(dce::Dce::new()),
        inliner::Inliner::NAME => Box::new(inliner::Inliner::new(
            ctx.config,
            ctx.resolver,
            ctx.callee_provider,
        )),
        side_effects_analysis::SideEffectsAnalysis::NAME => {
            let cell = AnalysisCell::new();
            recent.side_effects = Some(cell.clone());
            Box::new(side_effects_analysis::SideEffectsAnalysis::new(cell))
        }
        gvn::Gvn::NAME => {
            let side_effects = recent.side_effects.clone().ok_or(
                CompileError::MissingAnalysis {
                    pass: gvn::Gvn::NAME,
                    analysis: side_effects_analysis::SideEffectsAnalysis::NAME,
                },
            )?;
            Box::new(gvn::Gvn::new(side_effects))
        }
        licm::Licm::NAME => {
            let side_effects = recent.side_effects.clone().ok_or(
                CompileError::MissingAnalysis {
                    pass: licm::Licm::NAME,
                    analysis: side_effects_analysis::SideEffectsAnalysis::NAME,
                },
            )?;
            Box::new(licm::Licm::new(side_effects))
        }
        induction::InductionVarAnalysis::NAME => {
            let cell = AnalysisCell::new();
            recent.induction = Some(cell.clone());
            Box::new(induction::InductionVarAnalysis::new(cell))
        }
        bce::BoundsCheckElimination::NAME => {
            let side_effects = recent.side_effects.clone().ok_or(
                CompileError::MissingAnalysis {
                    pass: bce::BoundsCheckElimination::NAME,
                    analysis: side_effects_analysis::SideEffectsAnalysis::NAME,
                },
            )?;
            let induction = recent.induction.clone().ok_or(CompileError::MissingAnalysis {
                pass: bce::BoundsCheckElimination::NAME,
                analysis: induction::InductionVarAnalysis::NAME,
            })?;
            Box::new(bce::BoundsCheckElimination::new(side_effects, induction))
        }
        loop_opt::LoopOptimization::NAME => {
            let induction = recent.induction.clone().ok_or(CompileError::MissingAnalysis {
                pass: loop_opt::LoopOptimization::NAME,
                analysis: induction::InductionVarAnalysis::NAME,
            })?;
            Box::new(loop_opt::LoopOptimization::new(induction))
        }
        lsa::LoadStoreAnalysis::NAME => {
            let cell = AnalysisCell::new();
            recent.alias = Some(cell.clone());
            Box::new(lsa::LoadStoreAnalysis::new(cell))
        }
        lse::LoadStoreElimination::NAME => {
            let side_effects = recent.side_effects.clone().ok_or(
                CompileError::MissingAnalysis {
                    pass: lse::LoadStoreElimination::NAME,
                    analysis: side_effects_analysis::SideEffectsAnalysis::NAME,
                },
            )?;
            let alias = recent.alias.clone().ok_or(CompileError::MissingAnalysis {
                pass: lse::LoadStoreElimination::NAME,
                analysis: lsa::LoadStoreAnalysis::NAME,
            })?;
            Box::new(lse::LoadStoreElimination::new(side_effects, alias))
        }
        class_guard::ClassGuardElimination::NAME => {
            Box::new(class_guard::ClassGuardElimination::new())
        }
        code_sinking::CodeSinking::NAME => Box::new(code_sinking::CodeSinking::new()),
        ctor_fence::ConstructorFenceElimination::NAME => {
            Box::new(ctor_fence::ConstructorFenceElimination::new())
        }
        arch::Arm64InstructionSimplifier::NAME => {
            Box::new(arch::Arm64InstructionSimplifier::new())
        }
        _ => return Err(CompileError::UnknownPass(pass_name.to_string())),
    };
    Ok(pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::NullResolver;

    fn ctx(config: &CompilerConfig) -> PassContext<'_> {
        PassContext { config, resolver: &NullResolver, callee_provider: None }
    }

    #[test]
    fn test_unknown_pass_is_a_configuration_error() {
        let config = CompilerConfig::default();
        let mut recent = RecentAnalyses::default();
        let err = build_pass("no_such_pass", &ctx(&config), &mut recent).err();
        assert!(matches!(err, Some(CompileError::UnknownPass(_))));
    }

    #[test]
    fn test_transform_without_analysis_fails_fast() {
        let config = CompilerConfig::default();
        let mut recent = RecentAnalyses::default();
        let err = build_pass("gvn", &ctx(&config), &mut recent).err();
        assert!(matches!(err, Some(CompileError::MissingAnalysis { .. })));
    }

    #[test]
    fn test_analysis_then_transform_builds() {
        let config = CompilerConfig::default();
        let mut recent = RecentAnalyses::default();
        build_pass("side_effects", &ctx(&config), &mut recent).unwrap();
        assert!(build_pass("gvn", &ctx(&config), &mut recent).is_ok());
    }

    #[test]
    fn test_instance_suffix_is_stripped() {
        let config = CompilerConfig::default();
        let mut recent = RecentAnalyses::default();
        assert!(build_pass("dead_code_elimination$final", &ctx(&config), &mut recent).is_ok());
    }
}
