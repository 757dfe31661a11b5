//! The optimizing compiler: one method in, one artifact out.
//!
//! Orchestrates the machine-code path: policy filters, graph building,
//! the optimization pipeline (which ends with arch passes and scheduling),
//! the external backend, and artifact assembly. Every failure is expressed
//! through [`CompileError`]; the driver decides what a given class of
//! failure means for the run.

use crate::artifact::CompiledArtifact;
use crate::backend::Backend;
use crate::capabilities::{CalleeProvider, MethodFilter, Resolver};
use crate::config::{CompilerConfig, CompilerFilter};
use crate::error::CompileError;
use crate::ir::builder::GraphBuilder;
use crate::opt::pipeline::run_optimizations;
use crate::opt::PassContext;
use sable_bytecode::BytecodeUnit;

pub struct OptimizingCompiler<'a> {
    config: &'a CompilerConfig,
}

impl<'a> OptimizingCompiler<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        OptimizingCompiler { config }
    }

    /// Compile one method to a native artifact.
    pub fn compile(
        &self,
        unit: &BytecodeUnit,
        backend: &mut dyn Backend,
        resolver: &dyn Resolver,
        filter: &dyn MethodFilter,
        callee_provider: Option<&dyn CalleeProvider>,
    ) -> Result<CompiledArtifact, CompileError> {
        // Do not attempt to compile on architectures the backend does not
        // support.
        if !backend.supports(self.config.instruction_set) {
            return Err(CompileError::UnsupportedIsa);
        }

        // Pathological-method policy belongs to the driver.
        if !filter.should_compile(unit.method()) {
            return Err(CompileError::Filtered);
        }

        // The space filter refuses code items above a fixed size.
        if self.config.filter == CompilerFilter::Space
            && unit.code_len() > self.config.space_filter_threshold
        {
            log::debug!(
                "space filter rejects {} ({} code units)",
                unit.method(),
                unit.code_len()
            );
            return Err(CompileError::Skipped);
        }

        let mut graph = GraphBuilder::new(unit, self.config, resolver).build()?;

        let ctx = PassContext { config: self.config, resolver, callee_provider };
        run_optimizations(&mut graph, &ctx)?;

        let Some(output) = backend.compile(&graph, self.config.register_allocation) else {
            log::debug!("backend produced no code for {}", unit.method());
            return Err(CompileError::UnsupportedIsa);
        };

        Ok(CompiledArtifact::native(
            unit.method(),
            output.code,
            output.stack_map,
            output.method_info,
            output.frame_size,
            output.core_spill_mask,
            output.fp_spill_mask,
            output.patches,
        ))
    }
}
