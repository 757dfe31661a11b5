//! Contract with the architecture-specific backend.
//!
//! Register allocation and instruction encoding live outside this crate;
//! the pipeline hands the backend an optimized, scheduled graph and the
//! chosen allocation strategy, and gets raw bytes plus execution metadata
//! back. A backend that cannot handle the graph returns `None`, which the
//! compiler treats as "do not compile this method".

use crate::config::{InstructionSet, RegisterAllocationStrategy};
use crate::ir::graph::Graph;
use crate::LinkerPatch;

/// Everything the backend produces for one method.
#[derive(Debug, Clone, Default)]
pub struct BackendOutput {
    pub code: Vec<u8>,
    pub stack_map: Vec<u8>,
    pub method_info: Vec<u8>,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub patches: Vec<LinkerPatch>,
}

pub trait Backend {
    /// Instruction sets this backend can emit for.
    fn supports(&self, instruction_set: InstructionSet) -> bool;

    /// Allocate registers and emit code for the optimized graph.
    fn compile(
        &mut self,
        graph: &Graph,
        strategy: RegisterAllocationStrategy,
    ) -> Option<BackendOutput>;
}
