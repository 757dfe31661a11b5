//! Graph construction from a bytecode unit.
//!
//! Building runs in five steps, each a precondition for the next:
//!
//! 1. Partition bytecode into linked basic blocks ([`blocks`])
//! 2. Apply the size/complexity skip filter
//! 3. Compute the dominator tree and loop/try metadata
//! 4. Populate blocks with SSA instructions ([`instructions`])
//! 5. Type the phis and eliminate redundant/dead ones ([`ssa`])
//!
//! Every failure is per-method and recoverable: the driver falls back to
//! not compiling the method.

pub mod blocks;
pub mod instructions;
pub mod ssa;

use crate::capabilities::Resolver;
use crate::config::{CompilerConfig, CompilerFilter};
use crate::error::CompileError;
use crate::ir::graph::{Graph, TryCatchKind};
use blocks::BlockBuilder;
use instructions::InstructionBuilder;
use ssa::SsaFinisher;

pub struct GraphBuilder<'a> {
    unit: &'a sable_bytecode::BytecodeUnit,
    config: &'a CompilerConfig,
    resolver: &'a dyn Resolver,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        unit: &'a sable_bytecode::BytecodeUnit,
        config: &'a CompilerConfig,
        resolver: &'a dyn Resolver,
    ) -> Self {
        GraphBuilder { unit, config, resolver }
    }

    pub fn build(&self) -> Result<Graph, CompileError> {
        let code = self.unit.code_snapshot();
        if code.is_empty() {
            return Err(CompileError::InvalidBytecode("empty code item".to_string()));
        }
        if self.unit.ins_size() > self.unit.registers_size() {
            return Err(CompileError::InvalidBytecode(format!(
                "{} argument registers declared for a frame of {}",
                self.unit.ins_size(),
                self.unit.registers_size()
            )));
        }

        let mut graph = Graph::new(self.unit.method(), self.unit.registers_size());

        // 1) Create basic blocks and link them together.
        let layout = BlockBuilder::new(self.unit, &code).build(&mut graph)?;

        // 2) Decide whether to skip this method based on its code size and
        //    number of branches.
        self.check_skip(code.len(), layout.number_of_branches)?;

        // 3) Build the dominator tree and fill in loop and try/catch
        //    metadata.
        graph.build_dominator_tree();
        self.check_loop_shapes(&graph)?;

        // 4) Populate basic blocks with instructions.
        InstructionBuilder::new(self.unit, &code, &layout, self.resolver)?.build(&mut graph)?;

        // 5) Type the graph and eliminate dead/redundant phis.
        SsaFinisher::run(&mut graph)?;

        Ok(graph)
    }

    fn check_skip(&self, code_units: usize, branches: usize) -> Result<(), CompileError> {
        if self.config.filter == CompilerFilter::Everything {
            return Ok(());
        }
        if self.config.is_huge_method(code_units) {
            log::debug!(
                "skip compilation of huge method {}: {} code units",
                self.unit.method(),
                code_units
            );
            return Err(CompileError::Skipped);
        }
        // Large methods with no branches are likely machine-generated
        // initializers; the interpreter handles them fine.
        if self.config.is_large_method(code_units) && branches == 0 {
            log::debug!(
                "skip compilation of large method {} with no branches: {} code units",
                self.unit.method(),
                code_units
            );
            return Err(CompileError::Skipped);
        }
        Ok(())
    }

    /// A loop entered through its catch handler has no state the compiler
    /// can reconstruct; reject the method.
    fn check_loop_shapes(&self, graph: &Graph) -> Result<(), CompileError> {
        for info in graph.loops() {
            if graph.block(info.header).try_catch == Some(TryCatchKind::Handler) {
                return Err(CompileError::ThrowCatchLoop);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::NullResolver;
    use crate::ir::node::InstKind;
    use sable_bytecode::{
        instruction::encode, BlobId, BytecodeUnit, CodeBlob, MethodRef, Opcode, SourceFileId,
        TryItem,
    };

    fn unit_of(code: Vec<u16>, registers: u16, ins: u16) -> BytecodeUnit {
        let blob = CodeBlob::new(BlobId(1), code);
        BytecodeUnit::new(MethodRef::new(SourceFileId(0), 1), 0, blob, registers, ins, 0, vec![])
    }

    fn build(unit: &BytecodeUnit) -> Result<Graph, CompileError> {
        let config = CompilerConfig::default();
        GraphBuilder::new(unit, &config, &NullResolver).build()
    }

    /// return v1 + v0, with arguments in v0 and v1.
    fn add_method() -> BytecodeUnit {
        let mut code = Vec::new();
        encode(&mut code, Opcode::IntAdd, 0, 0, 1, 0);
        encode(&mut code, Opcode::Return, 0, 0, 0, 0);
        unit_of(code, 2, 2)
    }

    #[test]
    fn test_build_straight_line() {
        let unit = add_method();
        let graph = build(&unit).unwrap();
        let kinds: Vec<&'static str> = graph
            .iter_insts()
            .map(|(_, inst)| inst.kind.debug_name())
            .collect();
        assert!(kinds.contains(&"Param"));
        assert!(kinds.contains(&"Add"));
        assert!(kinds.contains(&"Return"));
    }

    #[test]
    fn test_branch_builds_phi() {
        // arg in v1; if v1 == 0 { v0 = 1 } else { v0 = 2 }; return v0
        let mut code = Vec::new();
        encode(&mut code, Opcode::IfEqz, 1, 0, 0, 6); // pc 0 -> pc 6
        encode(&mut code, Opcode::Const16, 0, 0, 0, 2); // pc 2
        encode(&mut code, Opcode::Goto, 0, 0, 0, 4); // pc 4 -> pc 8
        encode(&mut code, Opcode::Const16, 0, 0, 0, 1); // pc 6
        encode(&mut code, Opcode::Return, 0, 0, 0, 0); // pc 8
        let unit = unit_of(code, 2, 1);
        let graph = build(&unit).unwrap();
        let phis = graph
            .iter_insts()
            .filter(|(_, i)| matches!(i.kind, InstKind::Phi { .. }))
            .count();
        assert_eq!(phis, 1);
    }

    #[test]
    fn test_loop_gets_suspend_check_and_phi() {
        // v1 = 10; while (v1 != 0) { v1 = v1 - v2 } ; return v1
        let mut code = Vec::new();
        encode(&mut code, Opcode::Const16, 1, 0, 0, 10); // pc 0
        encode(&mut code, Opcode::IfEqz, 1, 0, 0, 6); // pc 2 -> pc 8
        encode(&mut code, Opcode::IntSub, 1, 1, 2, 0); // pc 4
        encode(&mut code, Opcode::Goto, 0, 0, 0, (-4i16) as u16); // pc 6 -> pc 2
        encode(&mut code, Opcode::Return, 1, 0, 0, 0); // pc 8
        let unit = unit_of(code, 3, 1);
        let graph = build(&unit).unwrap();
        assert!(graph.has_loops());
        assert!(graph
            .iter_insts()
            .any(|(_, i)| matches!(i.kind, InstKind::SuspendCheck)));
        assert!(graph
            .iter_insts()
            .any(|(_, i)| matches!(i.kind, InstKind::Phi { .. })));
    }

    #[test]
    fn test_uninitialized_register_is_invalid_bytecode() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::Return, 1, 0, 0, 0);
        let unit = unit_of(code, 2, 1); // argument lands in v1... v0 undefined
        // Argument is in the top register (v1); return v1 is fine. Return
        // of v0 must fail.
        let mut bad = Vec::new();
        encode(&mut bad, Opcode::IntAdd, 0, 0, 0, 0);
        encode(&mut bad, Opcode::Return, 0, 0, 0, 0);
        let bad_unit = unit_of(bad, 2, 1);
        assert!(build(&unit).is_ok());
        assert!(matches!(build(&bad_unit), Err(CompileError::InvalidBytecode(_))));
    }

    #[test]
    fn test_branch_out_of_range_is_invalid() {
        let mut code = Vec::new();
        encode(&mut code, Opcode::Goto, 0, 0, 0, 40);
        let unit = unit_of(code, 1, 0);
        assert!(matches!(build(&unit), Err(CompileError::InvalidBytecode(_))));
    }

    #[test]
    fn test_huge_method_is_skipped() {
        let mut code = Vec::new();
        for _ in 0..400 {
            encode(&mut code, Opcode::Const16, 0, 0, 0, 1);
        }
        encode(&mut code, Opcode::Return, 0, 0, 0, 0);
        let unit = unit_of(code, 1, 0);
        let config = CompilerConfig {
            huge_method_threshold: 500,
            large_method_threshold: 300,
            ..Default::default()
        };
        // Large with zero branches -> skipped.
        let result = GraphBuilder::new(&unit, &config, &NullResolver).build();
        assert_eq!(result.err(), Some(CompileError::Skipped));

        // Everything filter compiles it anyway.
        let config = CompilerConfig {
            filter: CompilerFilter::Everything,
            huge_method_threshold: 500,
            large_method_threshold: 300,
            ..Default::default()
        };
        assert!(GraphBuilder::new(&unit, &config, &NullResolver).build().is_ok());
    }

    #[test]
    fn test_try_catch_marks_blocks() {
        // try { v0 = v0 / v1 } catch { v0 = 0 }; return v0
        let mut code = Vec::new();
        encode(&mut code, Opcode::IntDiv, 0, 0, 1, 0); // pc 0 (can throw)
        encode(&mut code, Opcode::Goto, 0, 0, 0, 4); // pc 2 -> pc 6
        encode(&mut code, Opcode::Const16, 0, 0, 0, 0); // pc 4 (handler)
        encode(&mut code, Opcode::Return, 0, 0, 0, 0); // pc 6
        let blob = CodeBlob::new(BlobId(2), code);
        let unit = BytecodeUnit::new(
            MethodRef::new(SourceFileId(0), 2),
            0,
            blob,
            2,
            2,
            0,
            vec![TryItem { start: 0, end: 4, handler: 4, catch_type: None }],
        );
        let graph = build(&unit).unwrap();
        assert!(graph.has_try_catch());
        assert!(graph
            .iter_insts()
            .any(|(_, i)| matches!(i.kind, InstKind::TryBoundary { .. })));
    }
}
