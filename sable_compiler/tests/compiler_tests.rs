//! End-to-end tests for the per-method compilation core: both paths from
//! bytecode to artifact, driven through a deterministic test backend.

use sable_bytecode::{
    instruction::encode, BlobId, BytecodeUnit, CodeBlob, MethodRef, Opcode, SourceFileId,
};
use sable_compiler::backend::{Backend, BackendOutput};
use sable_compiler::capabilities::{
    ArtifactInvalidator, FieldInfo, MethodFilter, NullResolver, Resolver,
};
use sable_compiler::ir::graph::Graph;
use sable_compiler::ir::node::InstKind;
use sable_compiler::quicken::{CompilationLevel, QuickenCompiler};
use sable_compiler::{
    ArtifactPayload, CompileError, CompilerConfig, CompilerFilter, InstructionSet,
    OptimizingCompiler, RegisterAllocationStrategy,
};

// =============================================================================
// Test doubles
// =============================================================================

/// Deterministic backend: encodes the scheduled graph structurally, byte
/// for byte, so artifact comparisons are meaningful.
struct EncodingBackend;

impl Backend for EncodingBackend {
    fn supports(&self, instruction_set: InstructionSet) -> bool {
        instruction_set != InstructionSet::Generic
    }

    fn compile(
        &mut self,
        graph: &Graph,
        _strategy: RegisterAllocationStrategy,
    ) -> Option<BackendOutput> {
        let mut output = BackendOutput::default();
        for &block in graph.reverse_post_order() {
            for &inst in &graph.block(block).insts {
                let node = graph.inst(inst);
                output.code.push(kind_byte(&node.kind));
                output.code.push(node.inputs.len() as u8);
                if node.can_throw() {
                    // One stack-map entry per throwing site.
                    output.stack_map.extend_from_slice(&node.pc.to_le_bytes());
                }
            }
        }
        output.frame_size = 64;
        output.core_spill_mask = 0b1100_0000;
        Some(output)
    }
}

fn kind_byte(kind: &InstKind) -> u8 {
    // Stable discriminant for encoding purposes.
    kind.debug_name().bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
}

struct EverythingFilter;

impl MethodFilter for EverythingFilter {
    fn should_compile(&self, _method: MethodRef) -> bool {
        true
    }
}

struct RejectingFilter;

impl MethodFilter for RejectingFilter {
    fn should_compile(&self, _method: MethodRef) -> bool {
        false
    }
}

struct NoopInvalidator;

impl ArtifactInvalidator for NoopInvalidator {
    fn invalidate_resolution_data(&self, _method: MethodRef) {}
}

/// Resolver with one resolvable, non-volatile field at a small offset.
struct OneFieldResolver;

impl Resolver for OneFieldResolver {
    fn resolve_instance_field(&self, field_index: u16, _is_put: bool) -> Option<FieldInfo> {
        (field_index == 1).then_some(FieldInfo { offset: 12, is_volatile: false })
    }

    fn resolve_static_field(&self, _field_index: u16, _is_put: bool) -> Option<FieldInfo> {
        None
    }

    fn resolve_virtual_method(&self, _method_index: u16) -> Option<u16> {
        None
    }

    fn is_safe_cast(&self, _method: MethodRef, _pc: u32) -> bool {
        false
    }

    fn requires_constructor_barrier(&self, _class_def_index: u32) -> bool {
        true
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn unit_with(code: Vec<u16>, registers: u16, ins: u16, blob_id: u64) -> BytecodeUnit {
    let blob = CodeBlob::new(BlobId(blob_id), code);
    BytecodeUnit::new(
        MethodRef::new(SourceFileId(1), blob_id as u32),
        0,
        blob,
        registers,
        ins,
        0,
        vec![],
    )
}

/// A small method with arithmetic, a branch and a loop:
/// `v1 = 100; while (v1 != 0) { v1 = v1 - v2 }; return v1 * v2`
fn looping_method(blob_id: u64) -> BytecodeUnit {
    let mut code = Vec::new();
    encode(&mut code, Opcode::Const16, 1, 0, 0, 100); // pc 0
    encode(&mut code, Opcode::IfEqz, 1, 0, 0, 6); // pc 2 -> 8
    encode(&mut code, Opcode::IntSub, 1, 1, 2, 0); // pc 4
    encode(&mut code, Opcode::Goto, 0, 0, 0, (-4i16) as u16); // pc 6 -> 2
    encode(&mut code, Opcode::IntMul, 0, 1, 2, 0); // pc 8
    encode(&mut code, Opcode::Return, 0, 0, 0, 0); // pc 10
    unit_with(code, 3, 1, blob_id)
}

fn config() -> CompilerConfig {
    CompilerConfig { verify_graph: true, deterministic: true, ..Default::default() }
}

// =============================================================================
// Machine-code path
// =============================================================================

#[test]
fn test_compile_produces_native_artifact() {
    let config = config();
    let unit = looping_method(1);
    let compiler = OptimizingCompiler::new(&config);
    let artifact = compiler
        .compile(&unit, &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap();
    assert!(artifact.is_native());
    let ArtifactPayload::Native { code, frame_size, .. } = artifact.payload() else {
        panic!("native payload expected");
    };
    assert!(!code.is_empty());
    assert_eq!(*frame_size, 64);
}

#[test]
fn test_compilation_is_deterministic() {
    // Same unit, same configuration, twice: byte-identical artifacts.
    let config = config();
    let compiler = OptimizingCompiler::new(&config);
    let a = compiler
        .compile(&looping_method(2), &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap();
    let b = compiler
        .compile(&looping_method(2), &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_filter_rejection_is_silent_policy() {
    let config = config();
    let compiler = OptimizingCompiler::new(&config);
    let err = compiler
        .compile(&looping_method(3), &mut EncodingBackend, &NullResolver, &RejectingFilter, None)
        .unwrap_err();
    assert_eq!(err, CompileError::Filtered);
    assert!(err.is_policy_rejection());
}

#[test]
fn test_space_filter_skips_large_methods() {
    let config = CompilerConfig {
        filter: CompilerFilter::Space,
        space_filter_threshold: 4,
        ..config()
    };
    let compiler = OptimizingCompiler::new(&config);
    let err = compiler
        .compile(&looping_method(4), &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap_err();
    assert_eq!(err, CompileError::Skipped);
}

#[test]
fn test_unsupported_isa_is_rejected_up_front() {
    let config = CompilerConfig { instruction_set: InstructionSet::Generic, ..config() };
    let compiler = OptimizingCompiler::new(&config);
    let err = compiler
        .compile(&looping_method(5), &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap_err();
    assert_eq!(err, CompileError::UnsupportedIsa);
}

#[test]
fn test_malformed_bytecode_is_a_structural_failure() {
    let mut code = Vec::new();
    encode(&mut code, Opcode::Goto, 0, 0, 0, 100);
    let unit = unit_with(code, 1, 0, 6);
    let config = config();
    let compiler = OptimizingCompiler::new(&config);
    let err = compiler
        .compile(&unit, &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidBytecode(_)));
    assert!(!err.is_policy_rejection());
}

#[test]
fn test_pass_list_override_with_unknown_name_aborts() {
    let config = CompilerConfig {
        passes_to_run: Some(vec!["gvn_but_misspelled".to_string()]),
        ..config()
    };
    let compiler = OptimizingCompiler::new(&config);
    let err = compiler
        .compile(&looping_method(7), &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap_err();
    assert!(err.is_configuration_error());
}

#[test]
fn test_x86_64_path_compiles() {
    let config = CompilerConfig { instruction_set: InstructionSet::X8664, ..config() };
    let compiler = OptimizingCompiler::new(&config);
    let artifact = compiler
        .compile(&looping_method(8), &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap();
    assert!(artifact.is_native());
}

// =============================================================================
// Quickening path
// =============================================================================

#[test]
fn test_quicken_path_yields_table_artifact() {
    // iget v0, v1, field#1 ; return-void
    let mut code = Vec::new();
    encode(&mut code, Opcode::IGet, 0, 1, 0, 1);
    encode(&mut code, Opcode::ReturnVoid, 0, 0, 0, 0);
    let unit = unit_with(code, 2, 1, 20);

    let invalidator = NoopInvalidator;
    let quicken = QuickenCompiler::new(&invalidator);
    quicken.mark_for_compilation(unit.method(), unit.blob().id());
    assert!(quicken.should_compile(unit.method()));

    let table = quicken
        .compile(&unit, &OneFieldResolver, CompilationLevel::Optimize)
        .unwrap()
        .expect("table produced");
    let artifact = sable_compiler::CompiledArtifact::quicken(unit.method(), table);
    assert!(!artifact.is_native());
}

#[test]
fn test_both_paths_coexist_for_one_method_body() {
    // The driver may quicken a method and later graph-compile the
    // quickened form; the builder understands the quick opcodes.
    let mut code = Vec::new();
    encode(&mut code, Opcode::IGet, 0, 1, 0, 1);
    encode(&mut code, Opcode::Return, 0, 0, 0, 0);
    let unit = unit_with(code, 2, 1, 21);

    let invalidator = NoopInvalidator;
    let quicken = QuickenCompiler::new(&invalidator);
    quicken
        .compile(&unit, &OneFieldResolver, CompilationLevel::Optimize)
        .unwrap()
        .expect("quickened");

    let config = config();
    let compiler = OptimizingCompiler::new(&config);
    let artifact = compiler
        .compile(&unit, &mut EncodingBackend, &NullResolver, &EverythingFilter, None)
        .unwrap();
    assert!(artifact.is_native());
}
