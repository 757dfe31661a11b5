//! Bytecode quickening: rewriting slow, resolution-dependent opcodes into
//! fast pre-resolved forms, in place.
//!
//! Two modes share one walk. *Fresh* mode mutates the blob and records one
//! quicken entry per rewritten site (plus one per `Nop`). *Replay* mode,
//! used when a table already exists, mutates nothing but consumes entries
//! positionally to regenerate a byte-identical table against the current
//! copy of the bytecode.
//!
//! Synthetic and bridge methods may share one physical blob. The first
//! method to quicken a shared blob publishes its table; every later method
//! must derive exactly the same bytes. On mismatch the blob is reverted
//! from the recorded table, blacklisted forever, and every sharer's
//! published artifact has its resolution metadata invalidated. All
//! shared-blob bookkeeping sits behind a single mutex held for the whole
//! compilation of a method on a shared blob; methods on private blobs take
//! no lock.

pub mod decompiler;

use crate::capabilities::{ArtifactInvalidator, Resolver};
use crate::error::CompileError;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use sable_bytecode::{
    instruction, BlobId, BytecodeUnit, InstRef, MethodRef, Opcode, QuickenTable,
    QuickenTableBuilder, NO_INDEX,
};

/// Controls quickening activation.
const ENABLE_QUICKENING: bool = true;
/// Controls check-cast elision.
const ENABLE_CHECK_CAST_ELISION: bool = true;

/// How far the quickening path may go for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationLevel {
    /// Skip the method entirely.
    DontQuicken,
    /// Perform the peephole rewrites.
    Optimize,
}

/// Published table for one shared blob.
#[derive(Debug, Default, Clone)]
struct QuickenState {
    methods: Vec<MethodRef>,
    quicken_data: Vec<u8>,
}

#[derive(Default)]
struct SharedBlobState {
    /// Methods marked for quickening.
    marked: FxHashSet<MethodRef>,
    /// Blobs seen at mark time; a second sighting makes a blob shared.
    seen_blobs: FxHashSet<BlobId>,
    shared_blobs: FxHashSet<BlobId>,
    /// Blobs that hit a table mismatch; never quickened again.
    blacklisted_blobs: FxHashSet<BlobId>,
    tables: FxHashMap<BlobId, QuickenState>,
}

pub struct QuickenCompiler<'a> {
    invalidator: &'a dyn ArtifactInvalidator,
    state: Mutex<SharedBlobState>,
}

impl<'a> QuickenCompiler<'a> {
    pub fn new(invalidator: &'a dyn ArtifactInvalidator) -> Self {
        QuickenCompiler { invalidator, state: Mutex::new(SharedBlobState::default()) }
    }

    /// Record intent to quicken `method` and detect blob sharing. Called
    /// for every candidate before the compile phase begins.
    pub fn mark_for_compilation(&self, method: MethodRef, blob: BlobId) {
        let mut state = self.state.lock();
        state.marked.insert(method);
        if !state.seen_blobs.insert(blob) {
            state.shared_blobs.insert(blob);
        }
    }

    pub fn should_compile(&self, method: MethodRef) -> bool {
        self.state.lock().marked.contains(&method)
    }

    pub fn num_unique_blobs(&self) -> usize {
        self.state.lock().seen_blobs.len()
    }

    /// Compile one method. `Ok(None)` means no artifact: nothing to
    /// quicken, a blacklisted blob, or a freshly detected conflict. All
    /// of those are success for the surrounding run.
    pub fn compile(
        &self,
        unit: &BytecodeUnit,
        resolver: &dyn Resolver,
        level: CompilationLevel,
    ) -> Result<Option<Vec<u8>>, CompileError> {
        if level == CompilationLevel::DontQuicken {
            return Ok(None);
        }
        let blob = unit.blob().id();
        let is_shared = self.state.lock().shared_blobs.contains(&blob);

        let quicken_data = if is_shared {
            // Serialize every quickening attempt on this blob.
            let mut state = self.state.lock();
            if state.blacklisted_blobs.contains(&blob) {
                return Ok(None);
            }
            let existing = state.tables.get(&blob).map(|s| s.quicken_data.clone());
            let quicken_data =
                CompilationState::new(unit, resolver, existing.as_deref()).compile()?;

            match existing {
                Some(published) => {
                    if published != quicken_data {
                        log::debug!(
                            "quicken data mismatch on shared blob {blob:?}, reverting {}",
                            unit.method()
                        );
                        self.revert_and_blacklist(&mut state, unit, blob)?;
                        return Ok(None);
                    }
                    if let Some(entry) = state.tables.get_mut(&blob) {
                        entry.methods.push(unit.method());
                    }
                }
                None => {
                    let new_state = QuickenState {
                        methods: vec![unit.method()],
                        quicken_data: quicken_data.clone(),
                    };
                    state.tables.insert(blob, new_state);
                }
            }

            // Re-derive the table against the rewritten blob; this must be
            // under the lock since another thread may revert concurrently.
            if cfg!(debug_assertions) {
                let replayed =
                    CompilationState::new(unit, resolver, Some(&quicken_data)).compile()?;
                debug_assert_eq!(replayed, quicken_data, "replay produced different table");
            }
            quicken_data
        } else {
            // A unit may carry previously computed quicken data, in which
            // case this is a pure replay over the current bytecode copy.
            let quicken_data =
                CompilationState::new(unit, resolver, unit.quicken_data()).compile()?;
            if cfg!(debug_assertions) && unit.quicken_data().is_none() {
                let replayed =
                    CompilationState::new(unit, resolver, Some(&quicken_data)).compile()?;
                debug_assert_eq!(replayed, quicken_data, "replay produced different table");
            }
            quicken_data
        };

        if quicken_data.is_empty() {
            return Ok(None);
        }
        Ok(Some(quicken_data))
    }

    /// Undo the published rewrites, poison the blob, and drop every
    /// sharer's fast-path resolution metadata.
    fn revert_and_blacklist(
        &self,
        state: &mut SharedBlobState,
        unit: &BytecodeUnit,
        blob: BlobId,
    ) -> Result<(), CompileError> {
        let Some(existing) = state.tables.remove(&blob) else {
            return Ok(());
        };
        unit.blob().with_code_mut(|code| {
            let table = QuickenTable::new(&existing.quicken_data);
            decompiler::decompile(code, &table, /* decompile_return_void= */ false)
        })?;
        for method in &existing.methods {
            self.invalidator.invalidate_resolution_data(*method);
        }
        state.blacklisted_blobs.insert(blob);
        Ok(())
    }
}

/// One quickened site: bytecode offset plus the index to preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QuickenedInfo {
    pc: u32,
    index: u16,
}

/// State for compiling a single method.
struct CompilationState<'a> {
    unit: &'a BytecodeUnit,
    resolver: &'a dyn Resolver,
    already_quickened: bool,
    existing: Vec<u16>,
    quicken_index: usize,
    quickened_info: Vec<QuickenedInfo>,
}

impl<'a> CompilationState<'a> {
    fn new(
        unit: &'a BytecodeUnit,
        resolver: &'a dyn Resolver,
        quicken_data: Option<&[u8]>,
    ) -> Self {
        let existing = quicken_data
            .map(|data| {
                let table = QuickenTable::new(data);
                (0..table.num_indices() as usize).map(|i| table.get(i)).collect()
            })
            .unwrap_or_default();
        CompilationState {
            unit,
            resolver,
            already_quickened: quicken_data.is_some(),
            existing,
            quicken_index: 0,
            quickened_info: Vec::new(),
        }
    }

    /// Consume the next replay entry.
    fn next_index(&mut self) -> Result<u16, CompileError> {
        debug_assert!(self.already_quickened);
        if self.quicken_index >= self.existing.len() {
            return Err(CompileError::InvariantViolation {
                pass: "quicken".to_string(),
                detail: format!(
                    "mismatched number of quicken slots in {}",
                    self.unit.method()
                ),
            });
        }
        let index = self.existing[self.quicken_index];
        self.quicken_index += 1;
        Ok(index)
    }

    /// The dequickened index if the instruction is quickened, otherwise
    /// the index from the stream.
    fn index_for_instruction(&mut self, inst: &InstRef) -> Result<u16, CompileError> {
        if self.already_quickened && inst.opcode.is_quickened() {
            return self.next_index();
        }
        debug_assert!(!inst.opcode.is_quickened());
        Ok(inst.imm)
    }

    /// Walk the stream once; returns the encoded table (empty when there
    /// was nothing to quicken).
    fn compile(mut self) -> Result<Vec<u8>, CompileError> {
        let blob = std::sync::Arc::clone(self.unit.blob());
        blob.with_code_mut(|code| self.walk(code))?;

        if self.already_quickened && self.quicken_index != self.existing.len() {
            return Err(CompileError::InvariantViolation {
                pass: "quicken".to_string(),
                detail: format!(
                    "{} quicken slots left unconsumed in {}",
                    self.existing.len() - self.quicken_index,
                    self.unit.method()
                ),
            });
        }
        if self.quickened_info.is_empty() {
            return Ok(Vec::new());
        }

        if cfg!(debug_assertions) {
            // The entry count must line up with the sites a reader will
            // visit, or positional replay is broken.
            let sites = self.unit.blob().with_code_mut(|code| {
                let mut count = 0;
                let mut pc = 0u32;
                while (pc as usize) < code.len() {
                    let inst = InstRef::decode(code, pc).map_err(|e| {
                        CompileError::InvalidBytecode(e.to_string())
                    })?;
                    if inst.opcode.needs_quicken_index() {
                        count += 1;
                    }
                    pc += inst.width() as u32;
                }
                Ok::<usize, CompileError>(count)
            })?;
            debug_assert_eq!(sites, self.quickened_info.len());
        }

        let mut data = Vec::new();
        let mut builder = QuickenTableBuilder::new(&mut data, self.quickened_info.len());
        for info in &self.quickened_info {
            builder.add_index(info.index);
        }
        Ok(data)
    }

    fn walk(&mut self, code: &mut Vec<u16>) -> Result<(), CompileError> {
        let mut pc = 0u32;
        while (pc as usize) < code.len() {
            let inst = InstRef::decode(code, pc)
                .map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
            let mut advance = inst.width() as u32;

            match inst.opcode {
                Opcode::ReturnVoid => self.compile_return_void(code, &inst),

                Opcode::CheckCast => {
                    self.compile_check_cast(code, &inst);
                }

                Opcode::IGet | Opcode::IGetQuick => {
                    self.compile_instance_field_access(code, &inst, Opcode::IGetQuick, false)?;
                }
                Opcode::IGetWide | Opcode::IGetWideQuick => {
                    self.compile_instance_field_access(
                        code,
                        &inst,
                        Opcode::IGetWideQuick,
                        false,
                    )?;
                }
                Opcode::IGetObject | Opcode::IGetObjectQuick => {
                    self.compile_instance_field_access(
                        code,
                        &inst,
                        Opcode::IGetObjectQuick,
                        false,
                    )?;
                }
                Opcode::IPut | Opcode::IPutQuick => {
                    self.compile_instance_field_access(code, &inst, Opcode::IPutQuick, true)?;
                }
                Opcode::IPutWide | Opcode::IPutWideQuick => {
                    self.compile_instance_field_access(
                        code,
                        &inst,
                        Opcode::IPutWideQuick,
                        true,
                    )?;
                }
                Opcode::IPutObject | Opcode::IPutObjectQuick => {
                    self.compile_instance_field_access(
                        code,
                        &inst,
                        Opcode::IPutObjectQuick,
                        true,
                    )?;
                }

                Opcode::InvokeVirtual | Opcode::InvokeVirtualQuick => {
                    self.compile_invoke_virtual(code, &inst)?;
                }

                Opcode::Nop => {
                    if self.already_quickened {
                        let reference_index = self.next_index()?;
                        self.record(pc, reference_index);
                        if reference_index != NO_INDEX {
                            // An elided check-cast: consume the type entry
                            // and skip the second half.
                            let type_index = self.next_index()?;
                            if self.resolver.is_safe_cast(self.unit.method(), pc) {
                                self.record(pc, type_index);
                            }
                            advance += 1;
                        }
                    } else {
                        // Distinguish a pre-existing nop from an elided
                        // check-cast on the reader side.
                        self.record(pc, NO_INDEX);
                    }
                }

                _ => {}
            }

            pc += advance;
        }
        Ok(())
    }

    fn record(&mut self, pc: u32, index: u16) {
        self.quickened_info.push(QuickenedInfo { pc, index });
    }

    /// Replace `return-void` with the barrier-free variant unless this is
    /// a constructor that must publish its final fields first.
    fn compile_return_void(&mut self, code: &mut [u16], inst: &InstRef) {
        if self.unit.is_constructor()
            && !self.unit.is_static()
            && self
                .resolver
                .requires_constructor_barrier(self.unit.class_def_index())
        {
            return;
        }
        log::trace!(
            "replacing return-void by return-void-no-barrier at pc {:#x} in {}",
            inst.pc,
            self.unit.method()
        );
        if !self.already_quickened {
            instruction::set_opcode(code, inst.pc, Opcode::ReturnVoidNoBarrier);
        }
    }

    /// Elide a provably safe cast into two nops, recording the operand
    /// register and the type index so the rewrite stays reversible.
    fn compile_check_cast(&mut self, code: &mut [u16], inst: &InstRef) {
        if !ENABLE_CHECK_CAST_ELISION {
            return;
        }
        if !self.resolver.is_safe_cast(self.unit.method(), inst.pc) {
            return;
        }
        log::trace!(
            "removing check-cast at pc {:#x} in {}",
            inst.pc,
            self.unit.method()
        );
        // Two entries per elided cast; both halves of the instruction
        // become independent nops.
        if !self.already_quickened {
            self.record(inst.pc, inst.reg_a as u16);
            self.record(inst.pc, inst.imm);
            instruction::set_unit(code, inst.pc as usize, Opcode::Nop, 0);
            instruction::set_unit(code, inst.pc as usize + 1, Opcode::Nop, 0);
        }
    }

    fn compile_instance_field_access(
        &mut self,
        code: &mut [u16],
        inst: &InstRef,
        new_opcode: Opcode,
        is_put: bool,
    ) -> Result<(), CompileError> {
        if !ENABLE_QUICKENING {
            return Ok(());
        }
        let field_index = self.index_for_instruction(inst)?;
        let Some(info) = self.resolver.resolve_instance_field(field_index, is_put) else {
            return Ok(());
        };
        if info.is_volatile || info.offset > u16::MAX as u32 {
            return Ok(());
        }
        log::trace!(
            "quickening {} to {} (field {} -> offset {}) at pc {:#x} in {}",
            inst.opcode,
            new_opcode,
            field_index,
            info.offset,
            inst.pc,
            self.unit.method()
        );
        if !self.already_quickened {
            instruction::set_opcode(code, inst.pc, new_opcode);
            instruction::set_index(code, inst, info.offset as u16);
        }
        self.record(inst.pc, field_index);
        Ok(())
    }

    fn compile_invoke_virtual(
        &mut self,
        code: &mut [u16],
        inst: &InstRef,
    ) -> Result<(), CompileError> {
        if !ENABLE_QUICKENING {
            return Ok(());
        }
        let method_index = self.index_for_instruction(inst)?;
        let Some(vtable_index) = self.resolver.resolve_virtual_method(method_index) else {
            // Resolution miss: leave the call unquickened.
            return Ok(());
        };
        log::trace!(
            "quickening {} (method {} -> vtable {}) at pc {:#x} in {}",
            inst.opcode,
            method_index,
            vtable_index,
            inst.pc,
            self.unit.method()
        );
        if !self.already_quickened {
            instruction::set_opcode(code, inst.pc, Opcode::InvokeVirtualQuick);
            instruction::set_index(code, inst, vtable_index);
        }
        self.record(inst.pc, method_index);
        Ok(())
    }
}
