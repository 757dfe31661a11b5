//! Compiled artifacts: the output of either compilation path.
//!
//! A native artifact carries raw machine code plus everything the runtime
//! needs to execute it safely and deoptimize out of it; a quicken artifact
//! carries only the encoded table. Both are immutable once built and keyed
//! by method identity. Storage and deduplication live outside this crate;
//! publication must be treated as atomic and idempotent there.

use sable_bytecode::MethodRef;

/// What a link-time patch refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    MethodCall,
    TypeReference,
    StringReference,
}

/// One link-time patch: where in the code, and what to resolve into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkerPatch {
    pub kind: PatchKind,
    /// Offset of the literal within the code blob.
    pub literal_offset: u32,
    /// Index of the referenced entity in its pool.
    pub target_index: u32,
}

/// Payload of a compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPayload {
    Native {
        code: Vec<u8>,
        /// PC to source-state mapping for deoptimization and GC.
        stack_map: Vec<u8>,
        method_info: Vec<u8>,
        frame_size: u32,
        core_spill_mask: u32,
        fp_spill_mask: u32,
        /// Ordered by literal offset.
        patches: Vec<LinkerPatch>,
    },
    Quicken {
        /// Length-prefixed flat table of 16-bit indices.
        table: Vec<u8>,
    },
}

/// Final output of one method compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    method: MethodRef,
    payload: ArtifactPayload,
}

impl CompiledArtifact {
    pub fn native(
        method: MethodRef,
        code: Vec<u8>,
        stack_map: Vec<u8>,
        method_info: Vec<u8>,
        frame_size: u32,
        core_spill_mask: u32,
        fp_spill_mask: u32,
        mut patches: Vec<LinkerPatch>,
    ) -> CompiledArtifact {
        // The artifact encoding requires patches sorted by literal offset.
        patches.sort_by_key(|p| p.literal_offset);
        CompiledArtifact {
            method,
            payload: ArtifactPayload::Native {
                code,
                stack_map,
                method_info,
                frame_size,
                core_spill_mask,
                fp_spill_mask,
                patches,
            },
        }
    }

    pub fn quicken(method: MethodRef, table: Vec<u8>) -> CompiledArtifact {
        CompiledArtifact { method, payload: ArtifactPayload::Quicken { table } }
    }

    pub fn method(&self) -> MethodRef {
        self.method
    }

    pub fn payload(&self) -> &ArtifactPayload {
        &self.payload
    }

    pub fn is_native(&self) -> bool {
        matches!(self.payload, ArtifactPayload::Native { .. })
    }
}
