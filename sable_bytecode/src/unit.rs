//! Method units, code blobs and try/catch tables.
//!
//! A `CodeBlob` is the physical instruction buffer. Synthetic and bridge
//! methods may point at the same blob, which is why it carries interior
//! mutability: the quickening compiler rewrites it in place while other
//! method handles still hold the `Arc`. A `BytecodeUnit` is the per-method
//! view the compiler core consumes; it is immutable for the duration of one
//! compilation and snapshots the blob contents up front.

use parking_lot::Mutex;
use std::sync::Arc;

/// Identity of a source (class) file within the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SourceFileId(pub u32);

/// Identity of one method: defining file plus method index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    pub file: SourceFileId,
    pub index: u32,
}

impl MethodRef {
    pub const fn new(file: SourceFileId, index: u32) -> Self {
        MethodRef { file, index }
    }
}

impl std::fmt::Display for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}@{}", self.index, self.file.0)
    }
}

/// Stable identity of a physical code blob, used to detect sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BlobId(pub u64);

/// A physical instruction buffer, possibly shared by several methods.
#[derive(Debug)]
pub struct CodeBlob {
    id: BlobId,
    code: Mutex<Vec<u16>>,
}

impl CodeBlob {
    pub fn new(id: BlobId, code: Vec<u16>) -> Arc<CodeBlob> {
        Arc::new(CodeBlob { id, code: Mutex::new(code) })
    }

    pub fn id(&self) -> BlobId {
        self.id
    }

    /// Length in code units.
    pub fn len(&self) -> usize {
        self.code.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.lock().is_empty()
    }

    /// Copy the current contents. One compilation takes one snapshot so it
    /// sees a stable stream regardless of concurrent quickening of other
    /// methods' views.
    pub fn snapshot(&self) -> Vec<u16> {
        self.code.lock().clone()
    }

    /// Run `f` with exclusive access to the raw units. Only the quickening
    /// compiler mutates blobs, and only under its shared-state discipline.
    pub fn with_code_mut<R>(&self, f: impl FnOnce(&mut Vec<u16>) -> R) -> R {
        f(&mut self.code.lock())
    }
}

/// One try region with its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryItem {
    /// First code unit covered, inclusive.
    pub start: u32,
    /// One past the last covered code unit.
    pub end: u32,
    /// Handler entry point, in code units.
    pub handler: u32,
    /// Caught type index; `None` is a catch-all.
    pub catch_type: Option<u16>,
}

impl TryItem {
    pub fn covers(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// Immutable per-compilation view of one method.
#[derive(Debug, Clone)]
pub struct BytecodeUnit {
    method: MethodRef,
    class_def_index: u32,
    blob: Arc<CodeBlob>,
    registers_size: u16,
    ins_size: u16,
    outs_size: u16,
    tries: Vec<TryItem>,
    is_constructor: bool,
    is_static: bool,
    /// Previously computed quicken data, present when re-deriving a table
    /// against a possibly different copy of the bytecode.
    quicken_data: Option<Vec<u8>>,
}

impl BytecodeUnit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: MethodRef,
        class_def_index: u32,
        blob: Arc<CodeBlob>,
        registers_size: u16,
        ins_size: u16,
        outs_size: u16,
        tries: Vec<TryItem>,
    ) -> BytecodeUnit {
        BytecodeUnit {
            method,
            class_def_index,
            blob,
            registers_size,
            ins_size,
            outs_size,
            tries,
            is_constructor: false,
            is_static: false,
            quicken_data: None,
        }
    }

    pub fn with_constructor_flags(mut self, is_constructor: bool, is_static: bool) -> Self {
        self.is_constructor = is_constructor;
        self.is_static = is_static;
        self
    }

    pub fn with_quicken_data(mut self, data: Vec<u8>) -> Self {
        self.quicken_data = Some(data);
        self
    }

    pub fn method(&self) -> MethodRef {
        self.method
    }

    pub fn class_def_index(&self) -> u32 {
        self.class_def_index
    }

    pub fn blob(&self) -> &Arc<CodeBlob> {
        &self.blob
    }

    pub fn registers_size(&self) -> u16 {
        self.registers_size
    }

    pub fn ins_size(&self) -> u16 {
        self.ins_size
    }

    pub fn outs_size(&self) -> u16 {
        self.outs_size
    }

    pub fn tries(&self) -> &[TryItem] {
        &self.tries
    }

    pub fn has_try_catch(&self) -> bool {
        !self.tries.is_empty()
    }

    pub fn is_constructor(&self) -> bool {
        self.is_constructor
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn quicken_data(&self) -> Option<&[u8]> {
        self.quicken_data.as_deref()
    }

    /// Code length in code units.
    pub fn code_len(&self) -> usize {
        self.blob.len()
    }

    /// Stable copy of the instruction stream for this compilation.
    pub fn code_snapshot(&self) -> Vec<u16> {
        self.blob.snapshot()
    }

    /// Try item covering `pc`, if any. The first matching entry wins,
    /// mirroring handler lookup order.
    pub fn try_item_at(&self, pc: u32) -> Option<&TryItem> {
        self.tries.iter().find(|t| t.covers(pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_with_tries(tries: Vec<TryItem>) -> BytecodeUnit {
        let blob = CodeBlob::new(BlobId(1), vec![0x0028]);
        BytecodeUnit::new(MethodRef::new(SourceFileId(0), 0), 0, blob, 1, 0, 0, tries)
    }

    #[test]
    fn test_snapshot_is_stable() {
        let blob = CodeBlob::new(BlobId(7), vec![1, 2, 3]);
        let unit =
            BytecodeUnit::new(MethodRef::new(SourceFileId(0), 4), 0, blob.clone(), 0, 0, 0, vec![]);
        let snap = unit.code_snapshot();
        blob.with_code_mut(|code| code[0] = 9);
        assert_eq!(snap, vec![1, 2, 3]);
        assert_eq!(unit.code_snapshot(), vec![9, 2, 3]);
    }

    #[test]
    fn test_try_item_lookup() {
        let unit = unit_with_tries(vec![
            TryItem { start: 0, end: 4, handler: 10, catch_type: None },
            TryItem { start: 4, end: 8, handler: 12, catch_type: Some(3) },
        ]);
        assert_eq!(unit.try_item_at(0).unwrap().handler, 10);
        assert_eq!(unit.try_item_at(5).unwrap().handler, 12);
        assert!(unit.try_item_at(8).is_none());
    }
}
