//! Capabilities supplied by external collaborators.
//!
//! Every resolution query may transiently fail: a `None` means "not yet
//! resolved", which callers treat as a normal per-site miss, never as an
//! error and never as something to block on. These traits are handed in by
//! the driver at call sites, keeping the seams visible and testable.

use sable_bytecode::{BytecodeUnit, MethodRef};

/// Resolved layout information for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Byte offset of the field within its object.
    pub offset: u32,
    pub is_volatile: bool,
}

/// Symbol resolution, supplied by the runtime's class linker.
pub trait Resolver {
    /// Resolve an instance field for a get or put at the given site.
    fn resolve_instance_field(&self, field_index: u16, is_put: bool) -> Option<FieldInfo>;

    /// Resolve a static field.
    fn resolve_static_field(&self, field_index: u16, is_put: bool) -> Option<FieldInfo>;

    /// Resolve a virtual call target to its vtable slot.
    fn resolve_virtual_method(&self, method_index: u16) -> Option<u16>;

    /// Whether the cast at `pc` in `method` is provably safe, allowing the
    /// type check to be elided.
    fn is_safe_cast(&self, method: MethodRef, pc: u32) -> bool;

    /// Whether constructors of this class need a memory-visibility barrier
    /// before returning.
    fn requires_constructor_barrier(&self, class_def_index: u32) -> bool;
}

/// Supplies bytecode for inline candidates.
pub trait CalleeProvider {
    fn callee(&self, method_index: u16) -> Option<BytecodeUnit>;
}

/// Pathological-method policy: "is this method worth compiling at all".
pub trait MethodFilter {
    fn should_compile(&self, method: MethodRef) -> bool;
}

/// Storage hook used by shared-blob conflict resolution to invalidate the
/// resolution metadata of already-published artifacts. `Sync` because the
/// quickening compiler's shared state is reached from every worker thread.
pub trait ArtifactInvalidator: Sync {
    fn invalidate_resolution_data(&self, method: MethodRef);
}

/// A resolver that never resolves anything. Every site stays slow; useful
/// in tests and as the safe default when the runtime is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl Resolver for NullResolver {
    fn resolve_instance_field(&self, _field_index: u16, _is_put: bool) -> Option<FieldInfo> {
        None
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

impl MethodFilter for () {
    fn should_compile(&self, _method: MethodRef) -> bool {
        true
    }
}
