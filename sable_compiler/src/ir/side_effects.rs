//! Side-effect sets for IR instructions.
//!
//! Each instruction declares which heap partitions it may read or write.
//! Dependencies between instructions are derived from these sets: `a` may
//! depend on `b` when `a` reads something `b` writes.

use bitflags::bitflags;

bitflags! {
    /// Declared heap effects of one instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SideEffects: u32 {
        const ARRAY_WRITE    = 1 << 0;
        const INSTANCE_WRITE = 1 << 1;
        const STATIC_WRITE   = 1 << 2;

        const ARRAY_READ     = 1 << 8;
        const INSTANCE_READ  = 1 << 9;
        const STATIC_READ    = 1 << 10;

        /// May allocate and therefore trigger a collection.
        const CAN_TRIGGER_GC = 1 << 16;
    }
}

impl SideEffects {
    const WRITE_MASK: u32 = 0x0000_00FF;
    const READ_MASK: u32 = 0x0000_FF00;

    /// Everything an opaque call may do.
    pub fn all_reads_and_writes() -> SideEffects {
        SideEffects::ARRAY_WRITE
            | SideEffects::INSTANCE_WRITE
            | SideEffects::STATIC_WRITE
            | SideEffects::ARRAY_READ
            | SideEffects::INSTANCE_READ
            | SideEffects::STATIC_READ
            | SideEffects::CAN_TRIGGER_GC
    }

    pub fn does_any_write(self) -> bool {
        self.bits() & Self::WRITE_MASK != 0
    }

    pub fn does_any_read(self) -> bool {
        self.bits() & Self::READ_MASK != 0
    }

    pub fn does_nothing(self) -> bool {
        self.is_empty()
    }

    /// True when `self` reads a partition `other` writes.
    pub fn may_depend_on(self, other: SideEffects) -> bool {
        let other_writes_as_reads = (other.bits() & Self::WRITE_MASK) << 8;
        self.bits() & other_writes_as_reads != 0
    }

    /// True when `self` covers every effect of `other`.
    pub fn includes(self, other: SideEffects) -> bool {
        self.contains(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_depends_on_write() {
        let load = SideEffects::INSTANCE_READ;
        let store = SideEffects::INSTANCE_WRITE;
        assert!(load.may_depend_on(store));
        assert!(!store.may_depend_on(load));
    }

    #[test]
    fn test_disjoint_partitions_are_independent() {
        let array_load = SideEffects::ARRAY_READ;
        let field_store = SideEffects::INSTANCE_WRITE;
        assert!(!array_load.may_depend_on(field_store));
    }

    #[test]
    fn test_call_effects_include_everything() {
        let call = SideEffects::all_reads_and_writes();
        assert!(call.does_any_write());
        assert!(call.may_depend_on(SideEffects::STATIC_WRITE));
        assert!(call.includes(SideEffects::ARRAY_READ | SideEffects::ARRAY_WRITE));
    }
}
