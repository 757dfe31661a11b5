//! Opcode definitions for Sable's register-based bytecode.
//!
//! Instructions are streams of 16-bit code units. Every opcode has a fixed
//! width of 1, 2 or 3 code units:
//!
//! ```text
//! unit 0: ┌─────────┬─────────┐   unit 1: regs B/C or a 16-bit
//!         │ opcode  │  reg A  │           immediate; unit 2 (when
//!         │ (8 bit) │ (8 bit) │           present) is always a 16-bit
//!         └─────────┴─────────┘           pool index or offset
//! ```
//!
//! Slow, resolution-dependent opcodes (`IGet`, `InvokeVirtual`, ...) have a
//! pre-resolved "quick" twin of the same width, so the quickening compiler
//! can rewrite them in place without moving any other instruction.

use std::fmt;

/// Operation code for a bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,

    // Moves and constants
    Move = 0x01,
    Const16 = 0x02,
    ConstString = 0x03,
    ConstClass = 0x04,

    // Integer arithmetic. Three-register format: A = B op C.
    IntAdd = 0x10,
    IntSub = 0x11,
    IntMul = 0x12,
    IntDiv = 0x13,
    IntRem = 0x14,
    IntAnd = 0x15,
    IntOr = 0x16,
    IntXor = 0x17,
    IntShl = 0x18,
    IntShr = 0x19,
    IntUshr = 0x1A,
    IntNeg = 0x1B,
    IntNot = 0x1C,
    Cmp = 0x1D,

    // Control flow. Branch offsets are signed, in code units, relative to
    // the first unit of the branch instruction.
    Goto = 0x20,
    IfEqz = 0x21,
    IfNez = 0x22,
    IfLtz = 0x23,
    IfGez = 0x24,
    IfGtz = 0x25,
    IfLez = 0x26,
    Return = 0x27,
    ReturnVoid = 0x28,
    ReturnVoidNoBarrier = 0x29,
    Throw = 0x2A,

    // Instance fields: A = value reg, B = object reg, index = field.
    IGet = 0x30,
    IGetWide = 0x31,
    IGetObject = 0x32,
    IPut = 0x33,
    IPutWide = 0x34,
    IPutObject = 0x35,
    IGetQuick = 0x36,
    IGetWideQuick = 0x37,
    IGetObjectQuick = 0x38,
    IPutQuick = 0x39,
    IPutWideQuick = 0x3A,
    IPutObjectQuick = 0x3B,

    // Static fields: A = value reg, index = field.
    SGet = 0x3C,
    SPut = 0x3D,

    // Arrays
    ArrayGet = 0x40,
    ArrayPut = 0x41,
    ArrayLength = 0x42,
    NewArray = 0x43,

    // Objects and types
    NewInstance = 0x44,
    CheckCast = 0x45,
    InstanceOf = 0x46,
    MonitorEnter = 0x47,
    MonitorExit = 0x48,

    // Calls: A = receiver/first argument reg, B = argument count,
    // index = method (or vtable slot for the quick form).
    InvokeVirtual = 0x50,
    InvokeVirtualQuick = 0x51,
    InvokeStatic = 0x52,
    InvokeInterface = 0x53,
}

impl Opcode {
    /// Decode an opcode from its byte representation.
    pub const fn from_u8(value: u8) -> Option<Opcode> {
        Some(match value {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Move,
            0x02 => Opcode::Const16,
            0x03 => Opcode::ConstString,
            0x04 => Opcode::ConstClass,
            0x10 => Opcode::IntAdd,
            0x11 => Opcode::IntSub,
            0x12 => Opcode::IntMul,
            0x13 => Opcode::IntDiv,
            0x14 => Opcode::IntRem,
            0x15 => Opcode::IntAnd,
            0x16 => Opcode::IntOr,
            0x17 => Opcode::IntXor,
            0x18 => Opcode::IntShl,
            0x19 => Opcode::IntShr,
            0x1A => Opcode::IntUshr,
            0x1B => Opcode::IntNeg,
            0x1C => Opcode::IntNot,
            0x1D => Opcode::Cmp,
            0x20 => Opcode::Goto,
            0x21 => Opcode::IfEqz,
            0x22 => Opcode::IfNez,
            0x23 => Opcode::IfLtz,
            0x24 => Opcode::IfGez,
            0x25 => Opcode::IfGtz,
            0x26 => Opcode::IfLez,
            0x27 => Opcode::Return,
            0x28 => Opcode::ReturnVoid,
            0x29 => Opcode::ReturnVoidNoBarrier,
            0x2A => Opcode::Throw,
            0x30 => Opcode::IGet,
            0x31 => Opcode::IGetWide,
            0x32 => Opcode::IGetObject,
            0x33 => Opcode::IPut,
            0x34 => Opcode::IPutWide,
            0x35 => Opcode::IPutObject,
            0x36 => Opcode::IGetQuick,
            0x37 => Opcode::IGetWideQuick,
            0x38 => Opcode::IGetObjectQuick,
            0x39 => Opcode::IPutQuick,
            0x3A => Opcode::IPutWideQuick,
            0x3B => Opcode::IPutObjectQuick,
            0x3C => Opcode::SGet,
            0x3D => Opcode::SPut,
            0x40 => Opcode::ArrayGet,
            0x41 => Opcode::ArrayPut,
            0x42 => Opcode::ArrayLength,
            0x43 => Opcode::NewArray,
            0x44 => Opcode::NewInstance,
            0x45 => Opcode::CheckCast,
            0x46 => Opcode::InstanceOf,
            0x47 => Opcode::MonitorEnter,
            0x48 => Opcode::MonitorExit,
            0x50 => Opcode::InvokeVirtual,
            0x51 => Opcode::InvokeVirtualQuick,
            0x52 => Opcode::InvokeStatic,
            0x53 => Opcode::InvokeInterface,
            _ => return None,
        })
    }

    /// Width of an instruction with this opcode, in 16-bit code units.
    pub const fn width(self) -> usize {
        match self {
            Opcode::Nop
            | Opcode::Return
            | Opcode::ReturnVoid
            | Opcode::ReturnVoidNoBarrier
            | Opcode::Throw
            | Opcode::MonitorEnter
            | Opcode::MonitorExit => 1,

            Opcode::Move
            | Opcode::Const16
            | Opcode::ConstString
            | Opcode::ConstClass
            | Opcode::IntAdd
            | Opcode::IntSub
            | Opcode::IntMul
            | Opcode::IntDiv
            | Opcode::IntRem
            | Opcode::IntAnd
            | Opcode::IntOr
            | Opcode::IntXor
            | Opcode::IntShl
            | Opcode::IntShr
            | Opcode::IntUshr
            | Opcode::IntNeg
            | Opcode::IntNot
            | Opcode::Cmp
            | Opcode::Goto
            | Opcode::IfEqz
            | Opcode::IfNez
            | Opcode::IfLtz
            | Opcode::IfGez
            | Opcode::IfGtz
            | Opcode::IfLez
            | Opcode::ArrayGet
            | Opcode::ArrayPut
            | Opcode::ArrayLength
            | Opcode::NewInstance
            | Opcode::CheckCast => 2,

            Opcode::IGet
            | Opcode::IGetWide
            | Opcode::IGetObject
            | Opcode::IPut
            | Opcode::IPutWide
            | Opcode::IPutObject
            | Opcode::IGetQuick
            | Opcode::IGetWideQuick
            | Opcode::IGetObjectQuick
            | Opcode::IPutQuick
            | Opcode::IPutWideQuick
            | Opcode::IPutObjectQuick
            | Opcode::SGet
            | Opcode::SPut
            | Opcode::NewArray
            | Opcode::InstanceOf
            | Opcode::InvokeVirtual
            | Opcode::InvokeVirtualQuick
            | Opcode::InvokeStatic
            | Opcode::InvokeInterface => 3,
        }
    }

    /// Whether this instruction may throw when executed.
    pub const fn can_throw(self) -> bool {
        matches!(
            self,
            Opcode::ConstString
                | Opcode::ConstClass
                | Opcode::IntDiv
                | Opcode::IntRem
                | Opcode::Throw
                | Opcode::IGet
                | Opcode::IGetWide
                | Opcode::IGetObject
                | Opcode::IPut
                | Opcode::IPutWide
                | Opcode::IPutObject
                | Opcode::IGetQuick
                | Opcode::IGetWideQuick
                | Opcode::IGetObjectQuick
                | Opcode::IPutQuick
                | Opcode::IPutWideQuick
                | Opcode::IPutObjectQuick
                | Opcode::SGet
                | Opcode::SPut
                | Opcode::ArrayGet
                | Opcode::ArrayPut
                | Opcode::ArrayLength
                | Opcode::NewArray
                | Opcode::NewInstance
                | Opcode::CheckCast
                | Opcode::MonitorEnter
                | Opcode::MonitorExit
                | Opcode::InvokeVirtual
                | Opcode::InvokeVirtualQuick
                | Opcode::InvokeStatic
                | Opcode::InvokeInterface
        )
    }

    /// Whether this is a branch (conditional or not).
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Goto
                | Opcode::IfEqz
                | Opcode::IfNez
                | Opcode::IfLtz
                | Opcode::IfGez
                | Opcode::IfGtz
                | Opcode::IfLez
        )
    }

    /// Whether this opcode ends a basic block.
    pub const fn is_terminator(self) -> bool {
        self.is_branch()
            || matches!(
                self,
                Opcode::Return | Opcode::ReturnVoid | Opcode::ReturnVoidNoBarrier | Opcode::Throw
            )
    }

    /// Whether this is a pre-resolved form produced by quickening.
    pub const fn is_quickened(self) -> bool {
        matches!(
            self,
            Opcode::IGetQuick
                | Opcode::IGetWideQuick
                | Opcode::IGetObjectQuick
                | Opcode::IPutQuick
                | Opcode::IPutWideQuick
                | Opcode::IPutObjectQuick
                | Opcode::InvokeVirtualQuick
        )
    }

    /// Whether an instruction with this opcode consumes a slot in the
    /// quicken table. True for quickened forms and for `Nop`, since a `Nop`
    /// may be the residue of an elided `CheckCast`.
    pub const fn needs_quicken_index(self) -> bool {
        self.is_quickened() || matches!(self, Opcode::Nop)
    }

    /// The quickened twin of a slow opcode, if it has one.
    pub const fn quickened_form(self) -> Option<Opcode> {
        Some(match self {
            Opcode::IGet => Opcode::IGetQuick,
            Opcode::IGetWide => Opcode::IGetWideQuick,
            Opcode::IGetObject => Opcode::IGetObjectQuick,
            Opcode::IPut => Opcode::IPutQuick,
            Opcode::IPutWide => Opcode::IPutWideQuick,
            Opcode::IPutObject => Opcode::IPutObjectQuick,
            Opcode::InvokeVirtual => Opcode::InvokeVirtualQuick,
            _ => return None,
        })
    }

    /// The slow twin of a quickened opcode, if it is one.
    pub const fn slow_form(self) -> Option<Opcode> {
        Some(match self {
            Opcode::IGetQuick => Opcode::IGet,
            Opcode::IGetWideQuick => Opcode::IGetWide,
            Opcode::IGetObjectQuick => Opcode::IGetObject,
            Opcode::IPutQuick => Opcode::IPut,
            Opcode::IPutWideQuick => Opcode::IPutWide,
            Opcode::IPutObjectQuick => Opcode::IPutObject,
            Opcode::InvokeVirtualQuick => Opcode::InvokeVirtual,
            _ => return None,
        })
    }

    /// Whether a width-2 instruction's second unit is a 16-bit immediate
    /// (constant, pool index or branch offset) rather than packed B/C regs.
    pub const fn uses_imm16(self) -> bool {
        matches!(
            self,
            Opcode::Const16
                | Opcode::ConstString
                | Opcode::ConstClass
                | Opcode::Goto
                | Opcode::IfEqz
                | Opcode::IfNez
                | Opcode::IfLtz
                | Opcode::IfGez
                | Opcode::IfGtz
                | Opcode::IfLez
                | Opcode::CheckCast
                | Opcode::NewInstance
        )
    }

    /// Whether this is an instance field access (slow or quick, get or put).
    pub const fn is_instance_field_access(self) -> bool {
        matches!(
            self,
            Opcode::IGet
                | Opcode::IGetWide
                | Opcode::IGetObject
                | Opcode::IPut
                | Opcode::IPutWide
                | Opcode::IPutObject
                | Opcode::IGetQuick
                | Opcode::IGetWideQuick
                | Opcode::IGetObjectQuick
                | Opcode::IPutQuick
                | Opcode::IPutWideQuick
                | Opcode::IPutObjectQuick
        )
    }

    /// Whether this is a field *store* (put) rather than a load.
    pub const fn is_field_put(self) -> bool {
        matches!(
            self,
            Opcode::IPut
                | Opcode::IPutWide
                | Opcode::IPutObject
                | Opcode::IPutQuick
                | Opcode::IPutWideQuick
                | Opcode::IPutObjectQuick
                | Opcode::SPut
        )
    }

    /// Instruction mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Move => "move",
            Opcode::Const16 => "const/16",
            Opcode::ConstString => "const-string",
            Opcode::ConstClass => "const-class",
            Opcode::IntAdd => "add-int",
            Opcode::IntSub => "sub-int",
            Opcode::IntMul => "mul-int",
            Opcode::IntDiv => "div-int",
            Opcode::IntRem => "rem-int",
            Opcode::IntAnd => "and-int",
            Opcode::IntOr => "or-int",
            Opcode::IntXor => "xor-int",
            Opcode::IntShl => "shl-int",
            Opcode::IntShr => "shr-int",
            Opcode::IntUshr => "ushr-int",
            Opcode::IntNeg => "neg-int",
            Opcode::IntNot => "not-int",
            Opcode::Cmp => "cmp-int",
            Opcode::Goto => "goto",
            Opcode::IfEqz => "if-eqz",
            Opcode::IfNez => "if-nez",
            Opcode::IfLtz => "if-ltz",
            Opcode::IfGez => "if-gez",
            Opcode::IfGtz => "if-gtz",
            Opcode::IfLez => "if-lez",
            Opcode::Return => "return",
            Opcode::ReturnVoid => "return-void",
            Opcode::ReturnVoidNoBarrier => "return-void-no-barrier",
            Opcode::Throw => "throw",
            Opcode::IGet => "iget",
            Opcode::IGetWide => "iget-wide",
            Opcode::IGetObject => "iget-object",
            Opcode::IPut => "iput",
            Opcode::IPutWide => "iput-wide",
            Opcode::IPutObject => "iput-object",
            Opcode::IGetQuick => "iget-quick",
            Opcode::IGetWideQuick => "iget-wide-quick",
            Opcode::IGetObjectQuick => "iget-object-quick",
            Opcode::IPutQuick => "iput-quick",
            Opcode::IPutWideQuick => "iput-wide-quick",
            Opcode::IPutObjectQuick => "iput-object-quick",
            Opcode::SGet => "sget",
            Opcode::SPut => "sput",
            Opcode::ArrayGet => "aget",
            Opcode::ArrayPut => "aput",
            Opcode::ArrayLength => "array-length",
            Opcode::NewArray => "new-array",
            Opcode::NewInstance => "new-instance",
            Opcode::CheckCast => "check-cast",
            Opcode::InstanceOf => "instance-of",
            Opcode::MonitorEnter => "monitor-enter",
            Opcode::MonitorExit => "monitor-exit",
            Opcode::InvokeVirtual => "invoke-virtual",
            Opcode::InvokeVirtualQuick => "invoke-virtual-quick",
            Opcode::InvokeStatic => "invoke-static",
            Opcode::InvokeInterface => "invoke-interface",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_opcodes() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op as u8, byte);
            }
        }
    }

    #[test]
    fn test_quick_forms_preserve_width() {
        for byte in 0..=u8::MAX {
            let Some(op) = Opcode::from_u8(byte) else {
                continue;
            };
            if let Some(quick) = op.quickened_form() {
                assert_eq!(op.width(), quick.width(), "{op} vs {quick}");
                assert_eq!(quick.slow_form(), Some(op));
            }
        }
    }

    #[test]
    fn test_nop_needs_quicken_index() {
        assert!(Opcode::Nop.needs_quicken_index());
        assert!(Opcode::IGetQuick.needs_quicken_index());
        assert!(!Opcode::IGet.needs_quicken_index());
        assert!(!Opcode::IntAdd.needs_quicken_index());
    }

    #[test]
    fn test_check_cast_fits_two_nops() {
        // CheckCast elision rewrites the instruction into two 1-unit Nops.
        assert_eq!(Opcode::CheckCast.width(), 2);
        assert_eq!(Opcode::Nop.width(), 1);
    }
}
