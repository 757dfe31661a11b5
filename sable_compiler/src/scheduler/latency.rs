//! Per-target instruction cost tables.
//!
//! `latency` is the cost of the instruction itself; `internal_latency` is
//! the cost of code emitted around it (guards, call setup) that occupies
//! the pipeline but does not delay the instruction's data consumers.

use crate::config::InstructionSet;
use crate::ir::node::InstKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyInfo {
    pub latency: u32,
    pub internal_latency: u32,
}

impl LatencyInfo {
    const fn of(latency: u32) -> LatencyInfo {
        LatencyInfo { latency, internal_latency: 0 }
    }

    const fn with_internal(latency: u32, internal_latency: u32) -> LatencyInfo {
        LatencyInfo { latency, internal_latency }
    }
}

/// Cost of one instruction on the target.
pub fn latency_of(instruction_set: InstructionSet, kind: &InstKind) -> LatencyInfo {
    match instruction_set {
        InstructionSet::Arm64 => arm64_latency(kind),
        // No tuned tables; a uniform cost makes the selector a plain
        // topological order.
        InstructionSet::X8664 | InstructionSet::Generic => LatencyInfo::of(1),
    }
}

fn arm64_latency(kind: &InstKind) -> LatencyInfo {
    const ALU: u32 = 2;
    const MUL: u32 = 5;
    const DIV: u32 = 15;
    const LOAD: u32 = 5;
    const STORE: u32 = 3;
    const BRANCH: u32 = 1;
    const CALL: u32 = 10;

    match kind {
        InstKind::IntConst(_) => LatencyInfo::of(1),
        InstKind::Param(_) | InstKind::Phi { .. } => LatencyInfo::of(0),

        InstKind::Neg
        | InstKind::Not
        | InstKind::Add
        | InstKind::Sub
        | InstKind::And
        | InstKind::Or
        | InstKind::Xor
        | InstKind::Shl
        | InstKind::Shr
        | InstKind::UShr
        | InstKind::Compare
        | InstKind::Condition(_)
        | InstKind::Select
        | InstKind::TypeConversion => LatencyInfo::of(ALU),

        InstKind::Mul | InstKind::MulAdd => LatencyInfo::of(MUL),
        // The zero guard is emitted next to the division.
        InstKind::Div | InstKind::Rem => LatencyInfo::with_internal(DIV, ALU),

        InstKind::Goto
        | InstKind::If
        | InstKind::Return
        | InstKind::ReturnVoid
        | InstKind::TryBoundary { .. }
        | InstKind::SuspendCheck => LatencyInfo::of(BRANCH),
        InstKind::Throw | InstKind::Deoptimize => LatencyInfo::of(BRANCH),

        InstKind::NullCheck | InstKind::DivZeroCheck | InstKind::BoundsCheck => {
            LatencyInfo::of(ALU)
        }

        InstKind::ArrayGet | InstKind::FieldGet(_) => LatencyInfo::of(LOAD),
        InstKind::ArrayLength => LatencyInfo::of(LOAD),
        InstKind::ArraySet | InstKind::FieldSet(_) => LatencyInfo::of(STORE),

        InstKind::NewInstance { .. } | InstKind::NewArray { .. } => {
            LatencyInfo::with_internal(CALL, ALU)
        }
        InstKind::LoadClass { .. } | InstKind::LoadString { .. } => LatencyInfo::of(LOAD),
        InstKind::CheckCast { .. } | InstKind::InstanceOf { .. } => LatencyInfo::of(LOAD),
        InstKind::ConstructorFence => LatencyInfo::of(STORE),
        InstKind::ClassGuard { .. } => LatencyInfo::of(LOAD),
        InstKind::MonitorOp { .. } => LatencyInfo::of(CALL),

        // Argument marshalling surrounds the branch-and-link.
        InstKind::Invoke(_) => LatencyInfo::with_internal(CALL, ALU),
    }
}
