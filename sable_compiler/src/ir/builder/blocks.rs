//! Step 1 of graph building: partition bytecode into basic blocks and link
//! control-flow edges.
//!
//! Blocks are left unpopulated; only the block boundaries, the normal and
//! exceptional edges, and the synthetic try-boundary blocks exist after
//! this step. Structural validation happens here: every branch must land
//! on an instruction start, every register operand must be in range.

use crate::error::CompileError;
use crate::ir::graph::{BlockId, Graph, TryCatchKind};
use rustc_hash::FxHashMap;
use sable_bytecode::{BytecodeUnit, InstRef, Opcode};

/// Result of block partitioning.
pub struct BlockLayout {
    /// Leader pc -> block, in ascending pc order.
    pub block_at: FxHashMap<u32, BlockId>,
    /// Per-block code range [start, end) in code units. Synthetic blocks
    /// (entry, try boundaries) have an empty range.
    pub ranges: FxHashMap<BlockId, (u32, u32)>,
    /// Synthetic boundary block per try item, routing exceptional edges.
    pub try_boundaries: Vec<BlockId>,
    pub number_of_branches: usize,
}

pub struct BlockBuilder<'a> {
    unit: &'a BytecodeUnit,
    code: &'a [u16],
}

impl<'a> BlockBuilder<'a> {
    pub fn new(unit: &'a BytecodeUnit, code: &'a [u16]) -> Self {
        BlockBuilder { unit, code }
    }

    /// Decode the stream and cut it into linked basic blocks.
    pub fn build(&self, graph: &mut Graph) -> Result<BlockLayout, CompileError> {
        let insts = self.decode_all()?;
        let leaders = self.find_leaders(&insts)?;
        let mut number_of_branches = 0;

        // Entry block is synthetic; it will hold parameter values.
        let entry = graph.add_block();
        graph.set_entry(entry);

        let mut block_at = FxHashMap::default();
        let mut starts: Vec<u32> = leaders.iter().copied().collect();
        starts.sort_unstable();
        for &pc in &starts {
            let block = graph.add_block();
            block_at.insert(pc, block);
        }

        let mut ranges = FxHashMap::default();
        ranges.insert(entry, (0, 0));
        for (i, &pc) in starts.iter().enumerate() {
            let end = starts
                .get(i + 1)
                .copied()
                .unwrap_or(self.code.len() as u32);
            ranges.insert(block_at[&pc], (pc, end));
        }

        graph.connect(entry, block_at[&0]);

        // Mark try membership and handler entries.
        for item in self.unit.tries() {
            for &pc in &starts {
                if item.covers(pc) {
                    graph.block_mut(block_at[&pc]).try_catch = Some(TryCatchKind::InTry);
                }
            }
            let handler = *block_at
                .get(&item.handler)
                .ok_or_else(|| invalid("try handler does not start an instruction"))?;
            graph.block_mut(handler).try_catch = Some(TryCatchKind::Handler);
        }

        // Normal edges.
        for (i, &pc) in starts.iter().enumerate() {
            let block = block_at[&pc];
            let (start, end) = ranges[&block];
            let last = last_instruction(&insts, start, end)
                .ok_or_else(|| invalid("empty basic block range"))?;
            let next_leader = starts.get(i + 1).copied();

            match last.opcode {
                Opcode::Goto => {
                    number_of_branches += 1;
                    let target = branch_target(&last)?;
                    graph.connect(block, block_at[&target]);
                }
                op if op.is_branch() => {
                    // Conditional: taken target first, fallthrough second.
                    number_of_branches += 1;
                    let target = branch_target(&last)?;
                    graph.connect(block, block_at[&target]);
                    let fallthrough = next_leader
                        .ok_or_else(|| invalid("conditional branch falls off the method end"))?;
                    graph.connect(block, block_at[&fallthrough]);
                }
                Opcode::Return
                | Opcode::ReturnVoid
                | Opcode::ReturnVoidNoBarrier
                | Opcode::Throw => {}
                _ => {
                    // Falls through into the next block.
                    let fallthrough = next_leader
                        .ok_or_else(|| invalid("control falls off the method end"))?;
                    graph.connect(block, block_at[&fallthrough]);
                }
            }
        }

        // Exceptional edges route through one synthetic boundary block per
        // try item: throwing block -> boundary -> handler.
        let mut try_boundaries = Vec::new();
        for item in self.unit.tries() {
            let boundary = graph.add_block();
            graph.block_mut(boundary).try_catch = Some(TryCatchKind::InTry);
            ranges.insert(boundary, (0, 0));
            graph.connect(boundary, block_at[&item.handler]);
            for &pc in &starts {
                let (start, end) = ranges[&block_at[&pc]];
                if !item.covers(start) {
                    continue;
                }
                let throws = instructions_in(&insts, start, end).any(|i| i.opcode.can_throw());
                if throws {
                    graph.connect(block_at[&pc], boundary);
                }
            }
            try_boundaries.push(boundary);
        }

        Ok(BlockLayout { block_at, ranges, try_boundaries, number_of_branches })
    }

    fn decode_all(&self) -> Result<Vec<InstRef>, CompileError> {
        let mut insts = Vec::new();
        let mut pc = 0u32;
        let registers = self.unit.registers_size();
        while (pc as usize) < self.code.len() {
            let inst = InstRef::decode(self.code, pc)
                .map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
            validate_registers(&inst, registers)?;
            pc += inst.width() as u32;
            insts.push(inst);
        }
        Ok(insts)
    }

    fn find_leaders(&self, insts: &[InstRef]) -> Result<rustc_hash::FxHashSet<u32>, CompileError> {
        let mut leaders = rustc_hash::FxHashSet::default();
        leaders.insert(0u32);
        let is_start: rustc_hash::FxHashSet<u32> = insts.iter().map(|i| i.pc).collect();

        for inst in insts {
            if inst.opcode.is_branch() {
                let target = branch_target(inst)?;
                if !is_start.contains(&target) {
                    return Err(invalid("branch into the middle of an instruction"));
                }
                leaders.insert(target);
            }
            if inst.opcode.is_terminator() {
                let next = inst.pc + inst.width() as u32;
                if (next as usize) < self.code.len() {
                    leaders.insert(next);
                }
            }
        }
        for item in self.unit.tries() {
            if !is_start.contains(&item.handler) {
                return Err(invalid("try handler into the middle of an instruction"));
            }
            leaders.insert(item.handler);
            if is_start.contains(&item.start) {
                leaders.insert(item.start);
            }
            if is_start.contains(&item.end) {
                leaders.insert(item.end);
            }
        }
        Ok(leaders)
    }
}

fn invalid(message: &str) -> CompileError {
    CompileError::InvalidBytecode(message.to_string())
}

fn branch_target(inst: &InstRef) -> Result<u32, CompileError> {
    let target = inst.pc as i64 + inst.branch_offset() as i64;
    if target < 0 {
        return Err(invalid("negative branch target"));
    }
    Ok(target as u32)
}

fn validate_registers(inst: &InstRef, registers: u16) -> Result<(), CompileError> {
    let check = |reg: u8| -> Result<(), CompileError> {
        if reg as u16 >= registers {
            Err(CompileError::InvalidBytecode(format!(
                "register v{} out of range at pc {}",
                reg, inst.pc
            )))
        } else {
            Ok(())
        }
    };
    match inst.opcode {
        Opcode::Nop | Opcode::Goto => Ok(()),
        op if op.uses_imm16() => check(inst.reg_a),
        op if op.width() == 1 => check(inst.reg_a),
        Opcode::Move | Opcode::IntNeg | Opcode::IntNot | Opcode::ArrayLength => {
            check(inst.reg_a)?;
            check(inst.reg_b)
        }
        Opcode::InvokeVirtual
        | Opcode::InvokeVirtualQuick
        | Opcode::InvokeStatic
        | Opcode::InvokeInterface => {
            check(inst.reg_a)?;
            let top = inst.reg_a as u32 + inst.reg_b.max(1) as u32 - 1;
            if top >= registers as u32 || top > u8::MAX as u32 {
                return Err(CompileError::InvalidBytecode(format!(
                    "argument range v{}..v{} out of range at pc {}",
                    inst.reg_a, top, inst.pc
                )));
            }
            Ok(())
        }
        op if op.is_instance_field_access() => {
            check(inst.reg_a)?;
            check(inst.reg_b)
        }
        Opcode::SGet | Opcode::SPut | Opcode::NewArray | Opcode::InstanceOf => {
            check(inst.reg_a)?;
            if inst.opcode == Opcode::NewArray || inst.opcode == Opcode::InstanceOf {
                check(inst.reg_b)?;
            }
            Ok(())
        }
        _ => {
            // Three-register arithmetic and array accesses.
            check(inst.reg_a)?;
            check(inst.reg_b)?;
            check(inst.reg_c)
        }
    }
}

fn last_instruction(insts: &[InstRef], start: u32, end: u32) -> Option<InstRef> {
    instructions_in(insts, start, end).last()
}

pub(crate) fn instructions_in(
    insts: &[InstRef],
    start: u32,
    end: u32,
) -> impl Iterator<Item = InstRef> + '_ {
    insts
        .iter()
        .copied()
        .filter(move |i| i.pc >= start && i.pc < end)
}
