//! Step 4 of graph building: populate blocks with SSA instructions.
//!
//! Blocks are visited in reverse post order with a per-block register map.
//! A register read resolves to the dominating definition; joins materialize
//! phis. Loop headers create their phis before the back edge is processed
//! and patch the missing inputs at the end. Every instruction that can
//! throw captures an environment snapshot of the live registers.

use crate::capabilities::Resolver;
use crate::error::CompileError;
use crate::ir::builder::blocks::{instructions_in, BlockLayout};
use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::{
    CondKind, Environment, FieldAccess, InstId, InstKind, InvokeKind, ValueType,
};
use rustc_hash::FxHashMap;
use sable_bytecode::{BytecodeUnit, InstRef, Opcode};
use smallvec::{smallvec, SmallVec};

pub struct InstructionBuilder<'a> {
    unit: &'a BytecodeUnit,
    insts: Vec<InstRef>,
    layout: &'a BlockLayout,
    resolver: &'a dyn Resolver,
    locals_out: FxHashMap<BlockId, Vec<InstId>>,
    /// Loop-header phis waiting for their back-edge inputs.
    pending_phis: Vec<(BlockId, usize, InstId)>,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(
        unit: &'a BytecodeUnit,
        code: &[u16],
        layout: &'a BlockLayout,
        resolver: &'a dyn Resolver,
    ) -> Result<Self, CompileError> {
        let mut insts = Vec::new();
        let mut pc = 0u32;
        while (pc as usize) < code.len() {
            let inst = InstRef::decode(code, pc)
                .map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
            pc += inst.width() as u32;
            insts.push(inst);
        }
        Ok(InstructionBuilder {
            unit,
            insts,
            layout,
            resolver,
            locals_out: FxHashMap::default(),
            pending_phis: Vec::new(),
        })
    }

    pub fn build(&mut self, graph: &mut Graph) -> Result<(), CompileError> {
        let order = graph.reverse_post_order().to_vec();
        for block in order {
            let mut locals = self.entry_locals(graph, block)?;
            self.emit_block(graph, block, &mut locals)?;
            self.locals_out.insert(block, locals);
        }
        self.patch_pending_phis(graph);
        graph.set_has_try_catch(self.unit.has_try_catch());
        Ok(())
    }

    /// Register state at block entry: parameters for the entry block, the
    /// predecessor state otherwise, with phis at joins.
    fn entry_locals(
        &mut self,
        graph: &mut Graph,
        block: BlockId,
    ) -> Result<Vec<InstId>, CompileError> {
        let registers = self.unit.registers_size() as usize;

        if block == graph.entry() {
            let mut locals = vec![InstId::INVALID; registers];
            let ins = self.unit.ins_size() as usize;
            let first_in = registers - ins;
            for i in 0..ins {
                let param = graph.add_inst(
                    InstKind::Param(i as u16),
                    smallvec![],
                    ValueType::Unknown,
                    0,
                );
                graph.append(block, param);
                locals[first_in + i] = param;
            }
            let goto = graph.add_inst(InstKind::Goto, smallvec![], ValueType::Void, 0);
            graph.append(block, goto);
            return Ok(locals);
        }

        let preds = graph.block(block).preds.clone();
        let processed: Vec<(BlockId, Vec<InstId>)> = preds
            .iter()
            .filter_map(|p| self.locals_out.get(p).map(|l| (*p, l.clone())))
            .collect();
        let has_back_edge = processed.len() < preds.len();
        let start_pc = self.layout.ranges.get(&block).map(|r| r.0).unwrap_or(0);

        if processed.len() == 1 && !has_back_edge {
            return Ok(processed[0].1.clone());
        }

        let mut locals = vec![InstId::INVALID; registers];
        for reg in 0..registers {
            let values: SmallVec<[InstId; 4]> =
                processed.iter().map(|(_, l)| l[reg]).collect();
            if values.iter().any(|v| !v.is_valid()) {
                continue;
            }
            let all_same = values.windows(2).all(|w| w[0] == w[1]);
            if all_same && !has_back_edge {
                locals[reg] = values[0];
                continue;
            }
            if has_back_edge {
                // Inputs are patched once every predecessor is processed.
                let phi = graph.add_inst(
                    InstKind::Phi { vreg: reg as u16 },
                    smallvec![],
                    ValueType::Unknown,
                    start_pc,
                );
                graph.append(block, phi);
                self.pending_phis.push((block, reg, phi));
                locals[reg] = phi;
            } else {
                let phi = graph.add_inst(
                    InstKind::Phi { vreg: reg as u16 },
                    values.into_iter().collect(),
                    ValueType::Unknown,
                    start_pc,
                );
                graph.append(block, phi);
                locals[reg] = phi;
            }
        }
        Ok(locals)
    }

    fn patch_pending_phis(&mut self, graph: &mut Graph) {
        for &(block, reg, phi) in &self.pending_phis {
            let preds = graph.block(block).preds.clone();
            for pred in preds {
                let value = self
                    .locals_out
                    .get(&pred)
                    .map(|l| l[reg])
                    .unwrap_or(InstId::INVALID);
                // A register dead around the back edge feeds the phi with
                // itself; redundant-phi elimination cleans this up.
                let value = if value.is_valid() { value } else { phi };
                graph.add_input(phi, value);
            }
        }
    }

    fn emit_block(
        &mut self,
        graph: &mut Graph,
        block: BlockId,
        locals: &mut Vec<InstId>,
    ) -> Result<(), CompileError> {
        if block == graph.entry() {
            return Ok(());
        }

        let (start, end) = *self.layout.ranges.get(&block).unwrap_or(&(0, 0));

        // Synthetic boundary blocks only carry the try-boundary marker.
        if self.layout.try_boundaries.contains(&block) {
            let boundary = graph.add_inst(
                InstKind::TryBoundary { is_entry: true },
                smallvec![],
                ValueType::Void,
                start,
            );
            graph.append(block, boundary);
            return Ok(());
        }

        // Loop headers re-check for suspension on every iteration.
        let is_loop_header = graph.loops().iter().any(|l| l.header == block);
        if is_loop_header {
            let check =
                graph.add_inst(InstKind::SuspendCheck, smallvec![], ValueType::Void, start);
            graph.append(block, check);
            graph.set_environment(
                check,
                Environment { pc: start, vregs: locals.clone() },
            );
        }

        let insts: Vec<InstRef> = instructions_in(&self.insts, start, end).collect();
        let mut terminated = false;
        for inst in &insts {
            terminated = self.emit_instruction(graph, block, inst, locals)?;
        }

        if !terminated {
            let pc = insts.last().map(|i| i.pc).unwrap_or(start);
            let goto = graph.add_inst(InstKind::Goto, smallvec![], ValueType::Void, pc);
            graph.append(block, goto);
        }
        Ok(())
    }

    /// Emit IR for one bytecode instruction. Returns true when it was a
    /// block terminator.
    fn emit_instruction(
        &mut self,
        graph: &mut Graph,
        block: BlockId,
        inst: &InstRef,
        locals: &mut Vec<InstId>,
    ) -> Result<bool, CompileError> {
        let pc = inst.pc;
        match inst.opcode {
            Opcode::Nop => {}

            Opcode::Move => {
                locals[inst.reg_a as usize] = self.read(locals, inst.reg_b, pc)?;
            }

            Opcode::Const16 => {
                let value = inst.imm as i16 as i64;
                let c = graph.add_inst(InstKind::IntConst(value), smallvec![], ValueType::Int, pc);
                graph.append(block, c);
                locals[inst.reg_a as usize] = c;
            }

            Opcode::ConstString => {
                let s = graph.add_inst(
                    InstKind::LoadString { string_index: inst.imm },
                    smallvec![],
                    ValueType::Ref,
                    pc,
                );
                graph.append(block, s);
                self.attach_env(graph, s, pc, locals);
                locals[inst.reg_a as usize] = s;
            }

            Opcode::ConstClass => {
                let c = graph.add_inst(
                    InstKind::LoadClass { type_index: inst.imm },
                    smallvec![],
                    ValueType::Ref,
                    pc,
                );
                graph.append(block, c);
                self.attach_env(graph, c, pc, locals);
                locals[inst.reg_a as usize] = c;
            }

            Opcode::IntAdd
            | Opcode::IntSub
            | Opcode::IntMul
            | Opcode::IntAnd
            | Opcode::IntOr
            | Opcode::IntXor
            | Opcode::IntShl
            | Opcode::IntShr
            | Opcode::IntUshr
            | Opcode::Cmp => {
                let lhs = self.read(locals, inst.reg_b, pc)?;
                let rhs = self.read(locals, inst.reg_c, pc)?;
                let kind = match inst.opcode {
                    Opcode::IntAdd => InstKind::Add,
                    Opcode::IntSub => InstKind::Sub,
                    Opcode::IntMul => InstKind::Mul,
                    Opcode::IntAnd => InstKind::And,
                    Opcode::IntOr => InstKind::Or,
                    Opcode::IntXor => InstKind::Xor,
                    Opcode::IntShl => InstKind::Shl,
                    Opcode::IntShr => InstKind::Shr,
                    Opcode::IntUshr => InstKind::UShr,
                    _ => InstKind::Compare,
                };
                let op = graph.add_inst(kind, smallvec![lhs, rhs], ValueType::Int, pc);
                graph.append(block, op);
                locals[inst.reg_a as usize] = op;
            }

            Opcode::IntDiv | Opcode::IntRem => {
                let dividend = self.read(locals, inst.reg_b, pc)?;
                let divisor = self.read(locals, inst.reg_c, pc)?;
                let check =
                    graph.add_inst(InstKind::DivZeroCheck, smallvec![divisor], ValueType::Int, pc);
                graph.append(block, check);
                self.attach_env(graph, check, pc, locals);
                let kind = if inst.opcode == Opcode::IntDiv { InstKind::Div } else { InstKind::Rem };
                let op = graph.add_inst(kind, smallvec![dividend, check], ValueType::Int, pc);
                graph.append(block, op);
                locals[inst.reg_a as usize] = op;
            }

            Opcode::IntNeg | Opcode::IntNot => {
                let value = self.read(locals, inst.reg_b, pc)?;
                let kind = if inst.opcode == Opcode::IntNeg { InstKind::Neg } else { InstKind::Not };
                let op = graph.add_inst(kind, smallvec![value], ValueType::Int, pc);
                graph.append(block, op);
                locals[inst.reg_a as usize] = op;
            }

            Opcode::Goto => {
                let goto = graph.add_inst(InstKind::Goto, smallvec![], ValueType::Void, pc);
                graph.append(block, goto);
                return Ok(true);
            }

            Opcode::IfEqz
            | Opcode::IfNez
            | Opcode::IfLtz
            | Opcode::IfGez
            | Opcode::IfGtz
            | Opcode::IfLez => {
                let value = self.read(locals, inst.reg_a, pc)?;
                let zero = graph.add_inst(InstKind::IntConst(0), smallvec![], ValueType::Int, pc);
                graph.append(block, zero);
                let kind = match inst.opcode {
                    Opcode::IfEqz => CondKind::Eq,
                    Opcode::IfNez => CondKind::Ne,
                    Opcode::IfLtz => CondKind::Lt,
                    Opcode::IfGez => CondKind::Ge,
                    Opcode::IfGtz => CondKind::Gt,
                    _ => CondKind::Le,
                };
                let cond = graph.add_inst(
                    InstKind::Condition(kind),
                    smallvec![value, zero],
                    ValueType::Int,
                    pc,
                );
                graph.append(block, cond);
                let branch = graph.add_inst(InstKind::If, smallvec![cond], ValueType::Void, pc);
                graph.append(block, branch);
                return Ok(true);
            }

            Opcode::Return => {
                let value = self.read(locals, inst.reg_a, pc)?;
                let ret = graph.add_inst(InstKind::Return, smallvec![value], ValueType::Void, pc);
                graph.append(block, ret);
                return Ok(true);
            }

            Opcode::ReturnVoid | Opcode::ReturnVoidNoBarrier => {
                let ret = graph.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, pc);
                graph.append(block, ret);
                return Ok(true);
            }

            Opcode::Throw => {
                let value = self.read(locals, inst.reg_a, pc)?;
                let throw = graph.add_inst(InstKind::Throw, smallvec![value], ValueType::Void, pc);
                graph.append(block, throw);
                self.attach_env(graph, throw, pc, locals);
                return Ok(true);
            }

            op if op.is_instance_field_access() => {
                let object = self.read(locals, inst.reg_b, pc)?;
                let checked = self.null_check(graph, block, object, pc, locals);
                let access = self.instance_field_access(inst);
                if op.is_field_put() {
                    let value = self.read(locals, inst.reg_a, pc)?;
                    let set = graph.add_inst(
                        InstKind::FieldSet(access),
                        smallvec![checked, value],
                        ValueType::Void,
                        pc,
                    );
                    graph.append(block, set);
                    if access.offset.is_none() {
                        self.attach_env(graph, set, pc, locals);
                    }
                } else {
                    let vtype = if op == Opcode::IGetObject || op == Opcode::IGetObjectQuick {
                        ValueType::Ref
                    } else {
                        ValueType::Int
                    };
                    let get = graph.add_inst(
                        InstKind::FieldGet(access),
                        smallvec![checked],
                        vtype,
                        pc,
                    );
                    graph.append(block, get);
                    if access.offset.is_none() {
                        self.attach_env(graph, get, pc, locals);
                    }
                    locals[inst.reg_a as usize] = get;
                }
            }

            Opcode::SGet | Opcode::SPut => {
                let is_put = inst.opcode == Opcode::SPut;
                let resolved = self.resolver.resolve_static_field(inst.imm, is_put);
                let access = FieldAccess {
                    field_index: inst.imm,
                    offset: resolved.map(|f| f.offset),
                    is_volatile: resolved.map(|f| f.is_volatile).unwrap_or(false),
                    is_static: true,
                };
                if is_put {
                    let value = self.read(locals, inst.reg_a, pc)?;
                    let set = graph.add_inst(
                        InstKind::FieldSet(access),
                        smallvec![value],
                        ValueType::Void,
                        pc,
                    );
                    graph.append(block, set);
                    if access.offset.is_none() {
                        self.attach_env(graph, set, pc, locals);
                    }
                } else {
                    let get = graph.add_inst(
                        InstKind::FieldGet(access),
                        smallvec![],
                        ValueType::Int,
                        pc,
                    );
                    graph.append(block, get);
                    if access.offset.is_none() {
                        self.attach_env(graph, get, pc, locals);
                    }
                    locals[inst.reg_a as usize] = get;
                }
            }

            Opcode::ArrayGet | Opcode::ArrayPut => {
                let array = self.read(locals, inst.reg_b, pc)?;
                let index = self.read(locals, inst.reg_c, pc)?;
                let checked = self.null_check(graph, block, array, pc, locals);
                let length = graph.add_inst(
                    InstKind::ArrayLength,
                    smallvec![checked],
                    ValueType::Int,
                    pc,
                );
                graph.append(block, length);
                let bounds = graph.add_inst(
                    InstKind::BoundsCheck,
                    smallvec![index, length],
                    ValueType::Int,
                    pc,
                );
                graph.append(block, bounds);
                self.attach_env(graph, bounds, pc, locals);
                if inst.opcode == Opcode::ArrayGet {
                    let get = graph.add_inst(
                        InstKind::ArrayGet,
                        smallvec![checked, bounds],
                        ValueType::Int,
                        pc,
                    );
                    graph.append(block, get);
                    locals[inst.reg_a as usize] = get;
                } else {
                    let value = self.read(locals, inst.reg_a, pc)?;
                    let set = graph.add_inst(
                        InstKind::ArraySet,
                        smallvec![checked, bounds, value],
                        ValueType::Void,
                        pc,
                    );
                    graph.append(block, set);
                }
            }

            Opcode::ArrayLength => {
                let array = self.read(locals, inst.reg_b, pc)?;
                let checked = self.null_check(graph, block, array, pc, locals);
                let length = graph.add_inst(
                    InstKind::ArrayLength,
                    smallvec![checked],
                    ValueType::Int,
                    pc,
                );
                graph.append(block, length);
                locals[inst.reg_a as usize] = length;
            }

            Opcode::NewArray => {
                let length = self.read(locals, inst.reg_b, pc)?;
                let array = graph.add_inst(
                    InstKind::NewArray { type_index: inst.imm },
                    smallvec![length],
                    ValueType::Ref,
                    pc,
                );
                graph.append(block, array);
                self.attach_env(graph, array, pc, locals);
                locals[inst.reg_a as usize] = array;
            }

            Opcode::NewInstance => {
                let object = graph.add_inst(
                    InstKind::NewInstance { type_index: inst.imm },
                    smallvec![],
                    ValueType::Ref,
                    pc,
                );
                graph.append(block, object);
                self.attach_env(graph, object, pc, locals);
                let fence = graph.add_inst(
                    InstKind::ConstructorFence,
                    smallvec![object],
                    ValueType::Void,
                    pc,
                );
                graph.append(block, fence);
                locals[inst.reg_a as usize] = object;
            }

            Opcode::CheckCast => {
                let object = self.read(locals, inst.reg_a, pc)?;
                let cast = graph.add_inst(
                    InstKind::CheckCast { type_index: inst.imm },
                    smallvec![object],
                    ValueType::Void,
                    pc,
                );
                graph.append(block, cast);
                self.attach_env(graph, cast, pc, locals);
            }

            Opcode::InstanceOf => {
                let object = self.read(locals, inst.reg_b, pc)?;
                let test = graph.add_inst(
                    InstKind::InstanceOf { type_index: inst.imm },
                    smallvec![object],
                    ValueType::Int,
                    pc,
                );
                graph.append(block, test);
                locals[inst.reg_a as usize] = test;
            }

            Opcode::MonitorEnter | Opcode::MonitorExit => {
                let object = self.read(locals, inst.reg_a, pc)?;
                let is_enter = inst.opcode == Opcode::MonitorEnter;
                let op = graph.add_inst(
                    InstKind::MonitorOp { is_enter },
                    smallvec![object],
                    ValueType::Void,
                    pc,
                );
                graph.append(block, op);
                self.attach_env(graph, op, pc, locals);
            }

            Opcode::InvokeVirtual
            | Opcode::InvokeVirtualQuick
            | Opcode::InvokeStatic
            | Opcode::InvokeInterface => {
                let kind = self.invoke_kind(inst);
                let is_static = inst.opcode == Opcode::InvokeStatic;
                let mut inputs: SmallVec<[InstId; 2]> = smallvec![];
                for i in 0..inst.reg_b {
                    inputs.push(self.read(locals, inst.reg_a + i, pc)?);
                }
                if !is_static && !inputs.is_empty() {
                    inputs[0] = self.null_check(graph, block, inputs[0], pc, locals);
                }
                let call =
                    graph.add_inst(InstKind::Invoke(kind), inputs, ValueType::Unknown, pc);
                graph.append(block, call);
                self.attach_env(graph, call, pc, locals);
                locals[inst.reg_a as usize] = call;
            }

            // Every opcode family is handled above; the guards keep the
            // compiler from proving it.
            other => {
                return Err(CompileError::InvalidBytecode(format!(
                    "unhandled opcode {other} at pc {pc}"
                )));
            }
        }
        Ok(false)
    }

    fn instance_field_access(&self, inst: &InstRef) -> FieldAccess {
        if inst.opcode.is_quickened() {
            // The index operand already is a byte offset.
            return FieldAccess {
                field_index: inst.imm,
                offset: Some(inst.imm as u32),
                is_volatile: false,
                is_static: false,
            };
        }
        let is_put = inst.opcode.is_field_put();
        let resolved = self.resolver.resolve_instance_field(inst.imm, is_put);
        FieldAccess {
            field_index: inst.imm,
            offset: resolved.map(|f| f.offset),
            is_volatile: resolved.map(|f| f.is_volatile).unwrap_or(false),
            is_static: false,
        }
    }

    fn invoke_kind(&self, inst: &InstRef) -> InvokeKind {
        match inst.opcode {
            Opcode::InvokeStatic => InvokeKind::Static { method_index: inst.imm },
            Opcode::InvokeInterface => InvokeKind::Interface { method_index: inst.imm },
            Opcode::InvokeVirtualQuick => InvokeKind::Virtual {
                method_index: inst.imm,
                vtable_index: Some(inst.imm),
            },
            _ => match self.resolver.resolve_virtual_method(inst.imm) {
                Some(vtable_index) => InvokeKind::Virtual {
                    method_index: inst.imm,
                    vtable_index: Some(vtable_index),
                },
                None => InvokeKind::Unresolved { method_index: inst.imm },
            },
        }
    }

    fn read(&self, locals: &[InstId], reg: u8, pc: u32) -> Result<InstId, CompileError> {
        let value = locals[reg as usize];
        if value.is_valid() {
            Ok(value)
        } else {
            Err(CompileError::InvalidBytecode(format!(
                "read of uninitialized register v{reg} at pc {pc}"
            )))
        }
    }

    fn null_check(
        &self,
        graph: &mut Graph,
        block: BlockId,
        value: InstId,
        pc: u32,
        locals: &[InstId],
    ) -> InstId {
        let check = graph.add_inst(InstKind::NullCheck, smallvec![value], ValueType::Ref, pc);
        graph.append(block, check);
        self.attach_env(graph, check, pc, locals);
        check
    }

    fn attach_env(&self, graph: &mut Graph, inst: InstId, pc: u32, locals: &[InstId]) {
        graph.set_environment(inst, Environment { pc, vregs: locals.to_vec() });
    }
}
