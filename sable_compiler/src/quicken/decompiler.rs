//! Quicken-table decompiler: regenerates original bytecode in place.
//!
//! Walks a quickened stream consuming table entries positionally, exactly
//! like the replay mode of the compiler, and restores each site's original
//! opcode and index. Used to revert a shared blob after a table mismatch,
//! and as the round-trip anchor for tests.

use crate::error::CompileError;
use sable_bytecode::{instruction, InstRef, Opcode, QuickenTable, NO_INDEX};

/// Restore `code` to its pre-quickening form using `table`.
///
/// `decompile_return_void` controls whether barrier-free returns are
/// restored; the revert path leaves them, since the table carries no entry
/// for them.
pub fn decompile(
    code: &mut [u16],
    table: &QuickenTable<'_>,
    decompile_return_void: bool,
) -> Result<(), CompileError> {
    let mut index = 0usize;
    let mut next = |method_pc: u32| -> Result<u16, CompileError> {
        if index >= table.num_indices() as usize {
            return Err(CompileError::InvariantViolation {
                pass: "dequicken".to_string(),
                detail: format!("quicken table exhausted at pc {method_pc:#x}"),
            });
        }
        let value = table.get(index);
        index += 1;
        Ok(value)
    };

    let mut pc = 0u32;
    while (pc as usize) < code.len() {
        let inst = InstRef::decode(code, pc)
            .map_err(|e| CompileError::InvalidBytecode(e.to_string()))?;
        let mut advance = inst.width() as u32;

        match inst.opcode {
            Opcode::ReturnVoidNoBarrier => {
                if decompile_return_void {
                    instruction::set_opcode(code, pc, Opcode::ReturnVoid);
                }
            }

            Opcode::IGetQuick
            | Opcode::IGetWideQuick
            | Opcode::IGetObjectQuick
            | Opcode::IPutQuick
            | Opcode::IPutWideQuick
            | Opcode::IPutObjectQuick
            | Opcode::InvokeVirtualQuick => {
                let original_index = next(pc)?;
                let slow = inst
                    .opcode
                    .slow_form()
                    .expect("quickened opcode has a slow twin");
                instruction::set_opcode(code, pc, slow);
                instruction::set_index(code, &inst, original_index);
            }

            Opcode::Nop => {
                let reference = next(pc)?;
                if reference != NO_INDEX {
                    // Two nops that used to be a check-cast: the first
                    // entry is the operand register, the second the type.
                    let type_index = next(pc)?;
                    instruction::set_unit(code, pc as usize, Opcode::CheckCast, reference as u8);
                    code[pc as usize + 1] = type_index;
                    advance += 1;
                }
            }

            _ => {}
        }

        pc += advance;
    }

    if index != table.num_indices() as usize {
        return Err(CompileError::InvariantViolation {
            pass: "dequicken".to_string(),
            detail: format!(
                "{} quicken entries left after decompiling",
                table.num_indices() as usize - index
            ),
        });
    }
    Ok(())
}
