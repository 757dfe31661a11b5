//! Register-based bytecode model for the Sable VM.
//!
//! This crate defines the data the compiler core consumes and, on the
//! quickening path, rewrites in place:
//!
//! - A 16-bit code-unit instruction stream with fixed per-opcode widths
//! - The opcode table, including the pre-resolved ("quick") variants
//! - Method units and the physical code blobs they may share
//! - The quicken-table wire format (length-prefixed flat 16-bit indices)

pub mod instruction;
pub mod opcode;
pub mod quicken_table;
pub mod unit;

pub use instruction::{DecodeError, InstIter, InstRef};
pub use opcode::Opcode;
pub use quicken_table::{QuickenTable, QuickenTableBuilder, NO_INDEX};
pub use unit::{BlobId, BytecodeUnit, CodeBlob, MethodRef, SourceFileId, TryItem};
