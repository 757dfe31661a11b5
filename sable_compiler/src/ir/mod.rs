//! Graph intermediate representation.
//!
//! The IR is a control-flow graph of basic blocks holding SSA instructions.
//! Instructions live in a slab owned by the [`graph::Graph`]; all references
//! between them are [`node::InstId`] indices into that slab, so a whole
//! method's graph drops at once.

pub mod builder;
pub mod checker;
pub mod graph;
pub mod node;
pub mod side_effects;

pub use graph::{Block, BlockId, Graph, LoopId, LoopInfo, TryCatchKind};
pub use node::{
    CondKind, Environment, FieldAccess, Inst, InstId, InstKind, InvokeKind, Use, ValueType,
};
pub use side_effects::SideEffects;
