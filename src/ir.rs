//! # Lowered IR
//!
//! A method is a list of [Node]s in program order. Every node is one
//! operation with its operands, an effect model and the use information the
//! lowering needs. Nodes live in the arena of [Lir] and are never freed,
//! removed nodes are unlinked and marked dead.

mod builder;
mod format;
mod lir;
mod node;
mod ty;
mod verify;

pub use builder::LirBuilder;
pub use format::{dump_block, NodeDisplay};
pub use lir::{Block, BlockData, Lir};
pub use node::{Cond, Effects, Node, NodeData, Nzcv, Opcode};
pub use ty::Ty;
pub use verify::{verify, OperandTy, VerifyError};
