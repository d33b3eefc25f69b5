//! # Execution of the Lowered IR
//!
//! Two evaluators share the semantics of the nodes:
//!
//! - the [Reference] evaluator runs a block with an unlimited supply of
//!   values, one per node, and ignores containment entirely;
//! - the [Machine] runs a lowered and allocated block on a register file.
//!   Every operand is read from the register the allocation assigned to its
//!   reference position, and every spill, reload and copy the allocation
//!   decided on is performed in order.
//!
//! Running both on the same input and comparing the results checks an
//! allocation end to end. Registers a node clobbers are left undefined by
//! the machine, so reading a register the allocation let someone else
//! overwrite fails instead of silently producing a wrong value.

mod machine;
mod reference;
mod semantics;

use thiserror::Error;

pub use self::{
    machine::Machine,
    reference::Reference,
    semantics::{eval, Memory, Operand, Output, RegValue},
};
use crate::{
    ir::Node,
    lsra::{RefPositionId, SpillSlot},
    target::PReg,
};

/// A condition the program itself raises.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("bounds violation")]
    BoundsViolation,

    #[error("memory fault at {addr:#x}")]
    Fault { addr: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("trap: {0}")]
    Trap(#[from] Trap),

    #[error("parameter {0} is not given")]
    MissingParam(u32),

    #[error("local {0} is read before it is written")]
    UninitializedLocal(u32),

    #[error("{node} reads {reg:?}, which holds no value")]
    UndefinedReg { node: Node, reg: PReg },

    #[error("{0} has no register")]
    Unallocated(RefPositionId),

    #[error("{node} reads {slot}, which holds no value")]
    UndefinedSlot { node: Node, slot: SpillSlot },

    #[error("{node} is malformed: {reason}")]
    Malformed { node: Node, reason: &'static str },
}

pub type ExecResult<T> = Result<T, ExecError>;

/// The observable result of running a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// The returned value, if the block returns one.
    pub ret: Option<RegValue>,
    /// The memory after the block.
    pub memory: Memory,
}
