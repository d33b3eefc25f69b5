//! # Linear-Scan Register Allocation
//!
//! The allocator works on the annotated IR left by the lowering. The
//! [RefPositionBuilder] turns every non-contained node into a run of
//! [RefPosition]s, the [LinearScan] walks them in order and hands out
//! registers, spilling when the register file runs out.
//!
//! Locations are numbered per non-contained node: node `i` owns `2i`, where
//! its operands are read and its scratch registers are defined, and `2i + 1`,
//! where registers are killed and results are defined.

mod alloc;
mod build;
mod consecutive;
mod interval;
mod ref_position;
mod verify;

use thiserror::Error;

pub use self::{
    alloc::{AllocEvent, AllocStats, AllocationResult, LinearScan},
    build::{LsraBuild, RefPositionBuilder},
    consecutive::get_free_candidates,
    interval::{Interval, IntervalId, IntervalOrigin, IntervalState, SpillSlot},
    ref_position::{RefKind, RefPosition, RefPositionId},
    verify::check_allocation,
};
use crate::{
    ir::{Node, Ty},
    target::{RegKind, RegMask, TargetDesc},
};

#[derive(Debug, Clone, Copy)]
pub struct LsraConfig {
    /// Only hand out the `n` lowest allocatable registers of each file.
    pub reg_limit: Option<u8>,
    /// Prefer consecutive windows keeping group members where they are.
    pub reuse_consecutive: bool,
    /// Check the allocation after it is done.
    pub verify: bool,
}

impl Default for LsraConfig {
    fn default() -> Self {
        Self {
            reg_limit: None,
            reuse_consecutive: true,
            verify: true,
        }
    }
}

impl LsraConfig {
    /// The registers of the kind the allocator may hand out.
    pub fn allocatable(&self, target: &dyn TargetDesc, kind: RegKind) -> RegMask {
        let mask = target.allocatable(kind);
        match self.reg_limit {
            Some(limit) => mask.limit(limit),
            None => mask,
        }
    }
}

#[derive(Debug, Error)]
pub enum LsraError {
    #[error("{node} produces a {ty} value, which has no register on {target}")]
    NoRegKind {
        node: Node,
        ty: Ty,
        target: &'static str,
    },

    #[error("{count} consecutive {kind} registers requested at {node}, the file has {size}")]
    GroupTooLarge {
        node: Node,
        kind: RegKind,
        count: u8,
        size: u8,
    },

    #[error("no window of {count} consecutive {kind} registers can be formed at {node}")]
    NoWindow {
        node: Node,
        kind: RegKind,
        count: u8,
    },

    #[error("no {kind} register left for {node} at location {location}")]
    NoRegister {
        node: Node,
        kind: RegKind,
        location: u32,
    },

    #[error("{node} is read before it is defined")]
    Undefined { node: Node },

    #[error("{interval} is used at location {location} before it is defined")]
    UseBeforeDef {
        interval: IntervalId,
        location: u32,
    },

    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),
}
