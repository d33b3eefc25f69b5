//! # Containment Analysis
//!
//! The lowering walks the nodes of a block in program order and decides,
//! for every operand, whether it is folded into the encoding of its consumer
//! (contained) or materialized into a register. Multi-node idioms are fused
//! into one node first, so the fused node gets its operands contained like
//! any other node.
//!
//! Refusing to contain is never an error, the operand just stays in a
//! register. The only errors are internal compiler errors, e.g. a constant
//! immediate outside the range its producer guaranteed.

mod addr_mode;
mod containment;
mod fusion;
mod range_check;

use log::debug;
use thiserror::Error;

pub use self::range_check::range_check_fails;
use crate::{
    collections::linked_list::{ListContainer, ListNode},
    ir::{Block, Lir, Node, Opcode, Ty},
    target::TargetDesc,
};

#[derive(Debug, Clone, Copy)]
pub struct LowerConfig {
    /// Fold operands into their consumers. Without it every value lives in a
    /// register.
    pub containment: bool,
    /// Fuse multi-node idioms.
    pub fusion: bool,
    /// Form complex address modes for loads and stores.
    pub addr_modes: bool,
}

impl Default for LowerConfig {
    fn default() -> Self {
        Self {
            containment: true,
            fusion: true,
            addr_modes: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LowerStats {
    pub contained: usize,
    pub fused: usize,
    /// Address expressions folded completely.
    pub addr_modes_full: usize,
    /// Address expressions that needed a separate add.
    pub addr_modes_partial: usize,
    pub range_checks: usize,
    /// Operands left in registers that may be read from memory instead.
    pub reg_optional: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LowerError {
    #[error("immediate {value} of {node} is outside [{lo}, {hi}]")]
    ImmOutOfRange {
        node: Node,
        value: i64,
        lo: i64,
        hi: i64,
    },

    #[error("intrinsic {name} of {node} is not supported on {target}")]
    UnsupportedIntrinsic {
        node: Node,
        name: &'static str,
        target: &'static str,
    },
}

pub struct Lowering<'a> {
    lir: &'a mut Lir,
    block: Block,
    target: &'a dyn TargetDesc,
    config: LowerConfig,
    stats: LowerStats,
}

impl<'a> Lowering<'a> {
    pub fn new(
        lir: &'a mut Lir,
        block: Block,
        target: &'a dyn TargetDesc,
        config: LowerConfig,
    ) -> Self {
        Self {
            lir,
            block,
            target,
            config,
            stats: LowerStats::default(),
        }
    }

    /// Lower all the nodes of the block.
    ///
    /// Rewrites only touch the current node, nodes before it, or nodes
    /// inserted right before it, so the walk never revisits a node.
    pub fn run(mut self) -> Result<LowerStats, LowerError> {
        let mut cursor = self.block.cursor();
        while let Some(node) = cursor.next(self.lir) {
            self.lower_node(node)?;
        }

        debug!(
            "lowered on {}: {} contained, {} reg-optional, {} fused, {}+{} address modes, {} range checks",
            self.target.name(),
            self.stats.contained,
            self.stats.reg_optional,
            self.stats.fused,
            self.stats.addr_modes_full,
            self.stats.addr_modes_partial,
            self.stats.range_checks
        );
        Ok(self.stats)
    }

    fn lower_node(&mut self, node: Node) -> Result<(), LowerError> {
        if let Opcode::Intrinsic(id) = node.op(self.lir) {
            if !self.target.supports_intrinsic(id) {
                return Err(LowerError::UnsupportedIntrinsic {
                    node,
                    name: id.info().name,
                    target: self.target.name(),
                });
            }
        }

        if self.config.fusion {
            self.fuse(node);
        }

        match node.op(self.lir) {
            Opcode::Load | Opcode::Store if self.config.containment && self.config.addr_modes => {
                self.form_addr_mode(node)?;
            }
            Opcode::Intrinsic(id) => {
                if let Some(imm) = id.info().imm {
                    self.lower_imm_operand(node, imm)?;
                }
            }
            _ => {}
        }

        if self.config.containment {
            self.contain_operands(node);
        }
        Ok(())
    }

    /// Create a node and insert it right before `before`.
    fn insert_before(&mut self, before: Node, op: Opcode, ty: Ty, operands: &[Node]) -> Node {
        let node = Node::new(self.lir, op, ty, operands.iter().copied(), []);
        before.insert_before(self.lir, node);
        node
    }

    /// Remove the node if it has no users and no effects, then do the same
    /// for its operands.
    fn remove_if_dead(&mut self, node: Node) {
        let mut worklist = vec![node];
        while let Some(node) = worklist.pop() {
            if node.is_dead(self.lir) || node.use_count(self.lir) != 0 || !self.is_pure(node) {
                continue;
            }
            worklist.extend(node.operands(self.lir).iter().copied());
            node.remove(self.lir);
        }
    }

    fn is_pure(&self, node: Node) -> bool {
        match node.op(self.lir) {
            Opcode::Param(_)
            | Opcode::StoreLclVar(_)
            | Opcode::Store
            | Opcode::Call { .. }
            | Opcode::Return
            | Opcode::ThrowIf(_)
            | Opcode::Intrinsic(_) => false,
            _ => node.effects(self.lir).is_empty(),
        }
    }
}
