use log::trace;
use rustc_hash::FxHashSet;

use super::Lowering;
use crate::ir::{Effects, Node, Opcode, Ty};

impl Lowering<'_> {
    /// Try to fold operand `idx` of `parent` into the encoding of `parent`.
    ///
    /// The operand must be used by `parent` only, it must produce the same
    /// value when evaluated at `parent`, and the target must be able to
    /// encode it in that operand slot.
    pub(super) fn try_contain(&mut self, parent: Node, idx: usize) -> bool {
        let child = parent.operand(self.lir, idx);
        if child.is_contained(self.lir) {
            return true;
        }

        if !child.is_single_use_by(self.lir, parent) {
            trace!("{} not contained in {}: multiple uses", child, parent);
            return false;
        }

        if !self.accepts_shape(parent, idx, child) {
            trace!("{} not contained in {}: not encodable", child, parent);
            return false;
        }

        if !self.is_invariant(child, parent) {
            trace!("{} not contained in {}: not invariant", child, parent);
            return false;
        }

        child.set_contained(self.lir, true);
        self.stats.contained += 1;
        true
    }

    /// Whether the target encodes `child` directly as operand `idx` of
    /// `parent`.
    fn accepts_shape(&self, parent: Node, idx: usize, child: Node) -> bool {
        let op = parent.op(self.lir);
        match child.op(self.lir) {
            Opcode::IConst(value) => {
                self.target
                    .accepts_imm(&op, parent.ty(self.lir), idx, value)
                    || self.is_zero_reg_operand(&op, idx, value, child.ty(self.lir))
            }
            Opcode::Load => self.target.supports_mem_operand(&op, idx),
            Opcode::Lea { .. } => idx == 0 && matches!(op, Opcode::Load | Opcode::Store),
            Opcode::LclVar(_) | Opcode::Proj(_) => true,
            _ => false,
        }
    }

    /// Whether a zero constant can be read from the zero register instead.
    fn is_zero_reg_operand(&self, op: &Opcode, idx: usize, value: i64, ty: Ty) -> bool {
        if value != 0 || !ty.is_int() || !self.target.has_zero_reg() {
            return false;
        }
        match op {
            _ if op.is_int_binary() => true,
            Opcode::Store => idx == 1,
            Opcode::Select | Opcode::SelectCC(_) | Opcode::CCmp { .. } => idx >= 1,
            _ => false,
        }
    }

    /// Whether `child`, together with its contained operands, evaluates to
    /// the same value at `parent` as at its own position.
    pub(super) fn is_invariant(&self, child: Node, parent: Node) -> bool {
        let lir = &*self.lir;
        let subtree = child.contained_subtree(lir);

        let mut locals = FxHashSet::default();
        let mut effects = Effects::empty();
        let mut only_consts = true;
        for node in subtree.iter() {
            if let Opcode::LclVar(local) = node.op(lir) {
                locals.insert(local);
            }
            effects |= node.effects(lir);
            only_consts &= node.op(lir).is_const();
        }

        let reads_memory = effects.contains(Effects::READS_MEMORY);
        let may_trap = effects.intersects(Effects::MAY_FAULT | Effects::MAY_THROW);

        for node in child.nodes_between(lir, parent) {
            if let Opcode::StoreLclVar(local) = node.op(lir) {
                if locals.contains(&local) {
                    return false;
                }
            }

            let between = node.effects(lir);
            if between.contains(Effects::CALL) && !only_consts {
                return false;
            }
            if between.contains(Effects::DEFINES_MEMORY) && reads_memory {
                return false;
            }
            if between.intersects(Effects::MAY_FAULT | Effects::MAY_THROW) && may_trap {
                return false;
            }
        }
        true
    }

    /// Decide the containment of every operand of the node.
    pub(super) fn contain_operands(&mut self, node: Node) {
        let op = node.op(self.lir);
        if op.is_commutative() || matches!(op, Opcode::Cmp(_)) {
            self.canonicalize_operands(node);
        }

        for idx in 0..node.operands(self.lir).len() {
            let operand = node.operand(self.lir, idx);
            if operand.is_contained(self.lir) {
                continue;
            }
            match operand.ty(self.lir) {
                Ty::Flags | Ty::Multi | Ty::Void => continue,
                _ => {}
            }
            let contained = matches!(
                operand.op(self.lir),
                Opcode::IConst(_)
                    | Opcode::Load
                    | Opcode::Lea { .. }
                    | Opcode::LclVar(_)
                    | Opcode::Proj(_)
            ) && self.try_contain(node, idx);
            if !contained && self.target.supports_mem_operand(&op, idx) {
                trace!("{} is read from memory by {} if spilled", operand, node);
                node.set_reg_optional(self.lir, idx);
                self.stats.reg_optional += 1;
            }
        }
    }

    /// Move a constant or a memory operand of a commutative node into the
    /// second slot, where encodings accept them.
    fn canonicalize_operands(&mut self, node: Node) {
        let lir = &*self.lir;
        let op = node.op(lir);
        let ty = node.ty(lir);

        if node.operands(lir).len() != 2 {
            return;
        }

        let lhs = node.operand(lir, 0);
        let rhs = node.operand(lir, 1);
        let lhs_const = lhs.as_iconst(lir).is_some();
        let rhs_const = rhs.as_iconst(lir).is_some();
        let lhs_mem = lhs.op(lir) == Opcode::Load && self.target.supports_mem_operand(&op, 1);
        let rhs_mem = rhs.op(lir) == Opcode::Load;

        let swap = (lhs_const && !rhs_const) || (lhs_mem && !rhs_const && !rhs_mem);
        if !swap {
            return;
        }

        node.swap_operands(self.lir, 0, 1);
        if let Opcode::Cmp(cond) = op {
            node.set_op(self.lir, Opcode::Cmp(cond.swap()), ty);
        }
        if ty == Ty::Flags {
            self.swap_flags_readers(node);
        }
        trace!("swapped the operands of {}", node);
    }

    /// The readers of the flags of a compare whose operands were swapped
    /// test the swapped conditions.
    fn swap_flags_readers(&mut self, node: Node) {
        for user in node.users(self.lir).to_vec() {
            let op = match user.op(self.lir) {
                Opcode::SetCC(cond) => Opcode::SetCC(cond.swap()),
                Opcode::SelectCC(cond) => Opcode::SelectCC(cond.swap()),
                Opcode::ThrowIf(cond) => Opcode::ThrowIf(cond.swap()),
                Opcode::CCmp { cond, pred, nzcv } => Opcode::CCmp {
                    cond,
                    pred: pred.swap(),
                    nzcv,
                },
                _ => continue,
            };
            let ty = user.ty(self.lir);
            user.set_op(self.lir, op, ty);
        }
    }

    /// Materialize the constant operands of the node again.
    pub(super) fn uncontain_consts(&mut self, node: Node) {
        for idx in 0..node.operands(self.lir).len() {
            let operand = node.operand(self.lir, idx);
            if operand.is_contained(self.lir) && operand.op(self.lir).is_const() {
                operand.set_contained(self.lir, false);
            }
        }
    }
}
