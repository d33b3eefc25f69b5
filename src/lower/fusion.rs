//! Multi-node idioms collapsed into one node.
//!
//! Every fusion needs the intermediate values to be used by the fused node
//! only, and to be invariant up to the fused node. The intermediate nodes
//! are removed once the rewrite leaves them without users.

use log::trace;

use super::Lowering;
use crate::ir::{Effects, Node, Opcode, Ty};

impl Lowering<'_> {
    /// Try all the fusions on the node.
    pub(super) fn fuse(&mut self, node: Node) {
        self.fold_neg(node);

        let fused = self.fuse_mul_add(node)
            || self.fuse_float_mul_add(node)
            || self.fuse_ccmp(node)
            || self.fuse_select_cc(node);

        if fused {
            self.stats.fused += 1;
            trace!("fused into {}", node.display(self.lir));
        }
    }

    /// Whether `child` can be merged into `parent`.
    fn is_fusable(&self, child: Node, parent: Node) -> bool {
        !child.is_contained(self.lir)
            && child.is_single_use_by(self.lir, parent)
            && self.is_invariant(child, parent)
    }

    /// `x + (-y)` into `x - y`, `x - (-y)` into `x + y`.
    fn fold_neg(&mut self, node: Node) -> bool {
        let lir = &*self.lir;
        let ty = node.ty(lir);
        let (neg_op, add_op, sub_op) = match node.op(lir) {
            Opcode::Add | Opcode::Sub => (Opcode::Neg, Opcode::Add, Opcode::Sub),
            Opcode::FAdd | Opcode::FSub => (Opcode::FNeg, Opcode::FAdd, Opcode::FSub),
            _ => return false,
        };
        let is_add = node.op(lir) == add_op;

        let lhs = node.operand(lir, 0);
        let rhs = node.operand(lir, 1);
        let is_neg = |n: Node| n.op(lir) == neg_op && self.is_fusable(n, node);

        let (keep, neg, new_op) = if is_neg(rhs) {
            (lhs, rhs, if is_add { sub_op } else { add_op })
        } else if is_add && is_neg(lhs) {
            (rhs, lhs, sub_op)
        } else {
            return false;
        };

        let negated = neg.operand(lir, 0);
        node.set_op(self.lir, new_op, ty);
        node.set_operands(self.lir, [keep, negated]);
        self.remove_if_dead(neg);
        self.stats.fused += 1;
        trace!("folded negation {} into {}", neg, node);
        true
    }

    /// `c + a * b` into `MulAdd [a, b, c]`, `c - a * b` into `MulSub`.
    fn fuse_mul_add(&mut self, node: Node) -> bool {
        let lir = &*self.lir;
        let ty = node.ty(lir);
        if !ty.is_int() || !self.target.supports_madd() {
            return false;
        }

        let (mul, addend, negate) = match node.op(lir) {
            Opcode::Add | Opcode::Sub => {
                let lhs = node.operand(lir, 0);
                let rhs = node.operand(lir, 1);
                let is_mul = |n: Node| n.op(lir) == Opcode::Mul && self.is_fusable(n, node);
                match node.op(lir) {
                    Opcode::Sub if is_mul(rhs) => (rhs, lhs, true),
                    Opcode::Add if is_mul(rhs) => (rhs, lhs, false),
                    Opcode::Add if is_mul(lhs) => (lhs, rhs, false),
                    _ => return false,
                }
            }
            _ => return false,
        };

        let a = mul.operand(lir, 0);
        let b = mul.operand(lir, 1);
        let op = if negate { Opcode::MulSub } else { Opcode::MulAdd };
        node.set_op(self.lir, op, ty);
        node.set_operands(self.lir, [a, b, addend]);
        self.remove_if_dead(mul);

        self.fold_neg_into_product(node);
        self.uncontain_consts(node);
        true
    }

    /// `c + a * b` and `c - a * b` on floats into [Opcode::FMulAdd].
    fn fuse_float_mul_add(&mut self, node: Node) -> bool {
        let lir = &*self.lir;
        let ty = node.ty(lir);
        if !ty.is_float() || !self.target.supports_fma() {
            return false;
        }

        let (mul, addend, negate_product) = match node.op(lir) {
            Opcode::FAdd | Opcode::FSub => {
                let lhs = node.operand(lir, 0);
                let rhs = node.operand(lir, 1);
                let is_mul = |n: Node| n.op(lir) == Opcode::FMul && self.is_fusable(n, node);
                match node.op(lir) {
                    Opcode::FSub if is_mul(rhs) => (rhs, lhs, true),
                    Opcode::FAdd if is_mul(rhs) => (rhs, lhs, false),
                    Opcode::FAdd if is_mul(lhs) => (lhs, rhs, false),
                    _ => return false,
                }
            }
            _ => return false,
        };

        let a = mul.operand(lir, 0);
        let b = mul.operand(lir, 1);
        node.set_op(self.lir, Opcode::FMulAdd { negate_product }, ty);
        node.set_operands(self.lir, [a, b, addend]);
        self.remove_if_dead(mul);

        self.fold_neg_into_product(node);
        true
    }

    /// A negated factor of a fused multiply flips the sign of the product.
    fn fold_neg_into_product(&mut self, node: Node) {
        for idx in 0..2 {
            let lir = &*self.lir;
            let factor = node.operand(lir, idx);
            let flipped = match (node.op(lir), factor.op(lir)) {
                (Opcode::MulAdd, Opcode::Neg) => Opcode::MulSub,
                (Opcode::MulSub, Opcode::Neg) => Opcode::MulAdd,
                (Opcode::FMulAdd { negate_product }, Opcode::FNeg) => Opcode::FMulAdd {
                    negate_product: !negate_product,
                },
                _ => continue,
            };
            if !self.is_fusable(factor, node) {
                continue;
            }

            let ty = node.ty(lir);
            let negated = factor.operand(lir, 0);
            node.set_op(self.lir, flipped, ty);
            node.set_operand(self.lir, idx, negated);
            self.remove_if_dead(factor);
            trace!("folded negation {} into {}", factor, node);
        }
    }

    /// `And/Or` of compares into a conditional compare chain.
    ///
    /// ```text
    /// a = cmp.c1 p0, q0         a = cmp.c1 p0, q0      (flags)
    /// b = cmp.c2 p1, q1    =>   b = ccmp.c2 a, p1, q1  (flags)
    /// r = and a, b              r = setcc.c2 b
    /// ```
    ///
    /// The first operand may also be the `setcc` of an earlier chain, which
    /// extends that chain.
    fn fuse_ccmp(&mut self, node: Node) -> bool {
        let lir = &*self.lir;
        let is_and = match node.op(lir) {
            Opcode::And => true,
            Opcode::Or => false,
            _ => return false,
        };
        if !self.target.supports_ccmp() {
            return false;
        }

        let is_cmp = |n: Node| {
            matches!(n.op(lir), Opcode::Cmp(_))
                && n.ty(lir) != Ty::Flags
                && n.operand(lir, 0).ty(lir).is_int()
        };
        let is_setcc = |n: Node| matches!(n.op(lir), Opcode::SetCC(_));

        let lhs = node.operand(lir, 0);
        let rhs = node.operand(lir, 1);
        let (first, second) = if is_cmp(rhs) && (is_cmp(lhs) || is_setcc(lhs)) {
            (lhs, rhs)
        } else if is_cmp(lhs) && is_setcc(rhs) {
            (rhs, lhs)
        } else {
            return false;
        };
        if !first.is_single_use_by(lir, node) || !second.is_single_use_by(lir, node) {
            return false;
        }

        // the flags producers to move down, in program order
        let (c1, chain) = match first.op(lir) {
            Opcode::Cmp(c1) => (c1, vec![first]),
            Opcode::SetCC(c1) => match self.flags_chain(first) {
                Some(chain) => (c1, chain),
                None => return false,
            },
            _ => return false,
        };
        let Opcode::Cmp(c2) = second.op(lir) else {
            return false;
        };

        let moved = chain.iter().copied().chain([second]).collect::<Vec<_>>();
        if moved
            .iter()
            .any(|n| n.is_contained(lir) || !self.is_invariant(*n, node))
        {
            trace!("{} not fused into a compare chain: not invariant", node);
            return false;
        }

        // moving the chain must not split another flags producer from its
        // consumers
        let earliest = if second.precedes(lir, chain[0]) {
            second
        } else {
            chain[0]
        };
        let clobbered = earliest
            .nodes_between(lir, node)
            .into_iter()
            .any(|n| !moved.contains(&n) && n.effects(lir).contains(Effects::SETS_FLAGS));
        if clobbered {
            trace!("{} not fused into a compare chain: flags in between", node);
            return false;
        }

        let (pred, nzcv) = if is_and {
            (c1, c2.reverse().truthifying_flags())
        } else {
            (c1.reverse(), c2.truthifying_flags())
        };

        let flags = match first.op(lir) {
            Opcode::Cmp(_) => {
                first.set_op(self.lir, Opcode::Cmp(c1), Ty::Flags);
                first
            }
            _ => first.operand(lir, 0),
        };

        let p = second.operand(self.lir, 0);
        let q = second.operand(self.lir, 1);
        second.set_op(self.lir, Opcode::CCmp { cond: c2, pred, nzcv }, Ty::Flags);
        second.set_operands(self.lir, [flags, p, q]);

        node.set_op(self.lir, Opcode::SetCC(c2), Ty::I32);
        node.set_operands(self.lir, [second]);
        if first != flags {
            first.remove(self.lir);
        }

        for n in moved {
            n.move_before(self.lir, node);
        }

        // the encodable immediates of a conditional compare differ
        self.uncontain_consts(second);
        if self.config.containment {
            self.contain_operands(second);
        }
        true
    }

    /// The flags producers of an earlier chain read by `setcc`, in program
    /// order, if every one of them only feeds the next.
    fn flags_chain(&self, setcc: Node) -> Option<Vec<Node>> {
        let lir = &*self.lir;
        let mut chain = Vec::new();
        let mut user = setcc;
        let mut curr = setcc.operand(lir, 0);
        loop {
            if !curr.is_single_use_by(lir, user) {
                return None;
            }
            chain.push(curr);
            match curr.op(lir) {
                Opcode::CCmp { .. } => {
                    user = curr;
                    curr = curr.operand(lir, 0);
                }
                Opcode::Cmp(_) => break,
                _ => return None,
            }
        }
        chain.reverse();
        Some(chain)
    }

    /// `Select` on a compare into a `SelectCC` reading the flags.
    fn fuse_select_cc(&mut self, node: Node) -> bool {
        let lir = &*self.lir;
        if node.op(lir) != Opcode::Select || !self.target.supports_select_cc() {
            return false;
        }

        let ty = node.ty(lir);
        let cond_node = node.operand(lir, 0);
        if !cond_node.is_single_use_by(lir, node) || cond_node.is_contained(lir) {
            return false;
        }
        let sets_flags_between = |from: Node, to: Node| {
            from.nodes_between(lir, to)
                .into_iter()
                .any(|n| n.effects(lir).contains(Effects::SETS_FLAGS))
        };

        match cond_node.op(lir) {
            Opcode::Cmp(cond) if cond_node.ty(lir) != Ty::Flags => {
                if !self.is_invariant(cond_node, node) || sets_flags_between(cond_node, node) {
                    return false;
                }
                cond_node.set_op(self.lir, Opcode::Cmp(cond), Ty::Flags);
                cond_node.move_before(self.lir, node);
                node.set_op(self.lir, Opcode::SelectCC(cond), ty);
            }
            Opcode::SetCC(cond) => {
                let flags = cond_node.operand(lir, 0);
                if !flags.is_single_use_by(lir, cond_node) || sets_flags_between(flags, node) {
                    return false;
                }
                node.set_operand(self.lir, 0, flags);
                cond_node.remove(self.lir);
                node.set_op(self.lir, Opcode::SelectCC(cond), ty);
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::Cond;

    #[test]
    fn test_chain_literals_force_the_outcome() {
        // and: a failed first compare must make the chain false
        for c2 in Cond::ALL {
            assert!(!c2.holds(c2.reverse().truthifying_flags()));
            assert!(c2.holds(c2.truthifying_flags()));
        }
    }
}
