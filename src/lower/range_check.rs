//! Immediate operands of intrinsics.
//!
//! An intrinsic operand with a legal range `[lo, hi]` is encoded as an
//! immediate when it is a constant in range. Otherwise the intrinsic uses
//! its register form, guarded by an explicit check that raises a
//! bounds-violation for values outside the range.

use log::debug;

use super::{LowerError, Lowering};
use crate::{
    ir::{Cond, Node, Opcode, Ty},
    target::{ImmOperand, ImmPolicy},
};

/// Whether the single unsigned comparison of a range check fails, i.e.
/// `(value - lo) >= (hi - lo + 1)` as unsigned, which holds exactly when
/// `value < lo || value > hi`.
///
/// The comparison is done against `hi - lo` so that the full range does not
/// overflow.
pub fn range_check_fails(value: i64, lo: i64, hi: i64) -> bool {
    let span = (hi as u64).wrapping_sub(lo as u64);
    (value as u64).wrapping_sub(lo as u64) > span
}

impl Lowering<'_> {
    pub(super) fn lower_imm_operand(
        &mut self,
        node: Node,
        imm: ImmOperand,
    ) -> Result<(), LowerError> {
        let operand = node.operand(self.lir, imm.operand);

        if let Some(value) = operand.as_iconst(self.lir) {
            if imm.contains(value) {
                if self.config.containment {
                    self.contain_imm(node, imm.operand);
                } else {
                    node.set_imm_fallback(self.lir, true);
                }
                return Ok(());
            }

            match imm.policy {
                ImmPolicy::Contract => {
                    return Err(LowerError::ImmOutOfRange {
                        node,
                        value,
                        lo: imm.lo,
                        hi: imm.hi,
                    })
                }
                ImmPolicy::Check => {
                    debug!(
                        "immediate {} of {} is outside [{}, {}], checked at runtime",
                        value, node, imm.lo, imm.hi
                    );
                }
            }
        }

        self.emit_range_check(node, imm)?;
        node.set_imm_fallback(self.lir, true);
        Ok(())
    }

    /// Contain the constant operand, cloning it if it has other users.
    fn contain_imm(&mut self, node: Node, idx: usize) {
        let mut operand = node.operand(self.lir, idx);
        if !operand.is_single_use_by(self.lir, node) {
            let op = operand.op(self.lir);
            let ty = operand.ty(self.lir);
            operand = self.insert_before(node, op, ty, &[]);
            node.set_operand(self.lir, idx, operand);
        }
        operand.set_contained(self.lir, true);
        self.stats.contained += 1;
    }

    /// Insert the check of operand `imm.operand` right before the node.
    ///
    /// ```text
    /// d = sub v, lo              (omitted if lo == 0)
    /// f = cmp.uge d, hi - lo + 1 (flags)
    ///     throw_if.uge f
    /// ```
    fn emit_range_check(&mut self, node: Node, imm: ImmOperand) -> Result<(), LowerError> {
        let operand = node.operand(self.lir, imm.operand);
        let ty = operand.ty(self.lir);

        let span = (imm.hi as u64).wrapping_sub(imm.lo as u64);
        let max = if ty == Ty::I32 {
            u64::from(u32::MAX)
        } else {
            u64::MAX
        };
        if span >= max {
            // every value is in range
            return Ok(());
        }

        let mut inserted = Vec::new();
        let value = if imm.lo == 0 {
            operand
        } else {
            let lo = self.insert_before(node, Opcode::IConst(imm.lo), ty, &[]);
            let sub = self.insert_before(node, Opcode::Sub, ty, &[operand, lo]);
            inserted.extend([lo, sub]);
            sub
        };

        let bound = span + 1;
        let bound = if ty == Ty::I32 {
            bound as u32 as i32 as i64
        } else {
            bound as i64
        };
        let bound = self.insert_before(node, Opcode::IConst(bound), ty, &[]);
        let cmp = self.insert_before(node, Opcode::Cmp(Cond::Uge), Ty::Flags, &[value, bound]);
        let throw = self.insert_before(node, Opcode::ThrowIf(Cond::Uge), Ty::Void, &[cmp]);
        inserted.extend([bound, cmp, throw]);

        for inserted in inserted {
            self.lower_node(inserted)?;
        }
        self.stats.range_checks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::range_check_fails;

    #[test]
    fn test_range_check_edges() {
        assert!(range_check_fails(-1, 0, 255));
        assert!(!range_check_fails(0, 0, 255));
        assert!(!range_check_fails(255, 0, 255));
        assert!(range_check_fails(256, 0, 255));
        assert!(range_check_fails(300, 0, 255));
        assert!(range_check_fails(-11, -10, 10));
        assert!(!range_check_fails(-10, -10, 10));
        assert!(!range_check_fails(i64::MIN, i64::MIN, i64::MAX));
        assert!(!range_check_fails(i64::MAX, i64::MIN, i64::MAX));
        assert!(range_check_fails(i64::MIN, i64::MIN + 1, i64::MAX));
    }
}
