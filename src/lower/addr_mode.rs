//! Address mode formation.
//!
//! A single-use tree of additions computing the address of a load or a
//! store is flattened into `base + index * scale + offset` and the root
//! addition is rewritten into a contained [Opcode::Lea]. When the target
//! cannot encode the whole expression, the part it cannot encode is kept
//! in a separate addition right before the memory access.

use log::trace;

use super::{LowerError, Lowering};
use crate::{
    ir::{Node, Opcode, Ty},
    target::AddrMode,
};

#[derive(Default)]
struct AddrTerms {
    /// Terms added as they are.
    regs: Vec<Node>,
    /// The scaled index term.
    scaled: Option<(Node, u8)>,
    offset: i64,
}

impl Lowering<'_> {
    pub(super) fn form_addr_mode(&mut self, mem: Node) -> Result<(), LowerError> {
        let lir = &*self.lir;
        let addr = mem.operand(lir, 0);
        if addr.op(lir) != Opcode::Add
            || addr.is_contained(lir)
            || !addr.is_single_use_by(lir, mem)
            || !self.is_invariant(addr, mem)
        {
            return Ok(());
        }

        let access = match mem.op(lir) {
            Opcode::Store => mem.operand(lir, 1).ty(lir).bytes(),
            _ => mem.ty(lir).bytes(),
        };

        let Some(terms) = self.flatten_addr(addr, mem, access) else {
            trace!("address of {} has a shape no mode covers", mem);
            return Ok(());
        };

        let (mut base, mut index, scale) = match (terms.regs.as_slice(), terms.scaled) {
            ([base], Some((index, scale))) => (*base, Some(index), scale),
            ([], Some((index, 1))) => (index, None, 1),
            ([base], None) => (*base, None, 1),
            ([base, index], None) => (*base, Some(*index), 1),
            _ => {
                trace!("address of {} has too many terms", mem);
                return Ok(());
            }
        };
        let mut offset = terms.offset;
        let ptr_ty = addr.ty(self.lir);
        let mut inserted = Vec::new();

        // the target has no index form, keep the sum in a register
        if let Some(idx) = index.filter(|_| !self.target.supports_index()) {
            base = self.insert_before(mem, Opcode::Add, ptr_ty, &[base, idx]);
            inserted.push(base);
            index = None;
        }

        let mode = AddrMode {
            access,
            has_index: index.is_some(),
            scale,
            offset,
        };
        if !self.target.legal_addr_mode(&mode) {
            let imm = self.insert_before(mem, Opcode::IConst(offset), Ty::I64, &[]);
            base = self.insert_before(mem, Opcode::Add, ptr_ty, &[base, imm]);
            inserted.push(imm);
            inserted.push(base);
            offset = 0;
        }

        let old_operands = addr.operands(self.lir).to_vec();
        addr.set_op(self.lir, Opcode::Lea { scale, offset }, ptr_ty);
        match index {
            Some(index) => addr.set_operands(self.lir, [base, index]),
            None => addr.set_operands(self.lir, [base]),
        }
        for node in old_operands {
            self.remove_if_dead(node);
        }

        // the inserted operands must be defined before the address
        addr.move_before(self.lir, mem);

        trace!(
            "address of {} folded into {}{}",
            mem,
            addr.display(self.lir),
            if inserted.is_empty() { "" } else { " (partial)" }
        );

        if inserted.is_empty() {
            self.stats.addr_modes_full += 1;
        } else {
            self.stats.addr_modes_partial += 1;
            for node in inserted {
                self.lower_node(node)?;
            }
        }
        Ok(())
    }

    /// Split the address tree rooted at `root` into its terms.
    fn flatten_addr(&self, root: Node, mem: Node, access: u32) -> Option<AddrTerms> {
        let lir = &*self.lir;
        let scale_ok = |scale: u8| {
            self.target.supports_index()
                && self.target.legal_addr_mode(&AddrMode {
                    access,
                    has_index: true,
                    scale,
                    offset: 0,
                })
        };

        // contained leaves are read from the register of the value they load
        let is_reg = |node: Node| !node.is_contained(lir) || node.op(lir).is_reg_resident_leaf();

        let mut terms = AddrTerms::default();
        let mut worklist: Vec<(Node, Node)> = root
            .operands(lir)
            .iter()
            .rev()
            .map(|operand| (*operand, root))
            .collect();

        while let Some((node, parent)) = worklist.pop() {
            if let Some(value) = node.as_iconst(lir) {
                if let Some(sum) = terms.offset.checked_add(value) {
                    terms.offset = sum;
                    continue;
                }
            }

            let foldable = !node.is_contained(lir)
                && node.is_single_use_by(lir, parent)
                && node.ty(lir).is_int()
                && self.is_invariant(node, mem);

            if foldable {
                match node.op(lir) {
                    Opcode::Add => {
                        worklist.extend(node.operands(lir).iter().rev().map(|o| (*o, node)));
                        continue;
                    }
                    Opcode::Shl if terms.scaled.is_none() => {
                        let shift = node.operand(lir, 1).as_iconst(lir);
                        let index = node.operand(lir, 0);
                        if let Some(shift @ 0..=3) = shift.filter(|_| is_reg(index)) {
                            let scale = 1u8 << shift;
                            if scale_ok(scale) {
                                terms.scaled = Some((index, scale));
                                continue;
                            }
                        }
                    }
                    Opcode::Mul if terms.scaled.is_none() => {
                        let lhs = node.operand(lir, 0);
                        let rhs = node.operand(lir, 1);
                        let scaled = match (lhs.as_iconst(lir), rhs.as_iconst(lir)) {
                            (_, Some(scale @ (1 | 2 | 4 | 8))) => Some((lhs, scale as u8)),
                            (Some(scale @ (1 | 2 | 4 | 8)), _) => Some((rhs, scale as u8)),
                            _ => None,
                        };
                        let scaled = scaled.filter(|(index, scale)| is_reg(*index) && scale_ok(*scale));
                        if let Some((index, scale)) = scaled {
                            terms.scaled = Some((index, scale));
                            continue;
                        }
                    }
                    _ => {}
                }
            }

            // a contained operand has no register to be a term of
            if !is_reg(node) {
                return None;
            }
            terms.regs.push(node);
        }

        Some(terms)
    }
}
