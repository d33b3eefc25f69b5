//! Structural checks on a block of lowered IR.
//!
//! The lowering and the allocator rely on these properties and never check
//! them again. The verifier runs on the input of the pipeline and, in debug
//! configurations, on the lowered output.

use std::{fmt, ops::RangeInclusive};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::{Block, Effects, Lir, Node, Opcode, Ty};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("{node} expects {expected:?} operands, found {found}")]
    Arity {
        node: Node,
        expected: RangeInclusive<usize>,
        found: usize,
    },

    #[error("operand {operand} of {node} is not defined before it")]
    UndefinedOperand { node: Node, operand: Node },

    #[error("operand {operand} of {node} has been removed")]
    DeadOperand { node: Node, operand: Node },

    #[error("the users of {operand} do not agree with the operands of {node}")]
    UserMismatch { node: Node, operand: Node },

    #[error("flags value {operand} is read by {node} outside of a flags slot")]
    FlagsOutsideSlot { node: Node, operand: Node },

    #[error("{node} expects a flags value, found {operand}")]
    NotFlags { node: Node, operand: Node },

    #[error("flags of {operand} are overwritten by {clobber} before {node} reads them")]
    FlagsClobbered {
        node: Node,
        operand: Node,
        clobber: Node,
    },

    #[error("{node} projects value {idx} of {operand}, which has fewer values")]
    BadProjection { node: Node, operand: Node, idx: u8 },

    #[error("local l{local} is read by {node} before any store")]
    UninitLocal { node: Node, local: u32 },

    #[error("contained node {node} must have exactly one user")]
    ContainedMultiUse { node: Node },

    #[error("parameter {node} follows other operations")]
    ParamOrder { node: Node },

    #[error("operand {idx} of {node} is {found}, expected {expected}")]
    OperandType {
        node: Node,
        idx: usize,
        expected: OperandTy,
        found: Ty,
    },
}

/// The types an operand slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandTy {
    /// An integer as wide as the type. Pointers and `i64` mix.
    Int(Ty),
    AnyInt,
    Exact(Ty),
    /// A 64-bit integer or a pointer.
    Address,
    /// Anything held in a register.
    Value,
}

impl OperandTy {
    /// Values of `ty` are read as `ty` itself.
    fn like(ty: Ty) -> Self {
        if ty.is_int() {
            OperandTy::Int(ty)
        } else {
            OperandTy::Exact(ty)
        }
    }

    pub fn accepts(self, ty: Ty) -> bool {
        match self {
            OperandTy::Int(expected) => expected.is_int() && ty.is_int() && ty.bits() == expected.bits(),
            OperandTy::AnyInt => ty.is_int(),
            OperandTy::Exact(expected) => ty == expected,
            OperandTy::Address => matches!(ty, Ty::I64 | Ty::Ptr),
            OperandTy::Value => ty.is_reg_value(),
        }
    }
}

impl fmt::Display for OperandTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandTy::Int(ty) => write!(f, "a {}-bit integer", ty.bits()),
            OperandTy::AnyInt => write!(f, "an integer"),
            OperandTy::Exact(ty) => write!(f, "{}", ty),
            OperandTy::Address => write!(f, "an address"),
            OperandTy::Value => write!(f, "a register value"),
        }
    }
}

/// What operand `idx` of a node of `op` and type `ty` accepts, `None` for
/// flags slots and projections, which are checked on their own.
///
/// Integer operands of an operation all have its width, where a pointer
/// counts as 64 bits. Shift amounts and conditions may be any integer.
fn operand_ty(op: &Opcode, ty: Ty, idx: usize, operand_tys: &[Ty]) -> Option<OperandTy> {
    let rule = match op {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Neg
        | Opcode::Not
        | Opcode::MulAdd
        | Opcode::MulSub => OperandTy::Int(ty),
        Opcode::Shl | Opcode::Shr | Opcode::Sar if idx == 1 => OperandTy::AnyInt,
        Opcode::Shl | Opcode::Shr | Opcode::Sar => OperandTy::Int(ty),
        Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FNeg | Opcode::FMulAdd { .. } => {
            OperandTy::Exact(ty)
        }
        Opcode::Cmp(_) if idx == 0 => OperandTy::AnyInt,
        Opcode::Cmp(_) => OperandTy::Int(operand_tys[0]),
        Opcode::CCmp { .. } if idx == 1 => OperandTy::AnyInt,
        Opcode::CCmp { .. } if idx == 2 => OperandTy::Int(operand_tys[1]),
        Opcode::Select if idx == 0 => OperandTy::AnyInt,
        Opcode::Select => OperandTy::like(ty),
        Opcode::SelectCC(_) if idx > 0 => OperandTy::like(ty),
        Opcode::Lea { .. } if idx == 0 => OperandTy::Address,
        Opcode::Lea { .. } => OperandTy::AnyInt,
        Opcode::Load => OperandTy::Address,
        Opcode::Store if idx == 0 => OperandTy::Address,
        Opcode::Store | Opcode::StoreLclVar(_) | Opcode::Return | Opcode::Call { .. } => {
            OperandTy::Value
        }
        Opcode::Intrinsic(id) => OperandTy::like(id.info().operands[idx]),
        Opcode::CCmp { .. }
        | Opcode::SelectCC(_)
        | Opcode::SetCC(_)
        | Opcode::ThrowIf(_)
        | Opcode::Proj(_)
        | Opcode::IConst(_)
        | Opcode::FConst(_)
        | Opcode::Param(_)
        | Opcode::LclVar(_) => return None,
    };
    Some(rule)
}

/// The number of operands a node of the opcode takes.
fn arity(op: &Opcode) -> RangeInclusive<usize> {
    match op {
        Opcode::IConst(_) | Opcode::FConst(_) | Opcode::Param(_) | Opcode::LclVar(_) => 0..=0,
        Opcode::StoreLclVar(_)
        | Opcode::Neg
        | Opcode::Not
        | Opcode::FNeg
        | Opcode::SetCC(_)
        | Opcode::Load
        | Opcode::ThrowIf(_)
        | Opcode::Proj(_) => 1..=1,
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Sar
        | Opcode::FAdd
        | Opcode::FSub
        | Opcode::FMul
        | Opcode::Cmp(_)
        | Opcode::Store => 2..=2,
        Opcode::CCmp { .. }
        | Opcode::Select
        | Opcode::SelectCC(_)
        | Opcode::MulAdd
        | Opcode::MulSub
        | Opcode::FMulAdd { .. } => 3..=3,
        Opcode::Lea { .. } => 1..=2,
        Opcode::Return => 0..=1,
        Opcode::Call { .. } => 0..=usize::MAX,
        Opcode::Intrinsic(id) => {
            let n = id.info().operands.len();
            n..=n
        }
    }
}

/// Whether operand `idx` of `op` reads the flags.
pub(crate) fn is_flags_slot(op: &Opcode, idx: usize) -> bool {
    idx == 0
        && matches!(
            op,
            Opcode::CCmp { .. } | Opcode::SetCC(_) | Opcode::SelectCC(_) | Opcode::ThrowIf(_)
        )
}

/// Verify the nodes of a block.
pub fn verify(lir: &Lir, block: Block) -> Result<(), VerifyError> {
    let nodes = block.nodes(lir);
    let positions: FxHashMap<Node, usize> =
        nodes.iter().enumerate().map(|(i, node)| (*node, i)).collect();

    let mut stored_locals = FxHashSet::default();
    let mut params_done = false;

    for (pos, &node) in nodes.iter().enumerate() {
        let op = node.op(lir);
        let operands = node.operands(lir);

        let expected = arity(&op);
        if !expected.contains(&operands.len()) {
            return Err(VerifyError::Arity {
                node,
                expected,
                found: operands.len(),
            });
        }

        match op {
            Opcode::Param(_) if params_done => return Err(VerifyError::ParamOrder { node }),
            Opcode::Param(_) => {}
            _ => params_done = true,
        }

        let operand_tys = operands.iter().map(|o| o.ty(lir)).collect::<Vec<_>>();
        for (idx, &operand) in operands.iter().enumerate() {
            if operand.is_dead(lir) {
                return Err(VerifyError::DeadOperand { node, operand });
            }
            let found = operand_tys[idx];
            if found != Ty::Flags {
                let expected = operand_ty(&op, node.ty(lir), idx, &operand_tys);
                if let Some(expected) = expected.filter(|expected| !expected.accepts(found)) {
                    return Err(VerifyError::OperandType {
                        node,
                        idx,
                        expected,
                        found,
                    });
                }
            }
            let operand_pos = match positions.get(&operand) {
                Some(operand_pos) if *operand_pos < pos => *operand_pos,
                _ => return Err(VerifyError::UndefinedOperand { node, operand }),
            };

            let slots = operands.iter().filter(|o| **o == operand).count();
            let uses = operand.users(lir).iter().filter(|u| **u == node).count();
            if slots != uses {
                return Err(VerifyError::UserMismatch { node, operand });
            }

            let is_flags = operand.ty(lir) == Ty::Flags;
            match (is_flags_slot(&op, idx), is_flags) {
                (true, false) => return Err(VerifyError::NotFlags { node, operand }),
                (false, true) => return Err(VerifyError::FlagsOutsideSlot { node, operand }),
                (true, true) => {
                    let clobber = nodes[operand_pos + 1..pos]
                        .iter()
                        .find(|n| n.effects(lir).contains(Effects::SETS_FLAGS));
                    if let Some(&clobber) = clobber {
                        return Err(VerifyError::FlagsClobbered {
                            node,
                            operand,
                            clobber,
                        });
                    }
                }
                (false, false) => {}
            }
        }

        match op {
            Opcode::Proj(idx) => {
                let operand = operands[0];
                if operand.ty(lir) != Ty::Multi || idx as usize >= operand.reg_count(lir) {
                    return Err(VerifyError::BadProjection { node, operand, idx });
                }
            }
            Opcode::LclVar(local) if !stored_locals.contains(&local) => {
                return Err(VerifyError::UninitLocal { node, local });
            }
            Opcode::StoreLclVar(local) => {
                stored_locals.insert(local);
            }
            _ => {}
        }

        if node.is_contained(lir) && node.use_count(lir) != 1 {
            return Err(VerifyError::ContainedMultiUse { node });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Cond, LirBuilder},
        target::IntrinsicId,
    };

    #[test]
    fn test_verify_well_formed() {
        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let a = builder.param(0, Ty::I64);
        let b = builder.param(1, Ty::I64);
        builder.store_lcl_var(0, a);
        let l = builder.lcl_var(0, Ty::I64);
        let sum = builder.add(l, b);
        builder.ret(Some(sum));

        assert_eq!(verify(&lir, block), Ok(()));
    }

    #[test]
    fn test_verify_flags_clobbered() {
        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let a = builder.param(0, Ty::I64);
        let b = builder.param(1, Ty::I64);
        let first = builder.push(Opcode::Cmp(Cond::Lt), Ty::Flags, &[a, b]);
        let second = builder.push(Opcode::Cmp(Cond::Eq), Ty::Flags, &[a, b]);
        let set = builder.push(Opcode::SetCC(Cond::Lt), Ty::I32, &[first]);
        builder.push(Opcode::SetCC(Cond::Eq), Ty::I32, &[second]);

        assert_eq!(
            verify(&lir, block),
            Err(VerifyError::FlagsClobbered {
                node: set,
                operand: first,
                clobber: second,
            })
        );
    }

    #[test]
    fn test_verify_mixed_widths() {
        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let narrow = builder.param(0, Ty::I32);
        let wide = builder.param(1, Ty::I64);
        let c = builder.param(2, Ty::I32);
        let xor = builder.xor(narrow, wide);
        let prod = builder.mul(xor, narrow);
        let diff = builder.sub(c, prod);
        builder.ret(Some(diff));

        assert_eq!(
            verify(&lir, block),
            Err(VerifyError::OperandType {
                node: xor,
                idx: 1,
                expected: OperandTy::Int(Ty::I32),
                found: Ty::I64,
            })
        );
    }

    #[test]
    fn test_verify_pointer_arithmetic() {
        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let p = builder.param(0, Ty::Ptr);
        let i = builder.param(1, Ty::I64);
        let n = builder.param(2, Ty::I32);
        let addr = builder.add(p, i);
        let shifted = builder.shl(i, n);
        let lt = builder.cmp(Cond::Lt, n, n);
        let sel = builder.select(lt, addr, shifted);
        let loaded = builder.load(sel, Ty::F64);
        builder.store(addr, loaded);
        builder.ret(None);

        assert_eq!(verify(&lir, block), Ok(()));
    }

    #[test]
    fn test_verify_intrinsic_operands() {
        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let vector = builder.param(0, Ty::V128);
        let lane = builder.param(1, Ty::I64);
        let elem = builder.intrinsic(IntrinsicId::ExtractElement, &[vector, lane]);
        builder.ret(Some(elem));

        assert_eq!(
            verify(&lir, block),
            Err(VerifyError::OperandType {
                node: elem,
                idx: 1,
                expected: OperandTy::Int(Ty::I32),
                found: Ty::I64,
            })
        );

        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let p = builder.param(0, Ty::Ptr);
        let v = builder.param(1, Ty::F64);
        let old = builder.intrinsic(IntrinsicId::AtomicAdd, &[p, v]);
        builder.ret(Some(old));

        assert!(matches!(
            verify(&lir, block),
            Err(VerifyError::OperandType { node, idx: 1, .. }) if node == old
        ));
    }

    #[test]
    fn test_verify_uninit_local_and_params() {
        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        let read = builder.lcl_var(3, Ty::I64);
        builder.ret(Some(read));
        assert_eq!(
            verify(&lir, block),
            Err(VerifyError::UninitLocal {
                node: read,
                local: 3
            })
        );

        let mut lir = Lir::new();
        let block = lir.new_block();
        let mut builder = LirBuilder::new(&mut lir, block);
        builder.iconst(1, Ty::I64);
        let late = builder.param(0, Ty::I64);
        assert_eq!(verify(&lir, block), Err(VerifyError::ParamOrder { node: late }));
    }
}
