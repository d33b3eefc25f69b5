//! RISC-V 64 (RV64GC).
//!
//! No flags register exists in hardware, a compare feeding a branch is
//! emitted as one compare-and-branch, so flags values never need a register
//! here either.

use super::{AddrMode, IntrinsicId, PReg, RegKind, RegMask, TargetDesc};
use crate::ir::{Cond, Opcode, Ty};

/// `t0`-`t2`, `s1`, `a0`-`a7`, `s2`-`s11` and `t3`-`t6`.
const GENERAL_ALLOCATABLE: RegMask = RegMask::from_bits(0xffff_fee0);
/// `ra`, `t0`-`t2`, `a0`-`a7` and `t3`-`t6`.
const GENERAL_CALLER_SAVED: RegMask = RegMask::from_bits(0xf003_fce2);
/// `ft0`-`ft7`, `fa0`-`fa7` and `ft8`-`ft11`.
const FLOAT_CALLER_SAVED: RegMask = RegMask::from_bits(0xf003_fcff);

pub struct RiscV64;

pub const fn a0() -> PReg { PReg::new(10, RegKind::General) }

pub const fn fa0() -> PReg { PReg::new(10, RegKind::Float) }

fn is_imm12(value: i64) -> bool { (-2048..=2047).contains(&value) }

const GENERAL_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

const FLOAT_NAMES: [&str; 32] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9",
    "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

impl TargetDesc for RiscV64 {
    fn name(&self) -> &'static str { "riscv64" }

    fn reg_file_size(&self, kind: RegKind) -> u8 {
        match kind {
            RegKind::General | RegKind::Float => 32,
            RegKind::Vector => 0,
        }
    }

    fn allocatable(&self, kind: RegKind) -> RegMask {
        match kind {
            RegKind::General => GENERAL_ALLOCATABLE,
            RegKind::Float => RegMask::first_n(32),
            RegKind::Vector => RegMask::EMPTY,
        }
    }

    fn caller_saved(&self, kind: RegKind) -> RegMask {
        match kind {
            RegKind::General => GENERAL_CALLER_SAVED,
            RegKind::Float => FLOAT_CALLER_SAVED,
            RegKind::Vector => RegMask::EMPTY,
        }
    }

    fn arg_regs(&self, kind: RegKind) -> &'static [u8] {
        match kind {
            RegKind::General | RegKind::Float => &[10, 11, 12, 13, 14, 15, 16, 17],
            RegKind::Vector => &[],
        }
    }

    fn ret_regs(&self, kind: RegKind) -> &'static [u8] {
        match kind {
            RegKind::General | RegKind::Float => &[10, 11],
            RegKind::Vector => &[],
        }
    }

    fn display_reg(&self, reg: PReg) -> String {
        let names = match reg.kind() {
            RegKind::General => &GENERAL_NAMES,
            RegKind::Float => &FLOAT_NAMES,
            RegKind::Vector => return format!("<invalid v{}>", reg.num()),
        };
        names
            .get(reg.num() as usize)
            .map(|name| name.to_string())
            .unwrap_or_else(|| "<invalid>".to_string())
    }

    fn accepts_imm(&self, op: &Opcode, ty: Ty, idx: usize, value: i64) -> bool {
        match op {
            Opcode::Add | Opcode::And | Opcode::Or | Opcode::Xor if idx == 1 => is_imm12(value),
            // subtraction is an addi of the negated value
            Opcode::Sub if idx == 1 => value != i64::MIN && is_imm12(-value),
            Opcode::Shl | Opcode::Shr | Opcode::Sar if idx == 1 => {
                (0..i64::from(ty.bits())).contains(&value)
            }
            // slti/sltiu, other conditions compare against the zero register
            Opcode::Cmp(cond) if idx == 1 => {
                value == 0
                    || (ty != Ty::Flags
                        && matches!(cond, Cond::Lt | Cond::Ult)
                        && is_imm12(value))
            }
            Opcode::Store if idx == 1 => value == 0,
            Opcode::StoreLclVar(_) => true,
            _ => false,
        }
    }

    fn has_zero_reg(&self) -> bool { true }

    fn legal_addr_mode(&self, mode: &AddrMode) -> bool { !mode.has_index && is_imm12(mode.offset) }

    fn supports_index(&self) -> bool { false }

    fn supports_fma(&self) -> bool { true }

    fn supports_intrinsic(&self, id: IntrinsicId) -> bool {
        matches!(id, IntrinsicId::CompareExchange | IntrinsicId::AtomicAdd)
    }
}
