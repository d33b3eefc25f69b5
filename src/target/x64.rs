//! x86-64, System V calling convention.
//!
//! Two-operand encodings: the result of most arithmetic is written over the
//! first operand, and the second operand may be a memory operand.
//! Floating point values live in the `xmm` file.

use super::{AddrMode, IntrinsicId, PReg, RegKind, RegMask, TargetDesc};
use crate::ir::{Opcode, Ty};

pub const RAX: u8 = 0;
pub const RCX: u8 = 1;
pub const RDX: u8 = 2;
pub const RSP: u8 = 4;
pub const RBP: u8 = 5;
pub const RSI: u8 = 6;
pub const RDI: u8 = 7;

/// Everything but `rsp` and `rbp`.
const GENERAL_ALLOCATABLE: RegMask = RegMask::from_bits(0xffcf);
/// `rax`, `rcx`, `rdx`, `rsi`, `rdi` and `r8`-`r11`.
const GENERAL_CALLER_SAVED: RegMask = RegMask::from_bits(0x0fc7);

const GENERAL_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

pub struct X64;

fn is_imm32(value: i64) -> bool { i32::try_from(value).is_ok() }

impl TargetDesc for X64 {
    fn name(&self) -> &'static str { "x64" }

    fn reg_kind(&self, ty: Ty) -> Option<RegKind> {
        match ty.reg_kind()? {
            RegKind::General => Some(RegKind::General),
            RegKind::Float | RegKind::Vector => Some(RegKind::Vector),
        }
    }

    fn reg_file_size(&self, kind: RegKind) -> u8 {
        match kind {
            RegKind::General | RegKind::Vector => 16,
            RegKind::Float => 0,
        }
    }

    fn allocatable(&self, kind: RegKind) -> RegMask {
        match kind {
            RegKind::General => GENERAL_ALLOCATABLE,
            RegKind::Vector => RegMask::first_n(16),
            RegKind::Float => RegMask::EMPTY,
        }
    }

    fn caller_saved(&self, kind: RegKind) -> RegMask {
        match kind {
            RegKind::General => GENERAL_CALLER_SAVED,
            RegKind::Vector => RegMask::first_n(16),
            RegKind::Float => RegMask::EMPTY,
        }
    }

    fn arg_regs(&self, kind: RegKind) -> &'static [u8] {
        match kind {
            RegKind::General => &[RDI, RSI, RDX, RCX, 8, 9],
            RegKind::Vector => &[0, 1, 2, 3, 4, 5, 6, 7],
            RegKind::Float => &[],
        }
    }

    fn ret_regs(&self, kind: RegKind) -> &'static [u8] {
        match kind {
            RegKind::General => &[RAX, RDX],
            RegKind::Vector => &[0, 1],
            RegKind::Float => &[],
        }
    }

    fn display_reg(&self, reg: PReg) -> String {
        match reg.kind() {
            RegKind::General => GENERAL_NAMES
                .get(reg.num() as usize)
                .map(|name| name.to_string())
                .unwrap_or_else(|| "<invalid>".to_string()),
            RegKind::Float | RegKind::Vector => format!("xmm{}", reg.num()),
        }
    }

    fn accepts_imm(&self, op: &Opcode, ty: Ty, idx: usize, value: i64) -> bool {
        match op {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Cmp(_)
                if idx == 1 =>
            {
                is_imm32(value)
            }
            Opcode::Shl | Opcode::Shr | Opcode::Sar if idx == 1 => {
                (0..i64::from(ty.bits())).contains(&value)
            }
            // mov [mem], imm32
            Opcode::Store if idx == 1 => is_imm32(value),
            Opcode::StoreLclVar(_) => true,
            _ => false,
        }
    }

    fn supports_mem_operand(&self, op: &Opcode, idx: usize) -> bool {
        idx == 1
            && matches!(
                op,
                Opcode::Add
                    | Opcode::Sub
                    | Opcode::Mul
                    | Opcode::And
                    | Opcode::Or
                    | Opcode::Xor
                    | Opcode::Cmp(_)
                    | Opcode::FAdd
                    | Opcode::FSub
                    | Opcode::FMul
            )
    }

    fn has_zero_reg(&self) -> bool { false }

    fn legal_addr_mode(&self, mode: &AddrMode) -> bool {
        is_imm32(mode.offset) && (!mode.has_index || matches!(mode.scale, 1 | 2 | 4 | 8))
    }

    fn supports_index(&self) -> bool { true }

    fn supports_select_cc(&self) -> bool { true }

    fn is_rmw(&self, op: &Opcode) -> bool {
        matches!(
            op,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Sar
                | Opcode::Neg
                | Opcode::Not
                | Opcode::FAdd
                | Opcode::FSub
                | Opcode::FMul
        )
    }

    fn shift_count_reg(&self) -> Option<PReg> { Some(PReg::new(RCX, RegKind::General)) }

    fn llsc_atomics(&self) -> bool { false }

    fn cmpxchg_reg(&self) -> Option<PReg> { Some(PReg::new(RAX, RegKind::General)) }

    fn supports_intrinsic(&self, id: IntrinsicId) -> bool {
        matches!(
            id,
            IntrinsicId::ExtractElement
                | IntrinsicId::ShiftLeftLogicalImm
                | IntrinsicId::CompareExchange
                | IntrinsicId::AtomicAdd
        )
    }
}
