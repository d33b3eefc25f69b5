//! AArch64.
//!
//! General registers `x0`-`x30` plus the zero register, one shared
//! floating point and vector file `v0`-`v31`. Floating point values live in
//! the vector file.

use super::{is_logical_imm, AddrMode, IntrinsicId, PReg, RegKind, RegMask, TargetDesc};
use crate::ir::{Opcode, Ty};

/// `x0`-`x15` and `x19`-`x28`, `x16`/`x17` are scratch for veneers, `x18`
/// is the platform register.
const GENERAL_ALLOCATABLE: RegMask = RegMask::from_bits(0x1ff8_ffff);
/// `x0`-`x17`.
const GENERAL_CALLER_SAVED: RegMask = RegMask::from_bits(0x3_ffff);
/// `v0`-`v7` and `v16`-`v31`.
const VECTOR_CALLER_SAVED: RegMask = RegMask::from_bits(0xffff_00ff);

pub struct Arm64;

pub const fn x(num: u8) -> PReg { PReg::new(num, RegKind::General) }

pub const fn v(num: u8) -> PReg { PReg::new(num, RegKind::Vector) }

impl TargetDesc for Arm64 {
    fn name(&self) -> &'static str { "arm64" }

    fn reg_kind(&self, ty: Ty) -> Option<RegKind> {
        match ty.reg_kind()? {
            RegKind::General => Some(RegKind::General),
            RegKind::Float | RegKind::Vector => Some(RegKind::Vector),
        }
    }

    fn reg_file_size(&self, kind: RegKind) -> u8 {
        match kind {
            RegKind::General | RegKind::Vector => 32,
            RegKind::Float => 0,
        }
    }

    fn allocatable(&self, kind: RegKind) -> RegMask {
        match kind {
            RegKind::General => GENERAL_ALLOCATABLE,
            RegKind::Vector => RegMask::first_n(32),
            RegKind::Float => RegMask::EMPTY,
        }
    }

    fn caller_saved(&self, kind: RegKind) -> RegMask {
        match kind {
            RegKind::General => GENERAL_CALLER_SAVED,
            RegKind::Vector => VECTOR_CALLER_SAVED,
            RegKind::Float => RegMask::EMPTY,
        }
    }

    fn arg_regs(&self, kind: RegKind) -> &'static [u8] {
        match kind {
            RegKind::General | RegKind::Vector => &[0, 1, 2, 3, 4, 5, 6, 7],
            RegKind::Float => &[],
        }
    }

    fn ret_regs(&self, kind: RegKind) -> &'static [u8] {
        match kind {
            RegKind::General | RegKind::Vector => &[0, 1, 2, 3, 4, 5, 6, 7],
            RegKind::Float => &[],
        }
    }

    fn consecutive_wraps(&self, kind: RegKind) -> bool { kind == RegKind::Vector }

    fn display_reg(&self, reg: PReg) -> String {
        match reg.kind() {
            RegKind::General => match reg.num() {
                29 => "fp".to_string(),
                30 => "lr".to_string(),
                31 => "sp".to_string(),
                num => format!("x{}", num),
            },
            RegKind::Float | RegKind::Vector => format!("v{}", reg.num()),
        }
    }

    fn accepts_imm(&self, op: &Opcode, ty: Ty, idx: usize, value: i64) -> bool {
        match op {
            Opcode::Add | Opcode::Sub | Opcode::Cmp(_) if idx == 1 => {
                let value = value.unsigned_abs();
                value <= 0xfff || (value & 0xfff == 0 && value >> 12 <= 0xfff)
            }
            Opcode::And | Opcode::Or | Opcode::Xor if idx == 1 => {
                is_logical_imm(value as u64, ty.bits())
            }
            Opcode::Shl | Opcode::Shr | Opcode::Sar if idx == 1 => {
                (0..i64::from(ty.bits())).contains(&value)
            }
            // ccmp x, #imm5
            Opcode::CCmp { .. } if idx == 2 => (0..=31).contains(&value),
            // everything with a register operand can read xzr instead
            Opcode::Store if idx == 1 => value == 0,
            Opcode::Select | Opcode::SelectCC(_) if idx >= 1 => value == 0,
            Opcode::StoreLclVar(_) => true,
            _ => false,
        }
    }

    fn has_zero_reg(&self) -> bool { true }

    fn legal_addr_mode(&self, mode: &AddrMode) -> bool {
        let size = i64::from(mode.access.max(1));
        if mode.has_index {
            // [xn, xm, lsl #log2(size)], no offset
            mode.offset == 0 && (mode.scale == 1 || i64::from(mode.scale) == size)
        } else {
            // ldur with a signed 9-bit offset, or ldr with an unsigned 12-bit
            // offset scaled by the access size
            (-256..=255).contains(&mode.offset)
                || (mode.offset >= 0 && mode.offset % size == 0 && mode.offset / size <= 4095)
        }
    }

    fn supports_index(&self) -> bool { true }

    fn supports_madd(&self) -> bool { true }

    fn supports_fma(&self) -> bool { true }

    fn supports_ccmp(&self) -> bool { true }

    fn supports_select_cc(&self) -> bool { true }

    fn supports_intrinsic(&self, _id: IntrinsicId) -> bool { true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_sets() {
        let arm64 = Arm64;
        let general = arm64.allocatable(RegKind::General);
        assert_eq!(general.count(), 26);
        assert!(general.contains(15));
        assert!(!general.contains(16));
        assert!(!general.contains(18));
        assert!(general.contains(19));
        assert!(general.contains(28));
        assert!(!general.contains(29));

        let callee_saved = general & !arm64.caller_saved(RegKind::General);
        assert_eq!(callee_saved, RegMask::from_nums(&[19, 20, 21, 22, 23, 24, 25, 26, 27, 28]));

        let vector_callee_saved =
            arm64.allocatable(RegKind::Vector) & !arm64.caller_saved(RegKind::Vector);
        assert_eq!(vector_callee_saved, RegMask::from_bits(0xff00));
    }

    #[test]
    fn test_addr_modes() {
        let arm64 = Arm64;
        let mode = |has_index, scale, offset| AddrMode {
            access: 8,
            has_index,
            scale,
            offset,
        };
        assert!(arm64.legal_addr_mode(&mode(false, 1, -256)));
        assert!(!arm64.legal_addr_mode(&mode(false, 1, -257)));
        assert!(arm64.legal_addr_mode(&mode(false, 1, 8 * 4095)));
        assert!(!arm64.legal_addr_mode(&mode(false, 1, 8 * 4096)));
        assert!(!arm64.legal_addr_mode(&mode(false, 1, 260)));
        assert!(arm64.legal_addr_mode(&mode(true, 8, 0)));
        assert!(!arm64.legal_addr_mode(&mode(true, 4, 0)));
        assert!(!arm64.legal_addr_mode(&mode(true, 1, 8)));
    }
}
