//! # Target Descriptions
//!
//! Everything the lowering and the allocator need to know about an
//! instruction set is asked through [TargetDesc]. The algorithms never look
//! at a concrete target, so adding one means implementing the trait and
//! nothing else.

mod intrinsics;
mod regs;

#[cfg(feature = "target-arm64")]
pub mod arm64;
#[cfg(feature = "target-riscv64")]
pub mod riscv64;
#[cfg(feature = "target-x64")]
pub mod x64;

#[cfg(feature = "target-arm64")]
pub use arm64::Arm64;
pub use intrinsics::{
    ImmOperand,
    ImmPolicy,
    IntrinsicId,
    IntrinsicInfo,
    IntrinsicResult,
};
pub use regs::{PReg, RegKind, RegMask};
#[cfg(feature = "target-riscv64")]
pub use riscv64::RiscV64;
#[cfg(feature = "target-x64")]
pub use x64::X64;

use crate::ir::{Opcode, Ty};

/// Whether `value` is encodable as a bitmask immediate of a logical
/// instruction of `width` bits, i.e. a rotated run of ones replicated over
/// elements of 2, 4, ..., `width` bits.
pub fn is_logical_imm(value: u64, width: u32) -> bool {
    let value = if width == 32 {
        let low = value & 0xffff_ffff;
        low | (low << 32)
    } else {
        value
    };

    if value == 0 || value == u64::MAX {
        return false;
    }

    // find the smallest element the value is a replication of
    let mut size = 64u32;
    while size > 2 {
        let half = size / 2;
        let mask = (1u64 << half) - 1;
        if value & mask != (value >> half) & mask {
            break;
        }
        size = half;
    }

    let mask = if size == 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    };
    let elem = value & mask;
    let rotated = ((elem >> 1) | (elem << (size - 1))) & mask;

    // a rotated run of ones has exactly two transitions
    (elem ^ rotated).count_ones() == 2
}

/// The shape of a memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrMode {
    /// The size of the access, in bytes.
    pub access: u32,
    pub has_index: bool,
    pub scale: u8,
    pub offset: i64,
}

pub trait TargetDesc: Sync {
    fn name(&self) -> &'static str;

    // +-----------------+
    // |    registers    |
    // +-----------------+

    /// The register kind holding values of `ty`, `None` for types without a
    /// register of their own.
    fn reg_kind(&self, ty: Ty) -> Option<RegKind> { ty.reg_kind() }

    /// The number of physical registers of the kind, allocatable or not.
    fn reg_file_size(&self, kind: RegKind) -> u8;

    /// The registers the allocator may hand out.
    fn allocatable(&self, kind: RegKind) -> RegMask;

    /// The registers a call may clobber.
    fn caller_saved(&self, kind: RegKind) -> RegMask;

    /// The argument registers, in order.
    fn arg_regs(&self, kind: RegKind) -> &'static [u8];

    /// The registers returned values are passed in, in order.
    fn ret_regs(&self, kind: RegKind) -> &'static [u8];

    /// Whether a consecutive register run may wrap around from the last
    /// register of the file to the first.
    fn consecutive_wraps(&self, kind: RegKind) -> bool {
        let _ = kind;
        false
    }

    fn display_reg(&self, reg: PReg) -> String;

    // +-----------------+
    // |   containment   |
    // +-----------------+

    /// Whether `value` can be encoded in operand `idx` of a node `op` typed
    /// `ty`.
    fn accepts_imm(&self, op: &Opcode, ty: Ty, idx: usize, value: i64) -> bool;

    /// Whether operand `idx` of `op` can be a memory operand.
    fn supports_mem_operand(&self, op: &Opcode, idx: usize) -> bool {
        let _ = (op, idx);
        false
    }

    /// Whether a register reading as zero exists, so zero constants never need
    /// a register.
    fn has_zero_reg(&self) -> bool;

    /// Whether the address mode can be encoded by loads and stores.
    fn legal_addr_mode(&self, mode: &AddrMode) -> bool;

    /// Whether addresses may have an index register.
    fn supports_index(&self) -> bool;

    fn supports_madd(&self) -> bool { false }

    fn supports_fma(&self) -> bool { false }

    fn supports_ccmp(&self) -> bool { false }

    /// Whether a select can read the flags directly.
    fn supports_select_cc(&self) -> bool { false }

    // +-----------------+
    // |   constraints   |
    // +-----------------+

    /// Whether the result of `op` is written over its first operand.
    fn is_rmw(&self, op: &Opcode) -> bool {
        let _ = op;
        false
    }

    /// The register a variable shift count must be in.
    fn shift_count_reg(&self) -> Option<PReg> { None }

    /// Whether atomics are expanded into load-linked/store-conditional loops.
    fn llsc_atomics(&self) -> bool { true }

    /// The register a native compare-exchange compares with and returns in.
    fn cmpxchg_reg(&self) -> Option<PReg> { None }

    fn supports_intrinsic(&self, id: IntrinsicId) -> bool;
}
