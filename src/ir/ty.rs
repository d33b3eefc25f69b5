use std::fmt;

use crate::target::RegKind;

/// The value type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    /// No value.
    Void,
    I32,
    I64,
    /// A pointer, 64 bits wide.
    Ptr,
    F32,
    F64,
    /// A 128-bit vector.
    V128,
    /// A condition flags value.
    ///
    /// Flags live in the dedicated flags register and never occupy an
    /// allocatable register.
    Flags,
    /// Several register values produced by one node, read with `proj`.
    Multi,
}

impl Ty {
    pub fn is_int(self) -> bool { matches!(self, Ty::I32 | Ty::I64 | Ty::Ptr) }

    pub fn is_float(self) -> bool { matches!(self, Ty::F32 | Ty::F64) }

    /// Whether a value of this type is held in a register of its own.
    pub fn is_reg_value(self) -> bool {
        !matches!(self, Ty::Void | Ty::Flags | Ty::Multi)
    }

    /// The natural register kind of the type.
    ///
    /// Targets may map floating point values into their vector file, see
    /// [TargetDesc::reg_kind](crate::target::TargetDesc::reg_kind).
    pub fn reg_kind(self) -> Option<RegKind> {
        match self {
            Ty::I32 | Ty::I64 | Ty::Ptr => Some(RegKind::General),
            Ty::F32 | Ty::F64 => Some(RegKind::Float),
            Ty::V128 => Some(RegKind::Vector),
            Ty::Void | Ty::Flags | Ty::Multi => None,
        }
    }

    /// The size of a memory access of this type, in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Ty::I32 | Ty::F32 => 4,
            Ty::I64 | Ty::Ptr | Ty::F64 => 8,
            Ty::V128 => 16,
            Ty::Void | Ty::Flags | Ty::Multi => 0,
        }
    }

    pub fn bits(self) -> u32 { self.bytes() * 8 }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ty::Void => "void",
            Ty::I32 => "i32",
            Ty::I64 => "i64",
            Ty::Ptr => "ptr",
            Ty::F32 => "f32",
            Ty::F64 => "f64",
            Ty::V128 => "v128",
            Ty::Flags => "flags",
            Ty::Multi => "multi",
        };
        write!(f, "{}", s)
    }
}
