//! The static intrinsic table.
//!
//! Every hardware intrinsic the lowering knows about is described by one
//! immutable [IntrinsicInfo] entry, looked up by [IntrinsicId].

use crate::ir::{Effects, Ty};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntrinsicId {
    /// Byte table lookup over two table registers.
    TableLookup2,
    /// Byte table lookup over three table registers.
    TableLookup3,
    /// Byte table lookup over four table registers.
    TableLookup4,
    /// Table lookup keeping the accumulator bytes for out-of-range indices.
    TableLookupExtension2,
    /// Load two vectors from consecutive memory into consecutive registers.
    LoadVector2,
    LoadVector3,
    LoadVector4,
    /// Store two consecutive registers into consecutive memory.
    StoreVector2,
    StoreVector3,
    /// Extract a byte lane of a vector.
    ExtractElement,
    /// Shift every 64-bit lane left by an immediate.
    ShiftLeftLogicalImm,
    /// Compare and exchange, returning the old value.
    CompareExchange,
    /// Atomic add, returning the old value.
    AtomicAdd,
    /// Load two 64-bit integers.
    LoadPair,
}

/// What to do with an immediate operand that is not a legal constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmPolicy {
    /// Check the value at runtime and raise a bounds-violation when it is out
    /// of range.
    Check,
    /// The producer guarantees the value is in range, a constant out of
    /// range is an internal compiler error.
    Contract,
}

/// An operand that must be an immediate in `[lo, hi]` in the preferred
/// encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmOperand {
    pub operand: usize,
    pub lo: i64,
    pub hi: i64,
    pub policy: ImmPolicy,
}

impl ImmOperand {
    pub fn contains(&self, value: i64) -> bool { (self.lo..=self.hi).contains(&value) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicResult {
    Void,
    Value(Ty),
    /// `n` register values of the same type.
    Multi(Ty, u8),
}

#[derive(Debug)]
pub struct IntrinsicInfo {
    pub id: IntrinsicId,
    pub name: &'static str,
    /// The operand types.
    pub operands: &'static [Ty],
    pub result: IntrinsicResult,
    /// A run of operands `(first, count)` that must sit in consecutive
    /// registers.
    pub consecutive: Option<(usize, u8)>,
    /// The produced registers must be consecutive.
    pub consecutive_defs: bool,
    pub imm: Option<ImmOperand>,
    /// The operand the result is written over.
    pub tied: Option<usize>,
    /// Expanded into a load-linked/store-conditional retry loop.
    pub retry_loop: bool,
    /// Integer scratch registers the expansion needs.
    pub internal_temps: u8,
    pub effects: Effects,
}

impl IntrinsicInfo {
    pub fn result_ty(&self) -> Ty {
        match self.result {
            IntrinsicResult::Void => Ty::Void,
            IntrinsicResult::Value(ty) => ty,
            IntrinsicResult::Multi(..) => Ty::Multi,
        }
    }

    /// The types of the produced register values.
    pub fn reg_tys(&self) -> Vec<Ty> {
        match self.result {
            IntrinsicResult::Void => Vec::new(),
            IntrinsicResult::Value(ty) => vec![ty],
            IntrinsicResult::Multi(ty, n) => vec![ty; n as usize],
        }
    }
}

const MEM_READ: Effects = Effects::READS_MEMORY.union(Effects::MAY_FAULT);
const MEM_WRITE: Effects = Effects::DEFINES_MEMORY.union(Effects::MAY_FAULT);
const MEM_ATOMIC: Effects = MEM_READ.union(MEM_WRITE);

static INTRINSICS: [IntrinsicInfo; 14] = [
    IntrinsicInfo {
        id: IntrinsicId::TableLookup2,
        name: "tbl2",
        operands: &[Ty::V128, Ty::V128, Ty::V128],
        result: IntrinsicResult::Value(Ty::V128),
        consecutive: Some((0, 2)),
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: Effects::empty(),
    },
    IntrinsicInfo {
        id: IntrinsicId::TableLookup3,
        name: "tbl3",
        operands: &[Ty::V128, Ty::V128, Ty::V128, Ty::V128],
        result: IntrinsicResult::Value(Ty::V128),
        consecutive: Some((0, 3)),
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: Effects::empty(),
    },
    IntrinsicInfo {
        id: IntrinsicId::TableLookup4,
        name: "tbl4",
        operands: &[Ty::V128, Ty::V128, Ty::V128, Ty::V128, Ty::V128],
        result: IntrinsicResult::Value(Ty::V128),
        consecutive: Some((0, 4)),
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: Effects::empty(),
    },
    IntrinsicInfo {
        id: IntrinsicId::TableLookupExtension2,
        name: "tbx2",
        operands: &[Ty::V128, Ty::V128, Ty::V128, Ty::V128],
        result: IntrinsicResult::Value(Ty::V128),
        consecutive: Some((1, 2)),
        consecutive_defs: false,
        imm: None,
        tied: Some(0),
        retry_loop: false,
        internal_temps: 0,
        effects: Effects::empty(),
    },
    IntrinsicInfo {
        id: IntrinsicId::LoadVector2,
        name: "ld2v",
        operands: &[Ty::Ptr],
        result: IntrinsicResult::Multi(Ty::V128, 2),
        consecutive: None,
        consecutive_defs: true,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: MEM_READ,
    },
    IntrinsicInfo {
        id: IntrinsicId::LoadVector3,
        name: "ld3v",
        operands: &[Ty::Ptr],
        result: IntrinsicResult::Multi(Ty::V128, 3),
        consecutive: None,
        consecutive_defs: true,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: MEM_READ,
    },
    IntrinsicInfo {
        id: IntrinsicId::LoadVector4,
        name: "ld4v",
        operands: &[Ty::Ptr],
        result: IntrinsicResult::Multi(Ty::V128, 4),
        consecutive: None,
        consecutive_defs: true,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: MEM_READ,
    },
    IntrinsicInfo {
        id: IntrinsicId::StoreVector2,
        name: "st2v",
        operands: &[Ty::Ptr, Ty::V128, Ty::V128],
        result: IntrinsicResult::Void,
        consecutive: Some((1, 2)),
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: MEM_WRITE,
    },
    IntrinsicInfo {
        id: IntrinsicId::StoreVector3,
        name: "st3v",
        operands: &[Ty::Ptr, Ty::V128, Ty::V128, Ty::V128],
        result: IntrinsicResult::Void,
        consecutive: Some((1, 3)),
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: MEM_WRITE,
    },
    IntrinsicInfo {
        id: IntrinsicId::ExtractElement,
        name: "extract_elem",
        operands: &[Ty::V128, Ty::I32],
        result: IntrinsicResult::Value(Ty::I64),
        consecutive: None,
        consecutive_defs: false,
        imm: Some(ImmOperand {
            operand: 1,
            lo: 0,
            hi: 15,
            policy: ImmPolicy::Check,
        }),
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: Effects::MAY_THROW,
    },
    IntrinsicInfo {
        id: IntrinsicId::ShiftLeftLogicalImm,
        name: "shl_imm",
        operands: &[Ty::V128, Ty::I32],
        result: IntrinsicResult::Value(Ty::V128),
        consecutive: None,
        consecutive_defs: false,
        imm: Some(ImmOperand {
            operand: 1,
            lo: 0,
            hi: 63,
            policy: ImmPolicy::Contract,
        }),
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: Effects::empty(),
    },
    IntrinsicInfo {
        id: IntrinsicId::CompareExchange,
        name: "cmpxchg",
        operands: &[Ty::Ptr, Ty::I64, Ty::I64],
        result: IntrinsicResult::Value(Ty::I64),
        consecutive: None,
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: true,
        internal_temps: 1,
        effects: MEM_ATOMIC,
    },
    IntrinsicInfo {
        id: IntrinsicId::AtomicAdd,
        name: "atomic_add",
        operands: &[Ty::Ptr, Ty::I64],
        result: IntrinsicResult::Value(Ty::I64),
        consecutive: None,
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: true,
        internal_temps: 2,
        effects: MEM_ATOMIC,
    },
    IntrinsicInfo {
        id: IntrinsicId::LoadPair,
        name: "ldp",
        operands: &[Ty::Ptr],
        result: IntrinsicResult::Multi(Ty::I64, 2),
        consecutive: None,
        consecutive_defs: false,
        imm: None,
        tied: None,
        retry_loop: false,
        internal_temps: 0,
        effects: MEM_READ,
    },
];

impl IntrinsicId {
    pub const ALL: [IntrinsicId; 14] = [
        IntrinsicId::TableLookup2,
        IntrinsicId::TableLookup3,
        IntrinsicId::TableLookup4,
        IntrinsicId::TableLookupExtension2,
        IntrinsicId::LoadVector2,
        IntrinsicId::LoadVector3,
        IntrinsicId::LoadVector4,
        IntrinsicId::StoreVector2,
        IntrinsicId::StoreVector3,
        IntrinsicId::ExtractElement,
        IntrinsicId::ShiftLeftLogicalImm,
        IntrinsicId::CompareExchange,
        IntrinsicId::AtomicAdd,
        IntrinsicId::LoadPair,
    ];

    pub fn info(self) -> &'static IntrinsicInfo { &INTRINSICS[self as usize] }

    /// Whether the intrinsic reads vectors as a table in consecutive
    /// registers.
    pub fn is_table_lookup(self) -> bool {
        matches!(
            self,
            IntrinsicId::TableLookup2
                | IntrinsicId::TableLookup3
                | IntrinsicId::TableLookup4
                | IntrinsicId::TableLookupExtension2
        )
    }
}
