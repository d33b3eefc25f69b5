use std::fmt;

use super::IntervalId;
use crate::{
    ir::Node,
    target::{RegKind, RegMask},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefPositionId(pub(super) u32);

impl RefPositionId {
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for RefPositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "rp{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Def,
    Use,
    /// The registers of `candidates` are clobbered.
    Kill,
}

/// One reference to an interval, or a kill of some registers.
#[derive(Debug, Clone)]
pub struct RefPosition {
    pub id: RefPositionId,
    pub location: u32,
    pub kind: RefKind,
    /// `None` for kills.
    pub interval: Option<IntervalId>,
    pub reg_kind: RegKind,
    /// The registers the reference may be assigned, the killed registers for
    /// a kill.
    pub candidates: RegMask,
    /// The reference must get the only register of `candidates`.
    pub fixed: bool,
    /// The register stays busy through the next location, so the defs of
    /// the node cannot reuse it.
    pub delay_free: bool,
    /// A spilled value may be read from its stack slot, without a register.
    pub reg_optional: bool,
    pub last_use: bool,
    /// The first reference of a consecutive group.
    pub needs_consecutive: bool,
    /// The size of the group, set on the first reference only.
    pub reg_count: u8,
    pub multi_reg_idx: u8,
    /// The top-level operand of the node the use comes from.
    pub operand: Option<usize>,
    pub node: Node,
}

impl RefPosition {
    pub fn is_def(&self) -> bool { self.kind == RefKind::Def }

    pub fn is_use(&self) -> bool { self.kind == RefKind::Use }

    pub fn is_kill(&self) -> bool { self.kind == RefKind::Kill }

    /// The fixed register number, if any.
    pub fn fixed_reg(&self) -> Option<u8> {
        if self.fixed {
            self.candidates.lowest()
        } else {
            None
        }
    }
}

impl fmt::Display for RefPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RefKind::Def => "def",
            RefKind::Use => "use",
            RefKind::Kill => "kill",
        };
        write!(f, "{} @{} {}", self.id, self.location, kind)?;
        if let Some(interval) = self.interval {
            write!(f, " {}", interval)?;
        }
        write!(f, " {} {:?}", self.reg_kind, self.candidates)?;
        if self.fixed {
            write!(f, " fixed")?;
        }
        if self.delay_free {
            write!(f, " delay-free")?;
        }
        if self.reg_optional {
            write!(f, " reg-optional")?;
        }
        if self.last_use {
            write!(f, " last")?;
        }
        if self.needs_consecutive {
            write!(f, " group {}", self.reg_count)?;
        }
        Ok(())
    }
}
