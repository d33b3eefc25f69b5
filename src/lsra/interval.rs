use std::fmt;

use super::RefPositionId;
use crate::{
    ir::{Node, Ty},
    target::{PReg, RegKind, RegMask},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(pub(super) u32);

impl IntervalId {
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "i{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillSlot(pub u32);

impl fmt::Display for SpillSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "[slot {}]", self.0) }
}

/// Where the value of an interval is while the allocator walks it.
///
/// An interval starts [IntervalState::Unborn], becomes
/// [IntervalState::Active] at its first def, may move between a register
/// and its spill slot any number of times, and is [IntervalState::Dead]
/// after its last reference. A local redefined after its last read becomes
/// active again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalState {
    Unborn,
    Active(PReg),
    Spilled,
    Dead,
}

/// What the interval holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalOrigin {
    /// Register value `idx` of a node.
    Node(Node, u8),
    /// A local variable, over all of its definitions.
    Local(u32),
    /// A scratch register of a node.
    Internal(Node),
}

/// The lifetime of one value.
#[derive(Debug, Clone)]
pub struct Interval {
    pub id: IntervalId,
    pub origin: IntervalOrigin,
    pub kind: RegKind,
    pub ty: Ty,
    /// The bits of a constant, rematerialized instead of reloaded.
    pub constant: Option<u64>,
    /// The references, by strictly increasing location.
    pub refs: Vec<RefPositionId>,
    /// Registers to pick first, empty for no preference.
    pub preferences: RegMask,
    /// The interval whose register the defs of this one prefer.
    pub related: Option<IntervalId>,
}

impl Interval {
    pub fn is_constant(&self) -> bool { self.constant.is_some() }

    pub fn is_internal(&self) -> bool { matches!(self.origin, IntervalOrigin::Internal(_)) }

    pub fn local(&self) -> Option<u32> {
        match self.origin {
            IntervalOrigin::Local(local) => Some(local),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.kind)?;
        match self.origin {
            IntervalOrigin::Node(node, 0) => write!(f, " {}", node)?,
            IntervalOrigin::Node(node, idx) => write!(f, " {}.{}", node, idx)?,
            IntervalOrigin::Local(local) => write!(f, " local {}", local)?,
            IntervalOrigin::Internal(node) => write!(f, " temp of {}", node)?,
        }
        if let Some(bits) = self.constant {
            write!(f, " const {:#x}", bits)?;
        }
        if !self.preferences.is_empty() {
            write!(f, " prefers {:?}", self.preferences)?;
        }
        if let Some(related) = self.related {
            write!(f, " related {}", related)?;
        }
        Ok(())
    }
}
