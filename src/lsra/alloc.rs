//! The linear scan over the reference positions.

use std::{cmp::Reverse, fmt, ops::Range};

use log::{debug, trace};
use rustc_hash::FxHashMap;

use super::{
    check_allocation,
    IntervalId,
    IntervalState,
    LsraBuild,
    LsraConfig,
    LsraError,
    RefKind,
    RefPosition,
    RefPositionId,
    SpillSlot,
};
use crate::{
    ir::Node,
    target::{PReg, RegKind, RegMask, TargetDesc},
};

/// A move of a value the allocation inserts before a node.
///
/// The events of a node are executed in order, those of its even location
/// first. Events at an odd location only ever store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocEvent {
    /// Store the register into the spill slot of the interval.
    Spill {
        location: u32,
        interval: IntervalId,
        reg: PReg,
        slot: SpillSlot,
    },
    /// Load the interval back from its spill slot.
    Reload {
        location: u32,
        interval: IntervalId,
        reg: PReg,
        slot: SpillSlot,
    },
    /// Materialize a spilled constant again.
    Remat {
        location: u32,
        interval: IntervalId,
        reg: PReg,
        bits: u64,
    },
    /// Copy the value into a register used by the node only, the interval
    /// stays where it is.
    Copy {
        location: u32,
        interval: IntervalId,
        from: PReg,
        to: PReg,
    },
    /// Move the interval into another register.
    Move {
        location: u32,
        interval: IntervalId,
        from: PReg,
        to: PReg,
    },
}

impl AllocEvent {
    pub fn location(&self) -> u32 {
        match self {
            AllocEvent::Spill { location, .. }
            | AllocEvent::Reload { location, .. }
            | AllocEvent::Remat { location, .. }
            | AllocEvent::Copy { location, .. }
            | AllocEvent::Move { location, .. } => *location,
        }
    }

    pub fn interval(&self) -> IntervalId {
        match self {
            AllocEvent::Spill { interval, .. }
            | AllocEvent::Reload { interval, .. }
            | AllocEvent::Remat { interval, .. }
            | AllocEvent::Copy { interval, .. }
            | AllocEvent::Move { interval, .. } => *interval,
        }
    }

    pub fn display<'a>(&'a self, target: &'a dyn TargetDesc) -> AllocEventDisplay<'a> {
        AllocEventDisplay {
            event: self,
            target,
        }
    }
}

pub struct AllocEventDisplay<'a> {
    event: &'a AllocEvent,
    target: &'a dyn TargetDesc,
}

impl fmt::Display for AllocEventDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = |reg: PReg| self.target.display_reg(reg);
        match *self.event {
            AllocEvent::Spill {
                location,
                interval,
                reg: r,
                slot,
            } => write!(f, "@{} spill {} {} -> {}", location, interval, reg(r), slot),
            AllocEvent::Reload {
                location,
                interval,
                reg: r,
                slot,
            } => write!(f, "@{} reload {} {} -> {}", location, interval, slot, reg(r)),
            AllocEvent::Remat {
                location,
                interval,
                reg: r,
                bits,
            } => write!(f, "@{} remat {} #{:#x} -> {}", location, interval, bits, reg(r)),
            AllocEvent::Copy {
                location,
                interval,
                from,
                to,
            } => write!(f, "@{} copy {} {} -> {}", location, interval, reg(from), reg(to)),
            AllocEvent::Move {
                location,
                interval,
                from,
                to,
            } => write!(f, "@{} move {} {} -> {}", location, interval, reg(from), reg(to)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    pub spills: usize,
    pub reloads: usize,
    pub remats: usize,
    pub copies: usize,
    pub moves: usize,
    pub evictions: usize,
    /// Uses of spilled values read from the stack slot, without a reload.
    pub slot_reads: usize,
    /// Groups whose members already sat in consecutive registers.
    pub groups_in_place: usize,
    /// Groups placed around members already in place.
    pub groups_reused: usize,
    /// Groups placed into a free window.
    pub groups_free: usize,
    /// Groups that needed registers taken away.
    pub groups_evicted: usize,
}

#[derive(Debug)]
pub struct AllocationResult {
    /// The register of every reference position, `None` for kills and for
    /// reg-optional uses read from the stack slot.
    pub assignments: Vec<Option<PReg>>,
    pub spill_slots: FxHashMap<IntervalId, SpillSlot>,
    pub events: Vec<AllocEvent>,
    pub stats: AllocStats,
}

impl AllocationResult {
    pub fn reg(&self, rp: RefPositionId) -> Option<PReg> { self.assignments[rp.index()] }

    pub fn events_at(&self, location: u32) -> impl Iterator<Item = &AllocEvent> {
        self.events.iter().filter(move |event| event.location() == location)
    }

    /// The registers the node defines its values in, by value index.
    pub fn def_regs(&self, build: &LsraBuild, node: Node) -> Vec<PReg> {
        build
            .refs_of(node)
            .iter()
            .map(|rp| build.ref_position(*rp))
            .filter(|rp| rp.is_def() && !build.interval(rp.interval_id()).is_internal())
            .filter_map(|rp| self.reg(rp.id))
            .collect()
    }

    /// The number of stores to spill slots.
    pub fn spill_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, AllocEvent::Spill { .. }))
            .count()
    }

    /// The number of loads from spill slots.
    pub fn reload_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, AllocEvent::Reload { .. }))
            .count()
    }
}

impl RefPosition {
    /// The interval of a def or a use.
    pub(super) fn interval_id(&self) -> IntervalId {
        self.interval
            .unwrap_or_else(|| unreachable!("{} is a kill and has no interval", self.id))
    }
}

pub struct LinearScan<'a> {
    pub(super) build: &'a LsraBuild,
    pub(super) target: &'a dyn TargetDesc,
    pub(super) config: &'a LsraConfig,

    /// The allocatable registers of each kind, limit applied.
    pub(super) allocatable: [RegMask; 3],
    /// The interval in each register.
    owners: [[Option<IntervalId>; 64]; 3],
    occupied: [RegMask; 3],
    /// Registers busy at the current location without an interval in them,
    /// i.e. copies read by the node and the sources of moves.
    pub(super) locked: [RegMask; 3],
    /// Registers assigned at the current location, they cannot be taken
    /// away until the node has read them.
    pub(super) pinned: [RegMask; 3],
    /// Registers requested by fixed references at the current location.
    pub(super) reserved: [RegMask; 3],
    /// Locks and pins carried into the next location by delay-free uses.
    locked_next: [RegMask; 3],
    pinned_next: [RegMask; 3],
    carry_at: Option<u32>,

    pub(super) states: Vec<IntervalState>,
    /// The register each interval was last in, for preferencing.
    last_reg: Vec<Option<PReg>>,
    /// The spill slot holds the current value.
    spill_valid: Vec<bool>,
    slots: Vec<Option<SpillSlot>>,
    next_slot: u32,
    /// Intervals to free once the location is passed.
    pending: Vec<(u32, IntervalId)>,

    pub(super) location: u32,
    pub(super) assignments: Vec<Option<PReg>>,
    pub(super) events: Vec<AllocEvent>,
    pub(super) stats: AllocStats,
}

impl<'a> LinearScan<'a> {
    pub fn new(build: &'a LsraBuild, target: &'a dyn TargetDesc, config: &'a LsraConfig) -> Self {
        let intervals = build.intervals.len();
        Self {
            build,
            target,
            config,
            allocatable: RegKind::ALL.map(|kind| config.allocatable(target, kind)),
            owners: [[None; 64]; 3],
            occupied: [RegMask::EMPTY; 3],
            locked: [RegMask::EMPTY; 3],
            pinned: [RegMask::EMPTY; 3],
            reserved: [RegMask::EMPTY; 3],
            locked_next: [RegMask::EMPTY; 3],
            pinned_next: [RegMask::EMPTY; 3],
            carry_at: None,
            states: vec![IntervalState::Unborn; intervals],
            last_reg: vec![None; intervals],
            spill_valid: vec![false; intervals],
            slots: vec![None; intervals],
            next_slot: 0,
            pending: Vec::new(),
            location: 0,
            assignments: vec![None; build.ref_positions.len()],
            events: Vec::new(),
            stats: AllocStats::default(),
        }
    }

    pub fn run(mut self) -> Result<AllocationResult, LsraError> {
        let refs = &self.build.ref_positions;
        let mut start = 0;
        while start < refs.len() {
            let location = refs[start].location;
            let mut end = start;
            while end < refs.len() && refs[end].location == location {
                end += 1;
            }
            self.allocate_location(location, start..end)?;
            start = end;
        }

        let stats = self.stats;
        debug!(
            "allocated on {}: {} spills, {} reloads, {} slot reads, {} remats, {} copies, {} moves, {} evictions",
            self.target.name(),
            stats.spills,
            stats.reloads,
            stats.slot_reads,
            stats.remats,
            stats.copies,
            stats.moves,
            stats.evictions
        );

        let result = AllocationResult {
            assignments: self.assignments,
            spill_slots: self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.map(|slot| (IntervalId(i as u32), slot)))
                .collect(),
            events: self.events,
            stats,
        };

        if self.config.verify {
            check_allocation(self.build, &result, self.target)?;
        }
        Ok(result)
    }

    fn allocate_location(&mut self, location: u32, range: Range<usize>) -> Result<(), LsraError> {
        self.location = location;
        self.release_pending(location);

        let carried = self.carry_at == Some(location);
        for k in 0..3 {
            self.locked[k] = if carried { self.locked_next[k] } else { RegMask::EMPTY };
            self.pinned[k] = if carried { self.pinned_next[k] } else { RegMask::EMPTY };
            self.locked_next[k] = RegMask::EMPTY;
            self.pinned_next[k] = RegMask::EMPTY;
            self.reserved[k] = RegMask::EMPTY;
        }
        self.carry_at = None;

        let build = self.build;
        let refs = &build.ref_positions[range];

        self.reserve_fixed(refs)?;

        // scratch registers stay with their node until its defs are placed
        for rp in refs.iter().filter(|rp| rp.is_use() && location % 2 == 1) {
            if let IntervalState::Active(reg) = self.states[rp.interval_id().index()] {
                self.pinned[reg.kind().index()].insert(reg.num());
            }
        }

        let mut done = vec![false; refs.len()];
        let base = refs.first().map_or(0, |rp| rp.id.index());
        for rp in refs.iter().filter(|rp| rp.needs_consecutive && rp.is_use()) {
            for member in build.group(rp.id) {
                done[member.index() - base] = true;
            }
            self.allocate_use_group(rp.id)?;
        }

        for (pos, rp) in refs.iter().enumerate() {
            if done[pos] {
                continue;
            }
            match rp.kind {
                RefKind::Use => self.allocate_use(rp)?,
                RefKind::Def if rp.needs_consecutive => {
                    for member in build.group(rp.id) {
                        done[member.index() - base] = true;
                    }
                    self.allocate_def_group(rp.id)?;
                }
                RefKind::Def => self.allocate_def(rp)?,
                RefKind::Kill => self.kill(rp),
            }
        }

        for rp in refs.iter() {
            let Some(interval) = rp.interval else {
                continue;
            };
            let is_last = rp.last_use
                || (rp.is_def() && build.interval(interval).refs.last() == Some(&rp.id));
            if is_last {
                let after = if rp.delay_free { location + 1 } else { location };
                self.pending.push((after, interval));
            }
            if rp.delay_free {
                if let Some(reg) = self.assignments[rp.id.index()] {
                    self.pinned_next[reg.kind().index()].insert(reg.num());
                    self.carry_at = Some(location + 1);
                }
            }
        }
        if self.locked_next.iter().any(|mask| !mask.is_empty()) {
            self.carry_at = Some(location + 1);
        }

        Ok(())
    }

    // +-----------------+
    // |   bookkeeping   |
    // +-----------------+

    pub(super) fn owner(&self, reg: PReg) -> Option<IntervalId> {
        self.owners[reg.kind().index()][reg.num() as usize]
    }

    pub(super) fn occupy(&mut self, reg: PReg, interval: IntervalId) {
        let k = reg.kind().index();
        self.owners[k][reg.num() as usize] = Some(interval);
        self.occupied[k].insert(reg.num());
        self.states[interval.index()] = IntervalState::Active(reg);
        self.last_reg[interval.index()] = Some(reg);
    }

    pub(super) fn vacate(&mut self, reg: PReg) {
        let k = reg.kind().index();
        self.owners[k][reg.num() as usize] = None;
        self.occupied[k].remove(reg.num());
    }

    /// The allocatable registers nobody holds or waits for.
    pub(super) fn free_mask(&self, kind: RegKind) -> RegMask {
        let k = kind.index();
        self.allocatable[k] & !self.occupied[k] & !self.locked[k] & !self.reserved[k]
    }

    pub(super) fn assign(&mut self, rp: &RefPosition, reg: PReg) {
        self.assignments[rp.id.index()] = Some(reg);
        self.pinned[reg.kind().index()].insert(reg.num());
    }

    pub(super) fn preg(&self, num: u8, kind: RegKind) -> PReg { PReg::new(num, kind) }

    fn release_pending(&mut self, location: u32) {
        let pending = std::mem::take(&mut self.pending);
        for (after, interval) in pending {
            if after >= location {
                self.pending.push((after, interval));
                continue;
            }
            if let IntervalState::Active(reg) = self.states[interval.index()] {
                if self.owner(reg) == Some(interval) {
                    self.vacate(reg);
                }
            }
            self.states[interval.index()] = IntervalState::Dead;
        }
    }

    /// Whether the value of the interval is read again from the current
    /// location on.
    fn value_needed(&self, interval: IntervalId) -> bool {
        self.build
            .interval(interval)
            .refs
            .iter()
            .map(|rp| self.build.ref_position(*rp))
            .find(|rp| rp.location >= self.location)
            .map_or(false, |rp| rp.is_use())
    }

    /// The location of the next reference of the interval from the current
    /// location on.
    fn next_ref_location(&self, interval: IntervalId) -> u32 {
        self.build
            .interval(interval)
            .refs
            .iter()
            .map(|rp| self.build.ref_position(*rp).location)
            .find(|location| *location >= self.location)
            .unwrap_or(u32::MAX)
    }

    fn slot_of(&mut self, interval: IntervalId) -> SpillSlot {
        match self.slots[interval.index()] {
            Some(slot) => slot,
            None => {
                let slot = SpillSlot(self.next_slot);
                self.next_slot += 1;
                self.slots[interval.index()] = Some(slot);
                slot
            }
        }
    }

    // +-----------------+
    // |    spilling     |
    // +-----------------+

    /// Take the interval out of the register.
    ///
    /// The value is stored only if it is read again, is not a constant, and
    /// the spill slot does not hold it already.
    pub(super) fn spill(&mut self, interval: IntervalId, reg: PReg) {
        let needed = self.value_needed(interval);
        let is_constant = self.build.interval(interval).is_constant();
        if needed && !is_constant && !self.spill_valid[interval.index()] {
            let slot = self.slot_of(interval);
            self.events.push(AllocEvent::Spill {
                location: self.location,
                interval,
                reg,
                slot,
            });
            self.stats.spills += 1;
            self.spill_valid[interval.index()] = true;
        }
        self.vacate(reg);
        self.states[interval.index()] = if needed {
            IntervalState::Spilled
        } else {
            IntervalState::Dead
        };
        trace!("{} out of {:?} at {}", interval, reg, self.location);
    }

    /// Bring a spilled interval back into `reg`.
    pub(super) fn reload(&mut self, interval: IntervalId, reg: PReg) {
        let event = match self.build.interval(interval).constant {
            Some(bits) => {
                self.stats.remats += 1;
                AllocEvent::Remat {
                    location: self.location,
                    interval,
                    reg,
                    bits,
                }
            }
            None => {
                self.stats.reloads += 1;
                AllocEvent::Reload {
                    location: self.location,
                    interval,
                    reg,
                    slot: self.slot_of(interval),
                }
            }
        };
        self.events.push(event);
        self.occupy(reg, interval);
    }

    /// Move the interval from `from` into `to`.
    ///
    /// The source keeps the value for the reads of the current location, so
    /// it is locked until the location is done.
    pub(super) fn move_interval(&mut self, interval: IntervalId, from: PReg, to: PReg) {
        self.events.push(AllocEvent::Move {
            location: self.location,
            interval,
            from,
            to,
        });
        self.stats.moves += 1;
        self.vacate(from);
        self.locked[from.kind().index()].insert(from.num());
        self.occupy(to, interval);
    }

    /// Copy the interval into a register only the current node reads.
    pub(super) fn copy_interval(&mut self, rp: &RefPosition, from: PReg, to: PReg) {
        self.events.push(AllocEvent::Copy {
            location: self.location,
            interval: rp.interval_id(),
            from,
            to,
        });
        self.stats.copies += 1;
        let k = to.kind().index();
        self.locked[k].insert(to.num());
        if rp.delay_free {
            self.locked_next[k].insert(to.num());
        }
    }

    /// The register of `mask` whose interval is read again the latest,
    /// constants first among equals.
    pub(super) fn choose_victim(&self, kind: RegKind, mask: RegMask) -> Option<PReg> {
        let k = kind.index();
        let evictable = mask & self.occupied[k] & !self.pinned[k] & !self.locked[k] & !self.reserved[k];
        evictable
            .iter()
            .filter_map(|num| {
                let reg = self.preg(num, kind);
                self.owner(reg).map(|interval| (reg, interval))
            })
            .max_by_key(|(reg, interval)| {
                (
                    self.next_ref_location(*interval),
                    self.build.interval(*interval).is_constant(),
                    Reverse(reg.num()),
                )
            })
            .map(|(reg, _)| reg)
    }

    pub(super) fn evict(&mut self, reg: PReg) {
        if let Some(interval) = self.owner(reg) {
            trace!("evicting {} from {:?} at {}", interval, reg, self.location);
            self.stats.evictions += 1;
            self.spill(interval, reg);
        }
    }

    // +-----------------+
    // |    locations    |
    // +-----------------+

    /// Clear the registers fixed references of the location ask for.
    ///
    /// At an even location the occupant moves to a free register if there
    /// is one, otherwise it is spilled.
    fn reserve_fixed(&mut self, refs: &[RefPosition]) -> Result<(), LsraError> {
        for rp in refs {
            if let Some(num) = rp.fixed_reg() {
                self.reserved[rp.reg_kind.index()].insert(num);
            }
        }

        for rp in refs.iter().filter(|rp| !rp.is_kill()) {
            let Some(num) = rp.fixed_reg() else {
                continue;
            };
            let reg = self.preg(num, rp.reg_kind);
            let Some(occupant) = self.owner(reg) else {
                continue;
            };
            if Some(occupant) == rp.interval {
                continue;
            }

            let free = self.free_mask(rp.reg_kind).lowest();
            match free {
                Some(to) if self.location % 2 == 0 => {
                    let to = self.preg(to, rp.reg_kind);
                    trace!("{} makes room in {:?} for {}", occupant, reg, rp.id);
                    self.move_interval(occupant, reg, to);
                    // the old register is reserved, not merely locked
                    self.locked[reg.kind().index()].remove(reg.num());
                }
                _ => self.spill(occupant, reg),
            }
        }
        Ok(())
    }

    fn kill(&mut self, rp: &RefPosition) {
        for num in rp.candidates.iter() {
            let reg = self.preg(num, rp.reg_kind);
            let Some(interval) = self.owner(reg) else {
                continue;
            };
            if self.build.next_ref_after(interval, self.location).map_or(false, |next| next.is_use()) {
                trace!("{} lives across the call at {}", interval, self.location);
                self.spill(interval, reg);
            }
        }
    }

    /// The register a use is read from, other than the current register of
    /// its interval.
    fn use_target(&mut self, rp: &RefPosition) -> Result<PReg, LsraError> {
        if let Some(num) = rp.fixed_reg() {
            return Ok(self.preg(num, rp.reg_kind));
        }
        if let Some(num) = (self.free_mask(rp.reg_kind) & rp.candidates).lowest() {
            return Ok(self.preg(num, rp.reg_kind));
        }
        if let Some(reg) = self.choose_victim(rp.reg_kind, rp.candidates) {
            self.evict(reg);
            return Ok(reg);
        }
        Err(LsraError::NoRegister {
            node: rp.node,
            kind: rp.reg_kind,
            location: self.location,
        })
    }

    fn allocate_use(&mut self, rp: &RefPosition) -> Result<(), LsraError> {
        let interval = rp.interval_id();
        match self.states[interval.index()] {
            IntervalState::Active(curr) => {
                if rp.candidates.contains(curr.num()) {
                    self.assign(rp, curr);
                    return Ok(());
                }
                let to = self.use_target(rp)?;
                if rp.last_use {
                    self.move_interval(interval, curr, to);
                } else {
                    self.copy_interval(rp, curr, to);
                }
                self.assign(rp, to);
            }
            IntervalState::Spilled
                if rp.reg_optional && !self.build.interval(interval).is_constant() =>
            {
                // the slot is valid, every spill of a value read again stores it
                trace!("{} reads {} from its slot at {}", rp.id, interval, self.location);
                self.stats.slot_reads += 1;
            }
            IntervalState::Spilled => {
                let to = self.use_target(rp)?;
                self.reload(interval, to);
                self.assign(rp, to);
            }
            IntervalState::Unborn | IntervalState::Dead => {
                return Err(LsraError::UseBeforeDef {
                    interval,
                    location: self.location,
                })
            }
        }
        Ok(())
    }

    /// Start a new value of the interval, dropping the old one of a
    /// redefined local.
    pub(super) fn begin_def(&mut self, interval: IntervalId) {
        if let IntervalState::Active(old) = self.states[interval.index()] {
            if self.owner(old) == Some(interval) {
                self.vacate(old);
            }
        }
        self.pending.retain(|(_, pending)| *pending != interval);
        self.spill_valid[interval.index()] = false;
    }

    fn allocate_def(&mut self, rp: &RefPosition) -> Result<(), LsraError> {
        let interval = rp.interval_id();
        self.begin_def(interval);

        let reg = match rp.fixed_reg() {
            Some(num) => {
                let reg = self.preg(num, rp.reg_kind);
                if let Some(occupant) = self.owner(reg) {
                    self.spill(occupant, reg);
                }
                reg
            }
            None => self.def_target(rp)?,
        };

        self.occupy(reg, interval);
        self.assign(rp, reg);
        Ok(())
    }

    /// Pick the register of a def, in order: the register of the related
    /// interval, a preferred register, the lowest free register, and the
    /// register of the interval read again the latest.
    fn def_target(&mut self, rp: &RefPosition) -> Result<PReg, LsraError> {
        let kind = rp.reg_kind;
        let data = self.build.interval(rp.interval_id());
        let free = self.free_mask(kind) & rp.candidates;

        let related = data
            .related
            .and_then(|related| self.last_reg[related.index()])
            .filter(|reg| reg.kind() == kind && free.contains(reg.num()));
        if let Some(reg) = related {
            return Ok(reg);
        }

        if let Some(num) = (free & data.preferences).lowest().or_else(|| free.lowest()) {
            return Ok(self.preg(num, kind));
        }

        if let Some(reg) = self.choose_victim(kind, rp.candidates) {
            self.evict(reg);
            return Ok(reg);
        }

        Err(LsraError::NoRegister {
            node: rp.node,
            kind,
            location: self.location,
        })
    }
}
