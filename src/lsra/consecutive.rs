//! Consecutive register groups.
//!
//! Table lookups read their tables from registers `r, r+1, ...` and
//! multi-vector loads define them. A group is resolved all at once when its
//! first reference is met: members already sitting in a run are kept, then
//! a run around members already in place is preferred, then any free run,
//! and finally a run is made by taking registers away.

use std::cmp::Reverse;

use log::{trace, warn};

use super::{IntervalId, IntervalState, LinearScan, LsraError, RefPosition, RefPositionId};
use crate::target::{PReg, RegKind, RegMask};

/// The registers `r` such that `r, r+1, ..., r+count-1` are all in `free`.
///
/// On a file that wraps around, the run may continue from the last register
/// of the file to the first.
pub fn get_free_candidates(free: RegMask, count: u8, file_size: u8, wraps: bool) -> RegMask {
    if count == 0 || count > file_size {
        return RegMask::EMPTY;
    }
    let free = free & RegMask::first_n(file_size);
    let mut starts = free;
    for i in 1..count {
        let shifted = if wraps {
            free.rotate_right_within(i, file_size)
        } else {
            free >> i
        };
        starts &= shifted;
    }
    starts
}

/// The registers of the run of `count` starting at `start`.
fn window(start: u8, count: u8, file_size: u8) -> RegMask {
    (0..count).fold(RegMask::EMPTY, |mask, i| {
        mask | RegMask::single((start + i) % file_size)
    })
}

/// The possible starts of a run of `count`.
fn starts(count: u8, file_size: u8, wraps: bool) -> impl Iterator<Item = u8> {
    let last = if wraps { file_size } else { file_size + 1 - count };
    0..last
}

struct Group {
    members: Vec<RefPositionId>,
    intervals: Vec<IntervalId>,
    kind: RegKind,
    count: u8,
    file_size: u8,
    wraps: bool,
}

impl LinearScan<'_> {
    fn group(&self, first: RefPositionId) -> Result<Group, LsraError> {
        let build = self.build;
        let members = build.group(first);
        let head = build.ref_position(first);
        let kind = head.reg_kind;
        let count = members.len() as u8;
        let file_size = self.target.reg_file_size(kind);
        if count > file_size {
            return Err(LsraError::GroupTooLarge {
                node: head.node,
                kind,
                count,
                size: file_size,
            });
        }
        let intervals = members
            .iter()
            .map(|rp| build.ref_position(*rp).interval_id())
            .collect();
        Ok(Group {
            members,
            intervals,
            kind,
            count,
            file_size,
            wraps: self.target.consecutive_wraps(kind),
        })
    }

    fn target_reg(&self, group: &Group, start: u8, i: usize) -> PReg {
        self.preg((start + i as u8) % group.file_size, group.kind)
    }

    fn is_in_place(&self, group: &Group, start: u8, i: usize) -> bool {
        self.states[group.intervals[i].index()]
            == IntervalState::Active(self.target_reg(group, start, i))
    }

    /// The start of the run the members already sit in.
    fn in_place_start(&self, group: &Group) -> Option<u8> {
        let IntervalState::Active(first) = self.states[group.intervals[0].index()] else {
            return None;
        };
        let start = first.num();
        if !group.wraps && start + group.count > group.file_size {
            return None;
        }
        (0..group.intervals.len())
            .all(|i| self.is_in_place(group, start, i))
            .then_some(start)
    }

    /// The run keeping the most members in place without taking any register
    /// away. A run keeping only some of them still wins over the free runs.
    fn reuse_start(&self, group: &Group) -> Option<u8> {
        let free = self.free_mask(group.kind);
        let mut best: Option<(usize, u8)> = None;
        for start in starts(group.count, group.file_size, group.wraps) {
            let mut kept = 0;
            let mut usable = true;
            for i in 0..group.intervals.len() {
                if self.is_in_place(group, start, i) {
                    kept += 1;
                } else if !free.contains(self.target_reg(group, start, i).num()) {
                    usable = false;
                    break;
                }
            }
            if usable && kept > 0 && best.map_or(true, |(best, _)| kept > best) {
                best = Some((kept, start));
            }
        }
        best.map(|(_, start)| start)
    }

    /// The run with the fewest registers to clear, then the most members in
    /// place. `None` if every run holds a register that cannot be taken
    /// away.
    fn eviction_start(&self, group: &Group, movable: RegMask) -> Option<u8> {
        let k = group.kind.index();
        starts(group.count, group.file_size, group.wraps)
            .filter(|start| {
                window(*start, group.count, group.file_size) & !movable == RegMask::EMPTY
            })
            .min_by_key(|start| {
                let mut clear = 0;
                let mut kept = 0;
                for i in 0..group.intervals.len() {
                    let reg = self.target_reg(group, *start, i);
                    if self.is_in_place(group, *start, i) {
                        kept += 1;
                    } else if self.owner(reg).is_some() || self.locked[k].contains(reg.num()) {
                        clear += 1;
                    }
                }
                (clear, Reverse(kept))
            })
    }

    fn occupied_by_other(&self, reg: PReg, interval: IntervalId) -> bool {
        self.owner(reg).map_or(false, |owner| owner != interval)
    }

    pub(super) fn allocate_use_group(&mut self, first: RefPositionId) -> Result<(), LsraError> {
        let group = self.group(first)?;
        let k = group.kind.index();

        let start = if let Some(start) = self.in_place_start(&group) {
            self.stats.groups_in_place += 1;
            start
        } else if let Some(start) = self
            .reuse_start(&group)
            .filter(|_| self.config.reuse_consecutive)
        {
            self.stats.groups_reused += 1;
            start
        } else if let Some(start) = get_free_candidates(
            self.free_mask(group.kind),
            group.count,
            group.file_size,
            group.wraps,
        )
        .lowest()
        {
            self.stats.groups_free += 1;
            start
        } else {
            let movable = self.allocatable[k] & !self.reserved[k] & !self.locked[k] & !self.pinned[k];
            let node = self.build.ref_position(first).node;
            let start = self.eviction_start(&group, movable).ok_or(LsraError::NoWindow {
                node,
                kind: group.kind,
                count: group.count,
            })?;
            self.stats.groups_evicted += 1;
            self.clear_window(&group, start);
            start
        };

        trace!(
            "group of {} at {} starts at {:?}",
            group.count,
            self.location,
            self.target_reg(&group, start, 0)
        );
        self.commit_use_group(&group, start)
    }

    /// Take the registers of the run away from everything not in place.
    fn clear_window(&mut self, group: &Group, start: u8) {
        let window = window(start, group.count, group.file_size);
        for i in 0..group.intervals.len() {
            let reg = self.target_reg(group, start, i);
            let Some(occupant) = self.owner(reg) else {
                continue;
            };
            if self.is_in_place(group, start, i) {
                continue;
            }
            let to = (self.free_mask(group.kind) & !window).lowest();
            match to {
                Some(to) if self.location % 2 == 0 => {
                    let to = self.preg(to, group.kind);
                    self.move_interval(occupant, reg, to);
                    // nothing reads the old register at this location
                    self.locked[group.kind.index()].remove(reg.num());
                }
                _ => {
                    self.stats.evictions += 1;
                    self.spill(occupant, reg);
                }
            }
        }
    }

    fn commit_use_group(&mut self, group: &Group, start: u8) -> Result<(), LsraError> {
        let build = self.build;
        let window = window(start, group.count, group.file_size);
        for (i, member) in group.members.iter().enumerate() {
            let rp = build.ref_position(*member);
            let interval = group.intervals[i];
            let to = self.target_reg(group, start, i);

            if !self.is_in_place(group, start, i) {
                if self.occupied_by_other(to, interval) {
                    warn!(
                        "{:?} is unexpectedly busy for the group at {}, placing {} alone",
                        to, self.location, rp.id
                    );
                    self.evict(to);
                }
                self.place_member(rp, to, window)?;
            }
            self.assign(rp, to);
        }
        Ok(())
    }

    /// Bring the interval of a group member into `to`.
    ///
    /// A value already inside the window is read there by another member
    /// of a group repeating it, so it is copied. A value outside the window
    /// moves in, and its old register is not read by the node.
    fn place_member(&mut self, rp: &RefPosition, to: PReg, window: RegMask) -> Result<(), LsraError> {
        let interval = rp.interval_id();
        match self.states[interval.index()] {
            IntervalState::Active(curr) if window.contains(curr.num()) => {
                self.copy_interval(rp, curr, to)
            }
            IntervalState::Active(curr) => {
                self.move_interval(interval, curr, to);
                self.locked[curr.kind().index()].remove(curr.num());
            }
            IntervalState::Spilled => self.reload(interval, to),
            IntervalState::Unborn | IntervalState::Dead => {
                return Err(LsraError::UseBeforeDef {
                    interval,
                    location: self.location,
                })
            }
        }
        Ok(())
    }

    pub(super) fn allocate_def_group(&mut self, first: RefPositionId) -> Result<(), LsraError> {
        let group = self.group(first)?;
        let k = group.kind.index();

        let free = self.free_mask(group.kind) & !self.pinned[k];
        let start = match get_free_candidates(free, group.count, group.file_size, group.wraps)
            .lowest()
        {
            Some(start) => {
                self.stats.groups_free += 1;
                start
            }
            None => {
                let movable = self.allocatable[k] & !self.reserved[k] & !self.locked[k] & !self.pinned[k];
                let node = self.build.ref_position(first).node;
                let start = self.eviction_start(&group, movable).ok_or(LsraError::NoWindow {
                    node,
                    kind: group.kind,
                    count: group.count,
                })?;
                self.stats.groups_evicted += 1;
                for i in 0..group.intervals.len() {
                    let reg = self.target_reg(&group, start, i);
                    if self.owner(reg).is_some() {
                        self.evict(reg);
                    }
                }
                start
            }
        };

        let build = self.build;
        for (i, member) in group.members.iter().enumerate() {
            let rp = build.ref_position(*member);
            let interval = group.intervals[i];
            let to = self.target_reg(&group, start, i);
            self.begin_def(interval);
            self.occupy(to, interval);
            self.assign(rp, to);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_candidates_single_run() {
        let free = RegMask::from_nums(&[3, 4, 5, 6]);
        assert_eq!(get_free_candidates(free, 2, 32, false), RegMask::from_nums(&[3, 4, 5]));
        assert_eq!(get_free_candidates(free, 4, 32, false), RegMask::single(3));
        assert_eq!(get_free_candidates(free, 5, 32, false), RegMask::EMPTY);
        assert_eq!(get_free_candidates(free, 1, 32, false), free);
    }

    #[test]
    fn test_free_candidates_wrap() {
        let free = RegMask::from_nums(&[30, 31, 0]);
        assert_eq!(get_free_candidates(free, 3, 32, true), RegMask::single(30));
        assert_eq!(get_free_candidates(free, 3, 32, false), RegMask::EMPTY);
        assert_eq!(get_free_candidates(free, 2, 32, false), RegMask::single(30));
    }

    #[test]
    fn test_free_candidates_too_large() {
        assert_eq!(get_free_candidates(RegMask::first_n(4), 5, 4, true), RegMask::EMPTY);
        assert_eq!(get_free_candidates(RegMask::first_n(4), 4, 4, false), RegMask::single(0));
    }

    #[test]
    fn test_window_wraps() {
        assert_eq!(window(31, 3, 32), RegMask::from_nums(&[31, 0, 1]));
        assert_eq!(starts(3, 32, false).last(), Some(29));
        assert_eq!(starts(3, 32, true).last(), Some(31));
    }
}
