//! Checks of a finished allocation.

use rustc_hash::FxHashMap;

use super::{AllocationResult, IntervalId, LsraBuild, LsraError, RefKind};
use crate::target::{PReg, RegKind, TargetDesc};

macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(LsraError::InvalidAllocation(format!($($arg)*)));
        }
    };
}

/// Check the allocation against the references it was made for.
///
/// - the references of every interval come in order;
/// - every def and use got a register of its kind, inside its candidates,
///   except reg-optional uses of values that have a spill slot;
/// - consecutive groups got consecutive registers;
/// - no register holds two values at once, and no register read
///   delay-free is defined over by the same node.
pub fn check_allocation(
    build: &LsraBuild,
    result: &AllocationResult,
    target: &dyn TargetDesc,
) -> Result<(), LsraError> {
    for interval in build.intervals.iter() {
        for pair in interval.refs.windows(2) {
            let (a, b) = (build.ref_position(pair[0]), build.ref_position(pair[1]));
            ensure!(
                a.id < b.id && a.location <= b.location,
                "{} of {} comes before {}",
                b.id,
                interval.id,
                a.id
            );
        }
    }

    for rp in build.ref_positions.iter().filter(|rp| !rp.is_kill()) {
        let Some(reg) = result.reg(rp.id) else {
            let in_slot = rp.is_use()
                && rp.reg_optional
                && rp.interval.map_or(false, |interval| {
                    !build.interval(interval).is_constant()
                        && result.spill_slots.contains_key(&interval)
                });
            ensure!(in_slot, "{} has no register", rp);
            continue;
        };
        ensure!(reg.kind() == rp.reg_kind, "{} got a {} register", rp, reg.kind());
        ensure!(
            reg.num() < target.reg_file_size(rp.reg_kind),
            "{} got {:?}, outside the register file",
            rp,
            reg
        );
        ensure!(rp.candidates.contains(reg.num()), "{} got {:?}, not a candidate", rp, reg);
    }

    for rp in build.ref_positions.iter().filter(|rp| rp.needs_consecutive) {
        let file_size = target.reg_file_size(rp.reg_kind);
        let wraps = target.consecutive_wraps(rp.reg_kind);
        let regs = build
            .group(rp.id)
            .into_iter()
            .filter_map(|member| result.reg(member))
            .collect::<Vec<_>>();
        ensure!(
            regs.len() == rp.reg_count as usize,
            "group of {} has {} registers",
            rp,
            regs.len()
        );
        for (i, reg) in regs.iter().enumerate() {
            let expected = regs[0].num() as usize + i;
            ensure!(
                wraps || expected < file_size as usize,
                "group of {} runs off the register file",
                rp
            );
            ensure!(
                reg.num() as usize == expected % file_size as usize,
                "group of {} is not consecutive: {:?}",
                rp,
                regs
            );
        }
    }

    // at one location every register holds one value
    let mut held: FxHashMap<(u32, PReg), IntervalId> = FxHashMap::default();
    let mut delay_free: FxHashMap<(u32, PReg), IntervalId> = FxHashMap::default();
    for rp in build.ref_positions.iter() {
        let (Some(interval), Some(reg)) = (rp.interval, result.reg(rp.id)) else {
            continue;
        };
        if let Some(other) = held.insert((rp.location, reg), interval) {
            ensure!(
                other == interval,
                "{:?} holds {} and {} at {}",
                reg,
                other,
                interval,
                rp.location
            );
        }
        if rp.delay_free {
            delay_free.insert((rp.location + 1, reg), interval);
        }
        if rp.kind == RefKind::Def {
            if let Some(other) = delay_free.get(&(rp.location, reg)) {
                ensure!(
                    *other == interval,
                    "{} is defined over the delay-free {} in {:?}",
                    interval,
                    other,
                    reg
                );
            }
        }
    }

    let mut pressure: FxHashMap<(u32, usize), usize> = FxHashMap::default();
    for ((location, reg), _) in held.iter() {
        *pressure.entry((*location, reg.kind().index())).or_default() += 1;
    }
    for ((location, k), count) in pressure {
        let kind = RegKind::ALL[k];
        ensure!(
            count <= target.reg_file_size(kind) as usize,
            "{} {} values live at {}",
            count,
            kind,
            location
        );
    }

    Ok(())
}
