mod common;

use common::{build_refs, lower, method, refs};
use lsra_core::{
    ir::Ty,
    lsra::{LsraBuild, LsraConfig, RefKind, RefPosition, RefPositionBuilder},
    target::{arm64::x, Arm64, IntrinsicId, RegKind, RegMask, TargetDesc, X64},
};

fn summary(rp: &RefPosition) -> (u32, RefKind, Option<u8>) { (rp.location, rp.kind, rp.fixed_reg()) }

fn is_temp(build: &LsraBuild, rp: &RefPosition) -> bool {
    rp.interval
        .map_or(false, |interval| build.interval(interval).is_internal())
}

#[test]
fn test_locations() {
    let mut nodes = None;
    let (lir, block) = method(|b| {
        let p0 = b.param(0, Ty::I64);
        let p1 = b.param(1, Ty::I64);
        let sum = b.add(p0, p1);
        let ret = b.ret(Some(sum));
        nodes = Some((p0, p1, sum, ret));
    });
    let (p0, p1, sum, ret) = nodes.unwrap();

    let build = build_refs(&lir, block, &Arm64);
    assert_eq!(build.order, vec![p0, p1, sum, ret]);
    assert_eq!(build.max_location(), 8);

    let p0_refs = refs(&build, p0);
    assert_eq!(p0_refs.len(), 1);
    assert_eq!(summary(p0_refs[0]), (1, RefKind::Def, Some(0)));
    assert_eq!(summary(refs(&build, p1)[0]), (3, RefKind::Def, Some(1)));

    let sum_refs = refs(&build, sum);
    let shape = sum_refs.iter().map(|rp| summary(rp)).collect::<Vec<_>>();
    assert_eq!(
        shape,
        vec![
            (4, RefKind::Use, None),
            (4, RefKind::Use, None),
            (5, RefKind::Def, None)
        ]
    );
    assert_eq!(sum_refs[0].operand, Some(0));
    assert_eq!(sum_refs[1].operand, Some(1));
    assert!(sum_refs[0].last_use && sum_refs[1].last_use);

    let ret_refs = refs(&build, ret);
    assert_eq!(ret_refs.len(), 1);
    assert_eq!(summary(ret_refs[0]), (6, RefKind::Use, Some(0)));
    assert!(ret_refs[0].last_use);

    // every interval is referenced in increasing order
    for interval in build.intervals.iter() {
        let locations = interval
            .refs
            .iter()
            .map(|rp| build.ref_position(*rp).location)
            .collect::<Vec<_>>();
        assert!(locations.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}

#[test]
fn test_call_kills() {
    let mut nodes = None;
    let (lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let r = b.call(1, &[a], &[Ty::I64]);
        let sum = b.add(r, a);
        nodes = Some((a, r));
        b.ret(Some(sum));
    });
    let (a, call) = nodes.unwrap();

    let build = build_refs(&lir, block, &Arm64);
    let call_refs = refs(&build, call);

    let arg = call_refs[0];
    assert_eq!(summary(arg), (2, RefKind::Use, Some(0)));
    assert!(!arg.last_use);

    let kills = call_refs
        .iter()
        .filter(|rp| rp.is_kill())
        .map(|rp| (rp.location, rp.reg_kind, rp.candidates))
        .collect::<Vec<_>>();
    assert_eq!(
        kills,
        vec![
            (3, RegKind::General, Arm64.caller_saved(RegKind::General)),
            (3, RegKind::Vector, Arm64.caller_saved(RegKind::Vector)),
        ]
    );
    assert!(call_refs.iter().filter(|rp| rp.is_kill()).all(|rp| rp.interval.is_none()));

    let def = call_refs.last().unwrap();
    assert_eq!(summary(def), (3, RefKind::Def, Some(0)));

    // a lives across the call and prefers the callee-saved registers
    let a_interval = build.interval(build.node_intervals[&a][0]);
    let preferred = Arm64.allocatable(RegKind::General) & !Arm64.caller_saved(RegKind::General);
    assert_eq!(a_interval.preferences, preferred);
    assert!(a_interval.preferences.contains(x(19).num()));
    assert!(!a_interval.preferences.contains(x(0).num()));

    // the result is defined after the kill
    let r_interval = build.interval(build.node_intervals[&call][0]);
    assert!(r_interval.preferences.is_empty());
}

#[test]
fn test_read_modify_write() {
    let mut nodes = None;
    let (lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let diff = b.sub(a, c);
        nodes = Some((a, diff));
        b.ret(Some(diff));
    });
    let (a, diff) = nodes.unwrap();

    let build = build_refs(&lir, block, &X64);
    let diff_refs = refs(&build, diff);
    let uses = diff_refs.iter().filter(|rp| rp.is_use()).collect::<Vec<_>>();
    assert_eq!(uses.len(), 2);
    // the result overwrites operand 0, operand 1 must survive the write
    assert!(!uses[0].delay_free);
    assert!(uses[1].delay_free);

    let diff_interval = build.interval(build.node_intervals[&diff][0]);
    assert_eq!(diff_interval.related, Some(build.node_intervals[&a][0]));

    // arm64 has three-operand encodings
    let build = build_refs(&lir, block, &Arm64);
    assert!(refs(&build, diff).iter().all(|rp| !rp.delay_free));
}

#[test]
fn test_x64_fixed_registers() {
    let mut nodes = None;
    let (lir, block) = method(|b| {
        let p = b.param(0, Ty::Ptr);
        let expected = b.param(1, Ty::I64);
        let new = b.param(2, Ty::I64);
        let old = b.intrinsic(IntrinsicId::CompareExchange, &[p, expected, new]);
        let shifted = b.shl(new, old);
        nodes = Some((old, shifted));
        b.ret(Some(shifted));
    });
    let (old, shifted) = nodes.unwrap();

    let build = build_refs(&lir, block, &X64);
    let old_refs = refs(&build, old);
    let fixed = old_refs.iter().map(|rp| summary(rp)).collect::<Vec<_>>();
    // native cmpxchg compares with and returns in rax, no scratch register
    assert_eq!(
        fixed,
        vec![
            (6, RefKind::Use, None),
            (6, RefKind::Use, Some(0)),
            (6, RefKind::Use, None),
            (7, RefKind::Def, Some(0)),
        ]
    );

    // the count of a variable shift is in cl
    let count = refs(&build, shifted)
        .into_iter()
        .find(|rp| rp.operand == Some(1))
        .unwrap();
    assert_eq!(count.fixed_reg(), Some(1));
}

#[test]
fn test_table_lookup_group() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let p = b.param(0, Ty::Ptr);
        let idx = b.param(1, Ty::V128);
        let table = b.intrinsic(IntrinsicId::LoadVector3, &[p]);
        let t0 = b.proj(table, 0);
        let t1 = b.proj(table, 1);
        let t2 = b.proj(table, 2);
        let tbl = b.intrinsic(IntrinsicId::TableLookup3, &[t0, t1, t2, idx]);
        nodes = Some((table, tbl));
        b.ret(Some(tbl));
    });
    let (table, tbl) = nodes.unwrap();

    lower(&mut lir, block, &Arm64);
    let build = build_refs(&lir, block, &Arm64);

    let defs = refs(&build, table)
        .into_iter()
        .filter(|rp| rp.is_def())
        .collect::<Vec<_>>();
    assert_eq!(defs.len(), 3);
    assert!(defs[0].needs_consecutive);
    assert_eq!(defs[0].reg_count, 3);
    assert_eq!(
        defs.iter().map(|rp| rp.multi_reg_idx).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        build.group(defs[0].id),
        defs.iter().map(|rp| rp.id).collect::<Vec<_>>()
    );

    let uses = refs(&build, tbl);
    // three table registers, the index, the result
    assert_eq!(uses.len(), 5);
    let first = uses[0];
    assert!(first.needs_consecutive);
    assert_eq!(first.reg_count, 3);
    assert_eq!(first.reg_kind, RegKind::Vector);
    let group = build.group(first.id);
    assert_eq!(group, vec![uses[0].id, uses[1].id, uses[2].id]);
    // the members read the projected values of the load
    for (k, rp) in group.iter().enumerate() {
        let interval = build.ref_position(*rp).interval.unwrap();
        assert_eq!(interval, build.node_intervals[&table][k]);
    }
    // the index is not part of the group
    assert!(!build.next_consecutive.contains_key(&uses[2].id));
    assert!(!uses[3].needs_consecutive);
}

#[test]
fn test_retry_loop_temps() {
    let mut atomic = None;
    let (lir, block) = method(|b| {
        let p = b.param(0, Ty::Ptr);
        let v = b.param(1, Ty::I64);
        let old = b.intrinsic(IntrinsicId::AtomicAdd, &[p, v]);
        atomic = Some(old);
        b.ret(Some(old));
    });
    let atomic = atomic.unwrap();

    let build = build_refs(&lir, block, &Arm64);
    let atomic_refs = refs(&build, atomic);

    let temp_defs = atomic_refs
        .iter()
        .filter(|rp| rp.is_def() && is_temp(&build, rp))
        .collect::<Vec<_>>();
    assert_eq!(temp_defs.len(), 2);
    assert!(temp_defs.iter().all(|rp| rp.location == 4));

    let temp_uses = atomic_refs
        .iter()
        .filter(|rp| rp.is_use() && is_temp(&build, rp))
        .collect::<Vec<_>>();
    assert_eq!(temp_uses.len(), 2);
    assert!(temp_uses.iter().all(|rp| rp.location == 5 && rp.last_use));

    // the operands are read again on every iteration of the loop
    let operand_uses = atomic_refs
        .iter()
        .filter(|rp| rp.is_use() && !is_temp(&build, rp))
        .collect::<Vec<_>>();
    assert_eq!(operand_uses.len(), 2);
    assert!(operand_uses.iter().all(|rp| rp.delay_free));

    // a native xadd needs no scratch register and writes over the addend
    let build = build_refs(&lir, block, &X64);
    let atomic_refs = refs(&build, atomic);
    assert!(atomic_refs.iter().all(|rp| !is_temp(&build, rp)));
    let uses = atomic_refs.iter().filter(|rp| rp.is_use()).collect::<Vec<_>>();
    assert!(uses[0].delay_free);
    assert!(!uses[1].delay_free);
    let result = build.interval(build.node_intervals[&atomic][0]);
    assert_eq!(result.related, uses[1].interval);
}

#[test]
fn test_local_last_uses() {
    let mut nodes = None;
    let (lir, block) = method(|b| {
        let p = b.param(0, Ty::I64);
        b.store_lcl_var(0, p);
        let l1 = b.lcl_var(0, Ty::I64);
        let sum = b.add(l1, p);
        b.store_lcl_var(0, sum);
        let l2 = b.lcl_var(0, Ty::I64);
        nodes = Some((p, l1, l2));
        b.ret(Some(l2));
    });
    let (p, l1, l2) = nodes.unwrap();

    let build = build_refs(&lir, block, &Arm64);
    let local = build
        .intervals
        .iter()
        .find(|interval| interval.local() == Some(0))
        .unwrap();
    let shape = local
        .refs
        .iter()
        .map(|rp| {
            let rp = build.ref_position(*rp);
            (rp.location, rp.kind, rp.last_use)
        })
        .collect::<Vec<_>>();
    // the first value dies when the local is written again
    assert_eq!(
        shape,
        vec![
            (3, RefKind::Def, false),
            (4, RefKind::Use, true),
            (9, RefKind::Def, false),
            (10, RefKind::Use, true),
        ]
    );

    let p_uses = build
        .interval(build.node_intervals[&p][0])
        .refs
        .iter()
        .map(|rp| build.ref_position(*rp))
        .filter(|rp| rp.is_use())
        .map(|rp| rp.last_use)
        .collect::<Vec<_>>();
    assert_eq!(p_uses, vec![false, true]);

    // reads of a local prefer the register of the local
    for read in [l1, l2] {
        let interval = build.interval(build.node_intervals[&read][0]);
        assert_eq!(interval.related, Some(local.id));
    }
}

#[test]
fn test_reg_limit() {
    let (lir, block) = method(|b| {
        let p0 = b.param(0, Ty::I64);
        let p1 = b.param(1, Ty::I64);
        let sum = b.add(p0, p1);
        b.ret(Some(sum));
    });

    let config = LsraConfig {
        reg_limit: Some(4),
        ..LsraConfig::default()
    };
    assert_eq!(
        config.allocatable(&X64, RegKind::General),
        RegMask::from_nums(&[0, 1, 2, 3])
    );
    assert_eq!(
        config.allocatable(&Arm64, RegKind::Vector),
        RegMask::first_n(4)
    );

    let build = RefPositionBuilder::new(&lir, block, &Arm64, &config)
        .build()
        .unwrap();
    for rp in build.ref_positions.iter().filter(|rp| !rp.fixed) {
        assert_eq!(rp.candidates, RegMask::first_n(4));
    }
}
