mod common;

use common::{lower, lower_with, method};
use lsra_core::{
    ir::{Cond, Opcode, Ty},
    lower::LowerConfig,
    target::{Arm64, RiscV64, X64},
};

#[test]
fn test_mul_add() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let d = b.param(2, Ty::I64);
        let prod = b.mul(a, c);
        let sum = b.add(d, prod);
        nodes = Some((a, c, d, prod, sum));
        b.ret(Some(sum));
    });
    let (a, c, d, prod, sum) = nodes.unwrap();

    let stats = lower(&mut lir, block, &Arm64);
    assert_eq!(sum.op(&lir), Opcode::MulAdd);
    assert_eq!(sum.operands(&lir), &[a, c, d]);
    assert!(prod.is_dead(&lir));
    assert_eq!(stats.fused, 1);
}

#[test]
fn test_mul_sub_and_negated_factor() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let d = b.param(2, Ty::I64);
        let neg = b.neg(a);
        let prod = b.mul(neg, c);
        let diff = b.sub(d, prod);
        nodes = Some((a, c, d, neg, diff));
        b.ret(Some(diff));
    });
    let (a, c, d, neg, diff) = nodes.unwrap();

    lower(&mut lir, block, &Arm64);
    // d - (-a * c) == d + a * c
    assert_eq!(diff.op(&lir), Opcode::MulAdd);
    assert_eq!(diff.operands(&lir), &[a, c, d]);
    assert!(neg.is_dead(&lir));
}

#[test]
fn test_shared_mul_not_fused() {
    let mut sum = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let prod = b.mul(a, c);
        let s = b.add(prod, c);
        let t = b.add(s, prod);
        sum = Some(s);
        b.ret(Some(t));
    });

    lower(&mut lir, block, &Arm64);
    assert_eq!(sum.unwrap().op(&lir), Opcode::Add);
}

#[test]
fn test_no_mul_add_without_target_support() {
    let mut sum = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let prod = b.mul(a, c);
        let s = b.add(a, prod);
        sum = Some(s);
        b.ret(Some(s));
    });

    lower(&mut lir, block, &RiscV64);
    assert_eq!(sum.unwrap().op(&lir), Opcode::Add);
}

#[test]
fn test_fold_negation() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let x = b.param(0, Ty::I64);
        let y = b.param(1, Ty::I64);
        let neg = b.neg(y);
        let sum = b.add(x, neg);
        nodes = Some((x, y, sum));
        b.ret(Some(sum));
    });
    let (x, y, sum) = nodes.unwrap();

    lower(&mut lir, block, &X64);
    assert_eq!(sum.op(&lir), Opcode::Sub);
    assert_eq!(sum.operands(&lir), &[x, y]);
}

#[test]
fn test_float_mul_add() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::F64);
        let c = b.param(1, Ty::F64);
        let d = b.param(2, Ty::F64);
        let neg = b.fneg(c);
        let prod = b.fmul(a, neg);
        let diff = b.fsub(d, prod);
        nodes = Some((a, c, d, diff));
        b.ret(Some(diff));
    });
    let (a, c, d, diff) = nodes.unwrap();

    lower(&mut lir, block, &RiscV64);
    // d - a * (-c) == d + a * c
    assert_eq!(
        diff.op(&lir),
        Opcode::FMulAdd {
            negate_product: false
        }
    );
    assert_eq!(diff.operands(&lir), &[a, c, d]);
}

#[test]
fn test_compare_chain() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let d = b.param(2, Ty::I64);
        let lt = b.cmp(Cond::Lt, a, c);
        let zero = b.iconst(0, Ty::I64);
        let ne = b.cmp(Cond::Ne, d, zero);
        let both = b.and(lt, ne);
        nodes = Some((lt, ne, both));
        b.ret(Some(both));
    });
    let (lt, ne, both) = nodes.unwrap();

    lower(&mut lir, block, &Arm64);
    assert_eq!(both.op(&lir), Opcode::SetCC(Cond::Ne));
    assert_eq!(both.operands(&lir), &[ne]);
    assert_eq!(
        ne.op(&lir),
        Opcode::CCmp {
            cond: Cond::Ne,
            pred: Cond::Lt,
            nzcv: Cond::Eq.truthifying_flags(),
        }
    );
    assert_eq!(ne.ty(&lir), Ty::Flags);
    assert_eq!(ne.operand(&lir, 0), lt);
    assert_eq!(lt.ty(&lir), Ty::Flags);
    // ccmp takes a 5-bit immediate
    assert!(ne.operand(&lir, 2).is_contained(&lir));
}

#[test]
fn test_or_chain_extends() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let d = b.param(2, Ty::I64);
        let eq = b.cmp(Cond::Eq, a, c);
        let gt = b.cmp(Cond::Gt, c, d);
        let either = b.or(eq, gt);
        let lt = b.cmp(Cond::Lt, a, d);
        let all = b.and(either, lt);
        nodes = Some((gt, lt, all));
        b.ret(Some(all));
    });
    let (gt, lt, all) = nodes.unwrap();

    lower(&mut lir, block, &Arm64);
    assert_eq!(all.op(&lir), Opcode::SetCC(Cond::Lt));
    assert_eq!(
        lt.op(&lir),
        Opcode::CCmp {
            cond: Cond::Lt,
            pred: Cond::Gt,
            nzcv: Cond::Ge.truthifying_flags(),
        }
    );
    assert_eq!(lt.operand(&lir, 0), gt);
    assert!(matches!(gt.op(&lir), Opcode::CCmp { cond: Cond::Gt, .. }));
}

#[test]
fn test_select_on_compare() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let lt = b.cmp(Cond::Ult, a, c);
        let sel = b.select(lt, a, c);
        nodes = Some((lt, sel));
        b.ret(Some(sel));
    });
    let (lt, sel) = nodes.unwrap();

    lower(&mut lir, block, &X64);
    assert_eq!(sel.op(&lir), Opcode::SelectCC(Cond::Ult));
    assert_eq!(sel.operand(&lir, 0), lt);
    assert_eq!(lt.ty(&lir), Ty::Flags);
}

#[test]
fn test_flags_clobber_blocks_select_fusion() {
    let mut sel = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let p = b.param(2, Ty::Ptr);
        let lt = b.cmp(Cond::Lt, a, c);
        b.store(p, a);
        let s = b.select(lt, a, c);
        sel = Some(s);
        b.ret(Some(s));
    });

    // the compare moves down to the select, a store is no obstacle
    lower(&mut lir, block, &Arm64);
    assert_eq!(sel.unwrap().op(&lir), Opcode::SelectCC(Cond::Lt));

    let mut sels = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let lt = b.cmp(Cond::Lt, a, c);
        let ge = b.cmp(Cond::Ge, a, c);
        let s0 = b.select(lt, a, c);
        let s1 = b.select(ge, s0, c);
        sels = Some((s0, s1));
        b.ret(Some(s1));
    });
    let (s0, s1) = sels.unwrap();

    // the first compare moves down past the second one, whose flags would
    // then be overwritten before the second select
    lower(&mut lir, block, &Arm64);
    assert_eq!(s0.op(&lir), Opcode::SelectCC(Cond::Lt));
    assert_eq!(s1.op(&lir), Opcode::Select);
}

#[test]
fn test_fusion_disabled() {
    let mut sum = None;
    let (mut lir, block) = method(|b| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let prod = b.mul(a, c);
        let s = b.add(a, prod);
        sum = Some(s);
        b.ret(Some(s));
    });

    let config = LowerConfig {
        fusion: false,
        ..LowerConfig::default()
    };
    let stats = lower_with(&mut lir, block, &Arm64, config);
    assert_eq!(sum.unwrap().op(&lir), Opcode::Add);
    assert_eq!(stats.fused, 0);
}
