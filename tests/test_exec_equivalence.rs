mod common;

use common::{check_equivalent, int, limited, MEMORY_BASE};
use lsra_core::{
    codegen::CodegenConfig,
    exec::RegValue,
    ir::{Cond, LirBuilder, Opcode, Ty},
    target::{Arm64, IntrinsicId, RiscV64, TargetDesc, X64},
};

/// The configurations every program is checked under: the defaults, a
/// small register file, and everything in registers.
fn configs(target: &dyn TargetDesc) -> Vec<(&'static str, CodegenConfig)> {
    // the argument registers stay allocatable
    let tight = match target.name() {
        "riscv64" => 14,
        _ => 8,
    };
    let mut plain = CodegenConfig::default();
    plain.lower.containment = false;
    let mut no_fusion = limited(tight);
    no_fusion.lower.fusion = false;
    vec![
        ("default", CodegenConfig::default()),
        ("limited", limited(tight)),
        ("no-containment", plain),
        ("limited-no-fusion", no_fusion),
    ]
}

fn check_all(build: impl Fn(&mut LirBuilder) + Copy, targets: &[&dyn TargetDesc], params: &[RegValue]) {
    for target in targets {
        for (name, config) in configs(*target) {
            println!("== {} {}", target.name(), name);
            check_equivalent(build, *target, &config, params);
        }
    }
}

const ALL: [&dyn TargetDesc; 3] = [&Arm64, &X64, &RiscV64];

#[test]
fn test_address_arithmetic() {
    // *(p + 8 + i * 8) * c + i
    let build = |b: &mut LirBuilder| {
        let p = b.param(0, Ty::Ptr);
        let i = b.param(1, Ty::I64);
        let c = b.param(2, Ty::I64);
        let eight = b.iconst(8, Ty::I64);
        let base = b.add(p, eight);
        let three = b.iconst(3, Ty::I64);
        let scaled = b.shl(i, three);
        let addr = b.add(base, scaled);
        let l = b.load(addr, Ty::I64);
        let prod = b.mul(l, c);
        let sum = b.add(prod, i);
        b.ret(Some(sum));
    };
    check_all(build, &ALL, &[int(MEMORY_BASE as i64), int(5), int(-7)]);
}

#[test]
fn test_memory_operands() {
    let build = |b: &mut LirBuilder| {
        let p = b.param(0, Ty::Ptr);
        let q = b.param(1, Ty::Ptr);
        let x = b.param(2, Ty::I64);
        let l0 = b.load(p, Ty::I64);
        let sum = b.add(x, l0);
        b.store(q, sum);
        let l1 = b.load(p, Ty::I64);
        let diff = b.sub(sum, l1);
        let sixteen = b.iconst(16, Ty::I64);
        let addr = b.add(q, sixteen);
        let narrow = b.load(addr, Ty::I32);
        let zero = b.iconst(0, Ty::I32);
        b.store(addr, zero);
        let narrow_sum = b.add(narrow, narrow);
        b.store(q, narrow_sum);
        b.ret(Some(diff));
    };
    check_all(
        build,
        &ALL,
        &[int(MEMORY_BASE as i64), int(MEMORY_BASE as i64 + 64), int(1000)],
    );
}

#[test]
fn test_calls() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let x = b.add(a, c);
        let r1 = b.call(1, &[a, x], &[Ty::I64]);
        let r2 = b.call(2, &[r1], &[Ty::I64]);
        let y = b.add(x, r2);
        let z = b.sub(y, a);
        let w = b.mul(z, c);
        b.ret(Some(w));
    };
    check_all(build, &ALL, &[int(21), int(-4)]);
}

#[test]
fn test_compare_chains() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let d = b.param(2, Ty::I64);
        let lt = b.cmp(Cond::Lt, a, c);
        let zero = b.iconst(0, Ty::I64);
        let ne = b.cmp(Cond::Ne, d, zero);
        let both = b.and(lt, ne);
        let gt = b.cmp(Cond::Gt, a, d);
        let either = b.or(both, gt);
        let sel = b.select(either, a, c);
        let ule = b.cmp(Cond::Ule, c, d);
        let picked = b.select(ule, sel, d);
        b.ret(Some(picked));
    };
    for params in [[1, 2, 3], [5, 2, 0], [-1, -1, 7], [3, 9, 9]] {
        check_all(build, &ALL, &params.map(int));
    }
}

#[test]
fn test_multiply_add() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let d = b.param(2, Ty::I64);
        let neg = b.neg(a);
        let prod = b.mul(neg, c);
        let diff = b.sub(d, prod);
        let prod = b.mul(c, d);
        let sum = b.add(prod, diff);
        let negated = b.neg(sum);
        let ret = b.add(a, negated);
        b.ret(Some(ret));
    };
    check_all(build, &ALL, &[int(3), int(-11), int(40)]);
}

#[test]
fn test_float_multiply_add() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::F64);
        let c = b.param(1, Ty::F64);
        let d = b.param(2, Ty::F64);
        let prod = b.fmul(a, c);
        let sum = b.fadd(prod, d);
        let neg = b.fneg(c);
        let prod = b.fmul(sum, neg);
        let diff = b.fsub(a, prod);
        b.ret(Some(diff));
    };
    let params = [
        RegValue::from_f64(1.5),
        RegValue::from_f64(-2.25),
        RegValue::from_f64(1e10),
    ];
    check_all(build, &ALL, &params);
}

#[test]
fn test_x64_shifts() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::I64);
        let n = b.param(1, Ty::I64);
        let m = b.param(2, Ty::I64);
        let d = b.param(3, Ty::I64);
        let x = b.shl(a, n);
        let y = b.binary(Opcode::Sar, d, m);
        let z = b.binary(Opcode::Shr, x, m);
        let sum = b.add(y, z);
        let sum = b.add(sum, n);
        b.ret(Some(sum));
    };
    check_all(build, &ALL, &[int(-5), int(3), int(1), int(-64)]);
}

#[test]
fn test_x64_read_modify_write() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        let x = b.sub(a, c);
        let y = b.sub(c, x);
        let z = b.xor(y, a);
        let w = b.mul(z, x);
        let v = b.sub(w, c);
        let not = b.not(v);
        b.ret(Some(not));
    };
    check_all(build, &ALL, &[int(17), int(-9)]);
}

#[test]
fn test_atomics() {
    let build = |b: &mut LirBuilder| {
        let p = b.param(0, Ty::Ptr);
        let v = b.param(1, Ty::I64);
        let old = b.intrinsic(IntrinsicId::AtomicAdd, &[p, v]);
        let now = b.load(p, Ty::I64);
        let swapped = b.intrinsic(IntrinsicId::CompareExchange, &[p, now, old]);
        let again = b.intrinsic(IntrinsicId::CompareExchange, &[p, v, now]);
        let after = b.load(p, Ty::I64);
        let sum = b.add(swapped, again);
        let sum = b.add(sum, after);
        let sum = b.add(sum, v);
        b.ret(Some(sum));
    };
    check_all(build, &ALL, &[int(MEMORY_BASE as i64 + 8), int(12345)]);
}

#[test]
fn test_vectors() {
    let build = |b: &mut LirBuilder| {
        let p = b.param(0, Ty::Ptr);
        let idx = b.param(1, Ty::V128);
        let table = b.intrinsic(IntrinsicId::LoadVector4, &[p]);
        let t = (0..4).map(|k| b.proj(table, k)).collect::<Vec<_>>();
        let looked_up = b.intrinsic(IntrinsicId::TableLookup4, &[t[0], t[1], t[2], t[3], idx]);
        let sixteen = b.iconst(16, Ty::I64);
        let addr = b.add(p, sixteen);
        let other = b.load(addr, Ty::V128);
        let two = b.intrinsic(IntrinsicId::TableLookup2, &[other, looked_up, idx]);
        let shift = b.iconst(9, Ty::I32);
        let shifted = b.intrinsic(IntrinsicId::ShiftLeftLogicalImm, &[two, shift]);
        let lane = b.iconst(7, Ty::I32);
        let elem = b.intrinsic(IntrinsicId::ExtractElement, &[shifted, lane]);
        let pair = b.intrinsic(IntrinsicId::LoadPair, &[p]);
        let lo = b.proj(pair, 0);
        let hi = b.proj(pair, 1);
        let sum = b.add(lo, hi);
        let sum = b.add(sum, elem);
        b.ret(Some(sum));
    };
    let idx = RegValue::from_bits(0x3f_30_2f_20_1f_10_0f_00_3e_31_2e_21_1e_11_0e_01);
    check_all(build, &[&Arm64], &[int(MEMORY_BASE as i64), idx]);
}

#[test]
fn test_locals() {
    let build = |b: &mut LirBuilder| {
        let a = b.param(0, Ty::I64);
        let c = b.param(1, Ty::I64);
        b.store_lcl_var(0, a);
        b.store_lcl_var(1, c);
        let l0 = b.lcl_var(0, Ty::I64);
        let l1 = b.lcl_var(1, Ty::I64);
        let sum = b.add(l0, l1);
        b.store_lcl_var(0, sum);
        let r = b.call(3, &[sum], &[Ty::I64]);
        let l0 = b.lcl_var(0, Ty::I64);
        let l1 = b.lcl_var(1, Ty::I64);
        let x = b.mul(l0, l1);
        b.store_lcl_var(1, x);
        let l1 = b.lcl_var(1, Ty::I64);
        let y = b.add(l1, r);
        b.ret(Some(y));
    };
    check_all(build, &ALL, &[int(6), int(-8)]);
}
