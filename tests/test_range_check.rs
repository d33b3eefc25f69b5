mod common;

use common::{build_refs, compile, limited, lower, memory, method, nodes_with, refs};
use lsra_core::{
    codegen::{compile_method, CodegenConfig, CodegenError},
    exec::{ExecError, Machine, Reference, RegValue, Trap},
    ir::{Block, Cond, Lir, LirBuilder, Node, Opcode, Ty},
    lower::{range_check_fails, LowerError},
    target::{Arm64, IntrinsicId, RiscV64, TargetDesc, X64},
};
use proptest::prelude::*;

const VECTOR: u128 = 0x0f0e_0d0c_0b0a_0908_0706_0504_0302_0100;

proptest! {
    #[test]
    fn test_range_check_fails_iff_out_of_range(
        value in any::<i64>(),
        a in any::<i64>(),
        b in any::<i64>(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert_eq!(range_check_fails(value, lo, hi), value < lo || value > hi);
    }

    #[test]
    fn test_range_check_small_ranges(value in -300i64..300, lo in -20i64..20, len in 0i64..40) {
        let hi = lo + len;
        prop_assert_eq!(range_check_fails(value, lo, hi), value < lo || value > hi);
    }
}

/// `extract_elem(p0, lane)`, the lane built by `lane`.
fn extract(lane: impl FnOnce(&mut LirBuilder) -> Node) -> (Lir, Block, Node) {
    let mut extract = None;
    let (lir, block) = method(|b| {
        let vector = b.param(0, Ty::V128);
        let lane = lane(b);
        let elem = b.intrinsic(IntrinsicId::ExtractElement, &[vector, lane]);
        extract = Some(elem);
        b.ret(Some(elem));
    });
    (lir, block, extract.unwrap())
}

fn run_both(
    lir: &mut Lir,
    block: Block,
    target: &dyn TargetDesc,
    params: &[RegValue],
) -> (Result<Option<RegValue>, ExecError>, Result<Option<RegValue>, ExecError>) {
    let expected = Reference::new(&lir.duplicate(), block)
        .with_memory(memory())
        .run(params)
        .map(|outcome| outcome.ret);
    let output = compile(lir, block, target, &CodegenConfig::default());
    let actual = Machine::new(lir, &output.build, &output.allocation)
        .with_memory(memory())
        .run(params)
        .map(|outcome| outcome.ret);
    (expected, actual)
}

#[test]
fn test_constant_in_range_is_contained() {
    let (mut lir, block, elem) = extract(|b| b.iconst(5, Ty::I32));
    let stats = lower(&mut lir, block, &Arm64);

    assert_eq!(stats.range_checks, 0);
    assert!(elem.operand(&lir, 1).is_contained(&lir));
    assert!(!elem.needs_imm_fallback(&lir));
    assert!(nodes_with(&lir, block, |op| matches!(op, Opcode::ThrowIf(_))).is_empty());
}

#[test]
fn test_shared_constant_is_cloned() {
    let mut nodes = None;
    let (mut lir, block) = method(|b| {
        let vector = b.param(0, Ty::V128);
        let wide = b.param(1, Ty::I32);
        let addr = b.param(2, Ty::Ptr);
        let lane = b.iconst(5, Ty::I32);
        let elem = b.intrinsic(IntrinsicId::ExtractElement, &[vector, lane]);
        let sum = b.add(wide, lane);
        b.store(addr, sum);
        nodes = Some((lane, elem));
        b.ret(Some(elem));
    });
    let (lane, elem) = nodes.unwrap();

    lower(&mut lir, block, &Arm64);
    let imm = elem.operand(&lir, 1);
    assert_ne!(imm, lane);
    assert_eq!(imm.as_iconst(&lir), Some(5));
    assert!(imm.is_contained(&lir));
    assert_eq!(lane.use_count(&lir), 1);
}

#[test]
fn test_constant_out_of_range_traps() {
    let (mut lir, block, elem) = extract(|b| b.iconst(300, Ty::I32));
    let lane = elem.operand(&lir, 1);
    let stats = lower(&mut lir.duplicate(), block, &Arm64);
    assert_eq!(stats.range_checks, 1);

    let (expected, actual) = run_both(&mut lir, block, &Arm64, &[RegValue::from_bits(VECTOR)]);
    assert_eq!(expected, Err(ExecError::Trap(Trap::BoundsViolation)));
    assert_eq!(actual, Err(ExecError::Trap(Trap::BoundsViolation)));

    assert!(!lane.is_contained(&lir));
    assert!(elem.needs_imm_fallback(&lir));
}

#[test]
fn test_check_shape() {
    let (mut lir, block, elem) = extract(|b| b.iconst(300, Ty::I32));
    lower(&mut lir, block, &Arm64);

    let throws = nodes_with(&lir, block, |op| op == Opcode::ThrowIf(Cond::Uge));
    assert_eq!(throws.len(), 1);
    let cmp = throws[0].operand(&lir, 0);
    assert_eq!(cmp.op(&lir), Opcode::Cmp(Cond::Uge));
    assert_eq!(cmp.ty(&lir), Ty::Flags);
    assert_eq!(cmp.operand(&lir, 1).as_iconst(&lir), Some(16));
    // a lower bound of zero needs no subtraction
    assert!(nodes_with(&lir, block, |op| op == Opcode::Sub).is_empty());

    // the register form needs a scratch register
    let build = build_refs(&lir, block, &Arm64);
    let temps = refs(&build, elem)
        .into_iter()
        .filter(|rp| rp.is_def() && build.interval(rp.interval.unwrap()).is_internal())
        .count();
    assert_eq!(temps, 1);
}

#[test]
fn test_variable_lane() {
    let lane = |value: i64| {
        let (mut lir, block, _) = extract(|b| b.param(1, Ty::I32));
        let params = [
            RegValue::from_bits(VECTOR),
            RegValue::from_i64(value, Ty::I32),
        ];
        run_both(&mut lir, block, &Arm64, &params)
    };

    let (expected, actual) = lane(3);
    assert_eq!(expected, actual);
    assert_eq!(actual.unwrap().map(|ret| ret.to_i64()), Some(3));

    for value in [16, -1, 1 << 20] {
        let (expected, actual) = lane(value);
        assert_eq!(expected, Err(ExecError::Trap(Trap::BoundsViolation)));
        assert_eq!(actual, Err(ExecError::Trap(Trap::BoundsViolation)));
    }
}

#[test]
fn test_variable_lane_under_pressure() {
    let (mut lir, block, _) = extract(|b| b.param(1, Ty::I32));
    let params = [
        RegValue::from_bits(VECTOR),
        RegValue::from_i64(15, Ty::I32),
    ];
    let expected = Reference::new(&lir.duplicate(), block)
        .run(&params)
        .unwrap();
    let output = compile(&mut lir, block, &Arm64, &limited(3));
    let actual = Machine::new(&lir, &output.build, &output.allocation)
        .run(&params)
        .unwrap();
    assert_eq!(expected, actual);
    assert_eq!(actual.ret.map(|ret| ret.to_i64()), Some(15));
}

#[test]
fn test_contract_violation() {
    let (mut lir, block) = method(|b| {
        let vector = b.param(0, Ty::V128);
        let amount = b.iconst(64, Ty::I32);
        let shifted = b.intrinsic(IntrinsicId::ShiftLeftLogicalImm, &[vector, amount]);
        b.ret(Some(shifted));
    });

    let err = compile_method(&mut lir, block, &Arm64, &CodegenConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        CodegenError::Lower(LowerError::ImmOutOfRange {
            value: 64,
            lo: 0,
            hi: 63,
            ..
        })
    ));
}

#[test]
fn test_contract_in_range() {
    let (mut lir, block) = method(|b| {
        let vector = b.param(0, Ty::V128);
        let amount = b.iconst(63, Ty::I32);
        let shifted = b.intrinsic(IntrinsicId::ShiftLeftLogicalImm, &[vector, amount]);
        b.ret(Some(shifted));
    });
    let stats = lower(&mut lir, block, &X64);
    assert_eq!(stats.range_checks, 0);
    assert_eq!(stats.contained, 1);
}

#[test]
fn test_unsupported_intrinsic() {
    let (mut lir, block, _) = extract(|b| b.iconst(1, Ty::I32));
    let err = compile_method(&mut lir, block, &RiscV64, &CodegenConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        CodegenError::Lower(LowerError::UnsupportedIntrinsic {
            name: "extract_elem",
            target: "riscv64",
            ..
        })
    ));
}
