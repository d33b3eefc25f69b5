#![allow(dead_code)]

use lsra_core::{
    codegen::{compile_method, CodegenConfig, MethodOutput},
    exec::{Machine, Memory, Outcome, Reference, RegValue},
    ir::{self, Block, Lir, LirBuilder, Node, Opcode, Ty},
    lower::{LowerConfig, LowerStats, Lowering},
    lsra::{LsraBuild, LsraConfig, RefPosition, RefPositionBuilder},
    target::{PReg, TargetDesc},
};

pub const MEMORY_BASE: u64 = 0x1000;
pub const MEMORY_SIZE: usize = 1024;

/// Build a method in a fresh block.
pub fn method(build: impl FnOnce(&mut LirBuilder)) -> (Lir, Block) {
    let mut lir = Lir::new();
    let block = lir.new_block();
    let mut builder = LirBuilder::new(&mut lir, block);
    build(&mut builder);
    ir::verify(&lir, block).unwrap();
    (lir, block)
}

pub fn lower_with(lir: &mut Lir, block: Block, target: &dyn TargetDesc, config: LowerConfig) -> LowerStats {
    let stats = Lowering::new(lir, block, target, config).run().unwrap();
    ir::verify(lir, block).unwrap();
    println!("{}", ir::dump_block(lir, block));
    stats
}

pub fn lower(lir: &mut Lir, block: Block, target: &dyn TargetDesc) -> LowerStats {
    lower_with(lir, block, target, LowerConfig::default())
}

pub fn build_refs(lir: &Lir, block: Block, target: &dyn TargetDesc) -> LsraBuild {
    RefPositionBuilder::new(lir, block, target, &LsraConfig::default())
        .build()
        .unwrap()
}

pub fn compile(lir: &mut Lir, block: Block, target: &dyn TargetDesc, config: &CodegenConfig) -> MethodOutput {
    let output = compile_method(lir, block, target, config).unwrap();
    println!(
        "{}",
        lsra_core::codegen::dump_allocation(lir, &output, target)
    );
    output
}

/// The default configuration with only `n` registers of each kind.
pub fn limited(n: u8) -> CodegenConfig {
    let mut config = CodegenConfig::default();
    config.lsra.reg_limit = Some(n);
    config
}

/// The live nodes of the block with the opcode `pred` accepts.
pub fn nodes_with(lir: &Lir, block: Block, pred: impl Fn(Opcode) -> bool) -> Vec<Node> {
    block
        .nodes(lir)
        .into_iter()
        .filter(|node| pred(node.op(lir)))
        .collect()
}

pub fn refs<'a>(build: &'a LsraBuild, node: Node) -> Vec<&'a RefPosition> {
    build
        .refs_of(node)
        .iter()
        .map(|rp| build.ref_position(*rp))
        .collect()
}

pub fn int(value: i64) -> RegValue { RegValue::from_i64(value, Ty::I64) }

/// A mapped region at [MEMORY_BASE] filled with a byte pattern.
pub fn memory() -> Memory {
    let bytes = (0..MEMORY_SIZE)
        .map(|i| (i as u8).wrapping_mul(37).wrapping_add(11))
        .collect::<Vec<_>>();
    let mut memory = Memory::new();
    memory.map_bytes(MEMORY_BASE, &bytes);
    memory
}

/// Run the method on the reference evaluator before lowering, then compile
/// it and run the allocated code, and check that both agree.
pub fn check_equivalent(
    build: impl Fn(&mut LirBuilder),
    target: &dyn TargetDesc,
    config: &CodegenConfig,
    params: &[RegValue],
) -> (Outcome, MethodOutput) {
    let (mut lir, block) = method(build);
    let expected = Reference::new(&lir.duplicate(), block)
        .with_memory(memory())
        .run(params)
        .unwrap();

    let output = compile(&mut lir, block, target, config);
    let actual = Machine::new(&lir, &output.build, &output.allocation)
        .with_memory(memory())
        .run(params)
        .unwrap();

    assert_eq!(expected, actual);
    (actual, output)
}

/// The register the node defines its first value in.
pub fn def_reg(output: &MethodOutput, node: Node) -> PReg {
    output.allocation.def_regs(&output.build, node)[0]
}
