//! Lower and allocate a canned method, then dump the result.

use clap::{Arg, Command};
use lsra_core::{
    codegen::{compile_method, dump_allocation, dump_ref_positions, CodegenConfig},
    ir::{dump_block, Block, Cond, Lir, LirBuilder, Ty},
    target::{IntrinsicId, TargetDesc},
};

const METHODS: [&str; 4] = ["madd", "call", "ccmp", "table"];

fn target(name: &str) -> Option<&'static dyn TargetDesc> {
    match name {
        #[cfg(feature = "target-arm64")]
        "arm64" => Some(&lsra_core::target::Arm64),
        #[cfg(feature = "target-riscv64")]
        "riscv64" => Some(&lsra_core::target::RiscV64),
        #[cfg(feature = "target-x64")]
        "x64" => Some(&lsra_core::target::X64),
        _ => None,
    }
}

/// `*(a + 8 + b * 8) * c + a`
fn build_madd(builder: &mut LirBuilder) {
    let a = builder.param(0, Ty::Ptr);
    let b = builder.param(1, Ty::I64);
    let c = builder.param(2, Ty::I64);
    let three = builder.iconst(3, Ty::I64);
    let scaled = builder.shl(b, three);
    let eight = builder.iconst(8, Ty::I64);
    let base = builder.add(a, eight);
    let addr = builder.add(base, scaled);
    let loaded = builder.load(addr, Ty::I64);
    let product = builder.mul(loaded, c);
    let sum = builder.add(a, product);
    builder.ret(Some(sum));
}

/// Values live across two calls.
fn build_call(builder: &mut LirBuilder) {
    let a = builder.param(0, Ty::I64);
    let b = builder.param(1, Ty::I64);
    let x = builder.add(a, b);
    let y = builder.sub(a, b);
    let first = builder.call(1, &[x], &[Ty::I64]);
    let second = builder.call(2, &[first, y], &[Ty::I64]);
    let z = builder.mul(x, y);
    let sum = builder.add(second, z);
    builder.ret(Some(sum));
}

/// `(a < b && c != 0) ? a : b`
fn build_ccmp(builder: &mut LirBuilder) {
    let a = builder.param(0, Ty::I64);
    let b = builder.param(1, Ty::I64);
    let c = builder.param(2, Ty::I64);
    let lt = builder.cmp(Cond::Lt, a, b);
    let zero = builder.iconst(0, Ty::I64);
    let ne = builder.cmp(Cond::Ne, c, zero);
    let both = builder.and(lt, ne);
    let chosen = builder.select(both, a, b);
    builder.ret(Some(chosen));
}

/// A table lookup over three vectors loaded together.
fn build_table(builder: &mut LirBuilder) {
    let table = builder.param(0, Ty::Ptr);
    let indices = builder.param(1, Ty::V128);
    let loaded = builder.intrinsic(IntrinsicId::LoadVector3, &[table]);
    let t0 = builder.proj(loaded, 0);
    let t1 = builder.proj(loaded, 1);
    let t2 = builder.proj(loaded, 2);
    let result = builder.intrinsic(IntrinsicId::TableLookup3, &[t0, t1, t2, indices]);
    builder.ret(Some(result));
}

fn build_method(name: &str, lir: &mut Lir, block: Block) {
    let mut builder = LirBuilder::new(lir, block);
    match name {
        "madd" => build_madd(&mut builder),
        "call" => build_call(&mut builder),
        "ccmp" => build_ccmp(&mut builder),
        _ => build_table(&mut builder),
    }
}

fn main() {
    env_logger::init();

    let matches = Command::new("lsra-dump")
        .about("Lower and allocate a canned method")
        .arg(
            Arg::new("method")
                .required(true)
                .value_parser(METHODS),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .default_value("arm64")
                .value_parser(["arm64", "riscv64", "x64"]),
        )
        .arg(
            Arg::new("refs")
                .long("refs")
                .help("Also dump the intervals and the reference positions")
                .action(clap::ArgAction::SetTrue),
        )
        .args(CodegenConfig::cli_args())
        .get_matches();

    let config = CodegenConfig::from_matches(&matches);
    let method = matches
        .get_one::<String>("method")
        .map(String::as_str)
        .unwrap_or("madd");
    let target_name = matches
        .get_one::<String>("target")
        .map(String::as_str)
        .unwrap_or("arm64");
    let Some(target) = target(target_name) else {
        eprintln!("error: target {} is not built in", target_name);
        std::process::exit(2);
    };

    let mut lir = Lir::new();
    let block = lir.new_block();
    build_method(method, &mut lir, block);
    println!("before lowering:\n{}", dump_block(&lir, block));

    match compile_method(&mut lir, block, target, &config) {
        Ok(output) => {
            println!("after lowering:\n{}", dump_block(&lir, block));
            if matches.get_flag("refs") {
                println!("{}", dump_ref_positions(&output.build));
            }
            println!("allocation on {}:\n{}", target.name(), dump_allocation(&lir, &output, target));
            println!("{:?}", output.allocation.stats);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}
