//! # The Pipeline
//!
//! [compile_method] runs the lowering and the register allocation over one
//! block and hands back everything an emitter needs: the annotated IR stays
//! in the [Lir], the reference positions and the allocation are returned in
//! a [MethodOutput].

use std::fmt::Write;

use clap::{Arg, ArgAction, ArgMatches};
use log::debug;
use thiserror::Error;

use crate::{
    ir::{self, Block, Lir, VerifyError},
    lower::{LowerConfig, LowerError, LowerStats, Lowering},
    lsra::{AllocationResult, LinearScan, LsraBuild, LsraConfig, LsraError, RefPositionBuilder},
    target::TargetDesc,
};

#[derive(Debug, Clone, Copy)]
pub struct CodegenConfig {
    pub lower: LowerConfig,
    pub lsra: LsraConfig,
    /// Verify the IR before and after the lowering.
    pub verify_ir: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            lower: LowerConfig::default(),
            lsra: LsraConfig::default(),
            verify_ir: true,
        }
    }
}

impl CodegenConfig {
    /// The command line arguments of the configuration.
    pub fn cli_args() -> Vec<Arg> {
        let switches = [
            ("no-containment", "Keep every operand in a register"),
            ("no-fusion", "Do not fuse multi-node idioms"),
            ("no-addr-modes", "Do not form complex address modes"),
            ("no-reuse-consecutive", "Place groups without looking at their members"),
            ("no-verify", "Skip the IR and allocation checks"),
        ];
        let mut args = switches
            .into_iter()
            .map(|(name, help)| Arg::new(name).long(name).help(help).action(ArgAction::SetTrue))
            .collect::<Vec<_>>();

        args.push(
            Arg::new("reg-limit")
                .long("reg-limit")
                .help("Hand out only the N lowest allocatable registers of each kind")
                .value_name("N")
                .value_parser(clap::value_parser!(u8)),
        );
        args
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        let flag = |name: &str| matches.get_flag(name);
        let verify = !flag("no-verify");
        Self {
            lower: LowerConfig {
                containment: !flag("no-containment"),
                fusion: !flag("no-fusion"),
                addr_modes: !flag("no-addr-modes"),
            },
            lsra: LsraConfig {
                reg_limit: matches.get_one::<u8>("reg-limit").copied(),
                reuse_consecutive: !flag("no-reuse-consecutive"),
                verify,
            },
            verify_ir: verify,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("malformed IR: {0}")]
    Verify(#[from] VerifyError),

    #[error("lowering failed: {0}")]
    Lower(#[from] LowerError),

    #[error("register allocation failed: {0}")]
    Lsra(#[from] LsraError),
}

#[derive(Debug)]
pub struct MethodOutput {
    pub lower: LowerStats,
    pub build: LsraBuild,
    pub allocation: AllocationResult,
}

/// Lower and allocate the block.
///
/// Nothing is returned on failure, the IR may be left partially lowered.
pub fn compile_method(
    lir: &mut Lir,
    block: Block,
    target: &dyn TargetDesc,
    config: &CodegenConfig,
) -> Result<MethodOutput, CodegenError> {
    if config.verify_ir {
        ir::verify(lir, block)?;
    }

    let lower = Lowering::new(lir, block, target, config.lower).run()?;
    if config.verify_ir {
        ir::verify(lir, block)?;
    }

    let build = RefPositionBuilder::new(lir, block, target, &config.lsra).build()?;
    let allocation = LinearScan::new(&build, target, &config.lsra).run()?;

    debug!(
        "compiled {} nodes on {}: {} spills, {} reloads",
        build.order.len(),
        target.name(),
        allocation.spill_count(),
        allocation.reload_count()
    );

    Ok(MethodOutput {
        lower,
        build,
        allocation,
    })
}

/// Dump the allocated block: the moves before each node, then the node with
/// the registers of its references.
///
/// ```text
///   @4 reload i2 [slot 0] -> x1
/// @4 n5: i64 = add n2, n3  ; x1, x2 -> x0
/// ```
pub fn dump_allocation(lir: &Lir, output: &MethodOutput, target: &dyn TargetDesc) -> String {
    let build = &output.build;
    let allocation = &output.allocation;
    let reg_name = |rp| {
        allocation
            .reg(rp)
            .map_or_else(|| "-".to_string(), |reg| target.display_reg(reg))
    };

    let mut out = String::new();
    for node in build.order.iter().copied() {
        let Some(location) = build.node_loc.get(&node).copied() else {
            continue;
        };
        for event in allocation
            .events
            .iter()
            .filter(|event| event.location() == location || event.location() == location + 1)
        {
            let _ = writeln!(out, "  {}", event.display(target));
        }

        let refs = build.refs_of(node).iter().map(|rp| build.ref_position(*rp));
        let uses = refs
            .clone()
            .filter(|rp| rp.is_use() && rp.location == location)
            .map(|rp| {
                let slot = rp
                    .interval
                    .and_then(|interval| allocation.spill_slots.get(&interval))
                    .filter(|_| rp.reg_optional && allocation.reg(rp.id).is_none());
                match slot {
                    Some(slot) => slot.to_string(),
                    None => reg_name(rp.id),
                }
            })
            .collect::<Vec<_>>();
        let defs = refs
            .filter(|rp| rp.is_def() && rp.location == location + 1)
            .map(|rp| reg_name(rp.id))
            .collect::<Vec<_>>();

        let _ = write!(out, "@{} {}", location, node.display(lir));
        if !uses.is_empty() || !defs.is_empty() {
            let _ = write!(out, "  ; {} -> {}", uses.join(", "), defs.join(", "));
        }
        out.push('\n');
    }
    out
}

/// Dump the intervals and the reference positions.
pub fn dump_ref_positions(build: &LsraBuild) -> String {
    let mut out = String::new();
    for interval in build.intervals.iter() {
        let _ = writeln!(out, "{}", interval);
    }
    for rp in build.ref_positions.iter() {
        let _ = writeln!(out, "  {}", rp);
    }
    out
}
