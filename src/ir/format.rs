use std::fmt;

use super::{Block, Lir, Node, Opcode};

/// Display a node with its operands, in the dump syntax.
///
/// ```text
/// n7: i64 = add n3, n5*
/// ```
///
/// Contained operands are marked with `*`, a contained node itself is
/// prefixed with `~`.
pub struct NodeDisplay<'a> {
    lir: &'a Lir,
    node: Node,
}

impl Node {
    pub fn display(self, lir: &Lir) -> NodeDisplay<'_> { NodeDisplay { lir, node: self } }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            Opcode::IConst(value) => write!(f, " {}", value),
            Opcode::FConst(bits) => write!(f, " {}", f64::from_bits(*bits)),
            Opcode::Param(idx) => write!(f, " {}", idx),
            Opcode::LclVar(local) | Opcode::StoreLclVar(local) => write!(f, " l{}", local),
            Opcode::Cmp(cond) | Opcode::SetCC(cond) | Opcode::SelectCC(cond) => {
                write!(f, ".{}", cond)
            }
            Opcode::ThrowIf(cond) => write!(f, ".{}", cond),
            Opcode::CCmp { cond, pred, nzcv } => {
                write!(f, ".{} if {} else #{:04b}", cond, pred, nzcv.bits())
            }
            Opcode::Lea { scale, offset } => write!(f, " *{} {:+}", scale, offset),
            Opcode::Call { callee } => write!(f, " @{}", callee),
            Opcode::FMulAdd { negate_product } if *negate_product => write!(f, ".neg"),
            Opcode::Proj(idx) => write!(f, " {}", idx),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lir = self.lir;
        let node = self.node;

        if node.is_contained(lir) {
            write!(f, "~")?;
        }
        write!(f, "{}: {} = {}", node, node.ty(lir), node.op(lir))?;

        for (i, operand) in node.operands(lir).iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{}", operand)?;
            if operand.is_contained(lir) {
                write!(f, "*")?;
            } else if node.is_reg_optional(lir, i) {
                write!(f, "?")?;
            }
        }

        if let Some(mask) = node.reg_mask(lir) {
            write!(f, " in {:?}", mask)?;
        }
        if node.needs_imm_fallback(lir) {
            write!(f, " !reg-form")?;
        }
        Ok(())
    }
}

/// Dump the nodes of the block, one per line.
pub fn dump_block(lir: &Lir, block: Block) -> String {
    let mut out = String::new();
    for node in block.nodes(lir) {
        out.push_str(&format!("  {}\n", node.display(lir)));
    }
    out
}
