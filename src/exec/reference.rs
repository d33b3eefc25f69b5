use rustc_hash::FxHashMap;

use super::{eval, ExecError, ExecResult, Memory, Operand, Outcome, Output, RegValue};
use crate::ir::{Block, Lir, Node, Opcode};

/// Runs a block with one value per node.
///
/// Containment is ignored, contained nodes are evaluated in program order
/// like any other node, so the evaluator works both before and after the
/// lowering.
pub struct Reference<'a> {
    lir: &'a Lir,
    block: Block,
    memory: Memory,
    values: FxHashMap<Node, Output>,
    locals: FxHashMap<u32, RegValue>,
}

impl<'a> Reference<'a> {
    pub fn new(lir: &'a Lir, block: Block) -> Self {
        Self {
            lir,
            block,
            memory: Memory::new(),
            values: FxHashMap::default(),
            locals: FxHashMap::default(),
        }
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    fn operand(&self, node: Node, operand: Node) -> ExecResult<Operand> {
        match self.values.get(&operand) {
            Some(Output::Value(value)) => Ok(Operand::Value(*value, operand.ty(self.lir))),
            Some(Output::Flags(flags)) => Ok(Operand::Flags(*flags)),
            _ => Err(ExecError::Malformed {
                node,
                reason: "operand without a value",
            }),
        }
    }

    /// Run the block on the parameters.
    pub fn run(mut self, params: &[RegValue]) -> ExecResult<Outcome> {
        let lir = self.lir;
        for node in self.block.nodes(lir) {
            let output = match node.op(lir) {
                Opcode::Param(idx) => {
                    let value = params
                        .get(idx as usize)
                        .ok_or(ExecError::MissingParam(idx))?;
                    Output::Value(RegValue::canonical(node.ty(lir), value.bits()))
                }
                Opcode::LclVar(local) => {
                    let value = self
                        .locals
                        .get(&local)
                        .ok_or(ExecError::UninitializedLocal(local))?;
                    Output::Value(*value)
                }
                Opcode::StoreLclVar(local) => {
                    let Operand::Value(value, _) = self.operand(node, node.operand(lir, 0))? else {
                        return Err(ExecError::Malformed {
                            node,
                            reason: "flags stored into a local",
                        });
                    };
                    self.locals.insert(local, value);
                    Output::None
                }
                Opcode::Proj(idx) => match self.values.get(&node.operand(lir, 0)) {
                    Some(Output::Values(values)) if (idx as usize) < values.len() => {
                        Output::Value(values[idx as usize])
                    }
                    _ => {
                        return Err(ExecError::Malformed {
                            node,
                            reason: "projection of a missing register value",
                        })
                    }
                },
                Opcode::Return => {
                    let ret = match node.operands(lir).first() {
                        Some(value) => match self.operand(node, *value)? {
                            Operand::Value(value, _) => Some(value),
                            Operand::Flags(_) => None,
                        },
                        None => None,
                    };
                    return Ok(Outcome {
                        ret,
                        memory: self.memory,
                    });
                }
                _ => {
                    let operands = node
                        .operands(lir)
                        .iter()
                        .map(|operand| self.operand(node, *operand))
                        .collect::<ExecResult<Vec<_>>>()?;
                    eval(lir, node, &operands, &mut self.memory)?
                }
            };
            self.values.insert(node, output);
        }

        Ok(Outcome {
            ret: None,
            memory: self.memory,
        })
    }
}
