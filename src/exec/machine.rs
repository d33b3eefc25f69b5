//! A register machine running an allocated block.
//!
//! For the node at location `2i`, the machine
//!
//! 1. performs the moves the allocation placed at `2i` and `2i + 1`;
//! 2. clobbers the scratch registers of the node;
//! 3. reads the registers of the operands, the delay-free ones last, and
//!    the stack slots of reg-optional operands left without a register;
//! 4. clobbers the registers the node defines before the delay-free reads,
//!    and the registers a call kills after all reads;
//! 5. writes the results.
//!
//! A clobbered register holds no value until it is written again, reading
//! it is an error.

use rustc_hash::FxHashMap;

use super::{eval, ExecError, ExecResult, Memory, Operand, Outcome, Output, RegValue};
use crate::{
    ir::{Lir, Node, Nzcv, Opcode, Ty},
    lsra::{AllocEvent, AllocationResult, LsraBuild, RefPosition, SpillSlot},
    target::PReg,
};

pub struct Machine<'a> {
    lir: &'a Lir,
    build: &'a LsraBuild,
    result: &'a AllocationResult,
    regs: [[Option<RegValue>; 64]; 3],
    flags: Nzcv,
    slots: FxHashMap<SpillSlot, Option<RegValue>>,
    memory: Memory,
    /// The next event to perform.
    cursor: usize,
}

impl<'a> Machine<'a> {
    pub fn new(lir: &'a Lir, build: &'a LsraBuild, result: &'a AllocationResult) -> Self {
        Self {
            lir,
            build,
            result,
            regs: [[None; 64]; 3],
            flags: Nzcv::empty(),
            slots: FxHashMap::default(),
            memory: Memory::new(),
            cursor: 0,
        }
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    fn get(&self, reg: PReg) -> Option<RegValue> {
        self.regs[reg.kind().index()][reg.num() as usize]
    }

    fn set(&mut self, reg: PReg, value: Option<RegValue>) {
        self.regs[reg.kind().index()][reg.num() as usize] = value;
    }

    fn assigned(&self, rp: &RefPosition) -> ExecResult<PReg> {
        self.result.reg(rp.id).ok_or(ExecError::Unallocated(rp.id))
    }

    fn read(&self, node: Node, rp: &RefPosition) -> ExecResult<RegValue> {
        if rp.reg_optional && self.result.reg(rp.id).is_none() {
            return self.read_slot(node, rp);
        }
        let reg = self.assigned(rp)?;
        self.get(reg).ok_or(ExecError::UndefinedReg { node, reg })
    }

    /// Read a reg-optional use from the spill slot of its interval.
    fn read_slot(&self, node: Node, rp: &RefPosition) -> ExecResult<RegValue> {
        let slot = rp
            .interval
            .and_then(|interval| self.result.spill_slots.get(&interval))
            .copied()
            .ok_or(ExecError::Unallocated(rp.id))?;
        self.slots
            .get(&slot)
            .copied()
            .flatten()
            .ok_or(ExecError::UndefinedSlot { node, slot })
    }

    /// Perform the events up to and including `location`.
    fn perform_events(&mut self, location: u32) {
        let result = self.result;
        let events = &result.events;
        while let Some(event) = events.get(self.cursor) {
            if event.location() > location {
                break;
            }
            self.cursor += 1;
            match *event {
                AllocEvent::Spill { reg, slot, .. } => {
                    let value = self.get(reg);
                    self.slots.insert(slot, value);
                }
                AllocEvent::Reload { reg, slot, .. } => {
                    let value = self.slots.get(&slot).copied().flatten();
                    self.set(reg, value);
                }
                AllocEvent::Remat {
                    interval,
                    reg,
                    bits,
                    ..
                } => {
                    let value = match self.build.interval(interval).ty {
                        Ty::F32 => RegValue::from_f32(f64::from_bits(bits) as f32),
                        ty => RegValue::canonical(ty, bits as u128),
                    };
                    self.set(reg, Some(value));
                }
                AllocEvent::Copy { from, to, .. } | AllocEvent::Move { from, to, .. } => {
                    let value = self.get(from);
                    self.set(to, value);
                }
            }
        }
    }

    /// The value of operand `operand` of `node`, reading the registers of
    /// `reads` in the order the references were built.
    fn operand(
        &mut self,
        node: Node,
        operand: Node,
        reads: &mut impl Iterator<Item = RegValue>,
    ) -> ExecResult<Operand> {
        let lir = self.lir;
        let ty = operand.ty(lir);
        if ty == Ty::Flags {
            return Ok(Operand::Flags(self.flags));
        }
        if !ty.is_reg_value() {
            return Err(ExecError::Malformed {
                node,
                reason: "operand without a register value",
            });
        }

        if !operand.is_contained(lir) || operand.op(lir).is_reg_resident_leaf() {
            let value = reads.next().ok_or(ExecError::Malformed {
                node,
                reason: "fewer registers than operands",
            })?;
            return Ok(Operand::Value(value, ty));
        }

        let children = operand
            .operands(lir)
            .iter()
            .map(|child| self.operand(node, *child, reads))
            .collect::<ExecResult<Vec<_>>>()?;
        match eval(lir, operand, &children, &mut self.memory)? {
            Output::Value(value) => Ok(Operand::Value(value, ty)),
            _ => Err(ExecError::Malformed {
                node,
                reason: "contained operand without a value",
            }),
        }
    }

    /// Run the block on the parameters.
    pub fn run(mut self, params: &[RegValue]) -> ExecResult<Outcome> {
        let lir = self.lir;
        let build = self.build;

        for node in build.order.iter().copied() {
            let location = build.node_loc.get(&node).copied().ok_or(ExecError::Malformed {
                node,
                reason: "node without a location",
            })?;
            self.perform_events(location + 1);

            let refs = build
                .refs_of(node)
                .iter()
                .map(|rp| build.ref_position(*rp))
                .collect::<Vec<_>>();
            let uses = refs
                .iter()
                .filter(|rp| rp.is_use() && rp.location == location)
                .collect::<Vec<_>>();

            for rp in refs.iter().filter(|rp| rp.is_def() && rp.location == location) {
                let reg = self.assigned(rp)?;
                self.set(reg, None);
            }

            let mut values = vec![RegValue::default(); uses.len()];
            for (i, rp) in uses.iter().enumerate().filter(|(_, rp)| !rp.delay_free) {
                values[i] = self.read(node, rp)?;
            }
            for rp in refs.iter().filter(|rp| rp.is_def() && rp.location == location + 1) {
                let reg = self.assigned(rp)?;
                self.set(reg, None);
            }
            for (i, rp) in uses.iter().enumerate().filter(|(_, rp)| rp.delay_free) {
                values[i] = self.read(node, rp)?;
            }
            for rp in refs.iter().filter(|rp| rp.is_kill()) {
                for num in rp.candidates.iter() {
                    self.set(PReg::new(num, rp.reg_kind), None);
                }
            }

            let mut reads = values.into_iter();
            let output = match node.op(lir) {
                Opcode::Param(idx) => {
                    let value = params
                        .get(idx as usize)
                        .ok_or(ExecError::MissingParam(idx))?;
                    Output::Value(RegValue::canonical(node.ty(lir), value.bits()))
                }
                Opcode::LclVar(_) | Opcode::Proj(_) => {
                    let value = reads.next().ok_or(ExecError::Malformed {
                        node,
                        reason: "no register read",
                    })?;
                    Output::Value(value)
                }
                Opcode::StoreLclVar(_) => match self.operand(node, node.operand(lir, 0), &mut reads)? {
                    Operand::Value(value, _) => Output::Value(value),
                    Operand::Flags(_) => {
                        return Err(ExecError::Malformed {
                            node,
                            reason: "flags stored into a local",
                        })
                    }
                },
                Opcode::Return => {
                    let ret = match node.operands(lir).first() {
                        Some(value) => match self.operand(node, *value, &mut reads)? {
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
                        .map(|operand| self.operand(node, *operand, &mut reads))
                        .collect::<ExecResult<Vec<_>>>()?;
                    eval(lir, node, &operands, &mut self.memory)?
                }
            };

            let produced = match output {
                Output::None => Vec::new(),
                Output::Value(value) => vec![value],
                Output::Values(values) => values.into_vec(),
                Output::Flags(flags) => {
                    self.flags = flags;
                    Vec::new()
                }
            };
            for rp in refs.iter().filter(|rp| rp.is_def() && rp.location == location + 1) {
                let value = produced
                    .get(rp.multi_reg_idx as usize)
                    .copied()
                    .ok_or(ExecError::Malformed {
                        node,
                        reason: "a register defined without a value",
                    })?;
                let reg = self.assigned(rp)?;
                self.set(reg, Some(value));
            }
        }

        Ok(Outcome {
            ret: None,
            memory: self.memory,
        })
    }
}
