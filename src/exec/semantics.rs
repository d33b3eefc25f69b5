//! What every node computes.

use smallvec::SmallVec;

use super::{ExecError, ExecResult, Trap};
use crate::{
    ir::{Lir, Node, Nzcv, Opcode, Ty},
    target::IntrinsicId,
};

/// The contents of a register.
///
/// Values are kept in a canonical form: 32-bit integers are sign-extended to
/// 64 bits, floats hold their bit pattern in the low bits, vectors use all
/// 128 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegValue(pub(super) u128);

impl RegValue {
    pub fn from_bits(bits: u128) -> Self { Self(bits) }

    pub fn bits(self) -> u128 { self.0 }

    /// Bring raw bits into the canonical form of `ty`.
    pub fn canonical(ty: Ty, bits: u128) -> Self {
        match ty {
            Ty::I32 => Self(bits as u32 as i32 as i64 as u64 as u128),
            Ty::I64 | Ty::Ptr | Ty::F64 => Self(bits as u64 as u128),
            Ty::F32 => Self(bits as u32 as u128),
            _ => Self(bits),
        }
    }

    pub fn from_i64(value: i64, ty: Ty) -> Self { Self::canonical(ty, value as u64 as u128) }

    pub fn to_i64(self) -> i64 { self.0 as u64 as i64 }

    pub fn to_u64(self) -> u64 { self.0 as u64 }

    pub fn from_f32(value: f32) -> Self { Self(value.to_bits() as u128) }

    pub fn to_f32(self) -> f32 { f32::from_bits(self.0 as u32) }

    pub fn from_f64(value: f64) -> Self { Self(value.to_bits() as u128) }

    pub fn to_f64(self) -> f64 { f64::from_bits(self.0 as u64) }

    fn to_le_bytes(self) -> [u8; 16] { self.0.to_le_bytes() }

    fn from_le_bytes(ty: Ty, bytes: &[u8]) -> Self {
        let mut buf = [0u8; 16];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self::canonical(ty, u128::from_le_bytes(buf))
    }
}

/// An operand as a node sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(RegValue, Ty),
    Flags(Nzcv),
}

/// What a node produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    None,
    Value(RegValue),
    /// The register values of a multi-register node.
    Values(SmallVec<[RegValue; 4]>),
    Flags(Nzcv),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    base: u64,
    data: Vec<u8>,
}

/// A little-endian memory made of mapped regions.
///
/// Accessing a byte outside every region faults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self { Self::default() }

    /// Map `size` zero bytes at `base`.
    pub fn map(&mut self, base: u64, size: usize) {
        self.regions.push(Region {
            base,
            data: vec![0; size],
        });
    }

    pub fn map_bytes(&mut self, base: u64, bytes: &[u8]) {
        self.regions.push(Region {
            base,
            data: bytes.to_vec(),
        });
    }

    fn locate(&self, addr: u64, len: usize) -> Result<(usize, usize), Trap> {
        self.regions
            .iter()
            .enumerate()
            .find_map(|(idx, region)| {
                let offset = addr.checked_sub(region.base)? as usize;
                let end = offset.checked_add(len)?;
                (end <= region.data.len()).then_some((idx, offset))
            })
            .ok_or(Trap::Fault { addr })
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], Trap> {
        let (idx, offset) = self.locate(addr, len)?;
        Ok(&self.regions[idx].data[offset..offset + len])
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        let (idx, offset) = self.locate(addr, bytes.len())?;
        self.regions[idx].data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, Trap> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read(addr, 8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn load(&self, addr: u64, ty: Ty) -> Result<RegValue, Trap> {
        Ok(RegValue::from_le_bytes(ty, self.read(addr, ty.bytes() as usize)?))
    }

    fn store(&mut self, addr: u64, value: RegValue, ty: Ty) -> Result<(), Trap> {
        self.write(addr, &value.to_le_bytes()[..ty.bytes() as usize])
    }
}

fn mix(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// The value a call returns in its `idx`-th register.
///
/// Callees are opaque, a call mixes its callee and its arguments so that
/// passing a wrong argument changes the result.
fn call_result(callee: u32, args: &[RegValue], idx: usize) -> u128 {
    let mut h = mix(0x9e37_79b9_7f4a_7c15 ^ callee as u64);
    for arg in args {
        h = mix(h ^ arg.0 as u64);
        h = mix(h ^ (arg.0 >> 64) as u64);
    }
    let lo = mix(h ^ idx as u64);
    let hi = mix(lo);
    ((hi as u128) << 64) | lo as u128
}

fn malformed(node: Node, reason: &'static str) -> ExecError { ExecError::Malformed { node, reason } }

fn value_at(node: Node, operands: &[Operand], idx: usize) -> ExecResult<(RegValue, Ty)> {
    match operands.get(idx) {
        Some(Operand::Value(value, ty)) => Ok((*value, *ty)),
        Some(Operand::Flags(_)) => Err(malformed(node, "flags where a value is expected")),
        None => Err(malformed(node, "missing operand")),
    }
}

fn flags_at(node: Node, operands: &[Operand], idx: usize) -> ExecResult<Nzcv> {
    match operands.get(idx) {
        Some(Operand::Flags(flags)) => Ok(*flags),
        Some(Operand::Value(..)) => Err(malformed(node, "a value where flags are expected")),
        None => Err(malformed(node, "missing operand")),
    }
}

fn int_binary(op: Opcode, ty: Ty, a: i64, b: i64) -> Option<i64> {
    let mask = ty.bits().max(32) - 1;
    let amount = (b as u32) & mask;
    let value = match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::Shl => a.wrapping_shl(amount),
        Opcode::Shr if ty == Ty::I32 => ((a as u32) >> amount) as i32 as i64,
        Opcode::Shr => ((a as u64) >> amount) as i64,
        Opcode::Sar if ty == Ty::I32 => ((a as i32) >> amount) as i64,
        Opcode::Sar => a >> amount,
        _ => return None,
    };
    Some(value)
}

fn float_binary(op: Opcode, ty: Ty, a: RegValue, b: RegValue) -> Option<RegValue> {
    let value = if ty == Ty::F32 {
        let (a, b) = (a.to_f32(), b.to_f32());
        RegValue::from_f32(match op {
            Opcode::FAdd => a + b,
            Opcode::FSub => a - b,
            Opcode::FMul => a * b,
            _ => return None,
        })
    } else {
        let (a, b) = (a.to_f64(), b.to_f64());
        RegValue::from_f64(match op {
            Opcode::FAdd => a + b,
            Opcode::FSub => a - b,
            Opcode::FMul => a * b,
            _ => return None,
        })
    };
    Some(value)
}

fn bytes_of(value: RegValue) -> [u8; 16] { value.to_le_bytes() }

/// Evaluate `node` on its operand values.
///
/// Nodes reading or writing state the evaluators keep themselves, i.e.
/// parameters, locals, projections and returns, are not handled here.
pub fn eval(
    lir: &Lir,
    node: Node,
    operands: &[Operand],
    memory: &mut Memory,
) -> ExecResult<Output> {
    let ty = node.ty(lir);
    let value = |idx| value_at(node, operands, idx);
    let flags = |idx| flags_at(node, operands, idx);

    let output = match node.op(lir) {
        Opcode::IConst(value) => Output::Value(RegValue::from_i64(value, ty)),
        Opcode::FConst(bits) if ty == Ty::F32 => {
            Output::Value(RegValue::from_f32(f64::from_bits(bits) as f32))
        }
        Opcode::FConst(bits) => Output::Value(RegValue::from_bits(bits as u128)),

        op @ (Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Sar) => {
            let (a, b) = (value(0)?.0, value(1)?.0);
            let result = int_binary(op, ty, a.to_i64(), b.to_i64())
                .ok_or_else(|| malformed(node, "not an integer operation"))?;
            Output::Value(RegValue::from_i64(result, ty))
        }
        Opcode::Neg => Output::Value(RegValue::from_i64(value(0)?.0.to_i64().wrapping_neg(), ty)),
        Opcode::Not => Output::Value(RegValue::from_i64(!value(0)?.0.to_i64(), ty)),

        op @ (Opcode::FAdd | Opcode::FSub | Opcode::FMul) => {
            let result = float_binary(op, ty, value(0)?.0, value(1)?.0)
                .ok_or_else(|| malformed(node, "not a float operation"))?;
            Output::Value(result)
        }
        Opcode::FNeg if ty == Ty::F32 => Output::Value(RegValue::from_f32(-value(0)?.0.to_f32())),
        Opcode::FNeg => Output::Value(RegValue::from_f64(-value(0)?.0.to_f64())),

        Opcode::Cmp(cond) => {
            let ((a, operand_ty), (b, _)) = (value(0)?, value(1)?);
            if !operand_ty.is_int() {
                return Err(malformed(node, "compare of a non-integer"));
            }
            if ty == Ty::Flags {
                Output::Flags(Nzcv::from_compare(a.to_i64(), b.to_i64(), operand_ty))
            } else {
                let holds = cond.eval(a.to_i64(), b.to_i64(), operand_ty);
                Output::Value(RegValue::from_i64(holds as i64, ty))
            }
        }
        Opcode::CCmp { pred, nzcv, .. } => {
            let incoming = flags(0)?;
            let ((a, operand_ty), (b, _)) = (value(1)?, value(2)?);
            if pred.holds(incoming) {
                Output::Flags(Nzcv::from_compare(a.to_i64(), b.to_i64(), operand_ty))
            } else {
                Output::Flags(nzcv)
            }
        }
        Opcode::SetCC(cond) => Output::Value(RegValue::from_i64(cond.holds(flags(0)?) as i64, ty)),
        Opcode::Select => {
            let c = value(0)?.0;
            let chosen = if c.to_i64() != 0 { value(1)? } else { value(2)? };
            Output::Value(chosen.0)
        }
        Opcode::SelectCC(cond) => {
            let chosen = if cond.holds(flags(0)?) { value(1)? } else { value(2)? };
            Output::Value(chosen.0)
        }

        Opcode::Lea { scale, offset } => {
            let base = value(0)?.0.to_u64();
            let index = match operands.len() {
                1 => 0,
                _ => value(1)?.0.to_u64(),
            };
            let addr = base
                .wrapping_add(index.wrapping_mul(scale as u64))
                .wrapping_add(offset as u64);
            Output::Value(RegValue::from_i64(addr as i64, ty))
        }
        Opcode::Load => {
            let addr = value(0)?.0.to_u64();
            Output::Value(memory.load(addr, ty)?)
        }
        Opcode::Store => {
            let addr = value(0)?.0.to_u64();
            let (stored, stored_ty) = value(1)?;
            memory.store(addr, stored, stored_ty)?;
            Output::None
        }

        Opcode::Call { callee } => {
            let args = operands
                .iter()
                .map(|operand| match operand {
                    Operand::Value(value, _) => Ok(*value),
                    Operand::Flags(_) => Err(malformed(node, "flags passed to a call")),
                })
                .collect::<ExecResult<Vec<_>>>()?;
            let results = node
                .reg_tys(lir)
                .iter()
                .enumerate()
                .map(|(idx, ty)| RegValue::canonical(*ty, call_result(callee, &args, idx)))
                .collect::<SmallVec<[RegValue; 4]>>();
            match ty {
                Ty::Multi => Output::Values(results),
                _ => results.first().map_or(Output::None, |value| Output::Value(*value)),
            }
        }
        Opcode::ThrowIf(cond) => {
            if cond.holds(flags(0)?) {
                return Err(Trap::BoundsViolation.into());
            }
            Output::None
        }

        Opcode::MulAdd | Opcode::MulSub => {
            let (a, b, c) = (value(0)?.0.to_i64(), value(1)?.0.to_i64(), value(2)?.0.to_i64());
            let product = a.wrapping_mul(b);
            let result = if node.op(lir) == Opcode::MulAdd {
                c.wrapping_add(product)
            } else {
                c.wrapping_sub(product)
            };
            Output::Value(RegValue::from_i64(result, ty))
        }
        Opcode::FMulAdd { negate_product } => {
            let (a, b, c) = (value(0)?.0, value(1)?.0, value(2)?.0);
            let product = float_binary(Opcode::FMul, ty, a, b)
                .ok_or_else(|| malformed(node, "not a float operation"))?;
            let op = if negate_product {
                Opcode::FSub
            } else {
                Opcode::FAdd
            };
            let result = float_binary(op, ty, c, product)
                .ok_or_else(|| malformed(node, "not a float operation"))?;
            Output::Value(result)
        }

        Opcode::Intrinsic(id) => eval_intrinsic(node, id, operands, memory)?,

        Opcode::Param(_)
        | Opcode::LclVar(_)
        | Opcode::StoreLclVar(_)
        | Opcode::Proj(_)
        | Opcode::Return => return Err(malformed(node, "evaluated by the caller")),
    };
    Ok(output)
}

fn table_lookup(tables: &[RegValue], indices: RegValue, fallback: Option<RegValue>) -> RegValue {
    let indices = bytes_of(indices);
    let fallback = fallback.map(bytes_of);
    let mut result = [0u8; 16];
    for (lane, index) in indices.iter().enumerate() {
        let index = *index as usize;
        result[lane] = match tables.get(index / 16) {
            Some(table) => bytes_of(*table)[index % 16],
            None => fallback.map_or(0, |fallback| fallback[lane]),
        };
    }
    RegValue(u128::from_le_bytes(result))
}

fn eval_intrinsic(
    node: Node,
    id: IntrinsicId,
    operands: &[Operand],
    memory: &mut Memory,
) -> ExecResult<Output> {
    let value = |idx| value_at(node, operands, idx).map(|(value, _)| value);

    let output = match id {
        IntrinsicId::TableLookup2 | IntrinsicId::TableLookup3 | IntrinsicId::TableLookup4 => {
            let n = operands.len() - 1;
            let tables = (0..n).map(value).collect::<ExecResult<Vec<_>>>()?;
            Output::Value(table_lookup(&tables, value(n)?, None))
        }
        IntrinsicId::TableLookupExtension2 => {
            let tables = [value(1)?, value(2)?];
            Output::Value(table_lookup(&tables, value(3)?, Some(value(0)?)))
        }
        IntrinsicId::LoadVector2 | IntrinsicId::LoadVector3 | IntrinsicId::LoadVector4 => {
            let n = id.info().reg_tys().len();
            let addr = value(0)?.to_u64();
            let values = (0..n)
                .map(|k| memory.load(addr.wrapping_add(16 * k as u64), Ty::V128))
                .collect::<Result<SmallVec<_>, _>>()?;
            Output::Values(values)
        }
        IntrinsicId::StoreVector2 | IntrinsicId::StoreVector3 => {
            let addr = value(0)?.to_u64();
            for k in 1..operands.len() {
                memory.store(addr.wrapping_add(16 * (k as u64 - 1)), value(k)?, Ty::V128)?;
            }
            Output::None
        }
        IntrinsicId::ExtractElement => {
            let lane = value(1)?.to_i64();
            if !(0..16).contains(&lane) {
                return Err(Trap::BoundsViolation.into());
            }
            let byte = bytes_of(value(0)?)[lane as usize];
            Output::Value(RegValue::from_i64(byte as i64, Ty::I64))
        }
        IntrinsicId::ShiftLeftLogicalImm => {
            let amount = value(1)?.to_i64();
            if !(0..64).contains(&amount) {
                return Err(Trap::BoundsViolation.into());
            }
            let vector = value(0)?.bits();
            let lo = (vector as u64) << amount;
            let hi = ((vector >> 64) as u64) << amount;
            Output::Value(RegValue(((hi as u128) << 64) | lo as u128))
        }
        IntrinsicId::CompareExchange => {
            let addr = value(0)?.to_u64();
            let (expected, new) = (value(1)?.to_u64(), value(2)?.to_u64());
            let old = memory.read_u64(addr)?;
            if old == expected {
                memory.write(addr, &new.to_le_bytes())?;
            }
            Output::Value(RegValue::from_i64(old as i64, Ty::I64))
        }
        IntrinsicId::AtomicAdd => {
            let addr = value(0)?.to_u64();
            let old = memory.read_u64(addr)?;
            memory.write(addr, &old.wrapping_add(value(1)?.to_u64()).to_le_bytes())?;
            Output::Value(RegValue::from_i64(old as i64, Ty::I64))
        }
        IntrinsicId::LoadPair => {
            let addr = value(0)?.to_u64();
            let values = (0..2)
                .map(|k| memory.load(addr.wrapping_add(8 * k), Ty::I64))
                .collect::<Result<SmallVec<_>, _>>()?;
            Output::Values(values)
        }
    };
    Ok(output)
}
