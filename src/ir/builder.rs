use super::{Block, Cond, Lir, Node, Opcode, Ty};
use crate::{collections::linked_list::ListContainer, target::IntrinsicId};

/// Append nodes to the end of a block.
///
/// Result types are inferred from the operands, integer binary operations
/// take the type of their first operand.
pub struct LirBuilder<'a> {
    lir: &'a mut Lir,
    block: Block,
}

impl<'a> LirBuilder<'a> {
    pub fn new(lir: &'a mut Lir, block: Block) -> Self { Self { lir, block } }

    pub fn lir(&self) -> &Lir { &*self.lir }

    pub fn block(&self) -> Block { self.block }

    /// Create a node and append it to the block.
    pub fn push(&mut self, op: Opcode, ty: Ty, operands: &[Node]) -> Node {
        let node = Node::new(self.lir, op, ty, operands.iter().copied(), []);
        self.block.push_back(self.lir, node);
        node
    }

    fn push_multi(&mut self, op: Opcode, operands: &[Node], reg_tys: Vec<Ty>) -> Node {
        let node = Node::new(self.lir, op, Ty::Multi, operands.iter().copied(), reg_tys);
        self.block.push_back(self.lir, node);
        node
    }

    pub fn iconst(&mut self, value: i64, ty: Ty) -> Node { self.push(Opcode::IConst(value), ty, &[]) }

    pub fn fconst(&mut self, value: f64) -> Node {
        self.push(Opcode::FConst(value.to_bits()), Ty::F64, &[])
    }

    pub fn param(&mut self, idx: u32, ty: Ty) -> Node { self.push(Opcode::Param(idx), ty, &[]) }

    pub fn lcl_var(&mut self, local: u32, ty: Ty) -> Node {
        self.push(Opcode::LclVar(local), ty, &[])
    }

    pub fn store_lcl_var(&mut self, local: u32, value: Node) -> Node {
        self.push(Opcode::StoreLclVar(local), Ty::Void, &[value])
    }

    /// A binary operation typed after its first operand.
    pub fn binary(&mut self, op: Opcode, lhs: Node, rhs: Node) -> Node {
        let ty = lhs.ty(self.lir);
        self.push(op, ty, &[lhs, rhs])
    }

    pub fn add(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::Add, lhs, rhs) }

    pub fn sub(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::Sub, lhs, rhs) }

    pub fn mul(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::Mul, lhs, rhs) }

    pub fn and(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::And, lhs, rhs) }

    pub fn or(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::Or, lhs, rhs) }

    pub fn xor(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::Xor, lhs, rhs) }

    pub fn shl(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::Shl, lhs, rhs) }

    pub fn neg(&mut self, val: Node) -> Node {
        let ty = val.ty(self.lir);
        self.push(Opcode::Neg, ty, &[val])
    }

    pub fn not(&mut self, val: Node) -> Node {
        let ty = val.ty(self.lir);
        self.push(Opcode::Not, ty, &[val])
    }

    pub fn fadd(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::FAdd, lhs, rhs) }

    pub fn fsub(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::FSub, lhs, rhs) }

    pub fn fmul(&mut self, lhs: Node, rhs: Node) -> Node { self.binary(Opcode::FMul, lhs, rhs) }

    pub fn fneg(&mut self, val: Node) -> Node {
        let ty = val.ty(self.lir);
        self.push(Opcode::FNeg, ty, &[val])
    }

    /// A compare producing 0 or 1.
    pub fn cmp(&mut self, cond: Cond, lhs: Node, rhs: Node) -> Node {
        self.push(Opcode::Cmp(cond), Ty::I32, &[lhs, rhs])
    }

    pub fn select(&mut self, cond: Node, if_true: Node, if_false: Node) -> Node {
        let ty = if_true.ty(self.lir);
        self.push(Opcode::Select, ty, &[cond, if_true, if_false])
    }

    pub fn load(&mut self, addr: Node, ty: Ty) -> Node { self.push(Opcode::Load, ty, &[addr]) }

    pub fn store(&mut self, addr: Node, value: Node) -> Node {
        self.push(Opcode::Store, Ty::Void, &[addr, value])
    }

    /// Call `callee`, the result types decide the shape of the result.
    pub fn call(&mut self, callee: u32, args: &[Node], ret_tys: &[Ty]) -> Node {
        let op = Opcode::Call { callee };
        match ret_tys {
            [] => self.push(op, Ty::Void, args),
            [ty] => self.push(op, *ty, args),
            tys => self.push_multi(op, args, tys.to_vec()),
        }
    }

    pub fn ret(&mut self, value: Option<Node>) -> Node {
        match value {
            Some(value) => self.push(Opcode::Return, Ty::Void, &[value]),
            None => self.push(Opcode::Return, Ty::Void, &[]),
        }
    }

    pub fn proj(&mut self, multi: Node, idx: u8) -> Node {
        let ty = multi.reg_tys(self.lir)[idx as usize];
        self.push(Opcode::Proj(idx), ty, &[multi])
    }

    pub fn intrinsic(&mut self, id: IntrinsicId, operands: &[Node]) -> Node {
        let info = id.info();
        match info.result_ty() {
            Ty::Multi => self.push_multi(Opcode::Intrinsic(id), operands, info.reg_tys()),
            ty => self.push(Opcode::Intrinsic(id), ty, operands),
        }
    }
}
