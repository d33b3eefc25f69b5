use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use super::{Block, Lir, Ty};
use crate::{
    collections::{
        linked_list::ListNode,
        storage::{ArenaAlloc, ArenaPtr, BaseArenaPtr},
    },
    impl_arena,
    target::{IntrinsicId, RegMask},
};

/// Condition codes of comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    /// Signed less than.
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned less than.
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl Cond {
    pub const ALL: [Cond; 10] = [
        Cond::Eq,
        Cond::Ne,
        Cond::Lt,
        Cond::Le,
        Cond::Gt,
        Cond::Ge,
        Cond::Ult,
        Cond::Ule,
        Cond::Ugt,
        Cond::Uge,
    ];

    /// The logical negation, `!(a cond b) == a cond.reverse() b`.
    pub fn reverse(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
            Cond::Ult => Cond::Uge,
            Cond::Ule => Cond::Ugt,
            Cond::Ugt => Cond::Ule,
            Cond::Uge => Cond::Ult,
        }
    }

    /// The condition after swapping the operands, `a cond b == b cond.swap() a`.
    pub fn swap(self) -> Cond {
        match self {
            Cond::Eq => Cond::Eq,
            Cond::Ne => Cond::Ne,
            Cond::Lt => Cond::Gt,
            Cond::Le => Cond::Ge,
            Cond::Gt => Cond::Lt,
            Cond::Ge => Cond::Le,
            Cond::Ult => Cond::Ugt,
            Cond::Ule => Cond::Uge,
            Cond::Ugt => Cond::Ult,
            Cond::Uge => Cond::Ule,
        }
    }

    /// Evaluate the condition on two integers of type `ty`.
    pub fn eval(self, a: i64, b: i64, ty: Ty) -> bool {
        let (a, b) = if ty == Ty::I32 {
            (a as i32 as i64, b as i32 as i64)
        } else {
            (a, b)
        };
        let (ua, ub) = if ty == Ty::I32 {
            (a as u32 as u64, b as u32 as u64)
        } else {
            (a as u64, b as u64)
        };
        match self {
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => a < b,
            Cond::Le => a <= b,
            Cond::Gt => a > b,
            Cond::Ge => a >= b,
            Cond::Ult => ua < ub,
            Cond::Ule => ua <= ub,
            Cond::Ugt => ua > ub,
            Cond::Uge => ua >= ub,
        }
    }

    /// Whether the condition holds for the given flags.
    pub fn holds(self, flags: Nzcv) -> bool {
        let n = flags.contains(Nzcv::N);
        let z = flags.contains(Nzcv::Z);
        let c = flags.contains(Nzcv::C);
        let v = flags.contains(Nzcv::V);
        match self {
            Cond::Eq => z,
            Cond::Ne => !z,
            Cond::Lt => n != v,
            Cond::Le => z || n != v,
            Cond::Gt => !z && n == v,
            Cond::Ge => n == v,
            Cond::Ult => !c,
            Cond::Ule => !c || z,
            Cond::Ugt => c && !z,
            Cond::Uge => c,
        }
    }

    /// The flags literal that makes `self` evaluate to true.
    ///
    /// A conditional compare whose predicate fails loads this literal into
    /// the flags instead of comparing, which forces the outcome of the
    /// condition read after it.
    pub fn truthifying_flags(self) -> Nzcv {
        match self {
            Cond::Eq => Nzcv::Z,
            Cond::Ne => Nzcv::empty(),
            Cond::Lt => Nzcv::N,
            Cond::Le => Nzcv::Z,
            Cond::Gt => Nzcv::empty(),
            Cond::Ge => Nzcv::empty(),
            Cond::Ult => Nzcv::empty(),
            Cond::Ule => Nzcv::Z,
            Cond::Ugt => Nzcv::C,
            Cond::Uge => Nzcv::C,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
            Cond::Ult => "ult",
            Cond::Ule => "ule",
            Cond::Ugt => "ugt",
            Cond::Uge => "uge",
        };
        write!(f, "{}", s)
    }
}

bitflags! {
    /// The condition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Nzcv: u8 {
        const N = 0b1000;
        const Z = 0b0100;
        const C = 0b0010;
        const V = 0b0001;
    }
}

impl Nzcv {
    /// The flags produced by comparing `a` with `b`, i.e. by `a - b`.
    pub fn from_compare(a: i64, b: i64, ty: Ty) -> Nzcv {
        let (negative, zero, carry, overflow) = if ty == Ty::I32 {
            let (a, b) = (a as i32, b as i32);
            let (result, overflow) = a.overflowing_sub(b);
            (result < 0, result == 0, a as u32 >= b as u32, overflow)
        } else {
            let (result, overflow) = a.overflowing_sub(b);
            (result < 0, result == 0, a as u64 >= b as u64, overflow)
        };

        let mut flags = Nzcv::empty();
        flags.set(Nzcv::N, negative);
        flags.set(Nzcv::Z, zero);
        flags.set(Nzcv::C, carry);
        flags.set(Nzcv::V, overflow);
        flags
    }
}

bitflags! {
    /// Side effects of a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Effects: u8 {
        const MAY_THROW = 1 << 0;
        const MAY_FAULT = 1 << 1;
        const SETS_FLAGS = 1 << 2;
        const DEFINES_MEMORY = 1 << 3;
        const READS_MEMORY = 1 << 4;
        /// A call or any other barrier nothing may be moved across.
        const CALL = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// An integer constant.
    IConst(i64),
    /// A floating point constant, by its bit pattern.
    FConst(u64),
    /// The n-th parameter of the method.
    Param(u32),
    /// Read a local variable.
    LclVar(u32),
    /// Write the only operand into a local variable.
    StoreLclVar(u32),
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
    Neg,
    Not,
    FAdd,
    FSub,
    FMul,
    FNeg,
    /// Compare two integers.
    ///
    /// Produces the 0/1 result of the condition, or only the flags when the
    /// node is typed [Ty::Flags].
    Cmp(Cond),
    /// Conditional compare, `[flags, a, b]`.
    ///
    /// If `pred` holds on the incoming flags, the result is the flags of
    /// comparing `a` with `b`, otherwise it is the `nzcv` literal. `cond` is
    /// the condition the chain is finally read with.
    CCmp { cond: Cond, pred: Cond, nzcv: Nzcv },
    /// Materialize the condition of a flags operand as 0/1.
    SetCC(Cond),
    /// `[c, a, b]`, `a` if `c` is non-zero, `b` otherwise.
    Select,
    /// `[flags, a, b]`, `a` if the condition holds on the flags.
    SelectCC(Cond),
    /// An address expression, `[base]` or `[base, index]`, evaluating to
    /// `base + index * scale + offset`.
    Lea { scale: u8, offset: i64 },
    /// `[addr]`, the loaded type is the node type.
    Load,
    /// `[addr, value]`.
    Store,
    /// Call a function by id, the operands are the arguments.
    Call { callee: u32 },
    /// Return from the method, with an optional value.
    Return,
    /// Raise a bounds-violation if the condition holds on the flags operand.
    ThrowIf(Cond),
    /// `[a, b, c]`, `c + a * b`.
    MulAdd,
    /// `[a, b, c]`, `c - a * b`.
    MulSub,
    /// `[a, b, c]`, `c + a * b`, or `c - a * b` if `negate_product`.
    FMulAdd { negate_product: bool },
    /// Take the n-th register value of a multi-register node.
    Proj(u8),
    /// A hardware intrinsic, described by the static intrinsic table.
    Intrinsic(IntrinsicId),
}

impl Opcode {
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::FAdd
                | Opcode::FMul
        )
    }

    /// Integer binary operations and plain compares.
    pub fn is_int_binary(&self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Sar
                | Opcode::Cmp(_)
        )
    }

    pub fn is_shift(&self) -> bool { matches!(self, Opcode::Shl | Opcode::Shr | Opcode::Sar) }

    pub fn is_const(&self) -> bool { matches!(self, Opcode::IConst(_) | Opcode::FConst(_)) }

    /// Nodes reading a register value that already lives in an interval of its
    /// own, a consumer may use that interval directly.
    pub fn is_reg_resident_leaf(&self) -> bool {
        matches!(self, Opcode::LclVar(_) | Opcode::Proj(_))
    }

    /// The effects implied by the opcode and the value type.
    pub fn effects(&self, ty: Ty) -> Effects {
        let mut effects = match self {
            Opcode::Load => Effects::READS_MEMORY | Effects::MAY_FAULT,
            Opcode::Store => Effects::DEFINES_MEMORY | Effects::MAY_FAULT,
            Opcode::Call { .. } => {
                Effects::CALL
                    | Effects::MAY_THROW
                    | Effects::READS_MEMORY
                    | Effects::DEFINES_MEMORY
            }
            Opcode::ThrowIf(_) => Effects::MAY_THROW,
            Opcode::Intrinsic(id) => id.info().effects,
            _ => Effects::empty(),
        };
        if ty == Ty::Flags {
            effects |= Effects::SETS_FLAGS;
        }
        effects
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::IConst(_) => "iconst",
            Opcode::FConst(_) => "fconst",
            Opcode::Param(_) => "param",
            Opcode::LclVar(_) => "lcl_var",
            Opcode::StoreLclVar(_) => "store_lcl_var",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Sar => "sar",
            Opcode::Neg => "neg",
            Opcode::Not => "not",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FNeg => "fneg",
            Opcode::Cmp(_) => "cmp",
            Opcode::CCmp { .. } => "ccmp",
            Opcode::SetCC(_) => "setcc",
            Opcode::Select => "select",
            Opcode::SelectCC(_) => "selectcc",
            Opcode::Lea { .. } => "lea",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Call { .. } => "call",
            Opcode::Return => "ret",
            Opcode::ThrowIf(_) => "throw_if",
            Opcode::MulAdd => "madd",
            Opcode::MulSub => "msub",
            Opcode::FMulAdd { .. } => "fmadd",
            Opcode::Proj(_) => "proj",
            Opcode::Intrinsic(id) => id.info().name,
        }
    }
}

#[derive(Clone)]
pub struct NodeData {
    self_ptr: Node,

    /// The operation.
    pub(super) op: Opcode,
    /// The value type.
    pub(super) ty: Ty,
    /// Types of the register values the node produces.
    ///
    /// Empty for void and flags nodes, one entry for plain values.
    pub(super) reg_tys: SmallVec<[Ty; 2]>,
    /// The operands, in evaluation order.
    pub(super) operands: SmallVec<[Node; 4]>,
    /// The users, one entry per operand slot referring to this node.
    pub(super) users: SmallVec<[Node; 2]>,
    /// Folded into the encoding of its only user.
    pub(super) contained: bool,
    /// Overrides the candidate registers of the produced value.
    pub(super) reg_mask: Option<RegMask>,
    pub(super) effects: Effects,
    /// The immediate operand was not a legal constant, the node needs the
    /// register form of its encoding.
    pub(super) imm_fallback: bool,
    /// Operand slots that read a spilled value from its stack slot instead
    /// of reloading it, one bit per slot.
    pub(super) reg_optional: u8,
    /// Removed from the program, the node is kept in the arena only.
    pub(super) dead: bool,

    next: Option<Node>,
    prev: Option<Node>,
    parent: Option<Block>,
}

impl NodeData {
    pub fn self_ptr(&self) -> Node { self.self_ptr }
}

#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Node(BaseArenaPtr<NodeData>);

impl_arena!(Lir, NodeData, Node, nodes);

impl Node {
    /// Create a node, not yet linked into any block.
    ///
    /// `reg_tys` is only needed for [Ty::Multi] nodes, other types derive it
    /// from `ty`.
    pub fn new(
        lir: &mut Lir,
        op: Opcode,
        ty: Ty,
        operands: impl IntoIterator<Item = Node>,
        reg_tys: impl IntoIterator<Item = Ty>,
    ) -> Node {
        let reg_tys: SmallVec<[Ty; 2]> = if ty.is_reg_value() {
            smallvec::smallvec![ty]
        } else {
            reg_tys.into_iter().collect()
        };

        let node = lir.alloc_with(|self_ptr| NodeData {
            self_ptr,
            op,
            ty,
            reg_tys,
            operands: SmallVec::new(),
            users: SmallVec::new(),
            contained: false,
            reg_mask: None,
            effects: op.effects(ty),
            imm_fallback: false,
            reg_optional: 0,
            dead: false,
            next: None,
            prev: None,
            parent: None,
        });

        let operands: SmallVec<[Node; 4]> = operands.into_iter().collect();
        for operand in operands.iter() {
            operand.deref_mut(lir).users.push(node);
        }
        node.deref_mut(lir).operands = operands;

        node
    }

    pub fn op(self, lir: &Lir) -> Opcode { self.deref(lir).op }

    pub fn ty(self, lir: &Lir) -> Ty { self.deref(lir).ty }

    pub fn reg_tys(self, lir: &Lir) -> &[Ty] { &self.deref(lir).reg_tys }

    /// The number of register values the node produces.
    pub fn reg_count(self, lir: &Lir) -> usize { self.deref(lir).reg_tys.len() }

    pub fn operands(self, lir: &Lir) -> &[Node] { &self.deref(lir).operands }

    pub fn operand(self, lir: &Lir, idx: usize) -> Node { self.deref(lir).operands[idx] }

    pub fn users(self, lir: &Lir) -> &[Node] { &self.deref(lir).users }

    pub fn use_count(self, lir: &Lir) -> usize { self.deref(lir).users.len() }

    /// Whether the node is used exactly once, and that use is `user`.
    pub fn is_single_use_by(self, lir: &Lir, user: Node) -> bool {
        self.users(lir) == [user]
    }

    pub fn is_contained(self, lir: &Lir) -> bool { self.deref(lir).contained }

    pub fn set_contained(self, lir: &mut Lir, contained: bool) {
        self.deref_mut(lir).contained = contained;
    }

    pub fn effects(self, lir: &Lir) -> Effects { self.deref(lir).effects }

    pub fn add_effects(self, lir: &mut Lir, effects: Effects) {
        self.deref_mut(lir).effects |= effects;
    }

    pub fn reg_mask(self, lir: &Lir) -> Option<RegMask> { self.deref(lir).reg_mask }

    pub fn set_reg_mask(self, lir: &mut Lir, mask: Option<RegMask>) {
        self.deref_mut(lir).reg_mask = mask;
    }

    pub fn needs_imm_fallback(self, lir: &Lir) -> bool { self.deref(lir).imm_fallback }

    pub fn set_imm_fallback(self, lir: &mut Lir, fallback: bool) {
        self.deref_mut(lir).imm_fallback = fallback;
    }

    /// Whether operand `idx` may be read from memory when it is not in a
    /// register.
    pub fn is_reg_optional(self, lir: &Lir, idx: usize) -> bool {
        idx < 8 && self.deref(lir).reg_optional & (1 << idx) != 0
    }

    pub fn set_reg_optional(self, lir: &mut Lir, idx: usize) {
        if idx < 8 {
            self.deref_mut(lir).reg_optional |= 1 << idx;
        }
    }

    pub fn is_dead(self, lir: &Lir) -> bool { self.deref(lir).dead }

    /// The value of an integer constant node.
    pub fn as_iconst(self, lir: &Lir) -> Option<i64> {
        match self.op(lir) {
            Opcode::IConst(value) => Some(value),
            _ => None,
        }
    }

    /// Replace the operation and the type in place.
    ///
    /// The effects are recomputed from the new opcode, and no operand is
    /// reg-optional any more.
    pub fn set_op(self, lir: &mut Lir, op: Opcode, ty: Ty) {
        let data = self.deref_mut(lir);
        data.op = op;
        data.ty = ty;
        data.effects = op.effects(ty);
        data.reg_optional = 0;
        data.reg_tys = if ty.is_reg_value() {
            smallvec::smallvec![ty]
        } else if ty == Ty::Multi {
            std::mem::take(&mut data.reg_tys)
        } else {
            SmallVec::new()
        };
    }

    /// Replace the operand at `idx`, keeping the user lists consistent.
    pub fn set_operand(self, lir: &mut Lir, idx: usize, new: Node) {
        let old = self.operand(lir, idx);
        old.remove_user(lir, self);
        new.deref_mut(lir).users.push(self);
        self.deref_mut(lir).operands[idx] = new;
    }

    /// Replace all the operands, keeping the user lists consistent.
    pub fn set_operands(self, lir: &mut Lir, operands: impl IntoIterator<Item = Node>) {
        let old = std::mem::take(&mut self.deref_mut(lir).operands);
        for operand in old {
            operand.remove_user(lir, self);
        }
        let new: SmallVec<[Node; 4]> = operands.into_iter().collect();
        for operand in new.iter() {
            operand.deref_mut(lir).users.push(self);
        }
        self.deref_mut(lir).operands = new;
    }

    pub fn swap_operands(self, lir: &mut Lir, a: usize, b: usize) {
        self.deref_mut(lir).operands.swap(a, b);
    }

    fn remove_user(self, lir: &mut Lir, user: Node) {
        let users = &mut self.deref_mut(lir).users;
        if let Some(pos) = users.iter().position(|u| *u == user) {
            users.remove(pos);
        }
    }

    /// Remove the node from the program.
    ///
    /// The node is unlinked and marked dead, and it is no longer a user of
    /// its operands.
    ///
    /// # Panics
    ///
    /// Panics if the node still has users.
    pub fn remove(self, lir: &mut Lir) {
        assert!(
            self.users(lir).is_empty(),
            "cannot remove {} while it is still used",
            self
        );
        self.set_operands(lir, []);
        self.unlink(lir);
        self.deref_mut(lir).dead = true;
    }

    /// Whether `self` comes before `other` in the program order.
    pub fn precedes(self, lir: &Lir, other: Node) -> bool {
        let mut curr = self.next(lir);
        while let Some(node) = curr {
            if node == other {
                return true;
            }
            curr = node.next(lir);
        }
        false
    }

    /// The nodes strictly between `self` and `other`, in program order.
    pub fn nodes_between(self, lir: &Lir, other: Node) -> Vec<Node> {
        let mut nodes = Vec::new();
        let mut curr = self.next(lir);
        while let Some(node) = curr {
            if node == other {
                return nodes;
            }
            nodes.push(node);
            curr = node.next(lir);
        }
        nodes
    }

    /// Move the node to right before `before`, in the same block.
    pub fn move_before(self, lir: &mut Lir, before: Node) {
        self.unlink(lir);
        before.insert_before(lir, self);
    }

    /// Walk the contained subtree of the node, the node itself included.
    ///
    /// Operands that are not contained are not visited.
    pub fn contained_subtree(self, lir: &Lir) -> Vec<Node> {
        let mut nodes = vec![self];
        let mut idx = 0;
        while idx < nodes.len() {
            let node = nodes[idx];
            for operand in node.operands(lir) {
                if operand.is_contained(lir) {
                    nodes.push(*operand);
                }
            }
            idx += 1;
        }
        nodes
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "n{}", self.0.id()) }
}

impl ListNode for Node {
    type Container = Block;

    fn next(self, lir: &Self::A) -> Option<Self> { self.deref(lir).next }

    fn prev(self, lir: &Self::A) -> Option<Self> { self.deref(lir).prev }

    fn set_next(self, lir: &mut Self::A, next: Option<Self>) { self.deref_mut(lir).next = next; }

    fn set_prev(self, lir: &mut Self::A, prev: Option<Self>) { self.deref_mut(lir).prev = prev; }

    fn container(self, lir: &Self::A) -> Option<Self::Container> { self.deref(lir).parent }

    fn set_container(self, lir: &mut Self::A, container: Option<Self::Container>) {
        self.deref_mut(lir).parent = container;
    }
}
