use super::{Node, NodeData};
use crate::{
    collections::{
        linked_list::ListContainer,
        storage::{ArenaAlloc, ArenaPtr, BaseArena, BaseArenaPtr},
    },
    impl_arena,
};

/// The lowered IR of one method.
///
/// All the nodes of the method live here and are addressed by [Node]
/// handles. The program order is kept by the [Block]s, each of them an
/// intrusive list of nodes.
#[derive(Default)]
pub struct Lir {
    /// The storage of nodes.
    pub(super) nodes: BaseArena<NodeData>,
    /// The storage of blocks.
    pub(super) blocks: BaseArena<BlockData>,
}

impl Lir {
    pub fn new() -> Self { Self::default() }

    /// The number of nodes ever created, dead ones included.
    pub fn node_count(&self) -> usize { self.nodes.len() }

    /// Create an empty block.
    pub fn new_block(&mut self) -> Block {
        self.alloc(BlockData {
            head: None,
            tail: None,
        })
    }

    /// Copy the method.
    ///
    /// Handles stay valid in the copy, so the same [Node] refers to the same
    /// operation in both.
    pub fn duplicate(&self) -> Lir {
        let mut lir = Lir::new();
        for (_, data) in self.nodes.iter() {
            lir.nodes.alloc(data.clone());
        }
        for (_, data) in self.blocks.iter() {
            lir.blocks.alloc(data.clone());
        }
        lir
    }
}

#[derive(Clone)]
pub struct BlockData {
    head: Option<Node>,
    tail: Option<Node>,
}

#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
pub struct Block(BaseArenaPtr<BlockData>);

impl_arena!(Lir, BlockData, Block, blocks);

impl Block {
    /// The live nodes of the block, in program order.
    pub fn nodes(self, lir: &Lir) -> Vec<Node> { self.iter(lir).collect() }
}

impl ListContainer<Node> for Block {
    fn head(self, lir: &Self::A) -> Option<Node> { self.deref(lir).head }

    fn tail(self, lir: &Self::A) -> Option<Node> { self.deref(lir).tail }

    fn set_head(self, lir: &mut Self::A, head: Option<Node>) { self.deref_mut(lir).head = head; }

    fn set_tail(self, lir: &mut Self::A, tail: Option<Node>) { self.deref_mut(lir).tail = tail; }
}
