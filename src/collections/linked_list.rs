//! # Intrusive Linked Lists
//!
//! The program order of a block is a doubly linked list whose links are
//! fields of the node data, addressed through arena handles. Lowering inserts
//! range checks and split address computations before the node it is
//! working on and unlinks fused nodes, all without moving anything.

use super::storage::ArenaPtr;

/// The owner of a list, e.g. the block holding the nodes.
pub trait ListContainer<N>: ArenaPtr
where
    N: ListNode<A = Self::A, Container = Self>,
{
    /// The first node. `None` exactly when the tail is `None` too.
    fn head(self, arena: &Self::A) -> Option<N>;

    fn tail(self, arena: &Self::A) -> Option<N>;

    fn set_head(self, arena: &mut Self::A, head: Option<N>);

    fn set_tail(self, arena: &mut Self::A, tail: Option<N>);

    /// Append a node to the list.
    ///
    /// # Panics
    ///
    /// Panics if the node is linked into a list already.
    fn push_back(self, arena: &mut Self::A, node: N) {
        assert!(node.container(arena).is_none(), "the node is already linked");

        let tail = self.tail(arena);
        match tail {
            Some(tail) => tail.set_next(arena, Some(node)),
            None => self.set_head(arena, Some(node)),
        }
        node.set_prev(arena, tail);
        node.set_next(arena, None);
        node.set_container(arena, Some(self));
        self.set_tail(arena, Some(node));
    }

    fn iter(self, arena: &Self::A) -> ListIter<'_, N> {
        ListIter {
            arena,
            next: self.head(arena),
        }
    }

    /// A cursor over the list, see [ListCursor].
    fn cursor(self) -> ListCursor<N> {
        ListCursor {
            container: self,
            curr: None,
            started: false,
        }
    }
}

/// A node that lives in at most one list at a time.
pub trait ListNode: ArenaPtr {
    type Container: ListContainer<Self, A = Self::A>;

    fn next(self, arena: &Self::A) -> Option<Self>;

    fn prev(self, arena: &Self::A) -> Option<Self>;

    fn set_next(self, arena: &mut Self::A, next: Option<Self>);

    fn set_prev(self, arena: &mut Self::A, prev: Option<Self>);

    fn container(self, arena: &Self::A) -> Option<Self::Container>;

    fn set_container(self, arena: &mut Self::A, container: Option<Self::Container>);

    /// Link `node` right before `self`.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not in a list, or if `node` is.
    fn insert_before(self, arena: &mut Self::A, node: Self) {
        let Some(container) = self.container(arena) else {
            panic!("cannot insert before an unlinked node");
        };
        assert!(node.container(arena).is_none(), "the node is already linked");

        let prev = self.prev(arena);
        match prev {
            Some(prev) => prev.set_next(arena, Some(node)),
            None => container.set_head(arena, Some(node)),
        }
        node.set_prev(arena, prev);
        node.set_next(arena, Some(self));
        node.set_container(arena, Some(container));
        self.set_prev(arena, Some(node));
    }

    /// Take the node out of its list. The node itself stays allocated, and
    /// unlinking a node that is in no list does nothing.
    fn unlink(self, arena: &mut Self::A) {
        let Some(container) = self.container(arena) else {
            return;
        };

        let prev = self.prev(arena);
        let next = self.next(arena);
        match prev {
            Some(prev) => prev.set_next(arena, next),
            None => container.set_head(arena, next),
        }
        match next {
            Some(next) => next.set_prev(arena, prev),
            None => container.set_tail(arena, prev),
        }

        self.set_prev(arena, None);
        self.set_next(arena, None);
        self.set_container(arena, None);
    }
}

pub struct ListIter<'a, N: ListNode> {
    arena: &'a N::A,
    next: Option<N>,
}

impl<N: ListNode> Iterator for ListIter<'_, N> {
    type Item = N;

    fn next(&mut self) -> Option<N> {
        let curr = self.next?;
        self.next = curr.next(self.arena);
        Some(curr)
    }
}

/// Walks a list that is mutated between the steps.
///
/// The link to the next node is read when stepping, so nodes inserted before
/// the current one are never visited and nodes unlinked ahead of it are
/// skipped. The current node itself must stay linked.
pub struct ListCursor<N: ListNode> {
    container: N::Container,
    curr: Option<N>,
    started: bool,
}

impl<N: ListNode> ListCursor<N> {
    pub fn next(&mut self, arena: &N::A) -> Option<N> {
        self.curr = if self.started {
            self.curr.and_then(|curr| curr.next(arena))
        } else {
            self.container.head(arena)
        };
        self.started = true;
        self.curr
    }
}

#[cfg(test)]
mod tests {
    use super::{ListContainer, ListNode};
    use crate::{
        collections::storage::{ArenaAlloc, ArenaPtr, BaseArena, BaseArenaPtr},
        impl_arena,
    };

    #[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
    struct Item(BaseArenaPtr<ItemData>);

    struct ItemData {
        value: u32,
        next: Option<Item>,
        prev: Option<Item>,
        list: Option<List>,
    }

    #[derive(Debug, Hash, Clone, Copy, PartialEq, Eq)]
    struct List(BaseArenaPtr<ListData>);

    #[derive(Default)]
    struct ListData {
        head: Option<Item>,
        tail: Option<Item>,
    }

    #[derive(Default)]
    struct Arena {
        items: BaseArena<ItemData>,
        lists: BaseArena<ListData>,
    }

    impl_arena!(Arena, ItemData, Item, items);
    impl_arena!(Arena, ListData, List, lists);

    impl ListContainer<Item> for List {
        fn head(self, arena: &Arena) -> Option<Item> { self.deref(arena).head }

        fn tail(self, arena: &Arena) -> Option<Item> { self.deref(arena).tail }

        fn set_head(self, arena: &mut Arena, head: Option<Item>) { self.deref_mut(arena).head = head; }

        fn set_tail(self, arena: &mut Arena, tail: Option<Item>) { self.deref_mut(arena).tail = tail; }
    }

    impl ListNode for Item {
        type Container = List;

        fn next(self, arena: &Arena) -> Option<Item> { self.deref(arena).next }

        fn prev(self, arena: &Arena) -> Option<Item> { self.deref(arena).prev }

        fn set_next(self, arena: &mut Arena, next: Option<Item>) { self.deref_mut(arena).next = next; }

        fn set_prev(self, arena: &mut Arena, prev: Option<Item>) { self.deref_mut(arena).prev = prev; }

        fn container(self, arena: &Arena) -> Option<List> { self.deref(arena).list }

        fn set_container(self, arena: &mut Arena, list: Option<List>) {
            self.deref_mut(arena).list = list;
        }
    }

    fn item(arena: &mut Arena, value: u32) -> Item {
        arena.alloc(ItemData {
            value,
            next: None,
            prev: None,
            list: None,
        })
    }

    fn values(arena: &Arena, list: List) -> Vec<u32> {
        list.iter(arena).map(|item| item.deref(arena).value).collect()
    }

    #[test]
    fn test_push_insert_unlink() {
        let mut arena = Arena::default();
        let list = arena.alloc(ListData::default());
        let items = (0..4).map(|v| item(&mut arena, v)).collect::<Vec<_>>();

        list.push_back(&mut arena, items[1]);
        list.push_back(&mut arena, items[3]);
        items[1].insert_before(&mut arena, items[0]);
        items[3].insert_before(&mut arena, items[2]);
        assert_eq!(values(&arena, list), [0, 1, 2, 3]);
        assert_eq!(list.head(&arena), Some(items[0]));
        assert_eq!(list.tail(&arena), Some(items[3]));

        items[0].unlink(&mut arena);
        items[3].unlink(&mut arena);
        assert_eq!(values(&arena, list), [1, 2]);
        assert_eq!(list.head(&arena), Some(items[1]));
        assert_eq!(list.tail(&arena), Some(items[2]));
        assert_eq!(items[3].container(&arena), None);

        // already out of the list
        items[3].unlink(&mut arena);
        assert_eq!(values(&arena, list), [1, 2]);

        list.push_back(&mut arena, items[0]);
        assert_eq!(values(&arena, list), [1, 2, 0]);

        for item in [items[1], items[2], items[0]] {
            item.unlink(&mut arena);
        }
        assert_eq!(list.head(&arena), None);
        assert_eq!(list.tail(&arena), None);
    }

    #[test]
    fn test_cursor_while_rewriting() {
        let mut arena = Arena::default();
        let list = arena.alloc(ListData::default());
        for v in 0..5 {
            let item = item(&mut arena, v);
            list.push_back(&mut arena, item);
        }

        let mut cursor = list.cursor();
        let mut visited = Vec::new();
        while let Some(curr) = cursor.next(&arena) {
            let value = curr.deref(&arena).value;
            visited.push(value);
            // a new item before the current one, and the next odd one gone
            let inserted = item(&mut arena, 10 + value);
            curr.insert_before(&mut arena, inserted);
            let next = curr.next(&arena);
            if let Some(next) = next.filter(|n| n.deref(&arena).value % 2 == 1) {
                next.unlink(&mut arena);
            }
        }

        assert_eq!(visited, [0, 2, 4]);
        assert_eq!(values(&arena, list), [10, 0, 12, 2, 14, 4]);
        assert_eq!(cursor.next(&arena), None);
    }
}
