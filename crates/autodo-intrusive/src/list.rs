// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Intrusive doubly linked list.
//!
//! Each owner record embeds a [`ListLink`]. The list stores head, tail and
//! length; the links themselves are reached through a [`ListNodes`] arena
//! passed into every operation. A list must always be used with the same
//! arena.
//!
//! Every list has an identity that its members record. Debug builds check it
//! on `erase` and on the anchor of `insert_before`/`insert_after`, so using a
//! node with the wrong list panics instead of corrupting both.
//!
//! ```
//! use autodo_intrusive::{List, ListEntry, ListLink};
//! use slab::Slab;
//!
//! struct Job {
//!     name: &'static str,
//!     link: ListLink,
//! }
//!
//! impl ListEntry for Job {
//!     fn list_link(&self) -> &ListLink { &self.link }
//!     fn list_link_mut(&mut self) -> &mut ListLink { &mut self.link }
//! }
//!
//! let mut jobs = Slab::new();
//! let a = jobs.insert(Job { name: "a", link: ListLink::new() });
//! let b = jobs.insert(Job { name: "b", link: ListLink::new() });
//!
//! let mut queue = List::new();
//! queue.push_back(&mut jobs, a);
//! queue.push_front(&mut jobs, b);
//!
//! let names: Vec<_> = queue.iter(&jobs).map(|id| jobs[id].name).collect();
//! assert_eq!(names, ["b", "a"]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use slab::Slab;

use crate::NodeId;

/// Owner tag of unlinked nodes.
const UNOWNED: u64 = 0;

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(UNOWNED + 1);

/// Link fields embedded in a list member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListLink {
    next: Option<NodeId>,
    prev: Option<NodeId>,
    owner: u64,
}

impl ListLink {
    /// An unlinked node.
    pub const fn new() -> Self {
        Self {
            next: None,
            prev: None,
            owner: UNOWNED,
        }
    }

    /// Whether the owner currently belongs to some list.
    pub const fn is_linked(&self) -> bool {
        self.owner != UNOWNED
    }
}

/// Arena access to the embedded list links.
pub trait ListNodes {
    fn list_link(&self, id: NodeId) -> &ListLink;
    fn list_link_mut(&mut self, id: NodeId) -> &mut ListLink;
}

/// An owner record that embeds a [`ListLink`].
///
/// Implementing this makes `Slab<T>` usable as a [`ListNodes`] arena.
pub trait ListEntry {
    fn list_link(&self) -> &ListLink;
    fn list_link_mut(&mut self) -> &mut ListLink;
}

impl<T: ListEntry> ListNodes for Slab<T> {
    fn list_link(&self, id: NodeId) -> &ListLink {
        self[id].list_link()
    }

    fn list_link_mut(&mut self, id: NodeId) -> &mut ListLink {
        self[id].list_link_mut()
    }
}

/// Bare links, for callers that keep payloads in a parallel array.
impl ListNodes for Vec<ListLink> {
    fn list_link(&self, id: NodeId) -> &ListLink {
        &self[id]
    }

    fn list_link_mut(&mut self, id: NodeId) -> &mut ListLink {
        &mut self[id]
    }
}

/// Doubly linked list over an external arena.
///
/// Not `Clone`: two lists must never share members.
#[derive(Debug)]
pub struct List {
    id: u64,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl List {
    /// Creates an empty list with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of members. Maintained incrementally.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First member, or `end()` if empty.
    pub const fn begin(&self) -> Option<NodeId> {
        self.head
    }

    /// One past the tail. Never a real node.
    pub const fn end(&self) -> Option<NodeId> {
        None
    }

    /// Last member.
    pub const fn back(&self) -> Option<NodeId> {
        self.tail
    }

    /// Member after `id`, or `end()`.
    pub fn next<N: ListNodes + ?Sized>(&self, nodes: &N, id: NodeId) -> Option<NodeId> {
        let link = nodes.list_link(id);
        debug_assert!(link.is_linked(), "list node {id} is not linked");
        link.next
    }

    /// Member before `id`, or `None` at the head.
    pub fn prev<N: ListNodes + ?Sized>(&self, nodes: &N, id: NodeId) -> Option<NodeId> {
        let link = nodes.list_link(id);
        debug_assert!(link.is_linked(), "list node {id} is not linked");
        link.prev
    }

    /// Inserts an unlinked node at the head.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already a member of any list.
    pub fn push_front<N: ListNodes + ?Sized>(&mut self, nodes: &mut N, id: NodeId) {
        self.claim(nodes, id);
        let head = self.head;
        {
            let link = nodes.list_link_mut(id);
            link.prev = None;
            link.next = head;
        }
        match head {
            Some(h) => nodes.list_link_mut(h).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Inserts an unlinked node at the tail.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already a member of any list.
    pub fn push_back<N: ListNodes + ?Sized>(&mut self, nodes: &mut N, id: NodeId) {
        self.claim(nodes, id);
        let tail = self.tail;
        {
            let link = nodes.list_link_mut(id);
            link.next = None;
            link.prev = tail;
        }
        match tail {
            Some(t) => nodes.list_link_mut(t).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Inserts `id` immediately before the member `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already linked or `pos` is not a member.
    pub fn insert_before<N: ListNodes + ?Sized>(&mut self, nodes: &mut N, pos: NodeId, id: NodeId) {
        self.check_member(nodes.list_link(pos), pos);
        self.claim(nodes, id);
        let prev = nodes.list_link(pos).prev;
        {
            let link = nodes.list_link_mut(id);
            link.prev = prev;
            link.next = Some(pos);
        }
        nodes.list_link_mut(pos).prev = Some(id);
        match prev {
            Some(p) => nodes.list_link_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        self.len += 1;
    }

    /// Inserts `id` immediately after the member `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already linked or `pos` is not a member.
    pub fn insert_after<N: ListNodes + ?Sized>(&mut self, nodes: &mut N, pos: NodeId, id: NodeId) {
        self.check_member(nodes.list_link(pos), pos);
        self.claim(nodes, id);
        let next = nodes.list_link(pos).next;
        {
            let link = nodes.list_link_mut(id);
            link.prev = Some(pos);
            link.next = next;
        }
        nodes.list_link_mut(pos).next = Some(id);
        match next {
            Some(n) => nodes.list_link_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Removes a member. The node is left unlinked and can be reinserted.
    ///
    /// # Panics
    ///
    /// Panics if `id` is unlinked or a member of a different list. The
    /// membership check on middle nodes runs in debug builds only; heads
    /// and tails are always checked.
    pub fn erase<N: ListNodes + ?Sized>(&mut self, nodes: &mut N, id: NodeId) {
        let link = nodes.list_link(id);
        self.check_member(link, id);
        let (next, prev) = (link.next, link.prev);
        match prev {
            Some(p) => nodes.list_link_mut(p).next = next,
            None => {
                assert_eq!(self.head, Some(id), "list node {id} belongs to another list");
                self.head = next;
            }
        }
        match next {
            Some(n) => nodes.list_link_mut(n).prev = prev,
            None => {
                assert_eq!(self.tail, Some(id), "list node {id} belongs to another list");
                self.tail = prev;
            }
        }
        *nodes.list_link_mut(id) = ListLink::new();
        self.len -= 1;
    }

    /// Removes and returns the head.
    pub fn pop_front<N: ListNodes + ?Sized>(&mut self, nodes: &mut N) -> Option<NodeId> {
        let id = self.head?;
        self.erase(nodes, id);
        Some(id)
    }

    /// Removes and returns the tail.
    pub fn pop_back<N: ListNodes + ?Sized>(&mut self, nodes: &mut N) -> Option<NodeId> {
        let id = self.tail?;
        self.erase(nodes, id);
        Some(id)
    }

    /// Moves every member of `src` onto the tail of `self` in O(1).
    ///
    /// Relative order is preserved: `src`'s former head follows `self`'s
    /// former tail. `src` is left empty.
    pub fn migrate<N: ListNodes + ?Sized>(&mut self, nodes: &mut N, src: &mut List) {
        let Some(src_head) = src.head else {
            return;
        };
        match self.tail {
            Some(t) => {
                nodes.list_link_mut(t).next = Some(src_head);
                nodes.list_link_mut(src_head).prev = Some(t);
            }
            None => self.head = Some(src_head),
        }
        if cfg!(debug_assertions) {
            let mut cur = Some(src_head);
            while let Some(id) = cur {
                let link = nodes.list_link_mut(id);
                link.owner = self.id;
                cur = link.next;
            }
        }
        self.tail = src.tail;
        self.len += src.len;
        src.head = None;
        src.tail = None;
        src.len = 0;
    }

    /// Whether `id` is a member of this list. O(n).
    pub fn contains<N: ListNodes + ?Sized>(&self, nodes: &N, id: NodeId) -> bool {
        nodes.list_link(id).is_linked() && self.iter(nodes).any(|member| member == id)
    }

    /// Marks `id` as a member of this list, failing loudly if it already
    /// belongs to one.
    fn claim<N: ListNodes + ?Sized>(&self, nodes: &mut N, id: NodeId) {
        let link = nodes.list_link_mut(id);
        assert!(!link.is_linked(), "list node {id} is already linked");
        link.owner = self.id;
    }

    fn check_member(&self, link: &ListLink, id: NodeId) {
        assert!(link.is_linked(), "list node {id} is not linked");
        debug_assert_eq!(link.owner, self.id, "list node {id} belongs to another list");
    }

    /// Head-to-tail iteration over member ids.
    ///
    /// The list must not be modified while iterating; collect first if the
    /// loop body needs to erase.
    pub fn iter<'a, N: ListNodes + ?Sized>(&self, nodes: &'a N) -> Iter<'a, N> {
        Iter {
            nodes,
            cur: self.head,
            remaining: self.len,
        }
    }
}

/// Iterator returned by [`List::iter`].
pub struct Iter<'a, N: ?Sized> {
    nodes: &'a N,
    cur: Option<NodeId>,
    remaining: usize,
}

impl<N: ListNodes + ?Sized> Iterator for Iter<'_, N> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = self.nodes.list_link(id).next;
        self.remaining -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<N: ListNodes + ?Sized> ExactSizeIterator for Iter<'_, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> Vec<ListLink> {
        vec![ListLink::new(); n]
    }

    fn collect(list: &List, nodes: &Vec<ListLink>) -> Vec<NodeId> {
        list.iter(nodes).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list = List::new();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.begin(), list.end());
        assert_eq!(list.back(), None);
    }

    #[test]
    fn push_front_and_back() {
        let mut nodes = links(4);
        let mut list = List::new();
        list.push_back(&mut nodes, 0);
        list.push_back(&mut nodes, 1);
        list.push_front(&mut nodes, 2);
        list.push_front(&mut nodes, 3);
        assert_eq!(collect(&list, &nodes), vec![3, 2, 0, 1]);
        assert_eq!(list.len(), 4);
        assert_eq!(list.begin(), Some(3));
        assert_eq!(list.back(), Some(1));
    }

    #[test]
    fn insert_relative_to_member() {
        let mut nodes = links(5);
        let mut list = List::new();
        list.push_back(&mut nodes, 0);
        list.push_back(&mut nodes, 1);
        list.insert_before(&mut nodes, 0, 2);
        list.insert_after(&mut nodes, 0, 3);
        list.insert_after(&mut nodes, 1, 4);
        assert_eq!(collect(&list, &nodes), vec![2, 0, 3, 1, 4]);
        assert_eq!(list.begin(), Some(2));
        assert_eq!(list.back(), Some(4));
    }

    #[test]
    fn erase_head_middle_tail() {
        let mut nodes = links(5);
        let mut list = List::new();
        for id in 0..5 {
            list.push_back(&mut nodes, id);
        }
        list.erase(&mut nodes, 0);
        list.erase(&mut nodes, 2);
        list.erase(&mut nodes, 4);
        assert_eq!(collect(&list, &nodes), vec![1, 3]);
        assert_eq!(list.len(), 2);
        assert!(!nodes[2].is_linked());

        // An erased node can join again.
        list.push_front(&mut nodes, 2);
        assert_eq!(collect(&list, &nodes), vec![2, 1, 3]);
    }

    #[test]
    fn pop_both_ends() {
        let mut nodes = links(3);
        let mut list = List::new();
        for id in 0..3 {
            list.push_back(&mut nodes, id);
        }
        assert_eq!(list.pop_front(&mut nodes), Some(0));
        assert_eq!(list.pop_back(&mut nodes), Some(2));
        assert_eq!(list.pop_back(&mut nodes), Some(1));
        assert_eq!(list.pop_front(&mut nodes), None);
        assert!(list.is_empty());
    }

    #[test]
    fn traversal_both_directions() {
        let mut nodes = links(3);
        let mut list = List::new();
        for id in 0..3 {
            list.push_back(&mut nodes, id);
        }
        assert_eq!(list.next(&nodes, 0), Some(1));
        assert_eq!(list.next(&nodes, 2), list.end());
        assert_eq!(list.prev(&nodes, 2), Some(1));
        assert_eq!(list.prev(&nodes, 0), None);
    }

    #[test]
    fn migrate_appends_in_order() {
        let mut nodes = links(6);
        let mut dst = List::new();
        let mut src = List::new();
        for id in 0..3 {
            dst.push_back(&mut nodes, id);
        }
        for id in 3..6 {
            src.push_back(&mut nodes, id);
        }
        dst.migrate(&mut nodes, &mut src);
        assert!(src.is_empty());
        assert_eq!(dst.len(), 6);
        assert_eq!(collect(&dst, &nodes), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(dst.prev(&nodes, 3), Some(2));
    }

    #[test]
    fn migrate_into_empty_and_from_empty() {
        let mut nodes = links(2);
        let mut dst = List::new();
        let mut src = List::new();
        src.push_back(&mut nodes, 0);
        src.push_back(&mut nodes, 1);

        let mut empty = List::new();
        src.migrate(&mut nodes, &mut empty);
        assert_eq!(src.len(), 2);

        dst.migrate(&mut nodes, &mut src);
        assert_eq!(collect(&dst, &nodes), vec![0, 1]);
        assert_eq!(dst.back(), Some(1));
    }

    #[test]
    fn contains_checks_this_list_only() {
        let mut nodes = links(3);
        let mut a = List::new();
        let mut b = List::new();
        a.push_back(&mut nodes, 0);
        b.push_back(&mut nodes, 1);
        assert!(a.contains(&nodes, 0));
        assert!(!a.contains(&nodes, 1));
        assert!(!a.contains(&nodes, 2));
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn double_insert_panics() {
        let mut nodes = links(1);
        let mut a = List::new();
        let mut b = List::new();
        a.push_back(&mut nodes, 0);
        b.push_back(&mut nodes, 0);
    }

    #[test]
    #[should_panic(expected = "belongs to another list")]
    fn erase_foreign_head_panics() {
        let mut nodes = links(2);
        let mut a = List::new();
        let mut b = List::new();
        a.push_back(&mut nodes, 0);
        b.push_back(&mut nodes, 1);
        a.erase(&mut nodes, 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "belongs to another list")]
    fn erase_foreign_middle_panics() {
        let mut nodes = links(5);
        let mut a = List::new();
        let mut b = List::new();
        a.push_back(&mut nodes, 0);
        a.push_back(&mut nodes, 1);
        for id in 2..5 {
            b.push_back(&mut nodes, id);
        }
        a.erase(&mut nodes, 3);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "belongs to another list")]
    fn insert_after_foreign_anchor_panics() {
        let mut nodes = links(3);
        let mut a = List::new();
        let mut b = List::new();
        a.push_back(&mut nodes, 0);
        b.push_back(&mut nodes, 1);
        a.insert_after(&mut nodes, 1, 2);
    }

    #[test]
    fn migrated_nodes_belong_to_destination() {
        let mut nodes = links(4);
        let mut dst = List::new();
        let mut src = List::new();
        dst.push_back(&mut nodes, 0);
        for id in 1..4 {
            src.push_back(&mut nodes, id);
        }
        dst.migrate(&mut nodes, &mut src);
        dst.erase(&mut nodes, 2);
        dst.insert_before(&mut nodes, 3, 2);
        assert_eq!(collect(&dst, &nodes), vec![0, 1, 2, 3]);

        // The emptied source keeps working with fresh members.
        assert_eq!(dst.pop_front(&mut nodes), Some(0));
        src.push_back(&mut nodes, 0);
        let back = dst.pop_back(&mut nodes).unwrap();
        src.insert_after(&mut nodes, 0, back);
        assert_eq!(collect(&src, &nodes), vec![0, 3]);
    }

    #[test]
    #[should_panic(expected = "not linked")]
    fn erase_unlinked_panics() {
        let mut nodes = links(1);
        let mut list = List::new();
        list.erase(&mut nodes, 0);
    }

    #[test]
    fn slab_owner_records() {
        struct Owner {
            value: u32,
            link: ListLink,
        }
        impl ListEntry for Owner {
            fn list_link(&self) -> &ListLink {
                &self.link
            }
            fn list_link_mut(&mut self) -> &mut ListLink {
                &mut self.link
            }
        }

        let mut slab = Slab::new();
        let mut list = List::new();
        for value in [10, 20, 30] {
            let id = slab.insert(Owner {
                value,
                link: ListLink::new(),
            });
            list.push_back(&mut slab, id);
        }
        let sum: u32 = list.iter(&slab).map(|id| slab[id].value).sum();
        assert_eq!(sum, 60);
    }
}
