// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Intrusive ordered map (red-black tree).
//!
//! Owner records embed a [`MapLink`] and expose a key through [`MapNodes`].
//! Ordering comes from the comparator given to [`Map::new`], never from the
//! node. The comparator must be a strict total order over every key that is
//! a member, and a member's key must not change while it is linked.
//!
//! Comparator sign convention follows `cmp(node, key)`: `Less` means the
//! member sorts before the probe, `Greater` after it.
//!
//! Links are arena indices with a separate color field. Searching,
//! insertion and removal are O(log n); `next`/`prev` walk parent links.

use std::cmp::Ordering;
use std::fmt;

use slab::Slab;
use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

/// Link fields embedded in a map member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLink {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    color: Color,
    linked: bool,
}

impl MapLink {
    /// An unlinked node.
    pub const fn new() -> Self {
        Self {
            parent: None,
            left: None,
            right: None,
            color: Color::Red,
            linked: false,
        }
    }

    /// Whether the owner currently belongs to some map.
    pub const fn is_linked(&self) -> bool {
        self.linked
    }
}

impl Default for MapLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena access to embedded map links and the keys they are ordered by.
pub trait MapNodes {
    type Key: ?Sized;

    fn map_link(&self, id: NodeId) -> &MapLink;
    fn map_link_mut(&mut self, id: NodeId) -> &mut MapLink;
    fn map_key(&self, id: NodeId) -> &Self::Key;
}

/// An owner record that embeds a [`MapLink`].
///
/// Implementing this makes `Slab<T>` usable as a [`MapNodes`] arena.
pub trait MapEntry {
    type Key: ?Sized;

    fn map_link(&self) -> &MapLink;
    fn map_link_mut(&mut self) -> &mut MapLink;
    fn map_key(&self) -> &Self::Key;
}

impl<T: MapEntry> MapNodes for Slab<T> {
    type Key = T::Key;

    fn map_link(&self, id: NodeId) -> &MapLink {
        self[id].map_link()
    }

    fn map_link_mut(&mut self, id: NodeId) -> &mut MapLink {
        self[id].map_link_mut()
    }

    fn map_key(&self, id: NodeId) -> &T::Key {
        self[id].map_key()
    }
}

/// Ordering closure. Any user argument is captured by the closure.
pub type Comparator<K> = Box<dyn Fn(&K, &K) -> Ordering>;

/// A broken red-black invariant, reported by [`Map::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("root node {0} is red")]
    RedRoot(NodeId),
    #[error("red node {0} has a red child")]
    RedChild(NodeId),
    #[error("node {0} has an inconsistent parent link")]
    BrokenParent(NodeId),
    #[error("black height differs below node {0}")]
    BlackHeight(NodeId),
    #[error("node {0} is out of order")]
    OutOfOrder(NodeId),
    #[error("map records {recorded} nodes but holds {actual}")]
    Length { recorded: usize, actual: usize },
}

/// Red-black tree over an external arena.
pub struct Map<K: ?Sized> {
    root: Option<NodeId>,
    len: usize,
    cmp: Comparator<K>,
}

impl<K: ?Sized> fmt::Debug for Map<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("root", &self.root)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<K: Ord + ?Sized + 'static> Map<K> {
    /// A map ordered by `K`'s own `Ord`.
    pub fn ordered() -> Self {
        Self::new(|a: &K, b: &K| a.cmp(b))
    }
}

impl<K: ?Sized> Map<K> {
    /// Creates an empty map ordered by `cmp(node, key)`.
    pub fn new(cmp: impl Fn(&K, &K) -> Ordering + 'static) -> Self {
        Self {
            root: None,
            len: 0,
            cmp: Box::new(cmp),
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `id` into the tree.
    ///
    /// Returns `None` on success. If a member with an equal key exists, it is
    /// returned and the tree is left untouched; use [`Map::replace`] to
    /// overwrite.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already a member of any map.
    pub fn insert<N>(&mut self, nodes: &mut N, id: NodeId) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        assert!(!nodes.map_link(id).linked, "map node {id} is already linked");
        match self.locate(nodes, nodes.map_key(id)) {
            Ok(existing) => Some(existing),
            Err((parent, go_left)) => {
                self.link_at(nodes, id, parent, go_left);
                None
            }
        }
    }

    /// Links `id`, unlinking and returning any member with an equal key.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already a member of any map.
    pub fn replace<N>(&mut self, nodes: &mut N, id: NodeId) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        assert!(!nodes.map_link(id).linked, "map node {id} is already linked");
        match self.locate(nodes, nodes.map_key(id)) {
            Ok(old) => {
                let link = nodes.map_link(old).clone();
                self.replace_child(nodes, link.parent, old, Some(id));
                if let Some(l) = link.left {
                    nodes.map_link_mut(l).parent = Some(id);
                }
                if let Some(r) = link.right {
                    nodes.map_link_mut(r).parent = Some(id);
                }
                *nodes.map_link_mut(id) = link;
                *nodes.map_link_mut(old) = MapLink::new();
                Some(old)
            }
            Err((parent, go_left)) => {
                self.link_at(nodes, id, parent, go_left);
                None
            }
        }
    }

    /// Unlinks a member.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not linked.
    pub fn erase<N>(&mut self, nodes: &mut N, id: NodeId)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        let link = nodes.map_link(id).clone();
        assert!(link.linked, "map node {id} is not linked");
        debug_assert!(
            link.parent.is_some() || self.root == Some(id),
            "map node {id} belongs to another map"
        );

        let (x, x_parent, removed) = match (link.left, link.right) {
            (None, child) | (child, None) => {
                self.transplant(nodes, id, child);
                (child, link.parent, link.color)
            }
            (Some(zl), Some(zr)) => {
                let y = minimum(nodes, zr);
                let y_link = nodes.map_link(y).clone();
                let x_parent = if y == zr {
                    Some(y)
                } else {
                    self.transplant(nodes, y, y_link.right);
                    nodes.map_link_mut(y).right = Some(zr);
                    nodes.map_link_mut(zr).parent = Some(y);
                    y_link.parent
                };
                self.transplant(nodes, id, Some(y));
                nodes.map_link_mut(y).left = Some(zl);
                nodes.map_link_mut(zl).parent = Some(y);
                nodes.map_link_mut(y).color = link.color;
                (y_link.right, x_parent, y_link.color)
            }
        };

        if removed == Color::Black {
            self.erase_fixup(nodes, x, x_parent);
        }
        *nodes.map_link_mut(id) = MapLink::new();
        self.len -= 1;
    }

    /// A member comparing equal to `key`.
    pub fn find<N>(&self, nodes: &N, key: &K) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        self.find_by(nodes, |k| (self.cmp)(k, key))
    }

    /// First member with `cmp(node, key) >= 0`, or `end()`.
    pub fn find_lower<N>(&self, nodes: &N, key: &K) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        self.find_lower_by(nodes, |k| (self.cmp)(k, key))
    }

    /// First member with `cmp(node, key) > 0`, or `end()`.
    pub fn find_upper<N>(&self, nodes: &N, key: &K) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        self.find_upper_by(nodes, |k| (self.cmp)(k, key))
    }

    /// Like [`Map::find`], with a probe closure returning the ordering of a
    /// member's key relative to the probe. The probe must agree with the
    /// map's ordering.
    pub fn find_by<N, F>(&self, nodes: &N, mut probe: F) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
        F: FnMut(&K) -> Ordering,
    {
        let mut cur = self.root;
        while let Some(c) = cur {
            cur = match probe(nodes.map_key(c)) {
                Ordering::Greater => left_of(nodes, c),
                Ordering::Less => right_of(nodes, c),
                Ordering::Equal => return Some(c),
            };
        }
        None
    }

    /// First member the probe does not order before the probe key.
    pub fn find_lower_by<N, F>(&self, nodes: &N, mut probe: F) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
        F: FnMut(&K) -> Ordering,
    {
        let mut found = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            if probe(nodes.map_key(c)) == Ordering::Less {
                cur = right_of(nodes, c);
            } else {
                found = Some(c);
                cur = left_of(nodes, c);
            }
        }
        found
    }

    /// First member the probe orders strictly after the probe key.
    pub fn find_upper_by<N, F>(&self, nodes: &N, mut probe: F) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
        F: FnMut(&K) -> Ordering,
    {
        let mut found = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            if probe(nodes.map_key(c)) == Ordering::Greater {
                found = Some(c);
                cur = left_of(nodes, c);
            } else {
                cur = right_of(nodes, c);
            }
        }
        found
    }

    /// Smallest member, or `end()` if empty.
    pub fn begin<N>(&self, nodes: &N) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        self.root.map(|r| minimum(nodes, r))
    }

    /// One past the largest member. Never a real node.
    pub const fn end(&self) -> Option<NodeId> {
        None
    }

    /// Largest member.
    pub fn back<N>(&self, nodes: &N) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        self.root.map(|r| maximum(nodes, r))
    }

    /// In-order successor of `id`, or `end()`.
    pub fn next<N>(&self, nodes: &N, id: NodeId) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        successor(nodes, id)
    }

    /// In-order predecessor of `id`, or `None` at the smallest member.
    pub fn prev<N>(&self, nodes: &N, id: NodeId) -> Option<NodeId>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        if let Some(l) = left_of(nodes, id) {
            return Some(maximum(nodes, l));
        }
        let mut cur = id;
        while let Some(p) = parent_of(nodes, cur) {
            if right_of(nodes, p) == Some(cur) {
                return Some(p);
            }
            cur = p;
        }
        None
    }

    /// In-order iteration over member ids.
    pub fn iter<'a, N>(&self, nodes: &'a N) -> Iter<'a, N>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        Iter {
            nodes,
            cur: self.begin(nodes),
        }
    }

    /// Checks every red-black and ordering invariant.
    ///
    /// Returns the black height of the tree. O(n); meant for tests and
    /// debugging.
    pub fn validate<N>(&self, nodes: &N) -> Result<usize, InvariantError>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        let Some(root) = self.root else {
            if self.len != 0 {
                return Err(InvariantError::Length {
                    recorded: self.len,
                    actual: 0,
                });
            }
            return Ok(0);
        };
        if color_of(nodes, root) == Color::Red {
            return Err(InvariantError::RedRoot(root));
        }
        if parent_of(nodes, root).is_some() {
            return Err(InvariantError::BrokenParent(root));
        }
        let mut count = 0;
        let height = check_subtree(nodes, root, &mut count)?;
        if count != self.len {
            return Err(InvariantError::Length {
                recorded: self.len,
                actual: count,
            });
        }

        let mut prev: Option<NodeId> = None;
        for id in self.iter(nodes) {
            if let Some(p) = prev {
                if (self.cmp)(nodes.map_key(p), nodes.map_key(id)) != Ordering::Less {
                    return Err(InvariantError::OutOfOrder(id));
                }
            }
            prev = Some(id);
        }
        Ok(height)
    }

    /// Finds the member equal to `key`, or the parent slot a new node with
    /// that key would hang from.
    fn locate<N>(&self, nodes: &N, key: &K) -> Result<NodeId, (Option<NodeId>, bool)>
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            parent = Some(c);
            match (self.cmp)(nodes.map_key(c), key) {
                Ordering::Greater => {
                    go_left = true;
                    cur = left_of(nodes, c);
                }
                Ordering::Less => {
                    go_left = false;
                    cur = right_of(nodes, c);
                }
                Ordering::Equal => return Ok(c),
            }
        }
        Err((parent, go_left))
    }

    fn link_at<N>(&mut self, nodes: &mut N, id: NodeId, parent: Option<NodeId>, go_left: bool)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        *nodes.map_link_mut(id) = MapLink {
            parent,
            left: None,
            right: None,
            color: Color::Red,
            linked: true,
        };
        match parent {
            None => self.root = Some(id),
            Some(p) if go_left => nodes.map_link_mut(p).left = Some(id),
            Some(p) => nodes.map_link_mut(p).right = Some(id),
        }
        self.len += 1;
        self.insert_fixup(nodes, id);
    }

    fn insert_fixup<N>(&mut self, nodes: &mut N, mut z: NodeId)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        while let Some(mut p) = parent_of(nodes, z) {
            if color_of(nodes, p) == Color::Black {
                break;
            }
            // A red node is never the root, so the grandparent exists.
            let Some(g) = parent_of(nodes, p) else {
                break;
            };
            if left_of(nodes, g) == Some(p) {
                match right_of(nodes, g) {
                    Some(u) if color_of(nodes, u) == Color::Red => {
                        set_color(nodes, p, Color::Black);
                        set_color(nodes, u, Color::Black);
                        set_color(nodes, g, Color::Red);
                        z = g;
                    }
                    _ => {
                        if right_of(nodes, p) == Some(z) {
                            self.rotate_left(nodes, p);
                            std::mem::swap(&mut z, &mut p);
                        }
                        set_color(nodes, p, Color::Black);
                        set_color(nodes, g, Color::Red);
                        self.rotate_right(nodes, g);
                    }
                }
            } else {
                match left_of(nodes, g) {
                    Some(u) if color_of(nodes, u) == Color::Red => {
                        set_color(nodes, p, Color::Black);
                        set_color(nodes, u, Color::Black);
                        set_color(nodes, g, Color::Red);
                        z = g;
                    }
                    _ => {
                        if left_of(nodes, p) == Some(z) {
                            self.rotate_right(nodes, p);
                            std::mem::swap(&mut z, &mut p);
                        }
                        set_color(nodes, p, Color::Black);
                        set_color(nodes, g, Color::Red);
                        self.rotate_left(nodes, g);
                    }
                }
            }
        }
        if let Some(root) = self.root {
            set_color(nodes, root, Color::Black);
        }
    }

    /// Restores black height after removing a black node. `x` took the
    /// removed node's place (possibly a null leaf) under `parent`.
    fn erase_fixup<N>(&mut self, nodes: &mut N, mut x: Option<NodeId>, mut parent: Option<NodeId>)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        while x != self.root && !is_red(nodes, x) {
            let Some(p) = parent else {
                break;
            };
            if left_of(nodes, p) == x {
                let Some(mut w) = right_of(nodes, p) else {
                    break;
                };
                if color_of(nodes, w) == Color::Red {
                    set_color(nodes, w, Color::Black);
                    set_color(nodes, p, Color::Red);
                    self.rotate_left(nodes, p);
                    let Some(sibling) = right_of(nodes, p) else {
                        break;
                    };
                    w = sibling;
                }
                if !is_red(nodes, left_of(nodes, w)) && !is_red(nodes, right_of(nodes, w)) {
                    set_color(nodes, w, Color::Red);
                    x = Some(p);
                    parent = parent_of(nodes, p);
                } else {
                    if !is_red(nodes, right_of(nodes, w)) {
                        if let Some(wl) = left_of(nodes, w) {
                            set_color(nodes, wl, Color::Black);
                        }
                        set_color(nodes, w, Color::Red);
                        self.rotate_right(nodes, w);
                        let Some(sibling) = right_of(nodes, p) else {
                            break;
                        };
                        w = sibling;
                    }
                    set_color(nodes, w, color_of(nodes, p));
                    set_color(nodes, p, Color::Black);
                    if let Some(wr) = right_of(nodes, w) {
                        set_color(nodes, wr, Color::Black);
                    }
                    self.rotate_left(nodes, p);
                    x = self.root;
                    break;
                }
            } else {
                let Some(mut w) = left_of(nodes, p) else {
                    break;
                };
                if color_of(nodes, w) == Color::Red {
                    set_color(nodes, w, Color::Black);
                    set_color(nodes, p, Color::Red);
                    self.rotate_right(nodes, p);
                    let Some(sibling) = left_of(nodes, p) else {
                        break;
                    };
                    w = sibling;
                }
                if !is_red(nodes, left_of(nodes, w)) && !is_red(nodes, right_of(nodes, w)) {
                    set_color(nodes, w, Color::Red);
                    x = Some(p);
                    parent = parent_of(nodes, p);
                } else {
                    if !is_red(nodes, left_of(nodes, w)) {
                        if let Some(wr) = right_of(nodes, w) {
                            set_color(nodes, wr, Color::Black);
                        }
                        set_color(nodes, w, Color::Red);
                        self.rotate_left(nodes, w);
                        let Some(sibling) = left_of(nodes, p) else {
                            break;
                        };
                        w = sibling;
                    }
                    set_color(nodes, w, color_of(nodes, p));
                    set_color(nodes, p, Color::Black);
                    if let Some(wl) = left_of(nodes, w) {
                        set_color(nodes, wl, Color::Black);
                    }
                    self.rotate_right(nodes, p);
                    x = self.root;
                    break;
                }
            }
        }
        if let Some(x) = x {
            set_color(nodes, x, Color::Black);
        }
    }

    fn rotate_left<N>(&mut self, nodes: &mut N, x: NodeId)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        let Some(y) = right_of(nodes, x) else {
            return;
        };
        let inner = left_of(nodes, y);
        nodes.map_link_mut(x).right = inner;
        if let Some(b) = inner {
            nodes.map_link_mut(b).parent = Some(x);
        }
        let xp = parent_of(nodes, x);
        nodes.map_link_mut(y).parent = xp;
        self.replace_child(nodes, xp, x, Some(y));
        nodes.map_link_mut(y).left = Some(x);
        nodes.map_link_mut(x).parent = Some(y);
    }

    fn rotate_right<N>(&mut self, nodes: &mut N, x: NodeId)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        let Some(y) = left_of(nodes, x) else {
            return;
        };
        let inner = right_of(nodes, y);
        nodes.map_link_mut(x).left = inner;
        if let Some(b) = inner {
            nodes.map_link_mut(b).parent = Some(x);
        }
        let xp = parent_of(nodes, x);
        nodes.map_link_mut(y).parent = xp;
        self.replace_child(nodes, xp, x, Some(y));
        nodes.map_link_mut(y).right = Some(x);
        nodes.map_link_mut(x).parent = Some(y);
    }

    /// Points `parent`'s link to `old` (or the root) at `new` instead.
    fn replace_child<N>(&mut self, nodes: &mut N, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        match parent {
            None => self.root = new,
            Some(p) => {
                let link = nodes.map_link_mut(p);
                if link.left == Some(old) {
                    link.left = new;
                } else {
                    link.right = new;
                }
            }
        }
    }

    /// Puts the subtree `v` where `u` hangs.
    fn transplant<N>(&mut self, nodes: &mut N, u: NodeId, v: Option<NodeId>)
    where
        N: MapNodes<Key = K> + ?Sized,
    {
        let up = parent_of(nodes, u);
        self.replace_child(nodes, up, u, v);
        if let Some(v) = v {
            nodes.map_link_mut(v).parent = up;
        }
    }
}

/// Iterator returned by [`Map::iter`].
pub struct Iter<'a, N: ?Sized> {
    nodes: &'a N,
    cur: Option<NodeId>,
}

impl<N: MapNodes + ?Sized> Iterator for Iter<'_, N> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = successor(self.nodes, id);
        Some(id)
    }
}

fn parent_of<N: MapNodes + ?Sized>(nodes: &N, id: NodeId) -> Option<NodeId> {
    nodes.map_link(id).parent
}

fn left_of<N: MapNodes + ?Sized>(nodes: &N, id: NodeId) -> Option<NodeId> {
    nodes.map_link(id).left
}

fn right_of<N: MapNodes + ?Sized>(nodes: &N, id: NodeId) -> Option<NodeId> {
    nodes.map_link(id).right
}

fn color_of<N: MapNodes + ?Sized>(nodes: &N, id: NodeId) -> Color {
    nodes.map_link(id).color
}

/// Null leaves are black.
fn is_red<N: MapNodes + ?Sized>(nodes: &N, id: Option<NodeId>) -> bool {
    id.is_some_and(|id| color_of(nodes, id) == Color::Red)
}

fn set_color<N: MapNodes + ?Sized>(nodes: &mut N, id: NodeId, color: Color) {
    nodes.map_link_mut(id).color = color;
}

fn minimum<N: MapNodes + ?Sized>(nodes: &N, mut id: NodeId) -> NodeId {
    while let Some(l) = left_of(nodes, id) {
        id = l;
    }
    id
}

fn maximum<N: MapNodes + ?Sized>(nodes: &N, mut id: NodeId) -> NodeId {
    while let Some(r) = right_of(nodes, id) {
        id = r;
    }
    id
}

fn successor<N: MapNodes + ?Sized>(nodes: &N, id: NodeId) -> Option<NodeId> {
    if let Some(r) = right_of(nodes, id) {
        return Some(minimum(nodes, r));
    }
    let mut cur = id;
    while let Some(p) = parent_of(nodes, cur) {
        if left_of(nodes, p) == Some(cur) {
            return Some(p);
        }
        cur = p;
    }
    None
}

/// Returns the black height of the subtree rooted at `id`.
fn check_subtree<N: MapNodes + ?Sized>(
    nodes: &N,
    id: NodeId,
    count: &mut usize,
) -> Result<usize, InvariantError> {
    *count += 1;
    let red = color_of(nodes, id) == Color::Red;
    let mut heights = [1usize; 2];
    for (slot, child) in [left_of(nodes, id), right_of(nodes, id)].into_iter().enumerate() {
        if let Some(c) = child {
            if parent_of(nodes, c) != Some(id) {
                return Err(InvariantError::BrokenParent(c));
            }
            if red && color_of(nodes, c) == Color::Red {
                return Err(InvariantError::RedChild(id));
            }
            heights[slot] = check_subtree(nodes, c, count)?;
        }
    }
    if heights[0] != heights[1] {
        return Err(InvariantError::BlackHeight(id));
    }
    Ok(heights[0] + usize::from(!red))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Entry {
        key: (u32, u32),
        link: MapLink,
    }

    impl MapEntry for Entry {
        type Key = (u32, u32);

        fn map_link(&self) -> &MapLink {
            &self.link
        }
        fn map_link_mut(&mut self) -> &mut MapLink {
            &mut self.link
        }
        fn map_key(&self) -> &(u32, u32) {
            &self.key
        }
    }

    fn entry(value: u32, seq: u32) -> Entry {
        Entry {
            key: (value, seq),
            link: MapLink::new(),
        }
    }

    fn keys(map: &Map<(u32, u32)>, slab: &Slab<Entry>) -> Vec<u32> {
        map.iter(slab).map(|id| slab[id].key.0).collect()
    }

    #[test]
    fn insert_find_erase() {
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        let mut ids = Vec::new();
        for v in [5, 1, 9, 3, 7] {
            let id = slab.insert(entry(v, 0));
            assert_eq!(map.insert(&mut slab, id), None);
            ids.push(id);
        }
        assert_eq!(map.len(), 5);
        assert_eq!(keys(&map, &slab), vec![1, 3, 5, 7, 9]);
        map.validate(&slab).unwrap();

        let found = map.find(&slab, &(7, 0)).unwrap();
        assert_eq!(slab[found].key, (7, 0));
        assert_eq!(map.find(&slab, &(4, 0)), None);

        map.erase(&mut slab, found);
        assert_eq!(map.find(&slab, &(7, 0)), None);
        assert!(!slab[found].link.is_linked());
        assert_eq!(keys(&map, &slab), vec![1, 3, 5, 9]);
        map.validate(&slab).unwrap();
    }

    #[test]
    fn insert_collision_leaves_tree_untouched() {
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        let a = slab.insert(entry(2, 0));
        let b = slab.insert(entry(2, 0));
        assert_eq!(map.insert(&mut slab, a), None);
        assert_eq!(map.insert(&mut slab, b), Some(a));
        assert_eq!(map.len(), 1);
        assert!(!slab[b].link.is_linked());
    }

    #[test]
    fn replace_swaps_equal_member() {
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        for v in 0..10 {
            let id = slab.insert(entry(v, 0));
            map.insert(&mut slab, id);
        }
        let old = map.find(&slab, &(4, 0)).unwrap();
        let new = slab.insert(entry(4, 0));
        assert_eq!(map.replace(&mut slab, new), Some(old));
        assert_eq!(map.find(&slab, &(4, 0)), Some(new));
        assert!(!slab[old].link.is_linked());
        assert_eq!(map.len(), 10);
        map.validate(&slab).unwrap();

        let fresh = slab.insert(entry(42, 0));
        assert_eq!(map.replace(&mut slab, fresh), None);
        assert_eq!(map.len(), 11);
    }

    #[test]
    fn lower_and_upper_bounds() {
        // Keys {1, 3, 3, 5}; the sequence number keeps the two 3s distinct.
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        for (v, seq) in [(3, 1), (1, 0), (5, 3), (3, 2)] {
            let id = slab.insert(entry(v, seq));
            map.insert(&mut slab, id);
        }
        let by_value = |v: u32| move |k: &(u32, u32)| k.0.cmp(&v);

        let lower3 = map.find_lower_by(&slab, by_value(3)).unwrap();
        assert_eq!(slab[lower3].key, (3, 1));
        let upper3 = map.find_upper_by(&slab, by_value(3)).unwrap();
        assert_eq!(slab[upper3].key, (5, 3));
        let lower4 = map.find_lower_by(&slab, by_value(4)).unwrap();
        assert_eq!(slab[lower4].key, (5, 3));
        assert_eq!(map.find_upper_by(&slab, by_value(10)), map.end());

        // Full-key searches use the map's own comparator.
        let lower = map.find_lower(&slab, &(3, 2)).unwrap();
        assert_eq!(slab[lower].key, (3, 2));
        let upper = map.find_upper(&slab, &(3, 2)).unwrap();
        assert_eq!(slab[upper].key, (5, 3));
        assert_eq!(map.find_upper(&slab, &(5, 3)), None);
    }

    #[test]
    fn traversal_both_directions() {
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        for v in [4, 2, 6, 1, 3, 5, 7] {
            let id = slab.insert(entry(v, 0));
            map.insert(&mut slab, id);
        }
        let mut forward = Vec::new();
        let mut cur = map.begin(&slab);
        while let Some(id) = cur {
            forward.push(slab[id].key.0);
            cur = map.next(&slab, id);
        }
        assert_eq!(forward, vec![1, 2, 3, 4, 5, 6, 7]);

        let mut backward = Vec::new();
        let mut cur = map.back(&slab);
        while let Some(id) = cur {
            backward.push(slab[id].key.0);
            cur = map.prev(&slab, id);
        }
        assert_eq!(backward, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn comparator_captures_user_argument() {
        let descending = true;
        let mut slab = Slab::new();
        let mut map: Map<(u32, u32)> = Map::new(move |a: &(u32, u32), b: &(u32, u32)| {
            if descending {
                b.cmp(a)
            } else {
                a.cmp(b)
            }
        });
        for v in [1, 3, 2] {
            let id = slab.insert(entry(v, 0));
            map.insert(&mut slab, id);
        }
        assert_eq!(keys(&map, &slab), vec![3, 2, 1]);
        map.validate(&slab).unwrap();
    }

    #[test]
    fn sequential_churn_stays_balanced() {
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        let mut ids = Vec::new();
        for v in 0..256 {
            let id = slab.insert(entry(v, 0));
            map.insert(&mut slab, id);
            ids.push(id);
        }
        let height = map.validate(&slab).unwrap();
        // n nodes give a black height of at most log2(n + 1), plus the null leaf.
        assert!(height <= 9, "black height {height}");

        for id in ids.iter().copied().filter(|id| id % 3 != 0) {
            map.erase(&mut slab, id);
            map.validate(&slab).unwrap();
        }
        assert_eq!(map.len(), ids.iter().filter(|id| *id % 3 == 0).count());
        for id in ids.iter().copied().filter(|id| id % 3 == 0) {
            map.erase(&mut slab, id);
        }
        assert!(map.is_empty());
        assert_eq!(map.begin(&slab), None);
        map.validate(&slab).unwrap();
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn double_insert_panics() {
        let mut slab = Slab::new();
        let mut a = Map::ordered();
        let mut b = Map::ordered();
        let id = slab.insert(entry(1, 0));
        a.insert(&mut slab, id);
        b.insert(&mut slab, id);
    }

    #[test]
    #[should_panic(expected = "not linked")]
    fn erase_unlinked_panics() {
        let mut slab = Slab::new();
        let mut map = Map::ordered();
        let id = slab.insert(entry(1, 0));
        map.erase(&mut slab, id);
    }
}
