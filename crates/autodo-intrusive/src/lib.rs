// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Intrusive containers over index arenas.
//!
//! Link fields live inside the owner records, which are stored in an arena
//! (usually a `slab::Slab`). Containers hold only indices: they never own
//! node memory, and a node index stays valid until the owner is removed
//! from its arena.
//!
//! Components:
//! - `list`: doubly linked list with O(1) splice (`migrate`)
//! - `map`: red-black tree ordered by a caller-supplied comparator
//!
//! Neither container does any locking. They are meant to be touched from a
//! single thread (the scheduler thread in `autodo-rt`).

pub mod list;
pub mod map;

pub use list::{List, ListEntry, ListLink, ListNodes};
pub use map::{Comparator, InvariantError, Map, MapEntry, MapLink, MapNodes};

/// Index of an owner record inside its arena.
pub type NodeId = usize;
