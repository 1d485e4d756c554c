use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Address of a node on the bus. Always within `[1, 127]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

impl NodeId {
    pub const MIN: NodeId = NodeId(1);
    pub const MAX: NodeId = NodeId(127);

    /// Returns `None` for 0 (broadcast/unset) and anything above 127.
    pub const fn new(raw: u8) -> Option<NodeId> {
        if raw >= Self::MIN.0 && raw <= Self::MAX.0 {
            Some(NodeId(raw))
        } else {
            None
        }
    }

    /// Like [`NodeId::new`] but accepts the wider integers found in legacy messages.
    pub fn from_wide(raw: i64) -> Option<NodeId> {
        u8::try_from(raw).ok().and_then(NodeId::new)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Every valid address at or above `self`, ascending.
    pub fn upward(self) -> impl Iterator<Item = NodeId> {
        (self.0..=Self::MAX.0).map(NodeId)
    }

    /// The next address, or `None` past 127.
    pub fn successor(self) -> Option<NodeId> {
        NodeId::new(self.0 + 1)
    }
}

impl TryFrom<u8> for NodeId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value).ok_or_else(|| format!("node id {value} is outside [1, 127]"))
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed table with one slot per addressable node.
///
/// Indexing takes a [`NodeId`], so the bounds are checked where the address
/// is constructed rather than at every lookup.
#[derive(Debug, Clone)]
pub struct NodeTable<T> {
    slots: [T; NodeId::MAX.0 as usize + 1],
}

impl<T: Copy + Default> NodeTable<T> {
    pub fn new() -> Self {
        Self {
            slots: [T::default(); NodeId::MAX.0 as usize + 1],
        }
    }

    pub fn clear(&mut self) {
        self.slots = [T::default(); NodeId::MAX.0 as usize + 1];
    }
}

impl<T: Copy + Default> Default for NodeTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<NodeId> for NodeTable<T> {
    type Output = T;

    fn index(&self, node: NodeId) -> &T {
        &self.slots[node.0 as usize]
    }
}

impl<T> IndexMut<NodeId> for NodeTable<T> {
    fn index_mut(&mut self, node: NodeId) -> &mut T {
        &mut self.slots[node.0 as usize]
    }
}
