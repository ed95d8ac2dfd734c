use crate::{simd, ItemId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node inside a [`NodePool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[inline]
    fn shifted(self, offset: usize) -> Self {
        NodeId(self.0 + offset)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Oriented hyperplane `dot(normal, x) + offset = 0`.
///
/// Points with a positive margin fall on the right side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperplane {
    normal: Vec<f32>,
    offset: f32,
}

impl Hyperplane {
    pub fn new(normal: Vec<f32>, offset: f32) -> Self {
        Self { normal, offset }
    }

    /// All-zero plane used for forced splits; every margin is 0.
    pub fn degenerate(dim: usize) -> Self {
        Self {
            normal: vec![0.0; dim],
            offset: 0.0,
        }
    }

    #[inline]
    pub fn margin(&self, v: &[f32]) -> f32 {
        simd::dot(&self.normal, v) + self.offset
    }

    #[inline]
    pub fn normal(&self) -> &[f32] {
        &self.normal
    }

    #[inline]
    pub fn offset(&self) -> f32 {
        self.offset
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.normal.len()
    }

    pub fn is_degenerate(&self) -> bool {
        self.offset == 0.0 && self.normal.iter().all(|x| *x == 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        items: Vec<ItemId>,
    },
    Split {
        hyperplane: Hyperplane,
        left: NodeId,
        right: NodeId,
    },
}

impl Node {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    fn shifted(self, offset: usize) -> Self {
        match self {
            Node::Leaf { items } => Node::Leaf { items },
            Node::Split {
                hyperplane,
                left,
                right,
            } => Node::Split {
                hyperplane,
                left: left.shifted(offset),
                right: right.shifted(offset),
            },
        }
    }
}

/// Append-only arena holding the nodes of every tree in a forest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePool {
    nodes: Vec<Node>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Move every node of `other` to the end of this pool.
    ///
    /// Child references inside `other` are rebased; `root` (an id local to
    /// `other`) is returned translated into this pool.
    pub fn append(&mut self, other: NodePool, root: NodeId) -> NodeId {
        let offset = self.nodes.len();
        self.nodes
            .extend(other.nodes.into_iter().map(|node| node.shifted(offset)));
        root.shifted(offset)
    }

    /// Nodes reachable from `root`, in depth-first order.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(Node::Split { left, right, .. }) = self.get(id) {
                stack.push(*right);
                stack.push(*left);
            }
        }
        out
    }

    /// Item ids of every leaf below `root`, left to right.
    pub fn leaf_items(&self, root: NodeId) -> Vec<ItemId> {
        self.descendants(root)
            .into_iter()
            .filter_map(|id| match self.get(id) {
                Some(Node::Leaf { items }) => Some(items.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(items: &[ItemId]) -> Node {
        Node::Leaf {
            items: items.to_vec(),
        }
    }

    #[test]
    fn test_push_returns_sequential_ids() {
        let mut pool = NodePool::new();
        assert_eq!(pool.push(leaf(&[1])).index(), 0);
        assert_eq!(pool.push(leaf(&[2])).index(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_append_rebases_children() {
        let mut shared = NodePool::new();
        shared.push(leaf(&[100]));

        let mut local = NodePool::new();
        let l = local.push(leaf(&[1, 2]));
        let r = local.push(leaf(&[3]));
        let root = local.push(Node::Split {
            hyperplane: Hyperplane::degenerate(2),
            left: l,
            right: r,
        });

        let root = shared.append(local, root);
        assert_eq!(root.index(), 3);
        match shared.get(root) {
            Some(Node::Split { left, right, .. }) => {
                assert_eq!(left.index(), 1);
                assert_eq!(right.index(), 2);
            }
            other => panic!("expected split node, got {other:?}"),
        }
        assert_eq!(shared.leaf_items(root), vec![1, 2, 3]);
    }

    #[test]
    fn test_degenerate_plane() {
        let plane = Hyperplane::degenerate(3);
        assert!(plane.is_degenerate());
        assert_eq!(plane.margin(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(plane.dim(), 3);
    }
}
