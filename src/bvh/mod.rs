//! Arena-backed binary BVH.
//!
//! Nodes live in a flat `Vec` and reference each other through [`NodeHandle`]s.
//! Rewriting a subtree overwrites the node at its root handle and appends any
//! new descendants; nodes that drop out of the tree stay in the arena but are
//! never reached from the root again. [`Bvh::compact`] drops them.
//!
//! ```text
//!            root (internal, triangle_count = 0)
//!           /    \
//!      internal   leaf (triangle_offset, triangle_count > 0)
//!       /    \
//!    leaf    leaf
//! ```

pub mod io;

use crate::util::{Aabb, Error, Result};

/// Stable index of a node in a [`Bvh`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeHandle(pub u32);

impl NodeHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Internal node or leaf.
///
/// Internal: `children = Some([left, right])`, `triangle_count = 0`.
/// Leaf: `children = None`, `triangle_offset..triangle_offset + triangle_count`
/// addresses the externally owned triangle buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub children: Option<[NodeHandle; 2]>,
    pub triangle_offset: u32,
    pub triangle_count: u32,
}

impl BvhNode {
    pub fn leaf(bounds: Aabb, triangle_offset: u32, triangle_count: u32) -> Self {
        Self {
            bounds,
            children: None,
            triangle_offset,
            triangle_count,
        }
    }

    pub fn internal(bounds: Aabb, left: NodeHandle, right: NodeHandle) -> Self {
        Self {
            bounds,
            children: Some([left, right]),
            triangle_offset: 0,
            triangle_count: 0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Binary BVH stored as a node arena plus a root handle.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    root: NodeHandle,
}

impl Bvh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            root: NodeHandle(0),
        }
    }

    /// Single-leaf tree.
    pub fn leaf(bounds: Aabb, triangle_offset: u32, triangle_count: u32) -> Self {
        let mut bvh = Self::with_capacity(1);
        let root = bvh.push_leaf(bounds, triangle_offset, triangle_count);
        bvh.set_root(root);
        bvh
    }

    /// Append a raw node and return its handle.
    pub fn push(&mut self, node: BvhNode) -> NodeHandle {
        let handle = NodeHandle(self.nodes.len() as u32);
        self.nodes.push(node);
        handle
    }

    pub fn push_leaf(&mut self, bounds: Aabb, triangle_offset: u32, triangle_count: u32) -> NodeHandle {
        self.push(BvhNode::leaf(bounds, triangle_offset, triangle_count))
    }

    /// Append an internal node whose bounds are the union of its children.
    pub fn push_internal(&mut self, left: NodeHandle, right: NodeHandle) -> NodeHandle {
        let bounds = [left, right]
            .into_iter()
            .filter_map(|child| self.get(child))
            .fold(Aabb::EMPTY, |acc, node| acc.union(&node.bounds));
        self.push(BvhNode::internal(bounds, left, right))
    }

    #[inline]
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn set_root(&mut self, root: NodeHandle) {
        self.root = root;
    }

    #[inline]
    pub fn get(&self, handle: NodeHandle) -> Option<&BvhNode> {
        self.nodes.get(handle.index())
    }

    #[inline]
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut BvhNode> {
        self.nodes.get_mut(handle.index())
    }

    /// Arena size, including unreachable nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Drop all nodes, keeping the allocation.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = NodeHandle(0);
    }

    /// Pre-order walk from `start`, left child before right.
    ///
    /// Yields `(handle, depth, node)`. Dangling handles are skipped and the walk
    /// stops after `len()` nodes, so a corrupted arena cannot loop forever.
    pub fn walk(&self, start: NodeHandle) -> PreOrder<'_> {
        PreOrder {
            bvh: self,
            stack: vec![(start, 0)],
            budget: self.nodes.len(),
        }
    }

    /// Number of nodes reachable from the root.
    pub fn reachable_count(&self) -> usize {
        self.walk(self.root).count()
    }

    /// Number of leaves under `start`.
    pub fn leaf_count(&self, start: NodeHandle) -> usize {
        self.walk(start).filter(|(_, _, n)| n.is_leaf()).count()
    }

    /// Total triangles referenced by leaves under `start`.
    pub fn triangle_count(&self, start: NodeHandle) -> u64 {
        self.walk(start)
            .filter(|(_, _, n)| n.is_leaf())
            .map(|(_, _, n)| n.triangle_count as u64)
            .sum()
    }

    /// Depth of the deepest node under `start` (a lone leaf has depth 0).
    pub fn depth(&self, start: NodeHandle) -> usize {
        self.walk(start).map(|(_, d, _)| d).max().unwrap_or(0)
    }

    /// Leaf handles under `start` in left-to-right order.
    pub fn leaves(&self, start: NodeHandle) -> Vec<NodeHandle> {
        self.walk(start)
            .filter(|(_, _, n)| n.is_leaf())
            .map(|(h, _, _)| h)
            .collect()
    }

    /// Check the structural contract of the reachable tree.
    ///
    /// Every handle must resolve, no node may be reachable twice, bounds must be
    /// ordered, leaves must own at least one triangle and internal nodes none.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::EmptyTree);
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];

        while let Some(handle) = stack.pop() {
            let node = self.get(handle).ok_or(Error::InvalidHandle(handle.0))?;
            if std::mem::replace(&mut seen[handle.index()], true) {
                return Err(Error::CyclicTree);
            }
            if !node.bounds.is_valid() {
                return Err(Error::malformed(handle.0, "bounds min exceeds max"));
            }
            match node.children {
                Some([left, right]) => {
                    if node.triangle_count != 0 {
                        return Err(Error::malformed(handle.0, "internal node with triangles"));
                    }
                    stack.push(right);
                    stack.push(left);
                }
                None => {
                    if node.triangle_count == 0 {
                        return Err(Error::malformed(handle.0, "leaf without triangles"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Rebuild the arena with only reachable nodes, in pre-order.
    pub fn compact(&self) -> Bvh {
        let mut out = Bvh::with_capacity(self.reachable_count());
        let mut remap = vec![u32::MAX; self.nodes.len()];

        for (handle, _, node) in self.walk(self.root) {
            remap[handle.index()] = out.nodes.len() as u32;
            out.nodes.push(*node);
        }
        for node in &mut out.nodes {
            if let Some([l, r]) = node.children {
                node.children = Some([NodeHandle(remap[l.index()]), NodeHandle(remap[r.index()])]);
            }
        }
        out.root = NodeHandle(0);
        out
    }
}

/// Pre-order iterator returned by [`Bvh::walk`].
pub struct PreOrder<'a> {
    bvh: &'a Bvh,
    stack: Vec<(NodeHandle, usize)>,
    budget: usize,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (NodeHandle, usize, &'a BvhNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((handle, depth)) = self.stack.pop() {
            if self.budget == 0 {
                self.stack.clear();
                return None;
            }
            let Some(node) = self.bvh.get(handle) else {
                continue;
            };
            self.budget -= 1;
            if let Some([left, right]) = node.children {
                self.stack.push((right, depth + 1));
                self.stack.push((left, depth + 1));
            }
            return Some((handle, depth, node));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32) -> Aabb {
        Aabb::from_arrays([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
    }

    /// ((a, b), c)
    fn small_tree() -> Bvh {
        let mut bvh = Bvh::new();
        let a = bvh.push_leaf(unit_box(0.0), 0, 2);
        let b = bvh.push_leaf(unit_box(2.0), 2, 1);
        let c = bvh.push_leaf(unit_box(4.0), 3, 3);
        let ab = bvh.push_internal(a, b);
        let root = bvh.push_internal(ab, c);
        bvh.set_root(root);
        bvh
    }

    #[test]
    fn test_counts() {
        let bvh = small_tree();
        assert_eq!(bvh.reachable_count(), 5);
        assert_eq!(bvh.leaf_count(bvh.root()), 3);
        assert_eq!(bvh.triangle_count(bvh.root()), 6);
        assert_eq!(bvh.depth(bvh.root()), 2);
    }

    #[test]
    fn test_internal_bounds_are_union() {
        let bvh = small_tree();
        let root = bvh.get(bvh.root()).unwrap();
        assert_eq!(root.bounds.min.x, 0.0);
        assert_eq!(root.bounds.max.x, 5.0);
        assert_eq!(root.triangle_count, 0);
    }

    #[test]
    fn test_leaves_in_order() {
        let bvh = small_tree();
        let offsets: Vec<u32> = bvh
            .leaves(bvh.root())
            .into_iter()
            .map(|h| bvh.get(h).unwrap().triangle_offset)
            .collect();
        assert_eq!(offsets, vec![0, 2, 3]);
    }

    #[test]
    fn test_validate_ok() {
        small_tree().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_shared_child() {
        let mut bvh = Bvh::new();
        let a = bvh.push_leaf(unit_box(0.0), 0, 1);
        let root = bvh.push_internal(a, a);
        bvh.set_root(root);
        assert!(matches!(bvh.validate(), Err(Error::CyclicTree)));
    }

    #[test]
    fn test_validate_rejects_dangling_handle() {
        let mut bvh = Bvh::new();
        let a = bvh.push_leaf(unit_box(0.0), 0, 1);
        let root = bvh.push_internal(a, NodeHandle(99));
        bvh.set_root(root);
        assert!(matches!(bvh.validate(), Err(Error::InvalidHandle(99))));
    }

    #[test]
    fn test_validate_rejects_empty_leaf() {
        let bvh = Bvh::leaf(unit_box(0.0), 0, 0);
        assert!(matches!(bvh.validate(), Err(Error::MalformedNode { .. })));
    }

    #[test]
    fn test_walk_terminates_on_cycle() {
        let mut bvh = Bvh::new();
        let a = bvh.push_leaf(unit_box(0.0), 0, 1);
        let root = bvh.push_internal(a, NodeHandle(1));
        bvh.set_root(root);
        // root's right child is itself
        assert!(bvh.walk(root).count() <= bvh.len());
    }

    #[test]
    fn test_compact_drops_unreachable() {
        let mut bvh = small_tree();
        bvh.push_leaf(unit_box(10.0), 9, 1);
        assert_eq!(bvh.len(), 6);

        let compact = bvh.compact();
        assert_eq!(compact.len(), 5);
        assert_eq!(compact.root(), NodeHandle(0));
        compact.validate().unwrap();
        assert_eq!(compact.triangle_count(compact.root()), 6);
    }
}
