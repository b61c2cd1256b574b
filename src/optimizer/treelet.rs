//! Treelet selection and candidate construction.
//!
//! All helpers here are bounded by depth or count caps and answer with an
//! empty/zero result instead of failing when a handle does not resolve.

use smallvec::SmallVec;

use crate::bvh::{Bvh, BvhNode, NodeHandle};
use crate::util::Aabb;

/// Treelet search does not look at nodes deeper than this.
pub const MAX_TRAVERSAL_DEPTH: usize = 25;
/// Recursion cap for leaf counting, visited marking and leaf extraction.
pub const MAX_COUNT_DEPTH: usize = 35;
/// Subtrees with more leaves than this are treated as too large to inspect.
pub const MAX_SUBTREE_LEAVES: usize = 100_000;

/// Leaf captured from a treelet, reused verbatim by the winning layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafRecord {
    pub handle: NodeHandle,
    pub bounds: Aabb,
    pub triangle_offset: u32,
    pub triangle_count: u32,
}

pub type LeafRecords = SmallVec<[LeafRecord; 16]>;

/// Leaves under `node`, stopping once `limit` is exceeded.
///
/// Returns at most `limit + 1`, so callers can compare against `limit`
/// without paying for huge subtrees. At most `bvh.len()` nodes are visited,
/// which bounds the work on arenas with cycles or shared subtrees.
pub fn count_leaves(bvh: &Bvh, node: NodeHandle, limit: usize) -> usize {
    fn count(bvh: &Bvh, node: NodeHandle, depth: usize, limit: usize, budget: &mut usize, acc: &mut usize) {
        if depth > MAX_COUNT_DEPTH || *acc > limit || *budget == 0 {
            return;
        }
        let Some(n) = bvh.get(node) else {
            return;
        };
        *budget -= 1;
        match n.children {
            None => *acc += 1,
            Some([l, r]) => {
                count(bvh, l, depth + 1, limit, budget, acc);
                count(bvh, r, depth + 1, limit, budget, acc);
            }
        }
    }
    let mut budget = bvh.len();
    let mut acc = 0;
    count(bvh, node, 0, limit, &mut budget, &mut acc);
    acc
}

/// Mark `node` and its subtree as claimed by a treelet.
///
/// Already-claimed nodes are not descended into again.
pub fn mark_visited(bvh: &Bvh, node: NodeHandle, depth: usize, visited: &mut [bool]) {
    if depth > MAX_COUNT_DEPTH {
        return;
    }
    let Some(n) = bvh.get(node) else {
        return;
    };
    match visited.get_mut(node.index()) {
        Some(slot) if !*slot => *slot = true,
        _ => return,
    }
    if let Some([l, r]) = n.children {
        mark_visited(bvh, l, depth + 1, visited);
        mark_visited(bvh, r, depth + 1, visited);
    }
}

/// Leaf records under `root` in left-to-right order, at most `limit + 1`.
///
/// A subtree that is not a plain tree (a node reached twice, or the depth
/// cap hit) yields no records, so it is never rewritten.
pub fn extract_leaves(bvh: &Bvh, root: NodeHandle, limit: usize) -> LeafRecords {
    struct Scan {
        seen: SmallVec<[NodeHandle; 32]>,
        out: LeafRecords,
        broken: bool,
    }

    fn collect(bvh: &Bvh, node: NodeHandle, depth: usize, limit: usize, scan: &mut Scan) {
        if scan.broken || scan.out.len() > limit {
            return;
        }
        if depth > MAX_COUNT_DEPTH || scan.seen.contains(&node) {
            scan.broken = true;
            return;
        }
        let Some(n) = bvh.get(node) else {
            return;
        };
        scan.seen.push(node);
        match n.children {
            None => scan.out.push(LeafRecord {
                handle: node,
                bounds: n.bounds,
                triangle_offset: n.triangle_offset,
                triangle_count: n.triangle_count,
            }),
            Some([l, r]) => {
                collect(bvh, l, depth + 1, limit, scan);
                collect(bvh, r, depth + 1, limit, scan);
            }
        }
    }

    let mut scan = Scan {
        seen: SmallVec::new(),
        out: LeafRecords::new(),
        broken: false,
    };
    collect(bvh, root, 0, limit, &mut scan);
    if scan.broken {
        tracing::debug!("treelet {}: not a plain tree, skipping", root.0);
        return LeafRecords::new();
    }
    scan.out
}

/// Whether the subtree at `node` is worth re-arranging.
///
/// Accepts when any one signal holds: children are reasonably balanced
/// (min/max leaf ratio above 0.3), the treelet has 5..=9 leaves, or the mean
/// leaf surface area is below twice the subtree's own surface area.
pub fn evaluate_treelet_quality(bvh: &Bvh, node: NodeHandle, leaf_count: usize) -> bool {
    let Some(n) = bvh.get(node) else {
        return false;
    };
    let Some([l, r]) = n.children else {
        return false;
    };

    let left = count_leaves(bvh, l, MAX_SUBTREE_LEAVES) as f32;
    let right = count_leaves(bvh, r, MAX_SUBTREE_LEAVES) as f32;
    let balance_ratio = if left.max(right) > 0.0 {
        left.min(right) / left.max(right)
    } else {
        0.0
    };
    if balance_ratio > 0.3 {
        return true;
    }
    if (5..=9).contains(&leaf_count) {
        return true;
    }

    let leaves = extract_leaves(bvh, node, leaf_count);
    if leaves.is_empty() {
        return false;
    }
    let leaf_area: f32 = leaves.iter().map(|leaf| leaf.bounds.area()).sum();
    let average_leaf_area = leaf_area / leaves.len() as f32;
    average_leaf_area < 2.0 * n.bounds.area()
}

/// Selection parameters for [`identify_treelets`].
#[derive(Debug, Clone, Copy)]
pub struct TreeletSelection {
    pub treelet_size: usize,
    pub max_treelet_depth: usize,
}

/// Depth-first search for treelet roots, top-down.
///
/// Each node joins at most one treelet; once a root qualifies its subtree is
/// claimed and not searched further.
pub fn identify_treelets(bvh: &Bvh, selection: TreeletSelection) -> Vec<NodeHandle> {
    let mut search = Search {
        selection,
        claimed: vec![false; bvh.len()],
        searched: vec![false; bvh.len()],
        out: Vec::new(),
    };
    visit(bvh, bvh.root(), 0, &mut search);
    search.out
}

struct Search {
    selection: TreeletSelection,
    /// Nodes inside an accepted treelet.
    claimed: Vec<bool>,
    /// Nodes already considered as a root, so each is examined once.
    searched: Vec<bool>,
    out: Vec<NodeHandle>,
}

fn visit(bvh: &Bvh, node: NodeHandle, depth: usize, search: &mut Search) {
    if depth > MAX_TRAVERSAL_DEPTH {
        return;
    }
    let Some(n) = bvh.get(node) else {
        return;
    };
    if search.claimed[node.index()] || std::mem::replace(&mut search.searched[node.index()], true) {
        return;
    }
    let Some([l, r]) = n.children else {
        return;
    };

    let left_leaves = count_leaves(bvh, l, MAX_SUBTREE_LEAVES);
    let right_leaves = count_leaves(bvh, r, MAX_SUBTREE_LEAVES);
    let total = left_leaves + right_leaves;

    if total > MAX_SUBTREE_LEAVES {
        tracing::trace!("treelet search: subtree {} too large, descending", node.0);
    } else if (3..=search.selection.treelet_size).contains(&total)
        && depth <= search.selection.max_treelet_depth
        && left_leaves >= 1
        && right_leaves >= 1
        && evaluate_treelet_quality(bvh, node, total)
    {
        search.out.push(node);
        mark_visited(bvh, node, 0, &mut search.claimed);
        return;
    }

    visit(bvh, l, depth + 1, search);
    visit(bvh, r, depth + 1, search);
}

/// Build the candidate layout for `slots` into `out`.
///
/// The slot sequence is split at its midpoint recursively; a single slot
/// becomes a copy of that leaf record. Returns `None` for an empty sequence
/// or a slot with no matching record.
pub fn build_topology_tree(out: &mut Bvh, slots: &[u8], leaves: &[LeafRecord]) -> Option<NodeHandle> {
    match slots.len() {
        0 => None,
        1 => {
            let leaf = leaves.get(slots[0] as usize)?;
            Some(out.push_leaf(leaf.bounds, leaf.triangle_offset, leaf.triangle_count))
        }
        len => {
            let mid = len / 2;
            let left = build_topology_tree(out, &slots[..mid], leaves)?;
            let right = build_topology_tree(out, &slots[mid..], leaves)?;
            Some(out.push_internal(left, right))
        }
    }
}

/// Rewrite the treelet at `root` into the layout for `slots`.
///
/// `root` keeps its handle; new internal nodes are appended and the original
/// leaf nodes are reused. Returns false, leaving the tree untouched, when the
/// layout cannot be built.
pub fn commit_topology(bvh: &mut Bvh, root: NodeHandle, slots: &[u8], leaves: &[LeafRecord]) -> bool {
    if slots.len() < 2 || bvh.get(root).is_none() {
        return false;
    }
    if slots.iter().any(|&s| s as usize >= leaves.len()) {
        return false;
    }
    let mid = slots.len() / 2;
    let (Some(left), Some(right)) = (
        graft(bvh, &slots[..mid], leaves),
        graft(bvh, &slots[mid..], leaves),
    ) else {
        return false;
    };

    let mut bounds = Aabb::EMPTY;
    for child in [left, right] {
        if let Some(n) = bvh.get(child) {
            bounds.grow(&n.bounds);
        }
    }
    match bvh.get_mut(root) {
        Some(node) => {
            *node = BvhNode::internal(bounds, left, right);
            true
        }
        None => false,
    }
}

fn graft(bvh: &mut Bvh, slots: &[u8], leaves: &[LeafRecord]) -> Option<NodeHandle> {
    match slots.len() {
        0 => None,
        1 => leaves.get(slots[0] as usize).map(|leaf| leaf.handle),
        len => {
            let mid = len / 2;
            let left = graft(bvh, &slots[..mid], leaves)?;
            let right = graft(bvh, &slots[mid..], leaves)?;
            Some(bvh.push_internal(left, right))
        }
    }
}
