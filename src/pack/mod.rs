//! Flatten a BVH into a GPU texture buffer.
//!
//! Nodes are numbered in pre-order (a node, then its left subtree, then its
//! right subtree) and written as three RGBA32F texels each:
//!
//! ```text
//! texel 0: bounds_min.xyz, left child index  (-1 for leaves)
//! texel 1: bounds_max.xyz, right child index (-1 for leaves)
//! texel 2: triangle_offset, triangle_count, 0, 0
//! ```
//!
//! The buffer is sized to a near-square `width x height` texture; texels past
//! the last record stay zero.

pub mod worker;

use std::io::Write;

use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::bvh::{Bvh, NodeHandle};
use crate::util::{Error, Result};

/// Floats per node record (3 x vec4).
pub const FLOATS_PER_NODE: usize = 12;
/// Floats per RGBA texel.
pub const FLOATS_PER_TEXEL: usize = 4;
/// Child index written for leaves.
pub const NO_CHILD: f32 = -1.0;

/// GPU node record (48 bytes, matches the shader's 3 x vec4 fetch).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FlatNodeRecord {
    pub bounds_min: [f32; 3],
    pub left_child: f32,
    pub bounds_max: [f32; 3],
    pub right_child: f32,
    pub triangle_offset: f32,
    pub triangle_count: f32,
    pub _pad: [f32; 2],
}

impl FlatNodeRecord {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.left_child < 0.0
    }

    /// Child indices, `None` for leaves.
    pub fn children(&self) -> Option<[u32; 2]> {
        if self.is_leaf() {
            None
        } else {
            Some([self.left_child as u32, self.right_child as u32])
        }
    }
}

/// Packed buffer plus the texture footprint it fills.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatBvh {
    /// `width * height * 4` floats, records at stride 12.
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub node_count: u32,
}

impl FlatBvh {
    /// Decode record `index`.
    pub fn record(&self, index: usize) -> Option<FlatNodeRecord> {
        if index >= self.node_count as usize {
            return None;
        }
        let start = index * FLOATS_PER_NODE;
        let floats = self.data.get(start..start + FLOATS_PER_NODE)?;
        Some(bytemuck::pod_read_unaligned(bytemuck::cast_slice(floats)))
    }

    /// Buffer as bytes for texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Write `width`, `height` (u32) then every float, little-endian.
    pub fn write_le<W: Write>(&self, mut out: W) -> Result<()> {
        out.write_u32::<LittleEndian>(self.width)?;
        out.write_u32::<LittleEndian>(self.height)?;
        for &v in &self.data {
            out.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

/// Near-square texture covering `node_count` records.
///
/// `width = ceil(sqrt(texels))`, `height = ceil(texels / width)` with
/// `texels = node_count * 3`.
pub fn texture_dims(node_count: usize) -> (u32, u32) {
    let data_len = node_count * FLOATS_PER_NODE;
    let texels = data_len / FLOATS_PER_TEXEL;
    if texels == 0 {
        return (1, 1);
    }
    let width = (texels as f64).sqrt().ceil() as usize;
    let height = texels.div_ceil(width);
    (width as u32, height as u32)
}

/// Linearize the reachable tree in pre-order and pack it.
///
/// Fails on a dangling handle or a node reachable twice (a cycle or shared
/// subtree), since neither has a pre-order numbering.
#[tracing::instrument(skip_all, fields(nodes = bvh.len()))]
pub fn flatten(bvh: &Bvh) -> Result<FlatBvh> {
    if bvh.is_empty() {
        return Err(Error::EmptyTree);
    }
    let records = linearize(bvh)?;

    let (width, height) = texture_dims(records.len());
    let mut data = vec![0.0f32; width as usize * height as usize * FLOATS_PER_TEXEL];
    let packed: &[f32] = bytemuck::cast_slice(&records);
    data[..packed.len()].copy_from_slice(packed);

    tracing::debug!("packed {} nodes into {width}x{height} texture", records.len());
    Ok(FlatBvh {
        data,
        width,
        height,
        node_count: records.len() as u32,
    })
}

/// Pre-order records with child handles replaced by record indices.
fn linearize(bvh: &Bvh) -> Result<Vec<FlatNodeRecord>> {
    enum Slot {
        Root,
        Left(usize),
        Right(usize),
    }

    let mut records: Vec<FlatNodeRecord> = Vec::with_capacity(bvh.len());
    let mut seen = vec![false; bvh.len()];
    let mut stack = vec![(bvh.root(), Slot::Root)];

    while let Some((handle, slot)) = stack.pop() {
        let node = bvh.get(handle).ok_or(Error::InvalidHandle(handle.0))?;
        if std::mem::replace(&mut seen[handle.index()], true) {
            return Err(Error::CyclicTree);
        }

        let index = records.len();
        match slot {
            Slot::Root => {}
            Slot::Left(parent) => records[parent].left_child = index as f32,
            Slot::Right(parent) => records[parent].right_child = index as f32,
        }

        records.push(FlatNodeRecord {
            bounds_min: node.bounds.min.to_array(),
            left_child: NO_CHILD,
            bounds_max: node.bounds.max.to_array(),
            right_child: NO_CHILD,
            triangle_offset: node.triangle_offset as f32,
            triangle_count: node.triangle_count as f32,
            _pad: [0.0; 2],
        });

        if let Some([left, right]) = node.children {
            // right first so left is numbered next
            stack.push((right, Slot::Right(index)));
            stack.push((left, Slot::Left(index)));
        }
    }
    Ok(records)
}

/// Handle of the node stored at each record index.
pub fn preorder_handles(bvh: &Bvh) -> Vec<NodeHandle> {
    bvh.walk(bvh.root()).map(|(h, _, _)| h).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Aabb;

    fn cube(x: f32) -> Aabb {
        Aabb::from_arrays([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0])
    }

    #[test]
    fn test_record_is_48_bytes() {
        assert_eq!(std::mem::size_of::<FlatNodeRecord>(), 48);
    }

    #[test]
    fn test_texture_dims() {
        // 1 node = 3 texels -> 2x2
        assert_eq!(texture_dims(1), (2, 2));
        // 3 nodes = 9 texels -> 3x3
        assert_eq!(texture_dims(3), (3, 3));
        // 5 nodes = 15 texels -> 4x4
        assert_eq!(texture_dims(5), (4, 4));
        // 7 nodes = 21 texels -> 5x5
        assert_eq!(texture_dims(7), (5, 5));
        for n in 1..200 {
            let (w, h) = texture_dims(n);
            assert!((w * h) as usize * FLOATS_PER_TEXEL >= n * FLOATS_PER_NODE);
        }
    }

    #[test]
    fn test_single_leaf() {
        let bvh = Bvh::leaf(cube(3.0), 8, 2);
        let flat = flatten(&bvh).unwrap();
        assert_eq!((flat.width, flat.height), (2, 2));
        assert_eq!(flat.data.len(), 16);

        let rec = flat.record(0).unwrap();
        assert_eq!(rec.left_child, -1.0);
        assert_eq!(rec.right_child, -1.0);
        assert_eq!(rec.bounds_min, [3.0, 0.0, 0.0]);
        assert_eq!(rec.triangle_offset, 8.0);
        assert_eq!(rec.triangle_count, 2.0);
        assert!(flat.data[12..].iter().all(|&v| v == 0.0));
        assert!(flat.record(1).is_none());
    }

    #[test]
    fn test_preorder_indices() {
        // ((a, b), c): root=0, (a,b)=1, a=2, b=3, c=4
        let mut bvh = Bvh::new();
        let a = bvh.push_leaf(cube(0.0), 0, 1);
        let b = bvh.push_leaf(cube(2.0), 1, 1);
        let c = bvh.push_leaf(cube(4.0), 2, 1);
        let ab = bvh.push_internal(a, b);
        let root = bvh.push_internal(ab, c);
        bvh.set_root(root);

        let flat = flatten(&bvh).unwrap();
        assert_eq!(flat.node_count, 5);
        assert_eq!(flat.record(0).unwrap().children(), Some([1, 4]));
        assert_eq!(flat.record(1).unwrap().children(), Some([2, 3]));
        for leaf in [2, 3, 4] {
            assert!(flat.record(leaf).unwrap().is_leaf());
        }
        assert_eq!(flat.record(4).unwrap().triangle_offset, 2.0);
        assert_eq!(preorder_handles(&bvh), vec![root, ab, a, b, c]);
    }

    #[test]
    fn test_unreachable_nodes_not_packed() {
        let mut bvh = Bvh::new();
        bvh.push_leaf(cube(50.0), 9, 9);
        let a = bvh.push_leaf(cube(0.0), 0, 1);
        let b = bvh.push_leaf(cube(2.0), 1, 1);
        let root = bvh.push_internal(a, b);
        bvh.set_root(root);

        let flat = flatten(&bvh).unwrap();
        assert_eq!(flat.node_count, 3);
    }

    #[test]
    fn test_shared_child_rejected() {
        let mut bvh = Bvh::new();
        let a = bvh.push_leaf(cube(0.0), 0, 1);
        let root = bvh.push_internal(a, a);
        bvh.set_root(root);
        assert!(matches!(flatten(&bvh), Err(Error::CyclicTree)));
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert!(matches!(flatten(&Bvh::new()), Err(Error::EmptyTree)));
    }

    #[test]
    fn test_write_le_layout() {
        let flat = flatten(&Bvh::leaf(cube(0.0), 0, 1)).unwrap();
        let mut bytes = Vec::new();
        flat.write_le(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 8 + flat.data.len() * 4);
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(flat.as_bytes().len(), flat.data.len() * 4);
    }
}
