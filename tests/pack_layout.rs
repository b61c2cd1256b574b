//! Integration tests for the GPU texture layout.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use byteorder::{LittleEndian, ReadBytesExt};
use tempfile::NamedTempFile;

use treelet_bvh::pack::{FLOATS_PER_NODE, FLOATS_PER_TEXEL, preorder_handles, texture_dims};
use treelet_bvh::prelude::*;

fn scrambled(count: u32) -> Bvh {
    let mut bvh = Bvh::new();
    let leaves: Vec<NodeHandle> = (0..count)
        .map(|i| {
            let x = ((i * 37) % count) as f32 * 2.0 + 0.1;
            bvh.push_leaf(Aabb::from_arrays([x, -0.5, 0.25], [x + 1.0, 1.5, 1.0]), i * 3, 3)
        })
        .collect();
    let root = bisect(&mut bvh, &leaves);
    bvh.set_root(root);
    bvh
}

fn bisect(bvh: &mut Bvh, leaves: &[NodeHandle]) -> NodeHandle {
    if leaves.len() == 1 {
        return leaves[0];
    }
    let mid = leaves.len() / 2;
    let left = bisect(bvh, &leaves[..mid]);
    let right = bisect(bvh, &leaves[mid..]);
    bvh.push_internal(left, right)
}

#[test]
fn test_records_mirror_tree() {
    let bvh = scrambled(48);
    let flat = flatten(&bvh).expect("Failed to flatten");
    let order = preorder_handles(&bvh);
    assert_eq!(flat.node_count as usize, order.len());
    assert_eq!(order.len(), 95);

    for (i, &handle) in order.iter().enumerate() {
        let node = bvh.get(handle).expect("handle in arena");
        let rec = flat.record(i).expect("record in range");

        for axis in 0..3 {
            assert_eq!(rec.bounds_min[axis].to_bits(), node.bounds.min[axis].to_bits());
            assert_eq!(rec.bounds_max[axis].to_bits(), node.bounds.max[axis].to_bits());
        }
        match node.children {
            Some([l, r]) => {
                let [li, ri] = rec.children().expect("internal record");
                // left child directly follows its parent
                assert_eq!(li as usize, i + 1);
                assert_eq!(order[li as usize], l);
                assert_eq!(order[ri as usize], r);
                assert_eq!(rec.triangle_count, 0.0);
            }
            None => {
                assert_eq!(rec.left_child, -1.0);
                assert_eq!(rec.right_child, -1.0);
                assert_eq!(rec.triangle_offset, node.triangle_offset as f32);
                assert_eq!(rec.triangle_count, node.triangle_count as f32);
            }
        }
    }
}

#[test]
fn test_buffer_fills_texture_with_zero_padding() {
    for count in [1, 2, 3, 10, 48, 100] {
        let flat = flatten(&scrambled(count)).expect("Failed to flatten");
        let used = flat.node_count as usize * FLOATS_PER_NODE;
        assert_eq!((flat.width, flat.height), texture_dims(flat.node_count as usize));
        assert_eq!(flat.data.len(), (flat.width * flat.height) as usize * FLOATS_PER_TEXEL);
        assert!(flat.data.len() >= used);
        assert!(flat.data[used..].iter().all(|&v| v == 0.0));
    }
}

#[test]
fn test_optimized_tree_packs_reachable_nodes_only() {
    let mut bvh = scrambled(64);
    let mut optimizer = TreeletOptimizer::default();
    optimizer.optimize_bvh(&mut bvh, None);
    assert!(optimizer.stats().treelets_improved > 0);
    assert!(bvh.len() > 127);

    let flat = flatten(&bvh).expect("Failed to flatten");
    assert_eq!(flat.node_count, 127);
    assert_eq!(flatten(&bvh.compact()).expect("Failed to flatten"), flat);
}

#[test]
fn test_worker_matches_direct_flatten() {
    let trees: Vec<Bvh> = [4, 16, 33].into_iter().map(scrambled).collect();
    let mut worker = FlattenWorker::spawn().expect("Failed to spawn worker");

    let parallel = flatten_all(&trees);
    for (tree, par) in trees.iter().zip(parallel) {
        let direct = flatten(tree).expect("Failed to flatten");
        let threaded = worker.flatten(tree.clone()).expect("Worker failed");
        assert_eq!(threaded, direct);
        assert_eq!(par.expect("Parallel flatten failed"), direct);
    }
}

#[test]
fn test_binary_blob_layout() {
    let flat = flatten(&scrambled(10)).expect("Failed to flatten");
    let temp = NamedTempFile::new().expect("Failed to create temp file");
    {
        let mut out = BufWriter::new(File::create(temp.path()).expect("Failed to open temp file"));
        flat.write_le(&mut out).expect("Failed to write blob");
        out.flush().expect("Failed to flush blob");
    }

    let mut input = BufReader::new(File::open(temp.path()).expect("Failed to reopen temp file"));
    assert_eq!(input.read_u32::<LittleEndian>().unwrap(), flat.width);
    assert_eq!(input.read_u32::<LittleEndian>().unwrap(), flat.height);
    let mut data = Vec::with_capacity(flat.data.len());
    for _ in 0..flat.data.len() {
        data.push(input.read_f32::<LittleEndian>().unwrap());
    }
    assert_eq!(data, flat.data);
    assert!(input.read_u8().is_err());
}
