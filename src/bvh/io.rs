//! JSON interchange for BVH trees.
//!
//! Trees are exchanged as nested node objects, the shape produced by
//! JavaScript-side builders:
//!
//! ```json
//! { "boundsMin": [0,0,0], "boundsMax": [1,1,1],
//!   "leftChild": { ... }, "rightChild": { ... } }
//! { "boundsMin": [0,0,0], "boundsMax": [1,1,1],
//!   "triangleOffset": 0, "triangleCount": 4 }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Bvh, BvhNode, NodeHandle};
use crate::util::{Aabb, Error, Result};

/// Nested, by-value description of one node and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDesc {
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_child: Option<Box<NodeDesc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_child: Option<Box<NodeDesc>>,
    #[serde(default)]
    pub triangle_offset: u32,
    #[serde(default)]
    pub triangle_count: u32,
}

impl Bvh {
    /// Build an arena tree from a nested description and validate it.
    pub fn from_desc(desc: &NodeDesc) -> Result<Bvh> {
        let mut bvh = Bvh::new();
        let root = push_desc(&mut bvh, desc)?;
        bvh.set_root(root);
        bvh.validate()?;
        Ok(bvh)
    }

    /// Nested description of the reachable tree.
    pub fn to_desc(&self) -> Result<NodeDesc> {
        desc_of(self, self.root(), 0)
    }
}

fn push_desc(bvh: &mut Bvh, desc: &NodeDesc) -> Result<NodeHandle> {
    let bounds = Aabb::from_arrays(desc.bounds_min, desc.bounds_max);
    match (&desc.left_child, &desc.right_child) {
        (Some(left), Some(right)) => {
            let l = push_desc(bvh, left)?;
            let r = push_desc(bvh, right)?;
            let mut node = BvhNode::internal(bounds, l, r);
            node.triangle_count = desc.triangle_count;
            Ok(bvh.push(node))
        }
        (None, None) => Ok(bvh.push_leaf(bounds, desc.triangle_offset, desc.triangle_count)),
        _ => Err(Error::malformed(bvh.len() as u32, "node has exactly one child")),
    }
}

fn desc_of(bvh: &Bvh, handle: NodeHandle, depth: usize) -> Result<NodeDesc> {
    if depth > bvh.len() {
        return Err(Error::CyclicTree);
    }
    let node = bvh.get(handle).ok_or(Error::InvalidHandle(handle.0))?;
    let (left_child, right_child) = match node.children {
        Some([l, r]) => (
            Some(Box::new(desc_of(bvh, l, depth + 1)?)),
            Some(Box::new(desc_of(bvh, r, depth + 1)?)),
        ),
        None => (None, None),
    };
    Ok(NodeDesc {
        bounds_min: node.bounds.min.to_array(),
        bounds_max: node.bounds.max.to_array(),
        left_child,
        right_child,
        triangle_offset: node.triangle_offset,
        triangle_count: node.triangle_count,
    })
}

/// Parse a tree from JSON text.
pub fn from_json_str(text: &str) -> Result<Bvh> {
    let desc: NodeDesc = serde_json::from_str(text)?;
    Bvh::from_desc(&desc)
}

/// Load a tree from a JSON file.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_json(path: impl AsRef<Path>) -> Result<Bvh> {
    let text = fs::read_to_string(path.as_ref())?;
    let bvh = from_json_str(&text)?;
    tracing::debug!("loaded {} nodes", bvh.len());
    Ok(bvh)
}

/// Write the reachable tree to a JSON file.
pub fn save_json(bvh: &Bvh, path: impl AsRef<Path>) -> Result<()> {
    let desc = bvh.to_desc()?;
    let text = serde_json::to_string_pretty(&desc)?;
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "boundsMin": [0, 0, 0], "boundsMax": [3, 1, 1],
        "leftChild": { "boundsMin": [0, 0, 0], "boundsMax": [1, 1, 1],
                       "triangleOffset": 0, "triangleCount": 2 },
        "rightChild": { "boundsMin": [2, 0, 0], "boundsMax": [3, 1, 1],
                        "triangleOffset": 2, "triangleCount": 5 }
    }"#;

    #[test]
    fn test_parse_nested_tree() {
        let bvh = from_json_str(TREE).unwrap();
        assert_eq!(bvh.reachable_count(), 3);
        assert_eq!(bvh.triangle_count(bvh.root()), 7);

        let root = bvh.get(bvh.root()).unwrap();
        assert_eq!(root.bounds.max.x, 3.0);
        assert!(!root.is_leaf());
    }

    #[test]
    fn test_desc_survives_arena_form() {
        let bvh = from_json_str(TREE).unwrap();
        let desc = bvh.to_desc().unwrap();
        let expected: NodeDesc = serde_json::from_str(TREE).unwrap();
        assert_eq!(desc, expected);
    }

    #[test]
    fn test_single_child_rejected() {
        let text = r#"{
            "boundsMin": [0, 0, 0], "boundsMax": [1, 1, 1],
            "leftChild": { "boundsMin": [0, 0, 0], "boundsMax": [1, 1, 1], "triangleCount": 1 }
        }"#;
        assert!(matches!(from_json_str(text), Err(Error::MalformedNode { .. })));
    }

    #[test]
    fn test_internal_with_triangles_rejected() {
        let text = r#"{
            "boundsMin": [0, 0, 0], "boundsMax": [1, 1, 1], "triangleCount": 3,
            "leftChild": { "boundsMin": [0, 0, 0], "boundsMax": [1, 1, 1], "triangleCount": 1 },
            "rightChild": { "boundsMin": [0, 0, 0], "boundsMax": [1, 1, 1], "triangleCount": 1 }
        }"#;
        assert!(matches!(from_json_str(text), Err(Error::MalformedNode { .. })));
    }

    #[test]
    fn test_file_roundtrip() {
        let bvh = from_json_str(TREE).unwrap();
        let temp = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        save_json(&bvh, temp.path()).unwrap();
        let back = load_json(temp.path()).unwrap();
        assert_eq!(back.to_desc().unwrap(), bvh.to_desc().unwrap());
    }
}
