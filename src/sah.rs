//! Surface Area Heuristic cost model.
//!
//! ```text
//! leaf:     area(node) * triangle_count * intersection_cost
//! internal: area(node) * traversal_cost + cost(left) + cost(right)
//! ```

use glam::Vec3;

use crate::bvh::{Bvh, NodeHandle};
use crate::util::Aabb;

/// Surface area of the box spanned by `min`/`max`.
#[inline]
pub fn surface_area(min: Vec3, max: Vec3) -> f32 {
    Aabb::new(min, max).area()
}

/// Cost of a subtree, used to rank candidate treelet layouts.
///
/// The optimizer only ever compares costs returned by the same model, so
/// any monotone cost works; [`SahCost`] is the standard one.
pub trait CostModel {
    fn subtree_cost(&self, bvh: &Bvh, node: NodeHandle) -> f32;
}

/// SAH evaluator with ray-box vs ray-triangle cost constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SahCost {
    pub traversal_cost: f32,
    pub intersection_cost: f32,
}

impl Default for SahCost {
    fn default() -> Self {
        Self {
            traversal_cost: 1.0,
            intersection_cost: 1.0,
        }
    }
}

impl SahCost {
    pub fn new(traversal_cost: f32, intersection_cost: f32) -> Self {
        Self {
            traversal_cost,
            intersection_cost,
        }
    }
}

impl CostModel for SahCost {
    fn subtree_cost(&self, bvh: &Bvh, node: NodeHandle) -> f32 {
        let Some(n) = bvh.get(node) else {
            return 0.0;
        };
        let area = n.bounds.area();
        match n.children {
            None => area * n.triangle_count as f32 * self.intersection_cost,
            Some([left, right]) => {
                area * self.traversal_cost
                    + self.subtree_cost(bvh, left)
                    + self.subtree_cost(bvh, right)
            }
        }
    }
}
