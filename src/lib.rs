//! # treelet-bvh
//!
//! Treelet-restructuring SAH optimizer for binary BVHs, plus a packer that
//! flattens the optimized tree into an RGBA32F texture for shader traversal.
//!
//! ## Modules
//!
//! - [`util`] - Errors and the `Aabb` type
//! - [`bvh`] - Arena tree, queries, validation and JSON interchange
//! - [`sah`] - Surface area and subtree cost evaluation
//! - [`topology`] - Leaf-ordering catalog for small treelets
//! - [`config`] - Optimizer tunables
//! - [`optimizer`] - Treelet selection and restructuring
//! - [`pack`] - Pre-order flattening and background packing
//!
//! ## Example
//!
//! ```ignore
//! use treelet_bvh::prelude::*;
//!
//! let mut bvh = treelet_bvh::bvh::io::load_json("scene_bvh.json")?;
//! let mut optimizer = TreeletOptimizer::new(OptimizerConfig::default());
//! optimizer.optimize_bvh(&mut bvh, None);
//! let flat = flatten(&bvh)?;
//! println!("{}x{} texture", flat.width, flat.height);
//! ```

pub mod util;
pub mod bvh;
pub mod sah;
pub mod topology;
pub mod config;
pub mod optimizer;
pub mod pack;

// Re-export commonly used types
pub use util::{Aabb, Error, Result};
pub use bvh::{Bvh, BvhNode, NodeHandle};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Aabb, Error, Result};
    pub use crate::bvh::{Bvh, BvhNode, NodeHandle};
    pub use crate::sah::{CostModel, SahCost};
    pub use crate::config::OptimizerConfig;
    pub use crate::optimizer::{OptimizerStats, TreeletOptimizer};
    pub use crate::pack::{FlatBvh, FlatNodeRecord, flatten};
    pub use crate::pack::worker::{FlattenWorker, flatten_all};
}
