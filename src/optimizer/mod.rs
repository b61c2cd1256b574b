//! Treelet-based SAH optimizer.
//!
//! Improves an already-built BVH by re-arranging small subtrees (treelets).
//!
//! ## Pipeline
//! ```text
//! root → identify treelets (DFS, visited set) → per treelet:
//!     extract leaves → cost every cached topology → commit best if it saves
//!     more than `min_improvement`
//! ```
//!
//! The pass is cooperative: it polls the wall clock against a whole-pass
//! budget between treelets and against a per-treelet budget between
//! topologies, keeping every improvement committed before a budget trips.

pub mod treelet;

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::bvh::{Bvh, NodeHandle};
use crate::config::OptimizerConfig;
use crate::sah::{CostModel, SahCost};
use crate::topology::TopologyCatalog;

pub use treelet::{
    build_topology_tree, evaluate_treelet_quality, LeafRecord, TreeletSelection,
};

/// A treelet with more cached topologies than this is left alone.
pub const MAX_TOPOLOGIES_PER_TREELET: usize = 1000;

/// Running statistics of the last [`TreeletOptimizer::optimize_bvh`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizerStats {
    pub treelets_processed: usize,
    pub treelets_improved: usize,
    pub total_sah_improvement: f32,
    pub optimization_time: Duration,
}

impl OptimizerStats {
    /// Mean SAH saving per improved treelet (0 when none improved).
    pub fn average_sah_improvement(&self) -> f32 {
        if self.treelets_improved == 0 {
            0.0
        } else {
            self.total_sah_improvement / self.treelets_improved as f32
        }
    }
}

/// Local BVH optimizer over a precomputed topology catalog.
pub struct TreeletOptimizer<C: CostModel = SahCost> {
    config: OptimizerConfig,
    catalog: TopologyCatalog,
    cost: C,
    stats: OptimizerStats,
}

impl TreeletOptimizer<SahCost> {
    /// SAH optimizer using the config's traversal/intersection constants.
    pub fn new(config: OptimizerConfig) -> Self {
        let cost = SahCost::new(config.traversal_cost, config.intersection_cost);
        Self::with_cost_model(config, cost)
    }
}

impl Default for TreeletOptimizer<SahCost> {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl<C: CostModel> TreeletOptimizer<C> {
    /// Optimizer with a custom cost model. The treelet size is clamped to
    /// [3, 15] and topologies are precomputed here.
    pub fn with_cost_model(config: OptimizerConfig, cost: C) -> Self {
        let config = config.sanitized();
        let catalog = TopologyCatalog::new(config.treelet_size);
        Self {
            config,
            catalog,
            cost,
            stats: OptimizerStats::default(),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TopologyCatalog {
        &self.catalog
    }

    pub fn cost_model(&self) -> &C {
        &self.cost
    }

    /// Statistics of the most recent pass.
    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    /// Treelet roots the next pass would process, before the count cap.
    ///
    /// Roots are limited to leaf counts the catalog holds topologies for, so
    /// a size past the cache budget never claims a subtree it cannot rewrite.
    pub fn identify_treelets(&self, bvh: &Bvh) -> Vec<NodeHandle> {
        let cached = self.catalog.largest_cached().unwrap_or(0);
        treelet::identify_treelets(
            bvh,
            TreeletSelection {
                treelet_size: self.config.treelet_size.min(cached),
                max_treelet_depth: self.config.max_treelet_depth,
            },
        )
    }

    /// Optimize `bvh` in place and return its (unchanged) root handle.
    ///
    /// `progress` receives a percentage string every `progress_interval`
    /// treelets. Statistics are reset at the start of every call.
    #[tracing::instrument(skip_all, fields(nodes = bvh.len()))]
    pub fn optimize_bvh(
        &mut self,
        bvh: &mut Bvh,
        mut progress: Option<&mut dyn FnMut(&str)>,
    ) -> NodeHandle {
        let start = Instant::now();
        self.stats = OptimizerStats::default();
        let root = bvh.root();

        let mut treelets = self.identify_treelets(bvh);
        if treelets.len() > self.config.max_treelets {
            tracing::info!(
                "treelet cap: processing {} of {} treelets",
                self.config.max_treelets,
                treelets.len()
            );
            treelets.truncate(self.config.max_treelets);
        }

        let total = treelets.len();
        let budget = self.config.time_budget();
        for (i, &treelet_root) in treelets.iter().enumerate() {
            if start.elapsed() > budget {
                tracing::warn!(
                    "optimization time budget of {:?} exceeded after {i}/{total} treelets",
                    budget
                );
                break;
            }

            self.optimize_treelet(bvh, treelet_root);

            let done = i + 1;
            if done % self.config.progress_interval == 0 {
                if let Some(callback) = progress.as_deref_mut() {
                    let pct = done as f32 / total as f32 * 100.0;
                    callback(&format!("{pct:.0}%"));
                }
            }
        }

        self.stats.optimization_time = start.elapsed();
        tracing::info!(
            "optimized BVH: {}/{} treelets improved, SAH -{:.3} in {:.1}ms",
            self.stats.treelets_improved,
            self.stats.treelets_processed,
            self.stats.total_sah_improvement,
            self.stats.optimization_time.as_secs_f64() * 1000.0
        );
        root
    }

    /// Try every cached topology for the treelet at `root` and commit the
    /// cheapest one if it beats the current layout by more than
    /// `min_improvement`. Returns whether the treelet was rewritten.
    pub fn optimize_treelet(&mut self, bvh: &mut Bvh, root: NodeHandle) -> bool {
        self.stats.treelets_processed += 1;

        let size = self.config.treelet_size;
        let leaves = treelet::extract_leaves(bvh, root, size);
        if !(3..=size).contains(&leaves.len()) {
            return false;
        }

        let topologies = self.catalog.topologies(leaves.len());
        if topologies.len() > MAX_TOPOLOGIES_PER_TREELET {
            tracing::warn!(
                "treelet {}: {} topologies exceed evaluation budget, skipping",
                root.0,
                topologies.len()
            );
            return false;
        }
        if topologies.is_empty() {
            return false;
        }

        let original_cost = self.cost.subtree_cost(bvh, root);

        let start = Instant::now();
        let budget = self.config.treelet_time_budget();
        let mut scratch = Bvh::with_capacity(2 * leaves.len());
        let mut best: Option<(f32, usize)> = None;

        for (i, topology) in topologies.iter().enumerate() {
            if start.elapsed() > budget {
                tracing::debug!(
                    "treelet {}: scan stopped after {i}/{} topologies",
                    root.0,
                    topologies.len()
                );
                break;
            }
            scratch.clear();
            let Some(candidate) = build_topology_tree(&mut scratch, topology.slots(), &leaves) else {
                continue;
            };
            scratch.set_root(candidate);
            let cost = self.cost.subtree_cost(&scratch, candidate);
            if best.map_or(true, |(best_cost, _)| cost < best_cost) {
                best = Some((cost, i));
            }
        }

        let Some((best_cost, best_index)) = best else {
            return false;
        };
        let improvement = original_cost - best_cost;
        if improvement <= self.config.min_improvement {
            return false;
        }

        if !treelet::commit_topology(bvh, root, topologies[best_index].slots(), &leaves) {
            return false;
        }
        self.stats.treelets_improved += 1;
        self.stats.total_sah_improvement += improvement;
        tracing::debug!(
            "treelet {}: {} leaves, SAH {original_cost:.3} -> {best_cost:.3}",
            root.0,
            leaves.len()
        );
        true
    }
}
