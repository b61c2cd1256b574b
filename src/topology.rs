//! Binary-tree topologies over small leaf sets.
//!
//! A [`Topology`] is an ordering of leaf slots `0..n`. Orderings are built
//! bottom-up: for every split size, every choice of left-side slots that
//! contains slot 0 is paired with every left topology and every right
//! topology of the matching sizes, the right side remapped onto the slots the
//! left side did not take. This enumerates each rooted binary tree over `n`
//! labelled leaves once, `(2n-3)!!` in total (3, 15, 105, 945, ...).
//!
//! Generation is bounded; hitting a bound logs a warning and truncates.

use std::collections::HashMap;

use smallvec::SmallVec;

/// Maximum split sizes examined per leaf count.
pub const MAX_SPLIT_ITERATIONS: usize = 50;
/// Splits whose right side holds more leaves than this are skipped.
pub const MAX_RIGHT_LEAVES: usize = 50;
/// Topologies kept per leaf count; the remainder is discarded.
pub const MAX_COMBINATIONS: usize = 1000;
/// Once a [`TopologyCatalog`] holds more topologies than this, no further
/// leaf counts are added.
pub const CACHE_BUDGET: usize = 1000;
/// A leaf count producing more topologies than this is never cached.
pub const MAX_TOPOLOGIES_PER_COUNT: usize = 10_000;

/// Leaf-slot ordering describing one candidate treelet layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topology(SmallVec<[u8; 16]>);

impl Topology {
    pub fn from_slots(slots: &[u8]) -> Self {
        Self(SmallVec::from_slice(slots))
    }

    #[inline]
    pub fn slots(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// All topologies for `leaf_count` leaves, in enumeration order.
pub fn generate_topologies(leaf_count: usize) -> Vec<Topology> {
    let mut table = TopologyTable::default();
    table.level(leaf_count).to_vec()
}

/// Dynamic-programming table, one level per leaf count.
#[derive(Default)]
struct TopologyTable {
    levels: Vec<Vec<Topology>>,
}

impl TopologyTable {
    fn level(&mut self, leaf_count: usize) -> &[Topology] {
        if leaf_count > u8::MAX as usize {
            tracing::warn!("topology generation: {leaf_count} leaves exceed slot range");
            return &[];
        }
        while self.levels.len() <= leaf_count {
            let n = self.levels.len();
            let level = match n {
                0 => Vec::new(),
                1 => vec![Topology::from_slots(&[0])],
                2 => vec![Topology::from_slots(&[0, 1])],
                _ => self.combine(n),
            };
            self.levels.push(level);
        }
        &self.levels[leaf_count]
    }

    fn combine(&self, n: usize) -> Vec<Topology> {
        let mut out = Vec::new();

        'splits: for (iteration, left_count) in (1..n).enumerate() {
            if iteration >= MAX_SPLIT_ITERATIONS {
                tracing::warn!("topology generation: split limit reached for {n} leaves");
                break;
            }
            let right_count = n - left_count;
            if right_count > MAX_RIGHT_LEAVES {
                continue;
            }
            let lefts = &self.levels[left_count];
            let rights = &self.levels[right_count];

            // Left side is slot 0 plus `left_count - 1` slots drawn from 1..n.
            let mut chosen: Vec<usize> = (1..left_count).collect();
            loop {
                let mut left_slots: SmallVec<[u8; 16]> = SmallVec::with_capacity(left_count);
                left_slots.push(0);
                left_slots.extend(chosen.iter().map(|&s| s as u8));
                let right_slots: SmallVec<[u8; 16]> = (1..n)
                    .filter(|s| chosen.binary_search(s).is_err())
                    .map(|s| s as u8)
                    .collect();

                for lt in lefts {
                    for rt in rights {
                        if out.len() >= MAX_COMBINATIONS {
                            tracing::warn!(
                                "topology generation: keeping first {MAX_COMBINATIONS} topologies for {n} leaves, discarding the rest"
                            );
                            break 'splits;
                        }
                        let mut slots: SmallVec<[u8; 16]> = SmallVec::with_capacity(n);
                        slots.extend(lt.slots().iter().map(|&s| left_slots[s as usize]));
                        slots.extend(rt.slots().iter().map(|&s| right_slots[s as usize]));
                        out.push(Topology(slots));
                    }
                }

                if !next_combination(&mut chosen, n - 1) {
                    break;
                }
            }
        }
        out
    }
}

/// Advance `chosen` (sorted, values in `1..=max`) to the next combination in
/// lexicographic order. Returns false when it was the last one.
fn next_combination(chosen: &mut [usize], max: usize) -> bool {
    let k = chosen.len();
    for i in (0..k).rev() {
        if chosen[i] < max - (k - 1 - i) {
            chosen[i] += 1;
            for j in i + 1..k {
                chosen[j] = chosen[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

/// Precomputed topologies for leaf counts `3..=max_leaves`.
#[derive(Debug, Clone)]
pub struct TopologyCatalog {
    max_leaves: usize,
    cache: HashMap<usize, Vec<Topology>>,
    total: usize,
}

impl TopologyCatalog {
    /// Build the catalog, precomputing every leaf count up to `max_leaves`.
    pub fn new(max_leaves: usize) -> Self {
        let mut catalog = Self {
            max_leaves,
            cache: HashMap::new(),
            total: 0,
        };
        catalog.precompute();
        catalog
    }

    #[tracing::instrument(skip_all, fields(max_leaves = self.max_leaves))]
    fn precompute(&mut self) {
        let mut table = TopologyTable::default();
        for n in 3..=self.max_leaves {
            let topologies = table.level(n);
            if topologies.len() > MAX_TOPOLOGIES_PER_COUNT {
                tracing::warn!(
                    "topology cache: {} topologies for {n} leaves, not caching",
                    topologies.len()
                );
                break;
            }
            self.total += topologies.len();
            self.cache.insert(n, topologies.to_vec());
            if self.total > CACHE_BUDGET {
                tracing::warn!(
                    "topology cache: budget of {CACHE_BUDGET} entries exceeded at {n} leaves ({} cached), stopping",
                    self.total
                );
                break;
            }
        }
        tracing::debug!("topology cache: {} entries", self.total);
    }

    /// Cached topologies for `leaf_count`; empty when not cached.
    pub fn topologies(&self, leaf_count: usize) -> &[Topology] {
        self.cache.get(&leaf_count).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn max_leaves(&self) -> usize {
        self.max_leaves
    }

    /// Total cached topologies across all leaf counts.
    pub fn total_entries(&self) -> usize {
        self.total
    }

    pub fn is_cached(&self, leaf_count: usize) -> bool {
        self.cache.contains_key(&leaf_count)
    }

    /// Largest leaf count with cached topologies.
    pub fn largest_cached(&self) -> Option<usize> {
        (3..=self.max_leaves).rev().find(|&n| self.is_cached(n))
    }
}
