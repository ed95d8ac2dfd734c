use crate::forest::ForestConfig;
use crate::node::{Hyperplane, Node, NodeId, NodePool};
use crate::store::VectorStore;
use crate::{Error, ItemId, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Derive an independent per-tree seed from the forest seed (splitmix64).
pub(crate) fn tree_seed(base: u64, tree: usize) -> u64 {
    let mut z = base.wrapping_add((tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Pending work on the explicit build stack
enum Task {
    Grow(Vec<ItemId>),
    Join(Hyperplane),
}

struct Partition {
    hyperplane: Hyperplane,
    left: Vec<ItemId>,
    right: Vec<ItemId>,
}

/// Grows one random projection tree into a private node pool.
///
/// The tree is built with an explicit work stack rather than recursion, so
/// duplicate-heavy inputs that degrade into deep, list-like trees cannot
/// exhaust the thread stack. Children are allocated before their parent.
pub struct TreeBuilder<'a> {
    store: &'a VectorStore,
    config: &'a ForestConfig,
    rng: StdRng,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a VectorStore, config: &'a ForestConfig, seed: u64) -> Self {
        Self {
            store,
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build a tree over `ids`, returning the pool it lives in and its root.
    pub fn build(mut self, ids: Vec<ItemId>) -> Result<(NodePool, NodeId)> {
        let mut pool = NodePool::with_capacity(2 * ids.len() / self.config.leaf_size.max(1) + 1);
        let mut tasks = vec![Task::Grow(ids)];
        let mut finished: Vec<NodeId> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Grow(ids) if ids.len() <= self.config.leaf_size => {
                    finished.push(pool.push(Node::Leaf { items: ids }));
                }
                Task::Grow(ids) => {
                    let partition = self.split(ids)?;
                    tasks.push(Task::Join(partition.hyperplane));
                    tasks.push(Task::Grow(partition.right));
                    tasks.push(Task::Grow(partition.left));
                }
                Task::Join(hyperplane) => {
                    let (right, left) = match (finished.pop(), finished.pop()) {
                        (Some(right), Some(left)) => (right, left),
                        _ => return Err(Error::Corrupted("unbalanced build stack".into())),
                    };
                    finished.push(pool.push(Node::Split {
                        hyperplane,
                        left,
                        right,
                    }));
                }
            }
        }

        let root = finished
            .pop()
            .ok_or_else(|| Error::Corrupted("tree build produced no root".into()))?;
        Ok((pool, root))
    }

    /// Split `ids` into two non-empty halves.
    ///
    /// Falls back to an ordered balanced split when every attempt leaves one
    /// side empty (typically all vectors are identical).
    fn split(&mut self, ids: Vec<ItemId>) -> Result<Partition> {
        for _ in 0..self.config.split_attempts {
            let Some(hyperplane) = self.propose_plane(&ids)? else {
                continue;
            };
            let (left, right) = self.partition(&hyperplane, &ids)?;
            if !left.is_empty() && !right.is_empty() {
                return Ok(Partition {
                    hyperplane,
                    left,
                    right,
                });
            }
        }

        debug!(items = ids.len(), "no separating hyperplane found, forcing balanced split");
        let mut left = ids;
        left.sort_unstable();
        let right = left.split_off(left.len() / 2);
        Ok(Partition {
            hyperplane: Hyperplane::degenerate(self.store.dim()),
            left,
            right,
        })
    }

    fn propose_plane(&mut self, ids: &[ItemId]) -> Result<Option<Hyperplane>> {
        let count = ids.len();
        let i = self.rng.random_range(0..count);
        let mut j = self.rng.random_range(0..count - 1);
        if j >= i {
            j += 1;
        }

        let (left, right) = self.two_means(ids, ids[i], ids[j])?;
        Ok(self.config.metric.split_plane(&left, &right))
    }

    /// Refine two pivots into centroids with a few rounds of online 2-means.
    fn two_means(
        &mut self,
        ids: &[ItemId],
        first: ItemId,
        second: ItemId,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let metric = self.config.metric;
        let mut left = self.store.get(first)?.to_vec();
        let mut right = self.store.get(second)?.to_vec();
        let mut left_count = 1.0f32;
        let mut right_count = 1.0f32;

        for _ in 0..self.config.two_means_iterations {
            let k = ids[self.rng.random_range(0..ids.len())];
            let v = self.store.get(k)?;
            let dl = left_count * metric.distance(&left, v);
            let dr = right_count * metric.distance(&right, v);

            if dl < dr {
                fold_into(&mut left, v, left_count);
                left_count += 1.0;
            } else if dr < dl {
                fold_into(&mut right, v, right_count);
                right_count += 1.0;
            }
        }

        Ok((left, right))
    }

    fn partition(
        &mut self,
        hyperplane: &Hyperplane,
        ids: &[ItemId],
    ) -> Result<(Vec<ItemId>, Vec<ItemId>)> {
        let mut left = Vec::with_capacity(ids.len() / 2);
        let mut right = Vec::with_capacity(ids.len() / 2);

        for &id in ids {
            let margin = hyperplane.margin(self.store.get(id)?);
            let goes_right = if margin != 0.0 {
                margin > 0.0
            } else {
                self.rng.random::<bool>()
            };
            if goes_right {
                right.push(id);
            } else {
                left.push(id);
            }
        }

        Ok((left, right))
    }
}

// Running mean update: mean' = (mean * n + v) / (n + 1)
#[inline]
fn fold_into(mean: &mut [f32], v: &[f32], n: f32) {
    for (m, x) in mean.iter_mut().zip(v) {
        *m = (*m * n + x) / (n + 1.0);
    }
}
