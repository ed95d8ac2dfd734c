use crate::builder::{tree_seed, TreeBuilder};
use crate::node::{Node, NodeId, NodePool};
use crate::search::{self, Neighbor};
use crate::store::VectorStore;
use crate::{Error, ItemId, Metric, Result, Vector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_LEAF_SIZE: usize = 16;
pub const DEFAULT_SPLIT_ATTEMPTS: usize = 3;
pub const DEFAULT_TWO_MEANS_ITERATIONS: usize = 200;

/// Configuration for a forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub dim: usize,
    pub metric: Metric,
    /// Maximum number of items stored in a leaf
    pub leaf_size: usize,
    /// Base seed for pivot selection; `None` draws a fresh seed on every build
    pub seed: Option<u64>,
    /// Hyperplane attempts per node before forcing a balanced split
    pub split_attempts: usize,
    pub two_means_iterations: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            dim: 0,
            metric: Metric::Euclidean,
            leaf_size: DEFAULT_LEAF_SIZE,
            seed: None,
            split_attempts: DEFAULT_SPLIT_ATTEMPTS,
            two_means_iterations: DEFAULT_TWO_MEANS_ITERATIONS,
        }
    }
}

impl ForestConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidArgument("dimensionality must be positive".into()));
        }
        if self.leaf_size == 0 {
            return Err(Error::InvalidArgument("leaf_size must be positive".into()));
        }
        if self.split_attempts == 0 {
            return Err(Error::InvalidArgument("split_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Freshly grown trees, not yet installed into a forest
#[derive(Debug)]
pub struct GrownTrees {
    pool: NodePool,
    roots: Vec<NodeId>,
    seed: u64,
}

impl GrownTrees {
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// A random projection forest over a set of labelled vectors.
///
/// Items are added first, then [`build`](Forest::build) grows the trees.
/// Once built the forest is frozen: `add_item` fails with
/// [`Error::IndexFrozen`] until [`unbuild`](Forest::unbuild) is called.
/// Building again discards the previous trees entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ForestParts")]
pub struct Forest {
    config: ForestConfig,
    store: VectorStore,
    pool: NodePool,
    roots: Vec<NodeId>,
    built: bool,
}

impl Forest {
    pub fn new(dim: usize) -> Result<Self> {
        Self::with_config(ForestConfig::new(dim))
    }

    pub fn with_config(config: ForestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: VectorStore::new(config.dim),
            config,
            pool: NodePool::new(),
            roots: Vec::new(),
            built: false,
        })
    }

    /// Reassemble a forest from persisted parts, checking every invariant.
    pub fn from_parts(
        config: ForestConfig,
        store: VectorStore,
        pool: NodePool,
        roots: Vec<NodeId>,
        built: bool,
    ) -> Result<Self> {
        config.validate().map_err(|e| Error::Corrupted(e.to_string()))?;
        if store.dim() != config.dim {
            return Err(Error::Corrupted(format!(
                "store dimension {} does not match config dimension {}",
                store.dim(),
                config.dim
            )));
        }
        if !built && (!roots.is_empty() || !pool.is_empty()) {
            return Err(Error::Corrupted("unbuilt forest carries trees".into()));
        }
        if built && roots.is_empty() {
            return Err(Error::Corrupted("built forest has no trees".into()));
        }

        for root in &roots {
            if pool.get(*root).is_none() {
                return Err(Error::Corrupted(format!("root {root} is outside the node pool")));
            }
        }
        for (id, node) in pool.iter() {
            match node {
                Node::Leaf { items } => {
                    if let Some(missing) = items.iter().find(|item| !store.contains(**item)) {
                        return Err(Error::Corrupted(format!(
                            "leaf {id} references unknown item {missing}"
                        )));
                    }
                }
                Node::Split {
                    hyperplane,
                    left,
                    right,
                } => {
                    if hyperplane.dim() != config.dim {
                        return Err(Error::Corrupted(format!(
                            "split {id} has a {}-dimensional hyperplane",
                            hyperplane.dim()
                        )));
                    }
                    // children always precede their parent, which also rules out cycles
                    if left.index() >= id.index() || right.index() >= id.index() {
                        return Err(Error::Corrupted(format!("split {id} has a dangling child")));
                    }
                }
            }
        }

        Ok(Self {
            config,
            store,
            pool,
            roots,
            built,
        })
    }

    #[inline]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.config.dim
    }

    #[inline]
    pub fn metric(&self) -> Metric {
        self.config.metric
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Number of distinct items
    #[inline]
    pub fn count(&self) -> usize {
        self.store.count()
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.pool.len()
    }

    #[inline]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.pool.get(id)
    }

    #[inline]
    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Insert or overwrite an item. Fails once the forest is built.
    pub fn add_item(&mut self, id: ItemId, vector: &[f32]) -> Result<()> {
        if self.built {
            return Err(Error::IndexFrozen);
        }
        self.store.insert(id, vector)
    }

    /// Owned copy of a stored item's vector
    pub fn get_item(&self, id: ItemId) -> Result<Vector> {
        self.store.get_vector(id)
    }

    /// Distance between two stored items under the forest's metric
    pub fn distance(&self, a: ItemId, b: ItemId) -> Result<f32> {
        let va = self.store.get(a)?;
        let vb = self.store.get(b)?;
        Ok(self.config.metric.distance(va, vb))
    }

    /// Build `num_trees` trees over every stored item, replacing any
    /// previous trees. On error the forest is left as it was.
    pub fn build(&mut self, num_trees: usize) -> Result<()> {
        let grown = self.grow_trees(num_trees)?;
        self.install(grown);
        Ok(())
    }

    /// Grow a complete set of trees without touching the forest.
    ///
    /// Trees are independent and built in parallel; each one draws from its
    /// own RNG derived from the base seed, so the outcome does not depend on
    /// thread scheduling.
    pub fn grow_trees(&self, num_trees: usize) -> Result<GrownTrees> {
        if num_trees == 0 {
            return Err(Error::InvalidArgument("num_trees must be positive".into()));
        }
        if self.store.is_empty() {
            return Err(Error::EmptyIndex);
        }

        let seed = self.config.seed.unwrap_or_else(rand::random::<u64>);
        let started = Instant::now();
        let ids = self.store.ids();

        let trees: Vec<(NodePool, NodeId)> = (0..num_trees)
            .into_par_iter()
            .map(|tree| -> Result<(NodePool, NodeId)> {
                let built = TreeBuilder::new(&self.store, &self.config, tree_seed(seed, tree))
                    .build(ids.to_vec())?;
                debug!(tree, nodes = built.0.len(), "tree built");
                Ok(built)
            })
            .collect::<Result<Vec<_>>>()?;

        let total: usize = trees.iter().map(|(pool, _)| pool.len()).sum();
        let mut pool = NodePool::with_capacity(total);
        let roots = trees
            .into_iter()
            .map(|(local, root)| pool.append(local, root))
            .collect();

        info!(
            trees = num_trees,
            items = self.store.count(),
            nodes = pool.len(),
            seed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "forest grown"
        );

        Ok(GrownTrees { pool, roots, seed })
    }

    /// Swap in trees produced by [`grow_trees`](Forest::grow_trees).
    pub fn install(&mut self, grown: GrownTrees) {
        debug!(seed = grown.seed, trees = grown.roots.len(), "installing trees");
        self.pool = grown.pool;
        self.roots = grown.roots;
        self.built = true;
    }

    /// Drop all trees and reopen the forest for insertion.
    pub fn unbuild(&mut self) {
        self.pool = NodePool::new();
        self.roots.clear();
        self.built = false;
    }

    /// Approximate `k` nearest neighbours of `vector`.
    ///
    /// `search_k` bounds how many candidates are examined; `None` uses
    /// `k * n_trees`.
    pub fn query(&self, vector: &[f32], k: usize, search_k: Option<usize>) -> Result<Vec<Neighbor>> {
        search::search(self, vector, k, search_k)
    }

    /// Approximate neighbours of a stored item (the item itself included).
    pub fn query_by_item(&self, id: ItemId, k: usize, search_k: Option<usize>) -> Result<Vec<Neighbor>> {
        let vector = self.store.get(id)?;
        search::search(self, vector, k, search_k)
    }
}

#[derive(Deserialize)]
struct ForestParts {
    config: ForestConfig,
    store: VectorStore,
    pool: NodePool,
    roots: Vec<NodeId>,
    built: bool,
}

impl TryFrom<ForestParts> for Forest {
    type Error = Error;

    fn try_from(parts: ForestParts) -> Result<Self> {
        Forest::from_parts(parts.config, parts.store, parts.pool, parts.roots, parts.built)
    }
}
