use crate::node::{Node, NodeId};
use crate::{Error, Forest, ItemId, Result};
use ahash::AHashSet;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A ranked query result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: ItemId,
    pub distance: f32,
}

/// Split results into aligned `(ids, distances)` arrays.
pub fn into_parts(neighbors: Vec<Neighbor>) -> (Vec<ItemId>, Vec<f32>) {
    neighbors.into_iter().map(|n| (n.id, n.distance)).unzip()
}

/// Map a raw search budget where any negative value means "engine default".
#[inline]
pub fn search_budget(raw: i64) -> Option<usize> {
    usize::try_from(raw).ok()
}

/// Pending subtree with a lower bound on the distance to anything inside it
#[derive(Clone, Copy)]
struct Frontier {
    bound: OrderedFloat<f32>,
    node: NodeId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.bound == other.bound && self.node == other.node
    }
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on bound; on ties the most recently allocated node wins
        other
            .bound
            .cmp(&self.bound)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first search across every tree of `forest`.
///
/// Subtrees are expanded in order of their distance bound until `search_k`
/// distinct candidates are collected or the frontier runs dry; candidates
/// are then ranked by exact distance with ties broken by id.
pub fn search(
    forest: &Forest,
    query: &[f32],
    k: usize,
    search_k: Option<usize>,
) -> Result<Vec<Neighbor>> {
    if query.len() != forest.dim() {
        return Err(Error::DimensionMismatch {
            expected: forest.dim(),
            actual: query.len(),
        });
    }
    if k == 0 {
        return Err(Error::InvalidArgument("k must be positive".into()));
    }
    if search_k == Some(0) {
        return Err(Error::InvalidArgument("search_k must be positive".into()));
    }
    if query.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidArgument("query has non-finite components".into()));
    }
    if !forest.is_built() {
        return Err(Error::NotBuilt);
    }

    let budget = search_k.unwrap_or_else(|| k.saturating_mul(forest.n_trees()));
    let candidates = collect_candidates(forest, query, budget)?;
    rank(forest, query, candidates, k)
}

fn collect_candidates(forest: &Forest, query: &[f32], budget: usize) -> Result<AHashSet<ItemId>> {
    let mut frontier: BinaryHeap<Frontier> = forest
        .roots()
        .iter()
        .map(|&node| Frontier {
            bound: OrderedFloat(0.0),
            node,
        })
        .collect();
    let mut candidates = AHashSet::with_capacity(budget.min(forest.count()));

    while candidates.len() < budget {
        let Some(Frontier { bound, node }) = frontier.pop() else {
            break;
        };

        match forest.node(node) {
            Some(Node::Leaf { items }) => candidates.extend(items.iter().copied()),
            Some(Node::Split {
                hyperplane,
                left,
                right,
            }) => {
                let margin = hyperplane.margin(query);
                let (near, far) = if margin > 0.0 {
                    (*right, *left)
                } else {
                    (*left, *right)
                };
                frontier.push(Frontier { bound, node: near });
                frontier.push(Frontier {
                    bound: bound.max(OrderedFloat(margin.abs())),
                    node: far,
                });
            }
            None => return Err(Error::Corrupted(format!("missing node {node}"))),
        }
    }

    Ok(candidates)
}

fn rank(
    forest: &Forest,
    query: &[f32],
    candidates: AHashSet<ItemId>,
    k: usize,
) -> Result<Vec<Neighbor>> {
    let metric = forest.metric();
    let mut ranked = candidates
        .into_iter()
        .map(|id| {
            let vector = forest.store().get(id)?;
            Ok(Neighbor {
                id,
                distance: metric.distance(query, vector),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    ranked.sort_unstable_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    ranked.truncate(k);
    Ok(ranked)
}
