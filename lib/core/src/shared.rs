use crate::background::{get_background_system, BuildGuard, BuildTicket, ForestBuildJob};
use crate::search::Neighbor;
use crate::{Error, Forest, ItemId, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A forest shared between threads.
///
/// Any number of queries run concurrently under a read lock. Insertion and
/// builds are serialized: a build holds an upgradable read lock from the
/// moment it starts growing until the new trees are installed, so an insert
/// racing a build either lands before growing starts (and is indexed) or
/// fails with [`Error::BuildInProgress`] or [`Error::IndexFrozen`]. Queries
/// keep seeing the previous trees until the new ones are swapped in.
#[derive(Clone)]
pub struct SharedForest {
    forest: Arc<RwLock<Forest>>,
    building: Arc<AtomicBool>,
}

impl SharedForest {
    pub fn new(forest: Forest) -> Self {
        Self {
            forest: Arc::new(RwLock::new(forest)),
            building: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_item(&self, id: ItemId, vector: &[f32]) -> Result<()> {
        if self.is_building() {
            return Err(Error::BuildInProgress);
        }
        self.forest.write().add_item(id, vector)
    }

    /// Build on the calling thread.
    pub fn build(&self, num_trees: usize) -> Result<()> {
        let _guard = BuildGuard::acquire(&self.building)?;
        let forest = self.forest.upgradable_read();
        let grown = forest.grow_trees(num_trees)?;
        RwLockUpgradableReadGuard::upgrade(forest).install(grown);
        Ok(())
    }

    /// Hand the build to the background worker and return immediately.
    pub fn build_in_background(&self, num_trees: usize) -> Result<BuildTicket> {
        let guard = BuildGuard::acquire(&self.building)?;
        let ticket = BuildTicket::new();
        let job = ForestBuildJob::new(self.forest.clone(), num_trees, guard, ticket.clone());
        get_background_system().submit(Box::new(job));
        Ok(ticket)
    }

    pub fn unbuild(&self) -> Result<()> {
        let _guard = BuildGuard::acquire(&self.building)?;
        self.forest.write().unbuild();
        Ok(())
    }

    pub fn query(&self, vector: &[f32], k: usize, search_k: Option<usize>) -> Result<Vec<Neighbor>> {
        self.forest.read().query(vector, k, search_k)
    }

    pub fn query_by_item(&self, id: ItemId, k: usize, search_k: Option<usize>) -> Result<Vec<Neighbor>> {
        self.forest.read().query_by_item(id, k, search_k)
    }

    pub fn count(&self) -> usize {
        self.forest.read().count()
    }

    pub fn n_trees(&self) -> usize {
        self.forest.read().n_trees()
    }

    pub fn is_built(&self) -> bool {
        self.forest.read().is_built()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    /// Read access to the underlying forest, e.g. for persisting it.
    pub fn read(&self) -> RwLockReadGuard<'_, Forest> {
        self.forest.read()
    }
}

impl From<Forest> for SharedForest {
    fn from(forest: Forest) -> Self {
        Self::new(forest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ForestConfig;
    use std::thread;

    fn shared(n: i64) -> SharedForest {
        let forest = Forest::with_config(ForestConfig {
            seed: Some(8),
            leaf_size: 4,
            ..ForestConfig::new(2)
        })
        .unwrap();
        let shared = SharedForest::new(forest);
        for i in 0..n {
            shared.add_item(i, &[i as f32, (i * i) as f32 * 0.01]).unwrap();
        }
        shared
    }

    #[test]
    fn test_background_build_completes() {
        let index = shared(200);
        let ticket = index.build_in_background(6).unwrap();
        assert_eq!(ticket.wait(), Ok(()));

        assert!(index.is_built());
        assert!(!index.is_building());
        assert_eq!(index.n_trees(), 6);
        assert_eq!(index.query(&[3.0, 0.09], 1, None).unwrap()[0].id, 3);
    }

    #[test]
    fn test_background_build_failure_leaves_index_unbuilt() {
        let index = SharedForest::new(Forest::new(2).unwrap());
        let ticket = index.build_in_background(3).unwrap();
        assert_eq!(ticket.wait(), Err(Error::EmptyIndex));
        assert!(!index.is_built());
        assert!(!index.is_building());
    }

    #[test]
    fn test_concurrent_queries() {
        let index = shared(300);
        index.build(5).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = index.clone();
                thread::spawn(move || {
                    for i in (t * 50)..(t * 50 + 50) {
                        let hits = index.query_by_item(i, 3, Some(300)).unwrap();
                        assert_eq!(hits[0].id, i);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_inserts_racing_a_build_are_indexed_or_rejected() {
        for round in 0..10i64 {
            let index = shared(500);
            let base = 10_000 + round * 100_000;

            let adders: Vec<_> = (0..4i64)
                .map(|t| {
                    let index = index.clone();
                    thread::spawn(move || {
                        let mut accepted = Vec::new();
                        for n in 0..20_000i64 {
                            let id = base + t * 20_000 + n;
                            match index.add_item(id, &[id as f32, 0.5]) {
                                Ok(()) => accepted.push(id),
                                Err(e) => {
                                    assert!(matches!(
                                        e,
                                        Error::BuildInProgress | Error::IndexFrozen
                                    ));
                                    break;
                                }
                            }
                        }
                        accepted
                    })
                })
                .collect();

            index.build(1).unwrap();
            let accepted: Vec<ItemId> = adders
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect();

            let forest = index.read();
            let indexed: std::collections::HashSet<ItemId> =
                forest.pool().leaf_items(forest.roots()[0]).into_iter().collect();
            assert_eq!(indexed.len(), forest.count());
            for id in accepted {
                assert!(indexed.contains(&id), "item {id} was accepted but is in no tree");
            }
        }
    }

    #[test]
    fn test_frozen_and_unbuild() {
        let index = shared(10);
        index.build(2).unwrap();
        assert_eq!(index.add_item(50, &[0.0, 0.0]), Err(Error::IndexFrozen));

        index.unbuild().unwrap();
        index.add_item(50, &[0.0, 0.0]).unwrap();
        assert_eq!(index.count(), 11);
    }
}
