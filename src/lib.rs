//! # rpforest
//!
//! Approximate nearest neighbour search with a forest of random projection
//! trees.
//!
//! Vectors are added under caller-chosen integer ids, the forest is built
//! once, and queries then return the `k` closest ids with their exact
//! distances. More trees and a larger search budget buy recall at the cost
//! of memory and query time.
//!
//! ## Quick Start
//!
//! ### From the command line
//!
//! ```bash
//! rpforest build --input vectors.jsonl --output index.rpf --trees 10
//! rpforest query --index index.rpf --vector "0.1,0.2,0.3" -k 5
//! ```
//!
//! ### As a Library
//!
//! ```rust
//! use rpforest::prelude::*;
//!
//! let mut forest = Forest::with_config(ForestConfig {
//!     metric: Metric::Angular,
//!     seed: Some(7),
//!     ..ForestConfig::new(3)
//! })
//! .unwrap();
//!
//! forest.add_item(10, &[1.0, 0.0, 0.0]).unwrap();
//! forest.add_item(20, &[0.0, 1.0, 0.0]).unwrap();
//! forest.add_item(30, &[0.9, 0.1, 0.0]).unwrap();
//! forest.build(8).unwrap();
//!
//! let (ids, distances) = into_parts(forest.query(&[1.0, 0.0, 0.0], 2, None).unwrap());
//! assert_eq!(ids, vec![10, 30]);
//! assert!(distances[0] < distances[1]);
//! ```
//!
//! ## Crate Structure
//!
//! - [`rpforest-core`](https://docs.rs/rpforest-core) - Vector store, trees, forest and search
//! - [`rpforest-storage`](https://docs.rs/rpforest-storage) - Index files and snapshots

// Re-export core types
pub use rpforest_core::{
    into_parts, search_budget, BuildTicket, Error, Forest, ForestConfig, Hyperplane, ItemId,
    Metric, Neighbor, Node, NodeId, NodePool, Result, SharedForest, TreeBuilder, Vector,
    VectorStore,
};

// Re-export storage
pub use rpforest_storage::{
    load_forest, save_forest, PersistenceError, SnapshotDescription, SnapshotManager,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        into_parts, load_forest, save_forest, Error, Forest, ForestConfig, ItemId, Metric,
        Neighbor, Result, SharedForest,
    };
}

/// SIMD-optimized vector operations
pub mod simd {
    pub use rpforest_core::simd::{dot, l1, norm, squared_l2};
}
