//! # rpforest Core
//!
//! Approximate nearest neighbour search over a forest of random projection
//! trees.
//!
//! This crate provides the in-memory index:
//!
//! - [`VectorStore`] - Dense storage of fixed-dimension vectors keyed by item id
//! - [`NodePool`] - Arena holding the split and leaf nodes of every tree
//! - [`TreeBuilder`] - Grows one tree by recursive hyperplane splits
//! - [`Forest`] - Owns the store and the trees, builds and queries them
//! - [`SharedForest`] - Thread-safe handle with background builds
//!
//! ## Example
//!
//! ```rust
//! use rpforest_core::{Forest, ForestConfig, Metric};
//!
//! let mut forest = Forest::with_config(ForestConfig {
//!     metric: Metric::Euclidean,
//!     seed: Some(42),
//!     ..ForestConfig::new(2)
//! })
//! .unwrap();
//!
//! forest.add_item(0, &[1.0, 1.0]).unwrap();
//! forest.add_item(1, &[5.0, 5.0]).unwrap();
//! forest.add_item(2, &[2.0, 2.0]).unwrap();
//! forest.build(10).unwrap();
//!
//! let nearest = forest.query(&[1.0, 1.0], 2, None).unwrap();
//! assert_eq!(nearest[0].id, 0);
//! assert_eq!(nearest[1].id, 2);
//! ```

pub mod background;
pub mod builder;
pub mod error;
pub mod forest;
pub mod metric;
pub mod node;
pub mod search;
pub mod shared;
pub mod store;
pub mod vector;

/// SIMD-optimized vector operations
///
/// Dot products and distances use AVX2/FMA on x86_64 when the CPU
/// supports it and fall back to portable scalar loops otherwise.
pub mod simd;

/// Caller-chosen identifier of an indexed vector
pub type ItemId = i64;

pub use background::{get_background_system, BackgroundJob, BackgroundJobSystem, BuildTicket};
pub use builder::TreeBuilder;
pub use error::{Error, Result};
pub use forest::{Forest, ForestConfig, GrownTrees};
pub use metric::Metric;
pub use node::{Hyperplane, Node, NodeId, NodePool};
pub use search::{into_parts, search, search_budget, Neighbor};
pub use shared::SharedForest;
pub use store::VectorStore;
pub use vector::Vector;
