//! # MkCoP Index - Reverse k-Nearest-Neighbor Queries in Metric Spaces
//!
//! This crate provides a paged metric tree (an M-tree variant) that answers
//! reverse k-nearest-neighbor queries: given a query object `q` and
//! `k <= k_max`, find every indexed object that has `q` among its `k`
//! nearest neighbors.
//!
//! ## Features
//!
//! - **kNN Distance Bounds**: per object, a conservative (upper) and a
//!   progressive (lower) line fitted to its exact kNN distances in log-log
//!   space, constrained by the convex hull of the samples
//! - **Subtree Aggregation**: every directory entry bounds the kNN distances
//!   of its whole subtree, so entire subtrees are pruned during queries
//! - **Exact Refinement**: only objects the bounds cannot decide are checked
//!   with an exact kNN search
//! - **Disk or Memory**: fixed-size checksummed pages with an LRU cache, or
//!   a plain in-memory page map
//! - **Concurrent Queries**: the built tree is `Send + Sync` and read-only
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mkcop_index::{MkCoPTree, TreeSettings, VectorMetric, VectorRelation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let relation = VectorRelation::from_points(
//!     vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![2.0, 0.0]],
//!     VectorMetric::Euclidean,
//! );
//! let ids = relation.ids();
//!
//! let mut tree = MkCoPTree::in_memory(TreeSettings::new(2), relation)?;
//! tree.insert(&ids)?;
//!
//! // Both (0,0) and (2,0) have (1,0) as their nearest neighbor
//! let reverse = tree.reverse_knn_query(1, 1)?;
//! assert_eq!(reverse.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod approximation;
pub mod convex_hull;
pub mod disk_mtree;
pub mod distance;
pub mod split;
pub mod statistics;

pub use approximation::{fit_approximations, ApproximationLine, BOUND_EPSILON};
pub use convex_hull::ConvexHull;
pub use disk_mtree::{
    CancellationToken, IntegrityReport, MTreeError, MTreeResult, MkCoPTree, TreeSettings,
    TreeStats,
};
pub use distance::{DistanceFunction, ObjectId, VectorMetric, VectorRelation};
pub use split::{FarthestPointsSplit, Split, SplitSide, SplitStrategy};
pub use statistics::RkNNStatistic;
