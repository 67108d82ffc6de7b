//! Reverse k-nearest-neighbor queries.
//!
//! Subtrees are visited nearest first and pruned when even their closest
//! possible member lies beyond the subtree's conservative kNN distance.
//! Leaf entries are then classified: a distance within the progressive bound
//! is a certain hit, one within the conservative bound is refined with an
//! exact kNN computation, anything else is discarded.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use super::knn::beyond;
use super::mtree_impl::MkCoPTree;
use super::mtree_types::{MTreeError, MTreeResult, Node, PageId};
use crate::approximation::BOUND_EPSILON;
use crate::distance::{DistanceFunction, ObjectId};
use crate::statistics::RkNNStatistic;

/// Flag that aborts running queries with [`MTreeError::Cancelled`].
///
/// Checked every time a query takes the next page from its queue.
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

/// A subtree waiting to be examined, keyed by its minimum distance to the query
#[derive(Debug, Clone, Copy)]
struct QueuedNode {
    min_distance: f64,
    page_id: PageId,
}

impl PartialEq for QueuedNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedNode {}

impl PartialOrd for QueuedNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.min_distance
            .total_cmp(&other.min_distance)
            .then_with(|| self.page_id.cmp(&other.page_id))
    }
}

impl<D: DistanceFunction> MkCoPTree<D> {
    /// All objects having `query` among their `k` nearest neighbors, with
    /// their distance to `query`, nearest first.
    ///
    /// An object `o` qualifies when `distance(o, query)` does not exceed the
    /// distance of its own k-th nearest neighbor, `o` itself not counted.
    /// `query` is never part of the result. Requires `1 <= k <= k_max`.
    pub fn reverse_knn_query(
        &self,
        query: ObjectId,
        k: usize,
    ) -> MTreeResult<Vec<(ObjectId, f64)>> {
        self.reverse_knn_query_with(query, k, &CancellationToken::new())
    }

    /// [`reverse_knn_query`](Self::reverse_knn_query) that gives up with
    /// [`MTreeError::Cancelled`] once `token` is cancelled.
    pub fn reverse_knn_query_with(
        &self,
        query: ObjectId,
        k: usize,
        token: &CancellationToken,
    ) -> MTreeResult<Vec<(ObjectId, f64)>> {
        let k_max = self.k_max();
        if k == 0 || k > k_max {
            return Err(MTreeError::Configuration(format!(
                "k = {} is outside 1..={}",
                k, k_max
            )));
        }
        self.ensure_approximated()?;

        let mut true_hits: Vec<(ObjectId, f64)> = Vec::new();
        let mut candidates: Vec<(ObjectId, f64)> = Vec::new();

        let root = self.root_page();
        if root != 0 {
            let mut queue = BinaryHeap::new();
            queue.push(Reverse(QueuedNode {
                min_distance: 0.0,
                page_id: root,
            }));

            while let Some(Reverse(queued)) = queue.pop() {
                if token.is_cancelled() {
                    log::debug!("reverse {}-NN query for {} cancelled", k, query);
                    return Err(MTreeError::Cancelled);
                }

                match self.read_node(queued.page_id)? {
                    Node::Directory { entries, .. } => {
                        for entry in &entries {
                            let d = self.distance.distance(entry.routing_object, query);
                            let min_distance = (d - entry.covering_radius).max(0.0);
                            let bound = entry.approximate_conservative_knn_distance(k);
                            if !beyond(min_distance, bound) {
                                queue.push(Reverse(QueuedNode {
                                    min_distance,
                                    page_id: entry.child_page,
                                }));
                            }
                        }
                    }
                    Node::Leaf { entries } => {
                        for entry in &entries {
                            if entry.object_id == query {
                                continue;
                            }
                            let d = self.distance.distance(entry.object_id, query);
                            let progressive = entry.approximate_progressive_knn_distance(k);
                            if d <= progressive * (1.0 - BOUND_EPSILON) {
                                true_hits.push((entry.object_id, d));
                            } else if !beyond(d, entry.approximate_conservative_knn_distance(k)) {
                                candidates.push((entry.object_id, d));
                            }
                        }
                    }
                }
            }
        }

        let true_hit_count = true_hits.len();
        let mut result = true_hits;
        if !candidates.is_empty() {
            let ids: Vec<ObjectId> = candidates.iter().map(|(id, _)| *id).collect();
            let neighborhoods = self.batch_nn(&ids, k)?;
            for ((id, d), neighbors) in candidates.iter().zip(&neighborhoods) {
                let kth_distance = if neighbors.len() < k {
                    f64::INFINITY
                } else {
                    neighbors[k - 1].1
                };
                if *d <= kth_distance || neighbors.iter().any(|(n, _)| *n == query) {
                    result.push((*id, *d));
                }
            }
        }

        result.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        self.statistics
            .record(true_hit_count, candidates.len(), result.len());
        log::debug!(
            "reverse {}-NN of {}: {} results ({} true hits, {} candidates)",
            k,
            query,
            result.len(),
            true_hit_count,
            candidates.len()
        );

        Ok(result)
    }

    /// Counters accumulated by all reverse kNN queries since the last clear.
    pub fn statistics(&self) -> RkNNStatistic {
        self.statistics.snapshot()
    }

    pub fn clear_statistics(&self) {
        self.statistics.clear();
    }
}
