//! Exact k-nearest-neighbor search over the tree.
//!
//! `knn_query` answers a single query best-first. `batch_nn` answers many
//! queries in one depth-first traversal, descending into a subtree only with
//! the queries whose current k-th distance could still improve there. Both
//! exclude the query object from its own neighbor list.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::mtree_impl::MkCoPTree;
use super::mtree_types::{MTreeResult, Node, PageId};
use crate::approximation::BOUND_EPSILON;
use crate::distance::{DistanceFunction, ObjectId};

/// True when `lower_bound` certainly exceeds `limit`, allowing for rounding.
#[inline]
pub(crate) fn beyond(lower_bound: f64, limit: f64) -> bool {
    lower_bound > limit * (1.0 + BOUND_EPSILON)
}

/// An object and its distance to a query, ordered by distance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Neighbor {
    pub(crate) distance: f64,
    pub(crate) id: ObjectId,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// The k nearest neighbors seen so far.
#[derive(Debug)]
pub(crate) struct KnnHeap {
    k: usize,
    // Max-heap: the current k-th neighbor is on top
    heap: BinaryHeap<Neighbor>,
}

impl KnnHeap {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Distance of the k-th neighbor, infinite until k neighbors are known.
    pub(crate) fn kth_distance(&self) -> f64 {
        if self.heap.len() < self.k {
            return f64::INFINITY;
        }
        self.heap.peek().map_or(f64::INFINITY, |n| n.distance)
    }

    pub(crate) fn offer(&mut self, id: ObjectId, distance: f64) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k || distance < self.kth_distance() {
            self.heap.push(Neighbor { distance, id });
            if self.heap.len() > self.k {
                self.heap.pop();
            }
        }
    }

    /// Neighbors in ascending distance order.
    pub(crate) fn into_sorted_vec(self) -> Vec<(ObjectId, f64)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|n| (n.id, n.distance))
            .collect()
    }
}

/// A page waiting in the best-first queue
#[derive(Debug, Clone, Copy)]
struct PendingPage {
    /// Lower bound of the distance from the query to anything in the page
    min_distance: f64,
    page_id: PageId,
    /// Distance from the query to the page's routing object
    routing_distance: Option<f64>,
}

impl PartialEq for PendingPage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingPage {}

impl PartialOrd for PendingPage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingPage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.min_distance
            .total_cmp(&other.min_distance)
            .then_with(|| self.page_id.cmp(&other.page_id))
    }
}

impl<D: DistanceFunction> MkCoPTree<D> {
    /// Exact k nearest neighbors of `query`, nearest first.
    ///
    /// The query object itself is never reported. Returns fewer than `k`
    /// neighbors when the tree holds fewer other objects.
    pub fn knn_query(&self, query: ObjectId, k: usize) -> MTreeResult<Vec<(ObjectId, f64)>> {
        self.check_closed()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let root = self.root_page();
        if root == 0 {
            return Ok(Vec::new());
        }

        let mut knn = KnnHeap::new(k);
        let mut queue = BinaryHeap::new();
        queue.push(Reverse(PendingPage {
            min_distance: 0.0,
            page_id: root,
            routing_distance: None,
        }));

        while let Some(Reverse(pending)) = queue.pop() {
            if beyond(pending.min_distance, knn.kth_distance()) {
                break;
            }

            match self.read_node(pending.page_id)? {
                Node::Leaf { entries } => {
                    for entry in &entries {
                        if entry.object_id == query {
                            continue;
                        }
                        if let Some(dp) = pending.routing_distance {
                            if beyond((dp - entry.parent_distance).abs(), knn.kth_distance()) {
                                continue;
                            }
                        }
                        let d = self.distance.distance(entry.object_id, query);
                        knn.offer(entry.object_id, d);
                    }
                }
                Node::Directory { entries, .. } => {
                    for entry in &entries {
                        if let Some(dp) = pending.routing_distance {
                            let bound =
                                (dp - entry.parent_distance).abs() - entry.covering_radius;
                            if beyond(bound, knn.kth_distance()) {
                                continue;
                            }
                        }
                        let d = self.distance.distance(entry.routing_object, query);
                        let min_distance = (d - entry.covering_radius).max(0.0);
                        if !beyond(min_distance, knn.kth_distance()) {
                            queue.push(Reverse(PendingPage {
                                min_distance,
                                page_id: entry.child_page,
                                routing_distance: Some(d),
                            }));
                        }
                    }
                }
            }
        }

        Ok(knn.into_sorted_vec())
    }

    /// Exact k nearest neighbors of every id in `ids`, parallel to the input.
    pub(crate) fn batch_nn(
        &self,
        ids: &[ObjectId],
        k: usize,
    ) -> MTreeResult<Vec<Vec<(ObjectId, f64)>>> {
        let mut heaps: Vec<KnnHeap> = ids.iter().map(|_| KnnHeap::new(k)).collect();
        let root = self.root_page();
        if root != 0 && k > 0 && !ids.is_empty() {
            let active: Vec<usize> = (0..ids.len()).collect();
            self.batch_nn_recursive(root, ids, &active, &mut heaps)?;
        }
        Ok(heaps.into_iter().map(KnnHeap::into_sorted_vec).collect())
    }

    fn batch_nn_recursive(
        &self,
        page_id: PageId,
        ids: &[ObjectId],
        active: &[usize],
        heaps: &mut [KnnHeap],
    ) -> MTreeResult<()> {
        match self.read_node(page_id)? {
            Node::Leaf { entries } => {
                for entry in &entries {
                    for &i in active {
                        let query = ids[i];
                        if entry.object_id == query {
                            continue;
                        }
                        let d = self.distance.distance(entry.object_id, query);
                        heaps[i].offer(entry.object_id, d);
                    }
                }
            }
            Node::Directory { entries, .. } => {
                // (closest query, child page, per-query lower bounds)
                let mut children: Vec<(f64, PageId, Vec<f64>)> = entries
                    .iter()
                    .map(|entry| {
                        let bounds: Vec<f64> = active
                            .iter()
                            .map(|&i| {
                                let d = self.distance.distance(entry.routing_object, ids[i]);
                                (d - entry.covering_radius).max(0.0)
                            })
                            .collect();
                        let closest = bounds.iter().copied().fold(f64::INFINITY, f64::min);
                        (closest, entry.child_page, bounds)
                    })
                    .collect();
                children.sort_by(|a, b| a.0.total_cmp(&b.0));

                for (_, child_page, bounds) in children {
                    let needed: Vec<usize> = active
                        .iter()
                        .zip(&bounds)
                        .filter(|&(&i, &bound)| !beyond(bound, heaps[i].kth_distance()))
                        .map(|(&i, _)| i)
                        .collect();
                    if !needed.is_empty() {
                        self.batch_nn_recursive(child_page, ids, &needed, heaps)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knn_heap_keeps_k_smallest() {
        let mut heap = KnnHeap::new(3);
        assert_eq!(heap.kth_distance(), f64::INFINITY);
        for (id, d) in [(1, 5.0), (2, 1.0), (3, 4.0), (4, 2.0), (5, 9.0)] {
            heap.offer(id, d);
        }
        assert_eq!(heap.kth_distance(), 4.0);
        assert_eq!(heap.into_sorted_vec(), vec![(2, 1.0), (4, 2.0), (3, 4.0)]);
    }

    #[test]
    fn test_knn_heap_ties_keep_distance() {
        let mut heap = KnnHeap::new(2);
        heap.offer(1, 1.0);
        heap.offer(2, 1.0);
        heap.offer(3, 1.0);
        assert_eq!(heap.kth_distance(), 1.0);
        let distances: Vec<f64> = heap.into_sorted_vec().iter().map(|n| n.1).collect();
        assert_eq!(distances, vec![1.0, 1.0]);
    }

    #[test]
    fn test_knn_heap_zero_k() {
        let mut heap = KnnHeap::new(0);
        heap.offer(1, 1.0);
        assert!(heap.into_sorted_vec().is_empty());
    }

    #[test]
    fn test_beyond_allows_rounding() {
        assert!(!beyond(1.0, 1.0));
        assert!(!beyond(1.0 + 1e-14, 1.0));
        assert!(beyond(1.1, 1.0));
        assert!(!beyond(5.0, f64::INFINITY));
        assert!(beyond(1e-300, 0.0));
        assert!(!beyond(0.0, 0.0));
    }

    #[test]
    fn test_pending_pages_pop_nearest_first() {
        let mut queue = BinaryHeap::new();
        for (d, page_id) in [(3.0, 1), (0.5, 2), (1.5, 3)] {
            queue.push(Reverse(PendingPage {
                min_distance: d,
                page_id,
                routing_distance: None,
            }));
        }
        let order: Vec<PageId> = std::iter::from_fn(|| queue.pop().map(|r| r.0.page_id)).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}
