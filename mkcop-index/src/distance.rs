//! Distance functions over externally owned objects.
//!
//! The tree never stores object payloads. It only knows object ids and asks
//! a [`DistanceFunction`] for the distance between two of them, so any metric
//! space can be indexed as long as the distance satisfies the triangle
//! inequality (covering-radius pruning depends on it).

use std::sync::Arc;

/// Stable identifier of an indexed object.
pub type ObjectId = u64;

/// A metric over object ids.
pub trait DistanceFunction: Send + Sync {
    /// Distance between two objects. Must be non-negative, symmetric and
    /// satisfy the triangle inequality.
    fn distance(&self, a: ObjectId, b: ObjectId) -> f64;
}

impl<D: DistanceFunction + ?Sized> DistanceFunction for Arc<D> {
    fn distance(&self, a: ObjectId, b: ObjectId) -> f64 {
        (**self).distance(a, b)
    }
}

/// Vector metrics supported by [`VectorRelation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VectorMetric {
    /// Euclidean (L2) distance: sqrt(sum((a[i] - b[i])^2))
    #[default]
    Euclidean,
    /// Manhattan (L1) distance: sum(|a[i] - b[i]|)
    Manhattan,
}

impl VectorMetric {
    #[inline]
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Euclidean => euclidean_distance(a, b),
            Self::Manhattan => manhattan_distance(a, b),
        }
    }
}

/// Euclidean (L2) distance between two vectors.
#[inline]
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Manhattan (L1) distance between two vectors.
#[inline]
pub fn manhattan_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// An in-memory table of vectors addressed by position.
///
/// Object `i` is the `i`-th vector pushed. Unknown ids are infinitely far
/// from everything.
#[derive(Debug, Clone, Default)]
pub struct VectorRelation {
    points: Vec<Vec<f64>>,
    metric: VectorMetric,
}

impl VectorRelation {
    pub fn new(metric: VectorMetric) -> Self {
        Self {
            points: Vec::new(),
            metric,
        }
    }

    /// Builds a relation from existing vectors.
    pub fn from_points(points: Vec<Vec<f64>>, metric: VectorMetric) -> Self {
        Self { points, metric }
    }

    /// Appends a vector and returns its id.
    pub fn push(&mut self, point: Vec<f64>) -> ObjectId {
        self.points.push(point);
        (self.points.len() - 1) as ObjectId
    }

    pub fn get(&self, id: ObjectId) -> Option<&[f64]> {
        self.points.get(id as usize).map(Vec::as_slice)
    }

    /// All object ids in insertion order.
    pub fn ids(&self) -> Vec<ObjectId> {
        (0..self.points.len() as ObjectId).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn metric(&self) -> VectorMetric {
        self.metric
    }
}

impl DistanceFunction for VectorRelation {
    fn distance(&self, a: ObjectId, b: ObjectId) -> f64 {
        match (self.get(a), self.get(b)) {
            (Some(pa), Some(pb)) => self.metric.distance(pa, pb),
            _ => f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let d = euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_manhattan_distance() {
        let d = manhattan_distance(&[1.0, -1.0], &[3.0, 2.0]);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_relation_ids_are_positions() {
        let mut relation = VectorRelation::new(VectorMetric::Euclidean);
        assert_eq!(relation.push(vec![0.0, 0.0]), 0);
        assert_eq!(relation.push(vec![1.0, 0.0]), 1);
        assert_eq!(relation.ids(), vec![0, 1]);
        assert_eq!(relation.len(), 2);
        assert!((relation.distance(0, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_id_is_infinitely_far() {
        let relation = VectorRelation::from_points(vec![vec![0.0]], VectorMetric::Manhattan);
        assert_eq!(relation.distance(0, 7), f64::INFINITY);
    }

    #[test]
    fn test_arc_delegates() {
        let relation = Arc::new(VectorRelation::from_points(
            vec![vec![0.0], vec![2.0]],
            VectorMetric::Euclidean,
        ));
        assert!((relation.distance(0, 1) - 2.0).abs() < 1e-12);
    }
}
